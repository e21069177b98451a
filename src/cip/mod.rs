//! CIP explicit messaging.
//!
//! This module provides:
//! - Message router request/reply framing
//! - Request path (EPATH) decoding
//! - The identity, symbol and template objects
//! - The [`Router`] dispatching services against a [`TagStore`](crate::tag::TagStore)
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use enip_rs::cip::{MessageRouterRequest, RequestContext, Router};
//! use enip_rs::config::IdentityConfig;
//! use enip_rs::connection::ConnectionManager;
//! use enip_rs::ids::SequentialIds;
//! use enip_rs::tag::{Tag, TagStore};
//! use enip_rs::types::{DataType, ServiceCode};
//!
//! let store = Arc::new(TagStore::new());
//! store.add_tag(Tag::new("count", DataType::Dint, &[]).unwrap());
//! let router = Router::new(store, IdentityConfig::default());
//!
//! let mut connections = ConnectionManager::new();
//! let ids = SequentialIds::default();
//! let mut ctx = RequestContext {
//!     connections: &mut connections,
//!     ids: &ids,
//!     max_reply: 472,
//! };
//!
//! let request = MessageRouterRequest::new(
//!     ServiceCode::READ_TAG,
//!     enip_rs::path::encode("count").unwrap(),
//!     vec![1, 0],
//! );
//! let reply = router.dispatch(&request, &mut ctx).unwrap();
//! assert!(reply.is_ok());
//! ```

pub mod epath;
mod object;
mod request;
mod router;

pub use epath::{RequestPath, Segment, encode_logical, logical_path};
pub use object::{ObjectInstance, identity_instance, lookup, symbol_instance, template_instance};
pub use request::{MessageRouterRequest, MessageRouterResponse};
pub use router::{RequestContext, Router};
