//! EtherNet/IP encapsulation and CIP tag server built on tokio.
//!
//! This crate implements the server side of EtherNet/IP explicit messaging
//! as spoken by Logix-style controllers: session registration over TCP,
//! List* discovery over TCP and UDP, unconnected and connected CIP requests,
//! and a typed tag store with user-defined structures that clients can
//! discover through the symbol and template objects.
//!
//! # Features
//!
//! - Bit-exact encapsulation framing and common packet format
//! - Forward Open / Large Forward Open / Forward Close connections
//! - Tag read/write (plain and fragmented), read-modify-write, browsing
//! - Multiple service packets and unconnected send
//! - Structure templates with CRC-derived handles
//! - Symbolic tag path parser and serializer
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use enip_rs::config::ServerConfig;
//! use enip_rs::tag::{Tag, TagStore};
//! use enip_rs::transport::EipServer;
//! use enip_rs::types::DataType;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> enip_rs::Result<()> {
//!     let store = Arc::new(TagStore::new());
//!     store.add_tag(Tag::new("counts", DataType::Dint, &[10])?);
//!
//!     let server = EipServer::new(ServerConfig::default(), store).start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Protocol Overview
//!
//! Every encapsulation frame starts with a 24-byte little-endian header:
//!
//! ```text
//! +--------+--------+--------+--------+
//! |     Command     |     Length      |  (4 bytes)
//! +--------+--------+--------+--------+
//! |          Session Handle           |  (4 bytes)
//! +--------+--------+--------+--------+
//! |              Status               |  (4 bytes)
//! +--------+--------+--------+--------+
//! |          Sender Context           |  (8 bytes)
//! |                                   |
//! +--------+--------+--------+--------+
//! |             Options               |  (4 bytes)
//! +--------+--------+--------+--------+
//! |           Payload ...             |  (Length bytes)
//! +--------+--------+--------+--------+
//! ```

pub mod cip;
pub mod codec;
pub mod codec_async;
pub mod config;
pub mod connection;
pub mod error;
pub mod header;
pub mod ids;
pub mod message;
pub mod path;
pub mod session;
pub mod tag;
pub mod transport;
pub mod types;

// Re-export commonly used types at the crate root
pub use config::{IdentityConfig, ServerConfig};
pub use error::{EipError, Result};
pub use header::{ConnectionId, EncapsulationHeader, SessionHandle, HEADER_SIZE};
pub use message::{CommonPacket, CpfItem, EncapsulationMessage};
pub use tag::{Tag, TagStore};
pub use transport::{EipClient, EipServer, ServerHandle};
pub use types::{CipStatus, Command, DataType, ServiceCode, PROTOCOL_VERSION};
