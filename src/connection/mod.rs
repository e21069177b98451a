//! Session and connection state.
//!
//! This module provides:
//! - The encapsulation session state machine and per-session statistics
//! - Forward Open / Forward Close records
//! - The per-session table of connections granted by Forward Open
//!
//! # Example
//!
//! ```
//! use enip_rs::connection::{ConnectionManager, ForwardOpenRequest};
//! use enip_rs::ids::SequentialIds;
//!
//! let ids = SequentialIds::new(0x100);
//! let mut manager = ConnectionManager::new();
//!
//! let request = ForwardOpenRequest {
//!     to_connection_id: 0x2000_0001,
//!     to_params: 0x43F4,
//!     ..Default::default()
//! };
//! let reply = manager.open(&request, false, &ids);
//! assert_eq!(reply.ot_connection_id, 0x100);
//! assert_eq!(manager.len(), 1);
//! ```

mod manager;
mod state;

pub use manager::{
    Connection, ConnectionManager, ForwardCloseReply, ForwardCloseRequest, ForwardOpenReply,
    ForwardOpenRequest, MAX_CONNECTIONS, max_reply_size,
};
pub use state::{SessionState, SessionStats};
