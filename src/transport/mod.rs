//! Async transport layer using Tokio.
//!
//! This module provides:
//! - [`EipServer`]: TCP session listener plus UDP discovery listener
//! - [`EipClient`]: explicit messaging client over TCP
//! - Cooperative shutdown shared by both listener loops
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use enip_rs::config::ServerConfig;
//! use enip_rs::tag::{Tag, TagStore};
//! use enip_rs::transport::{EipClient, EipServer};
//! use enip_rs::types::DataType;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(TagStore::new());
//!     store.add_tag(Tag::new("speed", DataType::Dint, &[])?);
//!     let server = EipServer::new(ServerConfig::loopback(), store).start().await?;
//!
//!     let mut client = EipClient::connect(server.tcp_addr()).await?;
//!     client.register().await?;
//!     let reply = client.read_tag("speed", 1).await?;
//!     println!("speed = {:?}", reply.data);
//!
//!     client.unregister().await?;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

mod client;
mod server;
pub mod shutdown;
mod tcp;
mod udp;

pub use client::{ClientConnection, EipClient, TagReply};
pub use server::{EipServer, ServerHandle};
pub use tcp::TcpConnection;
pub use udp::MAX_DATAGRAM_SIZE;
