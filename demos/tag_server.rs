//! Tag server example.
//!
//! Serves a handful of tags, including a structure, and logs every write
//! through the store observer.
//!
//! Run with: RUST_LOG=debug cargo run --example tag_server
//! Then browse it with any EtherNet/IP client on port 44818.

use std::sync::Arc;

use enip_rs::config::{IdentityConfig, ServerConfig};
use enip_rs::tag::{Tag, TagStore, TagValue};
use enip_rs::transport::EipServer;
use enip_rs::types::{CipStatus, DataType, ServiceCode};
use tracing_subscriber::EnvFilter;

const POSITION: &str = "DATATYPE POSITION (FamilyType := NoFamily)
    DINT x;
    DINT y;
    BOOL valid;
END_DATATYPE";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let store = Arc::new(TagStore::new());
    store.add_tag(Tag::new("counts", DataType::Dint, &[10])?);
    store.add_value("speed", TagValue::Real(12.5))?;
    store.add_value("message", TagValue::String("hello".into()))?;
    store.define_structure_from_text(POSITION)?;
    store.create_tag("POSITION[4]", "robots")?;
    store.create_tag("INT[4,4]", "Program:Main.grid")?;

    let config = ServerConfig::default()
        .with_identity(IdentityConfig::default().with_product_name("enip-rs demo"));

    let server = EipServer::new(config, store)
        .with_observer(Arc::new(|service: ServiceCode, status: CipStatus, tag: Option<&Tag>| {
            if service == ServiceCode::WRITE_TAG && status.is_ok() {
                if let Some(tag) = tag {
                    println!("{} <- {} bytes", tag.name(), tag.data().len());
                }
            }
        }))
        .start()
        .await?;

    println!("Serving tags on {}", server.tcp_addr());
    if let Some(udp) = server.udp_addr() {
        println!("Answering discovery on {udp}");
    }

    tokio::signal::ctrl_c().await?;
    println!("Shutting down...");
    server.shutdown().await;
    Ok(())
}
