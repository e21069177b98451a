//! End-to-end tests against a real server over loopback.

use std::sync::Arc;
use std::time::Duration;

use enip_rs::cip::MessageRouterRequest;
use enip_rs::config::{IdentityConfig, ServerConfig};
use enip_rs::connection::ForwardOpenRequest;
use enip_rs::header::SessionHandle;
use enip_rs::ids::SequentialIds;
use enip_rs::message::{CommonPacket, EncapsulationMessage};
use enip_rs::tag::{MemberDef, Tag, TagKind, TagStore};
use enip_rs::transport::{EipClient, EipServer, MAX_DATAGRAM_SIZE, ServerHandle};
use enip_rs::types::{CipStatus, Command, DataType, ItemType, ServiceCode, class, encap_status};
use enip_rs::{EipError, path};
use tokio::net::UdpSocket;

fn store() -> Arc<TagStore> {
    let store = Arc::new(TagStore::new());
    let counts: Vec<u8> = (1..=4i32).flat_map(|v| v.to_le_bytes()).collect();
    store.add_tag(
        Tag::new("counts", DataType::Dint, &[4])
            .unwrap()
            .with_data(counts)
            .unwrap(),
    );
    store.add_tag(Tag::new("big", DataType::Lint, &[100]).unwrap());
    store
}

async fn start(store: Arc<TagStore>) -> ServerHandle {
    let config = ServerConfig::loopback()
        .with_identity(IdentityConfig::default().with_product_name("loopback plc"));
    EipServer::new(config, store)
        .with_id_generator(Arc::new(SequentialIds::new(0x100)))
        .start()
        .await
        .unwrap()
}

fn dints(data: &[u8]) -> Vec<i32> {
    data.chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[tokio::test]
async fn test_full_session() {
    let server = start(store()).await;
    let mut client = EipClient::connect(server.tcp_addr()).await.unwrap();

    let handle = client.register().await.unwrap();
    assert_eq!(handle, SessionHandle(0x100));

    let conn = client
        .forward_open(
            ForwardOpenRequest {
                to_connection_id: 0xBEEF,
                serial: 9,
                vendor_id: 0x1337,
                originator_serial: 42,
                ..Default::default()
            },
            false,
        )
        .await
        .unwrap();
    assert_eq!(conn.to_id.0, 0xBEEF);
    assert_eq!(conn.ot_id.0, 0x101);

    let reply = client.read_tag("counts", 2).await.unwrap();
    assert_eq!(reply.kind, TagKind::Atomic(DataType::Dint));
    assert_eq!(dints(&reply.data), vec![1, 2]);
    assert!(!reply.partial);

    let err = client
        .write_tag("counts", TagKind::Atomic(DataType::Dint), 2, &[0; 4])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EipError::Cip {
            service: 0x4D,
            status: CipStatus::PathSegmentError
        }
    ));

    client.forward_close().await.unwrap();
    assert!(client.cip_connection().is_none());

    // unconnected after the close
    let reply = client.read_tag("counts[3]", 1).await.unwrap();
    assert_eq!(dints(&reply.data), vec![4]);

    client.unregister().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_write_then_read_back() {
    let server = start(store()).await;
    let mut client = EipClient::connect(server.tcp_addr()).await.unwrap();
    client.register().await.unwrap();

    let values: Vec<u8> = [10i32, 20, 30, 40].iter().flat_map(|v| v.to_le_bytes()).collect();
    client
        .write_tag("counts", TagKind::Atomic(DataType::Dint), 4, &values)
        .await
        .unwrap();
    let reply = client.read_tag("counts", 4).await.unwrap();
    assert_eq!(dints(&reply.data), vec![10, 20, 30, 40]);

    let err = client.read_tag("missing", 1).await.unwrap_err();
    assert!(matches!(
        err,
        EipError::Cip {
            status: CipStatus::PathSegmentError,
            ..
        }
    ));

    server.shutdown().await;
}

#[tokio::test]
async fn test_large_read_is_partial() {
    let server = start(store()).await;
    let mut client = EipClient::connect(server.tcp_addr()).await.unwrap();
    client.register().await.unwrap();

    let reply = client.read_tag("big", 100).await.unwrap();
    assert!(reply.partial);
    assert_eq!(reply.data.len() % 8, 0);
    assert!(reply.data.len() < 800);

    server.shutdown().await;
}

#[tokio::test]
async fn test_identity_and_template_attributes() {
    let store = store();
    let handle = store
        .define_structure("POINT", &[MemberDef::new("x", "DINT"), MemberDef::new("y", "DINT")])
        .unwrap();
    let server = start(store).await;
    let mut client = EipClient::connect(server.tcp_addr()).await.unwrap();
    client.register().await.unwrap();

    let vendor = client
        .get_attribute_single(class::IDENTITY, 1, 1)
        .await
        .unwrap();
    assert_eq!(&vendor[..], &[0x01, 0x00]);

    let name = client
        .get_attribute_single(class::IDENTITY, 1, 7)
        .await
        .unwrap();
    assert_eq!(&name[1..], b"loopback plc");

    let members = client
        .get_attribute_single(class::TEMPLATE, handle as u32, 2)
        .await
        .unwrap();
    assert_eq!(&members[..], &[2, 0]);

    let definition = client.read_template(handle).await.unwrap();
    // two 8-byte member records, then "POINT;n\0x\0y\0"
    assert!(definition.len() >= 16);
    assert_eq!(&definition[16..21], b"POINT");

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_identity_over_tcp_and_udp() {
    let server = start(store()).await;

    let mut client = EipClient::connect(server.tcp_addr()).await.unwrap();
    let tcp_record = client.list_identity().await.unwrap();
    assert_eq!(&tcp_record[..2], &[1, 0]);
    let port = server.tcp_addr().port().to_be_bytes();
    assert_eq!(&tcp_record[4..6], &port);

    let services = client.list_services().await.unwrap();
    assert_eq!(&services.name[..14], b"Communications");

    let udp_addr = server.udp_addr().unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let request =
        EncapsulationMessage::request(Command::ListIdentity, SessionHandle(0), Vec::new());
    socket.send_to(&request.to_bytes(), udp_addr).await.unwrap();

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let reply = EncapsulationMessage::from_bytes(&buf[..len]).unwrap();
    assert_eq!(reply.header.status, encap_status::SUCCESS);
    let items = CommonPacket::decode_item_list(&reply.payload).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind(), Some(ItemType::ListIdentity));
    assert_eq!(items[0].data, tcp_record);

    server.shutdown().await;
}

#[tokio::test]
async fn test_send_before_register_keeps_connection() {
    let server = start(store()).await;
    let mut client = EipClient::connect(server.tcp_addr()).await.unwrap();

    let request = MessageRouterRequest::new(
        ServiceCode::READ_TAG,
        path::encode("counts").unwrap(),
        vec![1, 0],
    );
    let err = client.send_rr(&request).await.unwrap_err();
    assert!(matches!(
        err,
        EipError::Encapsulation(encap_status::INVALID_SESSION_HANDLE)
    ));

    client.register().await.unwrap();
    let reply = client.send_rr(&request).await.unwrap();
    assert_eq!(reply.status(), Some(CipStatus::Success));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients() {
    let server = start(store()).await;
    let addr = server.tcp_addr();

    let mut tasks = Vec::new();
    for i in 0..4i32 {
        tasks.push(tokio::spawn(async move {
            let mut client = EipClient::connect(addr).await.unwrap();
            client.register().await.unwrap();
            let tag = format!("counts[{i}]");
            for round in 0..20i32 {
                let value = (i + 1) * 100 + round;
                client
                    .write_tag(&tag, TagKind::Atomic(DataType::Dint), 1, &value.to_le_bytes())
                    .await
                    .unwrap();
                let reply = client.read_tag("counts", 4).await.unwrap();
                assert_eq!(reply.data.len(), 16);
            }
            client.unregister().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut client = EipClient::connect(addr).await.unwrap();
    client.register().await.unwrap();
    let reply = client.read_tag("counts", 4).await.unwrap();
    assert_eq!(dints(&reply.data), vec![119, 219, 319, 419]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let server = start(store()).await;
    let addr = server.tcp_addr();

    let mut client = EipClient::connect(addr)
        .await
        .unwrap()
        .with_timeout(Duration::from_secs(2));
    client.register().await.unwrap();

    server.shutdown().await;

    assert!(client.read_tag("counts", 1).await.is_err());
    assert!(EipClient::connect(addr).await.is_err());
}
