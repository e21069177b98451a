//! Async UDP transport: stateless List* discovery replies.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::message::EncapsulationMessage;
use crate::session::{ServerContext, Session, Transport};
use crate::transport::shutdown::{Completion, ShutdownSignal};

/// Receive buffer size for one datagram.
pub const MAX_DATAGRAM_SIZE: usize = 0x8000;

/// Receive datagrams until shutdown, one task per datagram.
pub(crate) async fn receive_loop(
    socket: Arc<UdpSocket>,
    ctx: Arc<ServerContext>,
    mut shutdown: ShutdownSignal,
    done: Completion,
) {
    let local = socket.local_addr().ok();
    info!(addr = ?local, "UDP listener started");

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    let datagram = buf[..len].to_vec();
                    tokio::spawn(handle_datagram(socket.clone(), ctx.clone(), datagram, peer));
                }
                Err(e) => warn!(error = %e, "UDP receive failed"),
            },
        }
    }

    info!(addr = ?local, "UDP listener stopped");
    done.complete();
}

/// Answer one datagram; anything that fails to decode is dropped.
async fn handle_datagram(
    socket: Arc<UdpSocket>,
    ctx: Arc<ServerContext>,
    datagram: Vec<u8>,
    peer: SocketAddr,
) {
    let request = match EncapsulationMessage::from_bytes(&datagram) {
        Ok(request) => request,
        Err(e) => {
            debug!(%peer, error = %e, "Dropping malformed datagram");
            return;
        }
    };

    let write_timeout = ctx.config.udp_write_timeout;
    let mut session = Session::new(ctx, Transport::Udp);
    let reply = match session.handle_message(&request) {
        Ok(Some(reply)) => reply,
        Ok(None) => return,
        Err(e) => {
            debug!(%peer, error = %e, "Dropping datagram");
            return;
        }
    };

    match timeout(write_timeout, socket.send_to(&reply.to_bytes(), peer)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(%peer, error = %e, "UDP reply failed"),
        Err(_) => warn!(%peer, "UDP reply timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::header::SessionHandle;
    use crate::ids::SequentialIds;
    use crate::message::CommonPacket;
    use crate::tag::TagStore;
    use crate::transport::shutdown;
    use crate::types::{Command, ItemType, encap_status};
    use std::time::Duration;

    async fn spawn_server() -> (SocketAddr, shutdown::ShutdownTrigger, tokio::sync::oneshot::Receiver<()>) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let ctx = Arc::new(ServerContext::new(
            ServerConfig::loopback(),
            Arc::new(TagStore::new()),
            Arc::new(SequentialIds::default()),
            addr,
        ));
        let (trigger, signal) = shutdown::channel();
        let (done, rx) = Completion::pair();
        tokio::spawn(receive_loop(socket, ctx, signal, done));
        (addr, trigger, rx)
    }

    async fn exchange(addr: SocketAddr, request: &EncapsulationMessage) -> EncapsulationMessage {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&request.to_bytes(), addr).await.unwrap();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        EncapsulationMessage::from_bytes(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn test_list_identity_over_udp() {
        let (addr, trigger, done) = spawn_server().await;

        let request = EncapsulationMessage::request(Command::ListIdentity, SessionHandle(0), Vec::new());
        let reply = exchange(addr, &request).await;
        assert!(reply.is_ok());
        let items = CommonPacket::decode_item_list(&reply.payload).unwrap();
        assert_eq!(items[0].kind(), Some(ItemType::ListIdentity));

        trigger.trigger();
        done.await.unwrap();
    }

    #[tokio::test]
    async fn test_udp_echoes_other_commands() {
        let (addr, _trigger, _done) = spawn_server().await;

        let request = EncapsulationMessage::request(Command::SendRRData, SessionHandle(3), vec![1, 2]);
        let reply = exchange(addr, &request).await;
        assert_eq!(reply.header.status, encap_status::INVALID_COMMAND);
        assert_eq!(&reply.payload[..], &[1, 2]);
    }
}
