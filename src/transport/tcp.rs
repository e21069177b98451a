//! Async TCP transport for encapsulation sessions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec_async::{read_frame_async, write_frame_async};
use crate::error::{EipError, Result};
use crate::message::EncapsulationMessage;
use crate::session::{ServerContext, Session, Transport};
use crate::transport::shutdown::{Completion, ShutdownSignal};

/// An async TCP connection wrapper with encapsulation framing.
pub struct TcpConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer_addr: SocketAddr,
}

impl TcpConnection {
    /// Create a new connection from a TcpStream.
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            peer_addr,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read one frame.
    pub async fn read_message(&mut self) -> Result<EncapsulationMessage> {
        read_frame_async(&mut self.reader).await
    }

    /// Wait until the first byte of the next frame is buffered.
    ///
    /// Nothing is consumed, so the wait can be abandoned without losing data.
    pub async fn wait_readable(&mut self, limit: Duration) -> Result<()> {
        let buffered = timeout(limit, self.reader.fill_buf())
            .await
            .map_err(|_| EipError::Timeout)??;
        if buffered.is_empty() {
            return Err(EipError::ConnectionClosed);
        }
        Ok(())
    }

    /// Read one frame, failing with [`EipError::Timeout`] after `limit`.
    pub async fn read_message_timeout(&mut self, limit: Duration) -> Result<EncapsulationMessage> {
        timeout(limit, self.read_message())
            .await
            .map_err(|_| EipError::Timeout)?
    }

    /// Write one frame and flush it.
    pub async fn write_message(&mut self, message: &EncapsulationMessage) -> Result<()> {
        write_frame_async(&mut self.writer, message).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn write_message_timeout(
        &mut self,
        message: &EncapsulationMessage,
        limit: Duration,
    ) -> Result<()> {
        timeout(limit, self.write_message(message))
            .await
            .map_err(|_| EipError::Timeout)?
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Accept connections until shutdown, one task per connection.
///
/// `done` is completed as soon as the listener is closed. Connection tasks
/// finish the request they are reading and then close on their own.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    mut shutdown: ShutdownSignal,
    done: Completion,
) {
    let local = listener.local_addr().ok();
    info!(addr = ?local, "TCP listener started");

    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => match TcpConnection::new(stream) {
                    Ok(conn) => {
                        debug!(%peer, "Accepted connection");
                        tokio::spawn(serve_connection(conn, ctx.clone(), shutdown.clone()));
                    }
                    Err(e) => warn!(%peer, error = %e, "Failed to set up connection"),
                },
                Err(e) => warn!(error = %e, "Accept failed"),
            },
        }
    }

    drop(listener);
    info!(addr = ?local, "TCP listener stopped");
    done.complete();
}

/// Run one session until the peer leaves, a frame fails or shutdown.
pub(crate) async fn serve_connection(
    mut conn: TcpConnection,
    ctx: Arc<ServerContext>,
    mut shutdown: ShutdownSignal,
) {
    let peer = conn.peer_addr();
    let write_timeout = ctx.config.session_timeout;
    let mut session = Session::new(ctx, Transport::Tcp);

    while !shutdown.is_triggered() {
        let read_timeout = session.read_timeout();
        let ready = tokio::select! {
            biased;
            _ = shutdown.triggered() => break,
            ready = conn.wait_readable(read_timeout) => ready,
        };
        // once a frame has started it is read to the end
        let request = match ready {
            Ok(()) => conn.read_message_timeout(read_timeout).await,
            Err(e) => Err(e),
        };

        let request = match request {
            Ok(request) => request,
            Err(EipError::ConnectionClosed) => {
                debug!(%peer, "Peer closed connection");
                break;
            }
            Err(EipError::Timeout) => {
                debug!(%peer, "Connection idle, closing");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "Failed to read frame");
                break;
            }
        };

        match session.handle_message(&request) {
            Ok(Some(reply)) => {
                if let Err(e) = conn.write_message_timeout(&reply, write_timeout).await {
                    warn!(%peer, error = %e, "Failed to write reply");
                    break;
                }
            }
            Ok(None) if session.state().is_closed() => break,
            Ok(None) => {}
            Err(e) => {
                warn!(%peer, error = %e, "Rejected frame");
                break;
            }
        }
    }

    session.close();
    let _ = conn.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Record, RegisterSessionData};
    use crate::config::ServerConfig;
    use crate::header::SessionHandle;
    use crate::ids::SequentialIds;
    use crate::tag::TagStore;
    use crate::transport::shutdown;
    use crate::types::Command;

    async fn spawn_server() -> (SocketAddr, shutdown::ShutdownTrigger, tokio::sync::oneshot::Receiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = Arc::new(ServerContext::new(
            ServerConfig::loopback(),
            Arc::new(TagStore::new()),
            Arc::new(SequentialIds::new(7)),
            addr,
        ));
        let (trigger, signal) = shutdown::channel();
        let (done, rx) = Completion::pair();
        tokio::spawn(accept_loop(listener, ctx, signal, done));
        (addr, trigger, rx)
    }

    #[tokio::test]
    async fn test_register_over_tcp() {
        let (addr, trigger, done) = spawn_server().await;

        let mut conn = TcpConnection::new(TcpStream::connect(addr).await.unwrap()).unwrap();
        let request = EncapsulationMessage::request(
            Command::RegisterSession,
            SessionHandle(0),
            RegisterSessionData::default().to_vec(),
        );
        conn.write_message(&request).await.unwrap();
        let reply = conn.read_message().await.unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.header.session_handle, SessionHandle(7));

        trigger.trigger();
        done.await.unwrap();
    }

    #[tokio::test]
    async fn test_unregister_closes_connection() {
        let (addr, _trigger, _done) = spawn_server().await;

        let mut conn = TcpConnection::new(TcpStream::connect(addr).await.unwrap()).unwrap();
        let request =
            EncapsulationMessage::request(Command::UnregisterSession, SessionHandle(0), Vec::new());
        conn.write_message(&request).await.unwrap();

        let result = conn.read_message_timeout(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(EipError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_shutdown_answers_request_already_started() {
        let (addr, trigger, done) = spawn_server().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let frame =
            EncapsulationMessage::request(Command::ListServices, SessionHandle(0), Vec::new())
                .to_bytes();
        stream.write_all(&frame[..12]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        trigger.trigger();
        // the listener stops without waiting for the open connection
        tokio::time::timeout(Duration::from_secs(2), done)
            .await
            .unwrap()
            .unwrap();

        stream.write_all(&frame[12..]).await.unwrap();
        let mut conn = TcpConnection::new(stream).unwrap();
        let reply = conn.read_message_timeout(Duration::from_secs(5)).await.unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.header.command, Command::ListServices as u16);

        let result = conn.read_message_timeout(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(EipError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connection() {
        let (addr, trigger, done) = spawn_server().await;

        let mut conn = TcpConnection::new(TcpStream::connect(addr).await.unwrap()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
        done.await.unwrap();

        let result = conn.read_message_timeout(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(EipError::ConnectionClosed)));
    }
}
