//! Server lifecycle: bind, run the listener loops, shut down.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::oneshot;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::ids::{IdGenerator, RandomIds};
use crate::session::ServerContext;
use crate::tag::{TagObserver, TagStore};
use crate::transport::shutdown::{self, Completion, ShutdownTrigger};
use crate::transport::{tcp, udp};

/// An EtherNet/IP tag server.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use enip_rs::config::ServerConfig;
/// use enip_rs::tag::TagStore;
/// use enip_rs::transport::EipServer;
///
/// # async fn run() -> enip_rs::Result<()> {
/// let store = Arc::new(TagStore::new());
/// let handle = EipServer::new(ServerConfig::default(), store).start().await?;
/// println!("listening on {}", handle.tcp_addr());
/// handle.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct EipServer {
    config: ServerConfig,
    store: Arc<TagStore>,
    ids: Arc<dyn IdGenerator>,
}

impl EipServer {
    pub fn new(config: ServerConfig, store: Arc<TagStore>) -> Self {
        Self {
            config,
            store,
            ids: Arc::new(RandomIds),
        }
    }

    /// Draw session handles and connection IDs from `ids`.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Install the store's write/reset observer.
    pub fn with_observer(self, observer: Arc<dyn TagObserver>) -> Self {
        self.store.set_observer(observer);
        self
    }

    pub fn store(&self) -> &Arc<TagStore> {
        &self.store
    }

    /// Bind the listeners and spawn their loops.
    pub async fn start(self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(self.config.tcp_addr).await?;
        let tcp_addr = listener.local_addr()?;

        let udp_socket = if self.config.udp_enabled {
            Some(Arc::new(UdpSocket::bind(self.config.udp_addr).await?))
        } else {
            None
        };
        let udp_addr = match &udp_socket {
            Some(socket) => Some(socket.local_addr()?),
            None => None,
        };

        let ctx = Arc::new(ServerContext::new(self.config, self.store, self.ids, tcp_addr));
        let (trigger, signal) = shutdown::channel();
        let mut completions = Vec::with_capacity(2);

        let (done, rx) = Completion::pair();
        completions.push(rx);
        tokio::spawn(tcp::accept_loop(listener, ctx.clone(), signal.clone(), done));

        if let Some(socket) = udp_socket {
            let (done, rx) = Completion::pair();
            completions.push(rx);
            tokio::spawn(udp::receive_loop(socket, ctx, signal, done));
        }

        info!(tcp = %tcp_addr, udp = ?udp_addr, "Server started");
        Ok(ServerHandle {
            tcp_addr,
            udp_addr,
            trigger,
            completions,
        })
    }
}

impl std::fmt::Debug for EipServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EipServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Handle to a running server. Dropping it signals shutdown without waiting.
#[derive(Debug)]
pub struct ServerHandle {
    tcp_addr: SocketAddr,
    udp_addr: Option<SocketAddr>,
    trigger: ShutdownTrigger,
    completions: Vec<oneshot::Receiver<()>>,
}

impl ServerHandle {
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    /// Bound UDP address, `None` when the UDP listener is disabled.
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    pub fn is_shutdown(&self) -> bool {
        self.trigger.is_triggered()
    }

    /// Stop accepting work and wait for both listener loops to finish.
    pub async fn shutdown(mut self) {
        self.trigger.trigger();
        for rx in self.completions.drain(..) {
            // A dropped sender means the loop task already ended.
            let _ = rx.await;
        }
        info!(tcp = %self.tcp_addr, "Server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.trigger.trigger();
    }
}
