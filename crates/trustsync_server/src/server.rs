//! Main sync server.

use crate::config::ServerConfig;
use crate::console::{OperatorConsole, TracingConsole};
use crate::error::{ServerError, ServerResult};
use crate::session::{Session, SessionContext};
use crate::transfer::TransferCoordinator;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use trustsync_protocol::FramedChannel;
use trustsync_security::SharedTrustStore;

/// The sync server.
///
/// Accepts TCP connections and runs each session on its own thread. All
/// sessions share one trust store and one upload slot.
///
/// # Example
///
/// ```no_run
/// use trustsync_server::{ServerConfig, SyncServer};
///
/// let config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), "/srv/share");
/// let handle = SyncServer::bind(config).unwrap().spawn().unwrap();
/// println!("listening on {}", handle.local_addr());
/// handle.shutdown().unwrap();
/// ```
pub struct SyncServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    context: Arc<SessionContext>,
    shutdown: Arc<AtomicBool>,
}

impl SyncServer {
    /// Binds the listener and loads the trust store, reporting to the log.
    pub fn bind(config: ServerConfig) -> ServerResult<Self> {
        Self::bind_with_console(config, Arc::new(TracingConsole))
    }

    /// Binds the listener with a custom operator console.
    pub fn bind_with_console(
        config: ServerConfig,
        console: Arc<dyn OperatorConsole>,
    ) -> ServerResult<Self> {
        let bind_addr = config.bind_addr;
        let context = Arc::new(SessionContext::new(config, console)?);
        let listener = TcpListener::bind(bind_addr)?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "listening");

        Ok(Self {
            listener,
            local_addr,
            context,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// State shared by all sessions.
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    /// Accepts connections until shut down.
    ///
    /// Pending trust records are flushed before returning.
    pub fn serve(&self) -> ServerResult<()> {
        for stream in self.listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => self.start_session(stream),
                Err(err) => tracing::warn!(error = %err, "accept failed"),
            }
        }
        tracing::info!("acceptance loop stopped");
        self.context.flush_trust_store()?;
        Ok(())
    }

    /// Runs the acceptance loop on a background thread.
    pub fn spawn(self) -> ServerResult<ServerHandle> {
        let local_addr = self.local_addr;
        let context = Arc::clone(&self.context);
        let shutdown = Arc::clone(&self.shutdown);
        let thread = thread::Builder::new()
            .name("trustsync-accept".into())
            .spawn(move || self.serve())?;

        Ok(ServerHandle {
            local_addr,
            context,
            shutdown,
            thread: Some(thread),
        })
    }

    fn start_session(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".into());
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %err, "cannot set TCP_NODELAY");
        }

        let context = Arc::clone(&self.context);
        let max_frame_len = context.config.max_frame_len;
        let name = format!("session-{peer}");
        let spawned = thread::Builder::new().name(name).spawn(move || {
            let channel = FramedChannel::new(stream).with_max_frame_len(max_frame_len);
            if let Err(err) = Session::new(channel, context, peer.clone()).run() {
                tracing::warn!(peer = %peer, error = %err, "session ended with error");
            }
        });
        if let Err(err) = spawned {
            tracing::error!(error = %err, "cannot start session thread");
        }
    }
}

/// Handle to a server running on a background thread.
///
/// Dropping the handle stops the server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    context: Arc<SessionContext>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<ServerResult<()>>>,
}

impl ServerHandle {
    /// The address the server listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The shared trust store.
    pub fn trust_store(&self) -> &SharedTrustStore {
        self.context.trust_store()
    }

    /// The upload slot.
    pub fn coordinator(&self) -> &TransferCoordinator {
        self.context.coordinator()
    }

    /// Stops accepting connections and waits for the acceptance loop.
    ///
    /// Sessions already running continue until their clients disconnect.
    pub fn shutdown(mut self) -> ServerResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> ServerResult<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the blocking accept.
        let _ = TcpStream::connect(wake_addr(self.local_addr));
        thread
            .join()
            .map_err(|_| ServerError::Io(io::Error::other("acceptance loop panicked")))?
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(error = %err, "server shutdown failed");
        }
    }
}

fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(v4) if v4.ip().is_unspecified() => {
            SocketAddr::from((Ipv4Addr::LOCALHOST, v4.port()))
        }
        SocketAddr::V6(v6) if v6.ip().is_unspecified() => {
            SocketAddr::from((Ipv6Addr::LOCALHOST, v6.port()))
        }
        other => other,
    }
}
