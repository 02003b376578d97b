use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use gatehouse_admin::SharedState;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Admitted connections waiting for the HTTP server to pick them up.
const ADMITTED_BACKLOG: usize = 128;

/// Pause after a failed `accept` so fd exhaustion does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A byte stream the HTTP server can drive: plain TCP or TLS, already
/// wrapped for outbound throttling.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

pub type BoxedConnection = Box<dyn Connection>;

/// The receiving end of one accept loop, served by `axum::serve`.
///
/// Connections only arrive here after the connection bucket admitted them
/// and, on TLS endpoints, after the handshake completed.
pub struct AdmittedListener {
    rx: mpsc::Receiver<(BoxedConnection, SocketAddr)>,
    local_addr: SocketAddr,
}

impl AdmittedListener {
    /// Bind `addr` and start its accept loop in the background. The loop
    /// stops when `shutdown` flips to `true`.
    pub async fn bind(
        addr: &str,
        tls: Option<TlsAcceptor>,
        state: SharedState,
        shutdown: watch::Receiver<bool>,
    ) -> io::Result<Self> {
        let tcp = TcpListener::bind(addr).await?;
        let local_addr = tcp.local_addr()?;
        let (tx, rx) = mpsc::channel(ADMITTED_BACKLOG);

        info!(addr = %local_addr, tls = tls.is_some(), "listening");
        tokio::spawn(accept_loop(tcp, tls, state, tx, shutdown));

        Ok(Self { rx, local_addr })
    }
}

impl axum::serve::Listener for AdmittedListener {
    type Io = BoxedConnection;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.rx.recv().await {
            Some(admitted) => admitted,
            // The accept loop has stopped; graceful shutdown ends the server.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

/// Peer address of an admitted connection, exposed to handlers as
/// `ConnectInfo<ClientAddr>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

impl Connected<IncomingStream<'_, AdmittedListener>> for ClientAddr {
    fn connect_info(stream: IncomingStream<'_, AdmittedListener>) -> Self {
        Self(*stream.remote_addr())
    }
}

async fn accept_loop(
    tcp: TcpListener,
    tls: Option<TlsAcceptor>,
    state: SharedState,
    tx: mpsc::Sender<(BoxedConnection, SocketAddr)>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = tcp.accept() => accepted,
            _ = shutdown.wait_for(|stop| *stop) => break,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };

        tokio::spawn(admit(stream, peer, tls.clone(), state.clone(), tx.clone()));
    }

    info!("stopped accepting connections");
}

/// Admission, then TLS, then throttling. A connection dropped anywhere along
/// the way is simply closed.
async fn admit(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    state: SharedState,
    tx: mpsc::Sender<(BoxedConnection, SocketAddr)>,
) {
    if !state.limiter.admit_connection().await {
        state.metrics.connections_denied.inc();
        debug!(peer = %peer, "connection denied by rate limit");
        return;
    }
    state.metrics.connections_admitted.inc();

    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
    }

    let io: BoxedConnection = match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => Box::new(state.limiter.wrap_outbound_stream(stream)),
            Err(e) => {
                debug!(peer = %peer, error = %e, "TLS handshake failed");
                return;
            }
        },
        None => Box::new(state.limiter.wrap_outbound_stream(stream)),
    };

    if tx.send((io, peer)).await.is_err() {
        debug!(peer = %peer, "server stopped before connection was served");
    }
}
