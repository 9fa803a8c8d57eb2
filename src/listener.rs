//! Connection listener used by [`Server`](crate::Server).
//!
//! Accepts plain TCP or, in `https` mode, terminates TLS with rustls. Every
//! accepted connection is wrapped in a [`Connection`] that
//!
//! - fails with `TimedOut` after `idle_timeout` without any bytes moving
//! - fails with `ConnectionAborted` once the listener's close token is
//!   cancelled, which is how shutdown drops connections that outlive the
//!   grace period
//!
//! TLS handshakes run in their own tasks, bounded by the read timeout, so a
//! slow client cannot stall the accept loop.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, SupportedProtocolVersion};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, error, info};

use crate::config::{Config, ServerMode, TlsVersion};
use crate::error::{AppError, AppResult};

/// Accepted connections waiting for the server to pick them up.
const ACCEPT_BACKLOG: usize = 128;

/// Per-connection settings derived from [`Config`].
#[derive(Clone, Default)]
pub struct ListenerOptions {
    /// TLS acceptor; `None` serves plain HTTP.
    pub tls: Option<TlsAcceptor>,
    /// Deadline for completing the TLS handshake. Zero disables it.
    pub handshake_timeout: Duration,
    /// Close a connection after this long without traffic. Zero disables it.
    pub idle_timeout: Duration,
}

impl ListenerOptions {
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the TLS material cannot be loaded.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let tls = match config.mode {
            ServerMode::Http => None,
            ServerMode::Https => Some(tls_acceptor(config)?),
        };

        Ok(Self {
            tls,
            handshake_timeout: config.read_timeout,
            idle_timeout: config.idle_timeout,
        })
    }
}

/// Build a TLS acceptor from the `SERVER_CERTIFICATE_*` files.
///
/// ALPN offers `h2` and `http/1.1`. When a CA file is configured, clients
/// must present a certificate that chains to it.
///
/// # Errors
///
/// Returns `AppError::ConfigError` if a file is unreadable, holds no usable
/// PEM item, or the key does not match the certificate.
pub fn tls_acceptor(config: &Config) -> AppResult<TlsAcceptor> {
    let (Some(cert_file), Some(key_file)) = (&config.tls_cert_file, &config.tls_key_file) else {
        return Err(AppError::ConfigError(
            "https mode needs SERVER_CERTIFICATE_CERT_FILE and SERVER_CERTIFICATE_KEY_FILE"
                .to_string(),
        ));
    };

    let certs = load_certs(cert_file)?;
    let key = PrivateKeyDer::from_pem_file(key_file).map_err(|e| {
        AppError::ConfigError(format!(
            "failed to read private key from {}: {e:?}",
            key_file.display()
        ))
    })?;

    let versions: &[&'static SupportedProtocolVersion] = match config.tls_min_version {
        TlsVersion::Tls12 => &[&rustls::version::TLS13, &rustls::version::TLS12],
        TlsVersion::Tls13 => &[&rustls::version::TLS13],
    };

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(versions)
        .map_err(|e| AppError::ConfigError(format!("invalid TLS settings: {e}")))?;

    let builder = match &config.tls_ca_file {
        Some(ca_file) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_file)? {
                roots.add(cert).map_err(|e| {
                    AppError::ConfigError(format!(
                        "invalid CA certificate in {}: {e}",
                        ca_file.display()
                    ))
                })?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .map_err(|e| AppError::ConfigError(format!("invalid client CA bundle: {e}")))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut server_config = builder
        .with_single_cert(certs, key)
        .map_err(|e| AppError::ConfigError(format!("invalid TLS certificate or key: {e}")))?;
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &Path) -> AppResult<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|items| items.collect::<Result<Vec<_>, _>>())
        .map_err(|e| {
            AppError::ConfigError(format!(
                "failed to read certificates from {}: {e:?}",
                path.display()
            ))
        })?;

    if certs.is_empty() {
        return Err(AppError::ConfigError(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

// =============================================================================
// Listener
// =============================================================================

/// [`axum::serve::Listener`] over a bound TCP socket.
///
/// Dropping the listener stops accepting. Connections already handed out
/// keep running until they finish or the close token is cancelled.
pub struct ServerListener {
    local_addr: SocketAddr,
    incoming: mpsc::Receiver<(Connection, SocketAddr)>,
    accept_task: JoinHandle<()>,
}

impl ServerListener {
    /// Start accepting on `listener`. Cancelling `close` fails every
    /// connection accepted through this listener.
    pub fn new(
        listener: TcpListener,
        options: ListenerOptions,
        close: CancellationToken,
    ) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (tx, incoming) = mpsc::channel(ACCEPT_BACKLOG);
        let accept_task = tokio::spawn(accept_loop(listener, options, close, tx));

        Ok(Self {
            local_addr,
            incoming,
            accept_task,
        })
    }
}

impl Drop for ServerListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl axum::serve::Listener for ServerListener {
    type Io = Connection;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.incoming.recv().await {
            Some(accepted) => accepted,
            // The accept loop only exits once nobody is listening.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    options: ListenerOptions,
    close: CancellationToken,
    tx: mpsc::Sender<(Connection, SocketAddr)>,
) {
    let tls = options.tls.is_some();
    info!(tls, "Accepting connections");

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) if is_connection_error(&e) => continue,
                Err(e) => {
                    // Typically fd exhaustion; back off instead of spinning.
                    error!("Accept error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            },
            () = tx.closed() => return,
        };

        let Some(acceptor) = options.tls.clone() else {
            let conn = Connection::new(Stream::Plain(stream), options.idle_timeout, &close);
            if tx.send((conn, peer)).await.is_err() {
                return;
            }
            continue;
        };

        let tx = tx.clone();
        let close = close.clone();
        let handshake_timeout = options.handshake_timeout;
        let idle_timeout = options.idle_timeout;
        tokio::spawn(async move {
            let handshake = acceptor.accept(stream);
            let result = if handshake_timeout.is_zero() {
                handshake.await
            } else {
                match tokio::time::timeout(handshake_timeout, handshake).await {
                    Ok(result) => result,
                    Err(_) => {
                        debug!(%peer, "TLS handshake timed out");
                        return;
                    }
                }
            };

            match result {
                Ok(tls) => {
                    let conn = Connection::new(Stream::Tls(Box::new(tls)), idle_timeout, &close);
                    let _ = tx.send((conn, peer)).await;
                }
                Err(e) => debug!(%peer, "TLS handshake failed: {e}"),
            }
        });
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

// =============================================================================
// Connection
// =============================================================================

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// An accepted connection with idle and shutdown enforcement.
///
/// The idle timer is reset whenever a read or write makes progress. It is
/// only consulted while the connection is waiting on the socket, so a
/// handler that runs longer than `idle_timeout` without I/O also closes the
/// connection; keep `SERVER_WRITE_TIMEOUT` below `SERVER_IDLE_TIMEOUT`.
pub struct Connection {
    stream: Stream,
    idle: Option<(Duration, Pin<Box<Sleep>>)>,
    close: CancellationToken,
    closed: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl Connection {
    fn new(stream: Stream, idle_timeout: Duration, close: &CancellationToken) -> Self {
        let idle = (!idle_timeout.is_zero())
            .then(|| (idle_timeout, Box::pin(tokio::time::sleep(idle_timeout))));

        Self {
            stream,
            idle,
            close: close.clone(),
            closed: Box::pin(close.clone().cancelled_owned()),
        }
    }

    /// Error out if shutdown gave up on this connection. Registers the
    /// waker otherwise, so a parked connection is woken on close.
    fn poll_closed(&mut self, cx: &mut Context<'_>) -> Option<io::Error> {
        if self.close.is_cancelled() || self.closed.as_mut().poll(cx).is_ready() {
            return Some(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection closed by server shutdown",
            ));
        }
        None
    }

    fn settle<T>(&mut self, cx: &mut Context<'_>, poll: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
        let Some((timeout, timer)) = &mut self.idle else {
            return poll;
        };

        match poll {
            Poll::Ready(result) => {
                timer.as_mut().reset(Instant::now() + *timeout);
                Poll::Ready(result)
            }
            Poll::Pending if timer.as_mut().poll(cx).is_ready() => Poll::Ready(Err(
                io::Error::new(io::ErrorKind::TimedOut, "connection idle timeout"),
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(e) = this.poll_closed(cx) {
            return Poll::Ready(Err(e));
        }

        let poll = match &mut this.stream {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        };
        this.settle(cx, poll)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Some(e) = this.poll_closed(cx) {
            return Poll::Ready(Err(e));
        }

        let poll = match &mut this.stream {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        };
        this.settle(cx, poll)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(e) = this.poll_closed(cx) {
            return Poll::Ready(Err(e));
        }

        let poll = match &mut this.stream {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        };
        this.settle(cx, poll)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().stream {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
