//! Transport capability: resolve, connect, secure, and hand the socket to hyper.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use http::{Request, Response};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, lookup_host};
use tokio::task::AbortHandle;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::body::ReqBody;
use crate::error::{Error, TransportErrorKind};
use crate::options::{Protocol, RequestOptions};
use crate::socket::{ActivityStream, SocketState};
use crate::tls::default_client_config;
use crate::util::classify_connect_error;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Receives lifecycle events while a fresh socket is being established.
///
/// The observer is borrowed only for the duration of [`open`]; once that
/// future finishes or is dropped no event can reach it.
pub(crate) trait ConnectObserver {
    fn on_lookup(&mut self) {}

    fn on_connect(&mut self) {}
}

impl<T> ConnectObserver for Option<T>
where
    T: ConnectObserver,
{
    fn on_lookup(&mut self) {
        if let Some(observer) = self {
            observer.on_lookup();
        }
    }

    fn on_connect(&mut self) {
        if let Some(observer) = self {
            observer.on_connect();
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Target {
    pub(crate) protocol: Protocol,
    pub(crate) host: String,
    pub(crate) port: u16,
}

impl Target {
    pub(crate) fn from_options(options: &RequestOptions) -> Self {
        Self {
            protocol: options.protocol(),
            host: options.host().to_owned(),
            port: options.port(),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

enum TransportStream {
    Plain(ActivityStream<TcpStream>),
    Tls(Box<TlsStream<ActivityStream<TcpStream>>>),
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Self::Plain(stream) => stream.is_write_vectored(),
            Self::Tls(stream) => stream.is_write_vectored(),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write_vectored(cx, bufs),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write_vectored(cx, bufs),
        }
    }
}

/// An established HTTP/1 connection.
///
/// Owns the spawned connection driver; dropping the value closes the socket.
pub(crate) struct Connection {
    id: u64,
    target: Target,
    socket: Arc<SocketState>,
    sender: http1::SendRequest<ReqBody>,
    driver: AbortHandle,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

impl Connection {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn target(&self) -> &Target {
        &self.target
    }

    pub(crate) fn socket(&self) -> &Arc<SocketState> {
        &self.socket
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub(crate) fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.sender.is_closed() && !self.driver.is_finished()
    }

    pub(crate) async fn ready(&mut self) -> Result<(), hyper::Error> {
        self.sender.ready().await
    }

    pub(crate) async fn send(
        &mut self,
        request: Request<ReqBody>,
    ) -> Result<Response<Incoming>, hyper::Error> {
        self.sender.send_request(request).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.driver.abort();
        debug!(connection_id = self.id, target = %self.target, "connection closed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Connection")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

async fn connect_first(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                debug!(%addr, error = %error, "tcp connect attempt failed");
                last_error = Some(error);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to connect to")
    }))
}

/// Opens a fresh connection to `target` over the already-created `socket`.
pub(crate) async fn open<O>(
    target: &Target,
    socket: Arc<SocketState>,
    tls_config: Option<Arc<ClientConfig>>,
    observer: &mut O,
) -> Result<Connection, Error>
where
    O: ConnectObserver,
{
    let addrs = lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(|source| Error::transport(TransportErrorKind::Dns, source))?
        .collect::<Vec<_>>();
    if addrs.is_empty() {
        return Err(Error::transport(
            TransportErrorKind::Dns,
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {}", target.host),
            ),
        ));
    }
    observer.on_lookup();

    let tcp = connect_first(&addrs)
        .await
        .map_err(|source| Error::transport(classify_connect_error(&source), source))?;
    if let Err(error) = tcp.set_nodelay(true) {
        debug!(error = %error, "failed to set TCP_NODELAY");
    }
    let local_addr = tcp.local_addr().ok();
    let remote_addr = tcp.peer_addr().ok();
    let stream = ActivityStream::new(tcp, Arc::clone(&socket));

    let stream = match target.protocol {
        Protocol::Http => TransportStream::Plain(stream),
        Protocol::Https => {
            let config = match tls_config {
                Some(config) => config,
                None => default_client_config()?,
            };
            let server_name = ServerName::try_from(target.host.clone())
                .map_err(|source| Error::transport(TransportErrorKind::Tls, source))?;
            let tls = TlsConnector::from(config)
                .connect(server_name, stream)
                .await
                .map_err(|source| Error::transport(TransportErrorKind::Tls, source))?;
            TransportStream::Tls(Box::new(tls))
        }
    };
    observer.on_connect();

    let (sender, connection) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|source| Error::transport(TransportErrorKind::Handshake, source))?;
    let id = CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let driver = tokio::spawn(async move {
        if let Err(error) = connection.await {
            debug!(connection_id = id, error = %error, "connection driver stopped");
        }
    })
    .abort_handle();

    debug!(connection_id = id, %target, ?remote_addr, "connection established");
    Ok(Connection {
        id,
        target: target.clone(),
        socket,
        sender,
        driver,
        local_addr,
        remote_addr,
    })
}
