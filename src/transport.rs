//! A connection pool shared by the workers of one pool.
//!
//! Connections are HTTP/1.1 over plain TCP or TLS. Each one is opened in the
//! three timed steps an HTTP trace reports: resolve, dial (TCP, TLS and the
//! HTTP handshake), then exchange. Idle connections are kept per
//! `(scheme, host, port)` and handed out again when still ready.
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Instant};

use bytes::Bytes;
use http::{Uri, uri::Scheme};
use http_body_util::Full;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{
    error::{BuildError, RequestError},
    trace::{IoMarks, Trace, TracedIo},
};

trait Io: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PoolKey {
    https: bool,
    host: String,
    port: u16,
}

impl PoolKey {
    pub fn from_uri(uri: &Uri) -> Self {
        let https = uri.scheme() == Some(&Scheme::HTTPS);
        let host = uri.host().unwrap_or_default().trim_start_matches('[').trim_end_matches(']');
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });
        Self { https, host: host.to_string(), port }
    }
}

/// A checked-out HTTP/1.1 connection.
pub(crate) struct Connection {
    pub sender: SendRequest<Full<Bytes>>,
    pub marks: Arc<IoMarks>,
    key: PoolKey,
}

/// HTTP/1.1 client transport with a per-host idle connection pool.
///
/// Safe for concurrent use by every worker of a pool; the pool is the only
/// shared state and is guarded by a mutex held for map operations only.
pub struct Transport {
    idle: Mutex<HashMap<PoolKey, Vec<Connection>>>,
    max_idle_per_host: usize,
    #[cfg(feature = "tls")]
    tls: tokio_native_tls::TlsConnector,
}

impl Transport {
    /// Creates a transport keeping up to `max_idle_per_host` idle connections per host.
    pub fn new(max_idle_per_host: usize) -> Result<Self, BuildError> {
        let idle = Mutex::new(HashMap::new());
        cfg_if::cfg_if! {
            if #[cfg(feature = "tls")] {
                let tls = native_tls::TlsConnector::new().map_err(BuildError::Tls)?;
                Ok(Self { idle, max_idle_per_host, tls: tls.into() })
            } else {
                Ok(Self { idle, max_idle_per_host })
            }
        }
    }

    /// Returns a ready connection for `uri`, reusing an idle one when possible.
    pub(crate) async fn checkout(&self, uri: &Uri, trace: &mut Trace) -> Result<Connection, RequestError> {
        let key = PoolKey::from_uri(uri);
        if let Some(conn) = self.take_idle(&key) {
            trace.reused = true;
            return Ok(conn);
        }
        self.connect(key, trace).await
    }

    /// Hands a connection back to the pool after a complete exchange.
    pub(crate) fn checkin(&self, conn: Connection) {
        if conn.sender.is_closed() {
            return;
        }
        let mut idle = self.idle.lock();
        let conns = idle.entry(conn.key.clone()).or_default();
        if conns.len() < self.max_idle_per_host {
            conns.push(conn);
        }
    }

    fn take_idle(&self, key: &PoolKey) -> Option<Connection> {
        let mut idle = self.idle.lock();
        let conns = idle.get_mut(key)?;
        while let Some(conn) = conns.pop() {
            // a live connection may still be finishing the previous exchange;
            // the caller waits for readiness
            if !conn.sender.is_closed() {
                return Some(conn);
            }
        }
        None
    }

    async fn connect(&self, key: PoolKey, trace: &mut Trace) -> Result<Connection, RequestError> {
        trace.dns_start = Some(Instant::now());
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((key.host.as_str(), key.port))
            .await
            .map_err(|e| RequestError::Dns { host: key.host.clone(), message: e.to_string() })?
            .collect();
        trace.dns_done = Some(Instant::now());
        if addrs.is_empty() {
            return Err(RequestError::NoAddress { host: key.host });
        }

        trace.connect_start = Some(Instant::now());
        let tcp = dial(&addrs).await?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let stream: Box<dyn Io> = if key.https {
            self.tls_handshake(&key.host, tcp).await?
        } else {
            Box::new(tcp)
        };

        let marks = Arc::new(IoMarks::default());
        let (sender, conn) = http1::handshake(TokioIo::new(TracedIo::new(stream, marks.clone())))
            .await
            .map_err(|e| RequestError::Handshake(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "connection closed with error");
            }
        });
        trace.connect_done = Some(Instant::now());

        tracing::debug!(host = %key.host, port = key.port, https = key.https, "connection established");
        Ok(Connection { sender, marks, key })
    }

    #[cfg(feature = "tls")]
    async fn tls_handshake(&self, host: &str, tcp: TcpStream) -> Result<Box<dyn Io>, RequestError> {
        let stream = self.tls.connect(host, tcp).await.map_err(|e| RequestError::Tls(e.to_string()))?;
        Ok(Box::new(stream))
    }

    #[cfg(not(feature = "tls"))]
    async fn tls_handshake(&self, _host: &str, _tcp: TcpStream) -> Result<Box<dyn Io>, RequestError> {
        Err(RequestError::Tls("built without the `tls` feature".to_string()))
    }
}

/// Connects to the first address that accepts.
async fn dial(addrs: &[SocketAddr]) -> Result<TcpStream, RequestError> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(RequestError::Connect(last_err.map(|e| e.to_string()).unwrap_or_default()))
}
