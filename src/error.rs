//! Error types for the load generation engine.
//!
//! - [`BuildError`]: an invalid work specification, raised before any worker starts.
//! - [`RequestError`]: the failure of a single attempt, carried inside a
//!   [`RequestResult`](crate::RequestResult) and never returned on its own.
//! - [`ConfigError`]: a configuration file that cannot be read or parsed.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Errors raised while constructing requests, worker pools or orchestrators.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The worker pool needs at least one worker.
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    /// A finite request budget must allow at least one request.
    #[error("request budget must be at least 1 when set")]
    ZeroRequests,

    /// The method is not a valid HTTP token.
    #[error("invalid method {method:?}")]
    InvalidMethod {
        /// The rejected method.
        method: String,
        /// The underlying parse error.
        #[source]
        source: http::method::InvalidMethod,
    },

    /// The URL could not be parsed.
    #[error("invalid url {url:?}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// The underlying parse error.
        #[source]
        source: http::uri::InvalidUri,
    },

    /// The URL has no host to connect to.
    #[error("url {url:?} has no host")]
    MissingHost {
        /// The rejected URL.
        url: String,
    },

    /// Only `http` and `https` URLs can be requested.
    #[error("unsupported scheme in url {url:?}")]
    UnsupportedScheme {
        /// The rejected URL.
        url: String,
    },

    /// A header line is not of the form `Name: value`.
    #[error("bad header {header:?}")]
    BadHeader {
        /// The rejected header line.
        header: String,
    },

    /// A header name is not a valid HTTP token.
    #[error("invalid header name {name:?}")]
    InvalidHeaderName {
        /// The rejected name.
        name: String,
    },

    /// A header value contains forbidden characters.
    #[error("invalid value for header {name:?}")]
    InvalidHeaderValue {
        /// The header whose value was rejected.
        name: String,
    },

    /// The requested rate is not a usable requests-per-second value.
    #[error("invalid rate {qps}: must be a finite, non-negative number of requests per second")]
    InvalidRate {
        /// The rejected rate.
        qps: f64,
    },

    /// A rate was requested but the crate was built without rate limiting.
    #[error("rate limiting requires the `rate_limit` feature")]
    RateLimitDisabled,

    /// The TLS connector could not be created.
    #[cfg(feature = "tls")]
    #[error("failed to initialise tls")]
    Tls(#[source] native_tls::Error),

    /// The request body could not be compressed.
    #[error("failed to compress request body")]
    Compress(#[source] std::io::Error),

    /// No target produced a runnable worker pool.
    #[error("no work to do")]
    NoWork,
}

/// The failure of a single request attempt.
///
/// Messages of the underlying errors are captured as strings so a result can be
/// cloned and serialized freely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Resolving the host failed.
    #[error("dns lookup for {host} failed: {message}")]
    Dns {
        /// The host being resolved.
        host: String,
        /// The resolver error.
        message: String,
    },

    /// The host resolved to no addresses.
    #[error("no addresses found for {host}")]
    NoAddress {
        /// The host being resolved.
        host: String,
    },

    /// No resolved address accepted a TCP connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The TLS handshake failed.
    #[error("tls handshake failed: {0}")]
    Tls(String),

    /// The HTTP/1.1 handshake failed.
    #[error("http handshake failed: {0}")]
    Handshake(String),

    /// Sending the request or receiving the response head failed.
    #[error("request failed: {0}")]
    Send(String),

    /// Reading the response body failed.
    #[error("reading response body failed: {0}")]
    Body(String),

    /// The attempt did not finish within the per-request timeout.
    #[error("request timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    /// A redirect pointed at a location that cannot be requested.
    #[error("invalid redirect location {0:?}")]
    BadRedirect(String),

    /// The redirect chain exceeded the hop limit.
    #[error("stopped after {0} redirects")]
    TooManyRedirects(usize),
}

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}")]
    Read {
        /// The configuration path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("failed to parse config file {path}")]
    Parse {
        /// The configuration path.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}
