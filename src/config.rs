//! JSON configuration describing a whole run.
//!
//! Every base URL is combined with every target. Each combination becomes one
//! independent [`WorkSpec`]:
//!
//! ```json
//! {
//!   "base_urls": ["http://localhost:8080"],
//!   "headers": ["Authorization: Bearer token"],
//!   "targets": [
//!     { "url": "/health", "concurrent": 4 },
//!     { "method": "POST", "url": "/ingest", "body": "{}", "qps": 50 }
//!   ],
//!   "max_requests": 1000,
//!   "run_timeout": "30s",
//!   "request_timeout": "2s"
//! }
//! ```
use std::{
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use flate2::{Compression, write::GzEncoder};
use serde::{Deserialize, Deserializer};

use crate::{
    error::{BuildError, ConfigError},
    pool::{DEFAULT_TIMEOUT, WorkSpec},
    template::{RequestTemplate, TransportOptions},
};

/// Deadline of the whole run when none is configured.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10);

/// The configuration of a run.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// URL prefixes, each combined with every target.
    pub base_urls: Vec<String>,
    /// The requests issued against every base URL.
    pub targets: Vec<Target>,
    /// `Name: value` headers sent with every target, before the target's own.
    pub headers: Vec<String>,
    /// Request budget of every worker pool; absent means unbounded.
    pub max_requests: Option<u64>,
    /// Deadline of the whole run; `null` means none.
    #[serde(deserialize_with = "optional_duration")]
    pub run_timeout: Option<Duration>,
    /// Per-attempt timeout.
    #[serde(deserialize_with = "duration")]
    pub request_timeout: Duration,
    /// Ask for gzip responses and gzip request bodies.
    pub compression: bool,
    /// Reuse connections between attempts.
    pub keepalives: bool,
    /// Follow redirects.
    pub redirects: bool,
}

/// One request issued against every base URL.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Target {
    /// HTTP method.
    pub method: String,
    /// Appended verbatim to the base URL.
    pub url: String,
    /// `Name: value` headers of this target.
    pub headers: Vec<String>,
    /// Request body.
    pub body: String,
    /// Number of workers.
    pub concurrent: u32,
    /// Aggregate requests per second; `0` is unlimited.
    pub qps: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_urls: Vec::new(),
            targets: Vec::new(),
            headers: Vec::new(),
            max_requests: None,
            run_timeout: Some(DEFAULT_RUN_TIMEOUT),
            request_timeout: DEFAULT_TIMEOUT,
            compression: true,
            keepalives: true,
            redirects: true,
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            url: String::new(),
            headers: Vec::new(),
            body: String::new(),
            concurrent: 1,
            qps: 0.0,
        }
    }
}

/// A labelled, independently fallible worker pool specification.
pub type LabelledSpec = (String, Result<WorkSpec, BuildError>);

impl Config {
    /// Reads and parses the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read { path: PathBuf::from(path), source })?;
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse { path: PathBuf::from(path), source })
    }

    /// Builds one worker pool specification per base URL and target, labelled
    /// with `METHOD url`.
    ///
    /// A target that cannot be built only fails its own entry. An empty cross
    /// product is [`BuildError::NoWork`].
    pub fn work_specs(&self) -> Result<Vec<LabelledSpec>, BuildError> {
        let specs: Vec<_> = self
            .base_urls
            .iter()
            .flat_map(|base| self.targets.iter().map(move |target| (base, target)))
            .map(|(base, target)| {
                let label = format!("{} {base}{}", target.method, target.url);
                (label, self.work_spec(base, target))
            })
            .collect();
        if specs.is_empty() {
            return Err(BuildError::NoWork);
        }
        Ok(specs)
    }

    fn work_spec(&self, base: &str, target: &Target) -> Result<WorkSpec, BuildError> {
        let url = format!("{base}{}", target.url);
        let mut template = RequestTemplate::new(&target.method, &url)?.with_options(TransportOptions {
            disable_compression: !self.compression,
            disable_keepalive: !self.keepalives,
            disable_redirects: !self.redirects,
        });
        for line in self.headers.iter().chain(&target.headers) {
            template = template.with_header_line(line)?;
        }
        if !target.body.is_empty() {
            template = if self.compression {
                template.with_body(gzip(target.body.as_bytes())?).with_header("Content-Encoding", "gzip")?
            } else {
                template.with_body(target.body.clone())
            };
        }

        Ok(WorkSpec {
            template,
            concurrency: target.concurrent,
            requests: self.max_requests,
            qps: target.qps,
            timeout: self.request_timeout,
        })
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, BuildError> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).map_err(BuildError::Compress)?;
    enc.finish().map_err(BuildError::Compress)
}

fn duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(d)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn optional_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    Option::<String>::deserialize(d)?
        .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
        .transpose()
}
