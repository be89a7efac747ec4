//! The outcome record of one request attempt.
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::{error::RequestError, template::RequestTemplate};

/// Phase breakdown of one exchange. A phase that could not be observed is `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Phases {
    /// Host resolution.
    #[serde(serialize_with = "opt_nanos")]
    pub dns: Option<Duration>,
    /// Dialing, including the TLS and HTTP handshakes.
    #[serde(serialize_with = "opt_nanos")]
    pub connect: Option<Duration>,
    /// Writing the request.
    #[serde(serialize_with = "opt_nanos")]
    pub request: Option<Duration>,
    /// Waiting for the first response byte.
    #[serde(serialize_with = "opt_nanos")]
    pub server: Option<Duration>,
    /// Reading the response.
    #[serde(serialize_with = "opt_nanos")]
    pub response: Option<Duration>,
}

/// The outcome of a single attempt, successful or not.
#[derive(Clone, Debug, Serialize)]
pub struct RequestResult {
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
    /// Request method.
    pub method: String,
    /// Request URL.
    pub url: String,
    /// Request body bytes sent.
    #[serde(rename = "bodysize")]
    pub body_size: u64,
    /// Response status code, 0 if the attempt failed.
    #[serde(rename = "code")]
    pub status: u16,
    /// Response body bytes received.
    pub content_length: u64,
    /// Total duration of the attempt, including any redirects.
    #[serde(serialize_with = "nanos")]
    pub duration: Duration,
    /// Phase durations of the final exchange.
    #[serde(rename = "trace")]
    pub phases: Phases,
    /// The final exchange ran over a pooled connection.
    pub reused: bool,
    /// A response was received.
    pub complete: bool,
    /// Why the attempt failed.
    #[serde(rename = "err", serialize_with = "opt_display")]
    pub error: Option<RequestError>,
}

impl RequestResult {
    /// A completed exchange.
    pub fn completed(
        template: &RequestTemplate,
        status: u16,
        content_length: u64,
        duration: Duration,
        phases: Phases,
        reused: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            method: template.method().to_string(),
            url: template.uri().to_string(),
            body_size: template.body().len() as u64,
            status,
            content_length,
            duration,
            phases,
            reused,
            complete: true,
            error: None,
        }
    }

    /// A failed attempt, reported with status code 0.
    pub fn failed(template: &RequestTemplate, error: RequestError, duration: Duration, phases: Phases, reused: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            method: template.method().to_string(),
            url: template.uri().to_string(),
            body_size: template.body().len() as u64,
            status: 0,
            content_length: 0,
            duration,
            phases,
            reused,
            complete: false,
            error: Some(error),
        }
    }

    /// Whether the attempt produced a response.
    pub fn is_success(&self) -> bool {
        self.complete
    }
}

fn nanos<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

fn opt_nanos<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => nanos(d, s),
        None => s.serialize_none(),
    }
}

fn opt_display<S: Serializer>(e: &Option<RequestError>, s: S) -> Result<S::Ok, S::Error> {
    match e {
        Some(e) => s.collect_str(e),
        None => s.serialize_none(),
    }
}
