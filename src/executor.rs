//! Phase-timed execution of a single request attempt.
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use http::{
    HeaderMap, HeaderValue, Method, StatusCode, Uri,
    header::{CONNECTION, LOCATION},
};
use http_body_util::BodyExt;
use url::Url;

use crate::{
    error::RequestError,
    result::RequestResult,
    template::{RequestTemplate, parse_url},
    trace::Trace,
    transport::Transport,
};

/// Redirect hops followed before an attempt is abandoned.
pub const MAX_REDIRECTS: usize = 10;

/// Performs one attempt of a request template.
///
/// Implementations never fail outside the returned [`RequestResult`]: network
/// errors, timeouts and malformed responses are reported as a result with status
/// code 0 and a populated error. Attempts are never retried.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Runs one attempt, aborting it after `timeout` (zero disables the timeout).
    async fn execute(&self, template: &RequestTemplate, timeout: Duration) -> RequestResult;
}

/// Executes templates over HTTP/1.1, timing every phase of the exchange.
pub struct HttpExecutor {
    transport: Arc<Transport>,
}

struct Exchange {
    status: u16,
    content_length: u64,
}

impl HttpExecutor {
    /// Creates an executor issuing requests through `transport`.
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    async fn exchange(&self, template: &RequestTemplate, trace: &mut Trace) -> Result<Exchange, RequestError> {
        let options = template.options();
        let mut method = template.method().clone();
        let mut uri = template.uri().clone();
        let mut with_body = true;

        for hop in 0..=MAX_REDIRECTS {
            if hop > 0 {
                trace.next_hop();
            }

            let mut conn = self.transport.checkout(&uri, trace).await?;
            conn.marks.reset();
            conn.sender.ready().await.map_err(|e| RequestError::Send(e.to_string()))?;
            let resp = conn
                .sender
                .send_request(template.request(&method, &uri, with_body))
                .await
                .map_err(|e| RequestError::Send(e.to_string()))?;

            let (parts, mut body) = resp.into_parts();
            let mut content_length = 0;
            while let Some(frame) = body.frame().await {
                let frame = frame.map_err(|e| RequestError::Body(e.to_string()))?;
                if let Some(data) = frame.data_ref() {
                    content_length += data.len() as u64;
                }
            }
            (trace.wrote_request, trace.first_byte) = conn.marks.snapshot();
            trace.done = Some(Instant::now());

            if !options.disable_keepalive && !wants_close(&parts.headers) {
                self.transport.checkin(conn);
            }

            let status = parts.status;
            match parts.headers.get(LOCATION) {
                Some(location) if is_followed_redirect(status) && !options.disable_redirects => {
                    uri = resolve_location(&uri, location)?;
                    if status == StatusCode::SEE_OTHER
                        || (matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
                            && method != Method::GET
                            && method != Method::HEAD)
                    {
                        method = Method::GET;
                        with_body = false;
                    }
                }
                _ => return Ok(Exchange { status: status.as_u16(), content_length }),
            }
        }

        Err(RequestError::TooManyRedirects(MAX_REDIRECTS))
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, template: &RequestTemplate, timeout: Duration) -> RequestResult {
        let start = Instant::now();
        let mut trace = Trace::new(start);
        let outcome = if timeout.is_zero() {
            Ok(self.exchange(template, &mut trace).await)
        } else {
            tokio::time::timeout(timeout, self.exchange(template, &mut trace)).await
        };
        let duration = start.elapsed();

        let phases = trace.phases();
        match outcome {
            Ok(Ok(ex)) => RequestResult::completed(template, ex.status, ex.content_length, duration, phases, trace.reused),
            Ok(Err(e)) => RequestResult::failed(template, e, duration, phases, trace.reused),
            Err(_) => RequestResult::failed(template, RequestError::Timeout(timeout), duration, phases, trace.reused),
        }
    }
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn wants_close(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .any(|v| v.as_bytes().eq_ignore_ascii_case(b"close"))
}

/// Resolves a `Location` header against the URL that produced it.
fn resolve_location(base: &Uri, location: &HeaderValue) -> Result<Uri, RequestError> {
    let raw = location
        .to_str()
        .map_err(|_| RequestError::BadRedirect(String::from_utf8_lossy(location.as_bytes()).into_owned()))?;
    let bad = || RequestError::BadRedirect(raw.to_string());

    let base = Url::parse(&base.to_string()).map_err(|_| bad())?;
    let mut target = base.join(raw).map_err(|_| bad())?;
    target.set_fragment(None);
    parse_url(target.as_str()).map_err(|_| bad())
}
