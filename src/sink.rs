//! Result callbacks invoked by every worker on every completed attempt.
//!
//! The engine only calls [`ResultHandler::handle`]; where results end up is
//! decided by the adapters here or by any closure taking a [`RequestResult`].
use std::{io::Write, sync::Arc};

use parking_lot::Mutex;

use crate::result::RequestResult;

/// Receives each completed attempt.
///
/// Called concurrently from many workers. A slow handler throttles the calling
/// worker, so implementations must not block indefinitely.
pub trait ResultHandler: Send + Sync {
    /// Handles one result.
    fn handle(&self, result: &RequestResult);
}

impl<F> ResultHandler for F
where
    F: Fn(&RequestResult) + Send + Sync,
{
    fn handle(&self, result: &RequestResult) {
        self(result)
    }
}

/// Logs failed attempts at `error` and successful ones at `debug`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogHandler;

impl ResultHandler for LogHandler {
    fn handle(&self, r: &RequestResult) {
        match &r.error {
            Some(e) => tracing::error!(method = %r.method, url = %r.url, duration = ?r.duration, "{e}"),
            None => tracing::debug!(
                method = %r.method,
                url = %r.url,
                code = r.status,
                content_length = r.content_length,
                duration = ?r.duration,
                dns = ?r.phases.dns,
                connect = ?r.phases.connect,
                request = ?r.phases.request,
                server = ?r.phases.server,
                response = ?r.phases.response,
                reused = r.reused,
                "request completed"
            ),
        }
    }
}

/// Writes every result as one JSON object per line.
pub struct JsonLinesHandler<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesHandler<W> {
    /// Creates a handler writing to `out`.
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    /// Flushes the underlying writer.
    pub fn flush(&self) -> std::io::Result<()> {
        self.out.lock().flush()
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> ResultHandler for JsonLinesHandler<W> {
    fn handle(&self, result: &RequestResult) {
        let mut out = self.out.lock();
        let written = serde_json::to_writer(&mut *out, result)
            .map_err(std::io::Error::from)
            .and_then(|_| out.write_all(b"\n"));
        if let Err(e) = written {
            tracing::warn!(error = %e, "failed to write result");
        }
    }
}

/// Forwards each result to several handlers, in order.
#[derive(Clone, Default)]
pub struct Fanout {
    handlers: Vec<Arc<dyn ResultHandler>>,
}

impl Fanout {
    /// Creates a fanout over `handlers`.
    pub fn new(handlers: Vec<Arc<dyn ResultHandler>>) -> Self {
        Self { handlers }
    }

    /// Adds a handler at the end.
    pub fn push(&mut self, handler: Arc<dyn ResultHandler>) {
        self.handlers.push(handler);
    }
}

impl ResultHandler for Fanout {
    fn handle(&self, result: &RequestResult) {
        for handler in &self.handlers {
            handler.handle(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU64, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{error::RequestError, result::Phases, template::RequestTemplate};

    fn results() -> Vec<RequestResult> {
        let t = RequestTemplate::new("POST", "http://example/ingest").unwrap();
        vec![
            RequestResult::completed(&t, 202, 2, Duration::from_millis(3), Phases::default(), true),
            RequestResult::failed(&t, RequestError::Connect("refused".into()), Duration::ZERO, Phases::default(), false),
        ]
    }

    #[test]
    fn json_lines_writes_one_object_per_result() {
        let sink = JsonLinesHandler::new(Vec::new());
        for r in results() {
            sink.handle(&r);
        }
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["code"], 202);
        assert_eq!(lines[0]["reused"], true);
        assert_eq!(lines[1]["code"], 0);
        assert_eq!(lines[1]["err"], "connect failed: refused");
        assert_eq!(lines[0]["complete"], true);
        assert_eq!(lines[1]["complete"], false);
    }

    #[test]
    fn fanout_reaches_every_handler() {
        let seen = Arc::new(AtomicU64::new(0));
        let counter = {
            let seen = seen.clone();
            move |_: &RequestResult| {
                seen.fetch_add(1, Ordering::Relaxed);
            }
        };
        let mut fanout = Fanout::new(vec![Arc::new(counter.clone())]);
        fanout.push(Arc::new(counter));
        fanout.push(Arc::new(LogHandler));
        for r in results() {
            fanout.handle(&r);
        }
        assert_eq!(seen.load(Ordering::Relaxed), 4);
    }
}
