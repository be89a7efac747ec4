//! The worker pool issuing one request template against a shared budget.
//!
//! A [`Work`] owns everything its workers share: the template, the remaining
//! request budget, the pacing gate, the executor and the [`Report`]. Nothing is
//! shared between pools, so several targets run fully independently.
//!
//! Each worker loops until the budget is exhausted or the pool is stopping:
//! claim one unit of budget, wait for a pacing cell, execute one attempt, fold
//! the result into the report and hand it to the result handler. Stopping is
//! cooperative; an attempt already in flight runs to completion (or to its own
//! timeout) before the worker notices.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    error::BuildError,
    executor::{HttpExecutor, RequestExecutor},
    rate::Pacer,
    report::Report,
    sink::ResultHandler,
    template::RequestTemplate,
    transport::Transport,
};

/// Per-request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// The parameters of one load generation run against one request template.
#[derive(Clone, Debug)]
pub struct WorkSpec {
    /// The request issued by every worker.
    pub template: RequestTemplate,
    /// Number of concurrent workers, at least 1.
    pub concurrency: u32,
    /// Total attempts across all workers; `None` runs until stopped.
    pub requests: Option<u64>,
    /// Aggregate requests per second across all workers; `0.0` is unlimited.
    pub qps: f64,
    /// Per-attempt timeout; zero disables it.
    pub timeout: Duration,
}

impl WorkSpec {
    /// A single-worker, unbounded, unpaced spec with the default timeout.
    pub fn new(template: RequestTemplate) -> Self {
        Self { template, concurrency: 1, requests: None, qps: 0.0, timeout: DEFAULT_TIMEOUT }
    }
}

#[derive(Debug)]
enum Budget {
    Unbounded,
    Remaining(AtomicU64),
}

impl Budget {
    /// Claims one unit of work. Exactly one caller wins each unit.
    fn claim(&self) -> bool {
        match self {
            Budget::Unbounded => true,
            Budget::Remaining(n) => n
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok(),
        }
    }
}

struct Shared {
    template: RequestTemplate,
    timeout: Duration,
    budget: Budget,
    pacer: Pacer,
    executor: Arc<dyn RequestExecutor>,
    handler: Arc<dyn ResultHandler>,
    report: Arc<Report>,
    cancel: CancellationToken,
}

/// A pool of workers running one [`WorkSpec`].
///
/// The lifecycle is [`start`](Self::start), then [`wait`](Self::wait) for natural
/// completion and/or [`stop`](Self::stop). Concurrency and budget are fixed for
/// the lifetime of the pool.
pub struct Work {
    shared: Arc<Shared>,
    concurrency: u32,
    requests: Option<u64>,
    qps: f64,
    started: AtomicBool,
    stopping: AtomicBool,
    done: CancellationToken,
}

impl Work {
    /// Creates a pool over a caller-supplied executor.
    ///
    /// Fails before anything runs if the concurrency or budget is zero, or the
    /// rate is unusable.
    pub fn new(
        spec: WorkSpec,
        executor: Arc<dyn RequestExecutor>,
        handler: Arc<dyn ResultHandler>,
    ) -> Result<Self, BuildError> {
        if spec.concurrency == 0 {
            return Err(BuildError::ZeroConcurrency);
        }
        let budget = match spec.requests {
            Some(0) => return Err(BuildError::ZeroRequests),
            Some(n) => Budget::Remaining(AtomicU64::new(n)),
            None => Budget::Unbounded,
        };
        let pacer = Pacer::new(spec.qps)?;

        let shared = Shared {
            template: spec.template,
            timeout: spec.timeout,
            budget,
            pacer,
            executor,
            handler,
            report: Arc::new(Report::new()),
            cancel: CancellationToken::new(),
        };
        Ok(Self {
            shared: Arc::new(shared),
            concurrency: spec.concurrency,
            requests: spec.requests,
            qps: spec.qps,
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            done: CancellationToken::new(),
        })
    }

    /// Creates a pool issuing real HTTP requests over its own [`Transport`].
    pub fn http(spec: WorkSpec, handler: Arc<dyn ResultHandler>) -> Result<Self, BuildError> {
        let transport = Transport::new(spec.concurrency as usize)?;
        let executor = Arc::new(HttpExecutor::new(Arc::new(transport)));
        Self::new(spec, executor, handler)
    }

    /// Launches the workers on the current tokio runtime.
    ///
    /// Returns `false` if the pool was already started or stopped.
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }

        let shared = self.shared.clone();
        let done = self.done.clone();
        let workers = self.concurrency;
        tokio::spawn(async move {
            let mut set = JoinSet::new();
            for worker in 0..workers {
                set.spawn(run_worker(shared.clone(), worker));
            }
            let mut issued = 0;
            while let Some(res) = set.join_next().await {
                match res {
                    Ok(n) => issued += n,
                    Err(e) => tracing::error!(request = %shared.template, error = %e, "worker task failed"),
                }
            }
            tracing::debug!(request = %shared.template, issued, "all workers exited");
            done.cancel();
        });
        true
    }

    /// Waits until every worker exited, either because the budget ran out or
    /// because the pool was stopped.
    ///
    /// Never returns for a pool that is neither started nor stopped.
    pub async fn wait(&self) {
        self.done.cancelled().await
    }

    /// Stops the pool: no new attempt starts, in-flight attempts finish.
    ///
    /// Only the first call signals the workers and returns `true`; later or
    /// concurrent calls return `false`. Every call waits for the workers to
    /// exit. Callers wanting a deadline wrap this in [`tokio::time::timeout`].
    pub async fn stop(&self) -> bool {
        let initiated = !self.stopping.swap(true, Ordering::AcqRel);
        if initiated {
            tracing::debug!(work = %self, "stopping worker pool");
            self.shared.cancel.cancel();
            if !self.started.swap(true, Ordering::AcqRel) {
                // never started: there are no workers to wait for
                self.done.cancel();
            }
        }
        self.done.cancelled().await;
        initiated
    }

    /// Whether [`stop`](Self::stop) was called.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Whether every worker exited.
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// The live report of this pool.
    pub fn report(&self) -> &Arc<Report> {
        &self.shared.report
    }

    /// The request template.
    pub fn template(&self) -> &RequestTemplate {
        &self.shared.template
    }

    /// Method, URL and load parameters, for operator-facing annotations.
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} concurrency={}", self.shared.template, self.concurrency)?;
        match self.requests {
            Some(n) => write!(f, " requests={n}")?,
            None => write!(f, " requests=unbounded")?,
        }
        if self.shared.pacer.is_limited() {
            write!(f, " qps={}", self.qps)?;
        }
        Ok(())
    }
}

async fn run_worker(shared: Arc<Shared>, worker: u32) -> u64 {
    let mut issued = 0;
    while !shared.cancel.is_cancelled() && shared.budget.claim() {
        if !shared.pacer.acquire(&shared.cancel).await {
            break;
        }
        let result = shared.executor.execute(&shared.template, shared.timeout).await;
        shared.report.update(&result);
        shared.handler.handle(&result);
        issued += 1;
    }
    tracing::trace!(worker, issued, "worker exited");
    issued
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{error::RequestError, result::Phases, result::RequestResult};

    /// Answers 200 after an optional delay, counting invocations.
    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicU64,
        delay: Duration,
    }

    #[async_trait]
    impl RequestExecutor for CountingExecutor {
        async fn execute(&self, template: &RequestTemplate, _: Duration) -> RequestResult {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            RequestResult::completed(template, 200, 0, self.delay, Phases::default(), false)
        }
    }

    /// Alternates between a 200 and a timeout.
    #[derive(Default)]
    struct FlakyExecutor {
        calls: AtomicU64,
    }

    #[async_trait]
    impl RequestExecutor for FlakyExecutor {
        async fn execute(&self, template: &RequestTemplate, timeout: Duration) -> RequestResult {
            let n = self.calls.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(Duration::from_millis(1)).await;
            if n % 2 == 0 {
                RequestResult::completed(template, 200, 0, Duration::from_millis(1), Phases::default(), false)
            } else {
                RequestResult::failed(template, RequestError::Timeout(timeout), timeout, Phases::default(), false)
            }
        }
    }

    fn spec(concurrency: u32, requests: Option<u64>, qps: f64) -> WorkSpec {
        WorkSpec {
            template: RequestTemplate::new("GET", "http://example/x").unwrap(),
            concurrency,
            requests,
            qps,
            timeout: Duration::from_secs(1),
        }
    }

    fn counting_handler() -> (Arc<AtomicU64>, Arc<dyn ResultHandler>) {
        let count = Arc::new(AtomicU64::new(0));
        let handler = {
            let count = count.clone();
            move |_: &RequestResult| {
                count.fetch_add(1, Ordering::Relaxed);
            }
        };
        (count, Arc::new(handler))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn issues_exactly_the_budget_under_races() {
        let executor = Arc::new(CountingExecutor::default());
        let (handled, handler) = counting_handler();
        let work = Work::new(spec(50, Some(1000), 0.0), executor.clone(), handler).unwrap();

        assert!(work.start());
        assert!(!work.start(), "second start is a no-op");
        work.wait().await;

        assert_eq!(executor.calls.load(Ordering::Relaxed), 1000);
        assert_eq!(handled.load(Ordering::Relaxed), 1000);
        assert_eq!(work.report().total(), 1000);
        assert!(work.is_finished());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn natural_completion_reports_all_successes() {
        let executor = Arc::new(CountingExecutor { delay: Duration::from_millis(1), ..Default::default() });
        let (_, handler) = counting_handler();
        let work = Work::new(spec(2, Some(10), 0.0), executor, handler).unwrap();

        work.start();
        work.wait().await;

        let summary = work.report().summarize();
        assert_eq!(summary.total, 10);
        assert_eq!(summary.statuses.len(), 1);
        assert_eq!(summary.statuses[0].code, 200);
        assert_eq!(summary.statuses[0].count, 10);

        let mut out = Vec::new();
        work.report().write_summary(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[200]\t10 responses (100.00%)"), "{text}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failures_are_counted_under_status_zero() {
        let executor = Arc::new(FlakyExecutor::default());
        let (handled, handler) = counting_handler();
        let work = Work::new(spec(2, Some(10), 0.0), executor, handler).unwrap();

        work.start();
        work.wait().await;

        let summary = work.report().summarize();
        let counts: Vec<_> = summary.statuses.iter().map(|s| (s.code, s.count)).collect();
        assert_eq!(counts, [(0, 5), (200, 5)]);
        assert_eq!(handled.load(Ordering::Relaxed), 10);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].count, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stops_signal_once() {
        let executor = Arc::new(CountingExecutor { delay: Duration::from_millis(1), ..Default::default() });
        let (_, handler) = counting_handler();
        let work = Arc::new(Work::new(spec(4, None, 0.0), executor.clone(), handler).unwrap());

        work.start();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut set = JoinSet::new();
        for _ in 0..8 {
            let work = work.clone();
            set.spawn(async move { work.stop().await });
        }
        let mut initiated = 0;
        while let Some(res) = set.join_next().await {
            initiated += res.unwrap() as u32;
        }
        assert_eq!(initiated, 1);
        assert!(work.is_stopping());

        tokio::time::timeout(Duration::from_secs(1), work.wait()).await.unwrap();
        assert!(!work.stop().await);

        // nothing new starts once stopped
        let calls = executor.calls.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(executor.calls.load(Ordering::Relaxed), calls);
        assert_eq!(work.report().total(), calls);
    }

    #[cfg(feature = "rate_limit")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pacing_bounds_the_aggregate_rate() {
        let executor = Arc::new(CountingExecutor::default());
        let (_, handler) = counting_handler();
        let work = Work::new(spec(5, None, 10.0), executor.clone(), handler).unwrap();

        work.start();
        tokio::time::sleep(Duration::from_secs(2)).await;
        work.stop().await;

        let calls = executor.calls.load(Ordering::Relaxed);
        assert!((15..=23).contains(&calls), "issued {calls} attempts in 2s at 10 qps");
    }

    #[cfg(feature = "rate_limit")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_releases_workers_waiting_for_a_cell() {
        let executor = Arc::new(CountingExecutor::default());
        let (_, handler) = counting_handler();
        let work = Work::new(spec(3, None, 0.2), executor.clone(), handler).unwrap();

        work.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stopped = tokio::time::timeout(Duration::from_secs(1), work.stop()).await;
        assert_eq!(stopped.unwrap(), true);
        assert_eq!(executor.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn stop_before_start_completes_immediately() {
        let (_, handler) = counting_handler();
        let work = Work::new(spec(1, Some(5), 0.0), Arc::new(CountingExecutor::default()), handler).unwrap();
        assert!(work.stop().await);
        assert!(!work.start());
        work.wait().await;
        assert_eq!(work.report().total(), 0);
    }

    #[test]
    fn rejects_invalid_specs() {
        let build = |s| Work::new(s, Arc::new(CountingExecutor::default()), counting_handler().1);
        assert!(matches!(build(spec(0, Some(1), 0.0)), Err(BuildError::ZeroConcurrency)));
        assert!(matches!(build(spec(1, Some(0), 0.0)), Err(BuildError::ZeroRequests)));
        assert!(matches!(build(spec(1, None, -5.0)), Err(BuildError::InvalidRate { .. })));
    }

    #[test]
    fn describes_method_url_and_load() {
        let (_, handler) = counting_handler();
        let work = Work::new(spec(2, Some(10), 0.0), Arc::new(CountingExecutor::default()), handler.clone()).unwrap();
        assert_eq!(work.describe(), "GET http://example/x concurrency=2 requests=10");

        #[cfg(feature = "rate_limit")]
        {
            let work = Work::new(spec(3, None, 2.5), Arc::new(CountingExecutor::default()), handler).unwrap();
            assert_eq!(work.describe(), "GET http://example/x concurrency=3 requests=unbounded qps=2.5");
        }
    }

    #[test]
    fn budget_claims_are_exact() {
        let budget = Budget::Remaining(AtomicU64::new(3));
        let claimed = (0..10).filter(|_| budget.claim()).count();
        assert_eq!(claimed, 3);
        assert!(Budget::Unbounded.claim());
    }
}
