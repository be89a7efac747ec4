//! Runs several worker pools side by side and shuts them down together.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{config::Config, error::BuildError, pool::Work, reporter::TargetSummary, sink::ResultHandler};

/// How long [`Orchestrator::stop`] waits for the pools before giving up on them.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// The lifecycle of a whole run: start every pool, wait for natural completion,
/// the run deadline or an external cancel, then stop everything.
pub struct Orchestrator {
    works: Vec<Arc<Work>>,
    run_timeout: Option<Duration>,
    stop_timeout: Duration,
    cancel: CancellationToken,
    stopping: AtomicBool,
    stopped: CancellationToken,
}

impl Orchestrator {
    /// Creates an orchestrator over `works`, stopping them after `run_timeout`
    /// if set.
    pub fn new(works: Vec<Work>, run_timeout: Option<Duration>) -> Result<Self, BuildError> {
        if works.is_empty() {
            return Err(BuildError::NoWork);
        }
        Ok(Self {
            works: works.into_iter().map(Arc::new).collect(),
            run_timeout,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            cancel: CancellationToken::new(),
            stopping: AtomicBool::new(false),
            stopped: CancellationToken::new(),
        })
    }

    /// Builds one HTTP worker pool per configured base URL and target.
    ///
    /// Targets that cannot be built are logged and skipped.
    pub fn from_config(config: &Config, handler: Arc<dyn ResultHandler>) -> Result<Self, BuildError> {
        let mut works = Vec::new();
        for (label, spec) in config.work_specs()? {
            match spec.and_then(|spec| Work::http(spec, handler.clone())) {
                Ok(work) => works.push(work),
                Err(e) => tracing::error!(request = %label, error = %e, "skipping target"),
            }
        }
        Self::new(works, config.run_timeout)
    }

    /// Sets how long [`stop`](Self::stop) waits for the pools.
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// A token that ends [`run`](Self::run) early when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The worker pools, in configuration order.
    pub fn works(&self) -> &[Arc<Work>] {
        &self.works
    }

    /// Runs every pool to completion, the run deadline or cancellation and
    /// returns one summary per pool.
    pub async fn run(&self) -> Vec<TargetSummary> {
        tracing::info!(pools = self.works.len(), "running, hit ctrl-c to stop");
        for work in &self.works {
            tracing::info!(work = %work, "starting worker pool");
            work.start();
        }

        let finished = async {
            for work in &self.works {
                work.wait().await;
            }
        };
        let deadline = async {
            match self.run_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = finished => tracing::info!("all worker pools finished"),
            _ = deadline => tracing::info!("run timeout reached"),
            _ = self.cancel.cancelled() => tracing::info!("run cancelled"),
        }
        self.stop().await;

        self.works
            .iter()
            .map(|work| TargetSummary { target: work.describe(), summary: work.report().summarize() })
            .collect()
    }

    /// Stops every pool concurrently, waiting at most the stop timeout.
    ///
    /// Pools still busy at the deadline are abandoned. Later calls wait for the
    /// first one to finish and do nothing else.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            self.stopped.cancelled().await;
            return;
        }
        tracing::info!("stopping worker pools");

        let mut set = JoinSet::new();
        for work in &self.works {
            let work = work.clone();
            set.spawn(async move { work.stop().await });
        }
        let all_stopped = async { while set.join_next().await.is_some() {} };
        if tokio::time::timeout(self.stop_timeout, all_stopped).await.is_err() {
            tracing::warn!(
                timeout = %humantime::format_duration(self.stop_timeout),
                "timed out waiting for worker pools to stop"
            );
        }
        self.stopped.cancel();
    }
}
