//! A concurrent HTTP load generation engine.
//!
//! `volley` drives a fixed number of workers against one request template,
//! bounded by an optional request budget and an optional aggregate rate, and
//! records the status code, duration and per-phase timings (DNS, connect,
//! request write, server processing, response read) of every attempt.
//!
//! ## Features
//!
//! - **Exact budgets**: exactly `N` attempts are issued across all workers.
//! - **Pacing**: an aggregate requests-per-second limit shared by the workers.
//! - **Phase timings**: every attempt reports where its time went.
//! - **Live reports**: summaries can be taken at any time, even mid-run.
//! - **Graceful shutdown**: stopping lets in-flight attempts finish.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use volley::{RequestTemplate, Work, WorkSpec, sink::LogHandler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let template = RequestTemplate::new("GET", "http://localhost:8080/health")?;
//!     let spec = WorkSpec { concurrency: 8, requests: Some(1000), qps: 200.0, ..WorkSpec::new(template) };
//!     let work = Work::http(spec, Arc::new(LogHandler))?;
//!
//!     work.start();
//!     work.wait().await;
//!     work.report().write_summary(&mut std::io::stdout())?;
//!     Ok(())
//! }
//! ```
//!
//! Several targets with a shared deadline are run by an [`Orchestrator`], usually
//! built from a JSON [`Config`].
#![deny(missing_docs)]

mod config;
mod duration;
mod error;
mod executor;
mod histogram;
mod orchestrator;
mod pool;
mod rate;
mod report;
mod result;
mod template;
mod trace;
mod transport;

pub mod cli;
pub mod reporter;
pub mod sink;

pub use crate::{
    config::{Config, DEFAULT_RUN_TIMEOUT, LabelledSpec, Target},
    error::{BuildError, ConfigError, RequestError},
    executor::{HttpExecutor, MAX_REDIRECTS, RequestExecutor},
    orchestrator::{DEFAULT_STOP_TIMEOUT, Orchestrator},
    pool::{DEFAULT_TIMEOUT, Work, WorkSpec},
    rate::Pacer,
    report::{ErrorCount, LatencySummary, Percentile, Report, StatusShare, Summary},
    result::{Phases, RequestResult},
    template::{RequestTemplate, TransportOptions},
    transport::Transport,
};
