//! Command line front end of the `volley` binary.
//!
//! A run is described either by a JSON configuration file (see
//! [`Config`](crate::Config)) or ad hoc by a single URL and flags:
//!
//! ```shell
//! $ volley -c 8 -n 1000 -q 200 http://localhost:8080/health
//! $ volley -f load.json --output json -O summary.json
//! ```
use std::{
    fs::File,
    io::{BufWriter, stdout},
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    sync::Arc,
};

use clap::{
    Parser, ValueEnum,
    builder::{
        Styles,
        styling::{AnsiColor, Effects},
    },
};

use crate::{
    config::{Config, DEFAULT_RUN_TIMEOUT, Target},
    orchestrator::Orchestrator,
    reporter::{JsonReporter, SummaryReporter, TextReporter},
    sink::{JsonLinesHandler, LogHandler, ResultHandler},
};

#[derive(Parser, Clone, Debug)]
#[clap(
    name = "volley",
    version,
    about = "Concurrent HTTP load generator",
    styles(Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default())
    )
)]
#[allow(missing_docs)]
pub struct LoadCli {
    /// Target URL
    #[clap(required_unless_present = "config", conflicts_with = "config")]
    pub url: Option<String>,

    /// JSON configuration file describing base URLs and targets
    #[clap(long, short = 'f')]
    pub config: Option<PathBuf>,

    /// HTTP method
    #[clap(long, short = 'm', default_value = "GET")]
    pub method: String,

    /// Request header, as `Name: value`
    ///
    /// May be repeated.
    #[clap(long = "header", short = 'H')]
    pub headers: Vec<String>,

    /// Request body
    ///
    /// Sent gzip-compressed unless --no-compression is set.
    #[clap(long, short = 'b')]
    pub body: Option<String>,

    /// Number of workers to run concurrently
    #[clap(long, short = 'c', default_value = "1")]
    pub concurrency: NonZeroU32,

    /// Number of requests per target
    ///
    /// When set, a target stops after issuing that many requests.
    #[clap(long, short = 'n')]
    pub requests: Option<NonZeroU64>,

    /// Rate limit per target, in requests per second
    ///
    /// 0 means unlimited.
    #[clap(long, short = 'q', default_value_t = 0.0)]
    pub qps: f64,

    /// Timeout of a single request, 0 to disable
    #[clap(long, short = 't', default_value = "5s")]
    pub timeout: humantime::Duration,

    /// Deadline of the whole run
    ///
    /// Overrides the configuration file. For an ad hoc URL it defaults to 10s
    /// unless --requests is set.
    ///
    /// Examples: -d 10s, -d 5m, -d 1h
    #[clap(long, short = 'd')]
    pub run_timeout: Option<humantime::Duration>,

    /// Do not request gzip responses nor compress the request body
    #[clap(long)]
    pub no_compression: bool,

    /// Open a new connection for every request
    #[clap(long)]
    pub no_keepalive: bool,

    /// Report redirects instead of following them
    #[clap(long)]
    pub no_redirects: bool,

    /// How long to wait for in-flight requests when stopping
    #[clap(long, default_value = "30s")]
    pub stop_timeout: humantime::Duration,

    /// Output format for the summary
    #[clap(short, long, value_enum, default_value_t = ReportFormat::Text, ignore_case = true)]
    pub output: ReportFormat,

    /// Output file path for the summary
    ///
    /// When set, the summary will be written to the specified file instead of stdout.
    #[clap(long, short = 'O')]
    pub output_file: Option<PathBuf>,

    /// Write every request result as a JSON line to this file
    ///
    /// Otherwise results are only logged.
    #[clap(long)]
    pub results: Option<PathBuf>,
}

/// Summary format.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ReportFormat {
    /// Plain text. See [`TextReporter`].
    Text,

    /// JSON. See [`JsonReporter`].
    Json,
}

impl LoadCli {
    /// Builds the run configuration from the file or the ad hoc flags.
    pub fn config(&self) -> anyhow::Result<Config> {
        let mut config = match (&self.config, &self.url) {
            (Some(path), _) => Config::load(path)?,
            (None, Some(url)) => Config {
                base_urls: vec![url.clone()],
                targets: vec![Target {
                    method: self.method.clone(),
                    url: String::new(),
                    headers: self.headers.clone(),
                    body: self.body.clone().unwrap_or_default(),
                    concurrent: self.concurrency.get(),
                    qps: self.qps,
                }],
                headers: Vec::new(),
                max_requests: self.requests.map(NonZeroU64::get),
                run_timeout: self.requests.is_none().then_some(DEFAULT_RUN_TIMEOUT),
                request_timeout: self.timeout.into(),
                compression: !self.no_compression,
                keepalives: !self.no_keepalive,
                redirects: !self.no_redirects,
            },
            (None, None) => anyhow::bail!("either a URL or --config is required"),
        };
        if let Some(run_timeout) = self.run_timeout {
            config.run_timeout = Some(run_timeout.into());
        }
        Ok(config)
    }
}

/// Runs the load described by `cli` and prints one summary per target.
pub async fn run(cli: LoadCli) -> anyhow::Result<()> {
    let config = cli.config()?;

    let results = match &cli.results {
        Some(path) => Some(Arc::new(JsonLinesHandler::new(BufWriter::new(File::create(path)?)))),
        None => None,
    };
    let handler: Arc<dyn ResultHandler> = match &results {
        Some(sink) => sink.clone(),
        None => Arc::new(LogHandler),
    };

    let orchestrator = Orchestrator::from_config(&config, handler)?.with_stop_timeout(cli.stop_timeout.into());
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c");
            cancel.cancel();
        }
    });

    let summaries = orchestrator.run().await;
    if let Some(sink) = results {
        sink.flush()?;
    }

    let reporter: &dyn SummaryReporter = match cli.output {
        ReportFormat::Text => &TextReporter,
        ReportFormat::Json => &JsonReporter,
    };
    match cli.output_file {
        Some(path) => reporter.print(&mut File::create(path)?, &summaries)?,
        None => reporter.print(&mut stdout(), &summaries)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Result<LoadCli, clap::Error> {
        LoadCli::try_parse_from(std::iter::once("volley").chain(args.iter().copied()))
    }

    #[test]
    fn command_is_well_formed() {
        LoadCli::command().debug_assert();
    }

    #[test]
    fn needs_a_url_or_a_config() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["-f", "load.json", "http://a/"]).is_err());
    }

    #[test]
    fn builds_an_ad_hoc_config() {
        let cli = parse(&[
            "-m", "POST", "-H", "X-A: 1", "-H", "X-B: 2", "-b", "{}", "-c", "4", "-n", "100", "-q", "2.5", "-t",
            "750ms", "--no-keepalive", "http://a/x",
        ])
        .unwrap();
        let config = cli.config().unwrap();
        assert_eq!(config.base_urls, ["http://a/x"]);
        assert_eq!(config.max_requests, Some(100));
        assert_eq!(config.run_timeout, None);
        assert_eq!(config.request_timeout, Duration::from_millis(750));
        assert!(config.compression && !config.keepalives && config.redirects);

        let target = &config.targets[0];
        assert_eq!(target.method, "POST");
        assert_eq!(target.headers, ["X-A: 1", "X-B: 2"]);
        assert_eq!(target.concurrent, 4);
        assert_eq!(target.qps, 2.5);

        let specs = config.work_specs().unwrap();
        let spec = specs[0].1.as_ref().unwrap();
        assert_eq!(spec.template.uri(), "http://a/x");
        assert!(spec.template.options().disable_keepalive);
    }

    #[test]
    fn unbounded_runs_default_to_a_deadline() {
        let config = parse(&["http://a/"]).unwrap().config().unwrap();
        assert_eq!(config.run_timeout, Some(DEFAULT_RUN_TIMEOUT));
        assert_eq!(config.max_requests, None);

        let config = parse(&["-d", "1m", "-n", "5", "http://a/"]).unwrap().config().unwrap();
        assert_eq!(config.run_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn rejects_zero_concurrency() {
        assert!(parse(&["-c", "0", "http://a/"]).is_err());
    }
}
