//! id-sweep main entry point
//!
//! This is the command-line interface for the ID-sweep scraper.

use anyhow::Context;
use clap::Parser;
use id_sweep::config::{
    config_fingerprint, read_config, validate, Config, LoginRedirectPolicy, ShortBodyPolicy,
};
use id_sweep::extract::{available_extractors, build_extractor};
use id_sweep::output::{print_report, sink_from_config, SweepReport};
use id_sweep::session::provider_from_config;
use id_sweep::sweep::{plan_shards, Coordinator};
use id_sweep::{ConfigError, SweepError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// id-sweep: bounded-parallelism ID sweeps against an authenticated web app
///
/// Probes every ID in an inclusive range against an endpoint template,
/// extracts records with the selected extractor, and streams them in
/// batches to a sink (or to local files when no sink is configured).
#[derive(Parser, Debug)]
#[command(name = "id-sweep")]
#[command(version = "1.0.0")]
#[command(about = "Concurrent ID-sweep scraper", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate the effective configuration, print it and exit
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    overrides: Overrides,
}

/// Command-line overrides, applied on top of the configuration file
#[derive(clap::Args, Debug)]
struct Overrides {
    /// Login passed to the login collaborator
    #[arg(long, env = "LOGIN_MUSICAL")]
    login: Option<String>,

    /// Password passed to the login collaborator
    #[arg(long, env = "SENHA_MUSICAL", hide_env_values = true)]
    password: Option<String>,

    /// Inclusive ID range
    #[arg(long, num_args = 2, value_names = ["LO", "HI"])]
    id_range: Option<Vec<u64>>,

    /// Number of concurrent workers
    #[arg(short = 'w', long)]
    worker_count: Option<usize>,

    /// Targets per inner batch
    #[arg(long)]
    batch_inner: Option<usize>,

    /// Fetch calls allowed per target
    #[arg(long)]
    max_attempts_per_target: Option<u32>,

    /// Endpoint URL with one `{}` placeholder
    #[arg(long)]
    endpoint_template: Option<String>,

    /// Extractor id
    #[arg(long)]
    extractor: Option<String>,

    /// Abort the sweep on the first expired session (true/false)
    #[arg(long)]
    fatal_abort_on_auth_expired: Option<bool>,

    /// Grace window for draining the current batch after Ctrl-C
    #[arg(long, value_name = "MS")]
    cancel_grace_ms: Option<u64>,

    #[arg(long, value_name = "SECONDS")]
    request_timeout_seconds: Option<f64>,

    /// Minimum spacing between requests on one session
    #[arg(long, value_name = "MS")]
    min_interval_ms: Option<u64>,

    #[arg(long)]
    max_retries: Option<u32>,

    #[arg(long)]
    backoff_factor: Option<f64>,

    #[arg(long, value_name = "SECONDS")]
    backoff_cap_seconds: Option<f64>,

    #[arg(long, value_name = "BYTES")]
    body_min_size: Option<usize>,

    #[arg(long)]
    user_agent: Option<String>,

    #[arg(long)]
    referer: Option<String>,

    /// auth-expired | not-found
    #[arg(long, value_parser = parse_login_redirect)]
    login_redirect: Option<LoginRedirectPolicy>,

    /// transient | not-found
    #[arg(long, value_parser = parse_short_body)]
    short_body: Option<ShortBodyPolicy>,

    #[arg(long)]
    login_marker: Option<String>,

    /// Number of pooled sessions (defaults to the worker count)
    #[arg(long)]
    sessions: Option<usize>,

    /// Inline cookie header, `name=value; name2=value2`
    #[arg(long, env = "SWEEP_COOKIES", hide_env_values = true)]
    cookies: Option<String>,

    /// Netscape cookie file exported from a browser
    #[arg(long, value_name = "FILE")]
    cookie_file: Option<PathBuf>,

    /// Login form URL used when no cookies are given
    #[arg(long)]
    login_url: Option<String>,

    #[arg(long)]
    auth_probe_window: Option<usize>,

    /// Sink URL for published batches
    #[arg(long)]
    publisher_endpoint: Option<String>,

    /// Records per published batch
    #[arg(long)]
    batch_publish: Option<usize>,

    #[arg(long)]
    publish_retries: Option<u32>,

    #[arg(long)]
    publish_backoff_factor: Option<f64>,

    #[arg(long, value_name = "SECONDS")]
    publish_timeout_seconds: Option<f64>,

    #[arg(long, value_name = "DIR")]
    spool_dir: Option<PathBuf>,

    #[arg(long)]
    progress_every: Option<u64>,

    #[arg(long)]
    report_samples: Option<usize>,

    /// Write a markdown report here
    #[arg(long, value_name = "FILE")]
    summary_path: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        macro_rules! set {
            ($field:expr, $value:expr) => {
                if let Some(value) = $value {
                    $field = value;
                }
            };
        }
        macro_rules! set_some {
            ($field:expr, $value:expr) => {
                if let Some(value) = $value {
                    $field = Some(value);
                }
            };
        }

        set_some!(config.credentials.login, self.login);
        set_some!(config.credentials.password, self.password);
        if let Some(range) = self.id_range {
            if let [lo, hi] = range.as_slice() {
                config.sweep.id_range = (*lo, *hi);
            }
        }
        set!(config.sweep.worker_count, self.worker_count);
        set!(config.sweep.batch_inner, self.batch_inner);
        set!(config.sweep.max_attempts_per_target, self.max_attempts_per_target);
        set!(config.sweep.endpoint_template, self.endpoint_template);
        set!(config.sweep.extractor, self.extractor);
        set!(
            config.sweep.fatal_abort_on_auth_expired,
            self.fatal_abort_on_auth_expired
        );
        set!(config.sweep.cancel_grace_ms, self.cancel_grace_ms);

        set!(config.http.request_timeout_seconds, self.request_timeout_seconds);
        set!(config.http.min_interval_ms, self.min_interval_ms);
        set!(config.http.max_retries, self.max_retries);
        set!(config.http.backoff_factor, self.backoff_factor);
        set!(config.http.backoff_cap_seconds, self.backoff_cap_seconds);
        set!(config.http.body_min_size, self.body_min_size);
        set!(config.http.user_agent, self.user_agent);
        set_some!(config.http.referer, self.referer);
        set!(config.http.login_redirect, self.login_redirect);
        set!(config.http.short_body, self.short_body);
        set!(config.http.login_marker, self.login_marker);

        set_some!(config.session.sessions, self.sessions);
        set_some!(config.session.cookies, self.cookies);
        set_some!(config.session.cookie_file, self.cookie_file);
        set_some!(config.session.login_url, self.login_url);
        set!(config.session.auth_probe_window, self.auth_probe_window);

        set_some!(config.publisher.endpoint, self.publisher_endpoint);
        set!(config.publisher.batch_publish, self.batch_publish);
        set!(config.publisher.publish_retries, self.publish_retries);
        set!(
            config.publisher.publish_backoff_factor,
            self.publish_backoff_factor
        );
        set!(
            config.publisher.publish_timeout_seconds,
            self.publish_timeout_seconds
        );
        set!(config.publisher.spool_dir, self.spool_dir);

        set!(config.output.progress_every, self.progress_every);
        set!(config.output.report_samples, self.report_samples);
        set_some!(config.output.summary_path, self.summary_path);
    }
}

fn parse_login_redirect(value: &str) -> Result<LoginRedirectPolicy, String> {
    match value {
        "auth-expired" => Ok(LoginRedirectPolicy::AuthExpired),
        "not-found" => Ok(LoginRedirectPolicy::NotFound),
        other => Err(format!("expected auth-expired or not-found, got '{}'", other)),
    }
}

fn parse_short_body(value: &str) -> Result<ShortBodyPolicy, String> {
    match value {
        "transient" => Ok(ShortBodyPolicy::Transient),
        "not-found" => Ok(ShortBodyPolicy::NotFound),
        other => Err(format!("expected transient or not-found, got '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = match load_effective_config(cli.config.as_ref(), cli.overrides) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {:#}", e);
            return ExitCode::from(2);
        }
    };

    if cli.dry_run {
        return match handle_dry_run(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("Invalid configuration: {:#}", e);
                ExitCode::from(2)
            }
        };
    }

    match handle_sweep(config).await {
        Ok(report) => {
            print_report(&report);
            ExitCode::from(report.exit_code())
        }
        Err(e) => {
            tracing::error!("Sweep failed: {:#}", e);
            match e.downcast_ref::<SweepError>() {
                Some(SweepError::Config(_)) => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("id_sweep=info,warn"),
            1 => EnvFilter::new("id_sweep=debug,info"),
            2 => EnvFilter::new("id_sweep=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Reads the configuration file (if any), applies flag overrides and validates
fn load_effective_config(path: Option<&PathBuf>, overrides: Overrides) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            read_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?
        }
        None => Config::default(),
    };

    overrides.apply(&mut config);
    validate(&config)?;

    let hash = config_fingerprint(&config)?;
    tracing::info!("Configuration loaded successfully (hash: {})", &hash[..16]);
    Ok(config)
}

/// Handles the --dry-run mode: prints the effective configuration and plan
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== id-sweep Dry Run ===\n");

    let (lo, hi) = config.sweep.id_range;
    let shards = plan_shards(lo, hi, config.sweep.worker_count);
    println!("Plan:");
    println!("  Range: {}..={} ({} targets)", lo, hi, hi - lo + 1);
    println!("  Workers: {}", config.sweep.worker_count);
    println!("  Sessions: {}", config.effective_sessions());
    for shard in &shards {
        println!(
            "    shard {}: {}..={} ({} batches)",
            shard.index,
            shard.lo,
            shard.hi,
            shard.batches(config.sweep.batch_inner).len()
        );
    }
    println!(
        "  Extractor: {} (available: {})",
        config.sweep.extractor,
        available_extractors().join(", ")
    );
    match &config.publisher.endpoint {
        Some(endpoint) => println!("  Sink: {}", endpoint),
        None => println!("  Sink: files in {}", config.publisher.spool_dir.display()),
    }

    println!("\nEffective configuration:\n");
    println!("{}", toml::to_string_pretty(config).map_err(ConfigError::from)?);

    println!("✓ Configuration is valid");
    Ok(())
}

/// Handles the main sweep operation
async fn handle_sweep(config: Config) -> anyhow::Result<SweepReport> {
    let login = provider_from_config(&config).map_err(SweepError::from)?;
    let extractor =
        build_extractor(&config.sweep.extractor, &config.extractor).map_err(SweepError::from)?;
    let sink = sink_from_config(&config)?;
    tracing::info!("Publishing to {}", sink.describe());

    let mut coordinator = Coordinator::new(config, login, extractor, sink);

    // Ctrl-C stops the sweep gracefully
    let control = coordinator.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            control.cancel();
        }
    });

    let report = coordinator.run().await?;
    Ok(report)
}
