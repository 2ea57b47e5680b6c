use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Browser User-Agent sent when no login collaborator supplies one
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Main configuration structure for a sweep
///
/// Every section except `[sweep]` may be omitted from the file; the range and
/// endpoint template have no meaningful defaults and are rejected by validation
/// when left empty.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Number of session handles the pool should build
    pub fn effective_sessions(&self) -> usize {
        self.session
            .sessions
            .unwrap_or(self.sweep.worker_count)
            .clamp(1, self.sweep.worker_count.max(1))
    }
}

/// Credentials consumed by the login collaborator
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct CredentialsConfig {
    pub login: Option<String>,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Sweep shape and per-target policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweepConfig {
    /// Inclusive `[lo, hi]` target range
    #[serde(rename = "id-range", default)]
    pub id_range: (u64, u64),

    /// Number of concurrent workers
    #[serde(rename = "worker-count", default = "default_worker_count")]
    pub worker_count: usize,

    /// Targets per inner batch pulled by a worker
    #[serde(rename = "batch-inner", default = "default_batch_inner")]
    pub batch_inner: usize,

    /// Fetch invocations allowed per target before it is given up
    #[serde(
        rename = "max-attempts-per-target",
        default = "default_max_attempts_per_target"
    )]
    pub max_attempts_per_target: u32,

    /// URL with one `{}` or `{id}` placeholder for the target
    #[serde(rename = "endpoint-template", default)]
    pub endpoint_template: String,

    /// Registered extractor id
    #[serde(default = "default_extractor")]
    pub extractor: String,

    #[serde(rename = "fatal-abort-on-auth-expired", default = "default_true")]
    pub fatal_abort_on_auth_expired: bool,

    /// How long workers keep draining their batch after external cancellation
    #[serde(rename = "cancel-grace-ms", default)]
    pub cancel_grace_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            id_range: (0, 0),
            worker_count: default_worker_count(),
            batch_inner: default_batch_inner(),
            max_attempts_per_target: default_max_attempts_per_target(),
            endpoint_template: String::new(),
            extractor: default_extractor(),
            fatal_abort_on_auth_expired: true,
            cancel_grace_ms: 0,
        }
    }
}

/// What a redirect to the login page means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoginRedirectPolicy {
    AuthExpired,
    NotFound,
}

/// What a 200 response with a too-short body means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShortBodyPolicy {
    Transient,
    NotFound,
}

/// Fetcher behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(rename = "request-timeout-seconds", default = "default_request_timeout")]
    pub request_timeout_seconds: f64,

    /// Minimum spacing between consecutive issues on one session (milliseconds)
    #[serde(rename = "min-interval-ms", default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base in seconds; retry n waits `factor * 2^(n-1)`
    #[serde(rename = "backoff-factor", default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(rename = "backoff-cap-seconds", default = "default_backoff_cap")]
    pub backoff_cap_seconds: f64,

    #[serde(rename = "body-min-size", default = "default_body_min_size")]
    pub body_min_size: usize,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    pub referer: Option<String>,

    #[serde(rename = "login-redirect", default = "default_login_redirect")]
    pub login_redirect: LoginRedirectPolicy,

    #[serde(rename = "short-body", default = "default_short_body")]
    pub short_body: ShortBodyPolicy,

    /// Substring identifying a login page served with status 200
    #[serde(rename = "login-marker", default = "default_login_marker")]
    pub login_marker: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            min_interval_ms: default_min_interval_ms(),
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
            backoff_cap_seconds: default_backoff_cap(),
            body_min_size: default_body_min_size(),
            user_agent: default_user_agent(),
            referer: None,
            login_redirect: default_login_redirect(),
            short_body: default_short_body(),
            login_marker: default_login_marker(),
        }
    }
}

/// Session pool and cookie sources
#[derive(Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Number of session handles (defaults to the worker count)
    pub sessions: Option<usize>,

    /// Inline cookie header, `name=value; name2=value2`
    #[serde(default, skip_serializing)]
    pub cookies: Option<String>,

    /// Netscape-format cookie file exported from a browser
    #[serde(rename = "cookie-file")]
    pub cookie_file: Option<PathBuf>,

    /// Login form endpoint used when no cookies are supplied
    #[serde(rename = "login-url")]
    pub login_url: Option<String>,

    /// Requests observed before an all-unauthenticated pool is declared exhausted
    #[serde(rename = "auth-probe-window", default = "default_auth_probe_window")]
    pub auth_probe_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sessions: None,
            cookies: None,
            cookie_file: None,
            login_url: None,
            auth_probe_window: default_auth_probe_window(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("sessions", &self.sessions)
            .field("cookies", &self.cookies.as_ref().map(|_| "[REDACTED]"))
            .field("cookie_file", &self.cookie_file)
            .field("login_url", &self.login_url)
            .field("auth_probe_window", &self.auth_probe_window)
            .finish()
    }
}

/// Batch publisher and sink
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublisherConfig {
    /// Sink URL; batches go to files in the spool directory when absent
    pub endpoint: Option<String>,

    #[serde(rename = "batch-publish", default = "default_batch_publish")]
    pub batch_publish: usize,

    #[serde(rename = "publish-retries", default = "default_publish_retries")]
    pub publish_retries: u32,

    #[serde(
        rename = "publish-backoff-factor",
        default = "default_publish_backoff_factor"
    )]
    pub publish_backoff_factor: f64,

    #[serde(
        rename = "publish-timeout-seconds",
        default = "default_publish_timeout"
    )]
    pub publish_timeout_seconds: f64,

    #[serde(rename = "spool-dir", default = "default_spool_dir")]
    pub spool_dir: PathBuf,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            batch_publish: default_batch_publish(),
            publish_retries: default_publish_retries(),
            publish_backoff_factor: default_publish_backoff_factor(),
            publish_timeout_seconds: default_publish_timeout(),
            spool_dir: default_spool_dir(),
        }
    }
}

/// Parameters handed to the selected extractor at construction
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractorConfig {
    /// Localities must mention one of these terms (case-insensitive)
    #[serde(rename = "filter-terms", default = "default_filter_terms")]
    pub filter_terms: Vec<String>,

    /// ...and one of these sector terms
    #[serde(rename = "sector-terms", default = "default_sector_terms")]
    pub sector_terms: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            filter_terms: default_filter_terms(),
            sector_terms: default_sector_terms(),
        }
    }
}

/// Reporting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Log a progress line every N finished targets
    #[serde(rename = "progress-every", default = "default_progress_every")]
    pub progress_every: u64,

    /// Sample failed targets listed per outcome category
    #[serde(rename = "report-samples", default = "default_report_samples")]
    pub report_samples: usize,

    /// Optional markdown rendering of the final report
    #[serde(rename = "summary-path")]
    pub summary_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            progress_every: default_progress_every(),
            report_samples: default_report_samples(),
            summary_path: None,
        }
    }
}

fn default_worker_count() -> usize {
    8
}

fn default_batch_inner() -> usize {
    200
}

fn default_max_attempts_per_target() -> u32 {
    3
}

fn default_extractor() -> String {
    "members".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> f64 {
    10.0
}

fn default_min_interval_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    0.5
}

fn default_backoff_cap() -> f64 {
    30.0
}

fn default_body_min_size() -> usize {
    100
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_login_redirect() -> LoginRedirectPolicy {
    LoginRedirectPolicy::AuthExpired
}

fn default_short_body() -> ShortBodyPolicy {
    ShortBodyPolicy::Transient
}

fn default_login_marker() -> String {
    r#"name="password""#.to_string()
}

fn default_auth_probe_window() -> usize {
    20
}

fn default_batch_publish() -> usize {
    1000
}

fn default_publish_retries() -> u32 {
    3
}

fn default_publish_backoff_factor() -> f64 {
    1.0
}

fn default_publish_timeout() -> f64 {
    120.0
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("spool")
}

fn default_filter_terms() -> Vec<String> {
    vec!["HORTOL".to_string()]
}

fn default_sector_terms() -> Vec<String> {
    vec!["BR-SP-CAMPINAS".to_string(), "CAMPINAS-HORTOL".to_string()]
}

fn default_progress_every() -> u64 {
    500
}

fn default_report_samples() -> usize {
    5
}
