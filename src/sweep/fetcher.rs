//! Rate-limited fetcher
//!
//! This module issues the request for one target and classifies the answer:
//! - Inter-request pacing per session and a global in-flight cap
//! - The status → outcome table (404 absent, 401 auth, 403 forbidden, ...)
//! - One-hop redirect following and login-page detection
//! - Exponential retry backoff (capped, with jitter) for transient failures
//! - The extractor boundary, where extractor errors and panics become
//!   `PermanentError(extract)`

use crate::config::{HttpConfig, LoginRedirectPolicy, ShortBodyPolicy, UrlTemplate};
use crate::extract::{ContentExpectation, ExtractError, Extraction, Extractor};
use crate::session::{SessionHandle, SessionPool};
use crate::state::{NotFoundReason, PermanentKind, TransientKind};
use rand::Rng;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Successful response handed to the extractor
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Why a fetch produced no response for the extractor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    NotFound(NotFoundReason),
    Transient(TransientKind),
    Permanent(PermanentKind),
    /// 401, or a login page under the `auth-expired` policy
    AuthExpired,
    /// The session pool never saw an authenticated response
    AuthExhausted(String),
}

/// Result of one `fetch` call, including its internal retries
#[derive(Debug)]
pub struct FetchReport {
    pub result: Result<RawResponse, FetchFailure>,
    /// Retries spent inside this call (HTTP attempts minus one)
    pub retries: u32,
}

/// Retry and classification knobs taken from `[http]`
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub backoff_cap: Duration,
    pub body_min_size: usize,
    pub login_redirect: LoginRedirectPolicy,
    pub short_body: ShortBodyPolicy,
    pub login_marker: String,
}

impl FetchPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_factor: config.backoff_factor,
            backoff_cap: Duration::from_secs_f64(config.backoff_cap_seconds),
            body_min_size: config.body_min_size,
            login_redirect: config.login_redirect,
            short_body: config.short_body,
            login_marker: config.login_marker.clone(),
        }
    }

    /// Delay before retry `retry` (1-based): `factor * 2^(retry-1)`, capped,
    /// plus up to 10% jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(30) as i32;
        let base = (self.backoff_factor * 2f64.powi(exponent)).min(self.backoff_cap.as_secs_f64());
        let jitter = if base > 0.0 {
            rand::thread_rng().gen_range(0.0..=base * 0.1)
        } else {
            0.0
        };
        Duration::from_secs_f64(base + jitter)
    }

    fn on_login_page(&self) -> FetchFailure {
        match self.login_redirect {
            LoginRedirectPolicy::AuthExpired => FetchFailure::AuthExpired,
            LoginRedirectPolicy::NotFound => FetchFailure::NotFound(NotFoundReason::LoginRedirect),
        }
    }

    fn on_short_body(&self) -> FetchFailure {
        match self.short_body {
            ShortBodyPolicy::Transient => FetchFailure::Transient(TransientKind::ShortBody),
            ShortBodyPolicy::NotFound => FetchFailure::NotFound(NotFoundReason::EmptyBody),
        }
    }
}

/// Decrements the in-flight gauge when a request finishes
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shared by all workers; per-worker state lives in the session handle
pub struct Fetcher {
    policy: FetchPolicy,
    template: UrlTemplate,
    pool: Arc<SessionPool>,
    extractor: Arc<dyn Extractor>,
    global_semaphore: Arc<Semaphore>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Fetcher {
    /// Creates a fetcher
    ///
    /// # Arguments
    ///
    /// * `policy` - Retry and classification policy
    /// * `template` - Endpoint template, one placeholder for the target
    /// * `pool` - Session pool, consulted for the auth exhaustion probe
    /// * `extractor` - The sweep's extractor
    /// * `max_in_flight` - Global cap on concurrent HTTP requests (the worker count)
    pub fn new(
        policy: FetchPolicy,
        template: UrlTemplate,
        pool: Arc<SessionPool>,
        extractor: Arc<dyn Extractor>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            policy,
            template,
            pool,
            extractor,
            global_semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn extractor(&self) -> &Arc<dyn Extractor> {
        &self.extractor
    }

    /// Highest number of simultaneous requests observed so far
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Fetches one target, retrying transient failures
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | 2xx, body ≥ min size | Success |
    /// | 2xx, short body | `short_body` policy (transient by default) |
    /// | Login page / login redirect | `login_redirect` policy (auth expired by default) |
    /// | 301/302/303/307/308 | Follow once; a second redirect is permanent |
    /// | 400, 422 | Permanent (bad request) |
    /// | 401 | Auth expired |
    /// | 403 | Permanent (forbidden) |
    /// | 404 | Not found, no retry |
    /// | 408, 429, 5xx, timeout, reset | Retry up to `max_retries` |
    /// | Other | Permanent (unknown) |
    ///
    /// Cancellation is honoured during backoff sleeps, never mid-request; the
    /// last transient failure is returned.
    pub async fn fetch(
        &self,
        session: &SessionHandle,
        target: u64,
        cancel: &CancellationToken,
    ) -> FetchReport {
        let url = self.template.render(target);
        let mut retries = 0;

        loop {
            let result = self.attempt(session, &url).await;

            let kind = match result {
                Err(FetchFailure::Transient(kind)) => kind,
                other => return FetchReport { result: other, retries },
            };
            let result = Err(FetchFailure::Transient(kind));

            if retries >= self.policy.max_retries {
                tracing::debug!(id = target, retries, kind = kind.as_str(), "Retries exhausted");
                return FetchReport { result, retries };
            }

            retries += 1;
            let delay = self.policy.backoff(retries);
            tracing::debug!(
                id = target,
                retry = retries,
                kind = kind.as_str(),
                delay_ms = delay.as_millis() as u64,
                "Transient failure, backing off"
            );

            tokio::select! {
                _ = cancel.cancelled() => return FetchReport { result, retries: retries - 1 },
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One HTTP attempt, following at most one redirect
    ///
    /// Pacing happens before the global permit is taken; the permit is held
    /// until the body has been read.
    async fn attempt(&self, session: &SessionHandle, url: &str) -> Result<RawResponse, FetchFailure> {
        session.pace().await;

        let _permit = self
            .global_semaphore
            .acquire()
            .await
            .map_err(|_| FetchFailure::Transient(TransientKind::Connect))?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _gauge = InFlight(&self.in_flight);

        let result = self.attempt_inner(session, url).await;

        // Network errors say nothing about authentication
        let answered = !matches!(
            result,
            Err(FetchFailure::Transient(
                TransientKind::Timeout | TransientKind::Connect | TransientKind::ConnectionReset
            ))
        );
        if answered {
            let authenticated = !matches!(
                result,
                Err(FetchFailure::AuthExpired)
                    | Err(FetchFailure::NotFound(NotFoundReason::LoginRedirect))
            );
            if let Err(e) = self.pool.observe_auth(authenticated) {
                return Err(FetchFailure::AuthExhausted(e.to_string()));
            }
        }

        result
    }

    async fn attempt_inner(
        &self,
        session: &SessionHandle,
        url: &str,
    ) -> Result<RawResponse, FetchFailure> {
        let response = self.send(session, url).await?;

        if !is_redirect(response.status()) {
            return self.classify(response).await;
        }

        let next = self.redirect_target(&response)?;
        tracing::trace!(from = %url, to = %next, "Following redirect");

        let response = self.send(session, next.as_str()).await?;
        if is_redirect(response.status()) {
            // A chain ending on the login page is still a login redirect
            self.redirect_target(&response)?;
            return Err(FetchFailure::Permanent(PermanentKind::Redirect));
        }
        self.classify(response).await
    }

    async fn send(
        &self,
        session: &SessionHandle,
        url: &str,
    ) -> Result<reqwest::Response, FetchFailure> {
        tracing::trace!(url, session = session.id(), "GET");
        session
            .client()
            .get(url)
            .send()
            .await
            .map_err(classify_network_error)
    }

    /// Resolves the `Location` of a redirect, spotting login redirects
    fn redirect_target(&self, response: &reqwest::Response) -> Result<Url, FetchFailure> {
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(FetchFailure::Permanent(PermanentKind::Redirect))?;

        let next = response
            .url()
            .join(location)
            .map_err(|_| FetchFailure::Permanent(PermanentKind::Redirect))?;

        if next.path().to_ascii_lowercase().contains("login") {
            return Err(self.policy.on_login_page());
        }
        Ok(next)
    }

    /// Applies the status table to a non-redirect response
    async fn classify(&self, response: reqwest::Response) -> Result<RawResponse, FetchFailure> {
        let status = response.status();

        match status.as_u16() {
            200..=299 => {}
            400 | 422 => {
                return Err(FetchFailure::Permanent(PermanentKind::BadRequest(
                    status.as_u16(),
                )))
            }
            401 => return Err(FetchFailure::AuthExpired),
            403 => return Err(FetchFailure::Permanent(PermanentKind::Forbidden)),
            404 => return Err(FetchFailure::NotFound(NotFoundReason::Absent)),
            429 => return Err(FetchFailure::Transient(TransientKind::RateLimited)),
            408 | 500..=599 => {
                return Err(FetchFailure::Transient(TransientKind::Server(
                    status.as_u16(),
                )))
            }
            other => return Err(FetchFailure::Permanent(PermanentKind::Unknown(other))),
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(classify_network_error)?
            .to_vec();

        if contains(&body, self.policy.login_marker.as_bytes()) {
            return Err(self.policy.on_login_page());
        }
        let min_size = self
            .extractor
            .min_body_size()
            .unwrap_or(self.policy.body_min_size);
        if body.len() < min_size {
            return Err(self.policy.on_short_body());
        }

        let expects = self.extractor.expects();
        if expects != ContentExpectation::Any && !expects.accepts(content_type.as_deref()) {
            return Err(FetchFailure::Permanent(PermanentKind::ContentType));
        }

        Ok(RawResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }

    /// Runs the extractor behind a panic boundary
    ///
    /// # Returns
    ///
    /// * `Ok(Extraction)` - Filtered, or rows conforming to the declared schema
    /// * `Err(PermanentKind::Extract)` - The extractor failed, panicked, or
    ///   produced rows with a foreign schema
    pub fn extract(&self, target: u64, raw: &RawResponse) -> Result<Extraction, PermanentKind> {
        self.run_extractor(target, raw).map_err(|e| {
            match &e {
                ExtractError::Panicked(_) => {
                    tracing::error!(id = target, error = %e, "Extractor panicked")
                }
                _ => tracing::warn!(id = target, error = %e, "Extractor failed"),
            }
            PermanentKind::Extract
        })
    }

    fn run_extractor(&self, target: u64, raw: &RawResponse) -> Result<Extraction, ExtractError> {
        let extractor = &self.extractor;
        let extraction = catch_unwind(AssertUnwindSafe(|| {
            extractor.extract(target, &raw.body, raw.content_type.as_deref())
        }))
        .map_err(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            ExtractError::Panicked(message)
        })??;

        match extraction {
            Extraction::Rows(rows) if rows.is_empty() => Ok(Extraction::Filtered),
            Extraction::Rows(rows) => {
                let schema = extractor.schema();
                if rows.iter().any(|r| **r.schema() != *schema) {
                    return Err(ExtractError::SchemaMismatch);
                }
                Ok(Extraction::Rows(rows))
            }
            Extraction::Filtered => Ok(Extraction::Filtered),
        }
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

fn classify_network_error(error: reqwest::Error) -> FetchFailure {
    let kind = if error.is_timeout() {
        TransientKind::Timeout
    } else if error.is_connect() {
        TransientKind::Connect
    } else {
        TransientKind::ConnectionReset
    };
    tracing::trace!(error = %error, kind = kind.as_str(), "Network error");
    FetchFailure::Transient(kind)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}
