//! HTTP session pool
//!
//! Every handle owns a `reqwest::Client` configured with the shared cookie set,
//! the default browser headers, a connection pool sized for the workers it
//! serves, and its own inter-request pacer. Handles are safe to share: the pool
//! hands the least-loaded handle to each worker that asks.

use crate::config::{Config, UrlTemplate, DEFAULT_USER_AGENT};
use crate::session::cookies::CookieSet;
use crate::{AuthError, SweepError};
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// One pooled HTTP session
#[derive(Debug)]
pub struct SessionHandle {
    id: usize,
    client: reqwest::Client,
    min_interval: Duration,
    /// Issue time of the last request; `None` until the first one
    last_issue: Mutex<Option<Instant>>,
    leases: AtomicUsize,
}

impl SessionHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Waits until at least `min_interval` has passed since the previous issue
    /// on this session, then records the new issue time
    ///
    /// The lock is held across the sleep so concurrent callers queue up and
    /// are spaced one interval apart.
    pub async fn pace(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last = self.last_issue.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub fn leases(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }
}

/// Tracks whether any of the first `window` responses was authenticated
#[derive(Debug)]
struct AuthProbe {
    window: usize,
    observed: AtomicUsize,
    authenticated: AtomicBool,
}

impl AuthProbe {
    fn observe(&self, authenticated: bool) -> Result<(), AuthError> {
        if authenticated {
            self.authenticated.store(true, Ordering::SeqCst);
        }
        if self.authenticated.load(Ordering::SeqCst) {
            return Ok(());
        }

        let observed = self.observed.fetch_add(1, Ordering::SeqCst) + 1;
        if observed >= self.window {
            return Err(AuthError::Exhausted(format!(
                "none of the first {} responses was authenticated",
                self.window
            )));
        }
        Ok(())
    }
}

/// Pool of session handles sharing one cookie set
#[derive(Debug)]
pub struct SessionPool {
    handles: Vec<Arc<SessionHandle>>,
    probe: AuthProbe,
}

impl SessionPool {
    /// Builds the pool
    ///
    /// # Arguments
    ///
    /// * `config` - Effective configuration (session count, timeouts, headers)
    /// * `template` - Endpoint template; its host scopes the cookies and default referer
    /// * `cookies` - Cookie set from the login collaborator
    /// * `user_agent` - User-Agent the cookies were issued to, if any
    ///
    /// # Returns
    ///
    /// * `Ok(SessionPool)` - Ready to hand out handles
    /// * `Err(SweepError::Auth)` - The cookie set is empty or does not apply to the host
    pub fn new(
        config: &Config,
        template: &UrlTemplate,
        cookies: &CookieSet,
        user_agent: Option<&str>,
    ) -> Result<Self, SweepError> {
        if cookies.is_empty() {
            return Err(AuthError::Exhausted("cookie set is empty".to_string()).into());
        }

        let sample = Url::parse(&template.render(1))
            .map_err(|e| crate::ConfigError::InvalidTemplate(e.to_string()))?;
        let host = sample.host_str().unwrap_or_default().to_string();
        let cookie_header = cookies.header_for(&host).ok_or_else(|| {
            AuthError::Exhausted(format!("no cookie in the set applies to {}", host))
        })?;

        let sessions = config.effective_sessions();
        let workers = config.sweep.worker_count.max(1);
        let per_session = workers.div_ceil(sessions);

        let referer = config.http.referer.clone().or_else(|| template.origin());
        let user_agent = user_agent
            .map(str::to_string)
            .unwrap_or_else(|| config.http.user_agent.clone());
        let headers = default_headers(&user_agent, referer.as_deref(), &cookie_header)?;

        let mut handles = Vec::with_capacity(sessions);
        for id in 0..sessions {
            let client = reqwest::Client::builder()
                .default_headers(headers.clone())
                .timeout(Duration::from_secs_f64(config.http.request_timeout_seconds))
                .redirect(reqwest::redirect::Policy::none())
                .pool_max_idle_per_host(per_session)
                .build()?;

            handles.push(Arc::new(SessionHandle {
                id,
                client,
                min_interval: Duration::from_millis(config.http.min_interval_ms),
                last_issue: Mutex::new(None),
                leases: AtomicUsize::new(0),
            }));
        }

        tracing::info!(
            sessions,
            per_session,
            cookies = cookies.len(),
            host = %host,
            "Session pool ready"
        );

        Ok(Self {
            handles,
            probe: AuthProbe {
                window: config.session.auth_probe_window.max(1),
                observed: AtomicUsize::new(0),
                authenticated: AtomicBool::new(false),
            },
        })
    }

    /// Hands out the handle with the fewest current leases
    pub fn acquire(&self) -> Arc<SessionHandle> {
        let handle = self
            .handles
            .iter()
            .min_by_key(|h| h.leases())
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.handles[0]));
        handle.leases.fetch_add(1, Ordering::SeqCst);
        handle
    }

    pub fn release(&self, handle: &SessionHandle) {
        let _ = handle
            .leases
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Feeds one response into the exhaustion probe
    ///
    /// Fails with `AuthError::Exhausted` once `auth_probe_window` responses
    /// have been observed without a single authenticated one.
    pub fn observe_auth(&self, authenticated: bool) -> Result<(), AuthError> {
        self.probe.observe(authenticated)
    }
}

fn default_headers(
    user_agent: &str,
    referer: Option<&str>,
    cookie_header: &str,
) -> Result<HeaderMap, AuthError> {
    let invalid = |what: &str| AuthError::InvalidCookies(format!("invalid {} header", what));

    let mut headers = HeaderMap::new();
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_str(user_agent)
            .or_else(|_| HeaderValue::from_str(DEFAULT_USER_AGENT))
            .map_err(|_| invalid("user-agent"))?,
    );
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_ENCODING,
        HeaderValue::from_static("gzip, deflate, br"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Some(referer) = referer {
        headers.insert(
            header::REFERER,
            HeaderValue::from_str(referer).map_err(|_| invalid("referer"))?,
        );
    }

    let mut cookie = HeaderValue::from_str(cookie_header).map_err(|_| invalid("cookie"))?;
    cookie.set_sensitive(true);
    headers.insert(header::COOKIE, cookie);

    Ok(headers)
}
