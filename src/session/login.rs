//! Login collaborator contract and its built-in implementations
//!
//! The interactive browser login lives outside this crate. What the sweep
//! needs from it is an opaque cookie set and, optionally, the User-Agent the
//! cookies were issued to. Two implementations ship here:
//!
//! - [`StaticCookies`]: cookies exported from a browser (inline or Netscape file)
//! - [`FormLogin`]: posts the login form directly and keeps the session cookies

use crate::session::cookies::CookieSet;
use crate::AuthError;
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Credentials consumed by a login provider
#[derive(Clone, Default)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// What a successful login hands to the session pool
#[derive(Debug, Clone)]
pub struct LoginSession {
    pub cookies: CookieSet,
    pub user_agent: Option<String>,
}

/// External login collaborator, invoked once before the sweep starts running
#[async_trait]
pub trait LoginProvider: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<LoginSession, AuthError>;
}

/// Cookies obtained out of band
#[derive(Debug, Clone)]
pub struct StaticCookies {
    cookies: CookieSet,
    user_agent: Option<String>,
}

impl StaticCookies {
    pub fn new(cookies: CookieSet) -> Self {
        Self {
            cookies,
            user_agent: None,
        }
    }

    /// Parses an inline `name=value; ...` header
    pub fn from_header(header: &str) -> Result<Self, AuthError> {
        Ok(Self::new(CookieSet::parse_header(header)?))
    }

    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        Ok(Self::new(CookieSet::from_netscape_file(path)?))
    }

    /// The User-Agent the cookies were issued to, if it must be replayed
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

#[async_trait]
impl LoginProvider for StaticCookies {
    async fn login(&self, _credentials: &Credentials) -> Result<LoginSession, AuthError> {
        tracing::debug!(cookies = self.cookies.len(), "Using static cookie set");
        Ok(LoginSession {
            cookies: self.cookies.clone(),
            user_agent: self.user_agent.clone(),
        })
    }
}

/// Submits the site's login form (`login` / `password` fields)
#[derive(Debug, Clone)]
pub struct FormLogin {
    login_url: Url,
    user_agent: String,
    login_marker: String,
    timeout: Duration,
}

impl FormLogin {
    /// Creates a form login against `login_url`
    ///
    /// # Arguments
    ///
    /// * `login_url` - URL the form posts to
    /// * `user_agent` - User-Agent presented at login and replayed by the sweep
    /// * `login_marker` - Substring that identifies the login page
    /// * `timeout` - Request timeout
    pub fn new(
        login_url: Url,
        user_agent: impl Into<String>,
        login_marker: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            login_url,
            user_agent: user_agent.into(),
            login_marker: login_marker.into(),
            timeout,
        }
    }
}

#[async_trait]
impl LoginProvider for FormLogin {
    async fn login(&self, credentials: &Credentials) -> Result<LoginSession, AuthError> {
        if credentials.login.is_empty() || credentials.password.is_empty() {
            return Err(AuthError::LoginFailed(
                "login and password are required for form login".to_string(),
            ));
        }

        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .build()
            .map_err(|e| AuthError::LoginFailed(e.to_string()))?;

        tracing::info!(url = %self.login_url, user = %credentials.login, "Submitting login form");

        let response = client
            .post(self.login_url.clone())
            .form(&[
                ("login", credentials.login.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::LoginFailed(e.to_string()))?;

        let status = response.status();
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::LoginFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::LoginFailed(format!(
                "login form answered HTTP {}",
                status.as_u16()
            )));
        }
        if body.contains(&self.login_marker) {
            return Err(AuthError::LoginFailed(
                "credentials rejected (still on the login page)".to_string(),
            ));
        }

        let header = jar
            .cookies(&final_url)
            .or_else(|| jar.cookies(&self.login_url))
            .and_then(|value| value.to_str().ok().map(str::to_string))
            .unwrap_or_default();
        let cookies = CookieSet::parse_header(&header)?;

        if cookies.is_empty() {
            return Err(AuthError::LoginFailed(
                "login succeeded but no session cookie was set".to_string(),
            ));
        }

        tracing::info!(cookies = cookies.len(), "Login succeeded");
        Ok(LoginSession {
            cookies,
            user_agent: Some(self.user_agent.clone()),
        })
    }
}
