//! Authenticated HTTP sessions
//!
//! This module covers everything between the credentials and a ready-to-use
//! HTTP client:
//! - Cookie sets and their parsers (`cookies`)
//! - The login collaborator contract and its implementations (`login`)
//! - The session pool handed to workers (`pool`)

mod cookies;
mod login;
mod pool;

pub use cookies::CookieSet;
pub use login::{Credentials, FormLogin, LoginProvider, LoginSession, StaticCookies};
pub use pool::{SessionHandle, SessionPool};

use crate::config::Config;
use crate::ConfigError;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Builds credentials from the `[credentials]` section
pub fn credentials_from_config(config: &Config) -> Credentials {
    Credentials {
        login: config.credentials.login.clone().unwrap_or_default(),
        password: config.credentials.password.clone().unwrap_or_default(),
    }
}

/// Selects the login provider described by the `[session]` section
///
/// Inline cookies win over a cookie file, which wins over form login.
///
/// # Returns
///
/// * `Ok(Arc<dyn LoginProvider>)` - The provider to run before the sweep
/// * `Err(ConfigError)` - No cookie source is configured, or it cannot be read
pub fn provider_from_config(config: &Config) -> Result<Arc<dyn LoginProvider>, ConfigError> {
    let session = &config.session;

    if let Some(header) = &session.cookies {
        let provider = StaticCookies::from_header(header)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        return Ok(Arc::new(provider));
    }

    if let Some(path) = &session.cookie_file {
        let provider =
            StaticCookies::from_file(path).map_err(|e| ConfigError::Validation(e.to_string()))?;
        return Ok(Arc::new(provider));
    }

    if let Some(login_url) = &session.login_url {
        let url = Url::parse(login_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", login_url, e)))?;
        return Ok(Arc::new(FormLogin::new(
            url,
            config.http.user_agent.clone(),
            config.http.login_marker.clone(),
            Duration::from_secs_f64(config.http.request_timeout_seconds),
        )));
    }

    Err(ConfigError::Validation(
        "no cookie source configured: set session.cookies, session.cookie-file or session.login-url"
            .to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_cookie_source() {
        let config = Config::default();
        assert!(matches!(
            provider_from_config(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_inline_cookies_selected() {
        let mut config = Config::default();
        config.session.cookies = Some("ci_session=abc".to_string());
        config.session.login_url = Some("https://host.example/login".to_string());
        assert!(provider_from_config(&config).is_ok());
    }

    #[test]
    fn test_missing_cookie_file() {
        let mut config = Config::default();
        config.session.cookie_file = Some("/nonexistent/cookies.txt".into());
        assert!(provider_from_config(&config).is_err());
    }

    #[test]
    fn test_credentials_from_config() {
        let mut config = Config::default();
        config.credentials.login = Some("user".to_string());
        let credentials = credentials_from_config(&config);
        assert_eq!(credentials.login, "user");
        assert!(credentials.password.is_empty());
    }
}
