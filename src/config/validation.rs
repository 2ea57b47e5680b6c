use crate::config::template::UrlTemplate;
use crate::config::types::{Config, HttpConfig, PublisherConfig, SessionConfig, SweepConfig};
use crate::extract;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_sweep_config(&config.sweep)?;
    validate_http_config(&config.http)?;
    validate_session_config(&config.session)?;
    validate_publisher_config(&config.publisher)?;
    if config.output.report_samples == 0 {
        return Err(ConfigError::Validation(
            "report_samples must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Validates the sweep shape, template and extractor selection
fn validate_sweep_config(config: &SweepConfig) -> Result<(), ConfigError> {
    let (lo, hi) = config.id_range;

    if lo < 1 {
        return Err(ConfigError::Validation(format!(
            "id_range start must be >= 1, got {}",
            lo
        )));
    }

    if lo > hi {
        return Err(ConfigError::Validation(format!(
            "id_range start {} is greater than end {}",
            lo, hi
        )));
    }

    if config.worker_count < 1 {
        return Err(ConfigError::Validation(
            "worker_count must be >= 1".to_string(),
        ));
    }

    if config.batch_inner < 1 {
        return Err(ConfigError::Validation(
            "batch_inner must be >= 1".to_string(),
        ));
    }

    if config.max_attempts_per_target < 1 {
        return Err(ConfigError::Validation(
            "max_attempts_per_target must be >= 1".to_string(),
        ));
    }

    if config.endpoint_template.is_empty() {
        return Err(ConfigError::Validation(
            "endpoint_template cannot be empty".to_string(),
        ));
    }
    UrlTemplate::parse(&config.endpoint_template)?;

    if !extract::is_registered(&config.extractor) {
        return Err(ConfigError::UnknownExtractor {
            id: config.extractor.clone(),
            available: extract::available_extractors().join(", "),
        });
    }

    Ok(())
}

/// Validates fetcher timing and retry settings
fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if !(config.request_timeout_seconds > 0.0) || !config.request_timeout_seconds.is_finite() {
        return Err(ConfigError::Validation(format!(
            "request_timeout_seconds must be > 0, got {}",
            config.request_timeout_seconds
        )));
    }

    if !(config.backoff_factor >= 0.0) || !config.backoff_factor.is_finite() {
        return Err(ConfigError::Validation(format!(
            "backoff_factor must be >= 0, got {}",
            config.backoff_factor
        )));
    }

    if !(config.backoff_cap_seconds >= 0.0) || !config.backoff_cap_seconds.is_finite() {
        return Err(ConfigError::Validation(format!(
            "backoff_cap_seconds must be >= 0, got {}",
            config.backoff_cap_seconds
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.login_marker.is_empty() {
        return Err(ConfigError::Validation(
            "login_marker cannot be empty".to_string(),
        ));
    }

    if let Some(referer) = &config.referer {
        validate_http_url("referer", referer)?;
    }

    Ok(())
}

fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.sessions == Some(0) {
        return Err(ConfigError::Validation("sessions must be >= 1".to_string()));
    }

    if config.auth_probe_window < 1 {
        return Err(ConfigError::Validation(
            "auth_probe_window must be >= 1".to_string(),
        ));
    }

    if let Some(login_url) = &config.login_url {
        validate_http_url("login_url", login_url)?;
    }

    Ok(())
}

fn validate_publisher_config(config: &PublisherConfig) -> Result<(), ConfigError> {
    if config.batch_publish < 1 {
        return Err(ConfigError::Validation(
            "batch_publish must be >= 1".to_string(),
        ));
    }

    if !(config.publish_backoff_factor >= 0.0) || !config.publish_backoff_factor.is_finite() {
        return Err(ConfigError::Validation(format!(
            "publish_backoff_factor must be >= 0, got {}",
            config.publish_backoff_factor
        )));
    }

    if !(config.publish_timeout_seconds > 0.0) || !config.publish_timeout_seconds.is_finite() {
        return Err(ConfigError::Validation(format!(
            "publish_timeout_seconds must be > 0, got {}",
            config.publish_timeout_seconds
        )));
    }

    if let Some(endpoint) = &config.endpoint {
        validate_http_url("publisher endpoint", endpoint)?;
    }

    Ok(())
}

/// Validates that a configured URL parses and uses http(s)
fn validate_http_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", name, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            name, value
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        let mut config = Config::default();
        config.sweep.id_range = (1, 100);
        config.sweep.endpoint_template = "https://host.example/grp_musical/editar/{}".to_string();
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&create_valid_config()).is_ok());
    }

    #[test]
    fn test_default_config_is_invalid() {
        // No range and no template
        assert!(validate(&Config::default()).is_err());
    }

    #[test]
    fn test_range_must_start_at_one() {
        let mut config = create_valid_config();
        config.sweep.id_range = (0, 10);
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_single_id_range_is_valid() {
        let mut config = create_valid_config();
        config.sweep.id_range = (100, 100);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = create_valid_config();
        config.sweep.worker_count = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batches_rejected() {
        let mut config = create_valid_config();
        config.sweep.batch_inner = 0;
        assert!(validate(&config).is_err());

        let mut config = create_valid_config();
        config.publisher.batch_publish = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_extractor_rejected() {
        let mut config = create_valid_config();
        config.sweep.extractor = "nope".to_string();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::UnknownExtractor { .. })
        ));
    }

    #[test]
    fn test_bad_template_rejected() {
        let mut config = create_valid_config();
        config.sweep.endpoint_template = "https://host.example/no-placeholder".to_string();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn test_negative_backoff_rejected() {
        let mut config = create_valid_config();
        config.http.backoff_factor = -1.0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_publisher_endpoint_must_be_http() {
        let mut config = create_valid_config();
        config.publisher.endpoint = Some("mailto:someone@example.com".to_string());
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_zero_sessions_rejected() {
        let mut config = create_valid_config();
        config.session.sessions = Some(0);
        assert!(validate(&config).is_err());
    }
}
