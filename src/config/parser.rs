use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Reads and parses a configuration file without validating it
///
/// Used by the CLI, which layers flag overrides on top of the file before
/// validating the merged result.
pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use id_sweep::config::load_config;
///
/// let config = load_config(Path::new("sweep.toml")).unwrap();
/// println!("Workers: {}", config.sweep.worker_count);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let config = read_config(path)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 fingerprint of the effective configuration
///
/// Secrets (password, inline cookies) are skipped during serialization, so
/// the fingerprint can be published alongside sweep metadata.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 of the serialized configuration
/// * `Err(ConfigError)` - The configuration could not be serialized
pub fn config_fingerprint(config: &Config) -> Result<String, ConfigError> {
    let serialized = toml::to_string(config)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const VALID: &str = r#"
[credentials]
login = "someone@example.com"
password = "hunter2"

[sweep]
id-range = [1, 50000]
worker-count = 12
batch-inner = 250
endpoint-template = "https://musical.example.org/grp_musical/editar/{}"
extractor = "members"

[http]
min-interval-ms = 40
login-redirect = "not-found"

[publisher]
endpoint = "https://sink.example.org/exec"
batch-publish = 2000
"#;

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(VALID);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.sweep.id_range, (1, 50000));
        assert_eq!(config.sweep.worker_count, 12);
        assert_eq!(config.sweep.batch_inner, 250);
        assert_eq!(config.http.min_interval_ms, 40);
        assert_eq!(
            config.http.login_redirect,
            crate::config::LoginRedirectPolicy::NotFound
        );
        assert_eq!(config.publisher.batch_publish, 2000);
        // Untouched sections fall back to defaults
        assert_eq!(config.http.max_retries, 3);
        assert_eq!(config.sweep.max_attempts_per_target, 3);
        assert!(config.sweep.fatal_abort_on_auth_expired);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/sweep.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let file = create_temp_config(
            r#"
[sweep]
id-range = [10, 1]
endpoint-template = "https://host.example/{}"
"#,
        );
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_fingerprint_is_stable_and_excludes_password() {
        let file = create_temp_config(VALID);
        let config = load_config(file.path()).unwrap();

        let first = config_fingerprint(&config).unwrap();
        let second = config_fingerprint(&config).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);

        let mut other_password = config.clone();
        other_password.credentials.password = Some("different".to_string());
        assert_eq!(config_fingerprint(&other_password).unwrap(), first);

        let mut other_range = config.clone();
        other_range.sweep.id_range = (1, 10);
        assert_ne!(config_fingerprint(&other_range).unwrap(), first);
    }
}
