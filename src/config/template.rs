//! Endpoint templates with a single positional target placeholder

use crate::ConfigError;
use std::fmt;
use url::Url;

const PLACEHOLDERS: [&str; 2] = ["{id}", "{}"];

/// A URL template carrying exactly one placeholder for the target ID
///
/// Both `{}` and `{id}` are accepted, e.g.
/// `https://host/grp_musical/editar/{}` or
/// `https://host/igrejas/filtra_igreja_setor?id_igreja={id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    prefix: String,
    suffix: String,
}

impl UrlTemplate {
    /// Parses a template, rejecting zero or multiple placeholders and
    /// templates that do not render to an http(s) URL.
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        let mut found = None;
        for placeholder in PLACEHOLDERS {
            let count = template.matches(placeholder).count();
            if count > 1 || (count == 1 && found.is_some()) {
                return Err(ConfigError::InvalidTemplate(format!(
                    "'{}' must contain exactly one placeholder",
                    template
                )));
            }
            if count == 1 {
                found = Some(placeholder);
            }
        }

        let placeholder = found.ok_or_else(|| {
            ConfigError::InvalidTemplate(format!(
                "'{}' has no {{}} or {{id}} placeholder",
                template
            ))
        })?;

        let (prefix, suffix) = template
            .split_once(placeholder)
            .ok_or_else(|| ConfigError::InvalidTemplate(template.to_string()))?;

        let parsed = Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        };

        let probe = Url::parse(&parsed.render(1)).map_err(|e| {
            ConfigError::InvalidTemplate(format!("'{}' does not form a URL: {}", template, e))
        })?;
        if probe.scheme() != "http" && probe.scheme() != "https" {
            return Err(ConfigError::InvalidTemplate(format!(
                "'{}' must use http or https",
                template
            )));
        }

        Ok(parsed)
    }

    /// Substitutes the target into the template
    pub fn render(&self, target: u64) -> String {
        format!("{}{}{}", self.prefix, target, self.suffix)
    }

    /// The `scheme://host[:port]/` origin of the template, used as a default referer
    pub fn origin(&self) -> Option<String> {
        let url = Url::parse(&self.render(1)).ok()?;
        Some(format!("{}/", url.origin().ascii_serialization()))
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{}}{}", self.prefix, self.suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_path_placeholder() {
        let template =
            UrlTemplate::parse("https://musical.example.org/grp_musical/editar/{}").unwrap();
        assert_eq!(
            template.render(603084),
            "https://musical.example.org/grp_musical/editar/603084"
        );
    }

    #[test]
    fn test_render_named_placeholder_in_query() {
        let template =
            UrlTemplate::parse("https://host.example/igrejas/filtra_igreja_setor?id_igreja={id}")
                .unwrap();
        assert_eq!(
            template.render(42),
            "https://host.example/igrejas/filtra_igreja_setor?id_igreja=42"
        );
    }

    #[test]
    fn test_missing_placeholder_rejected() {
        let result = UrlTemplate::parse("https://host.example/turmas/editar/");
        assert!(matches!(result, Err(ConfigError::InvalidTemplate(_))));
    }

    #[test]
    fn test_two_placeholders_rejected() {
        assert!(UrlTemplate::parse("https://host.example/{}/{id}").is_err());
        assert!(UrlTemplate::parse("https://host.example/{}/{}").is_err());
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        assert!(UrlTemplate::parse("ftp://host.example/{}").is_err());
    }

    #[test]
    fn test_origin() {
        let template = UrlTemplate::parse("http://127.0.0.1:8080/item/{}").unwrap();
        assert_eq!(template.origin().as_deref(), Some("http://127.0.0.1:8080/"));
    }
}
