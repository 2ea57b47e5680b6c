//! Opaque cookie sets handed over by the login collaborator
//!
//! A [`CookieSet`] can be built from an inline `Cookie` header
//! (`name=value; name2=value2`) or from a Netscape-format cookie file exported
//! from a browser (7 TAB-separated fields per line). Values are never logged:
//! `Debug` prints cookie names only.

use crate::AuthError;
use std::fmt;
use std::io::BufRead;
use std::path::Path;

#[derive(Clone, PartialEq, Eq)]
struct Cookie {
    name: String,
    value: String,
    /// `None` for host-only cookies taken from an inline header
    domain: Option<String>,
}

impl Cookie {
    fn matches_host(&self, host: &str) -> bool {
        match &self.domain {
            None => true,
            Some(domain) => {
                let domain = domain.trim_start_matches('.');
                host.eq_ignore_ascii_case(domain)
                    || host
                        .to_ascii_lowercase()
                        .ends_with(&format!(".{}", domain.to_ascii_lowercase()))
            }
        }
    }
}

/// A read-only set of session cookies
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CookieSet {
    cookies: Vec<Cookie>,
}

impl CookieSet {
    /// Parses an inline `Cookie` header value
    ///
    /// Empty input yields an empty set; the session pool rejects empty sets.
    pub fn parse_header(header: &str) -> Result<Self, AuthError> {
        let mut cookies = Vec::new();
        for pair in header.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                AuthError::InvalidCookies(format!("'{}' is not a name=value pair", redact(pair)))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(AuthError::InvalidCookies("empty cookie name".to_string()));
            }
            cookies.push(Cookie {
                name: name.to_string(),
                value: value.trim().to_string(),
                domain: None,
            });
        }
        Ok(Self { cookies })
    }

    /// Parses a Netscape cookie file
    ///
    /// Comment lines, blank lines and malformed lines are skipped; a file with
    /// data lines but no valid cookie is an error. The `#HttpOnly_` prefix
    /// some browsers write is understood.
    pub fn parse_netscape(reader: impl BufRead) -> Result<Self, AuthError> {
        let mut cookies = Vec::new();
        let mut data_lines = 0usize;

        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| AuthError::InvalidCookies(e.to_string()))?;
            let line = line.trim_end();
            let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            data_lines += 1;

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 7 || fields[0].is_empty() || fields[5].is_empty() {
                tracing::warn!(
                    line = idx + 1,
                    fields = fields.len(),
                    "Skipping malformed cookie line"
                );
                continue;
            }

            cookies.push(Cookie {
                name: fields[5].to_string(),
                value: fields[6].to_string(),
                domain: Some(fields[0].to_string()),
            });
        }

        if cookies.is_empty() && data_lines > 0 {
            return Err(AuthError::InvalidCookies(format!(
                "no valid cookies in {} data lines",
                data_lines
            )));
        }

        Ok(Self { cookies })
    }

    /// Reads and parses a Netscape cookie file from disk
    pub fn from_netscape_file(path: &Path) -> Result<Self, AuthError> {
        let file = std::fs::File::open(path).map_err(|e| {
            AuthError::InvalidCookies(format!("cannot open {}: {}", path.display(), e))
        })?;
        Self::parse_netscape(std::io::BufReader::new(file))
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.cookies.iter().map(|c| c.name.as_str()).collect()
    }

    /// Builds the `Cookie` header value sent to `host`
    ///
    /// # Returns
    ///
    /// `None` if no cookie in the set applies to the host
    pub fn header_for(&self, host: &str) -> Option<String> {
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|c| c.matches_host(host))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

impl fmt::Debug for CookieSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieSet")
            .field("names", &self.names())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

fn redact(pair: &str) -> String {
    match pair.split_once('=') {
        Some((name, _)) => format!("{}=[REDACTED]", name),
        None => format!("{}…", pair.chars().take(8).collect::<String>()),
    }
}
