//! Per-target outcome definitions
//!
//! Every target ends the sweep with exactly one terminal outcome. Workers never
//! surface per-target failures as errors; they build one of these values and
//! hand it to the registry.

use std::fmt;

/// The outcome of processing one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Target was not fetched (already visited or over its failure cap)
    Skipped(SkipReason),

    /// Endpoint answered "absent", or the extractor filtered the target out
    NotFound(NotFoundReason),

    /// Extractor produced rows for this target
    Record { rows: usize },

    /// Retryable failure; only terminal once the failure cap is reached
    TransientError(TransientKind),

    /// Non-retryable failure
    PermanentError(PermanentKind),
}

/// Why a target was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    AlreadyVisited,
    OverFailureCap,
}

/// Why a target counts as absent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotFoundReason {
    /// HTTP 404
    Absent,
    /// Extractor returned no rows
    Filtered,
    /// Redirected to (or served) the login page, with the `not-found` policy
    LoginRedirect,
    /// Empty or short body, with the `not-found` policy
    EmptyBody,
}

/// Retryable failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientKind {
    ConnectionReset,
    Timeout,
    Connect,
    RateLimited,
    Server(u16),
    ShortBody,
}

/// Non-retryable failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermanentKind {
    BadRequest(u16),
    Forbidden,
    Unknown(u16),
    ContentType,
    Extract,
    /// Redirect chain longer than one hop
    Redirect,
    /// 401 or login redirect when auth expiry is not fatal
    AuthExpired,
}

/// Reporting bucket for an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutcomeCategory {
    Record,
    NotFound,
    Filtered,
    Skipped,
    TransientFailed,
    Permanent,
}

impl Outcome {
    /// Returns the reporting category of this outcome
    pub fn category(&self) -> OutcomeCategory {
        match self {
            Self::Record { .. } => OutcomeCategory::Record,
            Self::NotFound(NotFoundReason::Filtered) => OutcomeCategory::Filtered,
            Self::NotFound(_) => OutcomeCategory::NotFound,
            Self::Skipped(_) => OutcomeCategory::Skipped,
            Self::TransientError(_) => OutcomeCategory::TransientFailed,
            Self::PermanentError(_) => OutcomeCategory::Permanent,
        }
    }

    /// Returns true for outcomes that always mark the target visited
    ///
    /// Transient errors become terminal only when the failure cap is reached,
    /// which the registry decides.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::TransientError(_) | Self::Skipped(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientError(_))
    }
}

impl TransientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionReset => "connection_reset",
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::RateLimited => "rate_limited",
            Self::Server(_) => "server",
            Self::ShortBody => "short_body",
        }
    }
}

impl PermanentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Forbidden => "forbidden",
            Self::Unknown(_) => "unknown",
            Self::ContentType => "content_type",
            Self::Extract => "extract",
            Self::Redirect => "redirect",
            Self::AuthExpired => "auth_expired",
        }
    }
}

impl NotFoundReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Filtered => "filtered",
            Self::LoginRedirect => "login_redirect",
            Self::EmptyBody => "empty_body",
        }
    }
}

impl OutcomeCategory {
    /// Converts the category to its report label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::NotFound => "not_found",
            Self::Filtered => "filtered",
            Self::Skipped => "skipped",
            Self::TransientFailed => "transient_failed",
            Self::Permanent => "permanent",
        }
    }

    /// Returns all categories in report order
    pub fn all() -> [Self; 6] {
        [
            Self::Record,
            Self::NotFound,
            Self::Filtered,
            Self::Skipped,
            Self::TransientFailed,
            Self::Permanent,
        ]
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped(SkipReason::AlreadyVisited) => write!(f, "skipped(already_visited)"),
            Self::Skipped(SkipReason::OverFailureCap) => write!(f, "skipped(over_failure_cap)"),
            Self::NotFound(reason) => write!(f, "not_found({})", reason.as_str()),
            Self::Record { rows } => write!(f, "record({} rows)", rows),
            Self::TransientError(TransientKind::Server(status)) => {
                write!(f, "transient(server {})", status)
            }
            Self::TransientError(kind) => write!(f, "transient({})", kind.as_str()),
            Self::PermanentError(PermanentKind::BadRequest(status)) => {
                write!(f, "permanent(bad_request {})", status)
            }
            Self::PermanentError(PermanentKind::Unknown(status)) => {
                write!(f, "permanent(unknown {})", status)
            }
            Self::PermanentError(kind) => write!(f, "permanent({})", kind.as_str()),
        }
    }
}

impl fmt::Display for OutcomeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
