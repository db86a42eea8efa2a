//! Maps remote failures to a [`FailureKind`].
//!
//! The remote service does not return structured errors, so the default rules
//! match status codes and message fragments. Swap in another
//! [`ErrorClassifier`] when talking to a service with a different error shape.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{generator::GenerationError, types::FailureKind};

/// What a failed remote call tells us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSignal {
    pub status: Option<u16>,
    pub message: String,
}

impl FailureSignal {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<&GenerationError> for FailureSignal {
    fn from(err: &GenerationError) -> Self {
        Self::new(err.status, err.message.clone())
    }
}

pub trait ErrorClassifier: Send + Sync + 'static {
    fn classify(&self, signal: &FailureSignal) -> FailureKind;

    /// Server-suggested wait before retrying a rate-limited call, in seconds.
    fn suggested_retry_delay(&self, signal: &FailureSignal) -> Option<f64> {
        suggested_retry_delay(&signal.message)
    }
}

const DAILY_MARKERS: &[&str] = &["per day", "per_day", "perday", "daily"];
const AUTH_MARKERS: &[&str] = &[
    "permission denied",
    "permission_denied",
    "api key not valid",
    "unauthenticated",
];
const RATE_LIMIT_MARKERS: &[&str] = &[
    "resource_exhausted",
    "rate limit",
    "too many requests",
    "quota",
];
const OVERLOAD_MARKERS: &[&str] = &["overloaded", "unavailable"];

/// Case-insensitive substring rules.
///
/// Daily quota is checked first since its messages also look like rate
/// limits. A known status code then decides; message text is the fallback,
/// where status codes only count as whole numbers (`84037` is not a 403).
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringClassifier;

impl ErrorClassifier for SubstringClassifier {
    fn classify(&self, signal: &FailureSignal) -> FailureKind {
        let message = signal.message.to_lowercase();
        let any = |markers: &[&str]| markers.iter().any(|m| message.contains(m));
        let code = |code: &str| {
            message
                .split(|c: char| !c.is_ascii_digit())
                .any(|token| token == code)
        };

        if is_daily_quota(&message, any(DAILY_MARKERS)) {
            return FailureKind::DailyQuotaExceeded;
        }

        match signal.status {
            Some(401 | 403) => return FailureKind::AuthDenied,
            Some(429) => return FailureKind::RateLimited,
            Some(503) => return FailureKind::ServiceOverloaded,
            _ => {}
        }

        if code("403") || any(AUTH_MARKERS) {
            FailureKind::AuthDenied
        } else if code("429") || any(RATE_LIMIT_MARKERS) {
            FailureKind::RateLimited
        } else if code("503") || any(OVERLOAD_MARKERS) {
            FailureKind::ServiceOverloaded
        } else {
            FailureKind::Unknown
        }
    }
}

fn is_daily_quota(message: &str, has_daily_marker: bool) -> bool {
    (message.contains("quota") && has_daily_marker)
        || (message.contains("daily") && message.contains("limit"))
}

static RETRY_DELAY_PATTERNS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)retry in\s+([0-9]+(?:\.[0-9]+)?)\s*s").expect("valid regex"),
        Regex::new(r#"(?i)"?retry_?delay"?\s*:\s*"?([0-9]+(?:\.[0-9]+)?)\s*s"#).expect("valid regex"),
    ]
});

/// Extract a delay such as `retry in 12.3s` or `"retryDelay": "12s"`.
pub fn suggested_retry_delay(message: &str) -> Option<f64> {
    RETRY_DELAY_PATTERNS.iter().find_map(|re| {
        re.captures(message)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    })
}
