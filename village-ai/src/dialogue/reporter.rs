//! Rate-limited surfacing of generation failures to the end user.

use crate::error::ProviderError;
use crate::host::NoticeSink;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// User-facing category of a generation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials rejected
    InvalidApiKey,
    /// Provider unreachable or too slow
    ConnectionError,
    /// Provider throttled us
    RateLimit,
    /// Provider answered with an error
    ProviderError,
    /// Anything else
    Generic,
}

impl ErrorKind {
    /// Classify a typed provider error, falling back to message keywords.
    pub fn classify(error: &ProviderError) -> Self {
        match error {
            ProviderError::AuthenticationFailed { .. } => Self::InvalidApiKey,
            ProviderError::Api { status: 401 | 403, .. } => Self::InvalidApiKey,
            ProviderError::RateLimited { .. } | ProviderError::Api { status: 429, .. } => Self::RateLimit,
            ProviderError::Network(_) | ProviderError::Timeout { .. } => Self::ConnectionError,
            ProviderError::Api { .. } | ProviderError::EmptyResponse | ProviderError::Parse(_) => Self::ProviderError,
            ProviderError::Panicked { .. } => Self::ProviderError,
            other => Self::classify_message(&other.to_string()),
        }
    }

    /// Keyword classification of a free-form error message.
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("api key") || lower.contains("unauthorized") || lower.contains("401") {
            Self::InvalidApiKey
        } else if lower.contains("rate limit") || lower.contains("429") {
            Self::RateLimit
        } else if lower.contains("timeout") || lower.contains("timed out") || lower.contains("connection") {
            Self::ConnectionError
        } else if lower.contains("provider") || lower.contains("api error") {
            Self::ProviderError
        } else {
            Self::Generic
        }
    }

    /// Notice title
    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidApiKey => "Invalid API key",
            Self::ConnectionError => "Connection problem",
            Self::RateLimit => "Rate limited",
            Self::ProviderError => "Provider error",
            Self::Generic => "Dialogue error",
        }
    }

    /// Notice body
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::InvalidApiKey => "The dialogue provider rejected the configured API key.",
            Self::ConnectionError => "Could not reach the dialogue provider. Villagers will stay quiet for now.",
            Self::RateLimit => "The dialogue provider is throttling requests. Try again shortly.",
            Self::ProviderError => "The dialogue provider returned an error.",
            Self::Generic => "Dynamic dialogue failed. Villagers will use simple responses.",
        }
    }
}

/// Surfaces each [`ErrorKind`] at most once per cooldown.
pub struct ErrorReporter {
    cooldown: Duration,
    last_reported: DashMap<ErrorKind, Instant>,
    sink: Option<Arc<dyn NoticeSink>>,
    reported: AtomicU64,
    suppressed: AtomicU64,
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("cooldown", &self.cooldown)
            .field("has_sink", &self.sink.is_some())
            .field("reported", &self.reported())
            .field("suppressed", &self.suppressed())
            .finish()
    }
}

impl ErrorReporter {
    /// Reporter with no notice channel; it still tracks throttling.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_reported: DashMap::new(),
            sink: None,
            reported: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Send surfaced notices to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn NoticeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Classify `error` and surface it unless its kind is cooling down.
    /// Returns whether a notice went out.
    pub fn report(&self, error: &ProviderError) -> bool {
        let kind = ErrorKind::classify(error);
        let now = Instant::now();
        let surfaced = match self.last_reported.entry(kind) {
            Entry::Occupied(mut last) => {
                if now.duration_since(*last.get()) >= self.cooldown {
                    last.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        };

        if !surfaced {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(kind = ?kind, "suppressed repeated dialogue error notice");
            return false;
        }

        self.reported.fetch_add(1, Ordering::Relaxed);
        info!(kind = ?kind, error = %error, "surfacing dialogue error notice");
        if let Some(sink) = &self.sink {
            sink.notify(kind.title(), kind.default_message());
        }
        true
    }

    /// Notices sent so far
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }

    /// Notices swallowed by the cooldown
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// Forget cooldown state
    pub fn reset(&self) {
        self.last_reported.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotices;

    #[test]
    fn test_classify_typed_errors() {
        let auth = ProviderError::AuthenticationFailed { reason: "bad key".into() };
        assert_eq!(ErrorKind::classify(&auth), ErrorKind::InvalidApiKey);
        let limited = ProviderError::RateLimited { retry_after: None };
        assert_eq!(ErrorKind::classify(&limited), ErrorKind::RateLimit);
        let slow = ProviderError::Timeout { duration: Duration::from_secs(1) };
        assert_eq!(ErrorKind::classify(&slow), ErrorKind::ConnectionError);
        let server = ProviderError::Api { status: 500, message: "boom".into() };
        assert_eq!(ErrorKind::classify(&server), ErrorKind::ProviderError);
        let panicked = ProviderError::Panicked { message: "request timeout".into() };
        assert_eq!(ErrorKind::classify(&panicked), ErrorKind::ProviderError);
    }

    #[test]
    fn test_classify_message_keywords() {
        assert_eq!(ErrorKind::classify_message("Invalid API key"), ErrorKind::InvalidApiKey);
        assert_eq!(ErrorKind::classify_message("connection refused"), ErrorKind::ConnectionError);
        assert_eq!(ErrorKind::classify_message("something odd"), ErrorKind::Generic);
        let config = ProviderError::Configuration("missing api key".into());
        assert_eq!(ErrorKind::classify(&config), ErrorKind::InvalidApiKey);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_is_per_kind() {
        let notices = Arc::new(RecordingNotices::default());
        let reporter = ErrorReporter::new(Duration::from_secs(30)).with_sink(notices.clone());
        let network = ProviderError::Network("reset".into());
        let limited = ProviderError::RateLimited { retry_after: None };

        assert!(reporter.report(&network));
        assert!(!reporter.report(&network));
        assert!(reporter.report(&limited));
        assert_eq!(notices.count(), 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(reporter.report(&network));
        assert_eq!(notices.count(), 3);
        assert_eq!(reporter.suppressed(), 1);
        assert_eq!(reporter.reported(), 3);
    }
}
