//! The shared error taxonomy used by provider adapters, the rate limiter,
//! the model processor, and the orchestrator.
//!
//! Every error that can surface from a model unit is categorized onto one
//! of two axes: the *transport* axis (what went wrong with the provider
//! call itself) and the *content* axis (what was wrong with a response the
//! call successfully returned). A single [`OrchestratorError`] carries one
//! [`ErrorKind`] plus an optional model name and the underlying message.

use std::fmt;

/// Transport-axis and content-axis error categories.
///
/// Callers branch on this enum instead of matching provider-specific types
/// or scanning error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // Transport axis: what went wrong with the provider call.
    Auth,
    RateLimit,
    InputLimit,
    ContentFiltered,
    Network,
    Server,
    NotFound,
    Cancelled,
    InvalidRequest,
    Unknown,
    // Content axis: the call succeeded but the response was unusable.
    EmptyResponse,
    SafetyBlocked,
    WhitespaceContent,
}

impl ErrorKind {
    /// Short explanation plus an actionable suggestion, used when rendering
    /// audit entries and user-facing failure messages.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            ErrorKind::RateLimit => Some("adjust concurrency and rate-limit flags"),
            ErrorKind::InputLimit => Some("reduce context via include/exclude"),
            ErrorKind::Auth => Some("check API key"),
            ErrorKind::ContentFiltered | ErrorKind::SafetyBlocked => {
                Some("review and modify input")
            }
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Auth => "Auth",
            ErrorKind::RateLimit => "RateLimit",
            ErrorKind::InputLimit => "InputLimit",
            ErrorKind::ContentFiltered => "ContentFiltered",
            ErrorKind::Network => "Network",
            ErrorKind::Server => "Server",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::Unknown => "Unknown",
            ErrorKind::EmptyResponse => "EmptyResponse",
            ErrorKind::SafetyBlocked => "SafetyBlocked",
            ErrorKind::WhitespaceContent => "WhitespaceContent",
        };
        f.write_str(s)
    }
}

/// A categorized failure, optionally attributed to a model name.
///
/// `Display` renders as `model <name>: <message>` when a model is attached,
/// matching the prefix the orchestrator expects when aggregating unit
/// failures (§7 propagation rule).
#[derive(Debug)]
pub struct OrchestratorError {
    pub kind: ErrorKind,
    pub model: Option<String>,
    pub message: String,
    /// Blocked safety categories, populated only for `SafetyBlocked`.
    pub blocked_categories: Vec<String>,
}

impl OrchestratorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            model: None,
            message: message.into(),
            blocked_categories: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_blocked_categories(mut self, categories: Vec<String>) -> Self {
        self.blocked_categories = categories;
        self
    }

    /// The `Error.Type` string embedded in audit entries, e.g. `ExecutionError:RateLimit`.
    pub fn audit_type(&self) -> String {
        format!("ExecutionError:{}", self.kind)
    }

    /// Human-facing message: short explanation + actionable suggestion for
    /// categorized errors, the raw message otherwise.
    pub fn user_message(&self) -> String {
        match self.kind.suggestion() {
            Some(suggestion) => format!("{} ({suggestion})", self.message),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "model {model}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for OrchestratorError {}

/// Typed check for a content-axis empty-response failure.
pub fn is_empty_response_error(err: &OrchestratorError) -> bool {
    err.kind == ErrorKind::EmptyResponse
}

/// Typed check for a content-axis safety-block failure.
pub fn is_safety_blocked_error(err: &OrchestratorError) -> bool {
    err.kind == ErrorKind::SafetyBlocked
}

/// The blocked categories and message for a safety/empty-response error, for
/// callers that want to surface details without matching on `ErrorKind`.
pub fn error_details(err: &OrchestratorError) -> (String, Vec<String>) {
    (err.message.clone(), err.blocked_categories.clone())
}

/// Deprecated substring sniffing for providers that have not been wrapped
/// with typed errors yet. Never call this when a typed check is available.
#[deprecated(note = "prefer is_empty_response_error / is_safety_blocked_error")]
pub fn classify_by_message(message: &str) -> Option<ErrorKind> {
    const EMPTY_MARKERS: &[&str] = &[
        "empty response",
        "empty content",
        "zero candidates",
        "no output",
    ];
    const SAFETY_MARKERS: &[&str] = &[
        "safety",
        "content policy",
        "content filter",
        "moderation",
        "blocked",
        "filtered",
        "harm_category",
    ];
    let lower = message.to_lowercase();
    if SAFETY_MARKERS.iter().any(|m| lower.contains(m)) {
        Some(ErrorKind::SafetyBlocked)
    } else if EMPTY_MARKERS.iter().any(|m| lower.contains(m)) {
        Some(ErrorKind::EmptyResponse)
    } else {
        None
    }
}

/// The composite error the orchestrator returns after fan-out, listing every
/// failed unit (§4.5 step 7).
#[derive(Debug)]
pub struct AggregateError {
    pub errors: Vec<OrchestratorError>,
}

impl AggregateError {
    pub fn new(errors: Vec<OrchestratorError>) -> Self {
        Self { errors }
    }

    fn mentions_rate_limit(&self) -> bool {
        self.errors.iter().any(|e| e.kind == ErrorKind::RateLimit)
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "errors occurred during model processing:")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {err}")?;
        }
        if self.mentions_rate_limit() {
            write!(
                f,
                "\nhint: consider tuning max_concurrent_requests/rate_limit_requests_per_minute"
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_model_name() {
        let err = OrchestratorError::new(ErrorKind::Auth, "invalid key").with_model("gpt-4o");
        assert_eq!(err.to_string(), "model gpt-4o: invalid key");
    }

    #[test]
    fn aggregate_lists_every_suberror() {
        let agg = AggregateError::new(vec![
            OrchestratorError::new(ErrorKind::Auth, "bad key").with_model("a"),
            OrchestratorError::new(ErrorKind::RateLimit, "too fast").with_model("b"),
        ]);
        let rendered = agg.to_string();
        assert!(rendered.starts_with("errors occurred during model processing:"));
        assert!(rendered.contains("  - model a: bad key"));
        assert!(rendered.contains("  - model b: too fast"));
        assert!(rendered.contains("hint:"));
    }

    #[test]
    fn suggestions_are_actionable() {
        assert_eq!(
            ErrorKind::RateLimit.suggestion(),
            Some("adjust concurrency and rate-limit flags")
        );
        assert_eq!(ErrorKind::Network.suggestion(), None);
    }

    #[allow(deprecated)]
    #[test]
    fn deprecated_fallback_classifies_known_substrings() {
        assert_eq!(
            classify_by_message("request was blocked by safety filters"),
            Some(ErrorKind::SafetyBlocked)
        );
        assert_eq!(
            classify_by_message("model returned empty response"),
            Some(ErrorKind::EmptyResponse)
        );
        assert_eq!(classify_by_message("connection reset"), None);
    }
}
