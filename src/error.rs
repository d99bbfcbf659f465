use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Failure taxonomy for summarization requests. Every error the service can
/// surface is one of these kinds; severity and remediation are derived from
/// the kind, never stored independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimit,
    ServerUnavailable,
    InvalidCredential,
    Authorization,
    InvalidUrl,
    InvalidContent,
    NotFound,
    QuotaExceeded,
    ContentFilter,
    CrossOriginBlocked,
    ConfigError,
    CacheError,
    Unknown,
}

/// Retry-worthiness of a failure. Temporary errors may be retried by user
/// action; fixable and critical ones must not be silently retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Temporary,
    Fixable,
    Critical,
}

impl ErrorKind {
    /// Static kind -> severity table.
    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::Network
            | ErrorKind::Timeout
            | ErrorKind::RateLimit
            | ErrorKind::ServerUnavailable => Severity::Temporary,
            ErrorKind::InvalidCredential
            | ErrorKind::Authorization
            | ErrorKind::InvalidUrl
            | ErrorKind::InvalidContent
            | ErrorKind::NotFound => Severity::Fixable,
            ErrorKind::QuotaExceeded
            | ErrorKind::ContentFilter
            | ErrorKind::CrossOriginBlocked
            | ErrorKind::ConfigError
            | ErrorKind::CacheError
            | ErrorKind::Unknown => Severity::Critical,
        }
    }

    /// Troubleshooting checklist shown alongside the error message.
    pub fn remediation_steps(self) -> Vec<String> {
        let steps: &[&str] = match self {
            ErrorKind::Network => &[
                "Make sure your internet connection is working",
                "Try again once connectivity is restored",
            ],
            ErrorKind::Timeout => &[
                "The AI service might be experiencing high load",
                "Try again in a few minutes",
            ],
            ErrorKind::RateLimit => &[
                "Wait for the indicated cooldown before retrying",
                "Reduce how often you request summaries",
            ],
            ErrorKind::ServerUnavailable => &[
                "The AI service is experiencing issues",
                "Try again later",
            ],
            ErrorKind::InvalidCredential | ErrorKind::Authorization => &[
                "Verify that your API key is valid and correctly configured",
                "Update your API key in the configuration",
            ],
            ErrorKind::InvalidUrl => &[
                "Check that the shared URL is a valid web article",
                "Make sure the URL includes the scheme (https://)",
            ],
            ErrorKind::InvalidContent => &[
                "The provider rejected the request content",
                "Try a different article",
            ],
            ErrorKind::NotFound => &["The requested resource no longer exists at the provider"],
            ErrorKind::QuotaExceeded => &[
                "Your provider quota or billing limit has been reached",
                "Check your plan and billing details with the provider",
            ],
            ErrorKind::ContentFilter => &[
                "The provider's content policy blocked this article",
                "Try a different article",
            ],
            ErrorKind::CrossOriginBlocked => &["The request was blocked by a cross-origin policy"],
            ErrorKind::ConfigError => &["Configure an AI provider before requesting summaries"],
            ErrorKind::CacheError => &["Summary caching failed; results are not affected"],
            ErrorKind::Unknown => &[
                "Make sure your internet connection is working",
                "Verify that your API key is valid and correctly configured",
                "Try again later if the AI service might be experiencing high load",
            ],
        };
        steps.iter().map(|s| s.to_string()).collect()
    }
}

/// A failure with its classification attached. Immutable once constructed;
/// severity and remediation always agree with the kind.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub remediation: Vec<String>,
    /// Cooldown hint in seconds, only present for rate-limit errors.
    pub retry_after_secs: Option<u64>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            message: message.into(),
            remediation: kind.remediation_steps(),
            retry_after_secs: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Self {
        let mut err = Self::new(ErrorKind::RateLimit, message);
        err.retry_after_secs = Some(retry_after_secs);
        err
    }

    /// Whether a user-triggered retry is worthwhile.
    pub fn is_retryable(&self) -> bool {
        self.severity == Severity::Temporary
    }
}

pub type Result<T> = std::result::Result<T, ClassifiedError>;

/// The parts of an HTTP response the classifier inspects.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub retry_after_secs: Option<u64>,
    pub body: String,
}

/// Classifies a raw failure into the typed taxonomy.
///
/// Pure and total: any combination of inputs produces some ClassifiedError.
/// With no response, the raw error text is matched against transport
/// signatures. With a response, the HTTP status drives the primary dispatch
/// and body phrases override it for content-filter and quota failures.
pub fn classify(raw_error: &str, response: Option<&RawResponse>) -> ClassifiedError {
    let Some(resp) = response else {
        return classify_transport_text(raw_error);
    };

    let body_lower = resp.body.to_lowercase();

    // Body phrases take precedence over the status code. Providers report
    // policy and quota failures under several different statuses.
    if is_content_filter_phrase(&body_lower) {
        return ClassifiedError::new(
            ErrorKind::ContentFilter,
            "The provider's content policy blocked this request",
        );
    }
    if is_quota_phrase(&body_lower) {
        return ClassifiedError::new(
            ErrorKind::QuotaExceeded,
            "Provider quota exceeded. Check your plan and billing details.",
        );
    }

    match resp.status {
        401 => ClassifiedError::new(
            ErrorKind::InvalidCredential,
            "Invalid API key. Please update your API key in the configuration.",
        ),
        403 => ClassifiedError::new(
            ErrorKind::Authorization,
            "The provider rejected the request as unauthorized",
        ),
        429 => ClassifiedError::rate_limited(
            "API rate limit exceeded. Please try again later.",
            resp.retry_after_secs.unwrap_or(60),
        ),
        400 => {
            if body_lower.contains("url") {
                ClassifiedError::new(
                    ErrorKind::InvalidUrl,
                    "Invalid article URL. Please make sure you're sharing a valid web article.",
                )
            } else {
                ClassifiedError::new(
                    ErrorKind::InvalidContent,
                    "The provider rejected the request format",
                )
            }
        }
        402 => ClassifiedError::new(
            ErrorKind::QuotaExceeded,
            "Provider quota exceeded. Check your plan and billing details.",
        ),
        404 => ClassifiedError::new(ErrorKind::NotFound, "Provider endpoint or model not found"),
        500..=599 => ClassifiedError::new(
            ErrorKind::ServerUnavailable,
            "The AI service is experiencing issues. Please try again later.",
        ),
        status => {
            ClassifiedError::new(ErrorKind::Unknown, format!("Error ({status}): {raw_error}"))
        }
    }
}

fn classify_transport_text(raw_error: &str) -> ClassifiedError {
    let lower = raw_error.to_lowercase();
    if lower.contains("cors") || lower.contains("cross-origin") {
        return ClassifiedError::new(
            ErrorKind::CrossOriginBlocked,
            "The request was blocked by a cross-origin policy",
        );
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return ClassifiedError::new(
            ErrorKind::Timeout,
            "Request timed out. The AI service might be experiencing high load.",
        );
    }
    if lower.contains("networkerror")
        || lower.contains("failed to fetch")
        || lower.contains("connection")
        || lower.contains("dns")
    {
        return ClassifiedError::new(
            ErrorKind::Network,
            "Network connection error. Please check your internet connection.",
        );
    }
    ClassifiedError::new(ErrorKind::Unknown, raw_error.to_string())
}

/// Maps a reqwest transport failure (no response received) onto the taxonomy.
pub fn classify_reqwest(err: &reqwest::Error) -> ClassifiedError {
    if err.is_timeout() {
        return ClassifiedError::new(
            ErrorKind::Timeout,
            "Request timed out. The AI service might be experiencing high load.",
        );
    }
    if err.is_connect() {
        return ClassifiedError::new(
            ErrorKind::Network,
            "Network connection error. Please check your internet connection.",
        );
    }
    classify_transport_text(&err.to_string())
}

fn is_content_filter_phrase(body_lower: &str) -> bool {
    body_lower.contains("content policy")
        || body_lower.contains("content_policy")
        || body_lower.contains("content_filter")
        || body_lower.contains("content management policy")
        || body_lower.contains("flagged")
}

fn is_quota_phrase(body_lower: &str) -> bool {
    body_lower.contains("insufficient_quota")
        || body_lower.contains("quota")
        || body_lower.contains("billing")
        || body_lower.contains("exceeded your current")
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(rename = "errorType", skip_serializing_if = "Option::is_none")]
    error_type: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    troubleshooting: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retryable: Option<bool>,
}

impl IntoResponse for ClassifiedError {
    fn into_response(self) -> Response {
        let (status, body) = match self.kind {
            ErrorKind::ConfigError => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: self.message,
                    retry_after: None,
                    error_type: None,
                    severity: None,
                    troubleshooting: None,
                    retryable: None,
                },
            ),
            ErrorKind::RateLimit => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorResponse {
                    error: self.message,
                    retry_after: self.retry_after_secs,
                    error_type: None,
                    severity: None,
                    troubleshooting: None,
                    retryable: None,
                },
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: self.message,
                    retry_after: None,
                    error_type: Some(self.kind),
                    severity: Some(self.severity),
                    troubleshooting: Some(self.remediation),
                    retryable: Some(self.severity == Severity::Temporary),
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            retry_after_secs: None,
            body: body.to_string(),
        }
    }

    #[test]
    fn transport_errors_match_signatures() {
        assert_eq!(classify("Failed to fetch", None).kind, ErrorKind::Network);
        assert_eq!(classify("request timed out", None).kind, ErrorKind::Timeout);
        assert_eq!(
            classify("blocked by CORS policy", None).kind,
            ErrorKind::CrossOriginBlocked
        );
        assert_eq!(classify("something odd", None).kind, ErrorKind::Unknown);
    }

    #[test]
    fn status_dispatch_covers_the_table() {
        assert_eq!(
            classify("", Some(&resp(401, ""))).kind,
            ErrorKind::InvalidCredential
        );
        assert_eq!(
            classify("", Some(&resp(403, ""))).kind,
            ErrorKind::Authorization
        );
        assert_eq!(
            classify("", Some(&resp(402, ""))).kind,
            ErrorKind::QuotaExceeded
        );
        assert_eq!(classify("", Some(&resp(404, ""))).kind, ErrorKind::NotFound);
        assert_eq!(
            classify("", Some(&resp(503, ""))).kind,
            ErrorKind::ServerUnavailable
        );
        assert_eq!(classify("", Some(&resp(418, ""))).kind, ErrorKind::Unknown);
    }

    #[test]
    fn bad_request_splits_on_message_content() {
        assert_eq!(
            classify("", Some(&resp(400, "the url parameter is malformed"))).kind,
            ErrorKind::InvalidUrl
        );
        assert_eq!(
            classify("", Some(&resp(400, "messages array empty"))).kind,
            ErrorKind::InvalidContent
        );
    }

    #[test]
    fn body_phrases_override_status() {
        assert_eq!(
            classify("", Some(&resp(400, "request flagged by moderation"))).kind,
            ErrorKind::ContentFilter
        );
        assert_eq!(
            classify("", Some(&resp(429, "you exceeded your current quota"))).kind,
            ErrorKind::QuotaExceeded
        );
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let r = RawResponse {
            status: 429,
            retry_after_secs: Some(17),
            body: String::new(),
        };
        let err = classify("", Some(&r));
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert_eq!(err.retry_after_secs, Some(17));
        assert!(err.is_retryable());
    }

    #[test]
    fn classification_is_deterministic() {
        let r = resp(400, "invalid url shape");
        let a = classify("boom", Some(&r));
        let b = classify("boom", Some(&r));
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.severity, b.severity);
    }

    #[test]
    fn severity_follows_kind() {
        assert_eq!(ErrorKind::Network.severity(), Severity::Temporary);
        assert_eq!(ErrorKind::InvalidUrl.severity(), Severity::Fixable);
        assert_eq!(ErrorKind::QuotaExceeded.severity(), Severity::Critical);
        assert_eq!(ErrorKind::Unknown.severity(), Severity::Critical);
        assert!(!ClassifiedError::new(ErrorKind::InvalidCredential, "x").is_retryable());
    }
}
