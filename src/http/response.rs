//! Mapping guard outcomes onto HTTP responses.
//!
//! # Responsibilities
//! - Status code per `GuardError` variant
//! - JSON error body with the human-facing reason
//! - `X-RateLimit-*` and `Retry-After` headers from a rate decision
//!
//! # Design Decisions
//! - Internal failures never echo their cause to the client
//! - Rate headers are added on allow and on deny

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::GuardError;
use crate::security::rate_limit::RateLimitDecision;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

impl GuardError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GuardError::Validation { .. } | GuardError::Decryption(_) => StatusCode::BAD_REQUEST,
            GuardError::Blocked { .. } => StatusCode::FORBIDDEN,
            GuardError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GuardError::AuditSinkUnavailable(_) | GuardError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GuardError::Crypto(_) | GuardError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            GuardError::Validation { reason, category } => json!({
                "error": reason,
                "category": category.map(|c| c.as_str()),
            }),
            GuardError::RateLimitExceeded { reason, .. } | GuardError::Blocked { reason, .. } => {
                json!({ "error": reason })
            }
            GuardError::Decryption(_) => json!({ "error": "Invalid token" }),
            _ => {
                tracing::error!(error = %self, "Request failed inside the guard");
                json!({ "error": "Security check unavailable" })
            }
        };

        let mut response = (status, Json(body)).into_response();
        match &self {
            GuardError::RateLimitExceeded { retry_after_secs, .. } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            GuardError::StoreUnavailable(_) => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(1u64));
            }
            _ => {}
        }
        response
    }
}

/// Attach the rate-limit view of a decision to outgoing headers.
pub fn apply_rate_headers(headers: &mut HeaderMap, rate: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(rate.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(rate.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(rate.reset_at.timestamp()));
    if !rate.allowed {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(rate.retry_after_secs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::patterns::ThreatCategory;
    use chrono::Utc;

    #[test]
    fn test_status_mapping() {
        let err = GuardError::Validation {
            reason: "bad".into(),
            category: Some(ThreatCategory::Xss),
        };
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err = GuardError::RateLimitExceeded {
            reason: "Rate limit exceeded".into(),
            limit: 100,
            retry_after_secs: 60,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");

        let err = GuardError::Blocked {
            reason: "IP address is blocked".into(),
            risk_score: 0,
        };
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_rate_headers() {
        let rate = RateLimitDecision {
            allowed: true,
            limit: 100,
            remaining: 42,
            reset_at: Utc::now(),
            retry_after_secs: 0,
            count: 58,
            reason: None,
            degraded: false,
        };
        let mut headers = HeaderMap::new();
        apply_rate_headers(&mut headers, &rate);
        assert_eq!(headers[X_RATELIMIT_LIMIT], "100");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "42");
        assert!(headers.get(header::RETRY_AFTER).is_none());
    }
}
