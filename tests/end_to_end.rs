//! Full-pipeline scenarios against in-memory collaborators.

mod common;

use common::{config_with_blocked, TestGuard};
use request_guard::audit::{AuditEventType, Severity};
use request_guard::config::GuardConfig;
use request_guard::error::GuardError;
use request_guard::guard::{Denial, Identity};
use request_guard::observability::metrics::{RATE_LIMIT_VIOLATIONS, VALIDATION_REJECTIONS};
use request_guard::security::patterns::ThreatCategory;
use request_guard::security::threat::RequestMetadata;

#[tokio::test]
async fn test_blocked_ip_is_rejected_and_audited_once() {
    let harness = TestGuard::new(config_with_blocked(&["203.0.113.5"]));
    let request = RequestMetadata::new("203.0.113.5", "GET", "/profile");

    let decision = harness
        .guard
        .evaluate(&request, &Identity::Anonymous)
        .await
        .unwrap();

    assert!(!decision.allowed);
    assert_eq!(decision.reason.as_deref(), Some("IP address is blocked"));
    assert_eq!(decision.denial, Some(Denial::IpRejected));

    let blocked = harness.events_of(AuditEventType::IpBlocked).await;
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].ip_address.as_deref(), Some("203.0.113.5"));
    assert!(harness
        .events_of(AuditEventType::RequestProcessed)
        .await
        .is_empty());
}

#[tokio::test]
async fn test_hundred_and_first_request_is_rate_limited() {
    let harness = TestGuard::new(GuardConfig::default());
    let user = Identity::User("u1".into());
    let request = RequestMetadata::new("198.51.100.7", "POST", "/upload");

    for i in 0..100 {
        let decision = harness.guard.evaluate(&request, &user).await.unwrap();
        assert!(decision.allowed, "request {} should pass", i + 1);
    }

    let decision = harness.guard.evaluate(&request, &user).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason.as_deref(), Some("Rate limit exceeded"));
    let rate = decision.rate_info.clone().expect("rate info on a rate denial");
    assert_eq!(rate.remaining, 0);
    assert_eq!(rate.limit, 100);

    match decision.into_result() {
        Err(GuardError::RateLimitExceeded {
            retry_after_secs, ..
        }) => assert_eq!(retry_after_secs, 60),
        other => panic!("expected rate limit error, got {:?}", other),
    }

    assert_eq!(harness.metrics.total(RATE_LIMIT_VIOLATIONS), 1);
    let violations = harness.events_of(AuditEventType::RateLimitExceeded).await;
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].actor, "u1");
}

#[tokio::test]
async fn test_window_slides_after_expiry() {
    let mut config = GuardConfig::default();
    config.rate_limit.requests_per_window = 2;
    let harness = TestGuard::new(config);
    let user = Identity::User("u2".into());
    let request = RequestMetadata::new("198.51.100.8", "GET", "/feed");

    for _ in 0..2 {
        assert!(harness.guard.evaluate(&request, &user).await.unwrap().allowed);
    }
    assert!(!harness.guard.evaluate(&request, &user).await.unwrap().allowed);

    harness.clock.advance(chrono::Duration::seconds(61));
    assert!(harness.guard.evaluate(&request, &user).await.unwrap().allowed);
}

#[tokio::test]
async fn test_script_field_is_rejected_as_xss() {
    let harness = TestGuard::new(GuardConfig::default());
    let request = RequestMetadata::new("198.51.100.9", "POST", "/comment")
        .with_field("body", "<script>alert(1)</script>");

    let decision = harness
        .guard
        .evaluate(&request, &Identity::User("u3".into()))
        .await
        .unwrap();

    assert!(!decision.allowed);
    assert_eq!(decision.category, Some(ThreatCategory::Xss));
    assert_eq!(decision.denial, Some(Denial::InvalidInput));
    assert_eq!(harness.metrics.counter(VALIDATION_REJECTIONS, &[("category", "xss")]), 1);

    let rejected = harness.events_of(AuditEventType::InputRejected).await;
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].severity, Severity::High);
    assert_eq!(rejected[0].details["field"], "body");
}

#[tokio::test]
async fn test_clean_fields_come_back_sanitized() {
    let harness = TestGuard::new(GuardConfig::default());
    let request = RequestMetadata::new("198.51.100.10", "GET", "/search")
        .with_field("q", "  rust   \u{0}async  ")
        .with_request_id("req-42");

    let decision = harness
        .guard
        .evaluate(&request, &Identity::Anonymous)
        .await
        .unwrap();

    assert!(decision.allowed);
    assert_eq!(decision.sanitized_fields["q"], "rust async");

    let processed = harness.events_of(AuditEventType::RequestProcessed).await;
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].action, "GET /search");
    assert_eq!(processed[0].request_id.as_deref(), Some("req-42"));
}

#[tokio::test]
async fn test_stacked_signals_block_request() {
    let mut config = GuardConfig::default();
    config.threat.suspicious_ips = vec!["192.0.2.66".into()];
    let harness = TestGuard::new(config);
    let request = RequestMetadata::new("192.0.2.66", "GET", "/admin")
        .with_user_agent("python-requests/2.31")
        .with_header("referer", "javascript:alert(1)")
        .with_header("x-original-url", "../../etc/passwd");

    let decision = harness
        .guard
        .evaluate(&request, &Identity::Anonymous)
        .await
        .unwrap();

    assert!(!decision.allowed);
    assert_eq!(decision.denial, Some(Denial::HighRisk));
    assert!(decision.risk_score >= 50);
    assert!(matches!(
        decision.into_result(),
        Err(GuardError::Blocked { .. })
    ));
    assert_eq!(harness.events_of(AuditEventType::HighRiskRequest).await.len(), 1);
}

#[tokio::test]
async fn test_audit_outage_surfaces_under_fail_request() {
    let mut config = GuardConfig::default();
    config.audit.failure_policy = request_guard::config::AuditFailurePolicy::FailRequest;
    let harness = TestGuard::new(config);
    harness.sink.set_failing(true);

    let request = RequestMetadata::new("198.51.100.11", "GET", "/feed");
    let result = harness.guard.evaluate(&request, &Identity::Anonymous).await;

    assert!(matches!(result, Err(GuardError::AuditSinkUnavailable(_))));
}
