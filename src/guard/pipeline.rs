use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::decision::{Decision, Denial, Identity, HIGH_RISK_REASON};
use crate::audit::{details, AuditContext, AuditEventType, AuditLogger, AuditSink, Severity};
use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::crypto::EncryptionManager;
use crate::error::GuardResult;
use crate::observability::metrics::{MetricsSink, VALIDATION_REJECTIONS};
use crate::security::patterns::PatternMatcher;
use crate::security::rate_limit::{RateLimiter, LIMITER_UNAVAILABLE};
use crate::security::store::WindowStore;
use crate::security::threat::{Recommendation, RequestMetadata, ThreatMonitor};
use crate::security::validator::InputValidator;

/// External collaborators the guard is wired to.
pub struct GuardDeps {
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<dyn MetricsSink>,
    pub audit_sink: Arc<dyn AuditSink>,
    pub window_store: Arc<dyn WindowStore>,
}

/// The composed request-security pipeline.
pub struct SecurityGuard {
    validator: InputValidator,
    limiter: RateLimiter,
    monitor: ThreatMonitor,
    audit: Arc<AuditLogger>,
    encryption: Arc<EncryptionManager>,
    metrics: Arc<dyn MetricsSink>,
}

impl SecurityGuard {
    /// Build every engine from configuration. Spawns the audit writer, so it
    /// must run inside a Tokio runtime.
    pub fn from_config(config: &GuardConfig, deps: GuardDeps) -> GuardResult<Self> {
        let matcher = Arc::new(PatternMatcher::new());
        let validator = InputValidator::new(&config.validation, &config.network, matcher.clone());
        let limiter = RateLimiter::new(
            deps.window_store,
            config.rate_limit.clone(),
            deps.clock.clone(),
            deps.metrics.clone(),
        );
        let monitor = ThreatMonitor::new(
            config.threat.clone(),
            matcher,
            config.validation.max_text_length,
            config.network.allow_cidr,
        );
        let audit = Arc::new(AuditLogger::spawn(
            deps.audit_sink,
            config.audit.clone(),
            deps.clock.clone(),
            deps.metrics.clone(),
        ));
        let encryption = Arc::new(EncryptionManager::from_config(
            &config.encryption,
            deps.clock,
            deps.metrics.clone(),
        )?);

        Ok(Self {
            validator,
            limiter,
            monitor,
            audit,
            encryption,
            metrics: deps.metrics,
        })
    }

    pub fn validator(&self) -> &InputValidator {
        &self.validator
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn monitor(&self) -> &ThreatMonitor {
        &self.monitor
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn encryption(&self) -> &Arc<EncryptionManager> {
        &self.encryption
    }

    /// Run every check in order and audit the outcome.
    ///
    /// A denial is an `Ok(Decision)`; `Err` only means the guard itself could
    /// not do its job (audit sink down under `fail_request`).
    pub async fn evaluate(
        &self,
        request: &RequestMetadata,
        identity: &Identity,
    ) -> GuardResult<Decision> {
        let context = AuditContext {
            ip_address: Some(request.ip.clone()),
            user_agent: request.user_agent.clone(),
            session_id: request.session_id.clone(),
            request_id: request.request_id.clone(),
        };
        let actor = identity.actor();

        let ip_check = self.validator.validate_ip(&request.ip);
        if !ip_check.accepted {
            let reason = ip_check.output;
            tracing::warn!(ip = %request.ip, reason = %reason, "Request rejected by IP policy");
            self.audit
                .log_event(
                    AuditEventType::IpBlocked,
                    actor,
                    "request_blocked",
                    Severity::Warning,
                    details(json!({ "reason": reason, "endpoint": request.endpoint })),
                    &context,
                )
                .await?;
            return Ok(Decision::deny(Denial::IpRejected, reason));
        }
        let ip = ip_check.output;

        let rate_identity = identity.user_id().unwrap_or(ip.as_str());
        let rate = self.limiter.is_allowed(rate_identity, &request.endpoint).await;
        if !rate.allowed {
            let reason = rate.reason.clone().unwrap_or_default();
            self.audit
                .log_event(
                    AuditEventType::RateLimitExceeded,
                    actor,
                    "rate_limited",
                    Severity::Warning,
                    details(json!({
                        "reason": reason,
                        "endpoint": request.endpoint,
                        "limit": rate.limit,
                        "count": rate.count,
                        "remaining": rate.remaining,
                        "reset_at": rate.reset_at,
                        "retry_after_secs": rate.retry_after_secs,
                    })),
                    &context,
                )
                .await?;
            let denial = if reason == LIMITER_UNAVAILABLE {
                Denial::LimiterUnavailable
            } else {
                Denial::RateLimited
            };
            return Ok(Decision::deny(denial, reason).with_rate_info(rate));
        }

        let mut sanitized = BTreeMap::new();
        for (name, value) in &request.fields {
            let result = self.validator.validate_text(value, None);
            if !result.accepted {
                let category = result.category_label();
                self.metrics
                    .increment(VALIDATION_REJECTIONS, &[("category", category)]);
                tracing::warn!(field = %name, category, endpoint = %request.endpoint, "Input rejected");
                self.audit
                    .log_event(
                        AuditEventType::InputRejected,
                        actor,
                        "input_rejected",
                        Severity::High,
                        details(json!({
                            "field": name,
                            "reason": result.output,
                            "category": category,
                            "endpoint": request.endpoint,
                        })),
                        &context,
                    )
                    .await?;
                let mut decision =
                    Decision::deny(Denial::InvalidInput, result.output).with_rate_info(rate);
                decision.category = result.category;
                return Ok(decision);
            }
            sanitized.insert(name.clone(), result.output);
        }

        let assessment = if request.recent_request_count.is_some() {
            self.monitor.analyze(request)
        } else {
            let mut scored = request.clone();
            scored.recent_request_count = Some(u32::try_from(rate.count).unwrap_or(u32::MAX));
            self.monitor.analyze(&scored)
        };

        if assessment.recommendation == Recommendation::Block {
            self.audit
                .log_event(
                    AuditEventType::HighRiskRequest,
                    actor,
                    "request_blocked",
                    Severity::High,
                    details(json!({
                        "risk_score": assessment.risk_score,
                        "threats": assessment.threat_descriptions(),
                        "endpoint": request.endpoint,
                    })),
                    &context,
                )
                .await?;
            let mut decision = Decision::deny(Denial::HighRisk, HIGH_RISK_REASON).with_rate_info(rate);
            decision.risk_score = assessment.risk_score;
            decision.threats = assessment.threats;
            return Ok(decision);
        }

        self.audit
            .log_event(
                AuditEventType::RequestProcessed,
                actor,
                &format!("{} {}", request.method, request.endpoint),
                Severity::Info,
                details(json!({
                    "endpoint": request.endpoint,
                    "method": request.method,
                    "risk_score": assessment.risk_score,
                    "recommendation": assessment.recommendation.as_str(),
                })),
                &context,
            )
            .await?;

        Ok(Decision::allow(
            assessment.risk_score,
            rate,
            assessment.threats,
            sanitized,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::clock::ManualClock;
    use crate::config::{AuditFailurePolicy, NetworkConfig, RateLimitConfig, ThreatConfig};
    use crate::error::GuardError;
    use crate::observability::metrics::SecurityMetrics;
    use crate::security::patterns::ThreatCategory;
    use crate::security::store::MemoryWindowStore;

    struct Harness {
        guard: SecurityGuard,
        sink: Arc<MemoryAuditSink>,
        metrics: Arc<SecurityMetrics>,
    }

    fn harness(config: GuardConfig) -> Harness {
        let sink = Arc::new(MemoryAuditSink::new());
        let metrics = Arc::new(SecurityMetrics::new());
        let guard = SecurityGuard::from_config(
            &config,
            GuardDeps {
                clock: Arc::new(ManualClock::starting_now()),
                metrics: metrics.clone(),
                audit_sink: sink.clone(),
                window_store: Arc::new(MemoryWindowStore::new()),
            },
        )
        .unwrap();
        Harness { guard, sink, metrics }
    }

    async fn event_types(h: &Harness) -> Vec<AuditEventType> {
        h.guard
            .audit()
            .events()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    #[tokio::test]
    async fn test_clean_request_allowed_and_audited() {
        let h = harness(GuardConfig::default());
        let request = RequestMetadata::new("198.51.100.20", "POST", "/chat")
            .with_field("message", "  hello   there ");
        let decision = h
            .guard
            .evaluate(&request, &Identity::User("u1".into()))
            .await
            .unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.sanitized_fields["message"], "hello there");
        assert_eq!(decision.rate_info.as_ref().unwrap().remaining, 99);
        assert_eq!(event_types(&h).await, vec![AuditEventType::RequestProcessed]);
    }

    #[tokio::test]
    async fn test_invalid_ip_denied() {
        let h = harness(GuardConfig::default());
        let request = RequestMetadata::new("not-an-ip", "GET", "/");
        let decision = h.guard.evaluate(&request, &Identity::Anonymous).await.unwrap();
        assert_eq!(decision.reason.as_deref(), Some("Invalid IP address format"));
        assert_eq!(event_types(&h).await, vec![AuditEventType::IpBlocked]);
    }

    #[tokio::test]
    async fn test_field_rejection_is_high_severity() {
        let h = harness(GuardConfig::default());
        let request = RequestMetadata::new("198.51.100.20", "POST", "/search")
            .with_field("q", "'; DROP TABLE users; --");
        let decision = h.guard.evaluate(&request, &Identity::Anonymous).await.unwrap();

        assert!(!decision.allowed);
        assert_eq!(decision.category, Some(ThreatCategory::Sql));
        assert_eq!(decision.denial, Some(Denial::InvalidInput));
        assert_eq!(h.metrics.counter(VALIDATION_REJECTIONS, &[("category", "sql")]), 1);

        let events = h.guard.audit().events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::InputRejected);
        assert_eq!(events[0].severity, Severity::High);
        assert_eq!(events[0].details["field"], json!("q"));
    }

    #[tokio::test]
    async fn test_high_risk_request_blocked() {
        let config = GuardConfig {
            threat: ThreatConfig {
                suspicious_ips: vec!["198.51.100.66".into()],
                high_frequency_threshold: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let h = harness(config);
        let request =
            RequestMetadata::new("198.51.100.66", "GET", "/export").with_user_agent("curl/8.0");
        let decision = h.guard.evaluate(&request, &Identity::Anonymous).await.unwrap();

        assert_eq!(decision.reason.as_deref(), Some(HIGH_RISK_REASON));
        assert_eq!(decision.risk_score, 60);
        assert_eq!(event_types(&h).await, vec![AuditEventType::HighRiskRequest]);
        assert!(matches!(
            decision.into_result().unwrap_err(),
            GuardError::Blocked { risk_score: 60, .. }
        ));
    }

    #[tokio::test]
    async fn test_anonymous_rate_key_is_ip() {
        let config = GuardConfig {
            rate_limit: RateLimitConfig {
                requests_per_window: 1,
                burst_limit: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let h = harness(config);
        let a = RequestMetadata::new("198.51.100.1", "GET", "/");
        let b = RequestMetadata::new("198.51.100.2", "GET", "/");

        assert!(h.guard.evaluate(&a, &Identity::Anonymous).await.unwrap().allowed);
        assert!(h.guard.evaluate(&b, &Identity::Anonymous).await.unwrap().allowed);
        let denied = h.guard.evaluate(&a, &Identity::Anonymous).await.unwrap();
        assert_eq!(denied.denial, Some(Denial::RateLimited));
    }

    #[tokio::test]
    async fn test_fail_request_surfaces_sink_error() {
        let mut config = GuardConfig::default();
        config.audit.failure_policy = AuditFailurePolicy::FailRequest;
        config.network = NetworkConfig {
            blocked_ips: vec!["203.0.113.5".into()],
            ..Default::default()
        };
        let h = harness(config);
        h.sink.set_failing(true);

        let request = RequestMetadata::new("203.0.113.5", "GET", "/");
        let err = h.guard.evaluate(&request, &Identity::Anonymous).await.unwrap_err();
        assert!(matches!(err, GuardError::AuditSinkUnavailable(_)));
    }
}
