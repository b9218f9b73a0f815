//! Audit record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    AuthenticationSuccess,
    AuthenticationFailure,
    RateLimitExceeded,
    IpBlocked,
    InputRejected,
    HighRiskRequest,
    DataAccess,
    AdminAction,
    RequestProcessed,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::AuthenticationSuccess => "authentication_success",
            AuditEventType::AuthenticationFailure => "authentication_failure",
            AuditEventType::RateLimitExceeded => "rate_limit_exceeded",
            AuditEventType::IpBlocked => "ip_blocked",
            AuditEventType::InputRejected => "input_rejected",
            AuditEventType::HighRiskRequest => "high_risk_request",
            AuditEventType::DataAccess => "data_access",
            AuditEventType::AdminAction => "admin_action",
            AuditEventType::RequestProcessed => "request_processed",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn is_elevated(&self) -> bool {
        *self >= Severity::High
    }
}

/// Request-scoped attributes copied onto every event the request produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
}

impl AuditContext {
    pub fn from_ip(ip: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip.into()),
            ..Default::default()
        }
    }
}

/// One immutable audit record, stored as a JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub actor: String,
    pub action: String,
    pub severity: Severity,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AuditEvent {
    /// Build a record. Session and request ids fall back to same-named
    /// string entries in `details` when the context lacks them.
    pub fn new(
        event_type: AuditEventType,
        actor: impl Into<String>,
        action: impl Into<String>,
        severity: Severity,
        details: Map<String, Value>,
        context: &AuditContext,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let from_details = |key: &str| details.get(key).and_then(Value::as_str).map(str::to_string);
        let session_id = context.session_id.clone().or_else(|| from_details("session_id"));
        let request_id = context.request_id.clone().or_else(|| from_details("request_id"));

        Self {
            event_id: Uuid::new_v4(),
            timestamp,
            event_type,
            actor: actor.into(),
            action: action.into(),
            severity,
            details,
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
            session_id,
            request_id,
        }
    }
}

/// `serde_json::json!` object to `Map`; anything else becomes an empty map.
pub fn details(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
