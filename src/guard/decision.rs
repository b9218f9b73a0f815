//! Guard inputs and outputs.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{GuardError, GuardResult};
use crate::security::patterns::ThreatCategory;
use crate::security::rate_limit::RateLimitDecision;
use crate::security::store::StoreError;
use crate::security::threat::ThreatSignal;

pub const HIGH_RISK_REASON: &str = "Request blocked due to security concerns";

/// Who is calling, as established by upstream authentication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    User(String),
    Anonymous,
}

impl Identity {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::User(id) => Some(id),
            Identity::Anonymous => None,
        }
    }

    /// Actor name recorded in audit events.
    pub fn actor(&self) -> &str {
        self.user_id().unwrap_or("anonymous")
    }
}

/// Which stage denied the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    IpRejected,
    RateLimited,
    LimiterUnavailable,
    InvalidInput,
    HighRisk,
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub denial: Option<Denial>,
    pub risk_score: u32,
    pub rate_info: Option<RateLimitDecision>,
    pub threats: Vec<ThreatSignal>,
    pub category: Option<ThreatCategory>,
    /// Extracted fields after sanitization; empty unless allowed.
    pub sanitized_fields: BTreeMap<String, String>,
}

impl Decision {
    pub(crate) fn deny(denial: Denial, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            denial: Some(denial),
            risk_score: 0,
            rate_info: None,
            threats: Vec::new(),
            category: None,
            sanitized_fields: BTreeMap::new(),
        }
    }

    pub(crate) fn allow(
        risk_score: u32,
        rate_info: RateLimitDecision,
        threats: Vec<ThreatSignal>,
        sanitized_fields: BTreeMap<String, String>,
    ) -> Self {
        Self {
            allowed: true,
            reason: None,
            denial: None,
            risk_score,
            rate_info: Some(rate_info),
            threats,
            category: None,
            sanitized_fields,
        }
    }

    pub(crate) fn with_rate_info(mut self, rate: RateLimitDecision) -> Self {
        self.rate_info = Some(rate);
        self
    }

    /// `Ok(self)` when allowed, otherwise the error matching the denial.
    pub fn into_result(self) -> GuardResult<Decision> {
        let Some(denial) = self.denial else {
            return Ok(self);
        };
        let reason = self.reason.unwrap_or_default();

        Err(match denial {
            Denial::IpRejected | Denial::HighRisk => GuardError::Blocked {
                reason,
                risk_score: self.risk_score,
            },
            Denial::InvalidInput => GuardError::Validation {
                reason,
                category: self.category,
            },
            Denial::RateLimited => {
                let (limit, retry_after_secs) = self
                    .rate_info
                    .map(|r| (r.limit, r.retry_after_secs))
                    .unwrap_or((0, 0));
                GuardError::RateLimitExceeded {
                    reason,
                    limit,
                    retry_after_secs,
                }
            }
            Denial::LimiterUnavailable => GuardError::StoreUnavailable(StoreError::Unavailable(reason)),
        })
    }
}
