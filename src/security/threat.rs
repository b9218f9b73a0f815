//! Heuristic request risk scoring.
//!
//! # Data Flow
//! ```text
//! RequestMetadata
//!     → signature scan over every string (bounded length)
//!     → IP reputation list
//!     → automation user-agent markers
//!     → frequency signal supplied by the caller
//!     → additive score → Recommendation
//! ```
//!
//! Weights and thresholds come from `ThreatConfig`; nothing here is stateful.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::ThreatConfig;
use crate::security::patterns::{PatternMatcher, ThreatCategory};
use crate::security::validator::IpList;

/// What the guard knows about one inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Caller address as reported by the transport. May be malformed.
    pub ip: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    pub method: String,
    pub endpoint: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// User-supplied values already extracted by the caller.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Requests seen from this caller in the current window, if known.
    #[serde(default)]
    pub recent_request_count: Option<u32>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl RequestMetadata {
    pub fn new(ip: impl Into<String>, method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            method: method.into(),
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Every string the monitor scans, in a stable order.
    fn scanned_values(&self) -> impl Iterator<Item = &str> {
        [self.ip.as_str(), self.method.as_str(), self.endpoint.as_str()]
            .into_iter()
            .chain(self.user_agent.as_deref())
            .chain(self.headers.values().map(String::as_str))
            .chain(self.fields.values().map(String::as_str))
    }
}

/// A single contributing signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatSignal {
    Pattern(ThreatCategory),
    SuspiciousIp,
    AutomationAgent,
    HighFrequency,
}

impl fmt::Display for ThreatSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreatSignal::Pattern(c) => write!(f, "Potential {} attack detected", c),
            ThreatSignal::SuspiciousIp => f.write_str("Request from suspicious IP address"),
            ThreatSignal::AutomationAgent => f.write_str("Automated user agent detected"),
            ThreatSignal::HighFrequency => f.write_str("High request frequency"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Allow,
    LogDetailed,
    IncreaseMonitoring,
    Block,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Allow => "allow",
            Recommendation::LogDetailed => "log_detailed",
            Recommendation::IncreaseMonitoring => "increase_monitoring",
            Recommendation::Block => "block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreatAssessment {
    pub threats: Vec<ThreatSignal>,
    pub risk_score: u32,
    pub recommendation: Recommendation,
}

impl ThreatAssessment {
    pub fn threat_descriptions(&self) -> Vec<String> {
        self.threats.iter().map(ToString::to_string).collect()
    }
}

pub struct ThreatMonitor {
    matcher: Arc<PatternMatcher>,
    config: ThreatConfig,
    suspicious_ips: IpList,
    agents: Vec<String>,
    max_text_length: usize,
}

impl ThreatMonitor {
    pub fn new(
        config: ThreatConfig,
        matcher: Arc<PatternMatcher>,
        max_text_length: usize,
        allow_cidr: bool,
    ) -> Self {
        let suspicious_ips = IpList::from_entries(&config.suspicious_ips, allow_cidr);
        let agents = config
            .automation_agents
            .iter()
            .map(|a| a.to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        Self {
            matcher,
            config,
            suspicious_ips,
            agents,
            max_text_length,
        }
    }

    pub fn block_threshold(&self) -> u32 {
        self.config.block_threshold
    }

    pub fn analyze(&self, request: &RequestMetadata) -> ThreatAssessment {
        let mut threats = Vec::new();
        let mut score = 0u32;

        let categories: BTreeSet<ThreatCategory> = request
            .scanned_values()
            .flat_map(|v| self.matcher.matches_any(truncate_chars(v, self.max_text_length)))
            .collect();
        for category in categories {
            threats.push(ThreatSignal::Pattern(category));
            score = score.saturating_add(self.config.pattern_weight);
        }

        if let Ok(ip) = request.ip.parse::<IpAddr>() {
            if self.suspicious_ips.contains(&ip) {
                threats.push(ThreatSignal::SuspiciousIp);
                score = score.saturating_add(self.config.suspicious_ip_weight);
            }
        }

        if let Some(agent) = request.user_agent.as_deref() {
            let agent = agent.to_lowercase();
            if self.agents.iter().any(|marker| agent.contains(marker.as_str())) {
                threats.push(ThreatSignal::AutomationAgent);
                score = score.saturating_add(self.config.automation_agent_weight);
            }
        }

        if request
            .recent_request_count
            .is_some_and(|n| n >= self.config.high_frequency_threshold)
        {
            threats.push(ThreatSignal::HighFrequency);
            score = score.saturating_add(self.config.high_frequency_weight);
        }

        let recommendation = self.recommend(score);
        if recommendation != Recommendation::Allow {
            tracing::debug!(
                risk_score = score,
                recommendation = recommendation.as_str(),
                endpoint = %request.endpoint,
                "Elevated request risk"
            );
        }

        ThreatAssessment {
            threats,
            risk_score: score,
            recommendation,
        }
    }

    fn recommend(&self, score: u32) -> Recommendation {
        if score >= self.config.block_threshold {
            Recommendation::Block
        } else if score >= self.config.monitor_threshold {
            Recommendation::IncreaseMonitoring
        } else if score >= self.config.log_threshold {
            Recommendation::LogDetailed
        } else {
            Recommendation::Allow
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
