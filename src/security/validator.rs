//! Input validation and sanitization.
//!
//! # Responsibilities
//! - Reject oversized, malformed or signature-matching text
//! - Sniff uploads for script/shell markers without regex
//! - Check email shape and IP access lists
//!
//! # Design Decisions
//! - Pure functions of input + config; metrics and audit belong to the caller
//! - Signatures are checked on both the raw and sanitized text, so a NUL
//!   byte cannot split a signature that sanitization would rejoin
//! - IP lists match exact literals; CIDR ranges only when `allow_cidr` is set

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use ipnet::IpNet;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use crate::config::{NetworkConfig, ValidationConfig};
use crate::error::GuardError;
use crate::security::patterns::{PatternMatcher, ThreatCategory};

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

/// Script markers first, then shell tokens; the split index maps a hit to
/// its category.
const FILE_MARKERS: &[&str] = &[
    "<script",
    "javascript:",
    "vbscript:",
    "<iframe",
    "<object",
    "<embed",
    "<form",
    "<input",
    "<textarea",
    "cmd.exe",
    "powershell",
    "/bin/sh",
    "/bin/bash",
    "os.system",
    "subprocess",
    "eval(",
    "exec(",
    "system(",
];
const SCRIPT_MARKER_COUNT: usize = 9;

/// Outcome of one validation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub accepted: bool,
    /// Sanitized value when accepted, rejection reason otherwise.
    pub output: String,
    /// Detected signature family, if the rejection was pattern-based.
    pub category: Option<ThreatCategory>,
}

impl ValidationResult {
    pub fn accept(value: impl Into<String>) -> Self {
        Self {
            accepted: true,
            output: value.into(),
            category: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            output: reason.into(),
            category: None,
        }
    }

    pub fn reject_threat(category: ThreatCategory, reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            output: reason.into(),
            category: Some(category),
        }
    }

    pub fn value(&self) -> Option<&str> {
        self.accepted.then_some(self.output.as_str())
    }

    pub fn reason(&self) -> Option<&str> {
        (!self.accepted).then_some(self.output.as_str())
    }

    /// "xss", "sql", "path", "command" or "none".
    pub fn category_label(&self) -> &'static str {
        self.category.map(|c| c.as_str()).unwrap_or("none")
    }

    pub fn into_result(self) -> Result<String, GuardError> {
        if self.accepted {
            Ok(self.output)
        } else {
            Err(GuardError::Validation {
                reason: self.output,
                category: self.category,
            })
        }
    }
}

/// One entry of an access list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpEntry {
    Exact(IpAddr),
    Range(IpNet),
}

/// Parsed allow/block list.
#[derive(Debug, Clone, Default)]
pub struct IpList {
    exact: HashSet<IpAddr>,
    ranges: Vec<IpNet>,
}

impl IpList {
    /// Parse one configured entry. CIDR notation is only honored when
    /// `allow_cidr` is set.
    pub fn parse_entry(entry: &str, allow_cidr: bool) -> Option<IpEntry> {
        let entry = entry.trim();
        if entry.contains('/') {
            if !allow_cidr {
                return None;
            }
            return entry.parse::<IpNet>().ok().map(|net| IpEntry::Range(net.trunc()));
        }
        entry.parse::<IpAddr>().ok().map(IpEntry::Exact)
    }

    pub fn from_entries(entries: &[String], allow_cidr: bool) -> Self {
        let mut list = Self::default();
        for raw in entries {
            match Self::parse_entry(raw, allow_cidr) {
                Some(IpEntry::Exact(ip)) => {
                    list.exact.insert(ip);
                }
                Some(IpEntry::Range(net)) => list.ranges.push(net),
                None => tracing::warn!(entry = %raw, "Ignoring unusable IP list entry"),
            }
        }
        list
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.exact.contains(ip) || self.ranges.iter().any(|net| net.contains(ip))
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.ranges.is_empty()
    }
}

/// Strip NULs and control characters (except `\n`, `\r`, `\t`), then
/// collapse whitespace runs to single spaces.
pub fn sanitize_text(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != '\0')
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Validates user-supplied text, files, emails and addresses.
#[derive(Debug, Clone)]
pub struct InputValidator {
    matcher: Arc<PatternMatcher>,
    max_text_length: usize,
    max_file_size: usize,
    allowed_extensions: HashSet<String>,
    disposable_domains: HashSet<String>,
    allowed_ips: IpList,
    blocked_ips: IpList,
    email: Regex,
    file_markers: AhoCorasick,
}

impl InputValidator {
    pub fn new(
        validation: &ValidationConfig,
        network: &NetworkConfig,
        matcher: Arc<PatternMatcher>,
    ) -> Self {
        let file_markers = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(FILE_MARKERS)
            .expect("file marker automaton must build");

        Self {
            matcher,
            max_text_length: validation.max_text_length,
            max_file_size: validation.max_file_size,
            allowed_extensions: validation
                .allowed_file_types
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            disposable_domains: validation
                .disposable_email_domains
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
            allowed_ips: IpList::from_entries(&network.allowed_ips, network.allow_cidr),
            blocked_ips: IpList::from_entries(&network.blocked_ips, network.allow_cidr),
            email: Regex::new(EMAIL_PATTERN).expect("email pattern must compile"),
            file_markers,
        }
    }

    pub fn max_text_length(&self) -> usize {
        self.max_text_length
    }

    /// Validate and sanitize text. `max_length` defaults to the configured limit.
    pub fn validate_text(&self, text: &str, max_length: Option<usize>) -> ValidationResult {
        let max_length = max_length.unwrap_or(self.max_text_length);
        if text.chars().count() > max_length {
            return ValidationResult::reject(format!(
                "Text exceeds maximum length of {} characters",
                max_length
            ));
        }

        let sanitized = sanitize_text(text);
        let hit = self
            .matcher
            .first_match(text)
            .or_else(|| self.matcher.first_match(&sanitized));
        match hit {
            Some(category) => ValidationResult::reject_threat(category, category.rejection_reason()),
            None => ValidationResult::accept(sanitized),
        }
    }

    /// Like `validate_text`, for bytes that may not be text at all.
    pub fn validate_raw_text(&self, raw: &[u8], max_length: Option<usize>) -> ValidationResult {
        match std::str::from_utf8(raw) {
            Ok(text) => self.validate_text(text, max_length),
            Err(_) => ValidationResult::reject("Input must be valid UTF-8 text"),
        }
    }

    /// Size, extension and content-marker checks for an upload.
    pub fn validate_file(&self, content: &[u8], filename: &str) -> ValidationResult {
        if content.len() > self.max_file_size {
            return ValidationResult::reject(format!(
                "File size exceeds maximum limit of {} bytes",
                self.max_file_size
            ));
        }

        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()));
        match extension {
            Some(ext) if self.allowed_extensions.contains(&ext) => {}
            Some(ext) => {
                return ValidationResult::reject(format!("File type {} is not allowed", ext));
            }
            None => return ValidationResult::reject("File has no extension"),
        }

        if let Some(hit) = self.file_markers.find(content) {
            let category = if hit.pattern().as_usize() < SCRIPT_MARKER_COUNT {
                ThreatCategory::Xss
            } else {
                ThreatCategory::Command
            };
            return ValidationResult::reject_threat(
                category,
                "File contains potentially malicious content",
            );
        }

        ValidationResult::accept("File validation passed")
    }

    pub fn validate_email(&self, email: &str) -> ValidationResult {
        if !self.email.is_match(email) {
            return ValidationResult::reject("Invalid email format");
        }

        let domain = email
            .rsplit_once('@')
            .map(|(_, d)| d.to_lowercase())
            .unwrap_or_default();
        if self.disposable_domains.contains(&domain) {
            return ValidationResult::reject("Disposable email addresses are not allowed");
        }

        ValidationResult::accept(email)
    }

    /// Parse and check an address against the block and allow lists.
    pub fn validate_ip(&self, ip: &str) -> ValidationResult {
        let addr: IpAddr = match ip.parse() {
            Ok(a) => a,
            Err(_) => return ValidationResult::reject("Invalid IP address format"),
        };

        if self.blocked_ips.contains(&addr) {
            return ValidationResult::reject("IP address is blocked");
        }

        if !self.allowed_ips.is_empty() && !self.allowed_ips.contains(&addr) {
            return ValidationResult::reject("IP address not in allowed list");
        }

        ValidationResult::accept(addr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn validator_with(network: NetworkConfig) -> InputValidator {
        InputValidator::new(
            &ValidationConfig::default(),
            &network,
            Arc::new(PatternMatcher::new()),
        )
    }

    fn validator() -> InputValidator {
        validator_with(NetworkConfig::default())
    }

    #[test]
    fn test_script_tag_rejected_as_xss() {
        let result = validator().validate_text("<script>alert(1)</script>", None);
        assert!(!result.accepted);
        assert_eq!(result.category, Some(ThreatCategory::Xss));
        assert_eq!(result.category_label(), "xss");
    }

    #[test]
    fn test_each_family_rejected_with_category() {
        let v = validator();
        for (text, category) in [
            ("1 OR 1=1; select * from t where a=1 or 2=2", ThreatCategory::Sql),
            ("../../etc/passwd", ThreatCategory::Path),
            ("name; rm -rf /", ThreatCategory::Command),
        ] {
            let result = v.validate_text(text, None);
            assert!(!result.accepted, "{:?} should be rejected", text);
            assert_eq!(result.category, Some(category));
        }
    }

    #[test]
    fn test_length_limit() {
        let v = validator();
        let result = v.validate_text("abcdef", Some(5));
        assert_eq!(result.reason(), Some("Text exceeds maximum length of 5 characters"));
        assert!(v.validate_text("abcde", Some(5)).accepted);
        // characters, not bytes
        assert!(v.validate_text("ééééé", Some(5)).accepted);
    }

    #[test]
    fn test_sanitizes_accepted_text() {
        let result = validator().validate_text("  hello\0   world\x07 \n again ", None);
        assert_eq!(result.value(), Some("hello world again"));
    }

    #[test]
    fn test_nul_cannot_split_signature() {
        let result = validator().validate_text("<scr\0ipt>alert(1)</script>", None);
        assert_eq!(result.category, Some(ThreatCategory::Xss));
    }

    #[test]
    fn test_non_utf8_rejected() {
        let result = validator().validate_raw_text(&[0xff, 0xfe, 0x00], None);
        assert_eq!(result.reason(), Some("Input must be valid UTF-8 text"));
        assert!(validator().validate_raw_text(b"plain", None).accepted);
    }

    #[test]
    fn test_file_checks() {
        let v = validator();
        assert!(v.validate_file(b"quarterly numbers", "report.PDF").accepted);

        let result = v.validate_file(b"MZ...", "tool.exe");
        assert_eq!(result.reason(), Some("File type .exe is not allowed"));

        let result = v.validate_file(b"a,b\n<ScRiPt>x</script>", "data.csv");
        assert_eq!(result.category, Some(ThreatCategory::Xss));

        let result = v.validate_file(b"run POWERSHELL -enc abc", "notes.txt");
        assert_eq!(result.category, Some(ThreatCategory::Command));

        assert_eq!(v.validate_file(b"x", "README").reason(), Some("File has no extension"));
    }

    #[test]
    fn test_file_size_limit() {
        let config = ValidationConfig {
            max_file_size: 4,
            ..Default::default()
        };
        let v = InputValidator::new(&config, &NetworkConfig::default(), Arc::new(PatternMatcher::new()));
        let result = v.validate_file(b"12345", "a.txt");
        assert_eq!(result.reason(), Some("File size exceeds maximum limit of 4 bytes"));
    }

    #[test]
    fn test_email() {
        let v = validator();
        assert_eq!(v.validate_email("alice@example.com").value(), Some("alice@example.com"));
        assert_eq!(v.validate_email("not-an-email").reason(), Some("Invalid email format"));
        assert_eq!(
            v.validate_email("bob@TempMail.com").reason(),
            Some("Disposable email addresses are not allowed")
        );
    }

    #[test]
    fn test_ip_lists() {
        let v = validator_with(NetworkConfig {
            blocked_ips: vec!["203.0.113.5".into()],
            ..Default::default()
        });
        assert_eq!(v.validate_ip("203.0.113.5").reason(), Some("IP address is blocked"));
        assert!(v.validate_ip("198.51.100.1").accepted);
        assert_eq!(v.validate_ip("300.1.1.1").reason(), Some("Invalid IP address format"));

        let v = validator_with(NetworkConfig {
            allowed_ips: vec!["10.0.0.1".into()],
            ..Default::default()
        });
        assert!(v.validate_ip("10.0.0.1").accepted);
        assert_eq!(v.validate_ip("10.0.0.2").reason(), Some("IP address not in allowed list"));
    }

    #[test]
    fn test_ipv6_canonical_match() {
        let v = validator_with(NetworkConfig {
            blocked_ips: vec!["2001:db8::1".into()],
            ..Default::default()
        });
        assert!(!v.validate_ip("2001:0db8:0000::0001").accepted);
    }

    #[test]
    fn test_cidr_only_when_enabled() {
        let exact_only = validator_with(NetworkConfig {
            blocked_ips: vec!["10.0.0.0/8".into()],
            ..Default::default()
        });
        assert!(exact_only.validate_ip("10.1.2.3").accepted);

        let cidr = validator_with(NetworkConfig {
            blocked_ips: vec!["10.0.0.0/8".into()],
            allow_cidr: true,
            ..Default::default()
        });
        assert!(!cidr.validate_ip("10.1.2.3").accepted);
        assert!(cidr.validate_ip("11.0.0.1").accepted);
    }

    #[test]
    fn test_into_result() {
        let err = ValidationResult::reject_threat(ThreatCategory::Path, "nope")
            .into_result()
            .unwrap_err();
        assert!(matches!(
            err,
            GuardError::Validation { category: Some(ThreatCategory::Path), .. }
        ));
        assert_eq!(ValidationResult::accept("ok").into_result().unwrap(), "ok");
    }

    proptest! {
        #[test]
        fn prop_sanitized_has_no_forbidden_controls(s in "\\PC*|[\\x00-\\x1f a-z]{0,64}") {
            let out = sanitize_text(&s);
            prop_assert!(!out.contains('\0'));
            prop_assert!(out.chars().all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t')));
            prop_assert!(!out.contains("  "));
        }

        #[test]
        fn prop_plain_words_accepted(words in proptest::collection::vec("[a-z]{1,8}", 0..12)) {
            let v = validator();
            let text = words.join("  ");
            let result = v.validate_text(&text, None);
            // plain lowercase words can still spell a signature ("select ... drop")
            if result.accepted {
                prop_assert_eq!(result.output, words.join(" "));
            }
        }
    }
}
