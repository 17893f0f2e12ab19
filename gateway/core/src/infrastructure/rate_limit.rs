// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-client, per-endpoint rate limiting with burst protection and an
//! ephemeral blacklist.
//!
//! Four fixed windows (10 s burst, minute, hour, day) are counted
//! independently per (client, endpoint). Crossing a limit denies the
//! request; crossing it hard escalates to a temporary blacklist:
//! >= 2x burst → 15 min, >= 1.5x hourly → 60 min, over the daily limit →
//! 24 h. Counter updates are atomic per key; there is no global lock.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::audit::{AuditEvent, AuditEventType, AuditSeverity};
use crate::infrastructure::audit::AuditHandle;
use crate::infrastructure::config::{RateLimitRule, SecurityConfig};

const CLEANUP_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Burst,
    PerMinute,
    PerHour,
    Daily,
}

impl WindowKind {
    pub fn seconds(self) -> u64 {
        match self {
            Self::Burst => 10,
            Self::PerMinute => 60,
            Self::PerHour => 3600,
            Self::Daily => 86400,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Burst => "burst",
            Self::PerMinute => "per_minute",
            Self::PerHour => "per_hour",
            Self::Daily => "daily",
        }
    }

    fn limit(self, rule: &RateLimitRule) -> u32 {
        match self {
            Self::Burst => rule.burst,
            Self::PerMinute => rule.minute,
            Self::PerHour => rule.hour,
            Self::Daily => rule.day,
        }
    }
}

#[derive(Debug, Clone)]
struct CounterEntry {
    count: u32,
    first_request: u64,
    last_request: u64,
    expires_at: u64,
}

#[derive(Debug, Clone)]
pub struct BlacklistEntry {
    pub added_at: u64,
    pub expires_at: u64,
    pub reason: String,
    pub duration_minutes: u64,
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: u64,
    pub limit_kind: WindowKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl RateLimitStatus {
    fn allowed(remaining: u32, reset_at: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at,
            limit_kind: WindowKind::PerMinute,
            retry_after: None,
        }
    }

    fn denied(limit_kind: WindowKind, reset_at: u64, retry_after: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            limit_kind,
            retry_after: Some(retry_after.max(1)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub active_counters: usize,
    pub blacklisted_clients: usize,
    pub whitelisted_clients: usize,
}

pub struct RateLimiter {
    rules: HashMap<String, RateLimitRule>,
    default_rule: RateLimitRule,
    whitelist: Vec<String>,
    bypass_endpoints: Vec<String>,
    counters: DashMap<String, CounterEntry>,
    blacklist: DashMap<String, BlacklistEntry>,
    last_cleanup: Mutex<u64>,
    audit: AuditHandle,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Derive the rate-limit identity for a request: first X-Forwarded-For hop,
/// then X-Real-IP, then the socket address, then a hash of the user agent.
pub fn client_identifier(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    socket_ip: Option<&str>,
    user_agent: Option<&str>,
) -> String {
    if let Some(forwarded) = forwarded_for {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(ip) = real_ip {
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    if let Some(ip) = socket_ip {
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    let agent = user_agent.unwrap_or("unknown");
    hex::encode(&Sha256::digest(agent.as_bytes())[..8])
}

impl RateLimiter {
    pub fn new(config: &SecurityConfig, audit: AuditHandle) -> Self {
        let mut rules = config.rate_limits.clone();
        let default_rule = rules
            .remove("default")
            .unwrap_or(RateLimitRule::new(5, 30, 300, 1000));
        Self {
            rules,
            default_rule,
            whitelist: config.whitelist.clone(),
            bypass_endpoints: config.whitelist_bypass_endpoints.clone(),
            counters: DashMap::new(),
            blacklist: DashMap::new(),
            last_cleanup: Mutex::new(now_secs()),
            audit,
        }
    }

    /// Endpoint match order: exact, trailing-wildcard prefix, substring,
    /// then the default rule.
    fn rule_for(&self, endpoint: &str) -> RateLimitRule {
        if let Some(rule) = self.rules.get(endpoint) {
            return *rule;
        }
        for (pattern, rule) in &self.rules {
            if let Some(prefix) = pattern.strip_suffix('*') {
                if endpoint.starts_with(prefix) {
                    return *rule;
                }
            } else if endpoint.contains(pattern.as_str()) {
                return *rule;
            }
        }
        self.default_rule
    }

    fn counter_key(client_id: &str, endpoint: &str, kind: WindowKind, now: u64) -> String {
        let window = now / kind.seconds();
        format!("{client_id}:{endpoint}:{}:{window}", kind.label())
    }

    fn increment(&self, key: String, ttl: u64, now: u64) -> u32 {
        let mut entry = self.counters.entry(key).or_insert_with(|| CounterEntry {
            count: 0,
            first_request: now,
            last_request: now,
            expires_at: now + ttl,
        });
        if now > entry.expires_at {
            entry.count = 0;
            entry.first_request = now;
            entry.expires_at = now + ttl;
        }
        entry.count += 1;
        entry.last_request = now;
        entry.count
    }

    pub fn is_blacklisted(&self, client_id: &str) -> Option<BlacklistEntry> {
        if let Some(entry) = self.blacklist.get(client_id) {
            if entry.expires_at > now_secs() {
                return Some(entry.clone());
            }
        }
        self.blacklist
            .remove_if(client_id, |_, entry| entry.expires_at <= now_secs());
        None
    }

    fn add_to_blacklist(&self, client_id: &str, duration_minutes: u64, reason: &str) {
        let now = now_secs();
        let expires_at = now + duration_minutes * 60;
        self.blacklist.insert(
            client_id.to_string(),
            BlacklistEntry {
                added_at: now,
                expires_at,
                reason: reason.to_string(),
                duration_minutes,
            },
        );
        metrics::counter!("datagate_rate_limit_blacklisted").increment(1);
        self.audit.emit(
            AuditEvent::new(AuditEventType::SecurityAlert, AuditSeverity::Warning)
                .failure()
                .ip(client_id)
                .detail("action", Value::String("client_blacklisted".into()))
                .detail("reason", Value::String(reason.into()))
                .detail("duration_minutes", Value::from(duration_minutes))
                .flag("client_blacklisted")
                .flag("automated_response"),
        );
    }

    fn log_exceeded(&self, client_id: &str, endpoint: &str, kind: WindowKind) {
        metrics::counter!("datagate_rate_limit_denied").increment(1);
        self.audit.emit(
            AuditEvent::new(AuditEventType::RateLimitExceeded, AuditSeverity::Warning)
                .failure()
                .ip(client_id)
                .endpoint(endpoint, "-")
                .detail("limit_type", Value::String(kind.label().into()))
                .detail("action", Value::String("request_throttled".into()))
                .flag("rate_limit_exceeded"),
        );
    }

    /// Check and count one request.
    pub fn check(&self, client_id: &str, endpoint: &str) -> RateLimitStatus {
        self.cleanup_expired();
        let now = now_secs();

        let whitelisted = self.whitelist.iter().any(|ip| ip == client_id);
        let bypass = self.bypass_endpoints.iter().any(|e| e == endpoint);
        if whitelisted && !bypass {
            return RateLimitStatus::allowed(u32::MAX, now + 3600);
        }

        if let Some(entry) = self.is_blacklisted(client_id) {
            let retry_after = entry.expires_at.saturating_sub(now);
            return RateLimitStatus::denied(WindowKind::Burst, entry.expires_at, retry_after);
        }

        let rule = self.rule_for(endpoint);

        let burst = self.increment(
            Self::counter_key(client_id, endpoint, WindowKind::Burst, now),
            WindowKind::Burst.seconds(),
            now,
        );
        if burst > rule.burst {
            if burst > rule.burst * 2 {
                self.add_to_blacklist(client_id, 15, "burst_limit_violation");
            }
            self.log_exceeded(client_id, endpoint, WindowKind::Burst);
            return RateLimitStatus::denied(WindowKind::Burst, now + 10, 10);
        }

        let minute = self.increment(
            Self::counter_key(client_id, endpoint, WindowKind::PerMinute, now),
            WindowKind::PerMinute.seconds(),
            now,
        );
        if minute > rule.minute {
            self.log_exceeded(client_id, endpoint, WindowKind::PerMinute);
            return RateLimitStatus::denied(WindowKind::PerMinute, now + 60, 60);
        }

        let hour = self.increment(
            Self::counter_key(client_id, endpoint, WindowKind::PerHour, now),
            WindowKind::PerHour.seconds(),
            now,
        );
        if hour > rule.hour {
            if hour as f64 > rule.hour as f64 * 1.5 {
                self.add_to_blacklist(client_id, 60, "hourly_limit_violation");
            }
            self.log_exceeded(client_id, endpoint, WindowKind::PerHour);
            return RateLimitStatus::denied(WindowKind::PerHour, now + 3600, 3600);
        }

        let day = self.increment(
            Self::counter_key(client_id, endpoint, WindowKind::Daily, now),
            WindowKind::Daily.seconds(),
            now,
        );
        if day > rule.day {
            self.add_to_blacklist(client_id, 1440, "daily_limit_violation");
            self.log_exceeded(client_id, endpoint, WindowKind::Daily);
            return RateLimitStatus::denied(WindowKind::Daily, now + 86400, 86400);
        }

        let remaining = [
            rule.burst - burst,
            rule.minute - minute,
            rule.hour - hour,
            rule.day - day,
        ]
        .into_iter()
        .min()
        .unwrap_or(0);

        RateLimitStatus::allowed(remaining, now + 60)
    }

    /// Evict expired counters and blacklist entries, at most once per
    /// five minutes of real time.
    fn cleanup_expired(&self) {
        let now = now_secs();
        {
            let mut last = self.last_cleanup.lock();
            if now.saturating_sub(*last) < CLEANUP_INTERVAL_SECS {
                return;
            }
            *last = now;
        }
        self.counters.retain(|_, entry| entry.expires_at >= now);
        self.blacklist.retain(|_, entry| entry.expires_at >= now);
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = now_secs();
        RateLimiterStats {
            active_counters: self.counters.len(),
            blacklisted_clients: self
                .blacklist
                .iter()
                .filter(|e| e.expires_at > now)
                .count(),
            whitelisted_clients: self.whitelist.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(&SecurityConfig::default(), AuditHandle::disabled())
    }

    #[test]
    fn test_client_identifier_priority() {
        assert_eq!(
            client_identifier(Some("1.2.3.4, 5.6.7.8"), None, Some("9.9.9.9"), None),
            "1.2.3.4"
        );
        assert_eq!(
            client_identifier(None, Some("5.6.7.8"), Some("9.9.9.9"), None),
            "5.6.7.8"
        );
        assert_eq!(
            client_identifier(None, None, Some("9.9.9.9"), None),
            "9.9.9.9"
        );
        let hashed = client_identifier(None, None, None, Some("curl/8.0"));
        assert_eq!(hashed.len(), 16);
    }

    #[test]
    fn test_burst_limit_denies_and_blacklists() {
        let limiter = limiter();
        // /test/rate-limit: burst=1. Second request exceeds, third crosses
        // 2x and lands the client on the blacklist.
        assert!(limiter.check("10.0.0.1", "/test/rate-limit").allowed);
        let denied = limiter.check("10.0.0.1", "/test/rate-limit");
        assert!(!denied.allowed);
        assert_eq!(denied.limit_kind, WindowKind::Burst);
        assert!(denied.retry_after.is_some());

        let _ = limiter.check("10.0.0.1", "/test/rate-limit");
        let entry = limiter.is_blacklisted("10.0.0.1").expect("blacklisted");
        assert_eq!(entry.duration_minutes, 15);
        assert_eq!(entry.reason, "burst_limit_violation");
    }

    #[test]
    fn test_blacklisted_client_gets_remaining_time() {
        let limiter = limiter();
        for _ in 0..4 {
            let _ = limiter.check("10.0.0.2", "/test/rate-limit");
        }
        let status = limiter.check("10.0.0.2", "/health");
        assert!(!status.allowed);
        let retry = status.retry_after.unwrap();
        assert!(retry > 13 * 60 && retry <= 15 * 60, "retry={retry}");
    }

    #[test]
    fn test_whitelist_bypasses_limits() {
        let limiter = limiter();
        for _ in 0..50 {
            assert!(limiter.check("127.0.0.1", "/mcp").allowed);
        }
    }

    #[test]
    fn test_whitelist_does_not_bypass_test_endpoint() {
        let limiter = limiter();
        assert!(limiter.check("127.0.0.1", "/test/rate-limit").allowed);
        assert!(!limiter.check("127.0.0.1", "/test/rate-limit").allowed);
    }

    #[test]
    fn test_endpoint_rule_matching() {
        let limiter = limiter();
        assert_eq!(limiter.rule_for("/mcp"), RateLimitRule::new(15, 60, 1000, 5000));
        // Substring match.
        assert_eq!(
            limiter.rule_for("/api/oauth/revoke/extra"),
            RateLimitRule::new(3, 10, 50, 200)
        );
        // Unknown endpoint falls back to default.
        assert_eq!(
            limiter.rule_for("/nothing-here"),
            RateLimitRule::new(5, 30, 300, 1000)
        );
    }

    #[test]
    fn test_remaining_is_minimum_across_windows() {
        let limiter = limiter();
        let status = limiter.check("10.0.0.3", "/mcp");
        // After one request: burst 15-1=14 is the tightest window.
        assert_eq!(status.remaining, 14);
    }

    #[test]
    fn test_separate_clients_do_not_interfere() {
        let limiter = limiter();
        let _ = limiter.check("10.0.0.4", "/test/rate-limit");
        let _ = limiter.check("10.0.0.4", "/test/rate-limit");
        assert!(limiter.check("10.0.0.5", "/test/rate-limit").allowed);
    }
}
