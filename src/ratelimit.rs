use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

/// How often empty provider buckets are swept, in milliseconds.
const SWEEP_INTERVAL_MS: u64 = 60_000;

/// Per-provider admission budget: at most `max_requests` calls within any
/// trailing `window_ms` interval.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub max_requests: usize,
    pub window_ms: u64,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub retry_after_secs: Option<u64>,
}

/// Read-only usage snapshot for one provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUsage {
    pub provider: String,
    pub used: usize,
    pub limit: usize,
    pub remaining: usize,
    pub reset_in_seconds: u64,
}

/// Sliding-window rate limiter over per-provider call timestamps.
///
/// Buckets are created on the first recorded call per provider and dropped as
/// soon as pruning empties them (a periodic sweep covers providers that are
/// never checked again). A call that was admitted must be recorded via
/// `record_call` before the next admission check for the window to stay
/// accurate.
pub struct RateLimiter {
    default_rule: RateLimitRule,
    rules: HashMap<String, RateLimitRule>,
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
    last_sweep_ms: Mutex<u64>,
}

impl RateLimiter {
    pub fn new(default_rule: RateLimitRule) -> Self {
        Self {
            default_rule,
            rules: HashMap::new(),
            windows: Mutex::new(HashMap::new()),
            last_sweep_ms: Mutex::new(0),
        }
    }

    /// Overrides the budget for one provider. Unconfigured providers use the
    /// default rule.
    pub fn with_rule(mut self, provider: impl Into<String>, rule: RateLimitRule) -> Self {
        self.rules.insert(provider.into(), rule);
        self
    }

    fn rule_for(&self, provider: &str) -> RateLimitRule {
        self.rules.get(provider).copied().unwrap_or(self.default_rule)
    }

    pub fn check_admission(&self, provider: &str) -> Admission {
        self.check_admission_at(provider, now_ms())
    }

    /// Admission decision against an injected clock. Prunes the provider's
    /// window before deciding; denial carries the seconds until the oldest
    /// in-window call falls out.
    pub fn check_admission_at(&self, provider: &str, now_ms: u64) -> Admission {
        self.sweep_if_due(now_ms);

        let rule = self.rule_for(provider);
        let mut windows = self.windows.lock().unwrap();
        // A check records nothing, so it must not leave a bucket behind.
        if let Some(window) = windows.get_mut(provider) {
            prune(window, now_ms, rule.window_ms);
            if window.is_empty() {
                windows.remove(provider);
            }
        }
        let window = windows.get(provider);
        let used = window.map_or(0, |w| w.len());

        if used >= rule.max_requests {
            let wait_ms = window
                .and_then(|w| w.front())
                .map(|oldest| (oldest + rule.window_ms).saturating_sub(now_ms))
                .unwrap_or(rule.window_ms);
            let retry_after = wait_ms.div_ceil(1000).max(1);
            return Admission {
                allowed: false,
                retry_after_secs: Some(retry_after),
            };
        }

        Admission {
            allowed: true,
            retry_after_secs: None,
        }
    }

    pub fn record_call(&self, provider: &str) {
        self.record_call_at(provider, now_ms());
    }

    pub fn record_call_at(&self, provider: &str, now_ms: u64) {
        let mut windows = self.windows.lock().unwrap();
        windows.entry(provider.to_string()).or_default().push_back(now_ms);
    }

    pub fn status_snapshot(&self) -> Vec<ProviderUsage> {
        self.status_snapshot_at(now_ms())
    }

    /// Per-provider usage. Mutates nothing besides pruning expired calls and
    /// dropping buckets the pruning emptied.
    pub fn status_snapshot_at(&self, now_ms: u64) -> Vec<ProviderUsage> {
        let mut windows = self.windows.lock().unwrap();
        windows.retain(|provider, window| {
            let rule = self.rule_for(provider);
            prune(window, now_ms, rule.window_ms);
            !window.is_empty()
        });
        let mut usages: Vec<ProviderUsage> = windows
            .iter()
            .map(|(provider, window)| {
                let rule = self.rule_for(provider);
                let used = window.len();
                let reset_in_seconds = window
                    .front()
                    .map(|oldest| (oldest + rule.window_ms).saturating_sub(now_ms).div_ceil(1000))
                    .unwrap_or(0);
                ProviderUsage {
                    provider: provider.clone(),
                    used,
                    limit: rule.max_requests,
                    remaining: rule.max_requests.saturating_sub(used),
                    reset_in_seconds,
                }
            })
            .collect();
        usages.sort_by(|a, b| a.provider.cmp(&b.provider));
        usages
    }

    /// Drops empty provider buckets. Runs at most once per sweep interval so
    /// the map stays bounded without per-call overhead.
    fn sweep_if_due(&self, now_ms: u64) {
        let mut last = self.last_sweep_ms.lock().unwrap();
        if now_ms.saturating_sub(*last) < SWEEP_INTERVAL_MS {
            return;
        }
        *last = now_ms;
        drop(last);

        let mut windows = self.windows.lock().unwrap();
        windows.retain(|provider, window| {
            let rule = self.rules.get(provider).copied().unwrap_or(self.default_rule);
            prune(window, now_ms, rule.window_ms);
            !window.is_empty()
        });
    }
}

fn prune(window: &mut VecDeque<u64>, now_ms: u64, window_ms: u64) {
    let cutoff = now_ms.saturating_sub(window_ms);
    while window.front().is_some_and(|&ts| ts < cutoff) {
        window.pop_front();
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: usize, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitRule {
            max_requests: max,
            window_ms,
        })
    }

    #[test]
    fn admits_up_to_the_limit() {
        let rl = limiter(3, 10_000);
        for i in 0..3 {
            assert!(rl.check_admission_at("openai", 1_000 + i).allowed);
            rl.record_call_at("openai", 1_000 + i);
        }
        let denied = rl.check_admission_at("openai", 1_500);
        assert!(!denied.allowed);
    }

    #[test]
    fn never_exceeds_limit_in_any_trailing_window() {
        let rl = limiter(5, 60_000);
        let mut admitted: Vec<u64> = Vec::new();
        // Synthetic bursty timestamps over three minutes.
        for ts in (0..180_000).step_by(4_000) {
            if rl.check_admission_at("openai", ts).allowed {
                rl.record_call_at("openai", ts);
                admitted.push(ts);
            }
        }
        for &ts in &admitted {
            let in_window = admitted
                .iter()
                .filter(|&&other| other <= ts && other + 60_000 > ts)
                .count();
            assert!(in_window <= 5, "window ending at {ts} held {in_window} calls");
        }
    }

    #[test]
    fn window_slides_and_readmits() {
        let rl = limiter(2, 10_000);
        rl.record_call_at("openai", 1_000);
        rl.record_call_at("openai", 2_000);
        assert!(!rl.check_admission_at("openai", 5_000).allowed);
        // Oldest call falls out of the window.
        assert!(rl.check_admission_at("openai", 11_100).allowed);
    }

    #[test]
    fn retry_after_is_ceiling_seconds_with_minimum_one() {
        let rl = limiter(1, 10_000);
        rl.record_call_at("openai", 1_000);
        // Oldest expires at 11_000; at 8_500 that is 2_500ms away -> ceil 3s.
        let denied = rl.check_admission_at("openai", 8_500);
        assert_eq!(denied.retry_after_secs, Some(3));
        // 400ms away rounds up to the 1s minimum.
        let denied = rl.check_admission_at("openai", 10_600);
        assert_eq!(denied.retry_after_secs, Some(1));
    }

    #[test]
    fn providers_have_independent_windows() {
        let rl = limiter(1, 60_000);
        rl.record_call_at("openai", 1_000);
        assert!(!rl.check_admission_at("openai", 2_000).allowed);
        assert!(rl.check_admission_at("anthropic", 2_000).allowed);
    }

    #[test]
    fn per_provider_rules_override_default() {
        let rl = limiter(1, 60_000).with_rule(
            "deepseek",
            RateLimitRule {
                max_requests: 3,
                window_ms: 60_000,
            },
        );
        rl.record_call_at("deepseek", 1_000);
        rl.record_call_at("deepseek", 1_001);
        assert!(rl.check_admission_at("deepseek", 1_002).allowed);
    }

    #[test]
    fn snapshot_reports_usage_without_admitting() {
        let rl = limiter(4, 60_000);
        rl.record_call_at("openai", 1_000);
        rl.record_call_at("openai", 2_000);
        let snapshot = rl.status_snapshot_at(30_000);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].used, 2);
        assert_eq!(snapshot[0].limit, 4);
        assert_eq!(snapshot[0].remaining, 2);
        // Oldest call expires at 61_000, 31s away.
        assert_eq!(snapshot[0].reset_in_seconds, 31);
        // Snapshot must not consume budget.
        assert!(rl.check_admission_at("openai", 30_000).allowed);
    }

    #[test]
    fn denied_or_unrecorded_checks_leave_no_bucket() {
        let rl = limiter(3, 10_000);
        assert!(rl.check_admission_at("openai", 1_000).allowed);
        assert!(rl.check_admission_at("openai", 1_001).allowed);
        // No record_call, so the provider never shows up anywhere.
        assert!(rl.status_snapshot_at(1_002).is_empty());
        assert!(!rl.windows.lock().unwrap().contains_key("openai"));
    }

    #[test]
    fn snapshot_drops_fully_expired_providers() {
        let rl = limiter(3, 10_000);
        rl.record_call_at("openai", 1_000);
        assert_eq!(rl.status_snapshot_at(2_000).len(), 1);
        // All recorded calls aged out; the provider no longer reports.
        assert!(rl.status_snapshot_at(20_000).is_empty());
        assert!(!rl.windows.lock().unwrap().contains_key("openai"));
    }

    #[test]
    fn sweep_drops_empty_buckets() {
        let rl = limiter(2, 1_000);
        rl.record_call_at("openai", 1_000);
        // First check sets the sweep clock, second one (past the interval)
        // sweeps the long-expired bucket.
        rl.check_admission_at("anthropic", 2_000);
        rl.check_admission_at("anthropic", 2_000 + SWEEP_INTERVAL_MS);
        let windows = rl.windows.lock().unwrap();
        assert!(!windows.contains_key("openai"));
    }
}
