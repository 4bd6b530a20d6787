// ============================================
// Dual-Window Rate Limiter
// ============================================
//
// Admission control for API-key and workspace traffic: a 60-second
// "minute" window with a nested 5-second "burst" window per id. State is
// process-local and lives behind an injectable store so a shared backend
// can replace the in-memory table without touching the windowing
// algorithm. Horizontal scaling multiplies the effective ceiling — a
// known limitation of the process-local table, not silently compensated
// here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub const MINUTE_WINDOW_MS: u64 = 60_000;
pub const BURST_WINDOW_MS: u64 = 5_000;

/// Per-minute ceiling applied when the caller supplies no valid override.
pub const DEFAULT_MINUTE_LIMIT: u32 = 100;

/// Burst (5-second) ceiling applied when the caller supplies no valid
/// override.
pub const DEFAULT_BURST_LIMIT: u32 = 20;

// ============================================
// Window State
// ============================================

/// Counter state for one rate-limited id. Created lazily on first
/// request; windows self-expire, so entries are never explicitly removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u32,
    pub window_start: u64,
    pub burst_count: u32,
    pub burst_window_start: u64,
}

/// Outcome of an admission check. The limiter never raises: callers
/// branch on `allowed` and surface `reset_in_ms` for retry-after
/// guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_in_ms: u64,
}

// ============================================
// Store
// ============================================

/// Storage for window state, keyed by API-key or workspace id.
///
/// `compare_and_swap` must atomically replace the entry only when the
/// current value equals `expected`; the limiter retries on contention.
pub trait RateLimitStore: Send + Sync {
    fn get(&self, id: &str) -> Option<WindowState>;
    fn compare_and_swap(&self, id: &str, expected: Option<WindowState>, new: WindowState) -> bool;
}

/// Default process-local store: a mutex-guarded map.
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    entries: Mutex<HashMap<String, WindowState>>,
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn get(&self, id: &str) -> Option<WindowState> {
        match self.entries.lock() {
            Ok(entries) => entries.get(id).copied(),
            Err(poisoned) => poisoned.into_inner().get(id).copied(),
        }
    }

    fn compare_and_swap(&self, id: &str, expected: Option<WindowState>, new: WindowState) -> bool {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.get(id).copied() != expected {
            return false;
        }
        entries.insert(id.to_string(), new);
        true
    }
}

// ============================================
// Limiter
// ============================================

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryRateLimitStore::default()),
        }
    }

    #[allow(dead_code)]
    pub fn with_store(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    /// Admission check for `id`. Overrides ≤ 0 or missing fall back to
    /// the defaults.
    pub fn check(
        &self,
        id: &str,
        minute_limit: Option<i64>,
        burst_limit: Option<i64>,
    ) -> RateLimitDecision {
        self.check_at(id, minute_limit, burst_limit, now_ms())
    }

    fn check_at(
        &self,
        id: &str,
        minute_limit: Option<i64>,
        burst_limit: Option<i64>,
        now: u64,
    ) -> RateLimitDecision {
        let minute_limit = effective_limit(minute_limit, DEFAULT_MINUTE_LIMIT);
        let burst_limit = effective_limit(burst_limit, DEFAULT_BURST_LIMIT);

        loop {
            let current = self.store.get(id);
            let (next, decision) = step(current, minute_limit, burst_limit, now);
            if self.store.compare_and_swap(id, current, next) {
                return decision;
            }
            // Lost a race for this id; recompute against the fresh state.
        }
    }
}

/// One transition of the dual-window counter. Pure: returns the state to
/// store and the decision to hand back.
fn step(
    current: Option<WindowState>,
    minute_limit: u32,
    burst_limit: u32,
    now: u64,
) -> (WindowState, RateLimitDecision) {
    let mut state = match current {
        Some(s) if now.saturating_sub(s.window_start) < MINUTE_WINDOW_MS => s,
        // First request, or the minute window lapsed: start both windows
        // fresh and admit.
        _ => {
            let fresh = WindowState {
                count: 1,
                window_start: now,
                burst_count: 1,
                burst_window_start: now,
            };
            let decision = RateLimitDecision {
                allowed: true,
                remaining: minute_limit.saturating_sub(1),
                reset_in_ms: MINUTE_WINDOW_MS,
            };
            return (fresh, decision);
        }
    };

    if now.saturating_sub(state.burst_window_start) >= BURST_WINDOW_MS {
        state.burst_count = 1;
        state.burst_window_start = now;
    } else {
        state.burst_count += 1;
        if state.burst_count > burst_limit {
            let decision = RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_in_ms: BURST_WINDOW_MS - (now - state.burst_window_start),
            };
            return (state, decision);
        }
    }

    state.count += 1;
    if state.count > minute_limit {
        let decision = RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_in_ms: MINUTE_WINDOW_MS - (now - state.window_start),
        };
        return (state, decision);
    }

    let decision = RateLimitDecision {
        allowed: true,
        remaining: minute_limit.saturating_sub(state.count),
        reset_in_ms: MINUTE_WINDOW_MS - (now - state.window_start),
    };
    (state, decision)
}

fn effective_limit(value: Option<i64>, default: u32) -> u32 {
    match value {
        Some(v) if v >= 1 => v.min(u32::MAX as i64) as u32,
        _ => default,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_window_rejects_the_sixth_rapid_request() {
        let limiter = RateLimiter::in_memory();
        let t0 = 1_000_000;

        // Six checks spread over 4 seconds with burst_limit = 5.
        for i in 0..5 {
            let d = limiter.check_at("key-1", Some(100), Some(5), t0 + i * 800);
            assert!(d.allowed, "request {} should pass", i + 1);
        }
        let rejected = limiter.check_at("key-1", Some(100), Some(5), t0 + 4_000);
        assert!(!rejected.allowed);
        assert!(rejected.reset_in_ms <= BURST_WINDOW_MS);

        // Past the burst window the id is admitted again.
        let after = limiter.check_at("key-1", Some(100), Some(5), t0 + 6_000);
        assert!(after.allowed);
    }

    #[test]
    fn minute_window_caps_sustained_traffic() {
        let limiter = RateLimiter::in_memory();
        let t0 = 0;

        // 3/minute with a roomy burst limit; the fourth request within the
        // minute is rejected with the minute window's reset.
        for i in 0..3 {
            let d = limiter.check_at("ws-1", Some(3), Some(100), t0 + i * 10_000);
            assert!(d.allowed);
        }
        let rejected = limiter.check_at("ws-1", Some(3), Some(100), t0 + 30_000);
        assert!(!rejected.allowed);
        assert_eq!(rejected.reset_in_ms, MINUTE_WINDOW_MS - 30_000);

        // A fresh minute window resets both counters.
        let next_window = limiter.check_at("ws-1", Some(3), Some(100), t0 + 61_000);
        assert!(next_window.allowed);
        assert_eq!(next_window.remaining, 2);
    }

    #[test]
    fn burst_rejection_does_not_consume_minute_budget() {
        let limiter = RateLimiter::in_memory();
        let t0 = 0;

        for _ in 0..2 {
            assert!(limiter.check_at("id", Some(3), Some(2), t0).allowed);
        }
        // Burst-rejected: the minute counter must not advance.
        assert!(!limiter.check_at("id", Some(3), Some(2), t0 + 1).allowed);

        // After the burst window there is still one unit of minute budget.
        let d = limiter.check_at("id", Some(3), Some(2), t0 + 5_001);
        assert!(d.allowed);
        assert_eq!(d.remaining, 0);
    }

    #[test]
    fn invalid_overrides_fall_back_to_defaults() {
        assert_eq!(effective_limit(None, DEFAULT_MINUTE_LIMIT), DEFAULT_MINUTE_LIMIT);
        assert_eq!(effective_limit(Some(0), DEFAULT_MINUTE_LIMIT), DEFAULT_MINUTE_LIMIT);
        assert_eq!(effective_limit(Some(-10), DEFAULT_BURST_LIMIT), DEFAULT_BURST_LIMIT);
        assert_eq!(effective_limit(Some(250), DEFAULT_MINUTE_LIMIT), 250);
    }

    #[test]
    fn ids_are_isolated_from_each_other() {
        let limiter = RateLimiter::in_memory();
        let t0 = 0;

        assert!(limiter.check_at("a", Some(1), Some(1), t0).allowed);
        assert!(!limiter.check_at("a", Some(1), Some(1), t0 + 10).allowed);
        assert!(limiter.check_at("b", Some(1), Some(1), t0 + 10).allowed);
    }

    #[test]
    fn concurrent_checks_never_lose_updates() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let limiter = StdArc::new(RateLimiter::in_memory());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let limiter = StdArc::clone(&limiter);
            handles.push(thread::spawn(move || {
                let mut allowed = 0u32;
                for _ in 0..25 {
                    if limiter.check_at("shared", Some(1_000), Some(1_000), 0).allowed {
                        allowed += 1;
                    }
                }
                allowed
            }));
        }

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // All 200 checks fit under both limits, so every increment must
        // survive the CAS contention.
        assert_eq!(total, 200);
    }
}
