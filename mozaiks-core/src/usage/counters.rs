//! Per-period token counters with lazy reset.

use std::collections::HashMap;

use chrono::{Datelike, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct Counter {
    period_key: String,
    used: u64,
}

/// Tracks token consumption per `(app_id, user_id)` within the current
/// period. The counter resets lazily on first access in a new period.
pub struct TokenCounters {
    counters: Mutex<HashMap<(String, String), Counter>>,
}

impl Default for TokenCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounters {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    fn current_period() -> String {
        let now = Utc::now();
        format!("{:04}-{:02}", now.year(), now.month())
    }

    /// Add consumed tokens and return the period total.
    pub fn add(&self, app_id: &str, user_id: &str, tokens: u64) -> u64 {
        let period = Self::current_period();
        let mut counters = self.counters.lock();
        let counter = counters
            .entry((app_id.to_string(), user_id.to_string()))
            .or_insert_with(|| Counter {
                period_key: period.clone(),
                used: 0,
            });
        if counter.period_key != period {
            counter.period_key = period;
            counter.used = 0;
        }
        counter.used += tokens;
        counter.used
    }

    /// Tokens used so far this period.
    pub fn used(&self, app_id: &str, user_id: &str) -> u64 {
        let period = Self::current_period();
        let counters = self.counters.lock();
        match counters.get(&(app_id.to_string(), user_id.to_string())) {
            Some(counter) if counter.period_key == period => counter.used,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_within_period() {
        let counters = TokenCounters::new();
        assert_eq!(counters.add("a_1", "u_1", 100), 100);
        assert_eq!(counters.add("a_1", "u_1", 50), 150);
        assert_eq!(counters.used("a_1", "u_1"), 150);
    }

    #[test]
    fn test_isolated_per_user_and_app() {
        let counters = TokenCounters::new();
        counters.add("a_1", "u_1", 100);
        assert_eq!(counters.used("a_1", "u_2"), 0);
        assert_eq!(counters.used("a_2", "u_1"), 0);
    }

    #[test]
    fn test_stale_period_reads_zero() {
        let counters = TokenCounters::new();
        counters.add("a_1", "u_1", 100);
        // Force a stale period key to simulate month rollover.
        counters
            .counters
            .lock()
            .get_mut(&("a_1".to_string(), "u_1".to_string()))
            .unwrap()
            .period_key = "1999-01".to_string();

        assert_eq!(counters.used("a_1", "u_1"), 0);
        assert_eq!(counters.add("a_1", "u_1", 10), 10);
    }
}
