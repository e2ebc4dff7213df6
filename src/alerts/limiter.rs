use crate::model::Timestamp;
use chrono::Duration;
use std::collections::{HashMap, VecDeque};

/// Sliding-window limiter keyed by escalation target
///
/// Each key (an aggregation point, or a customer when there is none) may send
/// at most `max_per_window` escalations within `window`. Time is always passed
/// in so that the scheduler and the tests agree on the clock.
#[derive(Debug)]
pub struct EscalationLimiter {
    max_per_window: usize,
    window: Duration,
    recent: HashMap<String, VecDeque<Timestamp>>,
}

impl EscalationLimiter {
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            recent: HashMap::new(),
        }
    }

    /// One escalation per key per cooldown
    pub fn with_cooldown_minutes(minutes: i64) -> Self {
        Self::new(1, Duration::minutes(minutes.max(0)))
    }

    pub fn can_send(&mut self, key: &str, now: Timestamp) -> bool {
        self.cleanup(now);
        self.recent
            .get(key)
            .map_or(true, |sent| sent.len() < self.max_per_window)
    }

    pub fn record_at(&mut self, key: &str, timestamp: Timestamp) {
        self.recent
            .entry(key.to_string())
            .or_default()
            .push_back(timestamp);
    }

    pub fn current_count(&mut self, key: &str, now: Timestamp) -> usize {
        self.cleanup(now);
        self.recent.get(key).map_or(0, VecDeque::len)
    }

    /// Forget sends older than the window and keys left with none
    fn cleanup(&mut self, now: Timestamp) {
        let cutoff = now - self.window;
        for sent in self.recent.values_mut() {
            sent.retain(|&at| at > cutoff);
        }
        self.recent.retain(|_, sent| !sent.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(m: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap() + Duration::minutes(m)
    }

    #[test]
    fn test_cooldown_blocks_same_key() {
        let mut limiter = EscalationLimiter::with_cooldown_minutes(30);
        assert!(limiter.can_send("olt-1", at(0)));
        limiter.record_at("olt-1", at(0));

        assert!(!limiter.can_send("olt-1", at(10)));
        assert!(limiter.can_send("olt-2", at(10)));
    }

    #[test]
    fn test_cooldown_expires() {
        let mut limiter = EscalationLimiter::with_cooldown_minutes(30);
        limiter.record_at("olt-1", at(0));
        assert!(!limiter.can_send("olt-1", at(29)));
        assert!(limiter.can_send("olt-1", at(30)));
        assert_eq!(limiter.current_count("olt-1", at(30)), 0);
    }

    #[test]
    fn test_sliding_window_counts_per_key() {
        let mut limiter = EscalationLimiter::new(2, Duration::minutes(10));
        limiter.record_at("a", at(0));
        limiter.record_at("a", at(5));
        limiter.record_at("b", at(5));

        assert_eq!(limiter.current_count("a", at(6)), 2);
        assert!(!limiter.can_send("a", at(6)));
        // first send falls out of the window
        assert!(limiter.can_send("a", at(11)));
        assert_eq!(limiter.current_count("b", at(11)), 1);
    }

    #[test]
    fn test_zero_cooldown_never_blocks() {
        let mut limiter = EscalationLimiter::with_cooldown_minutes(0);
        limiter.record_at("x", at(0));
        assert!(limiter.can_send("x", at(0)));
    }
}
