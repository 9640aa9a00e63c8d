//! Re-acceptance cooldown for recently matched cards

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::storage::CardKey;

/// Time-boxed suppression of repeat acceptance per card key
#[derive(Debug, Clone)]
pub struct CooldownMap {
    window: Duration,
    entries: HashMap<CardKey, Instant>,
}

impl CooldownMap {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Drop entries older than the window
    pub fn sweep(&mut self, now: Instant) {
        let window = self.window;
        self.entries.retain(|_, stamped| now.saturating_duration_since(*stamped) < window);
    }

    /// Record an acceptance
    pub fn stamp(&mut self, key: CardKey, now: Instant) {
        self.entries.insert(key, now);
    }

    /// Whether the key was accepted within the window
    pub fn is_cooling(&self, key: &CardKey, now: Instant) -> bool {
        self.entries
            .get(key)
            .is_some_and(|stamped| now.saturating_duration_since(*stamped) < self.window)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(set: &str, cn: &str) -> CardKey {
        CardKey {
            set_code: set.to_string(),
            collector_number: cn.to_string(),
        }
    }

    #[test]
    fn test_stamp_and_expire() {
        let mut map = CooldownMap::new(Duration::from_secs(5));
        let t0 = Instant::now();
        map.stamp(key("1", "1"), t0);

        assert!(map.is_cooling(&key("1", "1"), t0 + Duration::from_secs(1)));
        assert!(!map.is_cooling(&key("1", "2"), t0));
        assert!(!map.is_cooling(&key("1", "1"), t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_sweep_removes_stale_entries() {
        let mut map = CooldownMap::new(Duration::from_secs(5));
        let t0 = Instant::now();
        map.stamp(key("1", "1"), t0);
        map.stamp(key("2", "9"), t0 + Duration::from_secs(3));

        map.sweep(t0 + Duration::from_secs(6));
        assert_eq!(map.len(), 1);
        assert!(map.is_cooling(&key("2", "9"), t0 + Duration::from_secs(6)));

        map.clear();
        assert!(map.is_empty());
    }
}
