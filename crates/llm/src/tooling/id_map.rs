//! Tool-call identity map.
//!
//! Correlates client-facing call IDs with upstream-facing IDs across
//! conversation turns. Entries expire an hour after their last access and
//! the map is bounded, trimming least-recently-used entries past the cap.
//! Sweeps are opportunistic, piggybacked on insertions; there is no
//! background timer.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_CAPACITY: usize = 10_000;
/// Sweep on every Nth insertion.
const SWEEP_INTERVAL: u64 = 128;

/// A fresh client-facing call ID: `call_` plus 24 hex chars.
pub(crate) fn generate_call_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &hex[..24])
}

struct IdEntry {
    upstream_id: String,
    expires_at: Instant,
    last_access: u64,
}

/// Bounded TTL+LRU map from client call IDs to upstream call IDs.
pub(crate) struct ToolCallIdMap {
    entries: DashMap<String, IdEntry>,
    /// Logical clock for LRU ordering.
    clock: AtomicU64,
    insertions: AtomicU64,
    /// Serializes eviction; reads and writes stay concurrent.
    sweep_lock: Mutex<()>,
    ttl: Duration,
    capacity: usize,
}

impl ToolCallIdMap {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_TTL, DEFAULT_CAPACITY)
    }

    pub fn with_settings(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            clock: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            sweep_lock: Mutex::new(()),
            ttl,
            capacity,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Record a client → upstream ID pairing.
    pub fn insert(&self, client_id: impl Into<String>, upstream_id: impl Into<String>) {
        let stamp = self.tick();

        self.entries.insert(
            client_id.into(),
            IdEntry {
                upstream_id: upstream_id.into(),
                expires_at: Instant::now() + self.ttl,
                last_access: stamp,
            },
        );

        if self.insertions.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.sweep();
        }
    }

    /// Look up the upstream ID for a client ID.
    ///
    /// A hit refreshes both the deadline and the LRU stamp. An expired
    /// entry is removed on sight and reported as a miss.
    pub fn get(&self, client_id: &str) -> Option<String> {
        let now = Instant::now();

        {
            let mut entry = self.entries.get_mut(client_id)?;

            if entry.expires_at > now {
                entry.expires_at = now + self.ttl;
                entry.last_access = self.tick();
                return Some(entry.upstream_id.clone());
            }
        }

        self.entries.remove(client_id);
        None
    }

    /// Drop expired entries, then trim least-recently-used entries down to
    /// capacity. Concurrent sweeps coalesce into one.
    pub fn sweep(&self) {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            return;
        };

        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);

        let excess = self.entries.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }

        let mut stamps: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.last_access))
            .collect();
        stamps.sort_by_key(|(_, stamp)| *stamp);

        for (key, _) in stamps.into_iter().take(excess) {
            self.entries.remove(&key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_ids_have_the_expected_shape() {
        let id = generate_call_id();
        assert_eq!(id.len(), "call_".len() + 24);
        assert!(id.starts_with("call_"));
        assert!(id["call_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn lookup_before_deadline_hits_after_deadline_misses() {
        let map = ToolCallIdMap::with_settings(Duration::from_millis(40), 100);
        map.insert("call_a", "toolu_1");

        assert_eq!(map.get("call_a").as_deref(), Some("toolu_1"));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(map.get("call_a"), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn access_refreshes_the_deadline() {
        let map = ToolCallIdMap::with_settings(Duration::from_millis(50), 100);
        map.insert("call_a", "toolu_1");

        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(30));
            assert_eq!(map.get("call_a").as_deref(), Some("toolu_1"));
        }
    }

    #[test]
    fn sweep_trims_least_recently_used_past_capacity() {
        let map = ToolCallIdMap::with_settings(Duration::from_secs(60), 3);

        for i in 0..5 {
            map.insert(format!("call_{i}"), format!("toolu_{i}"));
        }

        // Touch the oldest so it outranks call_1 and call_2.
        assert!(map.get("call_0").is_some());

        map.sweep();
        assert_eq!(map.len(), 3);
        assert!(map.get("call_0").is_some());
        assert!(map.get("call_1").is_none());
        assert!(map.get("call_2").is_none());
        assert!(map.get("call_3").is_some());
        assert!(map.get("call_4").is_some());
    }

    #[test]
    fn insertions_trigger_opportunistic_sweeps() {
        let map = ToolCallIdMap::with_settings(Duration::from_secs(60), 10);

        for i in 0..(SWEEP_INTERVAL as usize + 10) {
            map.insert(format!("call_{i}"), format!("toolu_{i}"));
        }

        // The 128th insertion swept down to capacity; only the 10 inserts
        // after it can exceed the cap.
        assert!(map.len() <= 20);
        assert!(map.len() >= 10);
    }
}
