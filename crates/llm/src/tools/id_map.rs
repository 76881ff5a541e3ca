//! Correlation of client-visible tool-call IDs with upstream-visible ones.

use std::time::Duration;

use mini_moka::sync::Cache;
use uuid::Uuid;

/// Idle TTL after which an entry expires.
const ENTRY_TTL: Duration = Duration::from_secs(60 * 60);

/// Upper bound on live entries; least-recently-used entries evict beyond it.
const MAX_ENTRIES: u64 = 10_000;

/// Synthesizes a fresh client-facing tool-call ID: `call_` + 24 hex chars.
pub fn synthesize_call_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("call_{}", &hex[..24])
}

/// Bounded map from client-facing tool-call IDs to the upstream-side
/// identity of the call (the provider's own ID, or the bare tool name for
/// providers that correlate by name).
///
/// Entries expire after one hour without access and the map is capped by LRU
/// eviction. Expiry and eviction piggyback on map operations; there is no
/// background timer thread.
pub struct ToolCallIdMap {
    entries: Cache<String, String>,
}

impl Default for ToolCallIdMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallIdMap {
    pub fn new() -> Self {
        Self::with_limits(ENTRY_TTL, MAX_ENTRIES)
    }

    /// Custom bounds, used by tests to exercise expiry quickly.
    pub fn with_limits(ttl: Duration, capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .time_to_idle(ttl)
                .build(),
        }
    }

    /// Records the upstream identity for a client-facing call ID.
    pub fn insert(&self, client_id: String, upstream_id: String) {
        self.entries.insert(client_id, upstream_id);
    }

    /// Looks up the upstream identity for a client-facing call ID, refreshing
    /// its idle deadline. Never returns an entry past its deadline.
    pub fn resolve(&self, client_id: &str) -> Option<String> {
        self.entries.get(&client_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_ids_have_the_fixed_shape() {
        let id = synthesize_call_id();

        assert!(id.starts_with("call_"));
        assert_eq!(id.len(), "call_".len() + 24);
        assert!(id["call_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn synthesized_ids_are_unique() {
        assert_ne!(synthesize_call_id(), synthesize_call_id());
    }

    #[test]
    fn lookup_before_deadline_hits() {
        let map = ToolCallIdMap::with_limits(Duration::from_secs(60), 16);
        map.insert("call_1".into(), "toolu_a".into());

        assert_eq!(map.resolve("call_1").as_deref(), Some("toolu_a"));
    }

    #[test]
    fn lookup_after_deadline_misses() {
        let map = ToolCallIdMap::with_limits(Duration::from_millis(40), 16);
        map.insert("call_1".into(), "toolu_a".into());

        std::thread::sleep(Duration::from_millis(80));

        assert_eq!(map.resolve("call_1"), None);
    }

    #[test]
    fn unknown_ids_miss() {
        let map = ToolCallIdMap::new();
        assert_eq!(map.resolve("call_nope"), None);
    }
}
