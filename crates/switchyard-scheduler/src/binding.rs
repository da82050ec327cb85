//! Two-tier binding cache
//!
//! A binding remembers which channel served a (group, model) pair so
//! consecutive requests keep landing on the same upstream. The memory
//! tier serves the hot path; a durable tier warms fresh processes after
//! a restart. Every mutation carries a reason and bumps a counter, which
//! is what the admin surface reads when cache behavior looks wrong.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strum::Display;
use switchyard_core::BindingStore;

use crate::bounded;
use crate::stats::BindingRuntime;

/// Durable payload format version this build writes and accepts
const PAYLOAD_VERSION: i64 = 1;

/// Why a binding was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SetReason {
    /// Fresh scheduling decision
    Select,
    /// Same binding reused by a subsequent request
    Touch,
    /// Repopulated from the durable tier after a memory miss
    StoreRestore,
}

/// Why a binding was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ClearReason {
    /// TTL elapsed
    Expired,
    /// Admin action
    Manual,
    /// Bound channel no longer valid for the group
    Ineligible,
    /// Bound channel awaits a recovery probe held by another request
    ProbePending,
    /// Persisted payload failed to decode
    ParseError,
}

/// A cached (group, model) -> channel assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub channel_id: i64,
    pub credential_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindingKey {
    group_id: i64,
    model: String,
}

impl BindingKey {
    fn store_key(&self) -> String {
        format!("binding:{}:{}", self.group_id, self.model)
    }
}

struct BindingEntry {
    channel_id: i64,
    credential_id: Option<i64>,
    expires_at_ms: i64,
}

/// Durable tier payload; unknown versions are dropped, never served
#[derive(Debug, Serialize, Deserialize)]
struct BindingPayload {
    v: i64,
    channel_id: i64,
    #[serde(default)]
    credential_id: Option<i64>,
}

#[derive(Default)]
struct BindingCounters {
    memory_hits: AtomicU64,
    store_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    set_by_select: AtomicU64,
    set_by_touch: AtomicU64,
    set_by_store_restore: AtomicU64,
    refreshes: AtomicU64,
    clears: AtomicU64,
    clear_expired: AtomicU64,
    clear_manual: AtomicU64,
    clear_ineligible: AtomicU64,
    clear_probe_pending: AtomicU64,
    clear_parse_error: AtomicU64,
    store_read_errors: AtomicU64,
    store_write_errors: AtomicU64,
    store_delete_errors: AtomicU64,
}

impl BindingCounters {
    fn set_counter(&self, reason: SetReason) -> &AtomicU64 {
        match reason {
            SetReason::Select => &self.set_by_select,
            SetReason::Touch => &self.set_by_touch,
            SetReason::StoreRestore => &self.set_by_store_restore,
        }
    }

    fn clear_counter(&self, reason: ClearReason) -> &AtomicU64 {
        match reason {
            ClearReason::Expired => &self.clear_expired,
            ClearReason::Manual => &self.clear_manual,
            ClearReason::Ineligible => &self.clear_ineligible,
            ClearReason::ProbePending => &self.clear_probe_pending,
            ClearReason::ParseError => &self.clear_parse_error,
        }
    }
}

/// Two-tier (group, model) -> channel binding cache
///
/// The memory tier is authoritative for the running process; the durable
/// tier is best-effort cache warming. Store trouble of any kind degrades
/// to memory-only behavior and never blocks request serving.
pub struct BindingCache {
    entries: DashMap<BindingKey, BindingEntry>,
    store: Option<Arc<dyn BindingStore>>,
    ttl: Duration,
    store_timeout: Duration,
    counters: BindingCounters,
}

impl BindingCache {
    pub fn new(
        ttl: Duration,
        store_timeout: Duration,
        store: Option<Arc<dyn BindingStore>>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            store,
            ttl,
            store_timeout,
            counters: BindingCounters::default(),
        }
    }

    /// Look up the binding for a (group, model) pair
    ///
    /// Memory first; on a miss the durable tier is consulted and a hit
    /// restores the entry into memory. Expired memory entries clear with
    /// reason `expired` before the durable tier is tried.
    pub async fn resolve(&self, group_id: i64, model: &str, now_ms: i64) -> Option<Binding> {
        let key = BindingKey {
            group_id,
            model: model.to_owned(),
        };

        let mut stale = false;
        if let Some(entry) = self.entries.get(&key) {
            if entry.expires_at_ms > now_ms {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                return Some(Binding {
                    channel_id: entry.channel_id,
                    credential_id: entry.credential_id,
                });
            }
            stale = true;
        }
        if stale
            && self
                .entries
                .remove_if(&key, |_, entry| entry.expires_at_ms <= now_ms)
                .is_some()
        {
            self.count_clear(ClearReason::Expired);
            tracing::debug!(group_id, model, "binding expired");
        }

        if let Some(payload) = self.read_durable(&key).await {
            self.counters.store_hits.fetch_add(1, Ordering::Relaxed);
            self.set(
                group_id,
                model,
                payload.channel_id,
                payload.credential_id,
                SetReason::StoreRestore,
                now_ms,
            )
            .await;
            return Some(Binding {
                channel_id: payload.channel_id,
                credential_id: payload.credential_id,
            });
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write a binding into the memory tier, tagged with why
    ///
    /// `select` and `store-restore` also write through to the durable
    /// tier best-effort; `touch` stays memory-only so reuse never waits
    /// on the store.
    pub async fn set(
        &self,
        group_id: i64,
        model: &str,
        channel_id: i64,
        credential_id: Option<i64>,
        reason: SetReason,
        now_ms: i64,
    ) {
        let key = BindingKey {
            group_id,
            model: model.to_owned(),
        };
        let entry = BindingEntry {
            channel_id,
            credential_id,
            expires_at_ms: now_ms.saturating_add(self.ttl_ms()),
        };

        let refreshed = self
            .entries
            .insert(key.clone(), entry)
            .is_some_and(|prev| prev.channel_id == channel_id);

        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        self.counters.set_counter(reason).fetch_add(1, Ordering::Relaxed);
        if refreshed {
            self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(group_id, model, channel_id, reason = %reason, "binding set");

        if matches!(reason, SetReason::Select | SetReason::StoreRestore)
            && let Some(store) = &self.store
        {
            let payload = BindingPayload {
                v: PAYLOAD_VERSION,
                channel_id,
                credential_id,
            };
            if let Ok(encoded) = serde_json::to_string(&payload)
                && let Err(e) = bounded(
                    self.store_timeout,
                    store.put_binding(&key.store_key(), &encoded, self.ttl),
                )
                .await
            {
                self.counters.store_write_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(group_id, model, error = %e, "binding store write failed");
            }
        }
    }

    /// Drop the binding for one (group, model) pair
    ///
    /// The durable row is deleted even when the memory tier had nothing,
    /// so an admin clear lands after a restart too.
    pub async fn clear(&self, group_id: i64, model: &str, reason: ClearReason) {
        let key = BindingKey {
            group_id,
            model: model.to_owned(),
        };
        if self.entries.remove(&key).is_some() {
            self.count_clear(reason);
            tracing::debug!(group_id, model, reason = %reason, "binding cleared");
        }
        self.delete_durable(&key).await;
    }

    /// Drop every binding of a group that points at one channel
    pub async fn clear_channel(&self, group_id: i64, channel_id: i64, reason: ClearReason) {
        let keys: Vec<BindingKey> = self
            .entries
            .iter()
            .filter(|entry| {
                entry.key().group_id == group_id && entry.value().channel_id == channel_id
            })
            .map(|entry| entry.key().clone())
            .collect();

        for key in keys {
            if self.entries.remove(&key).is_some() {
                self.count_clear(reason);
                tracing::debug!(
                    group_id,
                    model = %key.model,
                    channel_id,
                    reason = %reason,
                    "binding cleared"
                );
            }
            self.delete_durable(&key).await;
        }
    }

    /// Drop every binding of a group
    pub async fn clear_group(&self, group_id: i64, reason: ClearReason) {
        let keys: Vec<BindingKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key().group_id == group_id)
            .map(|entry| entry.key().clone())
            .collect();

        for key in keys {
            if self.entries.remove(&key).is_some() {
                self.count_clear(reason);
                tracing::debug!(group_id, model = %key.model, reason = %reason, "binding cleared");
            }
            self.delete_durable(&key).await;
        }
    }

    /// Counter snapshot for the admin surface
    pub fn snapshot(&self) -> BindingRuntime {
        let c = &self.counters;
        BindingRuntime {
            available: true,
            memory_hits: c.memory_hits.load(Ordering::Relaxed),
            store_hits: c.store_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            sets: c.sets.load(Ordering::Relaxed),
            set_by_select: c.set_by_select.load(Ordering::Relaxed),
            set_by_touch: c.set_by_touch.load(Ordering::Relaxed),
            set_by_store_restore: c.set_by_store_restore.load(Ordering::Relaxed),
            refreshes: c.refreshes.load(Ordering::Relaxed),
            clears: c.clears.load(Ordering::Relaxed),
            clear_expired: c.clear_expired.load(Ordering::Relaxed),
            clear_manual: c.clear_manual.load(Ordering::Relaxed),
            clear_ineligible: c.clear_ineligible.load(Ordering::Relaxed),
            clear_probe_pending: c.clear_probe_pending.load(Ordering::Relaxed),
            clear_parse_error: c.clear_parse_error.load(Ordering::Relaxed),
            store_read_errors: c.store_read_errors.load(Ordering::Relaxed),
            store_write_errors: c.store_write_errors.load(Ordering::Relaxed),
            store_delete_errors: c.store_delete_errors.load(Ordering::Relaxed),
        }
    }

    async fn read_durable(&self, key: &BindingKey) -> Option<BindingPayload> {
        let store = self.store.as_ref()?;
        let raw = match bounded(self.store_timeout, store.get_binding(&key.store_key())).await {
            Ok(raw) => raw?,
            Err(e) => {
                self.counters.store_read_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    group_id = key.group_id,
                    model = %key.model,
                    error = %e,
                    "binding store read failed"
                );
                return None;
            }
        };

        match serde_json::from_str::<BindingPayload>(&raw) {
            Ok(payload) if payload.v == PAYLOAD_VERSION => Some(payload),
            _ => {
                // Corrupt or future-schema rows are dropped, never served.
                self.count_clear(ClearReason::ParseError);
                tracing::warn!(
                    group_id = key.group_id,
                    model = %key.model,
                    "undecodable binding payload dropped"
                );
                self.delete_durable(key).await;
                None
            }
        }
    }

    async fn delete_durable(&self, key: &BindingKey) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = bounded(self.store_timeout, store.delete_binding(&key.store_key())).await {
            self.counters.store_delete_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                group_id = key.group_id,
                model = %key.model,
                error = %e,
                "binding store delete failed"
            );
        }
    }

    fn count_clear(&self, reason: ClearReason) {
        self.counters.clears.fetch_add(1, Ordering::Relaxed);
        self.counters.clear_counter(reason).fetch_add(1, Ordering::Relaxed);
    }

    fn ttl_ms(&self) -> i64 {
        i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_store::MemoryStore;

    fn memory_only() -> BindingCache {
        BindingCache::new(Duration::from_secs(60), Duration::from_millis(100), None)
    }

    fn with_store(store: Arc<MemoryStore>) -> BindingCache {
        BindingCache::new(Duration::from_secs(60), Duration::from_millis(100), Some(store))
    }

    #[tokio::test]
    async fn memory_tier_serves_repeat_lookups() {
        let cache = memory_only();
        cache.set(1, "gpt-4o", 5, Some(9), SetReason::Select, 1_000).await;

        let binding = cache.resolve(1, "gpt-4o", 2_000).await.unwrap();
        assert_eq!(binding.channel_id, 5);
        assert_eq!(binding.credential_id, Some(9));

        let stats = cache.snapshot();
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.set_by_select, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn both_tiers_missing_counts_a_miss() {
        let cache = memory_only();
        assert!(cache.resolve(1, "gpt-4o", 1_000).await.is_none());
        assert_eq!(cache.snapshot().misses, 1);
    }

    #[tokio::test]
    async fn expired_entries_clear_and_fall_through() {
        let cache = memory_only();
        cache.set(1, "gpt-4o", 5, None, SetReason::Select, 1_000).await;

        assert!(cache.resolve(1, "gpt-4o", 1_000 + 60_001).await.is_none());

        let stats = cache.snapshot();
        assert_eq!(stats.clears, 1);
        assert_eq!(stats.clear_expired, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.memory_hits, 0);
    }

    #[tokio::test]
    async fn touch_stays_memory_only() {
        let store = Arc::new(MemoryStore::new());
        let cache = with_store(store.clone());

        cache.set(1, "gpt-4o", 5, None, SetReason::Touch, 1_000).await;

        assert!(store.binding_payload("binding:1:gpt-4o").is_none());
        assert!(cache.resolve(1, "gpt-4o", 2_000).await.is_some());
        assert_eq!(cache.snapshot().set_by_touch, 1);
    }

    #[tokio::test]
    async fn select_writes_through() {
        let store = Arc::new(MemoryStore::new());
        let cache = with_store(store.clone());

        cache.set(1, "gpt-4o", 5, Some(9), SetReason::Select, 1_000).await;

        let raw = store.binding_payload("binding:1:gpt-4o").unwrap();
        let payload: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(payload["v"], 1);
        assert_eq!(payload["channel_id"], 5);
        assert_eq!(payload["credential_id"], 9);
    }

    #[tokio::test]
    async fn store_restore_repopulates_memory() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_binding(
                "binding:1:gpt-4o",
                r#"{"v":1,"channel_id":5,"credential_id":9}"#,
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        let cache = with_store(store);
        let binding = cache.resolve(1, "gpt-4o", 1_000).await.unwrap();
        assert_eq!(binding.channel_id, 5);
        assert_eq!(binding.credential_id, Some(9));

        let stats = cache.snapshot();
        assert_eq!(stats.store_hits, 1);
        assert_eq!(stats.set_by_store_restore, 1);
        assert_eq!(stats.misses, 0);

        // Now the memory tier serves directly.
        cache.resolve(1, "gpt-4o", 2_000).await.unwrap();
        assert_eq!(cache.snapshot().memory_hits, 1);
    }

    #[tokio::test]
    async fn garbage_payloads_count_parse_error_and_delete() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_binding("binding:1:gpt-4o", "not json", Duration::from_secs(3600))
            .await
            .unwrap();

        let cache = with_store(store.clone());
        assert!(cache.resolve(1, "gpt-4o", 1_000).await.is_none());

        let stats = cache.snapshot();
        assert_eq!(stats.clear_parse_error, 1);
        assert_eq!(stats.clears, 1);
        assert_eq!(stats.misses, 1);
        assert!(store.binding_payload("binding:1:gpt-4o").is_none());
    }

    #[tokio::test]
    async fn future_schema_versions_are_not_trusted() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_binding(
                "binding:1:gpt-4o",
                r#"{"v":2,"channel_id":5,"sharding":"east"}"#,
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        let cache = with_store(store.clone());
        assert!(cache.resolve(1, "gpt-4o", 1_000).await.is_none());
        assert_eq!(cache.snapshot().clear_parse_error, 1);
        assert!(store.binding_payload("binding:1:gpt-4o").is_none());
    }

    #[tokio::test]
    async fn store_errors_never_block_serving() {
        let store = Arc::new(MemoryStore::new());
        store.fail_bindings(true);
        let cache = with_store(store);

        assert!(cache.resolve(1, "gpt-4o", 1_000).await.is_none());
        cache.set(1, "gpt-4o", 5, None, SetReason::Select, 1_000).await;
        assert!(cache.resolve(1, "gpt-4o", 2_000).await.is_some());
        cache.clear(1, "gpt-4o", ClearReason::Manual).await;

        let stats = cache.snapshot();
        assert_eq!(stats.store_read_errors, 1);
        assert_eq!(stats.store_write_errors, 1);
        assert_eq!(stats.store_delete_errors, 1);
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.clear_manual, 1);
    }

    #[tokio::test]
    async fn clear_channel_sweeps_only_matching_bindings() {
        let cache = memory_only();
        cache.set(1, "m1", 5, None, SetReason::Select, 1_000).await;
        cache.set(1, "m2", 5, None, SetReason::Select, 1_000).await;
        cache.set(1, "m3", 7, None, SetReason::Select, 1_000).await;
        cache.set(2, "m1", 5, None, SetReason::Select, 1_000).await;

        cache.clear_channel(1, 5, ClearReason::Ineligible).await;

        assert!(cache.resolve(1, "m1", 2_000).await.is_none());
        assert!(cache.resolve(1, "m2", 2_000).await.is_none());
        assert_eq!(cache.resolve(1, "m3", 2_000).await.unwrap().channel_id, 7);
        assert_eq!(cache.resolve(2, "m1", 2_000).await.unwrap().channel_id, 5);

        let stats = cache.snapshot();
        assert_eq!(stats.clear_ineligible, 2);
        assert_eq!(stats.clears, 2);
    }

    #[tokio::test]
    async fn clear_group_sweeps_every_model() {
        let cache = memory_only();
        cache.set(1, "m1", 5, None, SetReason::Select, 1_000).await;
        cache.set(1, "m2", 7, None, SetReason::Select, 1_000).await;
        cache.set(2, "m1", 5, None, SetReason::Select, 1_000).await;

        cache.clear_group(1, ClearReason::Manual).await;

        assert!(cache.resolve(1, "m1", 2_000).await.is_none());
        assert!(cache.resolve(1, "m2", 2_000).await.is_none());
        assert!(cache.resolve(2, "m1", 2_000).await.is_some());
        assert_eq!(cache.snapshot().clear_manual, 2);
    }

    #[tokio::test]
    async fn refreshes_count_same_channel_rewrites() {
        let cache = memory_only();
        cache.set(1, "m", 5, None, SetReason::Select, 1_000).await;
        cache.set(1, "m", 5, None, SetReason::Touch, 2_000).await;
        cache.set(1, "m", 9, None, SetReason::Select, 3_000).await;

        let stats = cache.snapshot();
        assert_eq!(stats.sets, 3);
        assert_eq!(stats.refreshes, 1);
    }
}
