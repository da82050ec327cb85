//! Persisted per-group channel pointer
//!
//! Each group remembers which channel currently owns its routing, either
//! administrator-pinned or as the scheduler's last automatic choice. The
//! in-memory map is authoritative for serving; a versioned JSON blob per
//! group is written through to the settings store so pins survive
//! restarts. Decode trouble always reads as "no pointer", never an error.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use switchyard_core::SettingsStore;

use crate::bounded;

/// Pointer moved by routine scheduling
pub const REASON_ROUTE: &str = "route";
/// Pointer pinned by an administrator
pub const REASON_MANUAL_PIN: &str = "manual-pin";
/// Pin demoted back to automatic by an administrator
pub const REASON_MANUAL_UNPIN: &str = "manual-unpin";
/// Pointer moved off a banned channel
pub const REASON_BAN_FAILOVER: &str = "ban-failover";

/// Blob format version this build writes and accepts
const PAYLOAD_VERSION: i64 = 1;

/// Current pointer of one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerState {
    pub channel_id: i64,
    /// Administrator-set, as opposed to the scheduler's automatic choice
    pub pinned: bool,
    pub moved_at_ms: i64,
    /// Free-text audit trail of the last move
    pub reason: String,
}

/// Persisted blob; `v <= 0` reads as the current version, newer versions
/// read as absent
#[derive(Debug, Serialize, Deserialize)]
struct PointerPayload {
    #[serde(default)]
    v: i64,
    channel_id: i64,
    #[serde(default)]
    pinned: bool,
    #[serde(default)]
    moved_at_unix_ms: i64,
    #[serde(default)]
    reason: String,
}

/// Per-group pointer map with best-effort persistence
pub struct PointerStore {
    pointers: DashMap<i64, PointerState>,
    /// Groups whose persisted blob was already consulted
    loaded: DashMap<i64, ()>,
    /// Last (channel, pinned) pair successfully persisted per group
    last_persisted: DashMap<i64, (i64, bool)>,
    store: Option<Arc<dyn SettingsStore>>,
    store_timeout: Duration,
}

impl PointerStore {
    pub fn new(store: Option<Arc<dyn SettingsStore>>, store_timeout: Duration) -> Self {
        Self {
            pointers: DashMap::new(),
            loaded: DashMap::new(),
            last_persisted: DashMap::new(),
            store,
            store_timeout,
        }
    }

    /// Current pointer of a group, if any
    pub fn get(&self, group_id: i64) -> Option<PointerState> {
        self.pointers.get(&group_id).map(|entry| entry.value().clone())
    }

    /// Move a group's pointer
    ///
    /// Memory is updated immediately; the durable copy is written
    /// best-effort, skipped when the (channel, pinned) pair matches the
    /// last successful persist.
    pub async fn set(&self, group_id: i64, channel_id: i64, pinned: bool, reason: &str, now_ms: i64) {
        let state = PointerState {
            channel_id,
            pinned,
            moved_at_ms: now_ms,
            reason: reason.to_owned(),
        };
        self.pointers.insert(group_id, state.clone());
        tracing::info!(group_id, channel_id, pinned, reason, "pointer moved");

        self.persist(group_id, &state).await;
    }

    /// Demote a pinned pointer back to automatic, keeping the channel
    pub async fn unpin(&self, group_id: i64, now_ms: i64) {
        let demoted = {
            let Some(mut entry) = self.pointers.get_mut(&group_id) else {
                return;
            };
            if !entry.pinned {
                return;
            }
            entry.pinned = false;
            entry.moved_at_ms = now_ms;
            entry.reason = REASON_MANUAL_UNPIN.to_owned();
            entry.value().clone()
        };
        tracing::info!(group_id, channel_id = demoted.channel_id, "pointer unpinned");

        self.persist(group_id, &demoted).await;
    }

    /// Load a group's persisted pointer the first time scheduling touches it
    ///
    /// Runs at most once per group. A failed read logs and leaves the
    /// group scheduling automatically until the next sync.
    pub async fn ensure_loaded(&self, group_id: i64) {
        if self.loaded.insert(group_id, ()).is_some() {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };

        match bounded(self.store_timeout, store.get_app_setting(&setting_key(group_id))).await {
            Ok(Some(raw)) => {
                if let Some(state) = decode(&raw) {
                    self.last_persisted
                        .insert(group_id, (state.channel_id, state.pinned));
                    self.pointers.insert(group_id, state);
                } else {
                    tracing::warn!(group_id, "undecodable pointer blob ignored");
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    group_id,
                    error = %e,
                    "pointer load failed, group schedules automatically until resync"
                );
            }
        }
    }

    /// Replace the in-memory pointer map from the durable store
    ///
    /// Groups outside the given set are dropped. Decode failures and
    /// unknown versions read as "no pointer"; a failed read keeps the
    /// group's current in-memory state.
    pub async fn sync(&self, group_ids: &[i64]) {
        let keep: HashSet<i64> = group_ids.iter().copied().collect();
        self.pointers.retain(|group_id, _| keep.contains(group_id));
        self.last_persisted.retain(|group_id, _| keep.contains(group_id));

        let Some(store) = &self.store else {
            for &group_id in group_ids {
                self.loaded.insert(group_id, ());
            }
            return;
        };

        for &group_id in group_ids {
            self.loaded.insert(group_id, ());
            match bounded(self.store_timeout, store.get_app_setting(&setting_key(group_id))).await
            {
                Ok(Some(raw)) => {
                    if let Some(state) = decode(&raw) {
                        self.last_persisted
                            .insert(group_id, (state.channel_id, state.pinned));
                        self.pointers.insert(group_id, state);
                    } else {
                        tracing::warn!(group_id, "undecodable pointer blob ignored");
                        self.pointers.remove(&group_id);
                        self.last_persisted.remove(&group_id);
                    }
                }
                Ok(None) => {
                    self.pointers.remove(&group_id);
                    self.last_persisted.remove(&group_id);
                }
                Err(e) => {
                    tracing::warn!(
                        group_id,
                        error = %e,
                        "pointer sync read failed, keeping in-memory state"
                    );
                }
            }
        }

        tracing::info!(groups = group_ids.len(), "pointer map synced from store");
    }

    /// Groups whose automatic pointer currently targets the channel
    pub fn auto_pointer_groups(&self, channel_id: i64) -> Vec<i64> {
        self.pointers
            .iter()
            .filter(|entry| entry.value().channel_id == channel_id && !entry.value().pinned)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Whether any group currently routes through the channel
    pub fn is_current_pointer(&self, channel_id: i64) -> bool {
        self.pointers
            .iter()
            .any(|entry| entry.value().channel_id == channel_id)
    }

    /// Whether any group has the channel administrator-pinned
    pub fn is_pinned_pointer(&self, channel_id: i64) -> bool {
        self.pointers
            .iter()
            .any(|entry| entry.value().channel_id == channel_id && entry.value().pinned)
    }

    async fn persist(&self, group_id: i64, state: &PointerState) {
        let Some(store) = &self.store else {
            return;
        };
        let fingerprint = (state.channel_id, state.pinned);
        if self
            .last_persisted
            .get(&group_id)
            .is_some_and(|prev| *prev == fingerprint)
        {
            return;
        }

        let payload = PointerPayload {
            v: PAYLOAD_VERSION,
            channel_id: state.channel_id,
            pinned: state.pinned,
            moved_at_unix_ms: state.moved_at_ms,
            reason: state.reason.clone(),
        };
        let Ok(encoded) = serde_json::to_string(&payload) else {
            return;
        };

        match bounded(
            self.store_timeout,
            store.set_app_setting(&setting_key(group_id), &encoded),
        )
        .await
        {
            Ok(()) => {
                self.last_persisted.insert(group_id, fingerprint);
            }
            Err(e) => {
                tracing::warn!(group_id, error = %e, "pointer persist failed, durable copy is stale");
            }
        }
    }
}

fn setting_key(group_id: i64) -> String {
    format!("scheduler.group_pointer.{group_id}")
}

fn decode(raw: &str) -> Option<PointerState> {
    let payload: PointerPayload = serde_json::from_str(raw).ok()?;
    let version = if payload.v <= 0 { PAYLOAD_VERSION } else { payload.v };
    if version != PAYLOAD_VERSION {
        return None;
    }
    Some(PointerState {
        channel_id: payload.channel_id,
        pinned: payload.pinned,
        moved_at_ms: payload.moved_at_unix_ms,
        reason: payload.reason,
    })
}
