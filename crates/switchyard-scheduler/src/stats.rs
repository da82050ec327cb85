//! Admin-facing runtime snapshots
//!
//! Plain serializable shapes the admin surface renders. Built on demand;
//! nothing here drives scheduling behavior.

use serde::Serialize;

/// Runtime health and pointer view of one channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelRuntime {
    /// Whether the scheduler subsystem is serving
    pub available: bool,
    pub fail_score: u32,
    pub ban_streak: u32,
    /// RFC 3339 expiry of the active ban
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banned_until: Option<String>,
    /// Milliseconds until the active ban lifts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banned_remaining_ms: Option<i64>,
    pub banned_active: bool,
    /// The channel currently owns routing for at least one group
    pub pointer_active: bool,
    /// The channel is administrator-pinned in at least one group
    pub pinned_active: bool,
}

/// Binding cache counters, monotone process totals
#[derive(Debug, Clone, Default, Serialize)]
pub struct BindingRuntime {
    pub available: bool,
    pub memory_hits: u64,
    pub store_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub set_by_select: u64,
    pub set_by_touch: u64,
    pub set_by_store_restore: u64,
    pub refreshes: u64,
    pub clears: u64,
    pub clear_expired: u64,
    pub clear_manual: u64,
    pub clear_ineligible: u64,
    pub clear_probe_pending: u64,
    pub clear_parse_error: u64,
    pub store_read_errors: u64,
    pub store_write_errors: u64,
    pub store_delete_errors: u64,
}
