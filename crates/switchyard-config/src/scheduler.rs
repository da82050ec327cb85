use serde::Deserialize;

/// Channel scheduler policy
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Fail scoring and ban escalation
    #[serde(default)]
    pub health: HealthConfig,
    /// Binding cache lifetime
    #[serde(default)]
    pub binding: BindingConfig,
    /// Upper bound for any single durable-store operation issued from the
    /// scheduling path, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            health: HealthConfig::default(),
            binding: BindingConfig::default(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

/// Fail scoring and ban escalation policy
///
/// A channel is banned once `fail_threshold` failures accumulate without
/// an intervening success; the ban lasts `ban_base_seconds * 2^(streak-1)`
/// capped at `ban_cap_seconds`, so repeat offenders back off harder.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    /// Failures that trip a ban on an auto-ban channel
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,
    /// First ban duration in seconds
    #[serde(default = "default_ban_base_seconds")]
    pub ban_base_seconds: u64,
    /// Ban duration ceiling in seconds
    #[serde(default = "default_ban_cap_seconds")]
    pub ban_cap_seconds: u64,
    /// Ban streak ceiling
    #[serde(default = "default_streak_cap")]
    pub streak_cap: u32,
    /// Consecutive successes that clear an accumulated ban streak
    #[serde(default = "default_reset_after_successes")]
    pub reset_after_successes: u32,
    /// How long a post-ban recovery probe claim is held, in seconds
    #[serde(default = "default_probe_claim_seconds")]
    pub probe_claim_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            fail_threshold: default_fail_threshold(),
            ban_base_seconds: default_ban_base_seconds(),
            ban_cap_seconds: default_ban_cap_seconds(),
            streak_cap: default_streak_cap(),
            reset_after_successes: default_reset_after_successes(),
            probe_claim_seconds: default_probe_claim_seconds(),
        }
    }
}

/// Binding cache policy
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    /// Entry lifetime in seconds, for both the memory and durable tiers
    #[serde(default = "default_binding_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_binding_ttl_seconds(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_store_timeout_ms() -> u64 {
    500
}

#[allow(clippy::missing_const_for_fn)]
fn default_fail_threshold() -> u32 {
    5
}

#[allow(clippy::missing_const_for_fn)]
fn default_ban_base_seconds() -> u64 {
    30
}

#[allow(clippy::missing_const_for_fn)]
fn default_ban_cap_seconds() -> u64 {
    600
}

#[allow(clippy::missing_const_for_fn)]
fn default_streak_cap() -> u32 {
    20
}

#[allow(clippy::missing_const_for_fn)]
fn default_reset_after_successes() -> u32 {
    20
}

#[allow(clippy::missing_const_for_fn)]
fn default_probe_claim_seconds() -> u64 {
    30
}

#[allow(clippy::missing_const_for_fn)]
fn default_binding_ttl_seconds() -> u64 {
    3600
}
