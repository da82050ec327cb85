//! Channel health tracking with escalating bans
//!
//! Accumulates failures per channel and bans channels that keep failing,
//! doubling the ban duration on each repeat offense. Expired bans demote
//! the channel to probation: a single pick wins the recovery probe while
//! the rest of the fleet routes around it until the probe resolves.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use dashmap::DashMap;
use switchyard_config::HealthConfig;

/// Point-in-time health view of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Consecutive failures since the last success or ban
    pub fail_score: u32,
    /// Consecutive bans without a sustained recovery between them
    pub ban_streak: u32,
    /// When the active ban lifts, if one is in effect
    pub banned_until_ms: Option<i64>,
}

/// Per-channel health state
struct ChannelHealth {
    /// Failures since the last success or ban
    fail_score: AtomicU32,
    /// Bans without a sustained recovery between them
    ban_streak: AtomicU32,
    /// When the current ban lifts (unix ms, 0 = not banned)
    banned_until_ms: AtomicI64,
    /// Successes since the last failure
    success_run: AtomicU32,
    /// Whether repeated failures may ban this channel
    auto_ban: AtomicBool,
    /// Whether the channel must pass a recovery probe before normal traffic
    probe_due: AtomicBool,
    /// Probe claim expiry (unix ms, 0 = unclaimed)
    probe_claim_until_ms: AtomicI64,
}

impl ChannelHealth {
    fn new() -> Self {
        Self {
            fail_score: AtomicU32::new(0),
            ban_streak: AtomicU32::new(0),
            banned_until_ms: AtomicI64::new(0),
            success_run: AtomicU32::new(0),
            auto_ban: AtomicBool::new(true),
            probe_due: AtomicBool::new(false),
            probe_claim_until_ms: AtomicI64::new(0),
        }
    }
}

/// Track channel failures and enforce escalating bans
pub struct HealthTracker {
    channels: DashMap<i64, ChannelHealth>,
    config: HealthConfig,
}

impl HealthTracker {
    /// Create a new tracker with the given policy
    pub fn new(config: HealthConfig) -> Self {
        Self {
            channels: DashMap::new(),
            config,
        }
    }

    /// Record the channel's current auto-ban setting
    ///
    /// Called on every pick so an admin toggle takes effect without a
    /// restart. Disabling auto-ban stops new bans; it does not lift an
    /// active one.
    pub fn note_channel(&self, channel_id: i64, auto_ban: bool) {
        let health = self
            .channels
            .entry(channel_id)
            .or_insert_with(ChannelHealth::new);
        health.auto_ban.store(auto_ban, Ordering::Relaxed);
    }

    /// Whether the channel is currently banned
    ///
    /// Expired bans are cleared lazily here; the reader that observes the
    /// expiry flags the channel for a recovery probe.
    pub fn is_banned(&self, channel_id: i64, now_ms: i64) -> bool {
        let Some(health) = self.channels.get(&channel_id) else {
            return false;
        };

        let until = health.banned_until_ms.load(Ordering::Relaxed);
        if until == 0 {
            return false;
        }
        if now_ms < until {
            return true;
        }

        // One reader wins the expiry transition and arms the probe.
        if health
            .banned_until_ms
            .compare_exchange(until, 0, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            health.probe_claim_until_ms.store(0, Ordering::Relaxed);
            health.probe_due.store(true, Ordering::Relaxed);
            drop(health);
            tracing::info!(channel_id, "ban expired, channel awaiting recovery probe");
        }
        false
    }

    /// Try to take the recovery probe slot for a channel
    ///
    /// Returns `true` when no probe is due, or when this caller won the
    /// claim. While a claim is held, other callers get `false` and should
    /// route around the channel; an expired claim may be taken again.
    pub fn try_claim_probe(&self, channel_id: i64, now_ms: i64) -> bool {
        let Some(health) = self.channels.get(&channel_id) else {
            return true;
        };
        if !health.probe_due.load(Ordering::Relaxed) {
            return true;
        }

        let held_until = health.probe_claim_until_ms.load(Ordering::Relaxed);
        if held_until > now_ms {
            return false;
        }

        let claim_ms = i64::try_from(self.config.probe_claim_seconds.saturating_mul(1_000))
            .unwrap_or(i64::MAX);
        health
            .probe_claim_until_ms
            .compare_exchange(
                held_until,
                now_ms.saturating_add(claim_ms),
                Ordering::Relaxed,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Record a successful request on a channel
    ///
    /// Clears the fail score and resolves an outstanding probe. An active
    /// ban is not lifted: a success from a request that was already in
    /// flight when the ban tripped proves nothing about recovery.
    pub fn record_success(&self, channel_id: i64) {
        let health = self
            .channels
            .entry(channel_id)
            .or_insert_with(ChannelHealth::new);

        health.fail_score.store(0, Ordering::Relaxed);
        health.probe_due.store(false, Ordering::Relaxed);
        health.probe_claim_until_ms.store(0, Ordering::Relaxed);

        let run = health.success_run.fetch_add(1, Ordering::Relaxed) + 1;
        if run >= self.config.reset_after_successes
            && health.ban_streak.load(Ordering::Relaxed) > 0
        {
            health.ban_streak.store(0, Ordering::Relaxed);
            health.success_run.store(0, Ordering::Relaxed);
            drop(health);
            tracing::debug!(channel_id, "ban streak cleared after sustained recovery");
        }
    }

    /// Record a failed request on a channel
    ///
    /// Returns the ban expiry when this failure tripped a ban. A failure
    /// while the channel is on probation re-bans immediately with an
    /// escalated streak; otherwise the fail score must reach the
    /// configured threshold first.
    pub fn record_failure(&self, channel_id: i64, now_ms: i64) -> Option<i64> {
        let health = self
            .channels
            .entry(channel_id)
            .or_insert_with(ChannelHealth::new);

        health.success_run.store(0, Ordering::Relaxed);

        let probing = health.probe_due.load(Ordering::Relaxed)
            && health.probe_claim_until_ms.load(Ordering::Relaxed) != 0;
        if !probing {
            let score = health.fail_score.fetch_add(1, Ordering::Relaxed) + 1;
            if score < self.config.fail_threshold
                || !health.auto_ban.load(Ordering::Relaxed)
                || health.banned_until_ms.load(Ordering::Relaxed) != 0
            {
                return None;
            }
        }

        let streak = health
            .ban_streak
            .load(Ordering::Relaxed)
            .saturating_add(1)
            .min(self.config.streak_cap);
        let until = now_ms.saturating_add(self.ban_duration_ms(streak));

        // Only one failure report wins the transition into the ban.
        if health
            .banned_until_ms
            .compare_exchange(0, until, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        health.ban_streak.store(streak, Ordering::Relaxed);
        health.fail_score.store(0, Ordering::Relaxed);
        health.probe_due.store(false, Ordering::Relaxed);
        health.probe_claim_until_ms.store(0, Ordering::Relaxed);
        drop(health);

        tracing::warn!(
            channel_id,
            ban_streak = streak,
            banned_until_ms = until,
            "channel banned after repeated failures"
        );
        Some(until)
    }

    /// Lift a ban and wipe the channel's failure history
    ///
    /// Admin path, used when an operator pins a channel and expects it to
    /// serve immediately.
    pub fn clear_ban(&self, channel_id: i64) {
        let Some(health) = self.channels.get(&channel_id) else {
            return;
        };

        health.banned_until_ms.store(0, Ordering::Relaxed);
        health.fail_score.store(0, Ordering::Relaxed);
        health.ban_streak.store(0, Ordering::Relaxed);
        health.success_run.store(0, Ordering::Relaxed);
        health.probe_due.store(false, Ordering::Relaxed);
        health.probe_claim_until_ms.store(0, Ordering::Relaxed);
        drop(health);

        tracing::info!(channel_id, "channel ban cleared");
    }

    /// Current health view of a channel, applying lazy ban expiry first
    pub fn snapshot(&self, channel_id: i64, now_ms: i64) -> HealthSnapshot {
        let banned = self.is_banned(channel_id, now_ms);
        let Some(health) = self.channels.get(&channel_id) else {
            return HealthSnapshot {
                fail_score: 0,
                ban_streak: 0,
                banned_until_ms: None,
            };
        };

        HealthSnapshot {
            fail_score: health.fail_score.load(Ordering::Relaxed),
            ban_streak: health.ban_streak.load(Ordering::Relaxed),
            banned_until_ms: banned.then(|| health.banned_until_ms.load(Ordering::Relaxed)),
        }
    }

    fn ban_duration_ms(&self, streak: u32) -> i64 {
        let exp = streak.saturating_sub(1).min(30);
        let secs = self
            .config
            .ban_base_seconds
            .saturating_mul(1_u64 << exp)
            .min(self.config.ban_cap_seconds);
        i64::try_from(secs.saturating_mul(1_000)).unwrap_or(i64::MAX)
    }
}
