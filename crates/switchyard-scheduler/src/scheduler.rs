//! Channel scheduling orchestration
//!
//! Composes the resolver, health tracker, binding cache, and pointer
//! store into the one call sites care about: given a group and model,
//! which channel serves the next request. Precedence is pin first, then
//! the binding cache, then a fresh selection over the membership tree.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use switchyard_config::SchedulerConfig;
use switchyard_core::{
    BindingStore, ChannelGroup, ChannelStore, ChannelType, DEFAULT_GROUP, SettingsStore,
    UpstreamChannel,
};

use crate::binding::{BindingCache, ClearReason, SetReason};
use crate::clock::{Clock, SystemClock};
use crate::error::SchedulerError;
use crate::health::HealthTracker;
use crate::pointer::{PointerState, PointerStore, REASON_BAN_FAILOVER, REASON_MANUAL_PIN, REASON_ROUTE};
use crate::resolver::{CandidateChannel, GroupResolver, ResolvedChannel};
use crate::stats::{BindingRuntime, ChannelRuntime};

/// Store handles the scheduler composes
///
/// Settings and binding stores are optional; without them pins and
/// bindings live in memory only and do not survive a restart.
#[derive(Clone)]
pub struct Stores {
    pub channels: Arc<dyn ChannelStore>,
    pub settings: Option<Arc<dyn SettingsStore>>,
    pub bindings: Option<Arc<dyn BindingStore>>,
}

/// A scheduling decision
#[derive(Debug, Clone)]
pub struct Selection {
    pub channel_id: i64,
    pub channel_name: String,
    pub channel_type: ChannelType,
    /// Credential to authenticate with; `None` means the channel record
    /// itself carries its authentication
    pub credential_id: Option<i64>,
    /// The group's per-request failover budget
    pub attempt_budget: i32,
}

enum CredentialPick {
    /// Schedule with this credential
    Use(Option<i64>),
    /// The channel lists credentials but none is enabled
    NoneEnabled,
}

/// Channel scheduler for one gateway process
pub struct Scheduler {
    resolver: GroupResolver,
    health: HealthTracker,
    bindings: BindingCache,
    pointers: PointerStore,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// Build a scheduler on the system clock
    pub fn new(config: &SchedulerConfig, stores: Stores) -> Self {
        Self::with_clock(config, stores, Arc::new(SystemClock))
    }

    /// Build a scheduler with an injected clock
    pub fn with_clock(config: &SchedulerConfig, stores: Stores, clock: Arc<dyn Clock>) -> Self {
        let store_timeout = Duration::from_millis(config.store_timeout_ms);
        Self {
            resolver: GroupResolver::new(stores.channels, store_timeout),
            health: HealthTracker::new(config.health.clone()),
            bindings: BindingCache::new(
                Duration::from_secs(config.binding.ttl_seconds),
                store_timeout,
                stores.bindings,
            ),
            pointers: PointerStore::new(stores.settings, store_timeout),
            clock,
        }
    }

    /// Pick the channel that serves the next request of a group
    ///
    /// An eligible pinned channel wins outright and bypasses the cache.
    /// Otherwise the cached (group, model) binding is reused when its
    /// channel is still eligible, and a fresh selection over the
    /// membership universe is the fallback.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownGroup`] and
    /// [`SchedulerError::GroupDisabled`] for configuration problems,
    /// [`SchedulerError::NoChannelAvailable`] when every member channel
    /// is disabled, banned, or awaiting a probe, and
    /// [`SchedulerError::Store`] when the channel store fails or times
    /// out.
    pub async fn pick_channel(
        &self,
        group_id: i64,
        model: &str,
    ) -> Result<Selection, SchedulerError> {
        let group = self
            .resolver
            .group_by_id(group_id)
            .await?
            .ok_or_else(|| SchedulerError::UnknownGroup {
                group: group_id.to_string(),
            })?;
        self.pick_from_group(group, model).await
    }

    /// [`Self::pick_channel`] addressed by group name
    ///
    /// Request metadata carries group names; a blank name means the root
    /// `default` group.
    ///
    /// # Errors
    ///
    /// Same as [`Self::pick_channel`].
    pub async fn pick_channel_by_name(
        &self,
        group: &str,
        model: &str,
    ) -> Result<Selection, SchedulerError> {
        let name = if group.trim().is_empty() {
            DEFAULT_GROUP
        } else {
            group
        };
        let group = self
            .resolver
            .group_by_name(name)
            .await?
            .ok_or_else(|| SchedulerError::UnknownGroup {
                group: name.to_owned(),
            })?;
        self.pick_from_group(group, model).await
    }

    async fn pick_from_group(
        &self,
        group: ChannelGroup,
        model: &str,
    ) -> Result<Selection, SchedulerError> {
        let now_ms = self.clock.now_ms();
        if !group.status.is_enabled() {
            return Err(SchedulerError::GroupDisabled { group: group.name });
        }
        let group_id = group.id;

        self.pointers.ensure_loaded(group_id).await;

        let universe = self.resolver.membership(group_id).await?;
        let channels: HashMap<i64, UpstreamChannel> = self
            .resolver
            .channels()
            .await?
            .into_iter()
            .map(|ch| (ch.id, ch))
            .collect();

        for member in &universe {
            if let Some(channel) = channels.get(&member.channel_id) {
                self.health.note_channel(channel.id, channel.auto_ban);
            }
        }

        let pointer = self.pointers.get(group_id);
        if let Some(ptr) = &pointer
            && ptr.pinned
        {
            if let Some(picked) = self
                .try_pinned(&group, &universe, &channels, ptr.channel_id, now_ms)
                .await?
            {
                return Ok(picked);
            }
            tracing::debug!(
                group_id,
                channel_id = ptr.channel_id,
                "pinned channel not eligible, serving around the pin"
            );
        }

        if let Some(picked) = self
            .try_binding(&group, &universe, &channels, model, now_ms)
            .await
        {
            return Ok(picked);
        }

        self.fresh_selection(&group, &universe, &channels, pointer.as_ref(), model, now_ms)
            .await
    }

    /// Record the outcome of a proxied request on a channel
    ///
    /// On failure, every group whose automatic pointer rides the failed
    /// channel drops its bindings to it so the next pick re-selects.
    /// Pinned pointers stay put; only health state moves.
    pub async fn report_outcome(&self, channel_id: i64, success: bool) {
        let now_ms = self.clock.now_ms();
        if success {
            self.health.record_success(channel_id);
            return;
        }

        self.health.record_failure(channel_id, now_ms);
        for group_id in self.pointers.auto_pointer_groups(channel_id) {
            self.bindings
                .clear_channel(group_id, channel_id, ClearReason::Ineligible)
                .await;
        }
    }

    /// Pin a channel as a group's pointer
    ///
    /// The channel must be a transitive member of the group and enabled.
    /// Pinning clears the group's bindings so the next pick re-evaluates.
    /// An active ban stays: the pin changes preference, not health, and
    /// picks serve around a banned pinned channel until the ban expires.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownGroup`], [`SchedulerError::NotAMember`],
    /// [`SchedulerError::ChannelDisabled`], or a store failure.
    pub async fn pin_channel(&self, group_id: i64, channel_id: i64) -> Result<(), SchedulerError> {
        let now_ms = self.clock.now_ms();
        let group = self
            .resolver
            .group_by_id(group_id)
            .await?
            .ok_or_else(|| SchedulerError::UnknownGroup {
                group: group_id.to_string(),
            })?;

        let universe = self.resolver.membership(group_id).await?;
        if !universe.iter().any(|member| member.channel_id == channel_id) {
            return Err(SchedulerError::NotAMember {
                channel_id,
                group: group.name,
            });
        }

        let enabled = self
            .resolver
            .channels()
            .await?
            .into_iter()
            .any(|ch| ch.id == channel_id && ch.status.is_enabled());
        if !enabled {
            return Err(SchedulerError::ChannelDisabled { channel_id });
        }

        self.pointers.ensure_loaded(group_id).await;
        self.pointers
            .set(group_id, channel_id, true, REASON_MANUAL_PIN, now_ms)
            .await;
        self.bindings.clear_group(group_id, ClearReason::Manual).await;
        Ok(())
    }

    /// Demote a group's pinned pointer back to automatic
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownGroup`] or a store failure.
    pub async fn unpin_channel(&self, group_id: i64) -> Result<(), SchedulerError> {
        let now_ms = self.clock.now_ms();
        if self.resolver.group_by_id(group_id).await?.is_none() {
            return Err(SchedulerError::UnknownGroup {
                group: group_id.to_string(),
            });
        }

        self.pointers.ensure_loaded(group_id).await;
        self.pointers.unpin(group_id, now_ms).await;
        Ok(())
    }

    /// Reload every group's persisted pointer from the durable store
    ///
    /// Called once at startup and again on admin resync.
    ///
    /// # Errors
    ///
    /// Propagates a failed group enumeration; per-group read problems
    /// degrade in place.
    pub async fn sync_from_store(&self) -> Result<(), SchedulerError> {
        let groups = self.resolver.groups().await?;
        let ids: Vec<i64> = groups.iter().map(|g| g.id).collect();
        self.pointers.sync(&ids).await;
        Ok(())
    }

    /// Admin listing of a group's reachable channels
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownGroup`] or a store failure.
    pub async fn candidate_channels(
        &self,
        group_id: i64,
    ) -> Result<Vec<CandidateChannel>, SchedulerError> {
        if self.resolver.group_by_id(group_id).await?.is_none() {
            return Err(SchedulerError::UnknownGroup {
                group: group_id.to_string(),
            });
        }
        Ok(self.resolver.candidate_channels(group_id).await?)
    }

    /// Admin clear of one (group, model) binding
    pub async fn clear_binding(&self, group_id: i64, model: &str) {
        self.bindings.clear(group_id, model, ClearReason::Manual).await;
    }

    /// Admin lift of a channel's ban, including its failure history
    pub fn clear_ban(&self, channel_id: i64) {
        self.health.clear_ban(channel_id);
    }

    /// Runtime health and pointer view of one channel
    pub fn runtime_channel_stats(&self, channel_id: i64) -> ChannelRuntime {
        let now_ms = self.clock.now_ms();
        let snap = self.health.snapshot(channel_id, now_ms);

        let banned_until = snap
            .banned_until_ms
            .and_then(|ms| jiff::Timestamp::from_millisecond(ms).ok())
            .map(|ts| ts.to_string());
        let banned_remaining_ms = snap.banned_until_ms.map(|ms| ms.saturating_sub(now_ms));

        ChannelRuntime {
            available: true,
            fail_score: snap.fail_score,
            ban_streak: snap.ban_streak,
            banned_until,
            banned_remaining_ms,
            banned_active: snap.banned_until_ms.is_some(),
            pointer_active: self.pointers.is_current_pointer(channel_id),
            pinned_active: self.pointers.is_pinned_pointer(channel_id),
        }
    }

    /// Binding cache counters for the admin surface
    pub fn runtime_binding_stats(&self) -> BindingRuntime {
        self.bindings.snapshot()
    }

    async fn try_pinned(
        &self,
        group: &ChannelGroup,
        universe: &[ResolvedChannel],
        channels: &HashMap<i64, UpstreamChannel>,
        channel_id: i64,
        now_ms: i64,
    ) -> Result<Option<Selection>, SchedulerError> {
        let Some(channel) = eligible_channel(universe, channels, channel_id) else {
            return Ok(None);
        };
        if self.health.is_banned(channel.id, now_ms)
            || !self.health.try_claim_probe(channel.id, now_ms)
        {
            return Ok(None);
        }
        match self.pick_credential(channel.id).await? {
            CredentialPick::Use(credential_id) => Ok(Some(selection(group, channel, credential_id))),
            CredentialPick::NoneEnabled => Ok(None),
        }
    }

    async fn try_binding(
        &self,
        group: &ChannelGroup,
        universe: &[ResolvedChannel],
        channels: &HashMap<i64, UpstreamChannel>,
        model: &str,
        now_ms: i64,
    ) -> Option<Selection> {
        let binding = self.bindings.resolve(group.id, model, now_ms).await?;

        let Some(channel) = eligible_channel(universe, channels, binding.channel_id) else {
            self.bindings
                .clear(group.id, model, ClearReason::Ineligible)
                .await;
            return None;
        };
        if self.health.is_banned(channel.id, now_ms) {
            self.bindings
                .clear(group.id, model, ClearReason::Ineligible)
                .await;
            return None;
        }
        if !self.health.try_claim_probe(channel.id, now_ms) {
            self.bindings
                .clear(group.id, model, ClearReason::ProbePending)
                .await;
            return None;
        }

        self.bindings
            .set(
                group.id,
                model,
                channel.id,
                binding.credential_id,
                SetReason::Touch,
                now_ms,
            )
            .await;
        Some(selection(group, channel, binding.credential_id))
    }

    async fn fresh_selection(
        &self,
        group: &ChannelGroup,
        universe: &[ResolvedChannel],
        channels: &HashMap<i64, UpstreamChannel>,
        pointer: Option<&PointerState>,
        model: &str,
        now_ms: i64,
    ) -> Result<Selection, SchedulerError> {
        let mut candidates: Vec<&ResolvedChannel> = universe
            .iter()
            .filter(|member| {
                channels
                    .get(&member.channel_id)
                    .is_some_and(|ch| ch.status.is_enabled())
                    && !self.health.is_banned(member.channel_id, now_ms)
            })
            .collect();

        candidates.sort_by_key(|member| {
            let weight = channels.get(&member.channel_id).map_or(0, |ch| ch.weight);
            (
                member.priority,
                Reverse(member.promotion),
                Reverse(weight),
                member.channel_id,
            )
        });

        let previously_banned = pointer
            .is_some_and(|ptr| self.health.is_banned(ptr.channel_id, now_ms));

        for member in candidates {
            let Some(channel) = channels.get(&member.channel_id) else {
                continue;
            };
            if !self.health.try_claim_probe(channel.id, now_ms) {
                continue;
            }
            let CredentialPick::Use(credential_id) = self.pick_credential(channel.id).await?
            else {
                tracing::debug!(
                    channel_id = channel.id,
                    "channel has no enabled credential, skipped"
                );
                continue;
            };

            self.bindings
                .set(group.id, model, channel.id, credential_id, SetReason::Select, now_ms)
                .await;

            let pinned = pointer.is_some_and(|ptr| ptr.pinned);
            let moved = pointer.is_none_or(|ptr| ptr.channel_id != channel.id);
            if !pinned && moved {
                let reason = if previously_banned {
                    REASON_BAN_FAILOVER
                } else {
                    REASON_ROUTE
                };
                self.pointers
                    .set(group.id, channel.id, false, reason, now_ms)
                    .await;
            }

            return Ok(selection(group, channel, credential_id));
        }

        Err(SchedulerError::NoChannelAvailable { group: group.name.clone() })
    }

    async fn pick_credential(&self, channel_id: i64) -> Result<CredentialPick, SchedulerError> {
        let credentials = self.resolver.credentials(channel_id).await?;
        if credentials.is_empty() {
            return Ok(CredentialPick::Use(None));
        }

        // Least recently used enabled credential; never-used rows first.
        let chosen = credentials
            .iter()
            .filter(|cred| cred.status.is_enabled())
            .min_by_key(|cred| (cred.last_used_at_ms.unwrap_or(i64::MIN), cred.id));

        Ok(match chosen {
            Some(cred) => CredentialPick::Use(Some(cred.id)),
            None => CredentialPick::NoneEnabled,
        })
    }
}

fn eligible_channel<'a>(
    universe: &[ResolvedChannel],
    channels: &'a HashMap<i64, UpstreamChannel>,
    channel_id: i64,
) -> Option<&'a UpstreamChannel> {
    if !universe.iter().any(|member| member.channel_id == channel_id) {
        return None;
    }
    channels.get(&channel_id).filter(|ch| ch.status.is_enabled())
}

fn selection(group: &ChannelGroup, channel: &UpstreamChannel, credential_id: Option<i64>) -> Selection {
    Selection {
        channel_id: channel.id,
        channel_name: channel.name.clone(),
        channel_type: channel.channel_type,
        credential_id,
        attempt_budget: group.attempt_budget(),
    }
}
