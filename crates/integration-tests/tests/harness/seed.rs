//! Seeded store and scheduler fixtures
//!
//! Every test runs a real [`Scheduler`] over a [`MemoryStore`] that backs
//! all three store contracts, driven by a manual clock so bans and TTLs
//! advance deterministically.

use std::sync::Arc;

use switchyard_config::SchedulerConfig;
use switchyard_core::{ChannelCredential, ChannelGroup, ChannelType, Status, UpstreamChannel};
use switchyard_scheduler::{ManualClock, Scheduler, Stores};
use switchyard_store::MemoryStore;

/// Fluent builder over a [`MemoryStore`]
pub struct Seed {
    store: Arc<MemoryStore>,
}

impl Seed {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// Add an enabled group with a failover budget of 3
    pub fn group(self, id: i64, name: &str) -> Self {
        self.store.add_group(ChannelGroup {
            id,
            name: name.to_owned(),
            status: Status::Enabled,
            price_multiplier: 1.0,
            max_attempts: 3,
        });
        self
    }

    /// Add an enabled auto-ban channel
    pub fn channel(self, id: i64, name: &str) -> Self {
        self.store.add_channel(UpstreamChannel {
            id,
            name: name.to_owned(),
            channel_type: ChannelType::OpenaiCompatible,
            status: Status::Enabled,
            priority: 0,
            weight: 0,
            promotion: false,
            auto_ban: true,
        });
        self
    }

    /// Link a channel into a group at a member priority
    pub fn member(self, group_id: i64, channel_id: i64, priority: i32) -> Self {
        self.store.link_channel(group_id, channel_id, priority, false);
        self
    }

    /// Add an enabled credential
    #[allow(dead_code)]
    pub fn credential(self, id: i64, channel_id: i64, last_used_at_ms: Option<i64>) -> Self {
        self.store.add_credential(ChannelCredential {
            id,
            channel_id,
            status: Status::Enabled,
            last_used_at_ms,
        });
        self
    }

    pub fn build(self) -> Arc<MemoryStore> {
        self.store
    }
}

/// Scheduler over every store contract, on default policy
///
/// Defaults that matter here: five failures trip a 30s ban, doubling per
/// streak; probe claims hold for 30s; bindings live for an hour.
pub fn scheduler_at(store: &Arc<MemoryStore>, start_ms: i64) -> (Scheduler, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_ms));
    let stores = Stores {
        channels: store.clone(),
        settings: Some(store.clone()),
        bindings: Some(store.clone()),
    };
    let scheduler = Scheduler::with_clock(&SchedulerConfig::default(), stores, clock.clone());
    (scheduler, clock)
}
