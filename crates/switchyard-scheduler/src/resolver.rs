//! Channel group membership resolution
//!
//! A group routes to the channels reachable through its membership tree.
//! The walk is breadth-first with a visited-set cycle guard; disabled
//! subgroups are fenced off whole, and a channel reached twice keeps the
//! attributes of its first discovery.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use switchyard_core::{
    ChannelCredential, ChannelGroup, ChannelStore, ChannelType, MemberTarget, StoreError,
    UpstreamChannel,
};

use crate::bounded;

/// A channel discovered in a group's membership tree
///
/// Eligibility (status, bans) is judged against the channel row at
/// scheduling time; the universe only fixes ordering and identity.
#[derive(Debug, Clone)]
pub struct ResolvedChannel {
    pub channel_id: i64,
    pub name: String,
    pub channel_type: ChannelType,
    /// Member-level scheduling priority, lower first
    pub priority: i32,
    /// Member-level promotion flag
    pub promotion: bool,
}

/// Admin-facing candidate row
#[derive(Debug, Clone, Serialize)]
pub struct CandidateChannel {
    pub channel_id: i64,
    /// Display name; blank channel names render as `channel-<id>`
    pub name: String,
    pub channel_type: ChannelType,
}

/// Resolve group topology against the channel store
///
/// Every store read issued here runs under the configured deadline, so a
/// stalled backend surfaces as [`StoreError::Timeout`] instead of hanging
/// a request task.
pub struct GroupResolver {
    store: Arc<dyn ChannelStore>,
    store_timeout: Duration,
}

impl GroupResolver {
    pub fn new(store: Arc<dyn ChannelStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Every channel group, in store order
    pub async fn groups(&self) -> Result<Vec<ChannelGroup>, StoreError> {
        bounded(self.store_timeout, self.store.list_channel_groups()).await
    }

    /// Fetch one group by id
    pub async fn group_by_id(&self, group_id: i64) -> Result<Option<ChannelGroup>, StoreError> {
        bounded(self.store_timeout, self.store.get_channel_group_by_id(group_id)).await
    }

    /// Fetch one group by its unique name
    pub async fn group_by_name(&self, name: &str) -> Result<Option<ChannelGroup>, StoreError> {
        bounded(self.store_timeout, self.store.get_channel_group_by_name(name)).await
    }

    /// Every upstream channel, in store order
    pub async fn channels(&self) -> Result<Vec<UpstreamChannel>, StoreError> {
        bounded(self.store_timeout, self.store.list_upstream_channels()).await
    }

    /// Credentials of one channel
    pub async fn credentials(
        &self,
        channel_id: i64,
    ) -> Result<Vec<ChannelCredential>, StoreError> {
        bounded(
            self.store_timeout,
            self.store.list_channel_credentials(channel_id),
        )
        .await
    }

    /// Flatten a group's membership tree into its channel universe
    ///
    /// Channels come back in discovery order with their member-level
    /// scheduling attributes. An empty or unknown group resolves to an
    /// empty universe, not an error.
    pub async fn membership(&self, group_id: i64) -> Result<Vec<ResolvedChannel>, StoreError> {
        let mut queue = VecDeque::from([group_id]);
        let mut visited = HashSet::from([group_id]);
        let mut seen = HashSet::new();
        let mut universe = Vec::new();

        while let Some(current) = queue.pop_front() {
            let members = bounded(
                self.store_timeout,
                self.store.list_channel_group_members(current),
            )
            .await?;

            for member in members {
                match member.target {
                    MemberTarget::Channel(channel) => {
                        // First discovery wins; deeper duplicates are ignored.
                        if seen.insert(channel.id) {
                            universe.push(ResolvedChannel {
                                channel_id: channel.id,
                                name: channel.name,
                                channel_type: channel.channel_type,
                                priority: member.priority,
                                promotion: member.promotion,
                            });
                        }
                    }
                    MemberTarget::Group(subgroup) => {
                        if subgroup.status.is_enabled() && visited.insert(subgroup.id) {
                            queue.push_back(subgroup.id);
                        }
                    }
                }
            }
        }

        Ok(universe)
    }

    /// Admin listing of a group's channels, ordered by display name then id
    pub async fn candidate_channels(
        &self,
        group_id: i64,
    ) -> Result<Vec<CandidateChannel>, StoreError> {
        let mut candidates: Vec<CandidateChannel> = self
            .membership(group_id)
            .await?
            .into_iter()
            .map(|ch| CandidateChannel {
                channel_id: ch.channel_id,
                name: display_name(&ch.name, ch.channel_id),
                channel_type: ch.channel_type,
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then(a.channel_id.cmp(&b.channel_id))
        });
        Ok(candidates)
    }
}

fn display_name(name: &str, channel_id: i64) -> String {
    if name.trim().is_empty() {
        format!("channel-{channel_id}")
    } else {
        name.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::Status;
    use switchyard_store::MemoryStore;

    fn group(id: i64, name: &str, status: Status) -> ChannelGroup {
        ChannelGroup {
            id,
            name: name.to_owned(),
            status,
            price_multiplier: 1.0,
            max_attempts: 5,
        }
    }

    fn channel(id: i64, name: &str, status: Status) -> UpstreamChannel {
        UpstreamChannel {
            id,
            name: name.to_owned(),
            channel_type: ChannelType::OpenaiCompatible,
            status,
            priority: 10,
            weight: 0,
            promotion: false,
            auto_ban: true,
        }
    }

    fn resolver(store: Arc<MemoryStore>) -> GroupResolver {
        GroupResolver::new(store, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn flattens_nested_groups_breadth_first() {
        let store = Arc::new(MemoryStore::new());
        store.add_group(group(1, "default", Status::Enabled));
        store.add_group(group(2, "paid", Status::Enabled));
        store.add_channel(channel(10, "direct", Status::Enabled));
        store.add_channel(channel(20, "nested", Status::Enabled));
        store.link_channel(1, 10, 10, false);
        store.link_group(1, 2, 20, false);
        store.link_channel(2, 20, 5, false);

        let universe = resolver(store).membership(1).await.unwrap();
        let ids: Vec<i64> = universe.iter().map(|ch| ch.channel_id).collect();
        assert_eq!(ids, vec![10, 20]);
    }

    #[tokio::test]
    async fn duplicate_channels_keep_first_discovery() {
        let store = Arc::new(MemoryStore::new());
        store.add_group(group(1, "default", Status::Enabled));
        store.add_group(group(2, "paid", Status::Enabled));
        store.add_channel(channel(10, "shared", Status::Enabled));
        store.link_channel(1, 10, 10, false);
        store.link_group(1, 2, 20, false);
        store.link_channel(2, 10, 99, true);

        let universe = resolver(store).membership(1).await.unwrap();
        assert_eq!(universe.len(), 1);
        assert_eq!(universe[0].priority, 10);
        assert!(!universe[0].promotion);
    }

    #[tokio::test]
    async fn disabled_subgroups_are_fenced_off() {
        let store = Arc::new(MemoryStore::new());
        store.add_group(group(1, "default", Status::Enabled));
        store.add_group(group(2, "dark", Status::Disabled));
        store.add_channel(channel(10, "lit", Status::Enabled));
        store.add_channel(channel(20, "unreachable", Status::Enabled));
        store.link_channel(1, 10, 10, false);
        store.link_group(1, 2, 20, false);
        store.link_channel(2, 20, 5, false);

        let universe = resolver(store).membership(1).await.unwrap();
        let ids: Vec<i64> = universe.iter().map(|ch| ch.channel_id).collect();
        assert_eq!(ids, vec![10]);
    }

    #[tokio::test]
    async fn membership_cycles_terminate() {
        let store = Arc::new(MemoryStore::new());
        store.add_group(group(1, "a", Status::Enabled));
        store.add_group(group(2, "b", Status::Enabled));
        store.add_channel(channel(10, "only", Status::Enabled));
        store.link_group(1, 2, 10, false);
        store.link_group(2, 1, 10, false);
        store.link_channel(2, 10, 10, false);

        let universe = resolver(store).membership(1).await.unwrap();
        assert_eq!(universe.len(), 1);
        assert_eq!(universe[0].channel_id, 10);
    }

    #[tokio::test]
    async fn empty_group_resolves_to_an_empty_universe() {
        let store = Arc::new(MemoryStore::new());
        store.add_group(group(1, "default", Status::Enabled));

        let universe = resolver(store).membership(1).await.unwrap();
        assert!(universe.is_empty());
    }

    #[tokio::test]
    async fn candidates_sort_by_display_name_then_id() {
        let store = Arc::new(MemoryStore::new());
        store.add_group(group(1, "default", Status::Enabled));
        store.add_channel(channel(9, "zeta", Status::Enabled));
        store.add_channel(channel(7, "", Status::Enabled));
        store.add_channel(channel(3, "alpha", Status::Enabled));
        store.add_channel(channel(2, "alpha", Status::Enabled));
        store.link_channel(1, 9, 10, false);
        store.link_channel(1, 7, 10, false);
        store.link_channel(1, 3, 10, false);
        store.link_channel(1, 2, 10, false);

        let candidates = resolver(store).candidate_channels(1).await.unwrap();
        let names: Vec<(String, i64)> = candidates
            .into_iter()
            .map(|c| (c.name, c.channel_id))
            .collect();
        assert_eq!(
            names,
            vec![
                ("alpha".to_owned(), 2),
                ("alpha".to_owned(), 3),
                ("channel-7".to_owned(), 7),
                ("zeta".to_owned(), 9),
            ]
        );
    }

    #[tokio::test]
    async fn store_failures_propagate() {
        let store = Arc::new(MemoryStore::new());
        store.add_group(group(1, "default", Status::Enabled));
        store.fail_channel_reads(true);

        let err = resolver(store).membership(1).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
