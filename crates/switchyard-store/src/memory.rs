//! Embedded in-memory store backend
//!
//! Implements every store contract over process-local maps. Groups and
//! channels list in insertion order, so seeded fixtures behave
//! deterministically. Read/write failures can be injected per contract,
//! which is how tests exercise the scheduler's degraded paths.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use switchyard_core::{
    BindingStore, ChannelCredential, ChannelGroup, ChannelGroupMember, ChannelStore, MemberGroup,
    MemberTarget, SettingsStore, StoreError, UpstreamChannel,
};

/// Process-local store implementing all scheduler contracts
#[derive(Default)]
pub struct MemoryStore {
    groups: Mutex<IndexMap<i64, ChannelGroup>>,
    members: Mutex<IndexMap<i64, Vec<ChannelGroupMember>>>,
    channels: Mutex<IndexMap<i64, UpstreamChannel>>,
    credentials: Mutex<IndexMap<i64, Vec<ChannelCredential>>>,
    settings: DashMap<String, String>,
    bindings: DashMap<String, (String, Option<Instant>)>,
    next_member_id: AtomicI64,
    fail_channel_reads: AtomicBool,
    fail_settings: AtomicBool,
    fail_bindings: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a channel group
    pub fn add_group(&self, group: ChannelGroup) {
        self.lock(&self.groups).insert(group.id, group);
    }

    /// Insert or replace an upstream channel
    pub fn add_channel(&self, channel: UpstreamChannel) {
        self.lock(&self.channels).insert(channel.id, channel);
    }

    /// Insert or replace a credential row
    pub fn add_credential(&self, credential: ChannelCredential) {
        self.lock(&self.credentials)
            .entry(credential.channel_id)
            .or_default()
            .push(credential);
    }

    /// Add a channel membership edge, joining target attributes from the
    /// stored channel row
    ///
    /// # Panics
    ///
    /// Panics if the channel has not been added first; fixtures are built
    /// channels-first.
    pub fn link_channel(&self, parent_group_id: i64, channel_id: i64, priority: i32, promotion: bool) {
        let channel = {
            let channels = self.lock(&self.channels);
            channels
                .get(&channel_id)
                .unwrap_or_else(|| panic!("channel {channel_id} must be added before linking"))
                .clone()
        };
        let member = ChannelGroupMember {
            id: self.next_member_id.fetch_add(1, Ordering::Relaxed) + 1,
            parent_group_id,
            priority,
            promotion,
            target: MemberTarget::Channel(switchyard_core::MemberChannel {
                id: channel.id,
                name: channel.name,
                channel_type: channel.channel_type,
                status: channel.status,
            }),
        };
        self.lock(&self.members)
            .entry(parent_group_id)
            .or_default()
            .push(member);
    }

    /// Add a subgroup membership edge, joining target attributes from the
    /// stored group row
    ///
    /// # Panics
    ///
    /// Panics if the subgroup has not been added first.
    pub fn link_group(&self, parent_group_id: i64, child_group_id: i64, priority: i32, promotion: bool) {
        let child = {
            let groups = self.lock(&self.groups);
            groups
                .get(&child_group_id)
                .unwrap_or_else(|| panic!("group {child_group_id} must be added before linking"))
                .clone()
        };
        let member = ChannelGroupMember {
            id: self.next_member_id.fetch_add(1, Ordering::Relaxed) + 1,
            parent_group_id,
            priority,
            promotion,
            target: MemberTarget::Group(MemberGroup {
                id: child.id,
                name: child.name,
                status: child.status,
            }),
        };
        self.lock(&self.members)
            .entry(parent_group_id)
            .or_default()
            .push(member);
    }

    /// Make subsequent channel/group/member reads fail
    pub fn fail_channel_reads(&self, fail: bool) {
        self.fail_channel_reads.store(fail, Ordering::Relaxed);
    }

    /// Make subsequent settings reads and writes fail
    pub fn fail_settings(&self, fail: bool) {
        self.fail_settings.store(fail, Ordering::Relaxed);
    }

    /// Make subsequent binding reads, writes, and deletes fail
    pub fn fail_bindings(&self, fail: bool) {
        self.fail_bindings.store(fail, Ordering::Relaxed);
    }

    /// Raw settings content, for assertions
    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings.get(key).map(|v| v.value().clone())
    }

    /// Raw binding payload, for assertions
    pub fn binding_payload(&self, key: &str) -> Option<String> {
        self.bindings.get(key).map(|v| v.value().0.clone())
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check(&self, flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::Relaxed) {
            return Err(StoreError::Backend(format!("injected {what} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn list_channel_groups(&self) -> Result<Vec<ChannelGroup>, StoreError> {
        self.check(&self.fail_channel_reads, "channel read")?;
        Ok(self.lock(&self.groups).values().cloned().collect())
    }

    async fn get_channel_group_by_id(&self, id: i64) -> Result<Option<ChannelGroup>, StoreError> {
        self.check(&self.fail_channel_reads, "channel read")?;
        Ok(self.lock(&self.groups).get(&id).cloned())
    }

    async fn get_channel_group_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ChannelGroup>, StoreError> {
        self.check(&self.fail_channel_reads, "channel read")?;
        Ok(self
            .lock(&self.groups)
            .values()
            .find(|g| g.name == name)
            .cloned())
    }

    async fn get_channel_group_parent_id(
        &self,
        group_id: i64,
    ) -> Result<Option<i64>, StoreError> {
        self.check(&self.fail_channel_reads, "channel read")?;
        let members = self.lock(&self.members);
        for (parent, edges) in members.iter() {
            let is_child = edges
                .iter()
                .any(|m| matches!(&m.target, MemberTarget::Group(g) if g.id == group_id));
            if is_child {
                return Ok(Some(*parent));
            }
        }
        Ok(None)
    }

    async fn list_channel_group_members(
        &self,
        parent_group_id: i64,
    ) -> Result<Vec<ChannelGroupMember>, StoreError> {
        self.check(&self.fail_channel_reads, "channel read")?;
        Ok(self
            .lock(&self.members)
            .get(&parent_group_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_upstream_channels(&self) -> Result<Vec<UpstreamChannel>, StoreError> {
        self.check(&self.fail_channel_reads, "channel read")?;
        Ok(self.lock(&self.channels).values().cloned().collect())
    }

    async fn list_channel_credentials(
        &self,
        channel_id: i64,
    ) -> Result<Vec<ChannelCredential>, StoreError> {
        self.check(&self.fail_channel_reads, "channel read")?;
        Ok(self
            .lock(&self.credentials)
            .get(&channel_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_app_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check(&self.fail_settings, "settings read")?;
        Ok(self.settings.get(key).map(|v| v.value().clone()))
    }

    async fn set_app_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check(&self.fail_settings, "settings write")?;
        self.settings.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[async_trait]
impl BindingStore for MemoryStore {
    async fn get_binding(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check(&self.fail_bindings, "binding read")?;
        let Some(entry) = self.bindings.get(key) else {
            return Ok(None);
        };
        if let Some(deadline) = entry.1
            && deadline <= Instant::now()
        {
            drop(entry);
            self.bindings.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.0.clone()))
    }

    async fn put_binding(
        &self,
        key: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check(&self.fail_bindings, "binding write")?;
        let deadline = Instant::now().checked_add(ttl);
        self.bindings.insert(key.to_owned(), (payload.to_owned(), deadline));
        Ok(())
    }

    async fn delete_binding(&self, key: &str) -> Result<(), StoreError> {
        self.check(&self.fail_bindings, "binding delete")?;
        self.bindings.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::{ChannelType, Status};

    use super::*;

    fn channel(id: i64, name: &str) -> UpstreamChannel {
        UpstreamChannel {
            id,
            name: name.to_owned(),
            channel_type: ChannelType::OpenaiCompatible,
            status: Status::Enabled,
            priority: 0,
            weight: 0,
            promotion: false,
            auto_ban: true,
        }
    }

    fn group(id: i64, name: &str) -> ChannelGroup {
        ChannelGroup {
            id,
            name: name.to_owned(),
            status: Status::Enabled,
            price_multiplier: 1.0,
            max_attempts: 5,
        }
    }

    #[tokio::test]
    async fn linking_joins_target_attributes() {
        let store = MemoryStore::new();
        store.add_group(group(1, "default"));
        store.add_channel(channel(7, "primary"));
        store.link_channel(1, 7, 10, true);

        let members = store.list_channel_group_members(1).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].priority, 10);
        assert!(members[0].promotion);
        match &members[0].target {
            MemberTarget::Channel(ch) => {
                assert_eq!(ch.id, 7);
                assert_eq!(ch.name, "primary");
            }
            MemberTarget::Group(_) => panic!("expected channel target"),
        }
    }

    #[tokio::test]
    async fn parent_lookup_follows_group_edges() {
        let store = MemoryStore::new();
        store.add_group(group(1, "default"));
        store.add_group(group(2, "cheap"));
        store.link_group(1, 2, 0, false);

        assert_eq!(store.get_channel_group_parent_id(2).await.unwrap(), Some(1));
        assert_eq!(store.get_channel_group_parent_id(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn groups_list_in_insertion_order() {
        let store = MemoryStore::new();
        store.add_group(group(5, "beta"));
        store.add_group(group(2, "alpha"));

        let names: Vec<_> = store
            .list_channel_groups()
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert_eq!(names, vec!["beta", "alpha"]);
    }

    #[tokio::test]
    async fn binding_ttl_expires_rows() {
        let store = MemoryStore::new();
        store
            .put_binding("binding:1:m", "{}", Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get_binding("binding:1:m").await.unwrap(), None);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_backend_errors() {
        let store = MemoryStore::new();
        store.fail_settings(true);
        let err = store.get_app_setting("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        store.fail_settings(false);
        store.set_app_setting("k", "v").await.unwrap();
        assert_eq!(store.setting("k").as_deref(), Some("v"));
    }
}
