//! Async store contracts the scheduler consumes
//!
//! Any durable key/value or relational backend can implement these. The
//! scheduler treats the durable tier as eventually-consistent cache
//! warming, never as a synchronization primitive: every store failure on
//! the scheduling path degrades to in-memory behavior.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ChannelCredential, ChannelGroup, ChannelGroupMember, UpstreamChannel};

/// Backend failure surfaced by the store traits
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection, query, or command failure
    #[error("store backend: {0}")]
    Backend(String),
    /// Bounded store operation exceeded its deadline
    #[error("store operation timed out")]
    Timeout,
}

/// Read access to channel-group topology and channel records
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// List every channel group, in a stable order
    async fn list_channel_groups(&self) -> Result<Vec<ChannelGroup>, StoreError>;

    /// Fetch a group by id; `None` when it does not exist
    async fn get_channel_group_by_id(&self, id: i64) -> Result<Option<ChannelGroup>, StoreError>;

    /// Fetch a group by its unique name; `None` when it does not exist
    async fn get_channel_group_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ChannelGroup>, StoreError>;

    /// Parent group of a group, when it is a member of exactly one parent
    async fn get_channel_group_parent_id(&self, group_id: i64)
        -> Result<Option<i64>, StoreError>;

    /// Membership edges of a group, joined with target attributes
    async fn list_channel_group_members(
        &self,
        parent_group_id: i64,
    ) -> Result<Vec<ChannelGroupMember>, StoreError>;

    /// Every configured upstream channel
    async fn list_upstream_channels(&self) -> Result<Vec<UpstreamChannel>, StoreError>;

    /// Credentials of one channel; an empty list means the channel record
    /// itself carries its authentication
    async fn list_channel_credentials(
        &self,
        channel_id: i64,
    ) -> Result<Vec<ChannelCredential>, StoreError>;
}

/// Generic key/value persistence for small runtime settings
///
/// Holds the encoded channel-pointer blobs, one settings key per group.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_app_setting(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_app_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Durable tier of the binding cache
///
/// Payloads are opaque to the backend; encoding and decode-failure
/// policy live with the cache.
#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn get_binding(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put_binding(&self, key: &str, payload: &str, ttl: Duration)
        -> Result<(), StoreError>;

    async fn delete_binding(&self, key: &str) -> Result<(), StoreError>;
}
