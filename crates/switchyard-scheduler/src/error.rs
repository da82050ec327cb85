//! Scheduler-specific error types

use switchyard_core::StoreError;
use thiserror::Error;

/// Errors that can occur while picking channels or applying admin actions
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The requested channel group does not exist
    #[error("unknown channel group: {group}")]
    UnknownGroup { group: String },

    /// The requested channel group exists but is disabled
    #[error("channel group is disabled: {group}")]
    GroupDisabled { group: String },

    /// The channel is not reachable from the group's membership tree
    #[error("channel {channel_id} is not a member of group {group}")]
    NotAMember { channel_id: i64, group: String },

    /// The channel exists but is disabled
    #[error("channel {channel_id} is disabled")]
    ChannelDisabled { channel_id: i64 },

    /// Every member channel is disabled, banned, or awaiting a probe
    #[error("no channel available in group: {group}")]
    NoChannelAvailable { group: String },

    /// The backing store failed or timed out
    #[error(transparent)]
    Store(#[from] StoreError),
}
