//! Shared domain types and store contracts for the Switchyard scheduler
//!
//! Everything the scheduler knows about groups, channels, and credentials
//! lives here, together with the narrow async store traits any durable
//! backend can implement.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod store;
pub mod types;

pub use store::{BindingStore, ChannelStore, SettingsStore, StoreError};
pub use types::{
    ChannelCredential, ChannelGroup, ChannelGroupMember, ChannelType, MemberChannel, MemberGroup,
    MemberTarget, Status, UpstreamChannel, DEFAULT_GROUP, DEFAULT_MAX_ATTEMPTS,
};
