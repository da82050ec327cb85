//! Channel, group, and membership records as scheduling consumes them
//!
//! These are store rows distilled to the fields the scheduler needs;
//! billing and protocol attributes belong to their own subsystems.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Name of the root channel group. It always exists, is always enabled,
/// and cannot be deleted.
pub const DEFAULT_GROUP: &str = "default";

/// Failover budget applied when a group row carries no usable value.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Enabled/disabled flag shared by groups, channels, and credentials
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    Enabled,
    Disabled,
}

impl Status {
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// Upstream protocol family of a channel
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChannelType {
    /// OpenAI-compatible chat/completions API
    OpenaiCompatible,
    /// Anthropic Messages API
    Anthropic,
    /// OAuth-based Codex account pool
    CodexOauth,
}

/// Node in the channel-group forest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelGroup {
    pub id: i64,
    /// Globally unique display name
    pub name: String,
    pub status: Status,
    /// Non-negative billing multiplier; negative store values read as 1.0
    pub price_multiplier: f64,
    /// Per-request failover budget; values <= 0 read as the default
    pub max_attempts: i32,
}

impl ChannelGroup {
    /// Failover budget with the store-level defaulting rule applied
    pub const fn attempt_budget(&self) -> i32 {
        if self.max_attempts > 0 {
            self.max_attempts
        } else {
            DEFAULT_MAX_ATTEMPTS
        }
    }

    /// Price multiplier with negative values normalized to 1.0
    pub fn effective_price_multiplier(&self) -> f64 {
        if self.price_multiplier < 0.0 {
            1.0
        } else {
            self.price_multiplier
        }
    }
}

/// One edge of the membership graph, joined with target attributes
///
/// The join rides along so the resolver can walk the tree without a
/// per-member read back to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelGroupMember {
    pub id: i64,
    pub parent_group_id: i64,
    /// Lower values sort first on the scheduling path
    pub priority: i32,
    /// Tie-break preference among equal priority
    pub promotion: bool,
    pub target: MemberTarget,
}

/// What a membership edge points at: a subgroup or a channel, never both
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberTarget {
    Group(MemberGroup),
    Channel(MemberChannel),
}

/// Subgroup target of a membership edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberGroup {
    pub id: i64,
    pub name: String,
    pub status: Status,
}

/// Channel target of a membership edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberChannel {
    pub id: i64,
    pub name: String,
    pub channel_type: ChannelType,
    pub status: Status,
}

/// Upstream channel as scheduling sees it: a provider credential pool
/// with routing attributes. A channel may belong to many groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamChannel {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub status: Status,
    pub priority: i32,
    /// Tie-break among equal priority and promotion; higher wins
    pub weight: i32,
    pub promotion: bool,
    /// When false the channel never transitions to banned, regardless of
    /// fail score
    pub auto_ban: bool,
}

/// Credential row distilled to selection-relevant fields. Secret material
/// never reaches the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCredential {
    pub id: i64,
    pub channel_id: i64,
    pub status: Status,
    /// Unix milliseconds of last use; `None` sorts before any timestamp
    pub last_used_at_ms: Option<i64>,
}
