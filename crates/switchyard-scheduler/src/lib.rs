//! Channel scheduling for Switchyard
//!
//! Given a channel group and a model name, [`Scheduler`] decides which
//! upstream channel serves the next request:
//! - **Pin wins**: an eligible administrator-pinned channel short-circuits
//!   everything else
//! - **Binding**: the cached (group, model) assignment is reused while its
//!   channel stays eligible
//! - **Fresh selection**: priority, promotion, and weight order the
//!   group's flattened membership, skipping banned and probing channels
//!
//! Request outcomes feed [`HealthTracker`], which bans channels after
//! repeated failures and lets them back in through single-flight recovery
//! probes. Pins and automatic pointers persist through [`PointerStore`]
//! so routing intent survives a restart.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod binding;
pub mod clock;
pub mod error;
pub mod health;
pub mod pointer;
pub mod resolver;
pub mod scheduler;
pub mod stats;

pub use binding::{Binding, BindingCache, ClearReason, SetReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::SchedulerError;
pub use health::{HealthSnapshot, HealthTracker};
pub use pointer::{
    PointerState, PointerStore, REASON_BAN_FAILOVER, REASON_MANUAL_PIN, REASON_MANUAL_UNPIN,
    REASON_ROUTE,
};
pub use resolver::{CandidateChannel, GroupResolver, ResolvedChannel};
pub use scheduler::{Scheduler, Selection, Stores};
pub use stats::{BindingRuntime, ChannelRuntime};

use std::future::Future;
use std::time::Duration;

use switchyard_core::StoreError;

/// Run a store operation under a deadline
///
/// Durable-store calls on the scheduling path must never hang a request
/// task; exceeding the deadline surfaces as [`StoreError::Timeout`].
pub(crate) async fn bounded<T, F>(limit: Duration, op: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}
