//! TOML configuration for Switchyard
//!
//! Loaded from a file with `{{ env.VAR }}` expansion, then validated.
//! All scheduler policy knobs carry defaults, so an empty file is a
//! working configuration.

#![allow(clippy::must_use_candidate)]

mod env;
mod loader;
pub mod scheduler;
pub mod store;

use serde::Deserialize;

pub use scheduler::{BindingConfig, HealthConfig, SchedulerConfig};
pub use store::{StoreConfig, ValkeyStoreConfig};

/// Top-level Switchyard configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Channel scheduler policy
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Durable store backing the pointer map and the binding cache
    #[serde(default)]
    pub store: StoreConfig,
}
