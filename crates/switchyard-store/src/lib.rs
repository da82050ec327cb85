//! Store backends for Switchyard
//!
//! `MemoryStore` is the embedded backend: it implements every store
//! contract, backs the test harness, and serves single-process
//! deployments. `ValkeyStore` persists pointer and binding state in
//! Valkey/Redis for deployments that must survive restarts.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod memory;
mod valkey;

pub use memory::MemoryStore;
pub use valkey::ValkeyStore;
