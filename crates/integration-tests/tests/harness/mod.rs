//! Shared fixtures for scheduler integration tests

pub mod seed;
