//! Valkey-backed settings and binding persistence
//!
//! Stores pointer blobs and binding payloads under a shared key prefix.
//! Channel topology stays with the relational store; this backend only
//! carries the small runtime state that must survive restarts.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use switchyard_core::{BindingStore, SettingsStore, StoreError};

/// Settings and binding store backed by Valkey
#[derive(Clone, Debug)]
pub struct ValkeyStore {
    client: redis::Client,
    key_prefix: String,
}

impl ValkeyStore {
    /// Create a new Valkey store
    ///
    /// # Errors
    ///
    /// Returns an error if the Valkey URL is invalid
    pub fn new(url: &str, key_prefix: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Backend(format!("invalid URL: {e}")))?;

        Ok(Self {
            client,
            key_prefix: key_prefix.to_owned(),
        })
    }

    fn setting_key(&self, key: &str) -> String {
        format!("{}:setting:{key}", self.key_prefix)
    }

    fn binding_key(&self, key: &str) -> String {
        format!("{}:{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Backend(format!("connection failed: {e}")))
    }
}

#[async_trait]
impl SettingsStore for ValkeyStore {
    async fn get_app_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(self.setting_key(key))
            .await
            .map_err(|e| StoreError::Backend(format!("GET failed: {e}")))?;
        Ok(value)
    }

    async fn set_app_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .set(self.setting_key(key), value)
            .await
            .map_err(|e| StoreError::Backend(format!("SET failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl BindingStore for ValkeyStore {
    async fn get_binding(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(self.binding_key(key))
            .await
            .map_err(|e| StoreError::Backend(format!("GET failed: {e}")))?;
        Ok(value)
    }

    async fn put_binding(
        &self,
        key: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        // Valkey rejects a zero expiry; clamp to one second.
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(self.binding_key(key), payload, ttl_secs)
            .await
            .map_err(|e| StoreError::Backend(format!("SET failed: {e}")))?;
        Ok(())
    }

    async fn delete_binding(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(self.binding_key(key))
            .await
            .map_err(|e| StoreError::Backend(format!("DEL failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_the_prefix() {
        let store = ValkeyStore::new("redis://localhost:6379", "switchyard").unwrap();
        assert_eq!(
            store.setting_key("scheduler.group_pointer.3"),
            "switchyard:setting:scheduler.group_pointer.3"
        );
        assert_eq!(store.binding_key("binding:3:gpt-4o"), "switchyard:binding:3:gpt-4o");
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = ValkeyStore::new("not a url", "switchyard").unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
