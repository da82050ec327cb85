use serde::Deserialize;
use url::Url;

/// Durable store configuration
///
/// When no backend is configured, pointer and binding state live only in
/// process memory and do not survive a restart.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Prefix for settings and binding keys in the durable backend
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Valkey backend for pointer and binding persistence
    #[serde(default)]
    pub valkey: Option<ValkeyStoreConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            valkey: None,
        }
    }
}

/// Valkey connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValkeyStoreConfig {
    /// Valkey connection URL
    pub url: Url,
}

fn default_key_prefix() -> String {
    "switchyard".to_owned()
}
