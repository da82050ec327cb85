use std::path::Path;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        let expanded = crate::env::expand_env(&raw)
            .map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self =
            toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if a scheduler policy knob is zero or the ban
    /// escalation bounds are inverted
    pub fn validate(&self) -> anyhow::Result<()> {
        let health = &self.scheduler.health;

        if health.fail_threshold == 0 {
            anyhow::bail!("scheduler.health.fail_threshold must be greater than 0");
        }
        if health.ban_base_seconds == 0 {
            anyhow::bail!("scheduler.health.ban_base_seconds must be greater than 0");
        }
        if health.ban_cap_seconds < health.ban_base_seconds {
            anyhow::bail!(
                "scheduler.health.ban_cap_seconds must be at least ban_base_seconds ({} < {})",
                health.ban_cap_seconds,
                health.ban_base_seconds
            );
        }
        if health.streak_cap == 0 {
            anyhow::bail!("scheduler.health.streak_cap must be greater than 0");
        }
        if self.scheduler.binding.ttl_seconds == 0 {
            anyhow::bail!("scheduler.binding.ttl_seconds must be greater than 0");
        }
        if self.scheduler.store_timeout_ms == 0 {
            anyhow::bail!("scheduler.store_timeout_ms must be greater than 0");
        }
        if self.store.key_prefix.is_empty() {
            anyhow::bail!("store.key_prefix must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::Config;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_is_a_valid_config() {
        let file = write_config("");
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.scheduler.health.fail_threshold, 5);
        assert_eq!(config.scheduler.health.ban_base_seconds, 30);
        assert_eq!(config.scheduler.health.ban_cap_seconds, 600);
        assert_eq!(config.scheduler.binding.ttl_seconds, 3600);
        assert_eq!(config.scheduler.store_timeout_ms, 500);
        assert_eq!(config.store.key_prefix, "switchyard");
        assert!(config.store.valkey.is_none());
    }

    #[test]
    fn overrides_parse() {
        let file = write_config(
            r#"
[scheduler]
store_timeout_ms = 250

[scheduler.health]
fail_threshold = 3
ban_base_seconds = 10
ban_cap_seconds = 120

[scheduler.binding]
ttl_seconds = 60

[store]
key_prefix = "gw"

[store.valkey]
url = "redis://localhost:6379/2"
"#,
        );
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.scheduler.health.fail_threshold, 3);
        assert_eq!(config.scheduler.binding.ttl_seconds, 60);
        assert_eq!(config.store.key_prefix, "gw");
        assert_eq!(
            config.store.valkey.unwrap().url.as_str(),
            "redis://localhost:6379/2"
        );
    }

    #[test]
    fn env_placeholder_reaches_parsed_value() {
        temp_env::with_var("SY_REDIS_URL", Some("redis://cache:6379"), || {
            let file = write_config("[store.valkey]\nurl = \"{{ env.SY_REDIS_URL }}\"\n");
            let config = Config::load(file.path()).unwrap();
            assert_eq!(
                config.store.valkey.unwrap().url.as_str(),
                "redis://cache:6379"
            );
        });
    }

    #[test]
    fn inverted_ban_bounds_rejected() {
        let file = write_config("[scheduler.health]\nban_base_seconds = 60\nban_cap_seconds = 30\n");
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("ban_cap_seconds"));
    }

    #[test]
    fn zero_threshold_rejected() {
        let file = write_config("[scheduler.health]\nfail_threshold = 0\n");
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("fail_threshold"));
    }

    #[test]
    fn unknown_field_rejected() {
        let file = write_config("[scheduler]\nworkers = 4\n");
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }
}
