// Configuration loading
//
// Layers, lowest priority first: built-in defaults, an optional config file
// (format picked from its extension), then `WITNET_RELAY_*` environment
// variables.

use std::path::Path;

use config::{Config, Environment, File};
use log::debug;
use thiserror::Error;

use relay_consensus::RelayConfig;

pub const ENV_PREFIX: &str = "WITNET_RELAY";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] relay_consensus::RelayError),
}

/// Load and validate the relay configuration.
pub fn load(path: Option<&Path>) -> Result<RelayConfig, SettingsError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        debug!("Reading relay configuration from {}", path.display());
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let relay_config: RelayConfig = builder.build()?.try_deserialize()?;
    relay_config.epoch_clock()?;
    Ok(relay_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_consensus::{AdmissionPolicy, MemberId};
    use std::fs;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("witnet-relay-{}-{}", std::process::id(), name));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_toml_file() {
        let path = write_temp(
            "relay.toml",
            "genesis_time = 1602666000\nepoch_duration = 45\nadmission = \"self_reported\"\nowner = \"admin\"\n",
        );
        let loaded = load(Some(&path)).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded.genesis_time, 1_602_666_000);
        assert_eq!(loaded.admission, AdmissionPolicy::SelfReported);
        assert_eq!(loaded.owner, Some(MemberId::new("admin")));
    }

    #[test]
    fn test_partial_yaml_file_uses_defaults() {
        let path = write_temp("relay.yaml", "epoch_duration: 100\n");
        let loaded = load(Some(&path)).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded.epoch_duration, 100);
        assert_eq!(loaded.genesis_time, 0);
        assert_eq!(loaded.admission, AdmissionPolicy::ActiveSet);
    }

    #[test]
    fn test_zero_epoch_duration_rejected() {
        let path = write_temp("zero.json", r#"{ "epoch_duration": 0 }"#);
        let result = load(Some(&path));
        fs::remove_file(&path).ok();
        assert!(matches!(result, Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("witnet-relay-does-not-exist.toml");
        assert!(matches!(load(Some(&path)), Err(SettingsError::Load(_))));
    }
}
