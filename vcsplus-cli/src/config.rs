use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use vcsplus_core::CartridgeConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// PlusROM identity sent with every request; generated and stored on first use
    pub identity: Option<String>,

    #[serde(default)]
    pub cartridge: CartridgeConfig,
}

impl CliConfig {
    pub fn from_toml_file<P>(path: P) -> Result<Self, anyhow::Error>
    where
        P: AsRef<Path> + std::fmt::Debug,
    {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("error reading TOML config file from '{path:?}'"))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("error parsing config from TOML file at '{path:?}'"))
    }

    /// Load the config at `path`, falling back to the defaults if the file does not exist yet.
    pub fn load_or_default<P>(path: P) -> Result<Self, anyhow::Error>
    where
        P: AsRef<Path> + std::fmt::Debug,
    {
        if !path.as_ref().exists() {
            log::info!("No config file at {path:?}, using defaults");
            return Ok(Self::default());
        }

        Self::from_toml_file(path)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self, anyhow::Error> {
        let config: Self = toml::from_str(config_str)?;
        Ok(config)
    }

    pub fn save_to_file<P>(&self, path: P) -> Result<(), anyhow::Error>
    where
        P: AsRef<Path> + std::fmt::Debug,
    {
        let config_str =
            toml::to_string_pretty(self).context("error serializing config into TOML")?;
        fs::write(path.as_ref(), config_str)
            .with_context(|| format!("error writing config to '{path:?}'"))?;

        Ok(())
    }
}
