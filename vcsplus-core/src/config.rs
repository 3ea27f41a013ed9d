use crate::cartridge::SuperChipMode;
use serde::{Deserialize, Serialize};
use std::fmt::Formatter;
use std::time::Duration;
use vcsplus_proc_macros::NamedVariants;

/// Overrides the SuperChip activation mode of masked-range formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, NamedVariants)]
pub enum SuperChipSetting {
    /// Use whatever the format itself specifies (e.g. F8 auto-detects, F8SC is always on)
    #[default]
    #[name = "default"]
    FormatDefault,
    #[name = "auto"]
    Auto,
    #[name = "on"]
    On,
    #[name = "off"]
    Off,
}

impl SuperChipSetting {
    #[must_use]
    pub fn resolve(self, format_default: SuperChipMode) -> SuperChipMode {
        match self {
            Self::FormatDefault => format_default,
            Self::Auto => SuperChipMode::AutoDetect,
            Self::On => SuperChipMode::On,
            Self::Off => SuperChipMode::Off,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_enabled")]
    pub enabled: bool,

    /// Transport scheme used to compose the request URL from the discovered host and path
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// How long a request may stay pending before its response is abandoned
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_bridge_enabled() -> bool {
    true
}

fn default_scheme() -> String {
    "https".into()
}

fn default_timeout_ms() -> u64 {
    15_000
}

impl BridgeConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: default_bridge_enabled(),
            scheme: default_scheme(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl std::fmt::Display for BridgeConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "enabled={}, scheme={}, timeout_ms={}",
            self.enabled, self.scheme, self.timeout_ms
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartridgeConfig {
    #[serde(default)]
    pub super_chip: SuperChipSetting,

    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl std::fmt::Display for CartridgeConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "super_chip: {}", self.super_chip)?;
        writeln!(f, "bridge: {}", self.bridge)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_chip_setting_names() {
        assert_eq!(Ok(SuperChipSetting::Auto), "AUTO".parse());
        assert_eq!(Ok(SuperChipSetting::FormatDefault), "default".parse());
        assert!("sometimes".parse::<SuperChipSetting>().is_err());
        assert_eq!("off", SuperChipSetting::Off.to_string());
    }

    #[test]
    fn super_chip_setting_resolves_against_format_default() {
        assert_eq!(
            SuperChipMode::AutoDetect,
            SuperChipSetting::FormatDefault.resolve(SuperChipMode::AutoDetect)
        );
        assert_eq!(SuperChipMode::Off, SuperChipSetting::Off.resolve(SuperChipMode::On));
        assert_eq!(SuperChipMode::On, SuperChipSetting::On.resolve(SuperChipMode::Off));
    }

    #[test]
    fn bridge_config_defaults() {
        let config = BridgeConfig::default();
        assert!(config.enabled);
        assert_eq!("https", config.scheme);
        assert_eq!(Duration::from_secs(15), config.timeout());
    }
}
