//! CLI configuration.
//!
//! Stored as JSON under the platform config directory:
//! - Settings: `relaydrive/config.json`
//! - File records: `relaydrive/records.json`

use std::path::{Path, PathBuf};

use anyhow::Context;

use relaydrive_crypto::EncryptionSettings;
use relaydrive_engine::{DeviceProfile, EngineConfig};
use relaydrive_remote::{DEFAULT_API_BASE, HttpStoreConfig};
use serde::{Deserialize, Serialize};

/// Persisted CLI settings. Every field has a default so partial files load.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bot_token: String,
    pub channel_id: String,
    pub api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
    pub device_profile: DeviceProfile,
    /// Overrides the default shard size for new uploads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_size: Option<u64>,
    pub encryption: EncryptionSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            channel_id: String::new(),
            api_base: DEFAULT_API_BASE.into(),
            relay_url: None,
            device_profile: DeviceProfile::default(),
            shard_size: None,
            encryption: EncryptionSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads from the default location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads from `path`. A missing file yields defaults. A file that does
    /// not parse is an error: it may hold the encryption salt, so it is never
    /// replaced by defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str::<AppConfig>(&content).with_context(|| {
            format!(
                "failed to parse {}; fix or move it aside before continuing",
                path.display()
            )
        })
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, &json)?;
        set_permissions_0600(path);
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::for_profile(self.device_profile);
        if let Some(shard_size) = self.shard_size {
            config.shard_size = shard_size;
        }
        config
    }

    pub fn store_config(&self) -> HttpStoreConfig {
        HttpStoreConfig {
            api_base: self.api_base.clone(),
            relay_url: self.relay_url.clone(),
            ..HttpStoreConfig::new(self.bot_token.as_str(), self.channel_id.as_str())
        }
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("relaydrive").join("config.json"))
}

pub fn records_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("relaydrive").join("records.json"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .map_err(|_| anyhow::anyhow!("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
            && !xdg.is_empty()
        {
            return Ok(PathBuf::from(xdg));
        }
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
        Ok(PathBuf::from(home).join(".config"))
    }
}
