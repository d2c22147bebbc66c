//! Uploader configuration.
//!
//! Configuration is stored as TOML at `~/.config/glacierup/config.toml`, or at
//! the path named by `GLACIERUP_CONFIG`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use glacierup_upload::{DEFAULT_CONCURRENCY, UploadOptions};
use glacierup_vault_client::ClientConfig;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "GLACIERUP_CONFIG";

/// Uploader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Vault API base URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Account id; `-` selects the caller's own account.
    #[serde(default = "default_account_id")]
    pub account_id: String,

    /// Bearer token for the endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Part size in MiB (power of two, 1..=4096).
    #[serde(default = "default_part_size_mib")]
    pub part_size_mib: u64,

    /// Maximum concurrent part uploads.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-request timeout in seconds (0 = none).
    #[serde(default)]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://localhost:9000".into()
}

fn default_account_id() -> String {
    "-".into()
}

fn default_part_size_mib() -> u64 {
    64
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            account_id: default_account_id(),
            token: None,
            part_size_mib: default_part_size_mib(),
            concurrency: default_concurrency(),
            timeout_secs: 0,
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // The token is a credential.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Upload tunables derived from this configuration.
    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            part_size: self.part_size_mib.saturating_mul(1024 * 1024),
            concurrency: self.concurrency,
        }
    }

    /// HTTP client settings derived from this configuration.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.endpoint.clone(),
            account_id: self.account_id.clone(),
            token: self.token.clone(),
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
        }
    }
}

/// Returns the configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    Ok(PathBuf::from(home)
        .join(".config")
        .join("glacierup")
        .join("config.toml"))
}
