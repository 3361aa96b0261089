use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::models::SiteKind;
use crate::workflow::DeleteDepth;

/// Default FHIR server of the clinic
pub const DEFAULT_FHIR_BASE_URL: &str = "https://fhir.chl.connected-health.fr/fhir";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,
    pub fhir_base_url: String,
    pub page_size: usize,
    pub request_timeout_secs: u64,

    // Reference data
    pub specialty_value_set_id: String,
    pub site_kind: SiteKind,
    pub managing_organization_id: Option<String>,

    pub photo_content_type: String,
    pub delete_depth: DeleteDepth,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: 1,
            fhir_base_url: DEFAULT_FHIR_BASE_URL.to_string(),
            page_size: 5,
            request_timeout_secs: 30,
            specialty_value_set_id: "130".to_string(),
            site_kind: SiteKind::Location,
            managing_organization_id: None,
            photo_content_type: "image/jpeg".to_string(),
            delete_depth: DeleteDepth::Full,
        }
    }
}

impl Config {
    /// Load config from file, or return the default when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from file, falling back to the default on any error
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                debug!("Failed to load config, using default: {:#}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")
    }

    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".practitioner-admin"))
    }

    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.json"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Page size used when the configured one is zero
    pub fn effective_page_size(&self) -> usize {
        self.page_size.max(1)
    }
}
