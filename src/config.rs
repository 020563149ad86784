use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HuddleError, Result};

pub const CONFIG_FILE: &str = "config.json";

/// Project settings stored in `.huddle/config.json`. Every field has a
/// default so older files keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: u32,
    /// Tail size used by `prune` when no `--keep` is given.
    pub default_keep: usize,
    /// When false, prune skips the git cleanliness and sync checks.
    pub prune_guardrails: bool,
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            default_keep: 20,
            prune_guardrails: true,
            poll_interval_ms: 500,
        }
    }
}

impl Config {
    /// Load from a data directory. A missing file means the project was never initialized.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Err(HuddleError::NotInitialized);
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(data_dir.join(CONFIG_FILE), json)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
