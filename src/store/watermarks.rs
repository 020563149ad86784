use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::Watermark;

/// Per-agent read cursors in `.huddle/watermarks.json`.
///
/// Not part of the event log: rebuilds leave them alone, and only prune
/// rewrites them (to repoint cursors at discarded messages).
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("watermarks.json"),
        }
    }

    /// All watermarks keyed by (agent, home).
    pub fn load(&self) -> Result<BTreeMap<(String, String), Watermark>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let marks: Vec<Watermark> = serde_json::from_str(&data)?;
        Ok(marks
            .into_iter()
            .map(|m| ((m.agent.clone(), m.home.clone()), m))
            .collect())
    }

    pub fn get(&self, agent: &str, home: &str) -> Result<Option<Watermark>> {
        Ok(self
            .load()?
            .remove(&(agent.to_string(), home.to_string())))
    }

    pub fn list_for(&self, agent: &str) -> Result<Vec<Watermark>> {
        Ok(self
            .load()?
            .into_values()
            .filter(|m| m.agent == agent)
            .collect())
    }

    /// Insert or replace one cursor. Callers hold the writer lock.
    pub fn set(&self, mark: Watermark) -> Result<()> {
        let mut all = self.load()?;
        all.insert((mark.agent.clone(), mark.home.clone()), mark);
        self.save(&all)
    }

    /// Replace the whole file (write to a temp file, then rename).
    pub fn save(&self, marks: &BTreeMap<(String, String), Watermark>) -> Result<()> {
        let list: Vec<&Watermark> = marks.values().collect();
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&list)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
