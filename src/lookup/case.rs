use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::table::EmbeddingTable;
use super::KernelTier;

/// One batch of bags to reduce against a table, as read from JSON.
///
/// ```json
/// {"indices": [0, 3, 1], "lengths": [2, 1], "weights": [1.0, 0.5, 2.0], "normalize": false}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupCase {
    pub indices: Vec<i64>,
    pub lengths: Vec<i32>,
    #[serde(default)]
    pub weights: Option<Vec<f32>>,
    #[serde(default)]
    pub normalize: bool,
}

impl LookupCase {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read case file: {}", path.as_ref().display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse case file: {}", path.as_ref().display()))
    }

    /// Output rows, `lengths.len()` of them, each `table.block_size` long.
    pub fn run(&self, table: &EmbeddingTable, tier: Option<KernelTier>) -> Result<Vec<Vec<f32>>> {
        let flat = table
            .lookup(&self.indices, &self.lengths, self.weights.as_deref(), self.normalize, tier)
            .context("embedding lookup failed")?;
        if table.block_size == 0 {
            return Ok(vec![Vec::new(); self.lengths.len()]);
        }
        Ok(flat.chunks(table.block_size).map(|c| c.to_vec()).collect())
    }
}
