// Learning State Persistence
// One JSON record holding the weight table and optimisation counters.

use crate::learning::WeightAdjustment;
use crate::performance::{ProcessorPerformance, TradeSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::ProcessorId;
use serde::{Deserialize, Serialize};
use signal_generation::WeightTable;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningState {
    /// Version of the weight table below
    pub version: u64,
    /// Keyed by processor id
    pub weights: BTreeMap<ProcessorId, f64>,
    pub trades_since_last_optimization: usize,
    pub last_optimized_at: Option<DateTime<Utc>>,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub adjustments: Vec<WeightAdjustment>,
    #[serde(default)]
    pub performance: BTreeMap<ProcessorId, ProcessorPerformance>,
    #[serde(default)]
    pub summary: TradeSummary,
}

impl LearningState {
    pub fn new(table: &WeightTable) -> Self {
        Self {
            version: table.version,
            weights: table.weights.clone(),
            trades_since_last_optimization: 0,
            last_optimized_at: None,
            saved_at: Utc::now(),
            adjustments: Vec::new(),
            performance: BTreeMap::new(),
            summary: TradeSummary::default(),
        }
    }

    pub fn weight_table(&self) -> WeightTable {
        WeightTable {
            version: self.version,
            weights: self.weights.clone(),
            updated_at: self.last_optimized_at.unwrap_or(self.saved_at),
        }
    }
}

/// Trait for learning state storage backends
#[async_trait::async_trait]
pub trait LearningStateStore: Send + Sync {
    /// Load the stored state; `None` when nothing has been saved yet
    async fn load(&self) -> Result<Option<LearningState>>;

    /// Replace the stored state as a unit
    async fn save(&self, state: &LearningState) -> Result<()>;
}

/// JSON file store. Writes go to a sibling temp file that is renamed over
/// the target, so a reader sees either the old or the new record.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "learning_state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait::async_trait]
impl LearningStateStore for JsonFileStore {
    async fn load(&self) -> Result<Option<LearningState>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        let state = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse learning state {}", self.path.display()))?;
        Ok(Some(state))
    }

    async fn save(&self, state: &LearningState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(state).context("Failed to serialize learning state")?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, content)
            .await
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), version = state.version, "Learning state saved");
        Ok(())
    }
}

/// In-memory store (for testing and development)
pub struct InMemoryStore {
    state: tokio::sync::RwLock<Option<LearningState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: tokio::sync::RwLock::new(None),
        }
    }

    pub fn with_state(state: LearningState) -> Self {
        Self {
            state: tokio::sync::RwLock::new(Some(state)),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LearningStateStore for InMemoryStore {
    async fn load(&self) -> Result<Option<LearningState>> {
        Ok(self.state.read().await.clone())
    }

    async fn save(&self, state: &LearningState) -> Result<()> {
        *self.state.write().await = Some(state.clone());
        Ok(())
    }
}
