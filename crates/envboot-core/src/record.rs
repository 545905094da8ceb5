//! The run record: per-environment ledger of step outcomes.
//!
//! Entries are created on a step's first attempt, rewritten on every later
//! attempt, and only removed by an explicit reset.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::paths;

// ---------------------------------------------------------------------------
// StepStatus
// ---------------------------------------------------------------------------

/// Transitions: `Pending → Succeeded | Failed`, `Pending → Skipped` for
/// disabled steps. Back to `Pending` only through reset (or force, for
/// `Succeeded`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    /// Whether dependents may proceed past this step.
    pub fn is_done(self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StepEntry / RunRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEntry {
    pub status: StepStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// How many times the action itself has been executed.
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(default = "default_version")]
    pub version: u32,
    pub environment: String,
    #[serde(default)]
    pub steps: BTreeMap<String, StepEntry>,
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl RunRecord {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            version: 1,
            environment: environment.into(),
            steps: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Status of `id`; steps never attempted are `Pending`.
    pub fn status_of(&self, id: &str) -> StepStatus {
        self.steps
            .get(id)
            .map(|e| e.status)
            .unwrap_or(StepStatus::Pending)
    }

    pub fn entry(&self, id: &str) -> Option<&StepEntry> {
        self.steps.get(id)
    }

    /// Record an outcome. `executed` bumps the attempt counter.
    pub fn mark(&mut self, id: &str, status: StepStatus, error: Option<String>, executed: bool) {
        let now = Utc::now();
        let entry = self.steps.entry(id.to_string()).or_insert(StepEntry {
            status,
            timestamp: now,
            last_error: None,
            attempts: 0,
        });
        entry.status = status;
        entry.timestamp = now;
        entry.last_error = error;
        if executed {
            entry.attempts += 1;
        }
        self.updated_at = now;
    }

    /// Drop entries for `ids`, returning those that existed.
    pub fn clear<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let removed: Vec<String> = ids
            .into_iter()
            .filter(|id| self.steps.remove(*id).is_some())
            .map(str::to_string)
            .collect();
        if !removed.is_empty() {
            self.updated_at = Utc::now();
        }
        removed
    }
}

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Persistence for run records, handed to the orchestrator explicitly.
pub trait RecordStore {
    /// Load the record for `env`, or a fresh empty one.
    fn load(&self, env: &str) -> Result<RunRecord>;

    fn save(&self, record: &RunRecord) -> Result<()>;
}

/// One YAML file per environment under `.envboot/records/`.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The default location for a project root.
    pub fn for_root(root: &Path) -> Self {
        Self::new(paths::records_dir(root))
    }

    pub fn path_for(&self, env: &str) -> PathBuf {
        paths::record_path(&self.dir, env)
    }
}

impl RecordStore for FileRecordStore {
    fn load(&self, env: &str) -> Result<RunRecord> {
        let path = self.path_for(env);
        if !path.exists() {
            return Ok(RunRecord::new(env));
        }
        let data = std::fs::read_to_string(&path)?;
        let record: RunRecord = serde_yaml::from_str(&data)?;
        Ok(record)
    }

    fn save(&self, record: &RunRecord) -> Result<()> {
        let data = serde_yaml::to_string(record)?;
        crate::io::atomic_write(&self.path_for(&record.environment), data.as_bytes())
    }
}

/// Process-local store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, RunRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self, env: &str) -> Result<RunRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .get(env)
            .cloned()
            .unwrap_or_else(|| RunRecord::new(env)))
    }

    fn save(&self, record: &RunRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.environment.clone(), record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
