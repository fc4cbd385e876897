//! Persisted node pool state
//!
//! What the last successful operation observed, keyed by node pool ID, in a
//! JSON file. A create interrupted by Ctrl-C records the in-flight operation
//! name so the next `read` can resume the wait.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gcp::container::NodePool;
use crate::nodepool::identity::{ClusterId, NodePoolId};
use crate::nodepool::spec::NodePoolSpec;
use crate::reconcile::error::ReconcileError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePoolState {
    /// `projects/{project}/locations/{location}/clusters/{cluster}/nodePools/{name}`
    pub id: String,
    pub project: String,
    pub location: String,
    pub cluster: String,
    pub name: String,
    pub spec: NodePoolSpec,
    #[serde(default)]
    pub status: Option<String>,
    /// Operation to resume on the next read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl NodePoolState {
    /// State built from a freshly read pool. `node_count` carries the last
    /// applied size, which the API does not report.
    pub fn observed(id: &NodePoolId, pool: &NodePool, node_count: Option<i64>) -> Self {
        let mut spec = NodePoolSpec::from_wire(pool, &id.cluster);
        spec.node_count = node_count;
        Self {
            status: pool.status.clone(),
            ..Self::pending(id, spec, None)
        }
    }

    /// State for a pool whose operation has not finished yet
    pub fn pending(id: &NodePoolId, spec: NodePoolSpec, operation: Option<String>) -> Self {
        Self {
            id: id.full_name(),
            project: id.project().to_string(),
            location: id.location().to_string(),
            cluster: id.cluster.cluster.clone(),
            name: id.name.clone(),
            spec,
            status: None,
            operation,
            updated_at: Utc::now(),
        }
    }

    pub fn node_pool_id(&self) -> Result<NodePoolId, ReconcileError> {
        ClusterId::new(&*self.project, &*self.location, &*self.cluster)?.node_pool(self.name.as_str())
    }

    pub fn with_operation(mut self, operation: Option<String>) -> Self {
        self.operation = operation;
        self.updated_at = Utc::now();
        self
    }
}

/// A JSON file of [`NodePoolState`]s keyed by ID.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    node_pools: BTreeMap<String, NodePoolState>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config_dir>/gkepool/state.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gkepool").join("state.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StateFile> {
        if !self.path.exists() {
            return Ok(StateFile::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file {}", self.path.display()))
    }

    fn save(&self, file: &StateFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(file)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write state file {}", self.path.display()))
    }

    pub fn get(&self, id: &str) -> Result<Option<NodePoolState>> {
        Ok(self.load()?.node_pools.remove(id))
    }

    pub fn put(&self, state: &NodePoolState) -> Result<()> {
        let mut file = self.load()?;
        file.node_pools.insert(state.id.clone(), state.clone());
        self.save(&file)?;
        tracing::debug!("Saved state for {}", state.id);
        Ok(())
    }

    /// Set the in-flight operation on an existing entry. Returns false when
    /// `id` has no entry.
    pub fn record_operation(&self, id: &str, operation: Option<String>) -> Result<bool> {
        let mut file = self.load()?;
        let Some(state) = file.node_pools.remove(id) else {
            return Ok(false);
        };
        file.node_pools.insert(id.to_string(), state.with_operation(operation));
        self.save(&file)?;
        tracing::debug!("Recorded in-flight operation for {}", id);
        Ok(true)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut file = self.load()?;
        let removed = file.node_pools.remove(id).is_some();
        if removed {
            self.save(&file)?;
            tracing::debug!("Removed state for {}", id);
        }
        Ok(removed)
    }
}
