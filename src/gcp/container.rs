//! Kubernetes Engine (Container) API
//!
//! Wire types for the v1 REST surface, the [`Mutation`] vocabulary the
//! reconciler issues, and the [`ContainerApi`] trait it consumes. The REST
//! implementation lives on [`GcpClient`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::client::GcpClient;
use super::http::ApiError;
use crate::nodepool::identity::{ClusterId, NodePoolId};

/// `google.rpc.Code.NOT_FOUND`, as carried in a failed operation
pub const RPC_NOT_FOUND: i32 = 5;

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodePool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_node_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<NodeConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<NodePoolAutoscaling>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub management: Option<NodeManagement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_settings: Option<UpgradeSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_config: Option<NodeNetworkConfig>,
    #[serde(skip_serializing)]
    pub status: Option<String>,
    #[serde(skip_serializing)]
    pub status_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<i64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodePoolAutoscaling {
    pub enabled: bool,
    pub min_node_count: i64,
    pub max_node_count: i64,
    pub total_min_node_count: i64,
    pub total_max_node_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeManagement {
    pub auto_upgrade: bool,
    pub auto_repair: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpgradeSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_surge: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blue_green_settings: Option<BlueGreenSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlueGreenSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_pool_soak_duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard_rollout_policy: Option<StandardRolloutPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StandardRolloutPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_node_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_soak_duration: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeNetworkConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_private_nodes: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_pod_range: Option<bool>,
}

/// Body of `PUT .../nodePools/{name}`; only the set fields are changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodePoolRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_settings: Option<UpgradeSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_labels: Option<LabelMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<NetworkTags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_network_config: Option<NodeNetworkConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelMap {
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkTags {
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Cluster {
    pub name: String,
    pub status: Option<String>,
    pub status_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Operation {
    pub name: String,
    pub operation_type: Option<String>,
    pub status: Option<String>,
    pub status_message: Option<String>,
    pub target_link: Option<String>,
    pub error: Option<RpcStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RpcStatus {
    pub code: Option<i32>,
    pub message: String,
}

// =============================================================================
// Operations
// =============================================================================

/// Lifecycle of a GKE operation as reported by its `status` field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Running,
    Aborting,
    Done,
    Unknown(String),
}

impl OperationState {
    pub fn from_status(status: &str) -> Self {
        match status {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "ABORTING" => Self::Aborting,
            "DONE" => Self::Done,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Why a finished operation did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    pub code: Option<i32>,
    pub message: String,
}

impl Operation {
    pub fn state(&self) -> OperationState {
        OperationState::from_status(self.status.as_deref().unwrap_or(""))
    }

    /// A `DONE` operation failed when it carries an error, or, since the
    /// Container API does not always populate `error`, a status message.
    pub fn failure(&self) -> Option<OperationFailure> {
        if !self.state().is_terminal() {
            return None;
        }
        if let Some(error) = &self.error {
            return Some(OperationFailure {
                code: error.code,
                message: error.message.clone(),
            });
        }
        self.status_message
            .as_deref()
            .filter(|m| !m.is_empty())
            .map(|m| OperationFailure {
                code: None,
                message: m.to_string(),
            })
    }
}

// =============================================================================
// Mutations
// =============================================================================

/// A mutating Container API call targeting one node pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateNodePool {
        target: NodePoolId,
        node_pool: NodePool,
    },
    DeleteNodePool {
        target: NodePoolId,
    },
    UpdateNodePool {
        target: NodePoolId,
        request: UpdateNodePoolRequest,
        /// Which section changed, for log lines and operation descriptions
        section: &'static str,
    },
    SetSize {
        target: NodePoolId,
        node_count: i64,
    },
    SetManagement {
        target: NodePoolId,
        management: NodeManagement,
    },
    /// Applied through a cluster update (`desiredNodePoolAutoscaling`)
    SetAutoscaling {
        target: NodePoolId,
        autoscaling: NodePoolAutoscaling,
    },
}

impl Mutation {
    pub fn target(&self) -> &NodePoolId {
        match self {
            Self::CreateNodePool { target, .. }
            | Self::DeleteNodePool { target }
            | Self::UpdateNodePool { target, .. }
            | Self::SetSize { target, .. }
            | Self::SetManagement { target, .. }
            | Self::SetAutoscaling { target, .. } => target,
        }
    }

    /// Human readable action, used as the operation description
    pub fn description(&self) -> String {
        match self {
            Self::CreateNodePool { .. } => "creating GKE NodePool".to_string(),
            Self::DeleteNodePool { .. } => "deleting GKE NodePool".to_string(),
            Self::UpdateNodePool { section, .. } => format!("updating GKE node pool {}", section),
            Self::SetSize { .. } => "updating GKE node pool size".to_string(),
            Self::SetManagement { .. } => "updating GKE node pool management".to_string(),
            Self::SetAutoscaling { .. } => "updating GKE node pool autoscaling".to_string(),
        }
    }
}

/// The slice of the Container API the reconciler depends on.
#[async_trait]
pub trait ContainerApi: Send + Sync {
    /// Issue a mutating call and return the long-running operation it started
    async fn issue(&self, mutation: &Mutation) -> Result<Operation, ApiError>;

    async fn get_operation(
        &self,
        project: &str,
        location: &str,
        name: &str,
    ) -> Result<Operation, ApiError>;

    async fn get_node_pool(&self, id: &NodePoolId) -> Result<NodePool, ApiError>;

    async fn get_cluster(&self, id: &ClusterId) -> Result<Cluster, ApiError>;
}

// =============================================================================
// REST implementation
// =============================================================================

fn encode<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::new(400, format!("Failed to encode request: {e}")))
}

fn wrap(key: &str, value: Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, ApiError> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::new(200, format!("Failed to decode {}: {e}", what)))
}

#[async_trait]
impl ContainerApi for GcpClient {
    async fn issue(&self, mutation: &Mutation) -> Result<Operation, ApiError> {
        tracing::info!("{} {}", mutation.description(), mutation.target());

        let target = mutation.target();
        let pool_url = self.container_url(&target.full_name());

        let response = match mutation {
            Mutation::CreateNodePool { node_pool, .. } => {
                let url = self.container_url(&format!("{}/nodePools", target.cluster.full_name()));
                let body = wrap("nodePool", encode(node_pool)?);
                self.post(&url, Some(&body)).await?
            }
            Mutation::DeleteNodePool { .. } => self.delete(&pool_url).await?,
            Mutation::UpdateNodePool { request, .. } => {
                self.put(&pool_url, Some(&encode(request)?)).await?
            }
            Mutation::SetSize { node_count, .. } => {
                let body = wrap("nodeCount", Value::from(*node_count));
                self.post(&format!("{}:setSize", pool_url), Some(&body)).await?
            }
            Mutation::SetManagement { management, .. } => {
                let body = wrap("management", encode(management)?);
                self.post(&format!("{}:setManagement", pool_url), Some(&body))
                    .await?
            }
            Mutation::SetAutoscaling { autoscaling, .. } => {
                let mut update = serde_json::Map::new();
                update.insert("desiredNodePoolId".to_string(), Value::from(target.name.clone()));
                update.insert("desiredNodePoolAutoscaling".to_string(), encode(autoscaling)?);
                let body = wrap("update", Value::Object(update));
                let url = self.container_url(&target.cluster.full_name());
                self.put(&url, Some(&body)).await?
            }
        };

        decode(response, "operation")
    }

    async fn get_operation(
        &self,
        project: &str,
        location: &str,
        name: &str,
    ) -> Result<Operation, ApiError> {
        let url = self.container_operation_url(project, location, name);
        decode(self.get(&url).await?, "operation")
    }

    async fn get_node_pool(&self, id: &NodePoolId) -> Result<NodePool, ApiError> {
        let url = self.container_url(&id.full_name());
        decode(self.get(&url).await?, "node pool")
    }

    async fn get_cluster(&self, id: &ClusterId) -> Result<Cluster, ApiError> {
        let url = self.container_url(&id.full_name());
        decode(self.get(&url).await?, "cluster")
    }
}
