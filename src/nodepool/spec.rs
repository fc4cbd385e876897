//! Declarative node pool manifests
//!
//! A [`NodePoolSpec`] is decoded once from YAML at the edge of the program
//! and converted to and from the Container API wire shape here. Optional
//! sections are typed structs; the upgrade strategy is an enum so surge and
//! blue-green settings cannot be mixed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::gcp::container::{
    BlueGreenSettings, NodeConfig, NodeManagement, NodeNetworkConfig, NodePool,
    NodePoolAutoscaling, StandardRolloutPolicy, UpgradeSettings,
};
use crate::nodepool::identity::{ClusterId, NodePoolId};
use crate::reconcile::error::{ReconcileError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodePoolSpec {
    pub name: String,
    /// Bare cluster name or `projects/P/locations/L/clusters/C`
    pub cluster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_node_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_locations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<AutoscalingSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management: Option<ManagementSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_settings: Option<UpgradeStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_config: Option<NetworkConfigSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_config: Option<NodeConfigSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoscalingSpec {
    pub min_node_count: i64,
    pub max_node_count: i64,
    pub total_min_node_count: i64,
    pub total_max_node_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagementSpec {
    pub auto_repair: bool,
    pub auto_upgrade: bool,
}

impl Default for ManagementSpec {
    fn default() -> Self {
        Self {
            auto_repair: true,
            auto_upgrade: true,
        }
    }
}

/// How nodes are replaced during an upgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", deny_unknown_fields)]
pub enum UpgradeStrategy {
    #[serde(rename = "SURGE")]
    Surge {
        #[serde(default)]
        max_surge: i64,
        #[serde(default)]
        max_unavailable: i64,
    },
    #[serde(rename = "BLUE_GREEN")]
    BlueGreen {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_pool_soak_duration: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        standard_rollout_policy: Option<RolloutPolicySpec>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RolloutPolicySpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<RolloutBatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_soak_duration: Option<String>,
}

/// Blue-green batch size: a share of the pool or a fixed node count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RolloutBatch {
    Percentage { percentage: f64 },
    NodeCount { node_count: i64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfigSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_private_nodes: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_pod_range: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfigSpec {
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

impl NodePoolSpec {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let spec: Self =
            serde_yaml::from_str(content).map_err(|e| ReconcileError::InvalidSpec(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ReconcileError::InvalidSpec(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if let Some(autoscaling) = &self.autoscaling {
            if autoscaling.min_node_count > autoscaling.max_node_count {
                return Err(ReconcileError::InvalidSpec(format!(
                    "autoscaling min_node_count {} is above max_node_count {}",
                    autoscaling.min_node_count, autoscaling.max_node_count
                )));
            }
        }
        for count in [self.initial_node_count, self.node_count].into_iter().flatten() {
            if count < 0 {
                return Err(ReconcileError::InvalidSpec(format!(
                    "node count {} is negative",
                    count
                )));
            }
        }
        Ok(())
    }

    /// Resolve the node pool identity, filling project and location from the
    /// defaults when the manifest leaves them out.
    pub fn identity(
        &self,
        default_project: Option<&str>,
        default_location: Option<&str>,
    ) -> Result<NodePoolId> {
        let project = self.project.as_deref().or(default_project);
        let location = self.location.as_deref().or(default_location);
        ClusterId::resolve(&self.cluster, project, location)?.node_pool(self.name.as_str())
    }

    /// The `nodePool` body of a create call
    pub fn to_wire(&self) -> NodePool {
        NodePool {
            name: self.name.clone(),
            initial_node_count: self.initial_node_count.or(self.node_count),
            config: self.node_config.as_ref().map(NodeConfigSpec::to_wire),
            locations: self.node_locations.clone().unwrap_or_default(),
            version: self.version.clone(),
            autoscaling: self.autoscaling.as_ref().map(AutoscalingSpec::to_wire),
            management: self.management.as_ref().map(ManagementSpec::to_wire),
            upgrade_settings: self.upgrade_settings.as_ref().map(UpgradeStrategy::to_wire),
            network_config: self.network_config.as_ref().map(NetworkConfigSpec::to_wire),
            status: None,
            status_message: None,
        }
    }

    /// Describe an observed pool. The Container API does not report the
    /// current size on the node pool, so `node_count` is left unset.
    pub fn from_wire(pool: &NodePool, cluster: &ClusterId) -> Self {
        Self {
            name: pool.name.clone(),
            cluster: cluster.cluster.clone(),
            project: Some(cluster.project.clone()),
            location: Some(cluster.location.clone()),
            initial_node_count: pool.initial_node_count,
            node_count: None,
            version: pool.version.clone(),
            node_locations: (!pool.locations.is_empty()).then(|| pool.locations.clone()),
            autoscaling: pool
                .autoscaling
                .as_ref()
                .filter(|a| a.enabled)
                .map(AutoscalingSpec::from_wire),
            management: pool.management.as_ref().map(ManagementSpec::from_wire),
            upgrade_settings: pool.upgrade_settings.as_ref().and_then(UpgradeStrategy::from_wire),
            network_config: pool.network_config.as_ref().map(NetworkConfigSpec::from_wire),
            node_config: pool.config.as_ref().map(NodeConfigSpec::from_wire),
        }
    }
}

impl AutoscalingSpec {
    pub fn to_wire(&self) -> NodePoolAutoscaling {
        NodePoolAutoscaling {
            enabled: true,
            min_node_count: self.min_node_count,
            max_node_count: self.max_node_count,
            total_min_node_count: self.total_min_node_count,
            total_max_node_count: self.total_max_node_count,
            location_policy: self.location_policy.clone(),
        }
    }

    fn from_wire(autoscaling: &NodePoolAutoscaling) -> Self {
        Self {
            min_node_count: autoscaling.min_node_count,
            max_node_count: autoscaling.max_node_count,
            total_min_node_count: autoscaling.total_min_node_count,
            total_max_node_count: autoscaling.total_max_node_count,
            location_policy: autoscaling.location_policy.clone(),
        }
    }
}

impl ManagementSpec {
    pub fn to_wire(&self) -> NodeManagement {
        NodeManagement {
            auto_upgrade: self.auto_upgrade,
            auto_repair: self.auto_repair,
        }
    }

    fn from_wire(management: &NodeManagement) -> Self {
        Self {
            auto_repair: management.auto_repair,
            auto_upgrade: management.auto_upgrade,
        }
    }
}

impl UpgradeStrategy {
    pub fn to_wire(&self) -> UpgradeSettings {
        match self {
            Self::Surge {
                max_surge,
                max_unavailable,
            } => UpgradeSettings {
                strategy: Some("SURGE".to_string()),
                max_surge: Some(*max_surge),
                max_unavailable: Some(*max_unavailable),
                blue_green_settings: None,
            },
            Self::BlueGreen {
                node_pool_soak_duration,
                standard_rollout_policy,
            } => UpgradeSettings {
                strategy: Some("BLUE_GREEN".to_string()),
                max_surge: None,
                max_unavailable: None,
                blue_green_settings: Some(BlueGreenSettings {
                    node_pool_soak_duration: node_pool_soak_duration.clone(),
                    standard_rollout_policy: standard_rollout_policy.as_ref().map(|policy| {
                        StandardRolloutPolicy {
                            batch_percentage: match policy.batch {
                                Some(RolloutBatch::Percentage { percentage }) => Some(percentage),
                                _ => None,
                            },
                            batch_node_count: match policy.batch {
                                Some(RolloutBatch::NodeCount { node_count }) => Some(node_count),
                                _ => None,
                            },
                            batch_soak_duration: policy.batch_soak_duration.clone(),
                        }
                    }),
                }),
            },
        }
    }

    /// GKE reports surge settings without a strategy on older pools.
    fn from_wire(settings: &UpgradeSettings) -> Option<Self> {
        match settings.strategy.as_deref() {
            Some("BLUE_GREEN") => {
                let blue_green = settings.blue_green_settings.clone().unwrap_or_default();
                Some(Self::BlueGreen {
                    node_pool_soak_duration: blue_green.node_pool_soak_duration,
                    standard_rollout_policy: blue_green.standard_rollout_policy.map(|policy| {
                        RolloutPolicySpec {
                            batch: match (policy.batch_percentage, policy.batch_node_count) {
                                (Some(percentage), _) => Some(RolloutBatch::Percentage { percentage }),
                                (None, Some(node_count)) => Some(RolloutBatch::NodeCount { node_count }),
                                (None, None) => None,
                            },
                            batch_soak_duration: policy.batch_soak_duration,
                        }
                    }),
                })
            }
            Some("SURGE") | None if settings.max_surge.is_some() || settings.max_unavailable.is_some() => {
                Some(Self::Surge {
                    max_surge: settings.max_surge.unwrap_or_default(),
                    max_unavailable: settings.max_unavailable.unwrap_or_default(),
                })
            }
            _ => None,
        }
    }
}

impl NetworkConfigSpec {
    pub fn to_wire(&self) -> NodeNetworkConfig {
        NodeNetworkConfig {
            enable_private_nodes: self.enable_private_nodes,
            pod_range: self.pod_range.clone(),
            create_pod_range: self.create_pod_range,
        }
    }

    fn from_wire(config: &NodeNetworkConfig) -> Self {
        Self {
            enable_private_nodes: config.enable_private_nodes,
            pod_range: config.pod_range.clone(),
            create_pod_range: config.create_pod_range,
        }
    }
}

impl NodeConfigSpec {
    pub fn to_wire(&self) -> NodeConfig {
        NodeConfig {
            machine_type: self.machine_type.clone(),
            disk_size_gb: self.disk_size_gb,
            labels: self.labels.clone(),
            resource_labels: self.resource_labels.clone(),
            tags: self.tags.clone(),
        }
    }

    fn from_wire(config: &NodeConfig) -> Self {
        Self {
            machine_type: config.machine_type.clone(),
            disk_size_gb: config.disk_size_gb,
            labels: config.labels.clone(),
            resource_labels: config.resource_labels.clone(),
            tags: config.tags.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name: pool-a
cluster: prod
location: us-central1
node_count: 3
version: "1.29.1-gke.100"
autoscaling:
  min_node_count: 1
  max_node_count: 5
management:
  auto_upgrade: false
upgrade_settings:
  strategy: BLUE_GREEN
  node_pool_soak_duration: 600s
  standard_rollout_policy:
    batch:
      percentage: 0.25
    batch_soak_duration: 60s
node_config:
  machine_type: e2-standard-4
  labels:
    team: infra
"#;

    #[test]
    fn test_parse_manifest() {
        let spec = NodePoolSpec::from_yaml(MANIFEST).unwrap();

        assert_eq!(spec.name, "pool-a");
        assert_eq!(spec.node_count, Some(3));
        assert_eq!(
            spec.management,
            Some(ManagementSpec {
                auto_repair: true,
                auto_upgrade: false
            })
        );
        match &spec.upgrade_settings {
            Some(UpgradeStrategy::BlueGreen {
                standard_rollout_policy: Some(policy),
                ..
            }) => assert_eq!(policy.batch, Some(RolloutBatch::Percentage { percentage: 0.25 })),
            other => panic!("unexpected upgrade settings {:?}", other),
        }
    }

    #[test]
    fn test_surge_fields_rejected_under_blue_green() {
        let manifest = r#"
name: a
cluster: c
upgrade_settings:
  strategy: BLUE_GREEN
  max_surge: 2
"#;
        let err = NodePoolSpec::from_yaml(manifest).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidSpec(_)));
    }

    #[test]
    fn test_autoscaling_bounds_validated() {
        let manifest = "name: a\ncluster: c\nautoscaling:\n  min_node_count: 4\n  max_node_count: 2\n";
        assert!(NodePoolSpec::from_yaml(manifest).is_err());
    }

    #[test]
    fn test_identity_from_defaults() {
        let spec = NodePoolSpec::from_yaml(MANIFEST).unwrap();

        let id = spec.identity(Some("my-project"), Some("ignored")).unwrap();
        assert_eq!(
            id.full_name(),
            "projects/my-project/locations/us-central1/clusters/prod/nodePools/pool-a"
        );

        assert!(spec.identity(None, None).is_err());
    }

    #[test]
    fn test_wire_body() {
        let spec = NodePoolSpec::from_yaml(MANIFEST).unwrap();
        let pool = spec.to_wire();

        assert_eq!(pool.initial_node_count, Some(3));
        assert!(pool.autoscaling.as_ref().unwrap().enabled);
        let settings = pool.upgrade_settings.as_ref().unwrap();
        assert_eq!(settings.strategy.as_deref(), Some("BLUE_GREEN"));
        assert_eq!(settings.max_surge, None);
        let policy = settings
            .blue_green_settings
            .as_ref()
            .and_then(|b| b.standard_rollout_policy.as_ref())
            .unwrap();
        assert_eq!(policy.batch_percentage, Some(0.25));
        assert_eq!(policy.batch_node_count, None);
    }

    #[test]
    fn test_observed_pool_without_strategy_is_surge() {
        let pool = NodePool {
            name: "a".to_string(),
            upgrade_settings: Some(UpgradeSettings {
                max_surge: Some(1),
                max_unavailable: Some(0),
                ..Default::default()
            }),
            autoscaling: Some(NodePoolAutoscaling::default()),
            ..Default::default()
        };
        let cluster = ClusterId::new("p", "l", "c").unwrap();

        let spec = NodePoolSpec::from_wire(&pool, &cluster);

        assert_eq!(
            spec.upgrade_settings,
            Some(UpgradeStrategy::Surge {
                max_surge: 1,
                max_unavailable: 0
            })
        );
        // disabled autoscaling reads back as absent
        assert_eq!(spec.autoscaling, None);
        assert_eq!(spec.project.as_deref(), Some("p"));
    }
}
