//! Field-level update planning
//!
//! GKE has no single "update node pool" call that covers every field, so an
//! update is a sequence of mutations, one per changed section, each with its
//! own long-running operation. Sections the desired manifest leaves unset are
//! left alone; autoscaling and the node labels and tags are the exception,
//! since removing them has a meaning (disable, clear).

use std::collections::BTreeMap;

use crate::gcp::container::{
    LabelMap, Mutation, NetworkTags, NodeNetworkConfig, NodePoolAutoscaling, UpdateNodePoolRequest,
};
use crate::nodepool::identity::NodePoolId;
use crate::nodepool::spec::{NodeConfigSpec, NodePoolSpec};
use crate::reconcile::error::{ReconcileError, Result};

/// The ordered mutations that take a pool from `prior` to `desired`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePoolChanges {
    mutations: Vec<Mutation>,
}

fn requires_replacement(field: &str) -> ReconcileError {
    ReconcileError::InvalidSpec(format!(
        "{} cannot be changed in place; delete and recreate the node pool",
        field
    ))
}

impl NodePoolChanges {
    pub fn between(prior: &NodePoolSpec, desired: &NodePoolSpec, target: &NodePoolId) -> Result<Self> {
        check_immutable(prior, desired)?;

        let empty = NodeConfigSpec::default();
        let prior_config = prior.node_config.as_ref().unwrap_or(&empty);
        let desired_config = desired.node_config.as_ref().unwrap_or(&empty);

        let mut mutations = Vec::new();
        let update = |request: UpdateNodePoolRequest, section: &'static str| Mutation::UpdateNodePool {
            target: target.clone(),
            request,
            section,
        };

        if prior.autoscaling != desired.autoscaling {
            let autoscaling = desired
                .autoscaling
                .as_ref()
                .map(|a| a.to_wire())
                .unwrap_or(NodePoolAutoscaling {
                    enabled: false,
                    ..Default::default()
                });
            mutations.push(Mutation::SetAutoscaling {
                target: target.clone(),
                autoscaling,
            });
        }

        if prior_config.labels != desired_config.labels {
            mutations.push(update(
                UpdateNodePoolRequest {
                    labels: Some(label_map(&desired_config.labels)),
                    ..Default::default()
                },
                "labels",
            ));
        }

        if prior_config.resource_labels != desired_config.resource_labels {
            mutations.push(update(
                UpdateNodePoolRequest {
                    resource_labels: Some(label_map(&desired_config.resource_labels)),
                    ..Default::default()
                },
                "resource labels",
            ));
        }

        if prior_config.tags != desired_config.tags {
            mutations.push(update(
                UpdateNodePoolRequest {
                    tags: Some(NetworkTags {
                        tags: desired_config.tags.clone(),
                    }),
                    ..Default::default()
                },
                "tags",
            ));
        }

        if let Some(node_count) = changed(&prior.node_count, &desired.node_count) {
            mutations.push(Mutation::SetSize {
                target: target.clone(),
                node_count: *node_count,
            });
        }

        if let Some(management) = changed(&prior.management, &desired.management) {
            mutations.push(Mutation::SetManagement {
                target: target.clone(),
                management: management.to_wire(),
            });
        }

        if let Some(version) = changed(&prior.version, &desired.version) {
            mutations.push(update(
                UpdateNodePoolRequest {
                    node_version: Some(version.clone()),
                    ..Default::default()
                },
                "version",
            ));
        }

        if let Some(locations) = changed(&prior.node_locations, &desired.node_locations) {
            mutations.push(update(
                UpdateNodePoolRequest {
                    locations: Some(locations.clone()),
                    ..Default::default()
                },
                "node locations",
            ));
        }

        if let Some(strategy) = changed(&prior.upgrade_settings, &desired.upgrade_settings) {
            mutations.push(update(
                UpdateNodePoolRequest {
                    upgrade_settings: Some(strategy.to_wire()),
                    ..Default::default()
                },
                "upgrade settings",
            ));
        }

        let prior_private = prior.network_config.as_ref().and_then(|n| n.enable_private_nodes);
        let desired_private = desired.network_config.as_ref().and_then(|n| n.enable_private_nodes);
        if let Some(enable) = changed(&prior_private, &desired_private) {
            mutations.push(update(
                UpdateNodePoolRequest {
                    node_network_config: Some(NodeNetworkConfig {
                        enable_private_nodes: Some(*enable),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                "network config",
            ));
        }

        Ok(Self { mutations })
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }
}

impl IntoIterator for NodePoolChanges {
    type Item = Mutation;
    type IntoIter = std::vec::IntoIter<Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.into_iter()
    }
}

/// `desired` when it is set and differs from `prior`
fn changed<'a, T: PartialEq>(prior: &Option<T>, desired: &'a Option<T>) -> Option<&'a T> {
    match desired {
        Some(value) if prior.as_ref() != Some(value) => Some(value),
        _ => None,
    }
}

fn label_map(labels: &BTreeMap<String, String>) -> LabelMap {
    LabelMap {
        labels: labels.clone(),
    }
}

fn check_immutable(prior: &NodePoolSpec, desired: &NodePoolSpec) -> Result<()> {
    if prior.name != desired.name {
        return Err(requires_replacement("name"));
    }
    if changed(&prior.initial_node_count, &desired.initial_node_count).is_some() {
        return Err(requires_replacement("initial_node_count"));
    }

    let prior_config = prior.node_config.clone().unwrap_or_default();
    let desired_config = desired.node_config.clone().unwrap_or_default();
    if changed(&prior_config.machine_type, &desired_config.machine_type).is_some() {
        return Err(requires_replacement("node_config.machine_type"));
    }
    if changed(&prior_config.disk_size_gb, &desired_config.disk_size_gb).is_some() {
        return Err(requires_replacement("node_config.disk_size_gb"));
    }

    let prior_network = prior.network_config.clone().unwrap_or_default();
    let desired_network = desired.network_config.clone().unwrap_or_default();
    if changed(&prior_network.pod_range, &desired_network.pod_range).is_some() {
        return Err(requires_replacement("network_config.pod_range"));
    }
    if changed(&prior_network.create_pod_range, &desired_network.create_pod_range).is_some() {
        return Err(requires_replacement("network_config.create_pod_range"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodepool::spec::{AutoscalingSpec, ManagementSpec, UpgradeStrategy};

    fn target() -> NodePoolId {
        NodePoolId::parse("my-project/us-central1/c/a", None).unwrap()
    }

    fn base() -> NodePoolSpec {
        NodePoolSpec {
            name: "a".to_string(),
            cluster: "c".to_string(),
            node_count: Some(3),
            version: Some("1.28.5-gke.100".to_string()),
            ..Default::default()
        }
    }

    fn sections(changes: &NodePoolChanges) -> Vec<String> {
        changes.iter().map(Mutation::description).collect()
    }

    #[test]
    fn test_no_changes() {
        let changes = NodePoolChanges::between(&base(), &base(), &target()).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_mutations_follow_section_order() {
        let prior = base();
        let mut desired = base();
        desired.version = Some("1.29.1-gke.200".to_string());
        desired.node_count = Some(5);
        desired.management = Some(ManagementSpec::default());
        desired.autoscaling = Some(AutoscalingSpec {
            min_node_count: 1,
            max_node_count: 4,
            ..Default::default()
        });
        desired.node_config = Some(NodeConfigSpec {
            labels: [("team".to_string(), "infra".to_string())].into(),
            ..Default::default()
        });

        let changes = NodePoolChanges::between(&prior, &desired, &target()).unwrap();

        assert_eq!(
            sections(&changes),
            vec![
                "updating GKE node pool autoscaling",
                "updating GKE node pool labels",
                "updating GKE node pool size",
                "updating GKE node pool management",
                "updating GKE node pool version",
            ]
        );
    }

    #[test]
    fn test_removed_autoscaling_disables_it() {
        let mut prior = base();
        prior.autoscaling = Some(AutoscalingSpec {
            min_node_count: 1,
            max_node_count: 3,
            ..Default::default()
        });

        let changes = NodePoolChanges::between(&prior, &base(), &target()).unwrap();

        match changes.iter().next() {
            Some(Mutation::SetAutoscaling { autoscaling, .. }) => assert!(!autoscaling.enabled),
            other => panic!("expected autoscaling change, got {:?}", other),
        };
    }

    #[test]
    fn test_unset_sections_are_left_alone() {
        let mut desired = base();
        desired.version = None;
        desired.node_count = None;

        let changes = NodePoolChanges::between(&base(), &desired, &target()).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_strategy_switch_sends_whole_settings() {
        let mut prior = base();
        prior.upgrade_settings = Some(UpgradeStrategy::Surge {
            max_surge: 1,
            max_unavailable: 0,
        });
        let mut desired = base();
        desired.upgrade_settings = Some(UpgradeStrategy::BlueGreen {
            node_pool_soak_duration: Some("300s".to_string()),
            standard_rollout_policy: None,
        });

        let changes = NodePoolChanges::between(&prior, &desired, &target()).unwrap();

        let Some(Mutation::UpdateNodePool { request, section, .. }) = changes.iter().next() else {
            panic!("expected a node pool update");
        };
        assert_eq!(*section, "upgrade settings");
        let settings = request.upgrade_settings.as_ref().unwrap();
        assert_eq!(settings.strategy.as_deref(), Some("BLUE_GREEN"));
        assert_eq!(settings.max_surge, None);
    }

    #[test]
    fn test_machine_type_change_requires_replacement() {
        let mut prior = base();
        prior.node_config = Some(NodeConfigSpec {
            machine_type: Some("e2-medium".to_string()),
            ..Default::default()
        });
        let mut desired = base();
        desired.node_config = Some(NodeConfigSpec {
            machine_type: Some("e2-standard-8".to_string()),
            ..Default::default()
        });

        let err = NodePoolChanges::between(&prior, &desired, &target()).unwrap_err();
        assert!(err.to_string().contains("node_config.machine_type"));
    }
}
