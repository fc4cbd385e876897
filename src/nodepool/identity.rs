//! Node pool and cluster identities
//!
//! Identities double as lock keys, so every segment is validated to be
//! non-empty and free of `/`. That keeps the formatted paths unambiguous:
//! two different identities never render to the same string.

use std::fmt;

use crate::reconcile::error::ReconcileError;

/// A GKE cluster: `projects/{project}/locations/{location}/clusters/{cluster}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterId {
    pub project: String,
    pub location: String,
    pub cluster: String,
}

/// A node pool inside a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodePoolId {
    pub cluster: ClusterId,
    pub name: String,
}

fn check_segment(id: &str, field: &str, value: &str) -> Result<(), ReconcileError> {
    if value.is_empty() {
        return Err(ReconcileError::invalid_id(id, format!("{} is empty", field)));
    }
    if value.contains('/') {
        return Err(ReconcileError::invalid_id(
            id,
            format!("{} {:?} contains '/'", field, value),
        ));
    }
    Ok(())
}

impl ClusterId {
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Result<Self, ReconcileError> {
        let id = Self {
            project: project.into(),
            location: location.into(),
            cluster: cluster.into(),
        };
        let shown = id.full_name();
        check_segment(&shown, "project", &id.project)?;
        check_segment(&shown, "location", &id.location)?;
        check_segment(&shown, "cluster", &id.cluster)?;
        Ok(id)
    }

    /// Resolve a cluster reference that is either a bare name or a full
    /// `projects/P/locations/L/clusters/C` path.
    pub fn resolve(
        cluster: &str,
        project: Option<&str>,
        location: Option<&str>,
    ) -> Result<Self, ReconcileError> {
        let parts: Vec<&str> = cluster.split('/').collect();
        if let ["projects", p, "locations", l, "clusters", c] = parts.as_slice() {
            tracing::debug!("matching parent cluster {} to a full cluster path", cluster);
            return Self::new(*p, *l, *c);
        }

        let project = project.ok_or_else(|| {
            ReconcileError::invalid_id(cluster, "project is not set and cannot be inferred")
        })?;
        let location = location.ok_or_else(|| {
            ReconcileError::invalid_id(cluster, "location is not set and cannot be inferred")
        })?;
        Self::new(project, location, cluster)
    }

    pub fn full_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/clusters/{}",
            self.project, self.location, self.cluster
        )
    }

    /// Shared during node pool mutations, exclusive for cluster-wide changes.
    pub fn lock_key(&self) -> String {
        format!(
            "google-container-cluster/{}/{}/{}",
            self.project, self.location, self.cluster
        )
    }

    pub fn node_pool(&self, name: impl Into<String>) -> Result<NodePoolId, ReconcileError> {
        let id = NodePoolId {
            cluster: self.clone(),
            name: name.into(),
        };
        check_segment(&id.full_name(), "node pool name", &id.name)?;
        Ok(id)
    }
}

impl NodePoolId {
    pub fn project(&self) -> &str {
        &self.cluster.project
    }

    pub fn location(&self) -> &str {
        &self.cluster.location
    }

    pub fn full_name(&self) -> String {
        format!("{}/nodePools/{}", self.cluster.full_name(), self.name)
    }

    pub fn lock_key(&self) -> String {
        self.full_name()
    }

    /// Parse an import ID.
    ///
    /// Accepted forms:
    /// - `projects/{project}/locations/{location}/clusters/{cluster}/nodePools/{name}`
    /// - `{project}/{location}/{cluster}/{name}`
    /// - `{location}/{cluster}/{name}` (project from `default_project`)
    pub fn parse(id: &str, default_project: Option<&str>) -> Result<Self, ReconcileError> {
        let parts: Vec<&str> = id.split('/').collect();
        let (project, location, cluster, name) = match parts.as_slice() {
            ["projects", p, "locations", l, "clusters", c, "nodePools", n] => (*p, *l, *c, *n),
            [p, l, c, n] => (*p, *l, *c, *n),
            [l, c, n] => {
                let project = default_project.ok_or_else(|| {
                    ReconcileError::invalid_id(id, "no project in id and no default project")
                })?;
                (project, *l, *c, *n)
            }
            _ => {
                return Err(ReconcileError::invalid_id(
                    id,
                    "expected projects/{project}/locations/{location}/clusters/{cluster}/nodePools/{name}",
                ))
            }
        };

        ClusterId::new(project, location, cluster)?.node_pool(name)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

impl fmt::Display for NodePoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> ClusterId {
        ClusterId::new("my-project", "us-central1", "c").unwrap()
    }

    #[test]
    fn test_lock_keys() {
        let pool = cluster().node_pool("a").unwrap();
        assert_eq!(
            cluster().lock_key(),
            "google-container-cluster/my-project/us-central1/c"
        );
        assert_eq!(
            pool.lock_key(),
            "projects/my-project/locations/us-central1/clusters/c/nodePools/a"
        );
        assert_ne!(pool.lock_key(), pool.cluster.lock_key());
    }

    #[test]
    fn test_parse_all_forms() {
        let full = NodePoolId::parse(
            "projects/my-project/locations/us-central1/clusters/c/nodePools/a",
            None,
        )
        .unwrap();
        let short = NodePoolId::parse("my-project/us-central1/c/a", None).unwrap();
        let shortest = NodePoolId::parse("us-central1/c/a", Some("my-project")).unwrap();

        assert_eq!(full, short);
        assert_eq!(short, shortest);
        assert_eq!(full.name, "a");
    }

    #[test]
    fn test_parse_requires_project() {
        let err = NodePoolId::parse("us-central1/c/a", None).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidId { .. }));
    }

    #[test]
    fn test_rejects_empty_segments() {
        assert!(NodePoolId::parse("my-project//c/a", None).is_err());
        assert!(cluster().node_pool("").is_err());
        assert!(ClusterId::new("p", "l", "").is_err());
    }

    #[test]
    fn test_resolve_full_cluster_path() {
        let id = ClusterId::resolve(
            "projects/other-project/locations/europe-west1/clusters/prod",
            Some("ignored-project"),
            None,
        )
        .unwrap();
        assert_eq!(id.project, "other-project");
        assert_eq!(id.location, "europe-west1");
        assert_eq!(id.cluster, "prod");

        let bare = ClusterId::resolve("prod", Some("my-project"), Some("us-east1")).unwrap();
        assert_eq!(bare.full_name(), "projects/my-project/locations/us-east1/clusters/prod");

        assert!(ClusterId::resolve("prod", None, Some("us-east1")).is_err());
    }
}
