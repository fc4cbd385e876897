//! gkepool - reconcile GKE node pools
//!
//! Maps a declarative node pool manifest onto the Container API: issue a
//! mutation, poll its long-running operation, wait for the pool to settle,
//! and keep concurrent mutations of the same pool apart.
//!
//! - [`gcp`] - authentication, REST client and Container API wire types
//! - [`nodepool`] - identities, manifests and update planning
//! - [`reconcile`] - polling, locking and the mutation orchestrator
//! - [`config`] / [`state`] - persisted settings and node pool state

pub mod config;
pub mod gcp;
pub mod nodepool;
pub mod reconcile;
pub mod state;

/// Version injected at compile time via GKEPOOL_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("GKEPOOL_VERSION") {
    Some(v) => v,
    None => "dev",
};
