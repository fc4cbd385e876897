//! Node pool domain model
//!
//! - [`identity`] - cluster and node pool identities, lock keys, import IDs
//! - [`spec`] - the YAML manifest and its wire conversion
//! - [`changes`] - ordered update mutations between two manifests

pub mod changes;
pub mod identity;
pub mod spec;

pub use changes::NodePoolChanges;
pub use identity::{ClusterId, NodePoolId};
pub use spec::NodePoolSpec;
