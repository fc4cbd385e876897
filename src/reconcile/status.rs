//! Status classification
//!
//! Maps a provider status keyword onto the generic resting-state taxonomy.
//! Each resource kind has its own vocabulary; the classification is shared.

use std::fmt;

/// Generic classification of a resource status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Not in the table; keep polling
    Undefined,
    /// A known transitional status; keep polling
    Resting,
    /// Terminal and unhealthy
    Error,
    /// Terminal and healthy
    Ready,
}

impl Classification {
    /// Ready and Error end a resting-state wait
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undefined => "undefined",
            Self::Resting => "resting",
            Self::Error => "error",
            Self::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Status keyword → classification. The first matching entry wins.
pub type StatusTable<'a> = &'a [(&'a str, Classification)];

pub const NODE_POOL_RESTING_STATES: StatusTable<'static> = &[
    ("RUNNING", Classification::Ready),
    ("RUNNING_WITH_ERROR", Classification::Error),
    ("ERROR", Classification::Error),
    ("PROVISIONING", Classification::Resting),
    ("RECONCILING", Classification::Resting),
    ("STOPPING", Classification::Resting),
];

pub const CLUSTER_RESTING_STATES: StatusTable<'static> = &[
    ("RUNNING", Classification::Ready),
    ("DEGRADED", Classification::Error),
    ("ERROR", Classification::Error),
    ("PROVISIONING", Classification::Resting),
    ("RECONCILING", Classification::Resting),
    ("STOPPING", Classification::Resting),
];

/// Classify `raw` against `table`; unknown keywords are [`Classification::Undefined`].
pub fn classify(raw: &str, table: StatusTable<'_>) -> Classification {
    table
        .iter()
        .find(|(status, _)| *status == raw)
        .map(|(_, classification)| *classification)
        .unwrap_or(Classification::Undefined)
}
