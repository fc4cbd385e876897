//! Reconciliation error taxonomy.
//!
//! Transient API errors never surface here: the pollers and the mutating-call
//! retry absorb them while budget remains. Everything that reaches a caller is
//! one of the variants below, with enough context (identity, last state,
//! action) to log or show to a user.

use std::time::Duration;

use thiserror::Error;

use super::operation::OperationHandle;
use crate::state::NodePoolState;
use crate::gcp::container::RPC_NOT_FOUND;
use crate::gcp::http::ApiError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A resource expected to exist is absent
    #[error("{what} not found")]
    NotFound {
        what: String,
        #[source]
        source: ApiError,
    },

    /// Validation, permission, quota and any other non-retryable API error
    #[error("error {action}: {source}")]
    Api {
        action: String,
        #[source]
        source: ApiError,
    },

    /// The operation finished, but unsuccessfully
    #[error("error waiting for {}: {message}", .handle.description)]
    OperationFailed {
        handle: OperationHandle,
        code: Option<i32>,
        message: String,
    },

    /// The budget ran out while the operation was still in flight. The handle
    /// can be persisted and awaited again later.
    #[error("timeout after {waited:?} waiting for {} (operation {})", .handle.description, .handle.name)]
    Timeout {
        handle: OperationHandle,
        waited: Duration,
    },

    /// The budget ran out before the resource settled
    #[error(
        "{what} did not reach a resting state after {waited:?}; last state {}",
        .last_state.as_deref().unwrap_or("unknown")
    )]
    RetryLimit {
        what: String,
        last_state: Option<String>,
        waited: Duration,
    },

    /// The resource settled, but into an error state
    #[error("NodePool {name} was {action} in the error state {state:?}")]
    Settled {
        name: String,
        action: &'static str,
        state: String,
    },

    /// Cancellation arrived while no operation handle was in flight
    #[error("cancelled while {what}")]
    Cancelled { what: String },

    #[error("resource - {id} - already exists")]
    AlreadyExists { id: String },

    #[error("invalid node pool id {id:?}: {reason}")]
    InvalidId { id: String, reason: String },

    #[error("invalid node pool spec: {0}")]
    InvalidSpec(String),

    /// Create failed after the pool came into existence. `state` is what
    /// should be recorded so the pool is not orphaned.
    #[error("NodePool {} exists but was not created cleanly", .state.name)]
    Recorded {
        state: Box<NodePoolState>,
        #[source]
        error: Box<ReconcileError>,
    },
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

impl ReconcileError {
    /// Error from a mutating call or other action
    pub fn api(action: impl Into<String>, source: ApiError) -> Self {
        Self::Api {
            action: action.into(),
            source,
        }
    }

    /// Error from reading `what`; a 404 becomes [`ReconcileError::NotFound`]
    pub fn fetch(what: impl Into<String>, source: ApiError) -> Self {
        let what = what.into();
        if source.is_not_found() {
            Self::NotFound { what, source }
        } else {
            Self::Api {
                action: format!("reading {}", what),
                source,
            }
        }
    }

    pub fn recorded(state: NodePoolState, error: ReconcileError) -> Self {
        Self::Recorded {
            state: Box::new(state),
            error: Box::new(error),
        }
    }

    pub fn invalid_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// True for every flavour of "the target is absent": a 404 on fetch, a
    /// 404 on a mutating call, or an operation that finished with NOT_FOUND.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Api { source, .. } => source.is_not_found(),
            Self::Recorded { error, .. } => error.is_not_found(),
            _ => self.is_operation_not_found(),
        }
    }

    /// The operation itself finished with NOT_FOUND. A 404 while fetching
    /// the operation does not count.
    pub fn is_operation_not_found(&self) -> bool {
        matches!(self, Self::OperationFailed { code: Some(RPC_NOT_FOUND), .. })
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RetryLimit { .. } => true,
            Self::Recorded { error, .. } => error.is_timeout(),
            _ => false,
        }
    }

    /// The in-flight operation, when the error carries one
    pub fn handle(&self) -> Option<&OperationHandle> {
        match self {
            Self::Timeout { handle, .. } | Self::OperationFailed { handle, .. } => Some(handle),
            Self::Recorded { error, .. } => error.handle(),
            _ => None,
        }
    }

    /// State to persist despite the failure
    pub fn recorded_state(&self) -> Option<&NodePoolState> {
        match self {
            Self::Recorded { state, .. } => Some(state),
            _ => None,
        }
    }
}
