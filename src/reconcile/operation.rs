//! Long-running operation polling

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::clock::{pause, Backoff, Clock, Pause, TimeoutBudget};
use super::error::{ReconcileError, Result};
use crate::gcp::container::{ContainerApi, Operation, OperationState};

/// A provider operation in flight, plus what it is doing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub name: String,
    pub description: String,
}

impl OperationHandle {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Which resource an operation (or a resting-state wait) concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    NodePool,
    Cluster,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodePool => f.write_str("NodePool"),
            Self::Cluster => f.write_str("Cluster"),
        }
    }
}

/// How an operation wait ended without error
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    /// The operation finished successfully
    Done(Operation),
    /// Cancellation arrived first; the handle is still in flight and can be
    /// awaited again
    Cancelled(OperationHandle),
}

#[derive(Clone)]
pub struct OperationPoller {
    api: Arc<dyn ContainerApi>,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl OperationPoller {
    pub fn new(
        api: Arc<dyn ContainerApi>,
        clock: Arc<dyn Clock>,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            clock,
            backoff,
            cancel,
        }
    }

    /// Poll `handle` until it is `DONE`, the budget runs out, or the poller
    /// is cancelled.
    ///
    /// Transient fetch errors (busy cluster, conflicts, throttling, 5xx) are
    /// retried; any other fetch error aborts the wait. A budget that is
    /// already exhausted still gets one fetch.
    pub async fn await_operation(
        &self,
        handle: &OperationHandle,
        kind: ResourceKind,
        project: &str,
        location: &str,
        budget: TimeoutBudget,
    ) -> Result<OperationOutcome> {
        let clock = self.clock.as_ref();
        let mut delays = self.backoff.delays();

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Stopped waiting for {} ({})", handle.description, handle.name);
                return Ok(OperationOutcome::Cancelled(handle.clone()));
            }

            match self.api.get_operation(project, location, &handle.name).await {
                Ok(op) => {
                    let state = op.state();
                    tracing::debug!(
                        "{} operation {} for {} is {:?}",
                        kind,
                        handle.name,
                        handle.description,
                        state
                    );
                    match state {
                        OperationState::Done => {
                            if let Some(failure) = op.failure() {
                                return Err(ReconcileError::OperationFailed {
                                    handle: handle.clone(),
                                    code: failure.code,
                                    message: failure.message,
                                });
                            }
                            return Ok(OperationOutcome::Done(op));
                        }
                        OperationState::Unknown(status) => {
                            tracing::warn!("Unknown operation status {:?} for {}", status, handle.name);
                        }
                        OperationState::Pending
                        | OperationState::Running
                        | OperationState::Aborting => {}
                    }
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Retrying operation poll for {}: {}", handle.name, e);
                }
                Err(e) => {
                    return Err(ReconcileError::api(
                        format!("waiting for {}", handle.description),
                        e,
                    ));
                }
            }

            if budget.is_exhausted(clock) {
                return Err(ReconcileError::Timeout {
                    handle: handle.clone(),
                    waited: budget.elapsed(clock),
                });
            }

            let delay = delays.next().unwrap_or(self.backoff.max);
            if pause(clock, &budget, delay, &self.cancel).await == Pause::Cancelled {
                tracing::info!("Stopped waiting for {} ({})", handle.description, handle.name);
                return Ok(OperationOutcome::Cancelled(handle.clone()));
            }
        }
    }
}
