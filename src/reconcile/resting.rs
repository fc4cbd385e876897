//! Resting-state waits
//!
//! Polls a resource (not its operation) and classifies the status keyword on
//! every fetch until it is Ready or Error. Used before a mutation, so we do
//! not stack changes on a pool that is still reconciling, and after one.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::clock::{pause, Backoff, Clock, Pause, TimeoutBudget};
use super::error::{ReconcileError, Result};
use super::operation::ResourceKind;
use super::status::{classify, Classification, StatusTable, CLUSTER_RESTING_STATES, NODE_POOL_RESTING_STATES};
use crate::gcp::container::ContainerApi;
use crate::gcp::http::ApiError;
use crate::nodepool::identity::{ClusterId, NodePoolId};

/// What a resource looked like when it came to rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestingStateResult {
    pub state: String,
    pub classification: Classification,
}

impl RestingStateResult {
    pub fn is_error(&self) -> bool {
        self.classification == Classification::Error
    }
}

#[derive(Clone)]
pub struct RestingStateWaiter {
    api: Arc<dyn ContainerApi>,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl RestingStateWaiter {
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

    pub async fn await_node_pool(
        &self,
        id: &NodePoolId,
        budget: TimeoutBudget,
    ) -> Result<RestingStateResult> {
        let what = format!("{} {}", ResourceKind::NodePool, id.name);
        self.await_resting_state(&what, NODE_POOL_RESTING_STATES, budget, || async move {
            self.api.get_node_pool(id).await.map(|pool| pool.status)
        })
        .await
    }

    pub async fn await_cluster(
        &self,
        id: &ClusterId,
        budget: TimeoutBudget,
    ) -> Result<RestingStateResult> {
        let what = format!("{} {}", ResourceKind::Cluster, id.cluster);
        self.await_resting_state(&what, CLUSTER_RESTING_STATES, budget, || async move {
            self.api.get_cluster(id).await.map(|cluster| cluster.status)
        })
        .await
    }

    /// Fetch and classify until terminal.
    ///
    /// Any fetch error ends the wait: a missing resource cannot come to
    /// rest, and the operation poller has already absorbed the transient
    /// errors of the mutation itself.
    async fn await_resting_state<F, Fut>(
        &self,
        what: &str,
        table: StatusTable<'_>,
        budget: TimeoutBudget,
        fetch: F,
    ) -> Result<RestingStateResult>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<Option<String>, ApiError>>,
    {
        let clock = self.clock.as_ref();
        let mut delays = self.backoff.delays();

        loop {
            if self.cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled {
                    what: format!("waiting for {} to settle", what),
                });
            }

            let state = fetch()
                .await
                .map_err(|e| ReconcileError::fetch(what, e))?
                .unwrap_or_default();
            let classification = classify(&state, table);
            tracing::debug!("{} is {:?} ({})", what, state, classification);

            if classification.is_terminal() {
                return Ok(RestingStateResult {
                    state,
                    classification,
                });
            }
            if budget.is_exhausted(clock) {
                return Err(ReconcileError::RetryLimit {
                    what: what.to_string(),
                    last_state: Some(state),
                    waited: budget.elapsed(clock),
                });
            }

            let delay = delays.next().unwrap_or(self.backoff.max);
            if pause(clock, &budget, delay, &self.cancel).await == Pause::Cancelled {
                return Err(ReconcileError::Cancelled {
                    what: format!("waiting for {} to settle", what),
                });
            }
        }
    }
}
