//! Node pool mutations
//!
//! Each mutation runs as one sequential task:
//!
//! ```text
//! Idle -> LockAcquired -> Mutating -> PollingOperation -> AwaitingRestingState -> Done
//!                                                                                \-> Failed
//! ```
//!
//! Locks are taken in a fixed order (the parent cluster's key shared, then
//! the node pool's key exclusive) and released in reverse when the guards go
//! out of scope, on every path. One [`TimeoutBudget`] covers all phases.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::clock::{pause, Backoff, Clock, Pause, TimeoutBudget};
use super::error::{ReconcileError, Result};
use super::mutex::{ExclusiveGuard, MutexStore, SharedGuard};
use super::operation::{OperationHandle, OperationOutcome, OperationPoller, ResourceKind};
use super::resting::RestingStateWaiter;
use crate::gcp::container::{ContainerApi, Mutation};
use crate::nodepool::changes::NodePoolChanges;
use crate::nodepool::identity::NodePoolId;
use crate::nodepool::spec::NodePoolSpec;
use crate::state::NodePoolState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    LockAcquired,
    Mutating,
    PollingOperation,
    AwaitingRestingState,
    Done,
    Failed,
}

impl fmt::Display for MutationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::LockAcquired => "lock acquired",
            Self::Mutating => "mutating",
            Self::PollingOperation => "polling operation",
            Self::AwaitingRestingState => "awaiting resting state",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Logs phase transitions for one mutation
struct PhaseTracker {
    target: String,
    phase: MutationPhase,
}

impl PhaseTracker {
    fn new(target: &NodePoolId) -> Self {
        Self {
            target: target.name.clone(),
            phase: MutationPhase::Idle,
        }
    }

    fn enter(&mut self, next: MutationPhase) {
        tracing::debug!("NodePool {}: {} -> {}", self.target, self.phase, next);
        self.phase = next;
    }

    fn finish<T>(&mut self, result: &Result<T>) {
        match result {
            Ok(_) => self.enter(MutationPhase::Done),
            Err(e) => {
                tracing::warn!("NodePool {} failed while {}: {}", self.target, self.phase, e);
                self.enter(MutationPhase::Failed);
            }
        }
    }
}

/// Outcome of [`NodePoolReconciler::delete`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deletion {
    Deleted,
    /// The pool (or its cluster) was already gone; nothing was issued
    AlreadyAbsent,
    /// Cancelled while the delete operation was still running
    Interrupted(OperationHandle),
}

/// Held for the duration of a mutation. Fields drop in declaration order,
/// so the node pool key is released before the cluster key.
struct MutationLocks {
    _node_pool: ExclusiveGuard,
    _cluster: SharedGuard,
}

/// Creates, reads, updates, deletes and imports GKE node pools.
#[derive(Clone)]
pub struct NodePoolReconciler {
    api: Arc<dyn ContainerApi>,
    locks: Arc<MutexStore>,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
    cancel: CancellationToken,
    poller: OperationPoller,
    waiter: RestingStateWaiter,
}

impl NodePoolReconciler {
    pub fn new(
        api: Arc<dyn ContainerApi>,
        locks: Arc<MutexStore>,
        clock: Arc<dyn Clock>,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        let poller = OperationPoller::new(api.clone(), clock.clone(), backoff, cancel.clone());
        let waiter = RestingStateWaiter::new(api.clone(), clock.clone(), backoff, cancel.clone());
        Self {
            api,
            locks,
            clock,
            backoff,
            cancel,
            poller,
            waiter,
        }
    }

    async fn lock(&self, id: &NodePoolId) -> MutationLocks {
        let cluster = self.locks.acquire_shared(&id.cluster.lock_key()).await;
        let node_pool = self.locks.acquire_exclusive(&id.lock_key()).await;
        MutationLocks {
            _node_pool: node_pool,
            _cluster: cluster,
        }
    }

    /// Issue `mutation`, retrying while GKE reports a failed precondition
    /// (another operation is running on the cluster) and budget remains.
    async fn issue(&self, mutation: &Mutation, budget: &TimeoutBudget) -> Result<OperationHandle> {
        let clock = self.clock.as_ref();
        let mut delays = self.backoff.delays();
        loop {
            match self.api.issue(mutation).await {
                Ok(op) => return Ok(OperationHandle::new(op.name, mutation.description())),
                Err(e) if e.is_failed_precondition() && !budget.is_exhausted(clock) => {
                    tracing::warn!("Cluster busy while {}, retrying: {}", mutation.description(), e);
                    let delay = delays.next().unwrap_or(self.backoff.max);
                    if pause(clock, budget, delay, &self.cancel).await == Pause::Cancelled {
                        return Err(ReconcileError::Cancelled {
                            what: mutation.description(),
                        });
                    }
                }
                Err(e) => return Err(ReconcileError::api(mutation.description(), e)),
            }
        }
    }

    async fn await_operation(
        &self,
        handle: &OperationHandle,
        id: &NodePoolId,
        budget: TimeoutBudget,
    ) -> Result<OperationOutcome> {
        self.poller
            .await_operation(handle, ResourceKind::NodePool, id.project(), id.location(), budget)
            .await
    }

    async fn observe(&self, id: &NodePoolId, node_count: Option<i64>) -> Result<NodePoolState> {
        let what = format!("NodePool {:?} from cluster {:?}", id.name, id.cluster.cluster);
        let pool = self
            .api
            .get_node_pool(id)
            .await
            .map_err(|e| ReconcileError::fetch(what, e))?;
        Ok(NodePoolState::observed(id, &pool, node_count))
    }

    /// Create the pool described by `spec` at `id`.
    ///
    /// When cancelled while the create operation is running, returns the
    /// pending state with the operation name set so a later [`read`](Self::read)
    /// can resume it. Failures after the pool exists come back as
    /// [`ReconcileError::Recorded`] with the state to persist.
    pub async fn create(&self, id: &NodePoolId, spec: &NodePoolSpec, timeout: Duration) -> Result<NodePoolState> {
        let mut phase = PhaseTracker::new(id);
        let result = self.create_locked(id, spec, timeout, &mut phase).await;
        phase.finish(&result);
        result
    }

    async fn create_locked(
        &self,
        id: &NodePoolId,
        spec: &NodePoolSpec,
        timeout: Duration,
        phase: &mut PhaseTracker,
    ) -> Result<NodePoolState> {
        let budget = TimeoutBudget::start(self.clock.as_ref(), timeout);
        let _locks = self.lock(id).await;
        phase.enter(MutationPhase::LockAcquired);

        match self.api.get_node_pool(id).await {
            Ok(_) => return Err(ReconcileError::AlreadyExists { id: id.full_name() }),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(ReconcileError::fetch(format!("NodePool {}", id.name), e)),
        }

        phase.enter(MutationPhase::Mutating);
        let mutation = Mutation::CreateNodePool {
            target: id.clone(),
            node_pool: spec.to_wire(),
        };
        let handle = self.issue(&mutation, &budget).await?;

        phase.enter(MutationPhase::PollingOperation);
        match self.await_operation(&handle, id, budget).await {
            Ok(OperationOutcome::Done(_)) => {}
            Ok(OperationOutcome::Cancelled(handle)) => {
                tracing::debug!("Persisting {} so this operation can be resumed", handle.name);
                return Ok(NodePoolState::pending(id, spec.clone(), Some(handle.name)));
            }
            Err(err @ ReconcileError::Timeout { .. }) => {
                // still running; record it so a later read resumes the wait
                let pending = NodePoolState::pending(id, spec.clone(), Some(handle.name.clone()));
                return Err(ReconcileError::recorded(pending, err));
            }
            Err(err @ ReconcileError::OperationFailed { .. }) => {
                // A stockout can fail the operation after the pool was
                // created; keep it if it is there.
                if self.api.get_node_pool(id).await.is_err() {
                    return Err(err);
                }
                tracing::warn!("NodePool {} exists even though {}", id.name, err);
            }
            Err(err) => return Err(err),
        }
        tracing::info!("GKE NodePool {} has been created", id.name);

        phase.enter(MutationPhase::AwaitingRestingState);
        self.settle_created(id, spec, budget)
            .await
            .map_err(|err| ReconcileError::recorded(NodePoolState::pending(id, spec.clone(), None), err))
    }

    /// Wait for a freshly created pool and its cluster to come to rest.
    async fn settle_created(&self, id: &NodePoolId, spec: &NodePoolSpec, budget: TimeoutBudget) -> Result<NodePoolState> {
        self.waiter.await_cluster(&id.cluster, budget).await?;
        let rest = self.waiter.await_node_pool(id, budget).await?;
        if rest.is_error() {
            return Err(ReconcileError::Settled {
                name: id.name.clone(),
                action: "created",
                state: rest.state,
            });
        }

        self.observe(id, spec.node_count).await
    }

    /// Refresh `state` from the API, resuming an interrupted operation first.
    ///
    /// `None` means the pool no longer exists.
    pub async fn read(&self, state: &NodePoolState, timeout: Duration) -> Result<Option<NodePoolState>> {
        let id = state.node_pool_id()?;
        let budget = TimeoutBudget::start(self.clock.as_ref(), timeout);

        if let Some(operation) = &state.operation {
            tracing::debug!("in progress operation detected at {}, attempting to resume", operation);
            let handle = OperationHandle::new(operation.as_str(), "resuming GKE node pool");
            if let OperationOutcome::Cancelled(handle) = self.await_operation(&handle, &id, budget).await? {
                return Ok(Some(state.clone().with_operation(Some(handle.name))));
            }
        }

        match self.observe(&id, state.spec.node_count).await {
            Ok(observed) => Ok(Some(observed)),
            Err(e) if e.is_not_found() => {
                tracing::info!("NodePool {} not found, removing from state", id.name);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, id: &NodePoolId) -> Result<bool> {
        match self.api.get_node_pool(id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(ReconcileError::fetch(format!("NodePool {}", id.name), e)),
        }
    }

    /// Apply the difference between `state` and `desired`, one mutation per
    /// changed section, then wait for the cluster and pool to settle.
    pub async fn update(
        &self,
        state: &NodePoolState,
        desired: &NodePoolSpec,
        timeout: Duration,
    ) -> Result<NodePoolState> {
        let id = state.node_pool_id()?;
        let desired_id = desired.identity(Some(state.project.as_str()), Some(state.location.as_str()))?;
        if desired_id != id {
            return Err(ReconcileError::InvalidSpec(format!(
                "manifest targets {} but the state is for {}",
                desired_id, id
            )));
        }
        let changes = NodePoolChanges::between(&state.spec, desired, &id)?;

        let mut phase = PhaseTracker::new(&id);
        let result = self.update_locked(&id, state, desired, changes, timeout, &mut phase).await;
        phase.finish(&result);
        result
    }

    async fn update_locked(
        &self,
        id: &NodePoolId,
        state: &NodePoolState,
        desired: &NodePoolSpec,
        changes: NodePoolChanges,
        timeout: Duration,
        phase: &mut PhaseTracker,
    ) -> Result<NodePoolState> {
        let budget = TimeoutBudget::start(self.clock.as_ref(), timeout);
        let _locks = self.lock(id).await;
        phase.enter(MutationPhase::LockAcquired);

        self.waiter.await_cluster(&id.cluster, budget).await?;
        self.waiter.await_node_pool(id, budget).await?;

        tracing::info!("Applying {} change(s) to NodePool {}", changes.len(), id.name);
        for mutation in changes {
            phase.enter(MutationPhase::Mutating);
            let handle = self.issue(&mutation, &budget).await?;

            phase.enter(MutationPhase::PollingOperation);
            match self.await_operation(&handle, id, budget).await? {
                OperationOutcome::Done(_) => {
                    tracing::info!("{} finished for Node Pool {}", mutation.description(), id);
                }
                OperationOutcome::Cancelled(handle) => {
                    tracing::debug!("Persisting {} so this operation can be resumed", handle.name);
                    return Ok(state.clone().with_operation(Some(handle.name)));
                }
            }
        }

        phase.enter(MutationPhase::AwaitingRestingState);
        self.waiter.await_cluster(&id.cluster, budget).await?;
        let rest = self.waiter.await_node_pool(id, budget).await?;
        if rest.is_error() {
            return Err(ReconcileError::Settled {
                name: id.name.clone(),
                action: "updated",
                state: rest.state,
            });
        }

        let node_count = desired.node_count.or(state.spec.node_count);
        self.observe(id, node_count).await
    }

    /// Delete the pool. An absent pool, or an absent parent cluster, is not
    /// an error.
    pub async fn delete(&self, id: &NodePoolId, timeout: Duration) -> Result<Deletion> {
        let mut phase = PhaseTracker::new(id);
        let result = self.delete_locked(id, timeout, &mut phase).await;
        phase.finish(&result);
        result
    }

    async fn delete_locked(&self, id: &NodePoolId, timeout: Duration, phase: &mut PhaseTracker) -> Result<Deletion> {
        let budget = TimeoutBudget::start(self.clock.as_ref(), timeout);
        let _locks = self.lock(id).await;
        phase.enter(MutationPhase::LockAcquired);

        match self.waiter.await_cluster(&id.cluster, budget).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::info!(
                    "GKE cluster {} doesn't exist, skipping node pool {} deletion",
                    id.cluster.cluster,
                    id
                );
                return Ok(Deletion::AlreadyAbsent);
            }
            Err(e) => return Err(e),
        }
        match self.waiter.await_node_pool(id, budget).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::info!("node pool {:?} not found, doesn't need to be cleaned up", id.name);
                return Ok(Deletion::AlreadyAbsent);
            }
            Err(e) => return Err(e),
        }

        phase.enter(MutationPhase::Mutating);
        let mutation = Mutation::DeleteNodePool { target: id.clone() };
        let handle = match self.issue(&mutation, &budget).await {
            Ok(handle) => handle,
            Err(e) if e.is_not_found() => return Ok(Deletion::AlreadyAbsent),
            Err(e) => return Err(e),
        };

        phase.enter(MutationPhase::PollingOperation);
        match self.await_operation(&handle, id, budget).await {
            Ok(OperationOutcome::Done(_)) => {}
            Ok(OperationOutcome::Cancelled(handle)) => return Ok(Deletion::Interrupted(handle)),
            Err(e) if e.is_operation_not_found() => {}
            Err(e) => return Err(e),
        }

        tracing::info!("GKE NodePool {} has been deleted", id);
        Ok(Deletion::Deleted)
    }

    /// Adopt an existing pool given an import ID.
    pub async fn import(
        &self,
        import_id: &str,
        default_project: Option<&str>,
        timeout: Duration,
    ) -> Result<NodePoolState> {
        let id = NodePoolId::parse(import_id, default_project)?;
        let budget = TimeoutBudget::start(self.clock.as_ref(), timeout);

        self.waiter.await_cluster(&id.cluster, budget).await?;
        self.waiter.await_node_pool(&id, budget).await?;

        tracing::info!("Importing NodePool {}", id);
        self.observe(&id, None).await
    }
}
