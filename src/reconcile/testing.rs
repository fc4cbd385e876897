//! In-memory `ContainerApi` for unit tests.
//!
//! Every scripted response list is consumed front to back; the last entry
//! repeats forever. Unscripted node pools are 404, unscripted clusters are
//! `RUNNING`, and mutations answer with a fresh `RUNNING` operation named
//! `op-{n}` unless a response was queued with [`FakeContainerApi::script_issue`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Barrier;

use crate::gcp::container::{Cluster, ContainerApi, Mutation, NodePool, Operation};
use crate::gcp::http::ApiError;
use crate::nodepool::identity::{ClusterId, NodePoolId};

type Response<T> = Result<T, ApiError>;

struct Script<T> {
    responses: VecDeque<Response<T>>,
}

impl<T: Clone> Script<T> {
    fn new(responses: Vec<Response<T>>) -> Self {
        Self {
            responses: responses.into(),
        }
    }

    fn next(&mut self) -> Option<Response<T>> {
        if self.responses.len() > 1 {
            self.responses.pop_front()
        } else {
            self.responses.front().cloned()
        }
    }
}

#[derive(Default)]
struct FakeState {
    issue_responses: VecDeque<Response<Operation>>,
    issued: Vec<Mutation>,
    operations: HashMap<String, Script<Operation>>,
    node_pools: HashMap<String, Script<NodePool>>,
    cluster: Option<Script<Cluster>>,
    operation_polls: HashMap<String, usize>,
    node_pool_reads: HashMap<String, usize>,
}

#[derive(Default)]
pub struct FakeContainerApi {
    state: Mutex<FakeState>,
    issue_barrier: Option<Arc<Barrier>>,
}

impl FakeContainerApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `issue` wait until `n` issues are in flight at once.
    pub fn with_issue_barrier(n: usize) -> Self {
        Self {
            issue_barrier: Some(Arc::new(Barrier::new(n))),
            ..Self::default()
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn script_issue(&self, responses: Vec<Response<Operation>>) {
        self.state().issue_responses.extend(responses);
    }

    pub fn script_operation(&self, name: &str, responses: Vec<Response<Operation>>) {
        self.state()
            .operations
            .insert(name.to_string(), Script::new(responses));
    }

    pub fn script_node_pool(&self, name: &str, responses: Vec<Response<NodePool>>) {
        self.state()
            .node_pools
            .insert(name.to_string(), Script::new(responses));
    }

    pub fn script_cluster(&self, responses: Vec<Response<Cluster>>) {
        self.state().cluster = Some(Script::new(responses));
    }

    pub fn issued(&self) -> Vec<Mutation> {
        self.state().issued.clone()
    }

    pub fn operation_polls(&self, name: &str) -> usize {
        self.state().operation_polls.get(name).copied().unwrap_or(0)
    }

    pub fn node_pool_reads(&self, name: &str) -> usize {
        self.state().node_pool_reads.get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ContainerApi for FakeContainerApi {
    async fn issue(&self, mutation: &Mutation) -> Result<Operation, ApiError> {
        let response = {
            let mut state = self.state();
            state.issued.push(mutation.clone());
            let n = state.issued.len();
            state
                .issue_responses
                .pop_front()
                .unwrap_or_else(|| Ok(operation(&format!("op-{}", n), "RUNNING")))
        };
        if let Some(barrier) = &self.issue_barrier {
            barrier.wait().await;
        }
        response
    }

    async fn get_operation(
        &self,
        _project: &str,
        _location: &str,
        name: &str,
    ) -> Result<Operation, ApiError> {
        let mut state = self.state();
        *state.operation_polls.entry(name.to_string()).or_default() += 1;
        state
            .operations
            .get_mut(name)
            .and_then(Script::next)
            .unwrap_or_else(|| Err(ApiError::new(404, format!("operation {} not found", name))))
    }

    async fn get_node_pool(&self, id: &NodePoolId) -> Result<NodePool, ApiError> {
        let mut state = self.state();
        *state.node_pool_reads.entry(id.name.clone()).or_default() += 1;
        state
            .node_pools
            .get_mut(&id.name)
            .and_then(Script::next)
            .unwrap_or_else(|| Err(not_found()))
    }

    async fn get_cluster(&self, id: &ClusterId) -> Result<Cluster, ApiError> {
        let mut state = self.state();
        match state.cluster.as_mut().and_then(Script::next) {
            Some(response) => response,
            None => Ok(Cluster {
                name: id.cluster.clone(),
                status: Some("RUNNING".to_string()),
                status_message: None,
            }),
        }
    }
}

pub fn not_found() -> ApiError {
    ApiError::new(404, "Not found").with_api_status("NOT_FOUND")
}

pub fn operation(name: &str, status: &str) -> Operation {
    Operation {
        name: name.to_string(),
        status: Some(status.to_string()),
        ..Default::default()
    }
}

pub fn node_pool(name: &str, status: &str) -> NodePool {
    NodePool {
        name: name.to_string(),
        initial_node_count: Some(3),
        status: Some(status.to_string()),
        ..Default::default()
    }
}

pub fn cluster(status: &str) -> Cluster {
    Cluster {
        name: "c".to_string(),
        status: Some(status.to_string()),
        status_message: None,
    }
}

pub fn cluster_id() -> ClusterId {
    ClusterId {
        project: "my-project".to_string(),
        location: "us-central1".to_string(),
        cluster: "c".to_string(),
    }
}

pub fn pool_id(name: &str) -> NodePoolId {
    NodePoolId {
        cluster: cluster_id(),
        name: name.to_string(),
    }
}
