//! The reconciliation core
//!
//! # Module Structure
//!
//! - [`status`] - raw status keyword to [`status::Classification`]
//! - [`mutex`] - keyed shared/exclusive locks
//! - [`clock`] - injected time, the timeout budget and the backoff schedule
//! - [`operation`] - long-running operation polling
//! - [`resting`] - resting-state waits on the resource itself
//! - [`orchestrator`] - lock, mutate, poll, settle
//! - [`error`] - the error taxonomy shared by all of the above

pub mod clock;
pub mod error;
pub mod mutex;
pub mod operation;
pub mod orchestrator;
pub mod resting;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Backoff, Clock, SystemClock, TimeoutBudget};
pub use error::{ReconcileError, Result};
pub use mutex::MutexStore;
pub use operation::{OperationHandle, OperationOutcome, OperationPoller};
pub use orchestrator::{Deletion, MutationPhase, NodePoolReconciler};
pub use resting::{RestingStateResult, RestingStateWaiter};
pub use status::Classification;
