//! Job model, state machine, admission and the worker threads that drive
//! dispatched jobs.

pub mod admission;
pub mod job;
pub mod lifecycle;
pub mod pool;
pub mod run;
pub mod state;

pub use admission::{AdmissionController, AdmissionStats};
pub use job::{restart, ErrorCode, Job, JobId, JobOutput, JobStatus, ModelRef, ModelSelection, Stage};
pub use lifecycle::LifecycleController;
pub use pool::WorkerPool;
pub use run::{ActiveRun, RunContext, RunOutcome, RunSignals};
pub use state::{JobEvent, TransitionError};
