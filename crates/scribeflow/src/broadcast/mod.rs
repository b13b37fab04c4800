//! Broadcasting of job events for real-time streaming.

pub mod job_progress;

pub use job_progress::{JobProgressBroadcaster, JobProgressEvent};
