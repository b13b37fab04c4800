//! Live progress: normalisation of provider callbacks and stall detection.

pub mod stall;
pub mod tracker;

pub use stall::StallMonitor;
pub use tracker::{ProgressTracker, ProgressUpdate};
