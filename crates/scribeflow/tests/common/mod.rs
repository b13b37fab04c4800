//! Shared test utilities for scribeflow integration tests.
//!
//! This module provides:
//! - `ScriptedProvider`, a transcriber/diarizer whose calls block until the
//!   test tells them how to finish
//! - `TestEngine`, an engine over an in-memory store with polling helpers

pub mod harness;
pub mod providers;

pub use harness::TestEngine;
pub use providers::{MemoryResolver, MemorySink, ScriptedProvider, Step};
