//! Bosun Engine
//!
//! Drives a validated workflow against a cluster: stages run strictly in
//! order, the steps inside a stage run in parallel, and every step is
//! watched by its own poller until it reaches a terminal outcome. Cleanup
//! is label-driven and runs on every failure path.
//!
//! Architecture:
//! - Executor: stage loop, per-stage barrier, abort-and-sweep on failure
//! - StepPoller: per-step state machine over watch events and status polls
//! - Sweeper: reverse-creation-order deletion by workflow selector
//! - LogSink: per-step capture of failing pods' log tails

mod error;
mod executor;
mod logs;
mod poller;
mod sweeper;

pub use error::{EngineError, StageFailure};
pub use executor::Executor;
pub use logs::{LogSink, StepLogBook, MAX_CAPTURE_BYTES};
pub use poller::StepPoller;
pub use sweeper::Sweeper;
