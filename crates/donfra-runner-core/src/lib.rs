//! Core of the donfra code-execution service.
//!
//! This crate implements the execution dispatcher for untrusted,
//! learner-submitted code: admission control over a fixed pool of slots,
//! a static language registry, bounded output capture, and two jail
//! backends behind one dispatcher. Direct mode runs a local interpreter
//! child under a deadline for development; k8s mode provisions one
//! isolated cluster Job per request and collects the result over Redis
//! pub/sub, racing a wait-budget and classifying deadline misses by
//! inspecting the pod's terminated state.
//!
//! Nothing above the dispatcher observes internal failures: every
//! execution produces an [`types::ExecuteResult`] carrying one of the four
//! wire-stable status codes.

pub mod config;
pub mod errors;
pub mod executors;
pub mod languages;
pub mod limiter;
pub mod output;
pub mod runner;
pub mod types;

pub use config::{JailMode, K8sConfig, RunnerConfig};
pub use errors::RunnerError;
pub use executors::{DirectExecutor, JailExecutor, K8sExecutor};
pub use languages::{Language, LanguageRegistry};
pub use limiter::{Limiter, SlotGuard};
pub use output::BoundedWriter;
pub use runner::Runner;
pub use types::{ExecStatus, ExecuteRequest, ExecuteResult, ExecuteStatus, RESULT_TOKEN};
