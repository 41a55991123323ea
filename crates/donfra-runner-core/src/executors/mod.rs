//! Jail executors.
//!
//! Two backends behind one seam: [`direct::DirectExecutor`] stages the
//! source on disk and runs a local child interpreter under a deadline
//! (development), while [`k8s::K8sExecutor`] ships the source to a
//! per-request cluster Job through environment variables and collects the
//! result over pub/sub (production). The dispatcher picks one at
//! construction and routes every request through [`JailExecutor`].

use async_trait::async_trait;

use crate::languages::Language;
use crate::types::{ExecuteRequest, ExecuteResult};

/// A backend that runs one validated request in an isolated jail.
///
/// Implementations own their staging: the direct backend materializes the
/// source as a temp file, the cluster backend passes it through the Job
/// environment. User-program failures, deadline misses, and backend
/// trouble are all statuses in the returned result, never errors.
#[async_trait]
pub trait JailExecutor: Send + Sync {
    async fn execute(
        &self,
        lang: &Language,
        req: &ExecuteRequest,
        timeout_ms: u64,
    ) -> ExecuteResult;
}

pub mod direct;
pub mod k8s;

pub use direct::DirectExecutor;
pub use k8s::K8sExecutor;
