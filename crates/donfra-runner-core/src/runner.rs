//! The execution dispatcher: validation, admission, routing, timing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{JailMode, RunnerConfig};
use crate::errors::RunnerError;
use crate::executors::{DirectExecutor, JailExecutor, K8sExecutor};
use crate::languages::LanguageRegistry;
use crate::limiter::Limiter;
use crate::types::{ExecStatus, ExecuteRequest, ExecuteResult, ExecuteStatus, RESULT_TOKEN};

/// Ceiling on the wait for an admission slot.
const ACQUIRE_WAIT: Duration = Duration::from_secs(5);

pub struct Runner {
    cfg: RunnerConfig,
    registry: LanguageRegistry,
    limiter: Arc<Limiter>,
    jail: Arc<dyn JailExecutor>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("cfg", &self.cfg)
            .field("registry", &self.registry)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Wires the dispatcher, picking the jail backend for the configured
    /// mode. In k8s jail mode the cluster executor is mandatory; checking
    /// here keeps the per-request path branch-free.
    pub fn new(
        cfg: RunnerConfig,
        registry: LanguageRegistry,
        limiter: Arc<Limiter>,
        k8s: Option<Arc<K8sExecutor>>,
    ) -> Result<Self, RunnerError> {
        let jail: Arc<dyn JailExecutor> = match (cfg.jail_mode, k8s) {
            (JailMode::K8s, Some(k8s)) => k8s,
            (JailMode::K8s, None) => {
                return Err(RunnerError::config(
                    "k8s jail mode requires a cluster executor",
                ));
            }
            (JailMode::Direct, _) => Arc::new(DirectExecutor::new(cfg.max_output_bytes)),
        };
        Ok(Self {
            cfg,
            registry,
            limiter,
            jail,
        })
    }

    pub fn languages(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    /// Runs one request end to end. Always returns a result; user-program
    /// failures, admission timeouts, and backend trouble are all statuses,
    /// never errors.
    pub async fn execute(&self, req: ExecuteRequest) -> ExecuteResult {
        if req.source_code.is_empty() {
            return ExecuteResult::error("source_code is required");
        }

        let lang = match self.registry.lookup(req.language_id) {
            Ok(lang) => lang,
            Err(err) => return ExecuteResult::error(err.to_string()),
        };

        let timeout_ms = resolve_timeout(
            req.timeout_ms,
            self.cfg.default_timeout_ms,
            self.cfg.max_timeout_ms,
        );

        let _slot = match self.limiter.acquire(ACQUIRE_WAIT).await {
            Ok(slot) => slot,
            Err(_) => return queue_full(),
        };

        // The reported wall time covers the execution step only, never the
        // queue wait above.
        let start = Instant::now();
        let mut result = self.jail.execute(&lang, &req, timeout_ms).await;
        result.execution_time_ms = start.elapsed().as_millis() as i64;
        result
        // _slot drops after the stamp: the slot models compute occupancy.
    }
}

/// Requested timeout if positive, else the default, capped at the maximum.
pub(crate) fn resolve_timeout(requested_ms: i64, default_ms: u64, max_ms: u64) -> u64 {
    let chosen = if requested_ms > 0 {
        requested_ms as u64
    } else {
        default_ms
    };
    chosen.min(max_ms)
}

fn queue_full() -> ExecuteResult {
    ExecuteResult {
        token: RESULT_TOKEN.to_string(),
        status: ExecuteStatus {
            id: ExecStatus::RuntimeError.id(),
            description: "Queue Full".to_string(),
        },
        stdout: String::new(),
        stderr: String::new(),
        message: "too many concurrent executions, try again later".to_string(),
        execution_time_ms: 0,
    }
}
