//! donfra-runner: sandboxed code-execution daemon.
//!
//! Reads its configuration from the environment, wires the admission
//! limiter, registry, and jail executor for the selected mode, and serves
//! the HTTP front until SIGINT/SIGTERM. The cluster and broker clients are
//! only constructed in k8s jail mode; direct mode never attempts either
//! connection.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use donfra_runner_core::config::env_or;
use donfra_runner_core::{
    JailMode, K8sConfig, K8sExecutor, LanguageRegistry, Limiter, Runner, RunnerConfig,
};
use donfra_runner_server::{parse_listen_addr, shutdown_signal, RunnerServer, ServerConfig};

const REDIS_PING_BUDGET: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let addr = env_or("ADDR", ":8090");
    let cfg = RunnerConfig::from_env()?;

    let limiter = Arc::new(Limiter::new(cfg.max_concurrent));
    let registry = LanguageRegistry::builtin();

    let k8s = match cfg.jail_mode {
        JailMode::K8s => Some(Arc::new(init_k8s_executor(&cfg).await?)),
        JailMode::Direct => None,
    };

    let runner = Arc::new(Runner::new(cfg.clone(), registry, limiter, k8s)?);

    let bind_addr = parse_listen_addr(&addr)
        .with_context(|| format!("invalid listen address '{addr}'"))?;
    let server_config = ServerConfig::default().with_bind_addr(bind_addr);

    log::info!(
        "donfra-runner {} listening on {} (jail={}, max_concurrent={}, timeout={}ms)",
        env!("CARGO_PKG_VERSION"),
        bind_addr,
        cfg.jail_mode,
        cfg.max_concurrent,
        cfg.default_timeout_ms
    );

    RunnerServer::with_config(runner, server_config)
        .serve_with_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    log::info!("shutdown complete");
    Ok(())
}

async fn init_k8s_executor(cfg: &RunnerConfig) -> Result<K8sExecutor> {
    let k8s_cfg = K8sConfig::from_env()?;

    let redis_client = redis::Client::open(format!("redis://{}", k8s_cfg.redis_addr))
        .with_context(|| format!("invalid redis address '{}'", k8s_cfg.redis_addr))?;

    // Fail fast on a dead broker rather than on the first execution.
    let mut conn = tokio::time::timeout(
        REDIS_PING_BUDGET,
        redis_client.get_multiplexed_async_connection(),
    )
    .await
    .with_context(|| format!("redis connection timed out ({})", k8s_cfg.redis_addr))?
    .with_context(|| format!("redis connection failed ({})", k8s_cfg.redis_addr))?;
    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .with_context(|| format!("redis ping failed ({})", k8s_cfg.redis_addr))?;
    log::info!("redis connected: {}", k8s_cfg.redis_addr);

    let kube_client = kube::Client::try_default()
        .await
        .context("k8s client init failed")?;
    log::info!(
        "k8s client initialized (namespace: {}, jail image: {})",
        k8s_cfg.namespace,
        k8s_cfg.jail_image
    );

    Ok(K8sExecutor::new(
        kube_client,
        redis_client,
        &k8s_cfg,
        cfg.max_output_bytes,
    ))
}
