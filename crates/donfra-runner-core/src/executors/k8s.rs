//! Cluster-mode executor: one Kubernetes Job per execution, result
//! delivery over Redis pub/sub.
//!
//! The subscription to the result channel is confirmed before the Job is
//! created. The jail can finish and publish within milliseconds of pod
//! start; subscribing afterwards would race the publish and silently lose
//! the result. An execution is never retried: user code is not idempotent,
//! and a retried submission could run it twice.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, Pod, PodSpec, PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use serde::Deserialize;
use uuid::Uuid;

use super::JailExecutor;
use crate::config::K8sConfig;
use crate::languages::Language;
use crate::types::{ExecStatus, ExecuteRequest, ExecuteResult, ExecuteStatus, RESULT_TOKEN};

/// Added to the wait-budget for Job scheduling and pod startup.
const SCHEDULING_BUFFER: Duration = Duration::from_secs(8);
/// Added to the Job's own active deadline, in whole seconds.
const STARTUP_BUFFER_SECS: i64 = 5;
/// Safety net: finished Jobs self-destruct after this many seconds.
const JOB_TTL_SECS: i32 = 60;
/// Budget for the post-hoc pod inspection after a deadline miss.
const POD_INSPECT_BUDGET: Duration = Duration::from_secs(3);
/// Budget for the background Job deletion.
const CLEANUP_BUDGET: Duration = Duration::from_secs(5);

const APP_LABEL: &str = "donfra-jail";
const CONTAINER_NAME: &str = "codejail";

/// Result message published by the jail entrypoint on `exec:<id>`.
#[derive(Debug, Deserialize)]
struct JailResult {
    #[serde(default)]
    execution_id: String,
    status_id: i32,
    #[serde(default)]
    status_desc: String,
    #[serde(default)]
    stdout_b64: String,
    #[serde(default)]
    stderr_b64: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    execution_time_ms: i64,
}

/// Everything the jail container needs beyond the request itself.
struct JailSettings {
    image: String,
    redis_host: String,
    redis_port: String,
    max_output_bytes: usize,
}

pub struct K8sExecutor {
    jobs: Api<Job>,
    pods: Api<Pod>,
    redis: redis::Client,
    jail: JailSettings,
}

impl K8sExecutor {
    pub fn new(
        kube_client: kube::Client,
        redis: redis::Client,
        cfg: &K8sConfig,
        max_output_bytes: usize,
    ) -> Self {
        let (redis_host, redis_port) = cfg.redis_host_port();
        Self {
            jobs: Api::namespaced(kube_client.clone(), &cfg.namespace),
            pods: Api::namespaced(kube_client, &cfg.namespace),
            redis,
            jail: JailSettings {
                image: cfg.jail_image.clone(),
                redis_host,
                redis_port,
                max_output_bytes,
            },
        }
    }
}

#[async_trait]
impl JailExecutor for K8sExecutor {
    /// Runs one request in a fresh Job and waits for its published result,
    /// racing the wait-budget. Dropping the returned future aborts the
    /// in-flight cluster call and closes the subscription; the Job TTL
    /// covers anything already submitted.
    async fn execute(
        &self,
        lang: &Language,
        req: &ExecuteRequest,
        timeout_ms: u64,
    ) -> ExecuteResult {
        let exec_id = Uuid::new_v4().to_string();
        let channel = format!("exec:{exec_id}");
        let job_name = format!("exec-{}", &exec_id[..8]);

        // Subscribe first, create second. subscribe() resolving is the
        // broker's confirmation; only then may the Job exist.
        let mut pubsub = match self.redis.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                log::error!("redis pubsub connect failed: {err}");
                return ExecuteResult::error("result channel unavailable");
            }
        };
        if let Err(err) = pubsub.subscribe(&channel).await {
            log::error!("redis subscribe failed: {err}");
            return ExecuteResult::error("result channel unavailable");
        }

        let job = build_job_spec(&self.jail, &job_name, &exec_id, lang, req, timeout_ms);
        if let Err(err) = self.jobs.create(&PostParams::default(), &job).await {
            log::error!("k8s job create failed: {err}");
            return ExecuteResult::error("execution backend unavailable");
        }

        let mut messages = pubsub.on_message();
        tokio::select! {
            msg = messages.next() => {
                match msg {
                    Some(msg) => match msg.get_payload::<String>() {
                        Ok(payload) => decode_result(&payload),
                        Err(err) => {
                            log::error!("non-text result payload on {channel}: {err}");
                            ExecuteResult::error("failed to parse execution result")
                        }
                    },
                    None => {
                        log::error!("result channel {channel} closed before delivery");
                        ExecuteResult::error("result channel unavailable")
                    }
                }
            }
            _ = tokio::time::sleep(wait_budget(timeout_ms)) => {
                let result = self.classify_deadline_miss(&exec_id).await;
                self.schedule_job_cleanup(job_name);
                result
            }
        }
        // pubsub drops here in every path, closing the subscription.
    }
}

impl K8sExecutor {
    /// Post-hoc tie-breaker after a wait-budget miss: a jail killed by the
    /// OOM killer usually cannot publish, so look at the pod's terminated
    /// state before settling on a timeout.
    async fn classify_deadline_miss(&self, exec_id: &str) -> ExecuteResult {
        let selector = format!("exec-id={}", &exec_id[..8]);
        let params = ListParams::default().labels(&selector);
        match tokio::time::timeout(POD_INSPECT_BUDGET, self.pods.list(&params)).await {
            Ok(Ok(pods)) => {
                if pods.items.iter().any(pod_was_oom_killed) {
                    return ExecuteResult::with_message(
                        ExecStatus::MemoryLimitExceeded,
                        "process was killed due to memory limit",
                    );
                }
            }
            Ok(Err(err)) => log::warn!("pod inspection for {exec_id} failed: {err}"),
            Err(_) => log::warn!("pod inspection for {exec_id} timed out"),
        }
        ExecuteResult::with_message(ExecStatus::TimeLimitExceeded, "execution timed out")
    }

    /// Best-effort background deletion; never blocks the dispatcher and
    /// never surfaces an error.
    fn schedule_job_cleanup(&self, job_name: String) {
        let jobs = self.jobs.clone();
        tokio::spawn(async move {
            let params = DeleteParams::background();
            match tokio::time::timeout(CLEANUP_BUDGET, jobs.delete(&job_name, &params)).await {
                Ok(Ok(_)) => log::info!("deleted job {job_name}"),
                Ok(Err(err)) => log::warn!("failed to delete job {job_name}: {err}"),
                Err(_) => log::warn!("deleting job {job_name} timed out"),
            }
        });
    }
}

fn pod_was_oom_killed(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .map(|statuses| {
            statuses.iter().any(|cs| {
                cs.state
                    .as_ref()
                    .and_then(|state| state.terminated.as_ref())
                    .and_then(|terminated| terminated.reason.as_deref())
                    == Some("OOMKilled")
            })
        })
        .unwrap_or(false)
}

/// Total time to wait for a published result: the program's own timeout
/// plus the scheduling-and-startup buffer.
fn wait_budget(timeout_ms: u64) -> Duration {
    Duration::from_millis(timeout_ms) + SCHEDULING_BUFFER
}

fn decode_result(payload: &str) -> ExecuteResult {
    let parsed: JailResult = match serde_json::from_str(payload) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::error!("failed to parse jail result: {err}");
            return ExecuteResult::error("failed to parse execution result");
        }
    };
    log::debug!(
        "jail result exec_id={} exit_code={}",
        parsed.execution_id,
        parsed.exit_code
    );

    let Some(status) = ExecStatus::from_id(parsed.status_id) else {
        log::error!("jail result carries unknown status_id {}", parsed.status_id);
        return ExecuteResult::error("failed to parse execution result");
    };

    let (stdout, stderr) = match (
        BASE64.decode(&parsed.stdout_b64),
        BASE64.decode(&parsed.stderr_b64),
    ) {
        (Ok(stdout), Ok(stderr)) => (stdout, stderr),
        _ => {
            log::error!("jail result carries undecodable output payloads");
            return ExecuteResult::error("failed to parse execution result");
        }
    };

    let description = if parsed.status_desc.is_empty() {
        status.description().to_string()
    } else {
        parsed.status_desc
    };

    ExecuteResult {
        token: RESULT_TOKEN.to_string(),
        status: ExecuteStatus {
            id: status.id(),
            description,
        },
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        message: parsed.message,
        // Jail-side measurement; the dispatcher overwrites this with its
        // own wall-clock stamp before the result goes out.
        execution_time_ms: parsed.execution_time_ms,
    }
}

fn build_job_spec(
    jail: &JailSettings,
    job_name: &str,
    exec_id: &str,
    lang: &Language,
    req: &ExecuteRequest,
    timeout_ms: u64,
) -> Job {
    let deadline_secs = (timeout_ms as i64 + 999) / 1000 + STARTUP_BUFFER_SECS;

    let labels: BTreeMap<String, String> = BTreeMap::from([
        ("app".to_string(), APP_LABEL.to_string()),
        ("exec-id".to_string(), exec_id[..8].to_string()),
    ]);

    let stdin_b64 = if req.stdin.is_empty() {
        String::new()
    } else {
        BASE64.encode(req.stdin.as_bytes())
    };

    let env = vec![
        env_var("EXEC_ID", exec_id.to_string()),
        env_var("SOURCE_CODE", BASE64.encode(req.source_code.as_bytes())),
        env_var("LANGUAGE_ID", lang.id.to_string()),
        env_var("STDIN_DATA", stdin_b64),
        env_var("REDIS_HOST", jail.redis_host.clone()),
        env_var("REDIS_PORT", jail.redis_port.clone()),
        env_var("TIMEOUT_MS", timeout_ms.to_string()),
        env_var("MAX_OUTPUT_BYTES", jail.max_output_bytes.to_string()),
    ];

    // Node's heap wants more headroom than the interpreter languages.
    let memory_limit = if lang.id == 63 { "256Mi" } else { "128Mi" };

    Job {
        metadata: ObjectMeta {
            name: Some(job_name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            active_deadline_seconds: Some(deadline_secs),
            ttl_seconds_after_finished: Some(JOB_TTL_SECS),
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(jail.image.clone()),
                        env: Some(env),
                        resources: Some(ResourceRequirements {
                            requests: Some(quantities(&[("cpu", "100m"), ("memory", "64Mi")])),
                            limits: Some(quantities(&[("cpu", "500m"), ("memory", memory_limit)])),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn env_var(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        value_from: None,
    }
}

fn quantities(entries: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect()
}
