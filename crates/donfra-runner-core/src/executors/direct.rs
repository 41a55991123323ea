//! Direct-mode executor: a child interpreter process under a deadline.

use std::io::Write;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::JailExecutor;
use crate::languages::Language;
use crate::output::BoundedWriter;
use crate::types::{ExecStatus, ExecuteRequest, ExecuteResult};

/// Exit code left by the kernel OOM killer: 128 + SIGKILL.
const OOM_EXIT_CODE: i32 = 137;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Runs a staged source file with the language interpreter, capturing
/// bounded output and enforcing a wall-clock deadline.
pub struct DirectExecutor {
    max_output_bytes: usize,
}

impl DirectExecutor {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// Executes `code_path` under `lang.interpreter`. The deadline is
    /// enforced by killing the child; captured output is returned in every
    /// outcome except a failed spawn.
    pub async fn execute_file(
        &self,
        lang: &Language,
        code_path: &Path,
        stdin: &str,
        timeout_ms: u64,
    ) -> ExecuteResult {
        let mut cmd = Command::new(&lang.interpreter);
        cmd.arg(code_path)
            .stdin(if stdin.is_empty() {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Request cancellation must not orphan the interpreter.
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                log::error!("failed to spawn {}: {}", lang.interpreter, err);
                return ExecuteResult::error("execution failed");
            }
        };

        if !stdin.is_empty() {
            if let Some(mut pipe) = child.stdin.take() {
                let data = stdin.as_bytes().to_vec();
                tokio::spawn(async move {
                    // Dropping the pipe afterwards delivers EOF.
                    let _ = pipe.write_all(&data).await;
                });
            }
        }

        let stdout_task = capture(child.stdout.take(), self.max_output_bytes);
        let stderr_task = capture(child.stderr.take(), self.max_output_bytes);

        let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms));
        tokio::pin!(deadline);

        let mut timed_out = false;
        let wait_outcome = tokio::select! {
            status = child.wait() => Some(status),
            _ = &mut deadline => {
                timed_out = true;
                None
            }
        };

        if timed_out {
            let _ = child.kill().await;
        }

        // Capture terminates before the result is returned; after a kill the
        // readers see EOF.
        let stdout = finish(stdout_task).await;
        let stderr = finish(stderr_task).await;

        let status = match wait_outcome {
            None => {
                let mut result = ExecuteResult::new(ExecStatus::TimeLimitExceeded);
                result.stdout = stdout;
                result.stderr = stderr;
                return result;
            }
            Some(Err(err)) => {
                log::error!("wait on {} failed: {}", lang.interpreter, err);
                return ExecuteResult::error("execution failed");
            }
            Some(Ok(status)) => status,
        };

        let mut result = match effective_exit_code(status) {
            0 => ExecuteResult::new(ExecStatus::Accepted),
            OOM_EXIT_CODE => ExecuteResult::new(ExecStatus::MemoryLimitExceeded),
            code => ExecuteResult::with_message(
                ExecStatus::RuntimeError,
                format!("Process exited with code {code}"),
            ),
        };
        result.stdout = stdout;
        result.stderr = stderr;
        result
    }
}

#[async_trait]
impl JailExecutor for DirectExecutor {
    /// Stages the source to a temp file with the language extension and
    /// runs it; the file is removed in every exit path.
    async fn execute(
        &self,
        lang: &Language,
        req: &ExecuteRequest,
        timeout_ms: u64,
    ) -> ExecuteResult {
        let source = match stage_source(&req.source_code, &lang.extension) {
            Ok(file) => file,
            Err(err) => {
                log::error!("failed to write temp file: {err}");
                return ExecuteResult::error("internal error: failed to prepare execution");
            }
        };
        self.execute_file(lang, source.path(), &req.stdin, timeout_ms)
            .await
    }
}

fn stage_source(source: &str, extension: &str) -> std::io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("runner-")
        .suffix(extension)
        .tempfile()?;
    file.write_all(source.as_bytes())?;
    file.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644))?;
    }
    Ok(file)
}

/// Drains a child stream into a bounded sink. Reading continues past the
/// ceiling so the child never blocks on a full pipe.
fn capture<R>(reader: Option<R>, limit: usize) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut sink = BoundedWriter::new(limit);
        if let Some(mut reader) = reader {
            let mut chunk = [0u8; READ_CHUNK_BYTES];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let _ = sink.write(&chunk[..n]);
                    }
                }
            }
        }
        sink.into_inner()
    })
}

async fn finish(task: JoinHandle<Vec<u8>>) -> String {
    match task.await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

/// Exit code as the shell would report it: the real code for a normal exit,
/// 128 + signal for a signal death.
fn effective_exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell() -> Language {
        Language {
            id: 90,
            name: "Shell".to_string(),
            interpreter: "/bin/sh".to_string(),
            extension: ".sh".to_string(),
        }
    }

    fn stage(script: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("runner-test-")
            .suffix(".sh")
            .tempfile()
            .unwrap();
        file.write_all(script.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn clean_exit_is_accepted_with_output() {
        let executor = DirectExecutor::new(65_536);
        let script = stage("echo hi\n");
        let result = executor.execute_file(&shell(), script.path(), "", 5_000).await;
        assert_eq!(result.status.id, 3);
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.stderr, "");
    }

    #[tokio::test]
    async fn nonzero_exit_is_runtime_error_with_code() {
        let executor = DirectExecutor::new(65_536);
        let script = stage("echo oops >&2\nexit 7\n");
        let result = executor.execute_file(&shell(), script.path(), "", 5_000).await;
        assert_eq!(result.status.id, 11);
        assert_eq!(result.message, "Process exited with code 7");
        assert_eq!(result.stderr, "oops\n");
    }

    #[tokio::test]
    async fn stdin_is_fed_to_the_child() {
        let executor = DirectExecutor::new(65_536);
        let script = stage("cat\n");
        let result = executor
            .execute_file(&shell(), script.path(), "line one\n", 5_000)
            .await;
        assert_eq!(result.status.id, 3);
        assert_eq!(result.stdout, "line one\n");
    }

    #[tokio::test]
    async fn deadline_kills_the_child() {
        let executor = DirectExecutor::new(65_536);
        let script = stage("echo started\nsleep 30\n");
        let started = std::time::Instant::now();
        let result = executor.execute_file(&shell(), script.path(), "", 300).await;
        assert_eq!(result.status.id, 5);
        assert_eq!(result.status.description, "Time Limit Exceeded");
        assert_eq!(result.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn sigkill_death_maps_to_memory_limit() {
        let executor = DirectExecutor::new(65_536);
        let script = stage("kill -KILL $$\n");
        let result = executor.execute_file(&shell(), script.path(), "", 5_000).await;
        assert_eq!(result.status.id, 7);
    }

    #[tokio::test]
    async fn output_is_truncated_at_the_ceiling() {
        let executor = DirectExecutor::new(16);
        let script = stage("i=0\nwhile [ $i -lt 64 ]; do echo 0123456789; i=$((i+1)); done\n");
        let result = executor.execute_file(&shell(), script.path(), "", 5_000).await;
        assert_eq!(result.status.id, 3);
        assert_eq!(result.stdout.len(), 16);
        assert!("0123456789\n0123456789\n".starts_with(&result.stdout));
    }

    #[tokio::test]
    async fn trait_execute_stages_the_source_itself() {
        let executor = DirectExecutor::new(65_536);
        let req = ExecuteRequest {
            source_code: "echo staged".to_string(),
            language_id: 90,
            stdin: String::new(),
            timeout_ms: 0,
        };
        let result = JailExecutor::execute(&executor, &shell(), &req, 5_000).await;
        assert_eq!(result.status.id, 3);
        assert_eq!(result.stdout, "staged\n");
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let executor = DirectExecutor::new(65_536);
        let script = stage("echo unreachable\n");
        let lang = Language {
            interpreter: "/nonexistent/interpreter".to_string(),
            ..shell()
        };
        let result = executor.execute_file(&lang, script.path(), "", 5_000).await;
        assert_eq!(result.status.id, 11);
        assert_eq!(result.message, "execution failed");
    }
}
