use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ExecutorError;

/// Output of one child-process invocation: exit code plus combined stdout+stderr.
pub struct RunOutput {
    pub exit_code: i32,
    pub log: String,
}

impl RunOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Invoke `binary` with `args` in `workspace`, capturing combined stdout+stderr and
/// enforcing `timeout`. Stdout and stderr are drained concurrently into a shared log
/// buffer, each line mirrored to `tracing::debug!` under `target`.
///
/// Shared by the IaC tool (`init`/`plan`/`show`/`apply`) and the policy engine
/// (`evaluate`) — both are argv-driven external binaries invoked the same way.
pub async fn run(
    binary: &str,
    args: &[&str],
    workspace: &Path,
    timeout: Duration,
    target: &'static str,
) -> Result<RunOutput, ExecutorError> {
    info!(binary, ?args, workspace = %workspace.display(), "invoking external binary");

    let mut cmd = Command::new(binary);
    cmd.args(args)
        .current_dir(workspace)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .env("TF_IN_AUTOMATION", "1")
        .env("TF_INPUT", "0");

    let mut child = cmd.spawn().map_err(|e| ExecutorError::Spawn {
        binary: binary.to_string(),
        source: e,
    })?;

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let mut log = String::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    let tx1 = tx.clone();
    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = tx1.send(line);
        }
    });

    let tx2 = tx.clone();
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = tx2.send(line);
        }
    });

    drop(tx);

    let collect = async {
        while let Some(line) = rx.recv().await {
            debug!(target: "tfleet::process", binary, "{}", line);
            log.push_str(&line);
            log.push('\n');
        }
    };
    let timed_out = tokio::time::timeout(timeout, collect).await.is_err();

    stdout_task.await.ok();
    stderr_task.await.ok();

    if timed_out {
        let _ = child.kill().await;
        return Err(ExecutorError::Timeout {
            binary: binary.to_string(),
            subcommand: args.first().copied().unwrap_or("").to_string(),
            secs: timeout.as_secs(),
        });
    }

    let status = child.wait().await.map_err(|e| ExecutorError::Spawn {
        binary: binary.to_string(),
        source: e,
    })?;

    let exit_code = status.code().unwrap_or(-1);
    if exit_code != 0 {
        warn!(binary, exit_code, "external binary exited non-zero");
    }
    let _ = target;
    Ok(RunOutput { exit_code, log })
}
