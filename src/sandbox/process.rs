use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// How long to wait for the output readers once the child has been killed.
const READER_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct ChildOutput {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

#[derive(Debug)]
pub enum ChildError {
    Spawn(std::io::Error),
    Wait(std::io::Error),
    Cancelled,
}

impl ChildError {
    /// Whether the child was running when the error happened, so whatever it
    /// started (a container, say) may still be alive.
    pub fn child_started(&self) -> bool {
        !matches!(self, ChildError::Spawn(_))
    }
}

enum WaitOutcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run `command` to completion, racing it against `timeout` and `cancel`.
///
/// On expiry or cancellation the child is killed and reaped before returning.
pub async fn run_with_deadline(
    command: &mut Command,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ChildOutput, ChildError> {
    if cancel.is_cancelled() {
        return Err(ChildError::Cancelled);
    }

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ChildError::Spawn)?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_handle = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = stdout {
            let _ = reader.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_handle = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = stderr {
            let _ = reader.read_to_end(&mut buf).await;
        }
        buf
    });

    let outcome = tokio::select! {
        status = child.wait() => WaitOutcome::Exited(status),
        _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
        _ = cancel.cancelled() => WaitOutcome::Cancelled,
    };

    let (status, timed_out, cancelled) = match outcome {
        WaitOutcome::Exited(Ok(status)) => (Some(status), false, false),
        WaitOutcome::Exited(Err(err)) => return Err(ChildError::Wait(err)),
        WaitOutcome::TimedOut => (kill_and_reap(&mut child).await, true, false),
        WaitOutcome::Cancelled => (kill_and_reap(&mut child).await, false, true),
    };

    let stdout_bytes = tokio::time::timeout(READER_GRACE, stdout_handle)
        .await
        .ok()
        .and_then(|joined| joined.ok())
        .unwrap_or_default();
    let stderr_bytes = tokio::time::timeout(READER_GRACE, stderr_handle)
        .await
        .ok()
        .and_then(|joined| joined.ok())
        .unwrap_or_default();

    if cancelled {
        return Err(ChildError::Cancelled);
    }

    Ok(ChildOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        timed_out,
    })
}

async fn kill_and_reap(child: &mut tokio::process::Child) -> Option<ExitStatus> {
    let _ = child.start_kill();
    match tokio::time::timeout(READER_GRACE, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        _ => None,
    }
}
