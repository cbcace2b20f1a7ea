//! `adb` invocation.

use phone_agent_core::ExecutorError;
use std::time::Duration;

/// Runs `adb [-s <device>] <args..>` with a timeout.
#[derive(Debug, Clone)]
pub struct AdbCommand {
    binary: String,
    timeout: Duration,
}

impl AdbCommand {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Run and return stdout. The child is killed if the call is dropped.
    pub async fn run(&self, device_id: Option<&str>, args: &[&str]) -> Result<Vec<u8>, ExecutorError> {
        let mut command = tokio::process::Command::new(&self.binary);
        if let Some(device_id) = device_id {
            command.args(["-s", device_id]);
        }
        command.args(args).kill_on_drop(true);

        tracing::debug!("Executing: {} {:?} (device {:?})", self.binary, args, device_id);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                ExecutorError::Command(format!(
                    "adb {} timed out after {:?}",
                    args.join(" "),
                    self.timeout
                ))
            })?
            .map_err(|e| ExecutorError::Command(format!("failed to run {}: {}", self.binary, e)))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(classify_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    pub async fn run_text(&self, device_id: Option<&str>, args: &[&str]) -> Result<String, ExecutorError> {
        let stdout = self.run(device_id, args).await?;
        Ok(String::from_utf8_lossy(&stdout).to_string())
    }

    pub async fn shell(&self, device_id: Option<&str>, args: &[&str]) -> Result<String, ExecutorError> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("shell");
        full.extend_from_slice(args);
        self.run_text(device_id, &full).await
    }
}

/// Lost devices end the session; anything else is a failed action.
pub fn classify_failure(stderr: &str) -> ExecutorError {
    let message = stderr.trim().to_string();
    let lower = message.to_lowercase();
    let unreachable = lower.contains("no devices")
        || (lower.contains("device")
            && (lower.contains("not found") || lower.contains("offline") || lower.contains("unauthorized")));
    if unreachable {
        ExecutorError::DeviceUnavailable(message)
    } else {
        ExecutorError::ActionFailed(message)
    }
}
