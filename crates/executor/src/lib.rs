//! ADB-driven device executor.

pub mod apps;
pub mod command_executor;
pub mod screen;

pub use command_executor::AdbCommand;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use phone_agent_core::{
    Action, ActionKind, ActionOutcome, DeviceExecutor, ExecutorError, Observation, Point,
};
use screen::{Screenshot, FALLBACK_HEIGHT, FALLBACK_WIDTH};
use std::time::Duration;

const ADB_KEYBOARD_IME: &str = "com.android.adbkeyboard/.AdbIME";

#[derive(Debug, Clone)]
pub struct AdbOptions {
    pub binary: String,
    /// Upper bound for a single adb invocation.
    pub command_timeout: Duration,
    /// Pause after each action so the UI can settle before the next one.
    pub settle_delay: Duration,
}

impl Default for AdbOptions {
    fn default() -> Self {
        Self {
            binary: "adb".to_string(),
            command_timeout: Duration::from_secs(20),
            settle_delay: Duration::from_millis(1000),
        }
    }
}

/// Device state as reported by `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub serial: String,
    pub state: String,
}

pub struct AdbExecutor {
    adb: AdbCommand,
    settle_delay: Duration,
}

impl AdbExecutor {
    pub fn new(options: AdbOptions) -> Self {
        Self {
            adb: AdbCommand::new(options.binary, options.command_timeout),
            settle_delay: options.settle_delay,
        }
    }

    /// Attached devices.
    pub async fn devices(&self) -> Result<Vec<DeviceEntry>, ExecutorError> {
        let output = self.adb.run_text(None, &["devices"]).await?;
        Ok(parse_devices(&output))
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
    }

    async fn tap(&self, device_id: Option<&str>, (x, y): (u32, u32)) -> Result<(), ExecutorError> {
        self.adb
            .shell(device_id, &["input", "tap", &x.to_string(), &y.to_string()])
            .await?;
        Ok(())
    }

    async fn swipe(
        &self,
        device_id: Option<&str>,
        (x1, y1): (u32, u32),
        (x2, y2): (u32, u32),
        duration_ms: u64,
    ) -> Result<(), ExecutorError> {
        self.adb
            .shell(
                device_id,
                &[
                    "input",
                    "swipe",
                    &x1.to_string(),
                    &y1.to_string(),
                    &x2.to_string(),
                    &y2.to_string(),
                    &duration_ms.to_string(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn keyevent(&self, device_id: Option<&str>, key: &str) -> Result<(), ExecutorError> {
        self.adb.shell(device_id, &["input", "keyevent", key]).await?;
        Ok(())
    }

    async fn launch(&self, device_id: Option<&str>, app: &str) -> Result<(), ExecutorError> {
        let package = apps::package_for(app)
            .ok_or_else(|| ExecutorError::ActionFailed(format!("App not found: {}", app)))?;
        self.adb
            .shell(
                device_id,
                &[
                    "monkey",
                    "-p",
                    package,
                    "-c",
                    "android.intent.category.LAUNCHER",
                    "1",
                ],
            )
            .await?;
        Ok(())
    }

    /// Type through the ADB keyboard, restoring the previous IME afterwards.
    async fn type_text(&self, device_id: Option<&str>, text: &str) -> Result<(), ExecutorError> {
        let original_ime = self
            .adb
            .shell(device_id, &["settings", "get", "secure", "default_input_method"])
            .await?
            .trim()
            .to_string();
        let switched = !original_ime.contains("com.android.adbkeyboard");
        if switched {
            self.adb
                .shell(device_id, &["ime", "set", ADB_KEYBOARD_IME])
                .await?;
            self.settle().await;
        }

        let result = async {
            self.adb
                .shell(device_id, &["am", "broadcast", "-a", "ADB_CLEAR_TEXT"])
                .await?;
            let encoded = STANDARD.encode(text.as_bytes());
            self.adb
                .shell(
                    device_id,
                    &["am", "broadcast", "-a", "ADB_INPUT_B64", "--es", "msg", &encoded],
                )
                .await?;
            Ok::<(), ExecutorError>(())
        }
        .await;

        if switched && !original_ime.is_empty() && original_ime != "null" {
            if let Err(e) = self
                .adb
                .shell(device_id, &["ime", "set", &original_ime])
                .await
            {
                tracing::warn!("Failed to restore input method {}: {}", original_ime, e);
            }
        }
        result
    }
}

impl Default for AdbExecutor {
    fn default() -> Self {
        Self::new(AdbOptions::default())
    }
}

pub fn parse_devices(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some(DeviceEntry {
                serial: parts.next()?.to_string(),
                state: parts.next()?.to_string(),
            })
        })
        .collect()
}

/// Longer swipes get more time, within 1-2 seconds.
pub fn swipe_duration_ms(start: (u32, u32), end: (u32, u32)) -> u64 {
    let dx = i64::from(start.0) - i64::from(end.0);
    let dy = i64::from(start.1) - i64::from(end.1);
    ((dx * dx + dy * dy) / 1000).clamp(1000, 2000) as u64
}

#[async_trait]
impl DeviceExecutor for AdbExecutor {
    async fn observe(&self, device_id: Option<&str>) -> Result<Observation, ExecutorError> {
        let png = self.adb.run(device_id, &["exec-out", "screencap", "-p"]).await;
        let screenshot = match png {
            Ok(bytes) => Screenshot::from_png(&bytes),
            Err(ExecutorError::ActionFailed(e)) => {
                tracing::warn!("Screenshot failed, treating screen as sensitive: {}", e);
                None
            }
            Err(e) => return Err(e),
        };

        let dumpsys = self.adb.shell(device_id, &["dumpsys", "window"]).await?;
        let current_app = apps::current_app(&dumpsys);

        let (width, height) = screenshot
            .as_ref()
            .map(|s| (s.width, s.height))
            .unwrap_or((FALLBACK_WIDTH, FALLBACK_HEIGHT));
        Ok(Observation {
            screenshot: screenshot.map(|s| s.base64),
            width,
            height,
            current_app,
        })
    }

    async fn execute(
        &self,
        device_id: Option<&str>,
        action: &Action,
        observation: &Observation,
    ) -> Result<ActionOutcome, ExecutorError> {
        let abs = |p: &Point| p.to_absolute(observation.width, observation.height);

        match &action.kind {
            ActionKind::Launch { app } => self.launch(device_id, app).await?,
            ActionKind::Tap { element } => self.tap(device_id, abs(element)).await?,
            ActionKind::Type { text } => self.type_text(device_id, text).await?,
            ActionKind::Swipe { start, end } => {
                let (start, end) = (abs(start), abs(end));
                self.swipe(device_id, start, end, swipe_duration_ms(start, end))
                    .await?
            }
            ActionKind::Back => self.keyevent(device_id, "4").await?,
            ActionKind::Home => self.keyevent(device_id, "KEYCODE_HOME").await?,
            ActionKind::DoubleTap { element } => {
                let point = abs(element);
                self.tap(device_id, point).await?;
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.tap(device_id, point).await?;
            }
            ActionKind::LongPress { element } => {
                let point = abs(element);
                self.swipe(device_id, point, point, 3000).await?
            }
            ActionKind::Wait { seconds } => {
                let wait = Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                return Ok(ActionOutcome::default());
            }
            ActionKind::TakeOver { message } => {
                return Err(ExecutorError::TakeoverRequired(message.clone()));
            }
            ActionKind::Note { .. } | ActionKind::CallApi { .. } => {
                return Ok(ActionOutcome::default());
            }
            ActionKind::Interact { .. } => {
                return Ok(ActionOutcome {
                    message: Some("User interaction required".into()),
                });
            }
        }

        self.settle().await;
        Ok(ActionOutcome::default())
    }
}
