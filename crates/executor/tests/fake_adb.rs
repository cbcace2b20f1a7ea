#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! AdbExecutor against a scripted stand-in for `adb`.

use phone_agent_core::*;
use phone_agent_executor::{AdbExecutor, AdbOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCRIPT: &str = r#"#!/bin/sh
echo "$@" >> "__LOG__"
case "$*" in
  *"exec-out screencap -p"*)
    printf '\211PNG\r\n\032\n\000\000\000\rIHDR\000\000\004\070\000\000\011\140\010\006\000\000\000' ;;
  *"dumpsys window"*)
    echo "  mCurrentFocus=Window{1 u0 com.tencent.mm/.ui.LauncherUI}" ;;
  *"default_input_method"*)
    echo "com.google.android.inputmethod.latin/.LatinIME" ;;
  *"devices"*)
    printf 'List of devices attached\nemulator-5554\tdevice\n' ;;
  *"keyevent 4"*)
    echo "error: device 'emulator-5554' not found" >&2
    exit 1 ;;
esac
"#;

fn fake_adb(dir: &Path) -> (PathBuf, PathBuf) {
    let log = dir.join("adb.log");
    let script = dir.join("adb");
    std::fs::write(&script, SCRIPT.replace("__LOG__", log.to_str().unwrap())).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    (script, log)
}

fn executor(script: &Path) -> AdbExecutor {
    AdbExecutor::new(AdbOptions {
        binary: script.to_str().unwrap().to_string(),
        command_timeout: Duration::from_secs(5),
        settle_delay: Duration::ZERO,
    })
}

#[tokio::test]
async fn test_observe_reads_screen_and_app() {
    let dir = tempfile::tempdir().unwrap();
    let (script, _) = fake_adb(dir.path());

    let observation = executor(&script).observe(Some("emulator-5554")).await.unwrap();
    assert_eq!((observation.width, observation.height), (1080, 2400));
    assert_eq!(observation.current_app, "微信");
    assert!(observation.screenshot.is_some());
}

#[tokio::test]
async fn test_actions_become_adb_commands() {
    let dir = tempfile::tempdir().unwrap();
    let (script, log) = fake_adb(dir.path());
    let executor = executor(&script);
    let observation = executor.observe(Some("emulator-5554")).await.unwrap();

    let tap = Action::new(ActionKind::Tap {
        element: Point(500, 500),
    });
    executor
        .execute(Some("emulator-5554"), &tap, &observation)
        .await
        .unwrap();
    let text = Action::new(ActionKind::Type { text: "hi".into() });
    executor
        .execute(Some("emulator-5554"), &text, &observation)
        .await
        .unwrap();

    let log = std::fs::read_to_string(log).unwrap();
    assert!(log.contains("-s emulator-5554 shell input tap 540 1200"));
    assert!(log.contains("ime set com.android.adbkeyboard/.AdbIME"));
    assert!(log.contains("ADB_INPUT_B64 --es msg aGk="));
    assert!(log.contains("ime set com.google.android.inputmethod.latin/.LatinIME"));
}

#[tokio::test]
async fn test_lost_device_is_unrecoverable() {
    let dir = tempfile::tempdir().unwrap();
    let (script, _) = fake_adb(dir.path());

    let err = executor(&script)
        .execute(None, &Action::new(ActionKind::Back), &Observation::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::DeviceUnavailable(_)));
}

#[tokio::test]
async fn test_devices_listing() {
    let dir = tempfile::tempdir().unwrap();
    let (script, _) = fake_adb(dir.path());

    let devices = executor(&script).devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].serial, "emulator-5554");
    assert_eq!(devices[0].state, "device");
}
