use anyhow::Result;
use phone_agent_executor::{AdbExecutor, DeviceEntry};

use crate::config::ServerConfig;

pub async fn run(config: &ServerConfig) -> Result<()> {
    println!("📱 Phone agent check\n");
    let mut healthy = true;

    print!("🔌 adb device... ");
    let executor = AdbExecutor::new(config.adb_options());
    match executor.devices().await {
        Ok(devices) => match device_status(&devices, config.device_id.as_deref()) {
            Ok(serial) => println!("✓ ({})", serial),
            Err(e) => {
                println!("✗ ({})", e);
                healthy = false;
            }
        },
        Err(e) => {
            println!("✗ ({})", e);
            healthy = false;
        }
    }

    print!("🌐 Planner endpoint {}... ", config.base_url);
    let planner = config.planner();
    match planner.probe().await {
        Ok(()) => println!("✓"),
        Err(e) => {
            println!("✗ ({})", e);
            healthy = false;
        }
    }

    println!();
    if healthy {
        println!("✅ All checks passed");
        Ok(())
    } else {
        anyhow::bail!("Check failed");
    }
}

/// The serial that sessions will drive, or why there is none.
pub fn device_status(devices: &[DeviceEntry], wanted: Option<&str>) -> Result<String, String> {
    match wanted {
        Some(serial) => match devices.iter().find(|d| d.serial == serial) {
            Some(d) if d.state == "device" => Ok(d.serial.clone()),
            Some(d) => Err(format!("{} is {}", d.serial, d.state)),
            None => Err(format!("{} not attached", serial)),
        },
        None => devices
            .iter()
            .find(|d| d.state == "device")
            .map(|d| d.serial.clone())
            .ok_or_else(|| "no device attached".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(serial: &str, state: &str) -> DeviceEntry {
        DeviceEntry {
            serial: serial.into(),
            state: state.into(),
        }
    }

    #[test]
    fn test_device_status() {
        let devices = vec![entry("emulator-5554", "device"), entry("R58M", "unauthorized")];
        assert_eq!(device_status(&devices, None), Ok("emulator-5554".into()));
        assert_eq!(
            device_status(&devices, Some("emulator-5554")),
            Ok("emulator-5554".into())
        );
        assert_eq!(
            device_status(&devices, Some("R58M")),
            Err("R58M is unauthorized".into())
        );
        assert_eq!(
            device_status(&devices, Some("other")),
            Err("other not attached".into())
        );
        assert_eq!(device_status(&[], None), Err("no device attached".into()));
    }
}
