use crate::TaskError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;

/// What to do when a request targets a device that is already in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Wait for the running session to finish.
    #[default]
    Queue,
    /// Refuse the request.
    Reject,
}

/// One session per device at a time.
#[derive(Clone, Default)]
pub struct DeviceLeases {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl DeviceLeases {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, device_key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(device_key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Wait until the device is free.
    pub async fn acquire(&self, device_key: &str) -> DeviceLease {
        let start = Instant::now();
        let guard = self.lock_for(device_key).lock_owned().await;
        let wait_time = start.elapsed();
        if wait_time > Duration::from_millis(10) {
            tracing::info!(device_id = device_key, "Waited {:?} for device", wait_time);
        }
        DeviceLease {
            device_key: device_key.to_string(),
            wait_time,
            _guard: guard,
        }
    }

    /// Take the device only if nobody holds it.
    pub fn try_acquire(&self, device_key: &str) -> Result<DeviceLease, TaskError> {
        let guard = self
            .lock_for(device_key)
            .try_lock_owned()
            .map_err(|_| TaskError::DeviceBusy(device_key.to_string()))?;
        Ok(DeviceLease {
            device_key: device_key.to_string(),
            wait_time: Duration::ZERO,
            _guard: guard,
        })
    }

    pub async fn lease(&self, device_key: &str, policy: BusyPolicy) -> Result<DeviceLease, TaskError> {
        match policy {
            BusyPolicy::Queue => Ok(self.acquire(device_key).await),
            BusyPolicy::Reject => self.try_acquire(device_key),
        }
    }
}

/// Exclusive use of a device until dropped.
pub struct DeviceLease {
    device_key: String,
    wait_time: Duration,
    _guard: OwnedMutexGuard<()>,
}

impl DeviceLease {
    pub fn device_key(&self) -> &str {
        &self.device_key
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reject_while_held() {
        let leases = DeviceLeases::new();
        let lease = leases.try_acquire("emulator-5554").unwrap();
        assert_eq!(lease.device_key(), "emulator-5554");

        assert!(matches!(
            leases.try_acquire("emulator-5554"),
            Err(TaskError::DeviceBusy(_))
        ));
        assert!(leases.try_acquire("other").is_ok());

        drop(lease);
        assert!(leases.try_acquire("emulator-5554").is_ok());
    }

    #[tokio::test]
    async fn test_queue_waits_for_release() {
        let leases = DeviceLeases::new();
        let first = leases.acquire("default").await;

        let waiter = {
            let leases = leases.clone();
            tokio::spawn(async move { leases.lease("default", BusyPolicy::Queue).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = waiter.await.unwrap().unwrap();
        assert!(second.wait_time() >= Duration::from_millis(20));
    }
}
