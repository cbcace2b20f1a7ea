use std::sync::Arc;
use std::time::Duration;

use phone_agent_core::SessionDefaults;
use phone_agent_tasks::{BusyPolicy, DeviceLeases, WorkerManager};

/// Gateway knobs that do not belong to any single session.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Bearer token required on every route. `None` disables auth.
    pub auth_token: Option<String>,
    pub busy_policy: BusyPolicy,
    pub keepalive: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            auth_token: None,
            busy_policy: BusyPolicy::Queue,
            keepalive: Duration::from_secs(10),
        }
    }
}

/// Shared application state accessible to all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: WorkerManager,
    pub leases: DeviceLeases,
    pub defaults: Arc<SessionDefaults>,
    pub settings: Arc<GatewaySettings>,
}

impl AppState {
    pub fn new(
        manager: WorkerManager,
        defaults: Arc<SessionDefaults>,
        settings: Arc<GatewaySettings>,
    ) -> Self {
        Self {
            manager,
            leases: DeviceLeases::new(),
            defaults,
            settings,
        }
    }

    pub fn model_name(&self) -> &str {
        self.manager.runner().planner_name()
    }
}
