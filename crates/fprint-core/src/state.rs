//! Daemon lifecycle state and diagnostic snapshots.

use serde::{Deserialize, Serialize};

use crate::device::ObjectPath;
use crate::idle::IdleState;
use crate::registry::DeviceRegistry;

/// Lifecycle state of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    /// Loading configuration and binding the IPC socket
    #[default]
    Starting,
    /// Probing devices that are already present
    Enumerating,
    /// Normal operation
    Running,
    /// Teardown in progress
    ShuttingDown,
}

/// A registered device as seen in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub path: ObjectPath,
    pub name: String,
    pub in_use: bool,
}

/// Point-in-time view of the manager, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: DaemonState,
    pub idle: IdleState,
    /// Registered devices, oldest first
    pub devices: Vec<DeviceSummary>,
}

impl StateSnapshot {
    /// Capture the registry contents alongside the given states.
    #[must_use]
    pub fn capture(state: DaemonState, idle: IdleState, registry: &DeviceRegistry) -> Self {
        let devices = registry
            .entries()
            .map(|e| DeviceSummary {
                path: e.path().clone(),
                name: e.handle().name().to_string(),
                in_use: e.in_use(),
            })
            .collect();
        Self { state, idle, devices }
    }
}
