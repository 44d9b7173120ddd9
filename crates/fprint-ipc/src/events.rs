//! IPC event types (server to client).

use fprint_core::ObjectPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event sent from daemon to subscribed clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type
    pub event: EventType,
    /// Event data
    pub data: Value,
}

impl Event {
    /// Build an event from a serializable payload.
    #[must_use]
    pub fn new(event: EventType, data: &impl Serialize) -> Self {
        Self { event, data: serde_json::to_value(data).unwrap_or_default() }
    }
}

/// Types of events that can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A device object was published
    DeviceAdded,
    /// A device object was withdrawn
    DeviceRemoved,
    /// A device's in-use flag was written
    InUseChanged,
    /// The daemon is about to exit
    ShuttingDown,
}

/// Device added event data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAddedData {
    pub path: ObjectPath,
    pub name: String,
}

/// Device removed event data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRemovedData {
    pub path: ObjectPath,
}

/// In-use changed event data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InUseChangedData {
    pub path: ObjectPath,
    pub in_use: bool,
}
