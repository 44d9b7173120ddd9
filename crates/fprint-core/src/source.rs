//! Device enumeration source seam.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::device::SensorHandle;

/// Hotplug notification from the enumeration source.
///
/// A `Vanished` event carries the same handle instance as the matching
/// `Appeared` event.
#[derive(Debug, Clone)]
pub enum HotplugEvent {
    Appeared(Arc<dyn SensorHandle>),
    Vanished(Arc<dyn SensorHandle>),
}

/// Enumeration source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    #[error("Hotplug registration failed: {0}")]
    Hotplug(String),
}

/// Discovers devices and reports hotplug changes.
pub trait DeviceSource {
    /// Start delivering hotplug events to `tx`.
    ///
    /// # Errors
    /// Returns an error if hotplug monitoring cannot be set up.
    fn subscribe(&mut self, tx: mpsc::UnboundedSender<HotplugEvent>) -> Result<(), SourceError>;

    /// Probe the devices present right now. Blocks until probing completes.
    ///
    /// # Errors
    /// Returns an error if the hardware cannot be enumerated.
    fn enumerate(&mut self) -> Result<Vec<Arc<dyn SensorHandle>>, SourceError>;

    /// Stop monitoring and release hardware resources.
    fn shutdown(&mut self);
}
