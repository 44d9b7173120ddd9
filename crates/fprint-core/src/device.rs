//! Device identities, object paths, and the per-device object seam.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::Result;

/// Root of every object path published by the service.
pub const SERVICE_PATH: &str = "/net/reactivated/Fprint";

/// Path of the manager object.
pub const MANAGER_PATH: &str = "/net/reactivated/Fprint/Manager";

/// Identity assigned to a device by the enumeration source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A hierarchical address of a published object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Wrap a path string.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Path of the manager object.
    #[must_use]
    pub fn manager() -> Self {
        Self(MANAGER_PATH.to_string())
    }

    /// Path at which the device with `id` is published.
    #[must_use]
    pub fn for_device(id: DeviceId) -> Self {
        Self(format!("{SERVICE_PATH}/Device/{id}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// A hardware device handle supplied by the enumeration source.
///
/// Handles are compared by pointer identity, never by value.
pub trait SensorHandle: Send + Sync + fmt::Debug {
    /// Identity assigned by the source.
    fn id(&self) -> DeviceId;

    /// Human-readable device name.
    fn name(&self) -> &str;
}

/// Properties reported by a device object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub name: String,
    #[serde(rename = "in-use")]
    pub in_use: bool,
}

/// The remote object published for one device.
///
/// Capture, verify, and enroll semantics live entirely behind this trait.
/// The registry only reads the in-use flag.
pub trait DeviceObject: Send + Sync {
    fn id(&self) -> DeviceId;

    /// Whether a session is currently open on the device.
    fn in_use(&self) -> bool;

    fn properties(&self) -> DeviceProperties;

    /// Invoke a member of the device interface.
    ///
    /// # Errors
    /// Returns the device's own error, which is forwarded to the caller unchanged.
    fn invoke(&self, member: &str, args: &Value) -> Result<Value>;
}

/// Builds the device object for a newly appeared handle.
pub trait DeviceObjectFactory {
    fn create(&self, handle: Arc<dyn SensorHandle>, notifier: InUseNotifier) -> Arc<dyn DeviceObject>;
}

/// Notification that a device's in-use flag was written.
///
/// Sent even when the value did not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InUseChanged {
    pub id: DeviceId,
}

/// Sending half of an in-use subscription, held by the device object.
#[derive(Debug, Clone)]
pub struct InUseNotifier {
    id: DeviceId,
    tx: mpsc::UnboundedSender<InUseChanged>,
    connected: Arc<AtomicBool>,
}

impl InUseNotifier {
    /// Connect a notifier for `id`, returning it with the subscription that controls it.
    #[must_use]
    pub fn subscribe(id: DeviceId, tx: mpsc::UnboundedSender<InUseChanged>) -> (Self, Subscription) {
        let connected = Arc::new(AtomicBool::new(true));
        let notifier = Self { id, tx, connected: Arc::clone(&connected) };
        (notifier, Subscription { id, connected })
    }

    /// Report that the in-use flag was written. No-op once unsubscribed.
    pub fn notify(&self) {
        if !self.connected.load(Ordering::Acquire) {
            trace!(id = %self.id, "In-use notification after unsubscribe dropped");
            return;
        }
        let _ = self.tx.send(InUseChanged { id: self.id });
    }
}

/// Receiving-side guard for one device's in-use notifications.
///
/// Dropping it disconnects the notifier.
#[derive(Debug)]
pub struct Subscription {
    id: DeviceId,
    connected: Arc<AtomicBool>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::Release);
    }
}
