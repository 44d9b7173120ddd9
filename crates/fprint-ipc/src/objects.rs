//! Table of objects published on the IPC channel.

use std::collections::BTreeMap;

use fprint_core::{ExportedObject, ObjectExporter, ObjectPath};
use tokio::sync::broadcast;
use tracing::debug;

use crate::events::{DeviceAddedData, DeviceRemovedData, Event, EventType};

/// The published objects, keyed by path.
///
/// Owned by the daemon's event loop; connection tasks never touch it.
pub struct ObjectServer {
    objects: BTreeMap<ObjectPath, ExportedObject>,
    event_tx: broadcast::Sender<Event>,
}

impl ObjectServer {
    /// Create an empty table that announces device objects on `event_tx`.
    #[must_use]
    pub fn new(event_tx: broadcast::Sender<Event>) -> Self {
        Self { objects: BTreeMap::new(), event_tx }
    }

    /// Look up the object published at `path`.
    #[must_use]
    pub fn get(&self, path: &ObjectPath) -> Option<&ExportedObject> {
        self.objects.get(path)
    }

    #[must_use]
    pub fn is_exported(&self, path: &ObjectPath) -> bool {
        self.objects.contains_key(path)
    }

    /// All published paths, in path order.
    pub fn paths(&self) -> impl Iterator<Item = &ObjectPath> {
        self.objects.keys()
    }

    /// Broadcast an event to connected clients.
    pub fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }
}

impl ObjectExporter for ObjectServer {
    fn export(&mut self, path: ObjectPath, object: ExportedObject) {
        debug!(%path, "Exporting object");
        if let ExportedObject::Device(device) = &object {
            let data = DeviceAddedData { path: path.clone(), name: device.properties().name };
            self.emit(Event::new(EventType::DeviceAdded, &data));
        }
        self.objects.insert(path, object);
    }

    fn unexport(&mut self, path: &ObjectPath) -> bool {
        let Some(object) = self.objects.remove(path) else {
            return false;
        };
        debug!(%path, "Unexported object");
        if matches!(object, ExportedObject::Device(_)) {
            self.emit(Event::new(EventType::DeviceRemoved, &DeviceRemovedData { path: path.clone() }));
        }
        true
    }
}
