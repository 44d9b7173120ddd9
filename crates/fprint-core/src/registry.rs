//! Ordered registry of live devices.
//!
//! Entries are kept in arrival order. The oldest entry is the default device,
//! since it is the most likely to be a built-in sensor.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::device::{
    DeviceId, DeviceObject, DeviceObjectFactory, InUseChanged, InUseNotifier, ObjectPath,
    SensorHandle, Subscription,
};
use crate::error::{Error, Result};

/// An object that can be published on the IPC channel.
#[derive(Clone)]
pub enum ExportedObject {
    /// The fixed manager root object
    Manager,
    /// A per-device object
    Device(Arc<dyn DeviceObject>),
}

/// Publishes objects on the IPC channel.
pub trait ObjectExporter {
    fn export(&mut self, path: ObjectPath, object: ExportedObject);

    /// Returns `false` when nothing was published at `path`.
    fn unexport(&mut self, path: &ObjectPath) -> bool;
}

/// One registered device.
pub struct DeviceEntry {
    id: DeviceId,
    path: ObjectPath,
    handle: Arc<dyn SensorHandle>,
    object: Arc<dyn DeviceObject>,
    _subscription: Subscription,
}

impl DeviceEntry {
    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    #[must_use]
    pub fn handle(&self) -> &Arc<dyn SensorHandle> {
        &self.handle
    }

    #[must_use]
    pub fn object(&self) -> &Arc<dyn DeviceObject> {
        &self.object
    }

    /// Current in-use flag, as reported by the device object.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.object.in_use()
    }
}

impl std::fmt::Debug for DeviceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEntry")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// The ordered collection of registered devices.
pub struct DeviceRegistry {
    entries: Vec<DeviceEntry>,
    in_use_tx: mpsc::UnboundedSender<InUseChanged>,
}

impl DeviceRegistry {
    /// Create an empty registry. In-use notifications of every entry are
    /// delivered to `in_use_tx`.
    #[must_use]
    pub fn new(in_use_tx: mpsc::UnboundedSender<InUseChanged>) -> Self {
        Self { entries: Vec::new(), in_use_tx }
    }

    /// Register a newly appeared device.
    ///
    /// Creates its device object, subscribes to its in-use notifications,
    /// publishes it, and appends it. The handle's id must not already be
    /// registered.
    pub fn add(
        &mut self,
        handle: Arc<dyn SensorHandle>,
        factory: &dyn DeviceObjectFactory,
        exporter: &mut dyn ObjectExporter,
    ) -> &DeviceEntry {
        let id = handle.id();
        let path = ObjectPath::for_device(id);
        debug_assert!(!self.contains(id), "device id {id} registered twice");

        let (notifier, subscription) = InUseNotifier::subscribe(id, self.in_use_tx.clone());
        let object = factory.create(Arc::clone(&handle), notifier);

        exporter.export(path.clone(), ExportedObject::Device(Arc::clone(&object)));
        info!(%id, %path, name = handle.name(), "Device added");

        let index = self.entries.len();
        self.entries.push(DeviceEntry { id, path, handle, object, _subscription: subscription });
        &self.entries[index]
    }

    /// Remove the entry whose handle is `handle` (by identity).
    ///
    /// Unpublishes and unsubscribes it. Returns the removed path, or `None`
    /// when no entry matched.
    pub fn remove(
        &mut self,
        handle: &Arc<dyn SensorHandle>,
        exporter: &mut dyn ObjectExporter,
    ) -> Option<ObjectPath> {
        let Some(index) = self.entries.iter().position(|e| Arc::ptr_eq(&e.handle, handle)) else {
            warn!(id = %handle.id(), "Removal requested for unregistered device");
            return None;
        };

        let entry = self.entries.remove(index);
        if !exporter.unexport(&entry.path) {
            warn!(path = %entry.path, "Device object was not exported");
        }
        info!(id = %entry.id, path = %entry.path, "Device removed");

        // Dropping the entry drops its subscription.
        Some(entry.path)
    }

    /// Paths of all entries, oldest first.
    #[must_use]
    pub fn list_paths(&self) -> Vec<ObjectPath> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    /// Path of the oldest entry.
    ///
    /// # Errors
    /// Returns [`Error::NoSuchDevice`] when the registry is empty.
    pub fn default_device(&self) -> Result<&ObjectPath> {
        self.entries.first().map(|e| &e.path).ok_or_else(Error::no_devices)
    }

    /// Number of entries whose device reports in-use.
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        let count = self.entries.iter().filter(|e| e.in_use()).count();
        debug!(count, total = self.entries.len(), "Counted in-use devices");
        count
    }

    #[must_use]
    pub fn get(&self, id: DeviceId) -> Option<&DeviceEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: DeviceId) -> bool {
        self.get(id).is_some()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::{Value, json};

    use super::*;
    use crate::device::DeviceProperties;

    #[derive(Debug)]
    pub struct FakeHandle {
        pub id: DeviceId,
    }

    impl SensorHandle for FakeHandle {
        fn id(&self) -> DeviceId {
            self.id
        }

        fn name(&self) -> &str {
            "Fake sensor"
        }
    }

    pub fn handle(id: u32) -> Arc<dyn SensorHandle> {
        Arc::new(FakeHandle { id: DeviceId(id) })
    }

    pub struct FakeObject {
        pub id: DeviceId,
        pub in_use: AtomicBool,
        pub notifier: InUseNotifier,
    }

    impl FakeObject {
        pub fn set_in_use(&self, in_use: bool) {
            self.in_use.store(in_use, Ordering::SeqCst);
            self.notifier.notify();
        }
    }

    impl DeviceObject for FakeObject {
        fn id(&self) -> DeviceId {
            self.id
        }

        fn in_use(&self) -> bool {
            self.in_use.load(Ordering::SeqCst)
        }

        fn properties(&self) -> DeviceProperties {
            DeviceProperties { name: "Fake sensor".into(), in_use: self.in_use() }
        }

        fn invoke(&self, member: &str, _args: &Value) -> Result<Value> {
            Err(Error::Internal(format!("Unsupported method {member}")))
        }
    }

    /// Factory that keeps the concrete objects so tests can flip in-use flags.
    #[derive(Default)]
    pub struct FakeFactory {
        created: Mutex<Vec<Arc<FakeObject>>>,
    }

    impl FakeFactory {
        /// Most recently created object for `id`.
        pub fn object(&self, id: u32) -> Arc<FakeObject> {
            self.created.lock().unwrap().iter().rev().find(|o| o.id.0 == id).cloned().unwrap()
        }
    }

    impl DeviceObjectFactory for FakeFactory {
        fn create(&self, handle: Arc<dyn SensorHandle>, notifier: InUseNotifier) -> Arc<dyn DeviceObject> {
            let object =
                Arc::new(FakeObject { id: handle.id(), in_use: AtomicBool::new(false), notifier });
            self.created.lock().unwrap().push(Arc::clone(&object));
            object
        }
    }

    #[derive(Default)]
    pub struct RecordingExporter {
        pub exported: BTreeMap<String, bool>,
        pub log: Vec<Value>,
    }

    impl ObjectExporter for RecordingExporter {
        fn export(&mut self, path: ObjectPath, object: ExportedObject) {
            let is_device = matches!(object, ExportedObject::Device(_));
            self.log.push(json!({ "export": path.as_str() }));
            self.exported.insert(path.as_str().to_string(), is_device);
        }

        fn unexport(&mut self, path: &ObjectPath) -> bool {
            self.log.push(json!({ "unexport": path.as_str() }));
            self.exported.remove(path.as_str()).is_some()
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    use super::testing::{FakeFactory, RecordingExporter, handle};
    use super::*;

    fn registry() -> (DeviceRegistry, mpsc::UnboundedReceiver<InUseChanged>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DeviceRegistry::new(tx), rx)
    }

    fn paths(registry: &DeviceRegistry) -> Vec<String> {
        registry.list_paths().iter().map(|p| p.as_str().to_string()).collect()
    }

    #[test]
    fn test_empty_registry_lists_nothing() {
        let (registry, _rx) = registry();

        assert!(registry.list_paths().is_empty());
        assert_matches!(registry.default_device(), Err(Error::NoSuchDevice(msg)) if msg == "No devices available");
    }

    #[test]
    fn test_single_device_is_default() {
        let (mut registry, _rx) = registry();
        let mut exporter = RecordingExporter::default();
        let factory = FakeFactory::default();

        registry.add(handle(5), &factory, &mut exporter);

        assert_eq!(paths(&registry), vec!["/net/reactivated/Fprint/Device/5"]);
        assert_eq!(registry.default_device().unwrap().as_str(), "/net/reactivated/Fprint/Device/5");
        assert_eq!(exporter.exported.get("/net/reactivated/Fprint/Device/5"), Some(&true));
    }

    #[test]
    fn test_arrival_order_and_oldest_default() {
        let (mut registry, _rx) = registry();
        let mut exporter = RecordingExporter::default();
        let factory = FakeFactory::default();

        registry.add(handle(5), &factory, &mut exporter);
        registry.add(handle(7), &factory, &mut exporter);

        assert_eq!(
            paths(&registry),
            vec!["/net/reactivated/Fprint/Device/5", "/net/reactivated/Fprint/Device/7"]
        );
        assert_eq!(registry.default_device().unwrap().as_str(), "/net/reactivated/Fprint/Device/5");
    }

    #[test]
    fn test_removing_oldest_promotes_next() {
        let (mut registry, _rx) = registry();
        let mut exporter = RecordingExporter::default();
        let factory = FakeFactory::default();
        let first = handle(5);

        registry.add(Arc::clone(&first), &factory, &mut exporter);
        registry.add(handle(7), &factory, &mut exporter);
        let removed = registry.remove(&first, &mut exporter);

        assert_eq!(removed.map(|p| p.to_string()).as_deref(), Some("/net/reactivated/Fprint/Device/5"));
        assert_eq!(paths(&registry), vec!["/net/reactivated/Fprint/Device/7"]);
        assert_eq!(registry.default_device().unwrap().as_str(), "/net/reactivated/Fprint/Device/7");
        assert!(!exporter.exported.contains_key("/net/reactivated/Fprint/Device/5"));
    }

    #[test]
    fn test_remove_matches_identity_not_value() {
        let (mut registry, _rx) = registry();
        let mut exporter = RecordingExporter::default();
        let factory = FakeFactory::default();

        registry.add(handle(5), &factory, &mut exporter);
        // Same id, different handle instance.
        let impostor = handle(5);

        assert_eq!(registry.remove(&impostor, &mut exporter), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_unsubscribes() {
        let (mut registry, mut rx) = registry();
        let mut exporter = RecordingExporter::default();
        let factory = FakeFactory::default();
        let h = handle(2);

        registry.add(Arc::clone(&h), &factory, &mut exporter);
        let object = factory.object(2);
        object.set_in_use(true);
        assert_eq!(rx.try_recv().ok(), Some(InUseChanged { id: DeviceId(2) }));

        registry.remove(&h, &mut exporter);
        object.set_in_use(false);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_in_use_count_reads_objects() {
        let (mut registry, _rx) = registry();
        let mut exporter = RecordingExporter::default();
        let factory = FakeFactory::default();

        registry.add(handle(1), &factory, &mut exporter);
        registry.add(handle(2), &factory, &mut exporter);
        assert_eq!(registry.in_use_count(), 0);

        factory.object(2).set_in_use(true);
        assert_eq!(registry.in_use_count(), 1);
        assert!(registry.get(DeviceId(2)).is_some_and(DeviceEntry::in_use));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add,
        Remove(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Add), (0usize..16).prop_map(Op::Remove)]
    }

    proptest! {
        #[test]
        fn prop_list_matches_arrival_order(ops in proptest::collection::vec(op(), 0..64)) {
            let (mut registry, _rx) = registry();
            let mut exporter = RecordingExporter::default();
            let factory = FakeFactory::default();
            let mut live: Vec<Arc<dyn SensorHandle>> = Vec::new();
            let mut next_id = 0u32;

            for op in ops {
                match op {
                    Op::Add => {
                        let h = handle(next_id);
                        next_id += 1;
                        registry.add(Arc::clone(&h), &factory, &mut exporter);
                        live.push(h);
                    }
                    Op::Remove(i) if !live.is_empty() => {
                        let h = live.remove(i % live.len());
                        prop_assert!(registry.remove(&h, &mut exporter).is_some());
                    }
                    Op::Remove(_) => {}
                }
            }

            let expected: Vec<ObjectPath> = live.iter().map(|h| ObjectPath::for_device(h.id())).collect();
            prop_assert_eq!(registry.list_paths(), expected.clone());
            match expected.first() {
                Some(first) => prop_assert_eq!(registry.default_device().ok(), Some(first)),
                None => prop_assert!(registry.default_device().is_err()),
            }
            prop_assert_eq!(exporter.exported.len(), live.len());
        }
    }
}
