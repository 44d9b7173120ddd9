//! The device manager.
//!
//! Owns the object table, the device registry and the idle coordinator.
//! Every handler runs on the daemon's event loop, one at a time.

use std::sync::Arc;
use std::time::Duration;

use fprint_core::{
    DaemonState, DeviceId, DeviceObjectFactory, DeviceRegistry, DeviceSource, ErrorDomain,
    ExportedObject, HotplugEvent, IDLE_TIMEOUT, IdleCoordinator, IdleState, InUseChanged,
    ObjectExporter, ObjectPath, Result, SensorHandle, ShutdownRequest, SourceError, StateSnapshot,
    register_error_domain,
};
use fprint_ipc::{Event, EventType, InUseChangedData, ObjectServer};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Construction-time settings.
#[derive(Debug, Clone, Copy)]
pub struct ManagerOptions {
    /// Never shut down when idle
    pub no_timeout: bool,
    pub idle_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self { no_timeout: false, idle_timeout: IDLE_TIMEOUT }
    }
}

/// Receivers the event loop drains into the manager.
#[derive(Debug)]
pub struct ManagerEvents {
    pub hotplug_rx: mpsc::UnboundedReceiver<HotplugEvent>,
    pub in_use_rx: mpsc::UnboundedReceiver<InUseChanged>,
}

pub struct Manager {
    objects: ObjectServer,
    registry: DeviceRegistry,
    idle: IdleCoordinator,
    source: Box<dyn DeviceSource>,
    factory: Box<dyn DeviceObjectFactory>,
    domain: &'static ErrorDomain,
    state: DaemonState,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("state", &self.state)
            .field("idle", &self.idle)
            .field("devices", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Build the manager, publish its root object and register every
    /// device that is already present.
    ///
    /// Enumeration runs synchronously before the event loop starts.
    ///
    /// # Errors
    /// Returns an error if hotplug monitoring or enumeration fails.
    pub fn new(
        objects: ObjectServer,
        source: Box<dyn DeviceSource>,
        factory: Box<dyn DeviceObjectFactory>,
        options: ManagerOptions,
    ) -> std::result::Result<(Self, ManagerEvents), SourceError> {
        let domain = register_error_domain();
        let (hotplug_tx, hotplug_rx) = mpsc::unbounded_channel();
        let (in_use_tx, in_use_rx) = mpsc::unbounded_channel();

        let mut manager = Self {
            objects,
            registry: DeviceRegistry::new(in_use_tx),
            idle: IdleCoordinator::new(options.idle_timeout, options.no_timeout),
            source,
            factory,
            domain,
            state: DaemonState::Starting,
        };

        manager.objects.export(ObjectPath::manager(), ExportedObject::Manager);
        manager.source.subscribe(hotplug_tx)?;

        manager.state = DaemonState::Enumerating;
        for handle in manager.source.enumerate()? {
            manager.device_appeared(handle);
        }

        manager.state = DaemonState::Running;
        info!(
            devices = manager.registry.len(),
            idle = ?manager.idle.state(),
            timeout_secs = options.idle_timeout.as_secs(),
            "Manager ready"
        );

        Ok((manager, ManagerEvents { hotplug_rx, in_use_rx }))
    }

    pub fn handle_hotplug(&mut self, event: HotplugEvent) {
        match event {
            HotplugEvent::Appeared(handle) => self.device_appeared(handle),
            HotplugEvent::Vanished(handle) => self.device_vanished(&handle),
        }
    }

    /// Register a device and restart the idle window.
    pub fn device_appeared(&mut self, handle: Arc<dyn SensorHandle>) {
        let id = handle.id();
        if self.registry.contains(id) {
            warn!(%id, "Device id already registered, ignoring duplicate arrival");
            return;
        }

        self.registry.add(handle, self.factory.as_ref(), &mut self.objects);
        self.reevaluate_idle();
    }

    /// Drop a device. The idle window restarts even when nothing matched.
    pub fn device_vanished(&mut self, handle: &Arc<dyn SensorHandle>) {
        self.registry.remove(handle, &mut self.objects);
        self.reevaluate_idle();
    }

    /// A device object wrote its in-use flag.
    pub fn in_use_changed(&mut self, id: DeviceId) {
        let Some(entry) = self.registry.get(id) else {
            debug!(%id, "In-use notification for unregistered device ignored");
            return;
        };

        let data = InUseChangedData { path: entry.path().clone(), in_use: entry.in_use() };
        debug!(%id, in_use = data.in_use, "Device in-use changed");
        self.objects.emit(Event::new(EventType::InUseChanged, &data));
        self.reevaluate_idle();
    }

    fn reevaluate_idle(&mut self) {
        let in_use = self.registry.in_use_count();
        let state = self.idle.reevaluate(in_use);
        debug!(in_use, ?state, "Idle condition re-evaluated");
    }

    /// Paths of all registered devices, oldest first.
    #[must_use]
    pub fn get_devices(&self) -> Vec<ObjectPath> {
        self.registry.list_paths()
    }

    /// Path of the oldest registered device.
    ///
    /// # Errors
    /// Returns `NoSuchDevice` when nothing is registered.
    pub fn get_default_device(&self) -> Result<ObjectPath> {
        self.registry.default_device().cloned()
    }

    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::capture(self.state, self.idle.state(), &self.registry)
    }

    #[must_use]
    pub fn idle_deadline(&self) -> Option<Instant> {
        self.idle.deadline()
    }

    #[must_use]
    pub fn idle_state(&self) -> IdleState {
        self.idle.state()
    }

    /// Returns a shutdown request once the idle deadline has passed and
    /// no device is in use.
    pub fn poll_idle(&mut self, now: Instant) -> Option<ShutdownRequest> {
        if self.registry.in_use_count() > 0 {
            // A notification is still queued; apply it now.
            self.reevaluate_idle();
            return None;
        }
        self.idle.poll_expired(now)
    }

    #[must_use]
    pub fn objects(&self) -> &ObjectServer {
        &self.objects
    }

    #[must_use]
    pub fn domain(&self) -> &'static ErrorDomain {
        self.domain
    }

    /// Stop the source and withdraw every published object.
    pub fn shutdown(&mut self) {
        if self.state == DaemonState::ShuttingDown {
            return;
        }
        self.state = DaemonState::ShuttingDown;
        info!(devices = self.registry.len(), "Manager shutting down");

        self.objects.emit(Event::new(EventType::ShuttingDown, &json!({})));
        self.source.shutdown();

        let handles: Vec<_> = self.registry.entries().map(|e| Arc::clone(e.handle())).collect();
        for handle in &handles {
            self.registry.remove(handle, &mut self.objects);
        }
        self.objects.unexport(&ObjectPath::manager());
    }
}
