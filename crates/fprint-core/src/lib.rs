//! fprint core - device registry, idle shutdown, and the error domain.
//!
//! This crate holds the device-lifecycle logic shared by the daemon and the
//! IPC layer: the ordered registry of published devices, the idle-shutdown
//! coordinator, and the wire error table.

pub mod device;
pub mod error;
pub mod idle;
pub mod registry;
pub mod source;
pub mod state;

pub use device::{
    DeviceId, DeviceObject, DeviceObjectFactory, DeviceProperties, InUseChanged, InUseNotifier,
    MANAGER_PATH, ObjectPath, SERVICE_PATH, SensorHandle, Subscription,
};
pub use error::{Error, ErrorDomain, ErrorKind, Result, error_domain, register_error_domain};
pub use idle::{IDLE_TIMEOUT, IdleCoordinator, IdleState, ShutdownRequest, wait_for_deadline};
pub use registry::{DeviceEntry, DeviceRegistry, ExportedObject, ObjectExporter};
pub use source::{DeviceSource, HotplugEvent, SourceError};
pub use state::{DaemonState, DeviceSummary, StateSnapshot};
