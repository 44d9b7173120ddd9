//! fprint USB - fingerprint sensor discovery.
//!
//! This crate enumerates USB devices from known fingerprint-sensor vendors
//! and watches libusb hotplug notifications, feeding the manager's registry.
//!
//! **Note**: matching is by vendor id only. Probing whether a device is really
//! a usable sensor is left to the driver layer behind the device object.

pub mod device;
pub mod error;
pub mod source;

pub use device::{KNOWN_SENSOR_VENDORS, UsbSensor};
pub use error::{UsbError, UsbResult};
pub use source::UsbSource;
