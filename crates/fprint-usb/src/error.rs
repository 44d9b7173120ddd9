//! USB error types.

use fprint_core::SourceError;
use thiserror::Error;

/// USB error type.
#[derive(Debug, Error)]
pub enum UsbError {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Hotplug is not supported by this libusb build")]
    HotplugUnsupported,

    #[error("Invalid vendor id: {0}")]
    InvalidVendorId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<UsbError> for SourceError {
    fn from(err: UsbError) -> Self {
        match err {
            UsbError::HotplugUnsupported => Self::Hotplug(err.to_string()),
            other => Self::Enumeration(other.to_string()),
        }
    }
}

/// Result type for USB operations.
pub type UsbResult<T> = Result<T, UsbError>;
