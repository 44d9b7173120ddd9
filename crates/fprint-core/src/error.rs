//! Error types and the wire error domain.
//!
//! Every error that crosses the IPC boundary belongs to one of eight kinds.
//! Each kind maps to a stable wire name under [`ERROR_PREFIX`]. The mapping
//! is registered once per process with [`register_error_domain`].

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Name of the error domain.
pub const ERROR_DOMAIN: &str = "fprintd-error-quark";

/// Prefix shared by all wire error names.
pub const ERROR_PREFIX: &str = "net.reactivated.Fprint.Error";

/// Named error kinds, in wire-table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ClaimDevice,
    AlreadyInUse,
    Internal,
    PermissionDenied,
    NoEnrolledPrints,
    NoActionInProgress,
    InvalidFingername,
    NoSuchDevice,
}

impl ErrorKind {
    /// All kinds in table order.
    pub const ALL: [Self; 8] = [
        Self::ClaimDevice,
        Self::AlreadyInUse,
        Self::Internal,
        Self::PermissionDenied,
        Self::NoEnrolledPrints,
        Self::NoActionInProgress,
        Self::InvalidFingername,
        Self::NoSuchDevice,
    ];

    /// The unqualified wire suffix for this kind.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::ClaimDevice => "ClaimDevice",
            Self::AlreadyInUse => "AlreadyInUse",
            Self::Internal => "Internal",
            Self::PermissionDenied => "PermissionDenied",
            Self::NoEnrolledPrints => "NoEnrolledPrints",
            Self::NoActionInProgress => "NoActionInProgress",
            Self::InvalidFingername => "InvalidFingername",
            Self::NoSuchDevice => "NoSuchDevice",
        }
    }
}

/// Core error type.
///
/// Only [`Error::NoSuchDevice`] is produced by the registry itself. The other
/// variants are raised by device objects and passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{0}")]
    ClaimDevice(String),

    #[error("{0}")]
    AlreadyInUse(String),

    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    NoEnrolledPrints(String),

    #[error("{0}")]
    NoActionInProgress(String),

    #[error("{0}")]
    InvalidFingername(String),

    #[error("{0}")]
    NoSuchDevice(String),
}

impl Error {
    /// The error returned when the registry holds no devices.
    #[must_use]
    pub fn no_devices() -> Self {
        Self::NoSuchDevice("No devices available".to_string())
    }

    /// Build an error from a kind and message.
    #[must_use]
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::ClaimDevice => Self::ClaimDevice(message),
            ErrorKind::AlreadyInUse => Self::AlreadyInUse(message),
            ErrorKind::Internal => Self::Internal(message),
            ErrorKind::PermissionDenied => Self::PermissionDenied(message),
            ErrorKind::NoEnrolledPrints => Self::NoEnrolledPrints(message),
            ErrorKind::NoActionInProgress => Self::NoActionInProgress(message),
            ErrorKind::InvalidFingername => Self::InvalidFingername(message),
            ErrorKind::NoSuchDevice => Self::NoSuchDevice(message),
        }
    }

    /// The kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ClaimDevice(_) => ErrorKind::ClaimDevice,
            Self::AlreadyInUse(_) => ErrorKind::AlreadyInUse,
            Self::Internal(_) => ErrorKind::Internal,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NoEnrolledPrints(_) => ErrorKind::NoEnrolledPrints,
            Self::NoActionInProgress(_) => ErrorKind::NoActionInProgress,
            Self::InvalidFingername(_) => ErrorKind::InvalidFingername,
            Self::NoSuchDevice(_) => ErrorKind::NoSuchDevice,
        }
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::ClaimDevice(m)
            | Self::AlreadyInUse(m)
            | Self::Internal(m)
            | Self::PermissionDenied(m)
            | Self::NoEnrolledPrints(m)
            | Self::NoActionInProgress(m)
            | Self::InvalidFingername(m)
            | Self::NoSuchDevice(m) => m,
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The immutable kind-to-wire-name table.
#[derive(Debug)]
pub struct ErrorDomain {
    name: &'static str,
    entries: Vec<(ErrorKind, String)>,
}

impl ErrorDomain {
    fn build() -> Self {
        let entries = ErrorKind::ALL
            .iter()
            .map(|kind| (*kind, format!("{ERROR_PREFIX}.{}", kind.suffix())))
            .collect();
        Self { name: ERROR_DOMAIN, entries }
    }

    /// Domain name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Table entries in registration order.
    #[must_use]
    pub fn entries(&self) -> &[(ErrorKind, String)] {
        &self.entries
    }

    /// Wire name for a kind.
    #[must_use]
    pub fn wire_name(&self, kind: ErrorKind) -> &str {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(ERROR_PREFIX, |(_, name)| name.as_str())
    }

    /// Kind for a wire name, if it belongs to this domain.
    #[must_use]
    pub fn kind_for(&self, wire_name: &str) -> Option<ErrorKind> {
        self.entries.iter().find(|(_, name)| name == wire_name).map(|(kind, _)| *kind)
    }
}

static DOMAIN: OnceLock<ErrorDomain> = OnceLock::new();

/// Register the error domain.
///
/// Safe to call from several threads and more than once; every call returns
/// the same table.
pub fn register_error_domain() -> &'static ErrorDomain {
    DOMAIN.get_or_init(|| {
        let domain = ErrorDomain::build();
        debug!(domain = domain.name, entries = domain.entries.len(), "Registered error domain");
        domain
    })
}

/// The registered error domain, if registration has happened.
#[must_use]
pub fn error_domain() -> Option<&'static ErrorDomain> {
    DOMAIN.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_table_order_and_names() {
        let domain = register_error_domain();
        let names: Vec<&str> = domain.entries().iter().map(|(_, n)| n.as_str()).collect();

        assert_eq!(
            names,
            vec![
                "net.reactivated.Fprint.Error.ClaimDevice",
                "net.reactivated.Fprint.Error.AlreadyInUse",
                "net.reactivated.Fprint.Error.Internal",
                "net.reactivated.Fprint.Error.PermissionDenied",
                "net.reactivated.Fprint.Error.NoEnrolledPrints",
                "net.reactivated.Fprint.Error.NoActionInProgress",
                "net.reactivated.Fprint.Error.InvalidFingername",
                "net.reactivated.Fprint.Error.NoSuchDevice",
            ]
        );
        assert_eq!(domain.name(), "fprintd-error-quark");
    }

    #[test]
    fn test_registration_is_idempotent() {
        let first = register_error_domain();
        let second = register_error_domain();

        assert!(std::ptr::eq(first, second));
        assert!(error_domain().is_some_and(|d| std::ptr::eq(d, first)));
    }

    #[test]
    fn test_concurrent_registration_yields_one_table() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| std::ptr::from_ref(register_error_domain()) as usize))
            .collect();

        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_wire_name_lookup_both_ways() {
        let domain = register_error_domain();

        for kind in ErrorKind::ALL {
            let name = domain.wire_name(kind).to_string();
            assert_eq!(domain.kind_for(&name), Some(kind));
        }
        assert_eq!(domain.kind_for("org.example.Error.Other"), None);
    }

    #[test]
    fn test_no_devices_error() {
        let err = Error::no_devices();

        assert_eq!(err.kind(), ErrorKind::NoSuchDevice);
        assert_eq!(err.to_string(), "No devices available");
    }

    #[test]
    fn test_from_kind_preserves_message() {
        let err = Error::from_kind(ErrorKind::AlreadyInUse, "Device was already claimed");

        assert_eq!(err, Error::AlreadyInUse("Device was already claimed".into()));
        assert_eq!(err.message(), "Device was already claimed");
    }
}
