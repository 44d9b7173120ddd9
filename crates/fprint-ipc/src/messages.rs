//! IPC message types.

use fprint_core::{Error, ErrorDomain, ObjectPath};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::EventType;

/// Error name for calls addressed to a path with no published object.
pub const UNKNOWN_OBJECT: &str = "net.reactivated.Fprint.IPC.UnknownObject";

/// Error name for methods the addressed object does not implement.
pub const UNKNOWN_METHOD: &str = "net.reactivated.Fprint.IPC.UnknownMethod";

/// Request envelope sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique request ID for matching responses
    pub id: u64,
    /// Object the method is invoked on
    pub path: ObjectPath,
    /// The method to invoke
    pub method: Method,
}

/// Response envelope sent from daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this is responding to
    pub id: u64,
    /// Result of the request
    pub result: Result<Value, ErrorInfo>,
}

/// Error information in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Wire error name
    pub name: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorInfo {
    /// Create a new error.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into() }
    }

    /// Convert a domain error using the registered wire names.
    #[must_use]
    pub fn from_error(domain: &ErrorDomain, error: &Error) -> Self {
        Self::new(domain.wire_name(error.kind()), error.message())
    }

    #[must_use]
    pub fn unknown_object(path: &ObjectPath) -> Self {
        Self::new(UNKNOWN_OBJECT, format!("No such object path '{path}'"))
    }

    #[must_use]
    pub fn unknown_method(path: &ObjectPath, method: &str) -> Self {
        Self::new(UNKNOWN_METHOD, format!("No such method '{method}' on '{path}'"))
    }
}

/// Methods that can be invoked via IPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum Method {
    // Manager object
    /// List device object paths, oldest first
    GetDevices,
    /// Path of the default (oldest) device
    GetDefaultDevice,
    /// Diagnostic snapshot of the manager
    GetState,

    // Device objects
    /// Read the device's properties
    GetProperties,
    /// Invoke a device interface member
    Call {
        member: String,
        #[serde(default)]
        args: Value,
    },

    // Connection
    /// Restrict the events forwarded to this connection
    Subscribe { events: Vec<EventType> },
    /// Stop forwarding the given events
    Unsubscribe { events: Vec<EventType> },
}

impl Method {
    /// Method name as used in error messages.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::GetDevices => "GetDevices",
            Self::GetDefaultDevice => "GetDefaultDevice",
            Self::GetState => "GetState",
            Self::GetProperties => "GetProperties",
            Self::Call { member, .. } => member,
            Self::Subscribe { .. } => "Subscribe",
            Self::Unsubscribe { .. } => "Unsubscribe",
        }
    }
}
