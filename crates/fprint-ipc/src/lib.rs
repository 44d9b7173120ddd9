//! fprint IPC - Unix socket protocol and client library.
//!
//! Objects are addressed by path. The manager object answers device queries;
//! each device object is published at its own path while its device is
//! registered.

pub mod client;
pub mod error;
pub mod events;
pub mod messages;
pub mod objects;
pub mod server;

pub use client::IpcClient;
pub use error::{IpcError, IpcResult};
pub use events::{DeviceAddedData, DeviceRemovedData, Event, EventType, InUseChangedData};
pub use messages::{ErrorInfo, Method, Request, Response};
pub use objects::ObjectServer;
pub use server::{IncomingRequest, IpcServer};

use std::path::PathBuf;

/// Get the default socket path.
///
/// Uses `$XDG_RUNTIME_DIR/fprint/manager.sock` or falls back to
/// `/run/user/$UID/fprint/manager.sock`.
#[must_use]
#[allow(unsafe_code)] // libc::getuid() is safe to call
pub fn socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("fprint/manager.sock")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/run/user/{uid}/fprint/manager.sock"))
    }
}
