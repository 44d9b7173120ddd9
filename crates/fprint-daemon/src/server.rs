//! Request dispatch for the IPC server.

use fprint_core::{DeviceObject, Error, ErrorDomain, ExportedObject, ObjectPath};
use fprint_ipc::messages::{ErrorInfo, Method, Request};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::manager::Manager;

/// Route a request to the object published at its path.
pub fn handle_request(manager: &Manager, request: &Request) -> Result<Value, ErrorInfo> {
    let Some(object) = manager.objects().get(&request.path) else {
        debug!(path = %request.path, "Request for unknown object");
        return Err(ErrorInfo::unknown_object(&request.path));
    };

    match object {
        ExportedObject::Manager => handle_manager(manager, &request.path, &request.method),
        ExportedObject::Device(device) => {
            handle_device(manager.domain(), device.as_ref(), &request.path, &request.method)
        }
    }
}

fn handle_manager(manager: &Manager, path: &ObjectPath, method: &Method) -> Result<Value, ErrorInfo> {
    let domain = manager.domain();
    match method {
        Method::GetDevices => Ok(json!(manager.get_devices())),

        Method::GetDefaultDevice => manager
            .get_default_device()
            .map(|path| json!(path))
            .map_err(|e| ErrorInfo::from_error(domain, &e)),

        Method::GetState => to_value(domain, &manager.snapshot()),

        _ => Err(ErrorInfo::unknown_method(path, method.name())),
    }
}

fn handle_device(
    domain: &ErrorDomain,
    device: &dyn DeviceObject,
    path: &ObjectPath,
    method: &Method,
) -> Result<Value, ErrorInfo> {
    match method {
        Method::GetProperties => to_value(domain, &device.properties()),

        // Device errors are forwarded unchanged.
        Method::Call { member, args } => {
            device.invoke(member, args).map_err(|e| ErrorInfo::from_error(domain, &e))
        }

        _ => Err(ErrorInfo::unknown_method(path, method.name())),
    }
}

fn to_value(domain: &ErrorDomain, value: &impl Serialize) -> Result<Value, ErrorInfo> {
    serde_json::to_value(value).map_err(|e| ErrorInfo::from_error(domain, &Error::Internal(e.to_string())))
}
