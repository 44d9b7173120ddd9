//! Per-device session object.
//!
//! Implements session arbitration only: a client claims the device, which
//! marks it in use, and releases it afterwards. Capture, verify, and enroll
//! are handled by the driver layer and are not exposed here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fprint_core::{
    DeviceId, DeviceObject, DeviceObjectFactory, DeviceProperties, Error, InUseNotifier, Result,
    SensorHandle,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, info};

/// The object published for one sensor.
pub struct SensorObject {
    handle: Arc<dyn SensorHandle>,
    /// User holding the claim
    claimed_by: Mutex<Option<String>>,
    in_use: AtomicBool,
    notifier: InUseNotifier,
}

impl SensorObject {
    #[must_use]
    pub fn new(handle: Arc<dyn SensorHandle>, notifier: InUseNotifier) -> Self {
        Self { handle, claimed_by: Mutex::new(None), in_use: AtomicBool::new(false), notifier }
    }

    fn set_in_use(&self, in_use: bool) {
        self.in_use.store(in_use, Ordering::SeqCst);
        self.notifier.notify();
    }

    fn claim(&self, args: &Value) -> Result<Value> {
        let username = args.get("username").and_then(Value::as_str).unwrap_or_default();
        let mut claimed_by = self.claimed_by.lock();

        if claimed_by.is_some() {
            return Err(Error::AlreadyInUse("Device was already claimed".to_string()));
        }

        *claimed_by = Some(username.to_string());
        drop(claimed_by);
        self.set_in_use(true);

        info!(id = %self.handle.id(), username, "Device claimed");
        Ok(Value::Null)
    }

    fn release(&self) -> Result<Value> {
        let Some(username) = self.claimed_by.lock().take() else {
            return Err(Error::ClaimDevice("Device was not claimed before use".to_string()));
        };
        self.set_in_use(false);

        info!(id = %self.handle.id(), username, "Device released");
        Ok(Value::Null)
    }
}

impl DeviceObject for SensorObject {
    fn id(&self) -> DeviceId {
        self.handle.id()
    }

    fn in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    fn properties(&self) -> DeviceProperties {
        DeviceProperties { name: self.handle.name().to_string(), in_use: self.in_use() }
    }

    fn invoke(&self, member: &str, args: &Value) -> Result<Value> {
        debug!(id = %self.handle.id(), member, "Device method call");
        match member {
            "Claim" => self.claim(args),
            "Release" => self.release(),
            "GetName" => Ok(json!(self.handle.name())),
            _ => Err(Error::Internal(format!("Method '{member}' is not supported by this device"))),
        }
    }
}

/// Creates a [`SensorObject`] for every appearing device.
#[derive(Debug, Default)]
pub struct SensorObjectFactory;

impl DeviceObjectFactory for SensorObjectFactory {
    fn create(&self, handle: Arc<dyn SensorHandle>, notifier: InUseNotifier) -> Arc<dyn DeviceObject> {
        Arc::new(SensorObject::new(handle, notifier))
    }
}
