//! USB enumeration and hotplug source.
//!
//! libusb delivers hotplug callbacks from whichever thread runs its event
//! handling, so a dedicated thread drives `handle_events` and forwards
//! arrivals and departures over a channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use fprint_core::{DeviceId, DeviceSource, HotplugEvent, SensorHandle, SourceError};
use parking_lot::Mutex;
use rusb::UsbContext;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::device::UsbSensor;
use crate::error::{UsbError, UsbResult};

/// How long one `handle_events` call may block before the stop flag is rechecked.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// State shared between the source and its hotplug callback.
struct Shared {
    vendors: Vec<u16>,
    next_id: AtomicU32,
    /// Attached sensors by (bus, address)
    attached: Mutex<HashMap<(u8, u8), Arc<UsbSensor>>>,
    running: AtomicBool,
}

impl Shared {
    fn new(vendors: Vec<u16>) -> Self {
        Self {
            vendors,
            next_id: AtomicU32::new(0),
            attached: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    fn allocate_id(&self) -> DeviceId {
        DeviceId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Record a sensor at `location` unless one is already attached there.
    ///
    /// An id is only allocated for a new location. `make` builds the sensor
    /// and may decline it.
    fn arrive(
        &self,
        location: (u8, u8),
        make: impl FnOnce(DeviceId) -> Option<UsbSensor>,
    ) -> Option<Arc<UsbSensor>> {
        let mut attached = self.attached.lock();
        if attached.contains_key(&location) {
            return None;
        }

        let sensor = Arc::new(make(self.allocate_id())?);
        attached.insert(location, Arc::clone(&sensor));
        Some(sensor)
    }

    /// Forget the sensor at `location`, returning the instance handed out on arrival.
    fn leave(&self, location: (u8, u8)) -> Option<Arc<UsbSensor>> {
        self.attached.lock().remove(&location)
    }
}

/// Enumerates fingerprint sensors on the USB bus.
pub struct UsbSource {
    context: rusb::Context,
    shared: Arc<Shared>,
    registration: Option<rusb::Registration<rusb::Context>>,
    event_thread: Option<JoinHandle<()>>,
}

impl UsbSource {
    /// Create a source matching devices from `vendors`.
    ///
    /// # Errors
    /// Returns an error if libusb cannot be initialised.
    pub fn new(vendors: Vec<u16>) -> UsbResult<Self> {
        let context = rusb::Context::new()?;
        info!(vendors = vendors.len(), hotplug = rusb::has_hotplug(), "USB source initialised");

        Ok(Self {
            context,
            shared: Arc::new(Shared::new(vendors)),
            registration: None,
            event_thread: None,
        })
    }

    fn start_hotplug(&mut self, tx: mpsc::UnboundedSender<HotplugEvent>) -> UsbResult<()> {
        if !rusb::has_hotplug() {
            return Err(UsbError::HotplugUnsupported);
        }

        let watcher: Box<dyn rusb::Hotplug<rusb::Context>> =
            Box::new(Watcher { shared: Arc::clone(&self.shared), tx });
        let registration = rusb::HotplugBuilder::new().enumerate(false).register(&self.context, watcher)?;
        self.registration = Some(registration);

        self.shared.running.store(true, Ordering::SeqCst);
        let context = self.context.clone();
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new().name("fprint-usb-events".into()).spawn(move || {
            debug!("USB event thread started");
            while shared.running.load(Ordering::SeqCst) {
                if let Err(e) = context.handle_events(Some(EVENT_POLL_INTERVAL)) {
                    warn!(error = %e, "libusb event handling failed, hotplug stopped");
                    break;
                }
            }
            debug!("USB event thread exiting");
        })?;
        self.event_thread = Some(handle);

        Ok(())
    }

    fn enumerate_present(&self) -> UsbResult<Vec<Arc<dyn SensorHandle>>> {
        let mut found: Vec<Arc<dyn SensorHandle>> = Vec::new();

        for device in self.context.devices()?.iter() {
            if !UsbSensor::matches(&device, &self.shared.vendors) {
                continue;
            }
            let location = (device.bus_number(), device.address());

            // Skipped when a hotplug arrival already reported it.
            if let Some(sensor) = self
                .shared
                .arrive(location, |id| UsbSensor::probe(id, &device, &self.shared.vendors, true))
            {
                found.push(sensor);
            }
        }

        info!(count = found.len(), "Enumerated present sensors");
        Ok(found)
    }
}

impl DeviceSource for UsbSource {
    fn subscribe(&mut self, tx: mpsc::UnboundedSender<HotplugEvent>) -> Result<(), SourceError> {
        match self.start_hotplug(tx) {
            Ok(()) => Ok(()),
            Err(UsbError::HotplugUnsupported) => {
                warn!("libusb lacks hotplug support; only devices present at startup will be managed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn enumerate(&mut self) -> Result<Vec<Arc<dyn SensorHandle>>, SourceError> {
        Ok(self.enumerate_present()?)
    }

    fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        // The event thread sees the stop flag within one poll interval.
        self.registration.take();
        if let Some(handle) = self.event_thread.take()
            && handle.join().is_err()
        {
            warn!("USB event thread panicked");
        }
        debug!("USB source stopped");
    }
}

impl Drop for UsbSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// libusb hotplug callback.
struct Watcher {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<HotplugEvent>,
}

impl rusb::Hotplug<rusb::Context> for Watcher {
    fn device_arrived(&mut self, device: rusb::Device<rusb::Context>) {
        if !UsbSensor::matches(&device, &self.shared.vendors) {
            return;
        }
        let location = (device.bus_number(), device.address());
        let shared = &self.shared;
        let Some(sensor) = shared.arrive(location, |id| UsbSensor::probe(id, &device, &shared.vendors, false))
        else {
            return;
        };

        debug!(id = %sensor.id(), bus = location.0, address = location.1, "Sensor plugged in");
        let _ = self.tx.send(HotplugEvent::Appeared(sensor));
    }

    fn device_left(&mut self, device: rusb::Device<rusb::Context>) {
        let location = (device.bus_number(), device.address());
        let Some(sensor) = self.shared.leave(location) else {
            return;
        };

        debug!(id = %sensor.id(), bus = location.0, address = location.1, "Sensor unplugged");
        let _ = self.tx.send(HotplugEvent::Vanished(sensor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor(id: DeviceId) -> Option<UsbSensor> {
        Some(UsbSensor::new(id, (1, 4), (0x06cb, 0x00bd), "Synaptics sensor".into()))
    }

    #[test]
    fn test_ids_increase_per_arrival() {
        let shared = Shared::new(vec![0x06cb]);

        let first = shared.arrive((1, 4), sensor).unwrap();
        let second = shared.arrive((1, 5), sensor).unwrap();
        shared.leave((1, 4));
        let third = shared.arrive((1, 4), sensor).unwrap();

        assert_eq!(first.id(), DeviceId(0));
        assert_eq!(second.id(), DeviceId(1));
        assert_eq!(third.id(), DeviceId(2));
    }

    #[test]
    fn test_duplicate_arrival_is_ignored() {
        let shared = Shared::new(vec![0x06cb]);
        let first = shared.arrive((1, 4), sensor).unwrap();

        assert!(shared.arrive((1, 4), |_| panic!("sensor built twice")).is_none());

        let next = shared.arrive((2, 1), sensor).unwrap();
        assert_eq!(next.id(), DeviceId(1));
        assert!(Arc::ptr_eq(&shared.attached.lock()[&(1, 4)], &first));
    }

    #[test]
    fn test_declined_arrival_is_not_recorded() {
        let shared = Shared::new(vec![0x06cb]);

        assert!(shared.arrive((1, 4), |_| None).is_none());

        assert!(shared.attached.lock().is_empty());
        assert!(shared.arrive((1, 4), sensor).is_some());
    }

    #[test]
    fn test_departure_returns_arrival_instance() {
        let shared = Shared::new(vec![0x06cb]);
        let arrived = shared.arrive((1, 4), sensor).unwrap();

        let left = shared.leave((1, 4)).unwrap();

        assert!(Arc::ptr_eq(&arrived, &left));
        assert!(shared.leave((1, 4)).is_none());
    }

    #[test]
    fn test_unknown_departure_is_ignored() {
        let shared = Shared::new(vec![0x06cb]);
        shared.arrive((1, 4), sensor).unwrap();

        assert!(shared.leave((3, 9)).is_none());
        assert_eq!(shared.attached.lock().len(), 1);
    }
}
