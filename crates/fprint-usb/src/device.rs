//! Fingerprint sensor detection.

use fprint_core::{DeviceId, SensorHandle};
use tracing::debug;

use crate::error::{UsbError, UsbResult};

/// USB vendors known to ship fingerprint sensors.
pub const KNOWN_SENSOR_VENDORS: &[(u16, &str)] = &[
    (0x045e, "Microsoft"),
    (0x04f3, "Elan"),
    (0x05ba, "DigitalPersona"),
    (0x061a, "Veridicom"),
    (0x06cb, "Synaptics"),
    (0x08ff, "AuthenTec"),
    (0x10a5, "FPC"),
    (0x138a, "Validity"),
    (0x147e, "UPEK"),
    (0x1c7a, "Egis"),
    (0x27c6, "Goodix"),
    (0x2808, "FocalTech"),
];

/// Vendor name for a known sensor vendor id.
#[must_use]
pub fn vendor_name(vendor_id: u16) -> Option<&'static str> {
    KNOWN_SENSOR_VENDORS.iter().find(|(vid, _)| *vid == vendor_id).map(|(_, name)| *name)
}

/// Parse a vendor id written as hex, with or without a `0x` prefix.
///
/// # Errors
/// Returns [`UsbError::InvalidVendorId`] if the string is not a 16-bit hex number.
pub fn parse_vendor_id(s: &str) -> UsbResult<u16> {
    let digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|_| UsbError::InvalidVendorId(s.to_string()))
}

/// A detected sensor.
///
/// One instance exists per physical attachment; the source hands the same
/// instance out on arrival and on departure.
#[derive(Debug)]
pub struct UsbSensor {
    id: DeviceId,
    bus: u8,
    address: u8,
    vendor_id: u16,
    product_id: u16,
    name: String,
}

impl UsbSensor {
    /// Build a sensor from an enumerated USB device, if its vendor is in `vendors`.
    ///
    /// With `read_name` the device is opened to read its product string.
    /// Hotplug callbacks must pass `false`: libusb forbids synchronous
    /// transfers there.
    pub fn probe<T: rusb::UsbContext>(
        id: DeviceId,
        device: &rusb::Device<T>,
        vendors: &[u16],
        read_name: bool,
    ) -> Option<Self> {
        let desc = device.device_descriptor().ok()?;
        if !vendors.contains(&desc.vendor_id()) {
            return None;
        }

        let name = read_name
            .then(|| Self::read_product_name(device, &desc))
            .flatten()
            .unwrap_or_else(|| fallback_name(desc.vendor_id(), desc.product_id()));

        debug!(
            %id,
            bus = device.bus_number(),
            address = device.address(),
            vendor_id = format_args!("{:04x}", desc.vendor_id()),
            product_id = format_args!("{:04x}", desc.product_id()),
            "Fingerprint sensor detected"
        );

        Some(Self::new(
            id,
            (device.bus_number(), device.address()),
            (desc.vendor_id(), desc.product_id()),
            name,
        ))
    }

    pub(crate) fn new(id: DeviceId, location: (u8, u8), ids: (u16, u16), name: String) -> Self {
        let (bus, address) = location;
        let (vendor_id, product_id) = ids;
        Self { id, bus, address, vendor_id, product_id, name }
    }

    /// Whether `device` is a sensor vendor's device, without opening it.
    pub fn matches<T: rusb::UsbContext>(device: &rusb::Device<T>, vendors: &[u16]) -> bool {
        device.device_descriptor().is_ok_and(|desc| vendors.contains(&desc.vendor_id()))
    }

    /// Read the product string. Needs permission to open the device.
    fn read_product_name<T: rusb::UsbContext>(
        device: &rusb::Device<T>,
        desc: &rusb::DeviceDescriptor,
    ) -> Option<String> {
        desc.product_string_index()?;
        let handle = device.open().ok()?;
        handle.read_product_string_ascii(desc).ok()
    }

    /// Bus number and address, unique among attached devices.
    #[must_use]
    pub fn location(&self) -> (u8, u8) {
        (self.bus, self.address)
    }

    #[must_use]
    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    #[must_use]
    pub fn product_id(&self) -> u16 {
        self.product_id
    }
}

impl SensorHandle for UsbSensor {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn fallback_name(vendor_id: u16, product_id: u16) -> String {
    let vendor = vendor_name(vendor_id).unwrap_or("Unknown");
    format!("{vendor} fingerprint sensor ({vendor_id:04x}:{product_id:04x})")
}
