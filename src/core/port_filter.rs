//! USB port filters
//!
//! A filter is a list of [`DeviceIdentifier`]s with OR semantics. Native
//! backends apply it to listed [`PortDescriptor`]s; stream backends hand the
//! translated [`UsbFilter`]s to the permission prompt.

use crate::core::transport::{LinkError, LinkResult, PortDescriptor, UsbFilter};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Vendor, optional product and optional manufacturer substring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentifier {
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id; any product when `None`
    #[serde(default)]
    pub product_id: Option<u16>,
    /// Case-insensitive substring of the reported manufacturer
    #[serde(default)]
    pub manufacturer: Option<String>,
}

impl DeviceIdentifier {
    /// Match every product of a vendor
    pub fn vendor(vendor_id: u16) -> Self {
        Self {
            vendor_id,
            product_id: None,
            manufacturer: None,
        }
    }

    /// Match one vendor/product pair
    pub fn product(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id: Some(product_id),
            manufacturer: None,
        }
    }

    /// Also require the manufacturer to contain `manufacturer`
    #[must_use]
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Whether `port` is this device
    pub fn matches(&self, port: &PortDescriptor) -> bool {
        if !id_matches(port.vendor_id.as_deref(), self.vendor_id) {
            return false;
        }

        if let Some(product_id) = self.product_id {
            if !id_matches(port.product_id.as_deref(), product_id) {
                return false;
            }
        }

        if let Some(wanted) = &self.manufacturer {
            let wanted = wanted.to_lowercase();
            match &port.manufacturer {
                Some(reported) if reported.to_lowercase().contains(&wanted) => {}
                _ => return false,
            }
        }

        true
    }

    /// Prompt-side filter; the manufacturer does not participate
    pub fn to_usb_filter(&self) -> UsbFilter {
        UsbFilter {
            usb_vendor_id: self.vendor_id,
            usb_product_id: self.product_id,
        }
    }
}

fn id_matches(reported: Option<&str>, wanted: u16) -> bool {
    let Some(reported) = reported else {
        return false;
    };
    let reported = reported.trim().to_lowercase();
    format!("{:0>4}", reported) == format!("{:04x}", wanted)
}

/// Which ports a connection request accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortFilter {
    /// Every port
    Any,
    /// Ports matching at least one identifier
    Devices(Vec<DeviceIdentifier>),
}

impl PortFilter {
    /// Accept every port
    pub fn any() -> Self {
        Self::Any
    }

    /// Accept a single device
    pub fn device(identifier: DeviceIdentifier) -> Self {
        Self::Devices(vec![identifier])
    }

    /// Accept any of `devices`; an empty list is rejected
    pub fn from_devices(devices: Vec<DeviceIdentifier>) -> LinkResult<Self> {
        if devices.is_empty() {
            return Err(LinkError::InvalidConfiguration(
                "port filter needs at least one device".into(),
            ));
        }
        Ok(Self::Devices(devices))
    }

    /// The cartridge programmer itself
    pub fn beggar_socket() -> Self {
        Self::device(DeviceIdentifier::product(0x0483, 0x0721))
    }

    /// Any STMicroelectronics device
    pub fn stm32() -> Self {
        Self::device(DeviceIdentifier::vendor(0x0483))
    }

    /// Arduino boards and the common USB-serial bridges they ship with
    pub fn arduino() -> Self {
        Self::Devices(vec![
            DeviceIdentifier::vendor(0x2341), // Arduino LLC
            DeviceIdentifier::vendor(0x1a86), // CH340
            DeviceIdentifier::vendor(0x0403), // FTDI
        ])
    }

    /// ESP32 boards
    pub fn esp32() -> Self {
        Self::Devices(vec![
            DeviceIdentifier::vendor(0x10c4), // CP210x
            DeviceIdentifier::vendor(0x1a86),
            DeviceIdentifier::vendor(0x0403),
        ])
    }

    /// Whether `port` passes
    pub fn matches(&self, port: &PortDescriptor) -> bool {
        match self {
            Self::Any => true,
            Self::Devices(devices) => devices.iter().any(|d| d.matches(port)),
        }
    }

    /// Ports that pass, in listing order
    pub fn apply(&self, ports: Vec<PortDescriptor>) -> Vec<PortDescriptor> {
        ports.into_iter().filter(|p| self.matches(p)).collect()
    }

    /// Filters for the permission prompt; empty for [`PortFilter::Any`]
    pub fn to_usb_filters(&self) -> Vec<UsbFilter> {
        match self {
            Self::Any => Vec::new(),
            Self::Devices(devices) => devices.iter().map(DeviceIdentifier::to_usb_filter).collect(),
        }
    }
}

impl Default for PortFilter {
    fn default() -> Self {
        Self::beggar_socket()
    }
}

impl FromStr for PortFilter {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "any" | "all" => Ok(Self::any()),
            "beggar-socket" | "programmer" => Ok(Self::beggar_socket()),
            "stm32" => Ok(Self::stm32()),
            "arduino" => Ok(Self::arduino()),
            "esp32" => Ok(Self::esp32()),
            other => Err(LinkError::InvalidConfiguration(format!(
                "unknown port filter: {}",
                other
            ))),
        }
    }
}
