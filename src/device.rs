//! Balance slots and port selection labels.
//!
//! A port is offered to the operator as a label such as
//! `"USB Serial Port (/dev/ttyUSB0)"`. The functions here turn a chosen label
//! back into the identifier used to open a transport, and derive a display
//! name for balances the operator did not name.

use serde::{Deserialize, Serialize};

/// Suffix appended to a device name to form its log column.
pub const COLUMN_SUFFIX: &str = "_Weight";

/// One port reported by device enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Path or name used to open the port.
    pub identifier: String,
    /// Human-readable description from the OS.
    pub description: String,
}

impl PortInfo {
    /// Creates a port entry.
    pub fn new(identifier: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            description: description.into(),
        }
    }

    /// Selection label. The identifier is appended in parentheses unless the
    /// description already mentions it.
    pub fn label(&self) -> String {
        if self.description.contains(&self.identifier) {
            self.description.clone()
        } else {
            format!("{} ({})", self.description, self.identifier)
        }
    }
}

/// Extract the port identifier from a selection label.
pub fn identifier_from_selection(selection: &str) -> String {
    if selection.contains('(') && selection.contains(')') {
        selection
            .rsplit('(')
            .next()
            .unwrap_or(selection)
            .replace(')', "")
            .trim()
            .to_string()
    } else {
        selection.trim().to_string()
    }
}

/// Derive a display name from a selection label: the description part of
/// `"desc (id)"`, or the whole label otherwise.
pub fn name_from_selection(selection: &str) -> String {
    if selection.contains('(') && selection.contains(')') {
        selection
            .split('(')
            .next()
            .unwrap_or(selection)
            .trim()
            .to_string()
    } else {
        selection.trim().to_string()
    }
}

/// A configured balance: where to reach it and what to call it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Transport identifier (port path).
    pub identifier: String,
    /// Display name used for the log column.
    pub name: String,
}

impl Device {
    /// Creates a device. A blank `name` falls back to the identifier.
    pub fn new(identifier: impl Into<String>, name: Option<&str>) -> Self {
        let identifier = identifier.into();
        let name = match name.map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => identifier.clone(),
        };
        Self { identifier, name }
    }

    /// Creates a device from a selection label and an optional operator name.
    pub fn from_selection(selection: &str, name: Option<&str>) -> Self {
        let identifier = identifier_from_selection(selection);
        let name = match name.map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => name_from_selection(selection),
        };
        Self { identifier, name }
    }

    /// Header cell for this device.
    pub fn column_name(&self) -> String {
        format!("{}{}", self.name, COLUMN_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_appends_identifier_once() {
        let port = PortInfo::new("COM3", "USB Serial Port");
        assert_eq!(port.label(), "USB Serial Port (COM3)");

        let port = PortInfo::new("COM4", "USB Serial Port (COM4)");
        assert_eq!(port.label(), "USB Serial Port (COM4)");
    }

    #[test]
    fn selection_parsing() {
        let label = "USB-Serial Controller (/dev/ttyUSB0)";
        assert_eq!(identifier_from_selection(label), "/dev/ttyUSB0");
        assert_eq!(name_from_selection(label), "USB-Serial Controller");

        assert_eq!(identifier_from_selection("/dev/ttyS1"), "/dev/ttyS1");
        assert_eq!(name_from_selection("/dev/ttyS1"), "/dev/ttyS1");
    }

    #[test]
    fn blank_names_are_derived() {
        let dev = Device::new("/dev/ttyUSB0", Some("  "));
        assert_eq!(dev.name, "/dev/ttyUSB0");

        let dev = Device::from_selection("Balance A (COM5)", None);
        assert_eq!(dev.identifier, "COM5");
        assert_eq!(dev.name, "Balance A");

        let dev = Device::from_selection("Balance A (COM5)", Some(" left "));
        assert_eq!(dev.name, "left");
        assert_eq!(dev.column_name(), "left_Weight");
    }
}
