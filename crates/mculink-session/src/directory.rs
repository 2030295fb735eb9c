//! Register catalog lookups and the sink for device-pushed values.
//!
//! The session never owns the item catalog. It asks an [`ItemDirectory`] for
//! the declared type and permission of an address, and hands decoded report
//! values to a [`ReportSink`].

use std::collections::HashMap;

use std::path::Path;

use mculink_protocol::{RegisterValue, ReportKind, ValueType};
use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// Access rights of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Permission {
    /// Read only.
    #[serde(rename = "R", alias = "ro", alias = "read_only")]
    ReadOnly,
    /// Write only.
    #[serde(rename = "W", alias = "wo", alias = "write_only")]
    WriteOnly,
    /// Read and write.
    #[default]
    #[serde(rename = "RW", alias = "rw", alias = "read_write")]
    ReadWrite,
}

impl Permission {
    /// Whether reads are allowed.
    pub fn is_readable(self) -> bool {
        self != Permission::WriteOnly
    }

    /// Whether writes are allowed.
    pub fn is_writable(self) -> bool {
        self != Permission::ReadOnly
    }
}

/// What the catalog knows about one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ItemInfo {
    /// Declared wire type.
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    /// Access rights.
    #[serde(default)]
    pub permission: Permission,
}

impl ItemInfo {
    /// Create an entry.
    pub fn new(value_type: ValueType, permission: Permission) -> Self {
        ItemInfo {
            value_type,
            permission,
        }
    }
}

/// Address → type/permission lookup supplied by the application.
pub trait ItemDirectory: Send + Sync {
    /// Catalog entry for `address`, if the register exists.
    fn lookup(&self, address: u16) -> Option<ItemInfo>;
}

/// Fixed in-memory directory.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    items: HashMap<u16, ItemInfo>,
}

impl StaticDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, address: u16, info: ItemInfo) {
        self.items.insert(address, info);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, address: u16, value_type: ValueType, permission: Permission) -> Self {
        self.insert(address, ItemInfo::new(value_type, permission));
        self
    }

    /// Parse a YAML catalog mapping addresses to entries:
    ///
    /// ```yaml
    /// 0x1200: { type: uint16_t, permission: RW }
    /// 0x1300: { type: float, permission: R }
    /// ```
    pub fn from_yaml_str(text: &str) -> SessionResult<Self> {
        let items: HashMap<u16, ItemInfo> =
            serde_yaml::from_str(text).map_err(|e| SessionError::Config(e.to_string()))?;
        Ok(StaticDirectory { items })
    }

    /// Load a YAML catalog file.
    pub fn load(path: impl AsRef<Path>) -> SessionResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Number of registers.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the directory has no registers.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ItemDirectory for StaticDirectory {
    fn lookup(&self, address: u16) -> Option<ItemInfo> {
        self.items.get(&address).copied()
    }
}

impl FromIterator<(u16, ItemInfo)> for StaticDirectory {
    fn from_iter<I: IntoIterator<Item = (u16, ItemInfo)>>(iter: I) -> Self {
        StaticDirectory {
            items: iter.into_iter().collect(),
        }
    }
}

/// Receives register values pushed by the device.
pub trait ReportSink: Send + Sync {
    /// Called once per decoded report record.
    fn report_value(&self, kind: ReportKind, address: u16, value: RegisterValue);
}

impl<F> ReportSink for F
where
    F: Fn(ReportKind, u16, RegisterValue) + Send + Sync,
{
    fn report_value(&self, kind: ReportKind, address: u16, value: RegisterValue) {
        self(kind, address, value)
    }
}

/// Sink that drops every value.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardReports;

impl ReportSink for DiscardReports {
    fn report_value(&self, _kind: ReportKind, _address: u16, _value: RegisterValue) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_rules() {
        assert!(Permission::ReadOnly.is_readable());
        assert!(!Permission::ReadOnly.is_writable());
        assert!(!Permission::WriteOnly.is_readable());
        assert!(Permission::ReadWrite.is_writable());
    }

    #[test]
    fn test_static_directory_lookup() {
        let directory = StaticDirectory::new()
            .with(0x1200, ValueType::UInt16, Permission::ReadWrite)
            .with(0x1300, ValueType::Float32, Permission::ReadOnly);
        assert_eq!(directory.len(), 2);
        assert_eq!(
            directory.lookup(0x1300),
            Some(ItemInfo::new(ValueType::Float32, Permission::ReadOnly))
        );
        assert_eq!(directory.lookup(0x9999), None);
    }

    #[test]
    fn test_item_info_deserializes_catalog_names() {
        let info: ItemInfo = serde_yaml::from_str("type: uint8_t\npermission: R\n").unwrap();
        assert_eq!(info, ItemInfo::new(ValueType::UInt8, Permission::ReadOnly));
        let defaulted: ItemInfo = serde_yaml::from_str("{}").unwrap();
        assert_eq!(defaulted, ItemInfo::new(ValueType::Int32, Permission::ReadWrite));
    }

    #[test]
    fn test_catalog_from_yaml() {
        let directory = StaticDirectory::from_yaml_str(
            "0x1200: { type: uint16_t, permission: RW }\n4864: { type: float, permission: R }\n",
        )
        .unwrap();
        assert_eq!(
            directory.lookup(0x1200),
            Some(ItemInfo::new(ValueType::UInt16, Permission::ReadWrite))
        );
        assert_eq!(
            directory.lookup(0x1300),
            Some(ItemInfo::new(ValueType::Float32, Permission::ReadOnly))
        );
        assert!(matches!(
            StaticDirectory::from_yaml_str("0x1200: { type: int64_t }"),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn test_closure_is_a_sink() {
        let seen = parking_lot::Mutex::new(Vec::new());
        let sink = |kind: ReportKind, address: u16, value: RegisterValue| {
            seen.lock().push((kind, address, value));
        };
        sink.report_value(ReportKind::Alarm, 0x10, RegisterValue::Int(3));
        assert_eq!(seen.lock().as_slice(), &[(ReportKind::Alarm, 0x10, RegisterValue::Int(3))]);
    }
}
