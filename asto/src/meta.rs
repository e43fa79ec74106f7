//! Object metadata
//!
//! Backends report whatever attributes they can. A missing attribute reads as
//! `None` instead of failing the lookup.

use std::collections::HashMap;
use std::time::SystemTime;

/// Metadata attribute names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Stored length in bytes
    Size,
    Created,
    Modified,
    Accessed,
}

/// Attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaValue {
    Bytes(u64),
    Time(SystemTime),
}

/// Keyed metadata lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meta {
    values: HashMap<Attribute, MetaValue>,
}

impl Meta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; `None` leaves the attribute absent
    #[must_use]
    pub fn with(mut self, attribute: Attribute, value: Option<MetaValue>) -> Self {
        if let Some(value) = value {
            self.values.insert(attribute, value);
        }
        self
    }

    #[must_use]
    pub fn read(&self, attribute: Attribute) -> Option<MetaValue> {
        self.values.get(&attribute).copied()
    }

    #[must_use]
    pub fn size(&self) -> Option<u64> {
        match self.read(Attribute::Size)? {
            MetaValue::Bytes(size) => Some(size),
            MetaValue::Time(_) => None,
        }
    }

    /// Timestamp attribute, `None` if absent or not a timestamp
    #[must_use]
    pub fn time(&self, attribute: Attribute) -> Option<SystemTime> {
        match self.read(attribute)? {
            MetaValue::Time(time) => Some(time),
            MetaValue::Bytes(_) => None,
        }
    }
}
