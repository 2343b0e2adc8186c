//! Tri-state boolean used by config fields that must distinguish unset from false.

use super::Merge;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A boolean that remembers whether it was ever declared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flag(Option<bool>);

impl Flag {
    /// A flag explicitly declared with the given value.
    pub fn new(value: bool) -> Self {
        Self(Some(value))
    }

    /// A flag that was never declared.
    pub fn unset() -> Self {
        Self(None)
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// The effective value; unset reads as false.
    pub fn is_true(&self) -> bool {
        self.0.unwrap_or(false)
    }
}

impl From<bool> for Flag {
    fn from(value: bool) -> Self {
        Self::new(value)
    }
}

impl Merge for Flag {
    fn merge(&mut self, other: Self) {
        if other.is_set() {
            *self = other;
        }
    }
}

impl Serialize for Flag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(self.is_true())
    }
}

impl<'de> Deserialize<'de> for Flag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(Option::<bool>::deserialize(deserializer)?))
    }
}
