//! Ordered list of language builders.
//!
//! ```yaml
//! builders:
//!   - node: { requirements: [package.json] }
//!   - python: { version: python3, requirements: [requirements.txt] }
//!   - custom: { command: [make, deps] }
//! ```

use super::builder::BuilderConfig;
use super::node::NodeConfig;
use super::php::PhpConfig;
use super::python::PythonConfig;
use super::requirements::RequirementsSpec;
use super::validation::{Validate, Validator};
use super::Merge;
use crate::build::instruction::Instruction;
use crate::build::phase::{Phase, PhaseCompileable};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

const BUILDER_KINDS: &[&str] = &["python", "node", "php", "custom"];

/// One entry of `builders`, keyed by its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderEntry {
    Python(PythonConfig),
    Node(NodeConfig),
    Php(PhpConfig),
    Custom(BuilderConfig),
}

impl BuilderEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Python(_) => "python",
            Self::Node(_) => "node",
            Self::Php(_) => "php",
            Self::Custom(_) => "custom",
        }
    }

    /// Predefined kinds may appear once and merge with their peer.
    pub fn is_predefined(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }

    pub fn requirements(&self) -> Option<&RequirementsSpec> {
        match self {
            Self::Python(c) => c.requirements.as_ref(),
            Self::Node(c) => c.requirements.as_ref(),
            Self::Php(c) => c.requirements.as_ref(),
            Self::Custom(c) => c.requirements.as_ref(),
        }
    }

    /// Merges `other` into `self` when both are the same predefined kind.
    fn merge_peer(&mut self, other: Self) {
        match (self, other) {
            (Self::Python(a), Self::Python(b)) => a.merge(b),
            (Self::Node(a), Self::Node(b)) => a.merge(b),
            (Self::Php(a), Self::Php(b)) => a.merge(b),
            (this, other) => *this = other,
        }
    }
}

impl PhaseCompileable for BuilderEntry {
    fn instructions_for_phase(&self, phase: Phase) -> Vec<Instruction> {
        match self {
            Self::Python(c) => c.instructions_for_phase(phase),
            Self::Node(c) => c.instructions_for_phase(phase),
            Self::Php(c) => c.instructions_for_phase(phase),
            Self::Custom(c) => c.instructions_for_phase(phase),
        }
    }
}

impl Validate for BuilderEntry {
    fn validate(&self, v: &mut Validator<'_>) {
        v.nested(self.kind(), |v| match self {
            Self::Python(c) => c.validate(v),
            Self::Node(c) => c.validate(v),
            Self::Php(c) => c.validate(v),
            Self::Custom(c) => c.validate(v),
        });
    }
}

impl<'de> Deserialize<'de> for BuilderEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = BuilderEntry;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map with exactly one of the keys python, node, php or custom")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let kind: String = map
                    .next_key()?
                    .ok_or_else(|| de::Error::custom("builder entry must declare a kind"))?;

                let entry = match kind.as_str() {
                    "python" => BuilderEntry::Python(map.next_value()?),
                    "node" => BuilderEntry::Node(map.next_value()?),
                    "php" => BuilderEntry::Php(map.next_value()?),
                    "custom" => BuilderEntry::Custom(map.next_value()?),
                    other => return Err(de::Error::unknown_field(other, BUILDER_KINDS)),
                };

                if let Some(extra) = map.next_key::<String>()? {
                    return Err(de::Error::custom(format!(
                        "builder entry declares both \"{}\" and \"{}\"; use one entry per builder",
                        kind, extra
                    )));
                }

                Ok(entry)
            }
        }

        deserializer.deserialize_map(EntryVisitor)
    }
}

/// Builders in the order they install their dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BuildersConfig(pub Vec<BuilderEntry>);

impl<'de> Deserialize<'de> for BuildersConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<BuilderEntry>::deserialize(deserializer)?;

        let mut seen: Vec<&str> = Vec::new();
        for entry in entries.iter().filter(|e| e.is_predefined()) {
            if seen.contains(&entry.kind()) {
                return Err(de::Error::custom(format!(
                    "builders: \"{}\" may only be declared once",
                    entry.kind()
                )));
            }
            seen.push(entry.kind());
        }

        Ok(Self(entries))
    }
}

impl BuildersConfig {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuilderEntry> {
        self.0.iter()
    }
}

impl Merge for BuildersConfig {
    /// Merges each predefined builder of `other` with its peer here, keeping
    /// `other`'s order. Builders without a peer in `other` come first.
    fn merge(&mut self, other: Self) {
        let mut leading = std::mem::take(&mut self.0);
        let mut trailing = Vec::with_capacity(other.0.len());

        for entry in other.0 {
            let peer = if entry.is_predefined() {
                leading.iter().position(|b| b.kind() == entry.kind())
            } else {
                leading.iter().position(|b| b == &entry)
            };

            match peer {
                Some(idx) => {
                    let mut merged = leading.remove(idx);
                    merged.merge_peer(entry);
                    trailing.push(merged);
                }
                None => trailing.push(entry),
            }
        }

        leading.extend(trailing);
        self.0 = leading;
    }
}

impl PhaseCompileable for BuildersConfig {
    fn instructions_for_phase(&self, phase: Phase) -> Vec<Instruction> {
        self.0.iter().flat_map(|b| b.instructions_for_phase(phase)).collect()
    }
}

impl Validate for BuildersConfig {
    fn validate(&self, v: &mut Validator<'_>) {
        v.each("builders", &self.0);
    }
}
