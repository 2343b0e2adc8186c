//! Fields shared by the root config and every variant.

use super::apt::AptConfig;
use super::builder::BuilderConfig;
use super::builders::BuildersConfig;
use super::lives::LivesConfig;
use super::node::NodeConfig;
use super::php::PhpConfig;
use super::python::PythonConfig;
use super::runs::RunsConfig;
use super::validation::{Validate, Validator};
use super::Merge;
use crate::build::instruction::Instruction;
use crate::build::phase::{Phase, PhaseCompileable};
use serde::{Deserialize, Serialize};

/// Keys accepted by [`CommonConfig`].
pub const COMMON_KEYS: &[&str] =
    &["base", "apt", "builders", "node", "python", "php", "builder", "lives", "runs", "entrypoint"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommonConfig {
    /// Base image reference; empty for scratch
    pub base: String,
    pub apt: AptConfig,
    pub builders: BuildersConfig,
    pub node: NodeConfig,
    pub python: PythonConfig,
    pub php: PhpConfig,
    pub builder: BuilderConfig,
    pub lives: LivesConfig,
    pub runs: RunsConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
}

impl CommonConfig {
    /// Root defaults applied before user config is merged in.
    pub fn defaults() -> Self {
        Self { lives: LivesConfig::defaults(), runs: RunsConfig::defaults(), ..Default::default() }
    }

    /// A scratch image has no base and gets no component instructions.
    pub fn is_scratch(&self) -> bool {
        self.base.is_empty()
    }

    /// Components in the order they emit instructions within a phase.
    fn components(&self) -> [&dyn PhaseCompileable; 8] {
        [
            &self.apt,
            &self.lives,
            &self.runs,
            &self.builders,
            &self.node,
            &self.php,
            &self.python,
            &self.builder,
        ]
    }

    /// Names of variants whose files the builders copy in.
    pub fn requirement_dependencies(&self) -> Vec<&str> {
        let legacy = [
            self.node.requirements.as_ref(),
            self.python.requirements.as_ref(),
            self.php.requirements.as_ref(),
            self.builder.requirements.as_ref(),
        ];

        self.builders
            .iter()
            .filter_map(|b| b.requirements())
            .chain(legacy.into_iter().flatten())
            .flat_map(|r| r.dependencies())
            .collect()
    }
}

impl Merge for CommonConfig {
    fn merge(&mut self, other: Self) {
        if !other.base.is_empty() {
            self.base = other.base;
        }

        self.apt.merge(other.apt);
        self.builders.merge(other.builders);
        self.node.merge(other.node);
        self.python.merge(other.python);
        self.php.merge(other.php);
        self.builder.merge(other.builder);
        self.lives.merge(other.lives);
        self.runs.merge(other.runs);

        if other.entrypoint.is_some() {
            self.entrypoint = other.entrypoint;
        }
    }
}

impl PhaseCompileable for CommonConfig {
    fn instructions_for_phase(&self, phase: Phase) -> Vec<Instruction> {
        if self.is_scratch() {
            return Vec::new();
        }

        self.components().iter().flat_map(|c| c.instructions_for_phase(phase)).collect()
    }
}

impl Validate for CommonConfig {
    fn validate(&self, v: &mut Validator<'_>) {
        v.with_siblings(self, |v| {
            v.field("base", &self.base, "omitempty,baseimage");
            v.field("builders", &self.builders, "notallowedwith=node python php builder");
        });

        v.nested("apt", |v| self.apt.validate(v));
        self.builders.validate(v);
        v.nested("node", |v| self.node.validate(v));
        v.nested("python", |v| self.python.validate(v));
        v.nested("php", |v| self.php.validate(v));
        v.nested("builder", |v| self.builder.validate(v));
        v.nested("lives", |v| self.lives.validate(v));
        v.nested("runs", |v| self.runs.validate(v));
    }
}
