//! Build phases.

use super::instruction::Instruction;
use std::fmt;

/// A stage of a variant's build. Phases always compile in [`Phase::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// System setup, run as root
    Privileged,
    /// Switch to the application owner
    PrivilegeDropped,
    /// Dependency installation
    PreInstall,
    /// Application files, runtime user and entrypoint
    PostInstall,
}

impl Phase {
    pub const ALL: [Phase; 4] =
        [Phase::Privileged, Phase::PrivilegeDropped, Phase::PreInstall, Phase::PostInstall];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Privileged => "privileged",
            Phase::PrivilegeDropped => "privilege-dropped",
            Phase::PreInstall => "pre-install",
            Phase::PostInstall => "post-install",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that contributes instructions to a build.
pub trait PhaseCompileable {
    /// Instructions for `phase`, in order. Empty when nothing applies.
    fn instructions_for_phase(&self, phase: Phase) -> Vec<Instruction>;
}
