//! Application owner and install directory.

use super::user::UserConfig;
use super::validation::{Validate, Validator};
use super::Merge;
use crate::build::instruction::{Instruction, RunAll};
use crate::build::macros;
use crate::build::phase::{Phase, PhaseCompileable};
use serde::{Deserialize, Serialize};

/// Where shared libraries and dependencies are installed.
pub const LOCAL_LIB_PREFIX: &str = "/opt/lib";

/// The account that owns the application files and the directory they live in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LivesDocument")]
pub struct LivesConfig {
    #[serde(rename = "in")]
    pub dir: String,
    #[serde(flatten)]
    pub user: UserConfig,
}

#[derive(Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LivesDocument {
    #[serde(rename = "in")]
    dir: String,
    #[serde(rename = "as")]
    name: String,
    uid: u32,
    gid: u32,
}

impl From<LivesDocument> for LivesConfig {
    fn from(doc: LivesDocument) -> Self {
        Self { dir: doc.dir, user: UserConfig { name: doc.name, uid: doc.uid, gid: doc.gid } }
    }
}

impl LivesConfig {
    /// The built-in owner: `somebody` (65533:65533) in `/srv/app`.
    pub fn defaults() -> Self {
        Self { dir: "/srv/app".to_string(), user: UserConfig::new("somebody", 65533, 65533) }
    }
}

impl Merge for LivesConfig {
    fn merge(&mut self, other: Self) {
        if !other.dir.is_empty() {
            self.dir = other.dir;
        }

        self.user.merge(other.user);
    }
}

impl PhaseCompileable for LivesConfig {
    fn instructions_for_phase(&self, phase: Phase) -> Vec<Instruction> {
        match phase {
            Phase::Privileged => {
                let mut runs = macros::create_user("$LIVES_AS", "$LIVES_UID", "$LIVES_GID");
                runs.push(macros::create_directory([self.dir.as_str()]));
                runs.push(macros::chown("$LIVES_UID", "$LIVES_GID", &self.dir));
                runs.push(macros::create_directory([LOCAL_LIB_PREFIX]));
                runs.push(macros::chown("$LIVES_UID", "$LIVES_GID", LOCAL_LIB_PREFIX));

                vec![
                    Instruction::string_arg("LIVES_AS", &self.user.name),
                    Instruction::uint_arg("LIVES_UID", self.user.uid),
                    Instruction::uint_arg("LIVES_GID", self.user.gid),
                    Instruction::RunAll(RunAll::new(runs)),
                ]
            }
            Phase::PrivilegeDropped => vec![Instruction::WorkDir(self.dir.clone())],
            _ => Vec::new(),
        }
    }
}

impl Validate for LivesConfig {
    fn validate(&self, v: &mut Validator<'_>) {
        v.field("in", &self.dir, "omitempty,abspath");
        self.user.validate(v);
    }
}
