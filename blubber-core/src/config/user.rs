//! User identity shared by `lives` and `runs`.

use super::validation::{Validate, Validator};
use super::Merge;
use serde::{Deserialize, Serialize};

/// Name and numeric ids of a user account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserConfig {
    #[serde(rename = "as")]
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

impl UserConfig {
    pub fn new(name: &str, uid: u32, gid: u32) -> Self {
        Self { name: name.to_string(), uid, gid }
    }

    /// Home directory the account is created with.
    pub fn home(&self) -> String {
        crate::build::macros::home(&self.name)
    }
}

impl Merge for UserConfig {
    fn merge(&mut self, other: Self) {
        if !other.name.is_empty() {
            self.name = other.name;
        }

        if other.uid != 0 {
            self.uid = other.uid;
        }

        if other.gid != 0 {
            self.gid = other.gid;
        }
    }
}

impl Validate for UserConfig {
    fn validate(&self, v: &mut Validator<'_>) {
        v.field("as", &self.name, "omitempty,username");
    }
}
