//! Instruction helpers shared by config components.

use super::instruction::{CopyAs, Instruction, Run};

/// Home directory of `user`.
pub fn home(user: &str) -> String {
    if user.is_empty() || user == "root" {
        "/root".to_string()
    } else {
        format!("/home/{}", user)
    }
}

/// Creates a system group and user with the given ids. Ids may be shell
/// variable references.
pub fn create_user(name: &str, uid: &str, gid: &str) -> Vec<Run> {
    vec![
        Run::new("groupadd -o -g %s -r", [gid, name]),
        Run::new("useradd -l -o -m -d %s -r -g %s -u %s", [home(name).as_str(), gid, uid, name]),
    ]
}

pub fn chown(uid: &str, gid: &str, path: &str) -> Run {
    Run::new("chown %s:%s", [uid, gid, path])
}

pub fn create_directory<'a>(paths: impl IntoIterator<Item = &'a str>) -> Run {
    Run::new("mkdir -p", paths)
}

/// Makes every copy in `instructions` owned by `uid:gid`. Other instructions
/// pass through unchanged.
pub fn apply_user(uid: u32, gid: u32, instructions: Vec<Instruction>) -> Vec<Instruction> {
    instructions
        .into_iter()
        .map(|instruction| match instruction {
            Instruction::Copy(_) | Instruction::CopyFrom(_) => {
                Instruction::CopyAs(CopyAs::new(uid, gid, instruction))
            }
            other => other,
        })
        .collect()
}
