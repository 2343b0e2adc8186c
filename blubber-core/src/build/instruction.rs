//! Build instructions and their compilation into a target.

use super::graph::Owner;
use super::target::Target;
use crate::error::{BlubberError, Result};
use std::collections::BTreeMap;

/// A shell command built from a `%s` template and its arguments.
///
/// Each placeholder consumes one argument, quoted. Arguments left over are
/// appended, quoted and space separated. `%%` is a literal percent sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub command: String,
    pub arguments: Vec<String>,
}

impl Run {
    pub fn new<S: Into<String>>(
        command: impl Into<String>,
        arguments: impl IntoIterator<Item = S>,
    ) -> Self {
        Self { command: command.into(), arguments: arguments.into_iter().map(Into::into).collect() }
    }

    /// A program run with literal arguments. Percent signs in `program` are
    /// escaped so that it never acts as a template.
    pub fn literal(program: String, arguments: Vec<String>) -> Self {
        Self { command: program.replace('%', "%%"), arguments }
    }

    /// Number of placeholders in the template.
    pub fn placeholders(&self) -> usize {
        self.command.matches('%').count() - 2 * self.command.matches("%%").count()
    }

    /// Renders the shell command line.
    ///
    /// # Returns
    /// * `Err(BlubberError::Instruction)` - The template has more placeholders than arguments
    pub fn compile(&self) -> Result<String> {
        let needed = self.placeholders();

        if needed > self.arguments.len() {
            return Err(BlubberError::Instruction {
                instruction: "run".into(),
                reason: format!(
                    "{:?} expects {} arguments but was given {}",
                    self.command,
                    needed,
                    self.arguments.len()
                ),
            });
        }

        let mut arguments = self.arguments.iter().map(|arg| quote(arg));
        let mut line = String::with_capacity(self.command.len());
        let mut chars = self.command.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                line.push(c);
                continue;
            }

            match chars.next() {
                Some('%') => line.push('%'),
                // any verb consumes an argument
                Some(_) | None => line.push_str(&arguments.next().unwrap_or_default()),
            }
        }

        for extra in arguments {
            line.push(' ');
            line.push_str(&extra);
        }

        Ok(line)
    }
}

/// Several commands run in one shell, joined with `&&`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunAll {
    pub runs: Vec<Run>,
}

impl RunAll {
    pub fn new(runs: Vec<Run>) -> Self {
        Self { runs }
    }

    pub fn compile(&self) -> Result<String> {
        let commands = self.runs.iter().map(Run::compile).collect::<Result<Vec<_>>>()?;
        Ok(commands.join(" && "))
    }
}

/// Files copied from the build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Copy {
    pub sources: Vec<String>,
    pub destination: String,
}

impl Copy {
    pub fn new(sources: Vec<String>, destination: String) -> Self {
        Self { sources, destination }
    }
}

/// Files copied from another variant or an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFrom {
    pub from: String,
    pub copy: Copy,
}

impl CopyFrom {
    pub fn new(from: &str, copy: Copy) -> Self {
        Self { from: from.to_string(), copy }
    }
}

/// A copy whose files are owned by `uid:gid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyAs {
    pub uid: u32,
    pub gid: u32,
    pub instruction: Box<Instruction>,
}

impl CopyAs {
    pub fn new(uid: u32, gid: u32, instruction: Instruction) -> Self {
        Self { uid, gid, instruction: Box::new(instruction) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Run(Run),
    RunAll(RunAll),
    Copy(Copy),
    CopyFrom(CopyFrom),
    CopyAs(CopyAs),
    Env(BTreeMap<String, String>),
    Label(BTreeMap<String, String>),
    Volume(String),
    WorkDir(String),
    User(String),
    /// A build argument with a string default
    StringArg { name: String, default: String },
    /// A build argument with a numeric default
    UintArg { name: String, default: u32 },
    EntryPoint(Vec<String>),
}

impl Instruction {
    pub fn env<K: Into<String>, V: Into<String>>(vars: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::Env(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn label<K: Into<String>, V: Into<String>>(
        labels: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self::Label(labels.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn string_arg(name: &str, default: &str) -> Self {
        Self::StringArg { name: name.to_string(), default: default.to_string() }
    }

    pub fn uint_arg(name: &str, default: u32) -> Self {
        Self::UintArg { name: name.to_string(), default }
    }

    /// Applies this instruction to `target`.
    pub fn compile(&self, target: &mut Target) -> Result<()> {
        self.compile_owned(target, None)
    }

    fn compile_owned(&self, target: &mut Target, owner: Option<Owner>) -> Result<()> {
        match self {
            Self::Run(run) => target.run(run)?,
            Self::RunAll(run_all) => target.run_all(run_all)?,
            Self::Copy(copy) => target.copy_from_client(&copy.sources, &copy.destination, owner),
            Self::CopyFrom(copy_from) => target.copy_from(
                &copy_from.from,
                &copy_from.copy.sources,
                &copy_from.copy.destination,
                owner,
            )?,
            Self::CopyAs(copy_as) => copy_as
                .instruction
                .compile_owned(target, Some(Owner { uid: copy_as.uid, gid: copy_as.gid }))?,
            Self::Env(env) => target.add_env(env),
            Self::Label(labels) => target.add_labels(labels),
            Self::Volume(path) => target.add_volume(path),
            Self::WorkDir(dir) => target.working_directory(dir),
            Self::User(user) => target.user(user),
            Self::StringArg { name, default } => target.expose_build_arg(name, default),
            Self::UintArg { name, default } => target.expose_build_arg(name, &default.to_string()),
            Self::EntryPoint(entrypoint) => target.set_entrypoint(entrypoint),
        }

        Ok(())
    }
}

/// Quotes `arg` for a POSIX shell double-quoted context.
///
/// `$` is left alone so that build argument references such as `$LIVES_UID`
/// are expanded by the shell. Other characters, control characters included,
/// are passed through literally.
fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');

    for c in arg.chars() {
        if matches!(c, '"' | '\\' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }

    quoted.push('"');
    quoted
}
