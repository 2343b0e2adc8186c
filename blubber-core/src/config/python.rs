//! Python dependency installation with pip or poetry.

use super::flag::Flag;
use super::requirements::RequirementsSpec;
use super::validation::{Validate, Validator};
use super::Merge;
use crate::build::instruction::{Instruction, Run, RunAll};
use crate::build::macros;
use crate::build::phase::{Phase, PhaseCompileable};
use serde::{Deserialize, Serialize};

/// Where wheels are built.
pub const PYTHON_LIB_PREFIX: &str = "/opt/lib/python";
/// Where wheels are installed.
pub const PYTHON_SITE_PACKAGES: &str = "/opt/lib/python/site-packages";
pub const PYTHON_SITE_BIN: &str = "/opt/lib/python/site-packages/bin";
/// Where poetry keeps its virtualenvs.
pub const POETRY_VIRTUALENVS_PATH: &str = "/opt/lib/poetry";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoetryConfig {
    pub version: String,
    pub devel: Flag,
}

impl Merge for PoetryConfig {
    fn merge(&mut self, other: Self) {
        if !other.version.is_empty() {
            self.version = other.version;
        }

        self.devel.merge(other.devel);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PythonConfig {
    /// Python binary used to install dependencies
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<RequirementsSpec>,
    #[serde(rename = "use-system-flag")]
    pub use_system_flag: Flag,
    pub poetry: PoetryConfig,
}

impl PythonConfig {
    /// The interpreter to invoke, `python` unless configured.
    pub fn python(&self) -> &str {
        if self.version.is_empty() {
            "python"
        } else {
            &self.version
        }
    }

    fn has_requirements(&self) -> bool {
        self.requirements.as_ref().is_some_and(|r| !r.is_empty())
    }

    fn uses_poetry(&self) -> bool {
        !self.poetry.version.is_empty()
    }

    fn is_enabled(&self) -> bool {
        !self.version.is_empty() || self.has_requirements()
    }

    fn requirements_args(&self) -> Vec<String> {
        self.requirements
            .iter()
            .flat_map(|r| r.destination_paths("."))
            .flat_map(|path| ["-r".to_string(), path])
            .collect()
    }

    fn privileged(&self) -> Vec<Instruction> {
        let mut runs = vec![
            Run::new(self.python(), ["-m", "easy_install", "pip"]),
            Run::new(self.python(), ["-m", "pip", "install", "-U", "setuptools", "wheel", "tox"]),
        ];

        if self.uses_poetry() {
            runs.push(Run::new(
                self.python(),
                vec![
                    "-m".to_string(),
                    "pip".to_string(),
                    "install".to_string(),
                    "-U".to_string(),
                    format!("poetry{}", self.poetry.version),
                ],
            ));
        }

        vec![Instruction::RunAll(RunAll::new(runs))]
    }

    fn pre_install(&self, requirements: &RequirementsSpec) -> Vec<Instruction> {
        if self.uses_poetry() {
            let mut instructions =
                vec![Instruction::env([("POETRY_VIRTUALENVS_PATH", POETRY_VIRTUALENVS_PATH)])];
            instructions.extend(requirements.copy_instructions("."));

            let mut args = vec!["--no-root"];
            if !self.poetry.devel.is_true() {
                args.push("--no-dev");
            }
            instructions
                .push(Instruction::RunAll(RunAll::new(vec![Run::new("poetry install", args)])));

            return instructions;
        }

        let mut instructions = vec![
            Instruction::env([
                ("PIP_WHEEL_DIR", PYTHON_LIB_PREFIX.to_string()),
                ("PIP_FIND_LINKS", format!("file://{}", PYTHON_LIB_PREFIX)),
            ]),
            Instruction::RunAll(RunAll::new(vec![macros::create_directory([PYTHON_LIB_PREFIX])])),
        ];
        instructions.extend(requirements.copy_instructions("."));

        let args = self.requirements_args();

        let mut wheel = vec!["-m".to_string(), "pip".to_string(), "wheel".to_string()];
        wheel.extend(args.iter().cloned());

        let mut install = vec!["-m".to_string(), "pip".to_string(), "install".to_string()];
        if self.use_system_flag.is_true() {
            install.push("--system".to_string());
        }
        install.push("--target".to_string());
        install.push(PYTHON_SITE_PACKAGES.to_string());
        install.extend(args);

        instructions.push(Instruction::RunAll(RunAll::new(vec![
            Run::new(self.python(), wheel),
            Run::new(self.python(), install),
        ])));

        instructions
    }

    fn post_install(&self) -> Vec<Instruction> {
        let mut env = vec![
            ("PYTHONPATH", PYTHON_SITE_PACKAGES.to_string()),
            ("PATH", format!("{}:${{PATH}}", PYTHON_SITE_BIN)),
        ];

        if self.has_requirements() {
            env.push(("PIP_NO_INDEX", "1".to_string()));
        }

        vec![Instruction::env(env)]
    }
}

impl Merge for PythonConfig {
    fn merge(&mut self, other: Self) {
        if !other.version.is_empty() {
            self.version = other.version;
        }

        if other.requirements.is_some() {
            self.requirements = other.requirements;
        }

        self.use_system_flag.merge(other.use_system_flag);
        self.poetry.merge(other.poetry);
    }
}

impl PhaseCompileable for PythonConfig {
    fn instructions_for_phase(&self, phase: Phase) -> Vec<Instruction> {
        if !self.is_enabled() {
            return Vec::new();
        }

        match (phase, &self.requirements) {
            (Phase::Privileged, _) => self.privileged(),
            (Phase::PreInstall, Some(requirements)) if !requirements.is_empty() => {
                self.pre_install(requirements)
            }
            (Phase::PostInstall, _) => self.post_install(),
            _ => Vec::new(),
        }
    }
}

impl Validate for PythonConfig {
    fn validate(&self, v: &mut Validator<'_>) {
        if let Some(requirements) = &self.requirements {
            requirements.validate(v);
        }

        v.nested("poetry", |v| v.field("version", &self.poetry.version, "omitempty,pypkgver"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::instruction::Copy;

    fn with_requirements() -> PythonConfig {
        PythonConfig {
            version: "python3".into(),
            requirements: Some(RequirementsSpec::from_short([
                "requirements.txt",
                "requirements-test.txt",
                "docs/requirements.txt",
            ])),
            ..Default::default()
        }
    }

    fn compile_run_all(instruction: &Instruction) -> String {
        let Instruction::RunAll(run_all) = instruction else {
            panic!("expected RunAll, got {:?}", instruction);
        };
        run_all.compile().unwrap()
    }

    #[test]
    fn test_disabled_without_version_or_requirements() {
        let python = PythonConfig::default();

        for phase in Phase::ALL {
            assert!(python.instructions_for_phase(phase).is_empty());
        }
    }

    #[test]
    fn test_privileged_upgrades_tooling() {
        let instructions = with_requirements().instructions_for_phase(Phase::Privileged);

        assert_eq!(
            compile_run_all(&instructions[0]),
            concat!(
                r#"python3 "-m" "easy_install" "pip" && "#,
                r#"python3 "-m" "pip" "install" "-U" "setuptools" "wheel" "tox""#
            )
        );
    }

    #[test]
    fn test_pre_install_builds_wheels() {
        let instructions = with_requirements().instructions_for_phase(Phase::PreInstall);

        assert_eq!(
            instructions[0],
            Instruction::env([
                ("PIP_WHEEL_DIR", "/opt/lib/python"),
                ("PIP_FIND_LINKS", "file:///opt/lib/python"),
            ])
        );
        assert_eq!(compile_run_all(&instructions[1]), r#"mkdir -p "/opt/lib/python""#);
        assert_eq!(
            instructions[2],
            Instruction::Copy(Copy::new(
                vec!["requirements.txt".into(), "requirements-test.txt".into()],
                "./".into()
            ))
        );
        assert_eq!(
            instructions[3],
            Instruction::Copy(Copy::new(vec!["docs/requirements.txt".into()], "docs/".into()))
        );
        assert_eq!(
            compile_run_all(&instructions[4]),
            concat!(
                r#"python3 "-m" "pip" "wheel" "-r" "requirements.txt" "#,
                r#""-r" "requirements-test.txt" "-r" "docs/requirements.txt" && "#,
                r#"python3 "-m" "pip" "install" "--target" "/opt/lib/python/site-packages" "#,
                r#""-r" "requirements.txt" "-r" "requirements-test.txt" "#,
                r#""-r" "docs/requirements.txt""#
            )
        );
    }

    #[test]
    fn test_use_system_flag() {
        let python = PythonConfig { use_system_flag: Flag::new(true), ..with_requirements() };
        let instructions = python.instructions_for_phase(Phase::PreInstall);

        assert!(compile_run_all(&instructions[4])
            .contains(r#"python3 "-m" "pip" "install" "--system" "--target""#));
    }

    #[test]
    fn test_poetry_replaces_pip_wheel() {
        let python = PythonConfig {
            poetry: PoetryConfig { version: "==1.1.7".into(), devel: Flag::unset() },
            ..with_requirements()
        };

        let privileged = python.instructions_for_phase(Phase::Privileged);
        assert!(compile_run_all(&privileged[0]).ends_with(r#""-U" "poetry==1.1.7""#));

        let pre_install = python.instructions_for_phase(Phase::PreInstall);
        assert_eq!(
            pre_install[0],
            Instruction::env([("POETRY_VIRTUALENVS_PATH", "/opt/lib/poetry")])
        );
        assert_eq!(
            compile_run_all(pre_install.last().unwrap()),
            r#"poetry install "--no-root" "--no-dev""#
        );

        let devel = PythonConfig {
            poetry: PoetryConfig { version: "==1.1.7".into(), devel: Flag::new(true) },
            ..with_requirements()
        };
        let pre_install = devel.instructions_for_phase(Phase::PreInstall);
        assert_eq!(compile_run_all(pre_install.last().unwrap()), r#"poetry install "--no-root""#);
    }

    #[test]
    fn test_post_install_env() {
        assert_eq!(
            with_requirements().instructions_for_phase(Phase::PostInstall),
            vec![Instruction::env([
                ("PATH", "/opt/lib/python/site-packages/bin:${PATH}"),
                ("PIP_NO_INDEX", "1"),
                ("PYTHONPATH", "/opt/lib/python/site-packages"),
            ])]
        );
    }

    #[test]
    fn test_default_interpreter() {
        let python = PythonConfig {
            requirements: Some(RequirementsSpec::from_short(["requirements.txt"])),
            ..Default::default()
        };
        assert_eq!(python.python(), "python");
    }
}
