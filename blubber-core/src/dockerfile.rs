//! Renders a variant as a Dockerfile.
//!
//! Every variant the requested one copies from becomes a stage named after
//! it, ahead of the final stage, so that `COPY --from=<variant>` resolves
//! within the same file. A variant that copies from nothing renders as a
//! single unnamed stage.
//!
//! ```text
//! FROM docker.io/library/node:20 AS build
//! ARG LIVES_AS="somebody"
//! ...
//! FROM docker.io/library/node:20-slim AS production
//! COPY --from=build --chown=65533:65533 ["/srv/app","/srv/app"]
//! LABEL blubber.variant="production" blubber.version="0.1.0"
//! ```

use crate::build::instruction::{Copy, Instruction};
use crate::build::options::Options;
use crate::build::phase::{Phase, PhaseCompileable};
use crate::compiler::{VARIANT_LABEL, VERSION, VERSION_LABEL};
use crate::config::{Config, VariantConfig};
use crate::error::{BlubberError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Compiles `variant` and every variant it copies from into a Dockerfile.
///
/// Build argument defaults are taken from `options.build_args` where set,
/// and `options.labels` join the labels on the final stage. Platforms and
/// the run-entrypoint options have no Dockerfile counterpart and are
/// ignored.
///
/// # Returns
/// * `Ok(bytes)` - The Dockerfile, one instruction per line
/// * `Err(BlubberError)` - Expansion or instruction failure
#[instrument(skip(config, options))]
pub fn compile(config: &Config, variant: &str, options: &Options) -> Result<Vec<u8>> {
    let mut config = config.clone();
    let order = config.expand_includes_and_copies(variant)?;
    let multi_stage = order.len() > 1;

    info!(order = ?order, "rendering dockerfile");

    let mut dockerfile = String::new();

    for name in &order {
        let stage = multi_stage.then_some(name.as_str());

        write_stage(&mut dockerfile, stage, config.variant(name)?, options)
            .map_err(|e| BlubberError::compile(name, e))?;
    }

    let mut labels = options.labels.clone();
    labels.insert(VARIANT_LABEL.to_string(), variant.to_string());
    labels.insert(VERSION_LABEL.to_string(), VERSION.to_string());

    write_line(&mut dockerfile, render(&Instruction::Label(labels), options)?);

    Ok(dockerfile.into_bytes())
}

fn write_stage(
    dockerfile: &mut String,
    stage: Option<&str>,
    variant: &VariantConfig,
    options: &Options,
) -> Result<()> {
    let base = if variant.common.is_scratch() { "scratch" } else { variant.common.base.as_str() };

    match stage {
        Some(stage) => write_line(dockerfile, Some(format!("FROM {} AS {}", base, stage))),
        None => write_line(dockerfile, Some(format!("FROM {}", base))),
    }

    for phase in Phase::ALL {
        let instructions = variant.instructions_for_phase(phase);

        debug!(phase = %phase, instructions = instructions.len(), "rendering phase");

        for instruction in &instructions {
            write_line(dockerfile, render(instruction, options)?);
        }
    }

    Ok(())
}

fn write_line(dockerfile: &mut String, line: Option<String>) {
    if let Some(line) = line {
        dockerfile.push_str(&line);
        dockerfile.push('\n');
    }
}

/// Renders one instruction as a Dockerfile line.
///
/// Instructions with nothing to do, such as an empty `RunAll` or `Env`,
/// render as `None`.
pub fn render(instruction: &Instruction, options: &Options) -> Result<Option<String>> {
    render_owned(instruction, None, options)
}

fn render_owned(
    instruction: &Instruction,
    chown: Option<String>,
    options: &Options,
) -> Result<Option<String>> {
    let line = match instruction {
        Instruction::Run(run) => format!("RUN {}", single_line(&run.compile()?)),
        Instruction::RunAll(run_all) if run_all.runs.is_empty() => return Ok(None),
        Instruction::RunAll(run_all) => format!("RUN {}", single_line(&run_all.compile()?)),
        Instruction::Copy(copy) => format!("COPY {}{}", chown_flag(&chown), copy_args(copy)?),
        Instruction::CopyFrom(copy_from) => format!(
            "COPY --from={} {}{}",
            copy_from.from,
            chown_flag(&chown),
            copy_args(&copy_from.copy)?
        ),
        Instruction::CopyAs(copy_as) => {
            let chown = Some(format!("{}:{}", copy_as.uid, copy_as.gid));
            return render_owned(&copy_as.instruction, chown, options);
        }
        Instruction::Env(vars) if vars.is_empty() => return Ok(None),
        Instruction::Env(vars) => format!("ENV {}", pairs(vars)?),
        Instruction::Label(labels) if labels.is_empty() => return Ok(None),
        Instruction::Label(labels) => format!("LABEL {}", pairs(labels)?),
        Instruction::Volume(path) => format!("VOLUME {}", json(&[path])?),
        Instruction::WorkDir(dir) => format!("WORKDIR {}", dir),
        Instruction::User(user) => format!("USER {}", user),
        Instruction::StringArg { name, default } => {
            let value = options.build_args.get(name).unwrap_or(default);
            format!("ARG {}={}", name, json(value)?)
        }
        Instruction::UintArg { name, default } => match options.build_args.get(name) {
            Some(value) => format!("ARG {}={}", name, json(value)?),
            None => format!("ARG {}={}", name, default),
        },
        Instruction::EntryPoint(entrypoint) => format!("ENTRYPOINT {}", json(entrypoint)?),
    };

    Ok(Some(line))
}

fn chown_flag(chown: &Option<String>) -> String {
    chown.as_ref().map(|owner| format!("--chown={} ", owner)).unwrap_or_default()
}

/// Sources then destination, as a JSON array. Several sources need a
/// directory destination.
fn copy_args(copy: &Copy) -> Result<String> {
    let mut destination = copy.destination.clone();

    if copy.sources.len() > 1 && !destination.ends_with('/') {
        destination.push('/');
    }

    let args: Vec<&str> = copy
        .sources
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(destination.as_str()))
        .collect();

    json(&args)
}

fn pairs(vars: &BTreeMap<String, String>) -> Result<String> {
    let pairs = vars
        .iter()
        .map(|(key, value)| Ok(format!("{}={}", key, json(value)?)))
        .collect::<Result<Vec<_>>>()?;

    Ok(pairs.join(" "))
}

fn json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| BlubberError::Marshal { what: "dockerfile".into(), reason: e.to_string() })
}

/// Dockerfile instructions end at a newline; embedded ones are escaped.
fn single_line(command: &str) -> String {
    command.replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::instruction::{CopyAs, CopyFrom, Run, RunAll};
    use crate::config::read_yaml_config;

    fn dockerfile(yaml: &str, variant: &str, options: &Options) -> String {
        let config = read_yaml_config(yaml.as_bytes()).unwrap();
        String::from_utf8(compile(&config, variant, options).unwrap()).unwrap()
    }

    fn line(instruction: Instruction) -> String {
        render(&instruction, &Options::default()).unwrap().unwrap()
    }

    #[test]
    fn test_render_instructions() {
        assert_eq!(line(Instruction::Run(Run::new("echo", ["a\nb"]))), r#"RUN echo "a\nb""#);
        assert_eq!(
            line(Instruction::RunAll(RunAll::new(vec![
                Run::new("mkdir -p", ["/opt/lib"]),
                Run::new("chown %s:%s", ["1", "2", "/opt/lib"]),
            ]))),
            r#"RUN mkdir -p "/opt/lib" && chown "1":"2" "/opt/lib""#
        );
        assert_eq!(
            line(Instruction::env([("NODE_ENV", "production"), ("PATH", "/opt/bin:${PATH}")])),
            r#"ENV NODE_ENV="production" PATH="/opt/bin:${PATH}""#
        );
        assert_eq!(line(Instruction::Volume("/data".into())), r#"VOLUME ["/data"]"#);
        assert_eq!(line(Instruction::WorkDir("/srv/app".into())), "WORKDIR /srv/app");
        assert_eq!(line(Instruction::User("900:900".into())), "USER 900:900");
        assert_eq!(line(Instruction::uint_arg("RUNS_UID", 900)), "ARG RUNS_UID=900");
        assert_eq!(
            line(Instruction::EntryPoint(vec!["node".into(), "server.js".into()])),
            r#"ENTRYPOINT ["node","server.js"]"#
        );
    }

    #[test]
    fn test_render_copies() {
        let sources = vec!["package.json".into(), "package-lock.json".into()];
        let copy = Copy::new(sources, "/opt/lib".into());

        assert_eq!(
            line(Instruction::CopyAs(CopyAs::new(65533, 65533, Instruction::Copy(copy)))),
            r#"COPY --chown=65533:65533 ["package.json","package-lock.json","/opt/lib/"]"#
        );

        let copy_from =
            CopyFrom::new("build", Copy::new(vec!["/srv/app".into()], "/srv/app".into()));
        assert_eq!(
            line(Instruction::CopyFrom(copy_from)),
            r#"COPY --from=build ["/srv/app","/srv/app"]"#
        );
    }

    #[test]
    fn test_render_empty_is_skipped() {
        let options = Options::default();
        assert_eq!(render(&Instruction::RunAll(RunAll::default()), &options).unwrap(), None);
        assert_eq!(render(&Instruction::Env(BTreeMap::new()), &options).unwrap(), None);
    }

    #[test]
    fn test_build_arg_defaults_from_options() {
        let options = Options::default()
            .with_build_arg("LIVES_UID", "1000")
            .with_build_arg("LIVES_AS", "app");

        assert_eq!(
            render(&Instruction::uint_arg("LIVES_UID", 65533), &options).unwrap().unwrap(),
            r#"ARG LIVES_UID="1000""#
        );
        assert_eq!(
            render(&Instruction::string_arg("LIVES_AS", "somebody"), &options).unwrap().unwrap(),
            r#"ARG LIVES_AS="app""#
        );
    }

    #[test]
    fn test_single_stage() {
        let dockerfile = dockerfile(
            concat!(
                "version: v4\nbase: debian:bookworm\n",
                "variants:\n  development:\n    entrypoint: [./run]\n",
            ),
            "development",
            &Options::default(),
        );
        let lines: Vec<&str> = dockerfile.lines().collect();

        assert_eq!(lines[0], "FROM debian:bookworm");
        assert_eq!(lines[1], "USER root");
        assert!(lines.contains(&"WORKDIR /srv/app"));
        assert!(lines.contains(&"USER 900:900"));
        assert_eq!(lines[lines.len() - 2], r#"ENTRYPOINT ["./run"]"#);
        assert_eq!(
            lines[lines.len() - 1],
            format!(r#"LABEL blubber.variant="development" blubber.version="{}""#, VERSION)
        );
        assert_eq!(lines.iter().filter(|l| l.starts_with("FROM")).count(), 1);
    }

    #[test]
    fn test_multi_stage() {
        let dockerfile = dockerfile(
            r#"
version: v4
base: debian:bookworm
variants:
  build:
    builder: { command: [make] }
  production:
    base: debian:bookworm-slim
    copies: [build]
"#,
            "production",
            &Options::default().with_label("team", "infra"),
        );

        let froms: Vec<&str> = dockerfile.lines().filter(|l| l.starts_with("FROM")).collect();
        assert_eq!(
            froms,
            vec!["FROM debian:bookworm AS build", "FROM debian:bookworm-slim AS production"]
        );

        let copy = r#"COPY --from=build --chown=65533:65533"#;
        assert!(dockerfile.contains(&format!(r#"{} ["/srv/app","/srv/app"]"#, copy)));
        assert!(dockerfile.contains(&format!(r#"{} ["/opt/lib","/opt/lib"]"#, copy)));
        assert!(dockerfile.ends_with(&format!(
            "LABEL blubber.variant=\"production\" blubber.version=\"{}\" team=\"infra\"\n",
            VERSION
        )));
    }

    #[test]
    fn test_scratch_stage() {
        let dockerfile = dockerfile(
            concat!(
                "version: v4\nvariants:\n",
                "  build:\n    base: debian:bookworm\n",
                "  release:\n    copies: [build]\n",
            ),
            "release",
            &Options::default(),
        );

        let release: Vec<&str> =
            dockerfile.lines().skip_while(|l| *l != "FROM scratch AS release").collect();
        assert_eq!(release[0], "FROM scratch AS release");
        assert!(!release.iter().any(|l| l.starts_with("USER") || l.starts_with("RUN")));
    }

    #[test]
    fn test_unknown_variant() {
        let config = read_yaml_config(b"version: v4\nvariants:\n  build: {}").unwrap();
        let err = compile(&config, "nope", &Options::default()).unwrap_err();

        assert!(matches!(err, BlubberError::UnknownVariant { .. }));
    }
}
