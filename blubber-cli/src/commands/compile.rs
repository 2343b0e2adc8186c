//! Reads a config, enforces policy and compiles the requested variant into
//! a build graph or a Dockerfile.

use crate::{Cli, Format};
use anyhow::{Context, Result};
use blubber_core::build::{ImageMetaResolver, OfflineResolver, Options, Platform, RegistryResolver};
use blubber_core::{dockerfile, parse_yaml_config, BlubberError, Compiler, Policy};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Compiles the variant named on the command line.
///
/// The policy sees the requested variant expanded against the root config
/// and its includes, and it sees it before field validation, so that a
/// policy violation is reported as such even when the config is also
/// invalid.
pub async fn compile(cli: &Cli) -> Result<()> {
    let data = tokio::fs::read(&cli.config)
        .await
        .map_err(|e| BlubberError::Io { path: cli.config.clone(), source: e })?;

    let config = parse_yaml_config(&data)?;

    if let Some(uri) = &cli.policy {
        let policy = Policy::load(uri).await?;
        policy.enforce(&config, &cli.variant)?;
        info!(uri = %uri, "config satisfies policy");
    }

    config.validate_all()?;

    let options = options(cli)?;

    let output = match cli.format {
        Format::Graph => {
            let resolver: Arc<dyn ImageMetaResolver> = if cli.offline {
                Arc::new(OfflineResolver)
            } else {
                Arc::new(RegistryResolver::new())
            };

            let target = Compiler::new(resolver).compile(&config, &cli.variant, &options).await?;
            let (mut graph, image_config) = target.marshal()?;

            if let Some(path) = &cli.image_config {
                tokio::fs::write(path, &image_config)
                    .await
                    .with_context(|| format!("Failed to write image config: {}", path.display()))?;
            }

            graph.push(b'\n');
            graph
        }
        Format::Dockerfile => {
            if cli.image_config.is_some() {
                return Err(BlubberError::InvalidOption {
                    option: "image-config".into(),
                    reason: "only the graph format produces an image config".into(),
                }
                .into());
            }

            dockerfile::compile(&config, &cli.variant, &options)?
        }
    };

    match &cli.output {
        Some(path) => tokio::fs::write(path, &output)
            .await
            .with_context(|| format!("Failed to write output: {}", path.display()))?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&output).await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}

fn options(cli: &Cli) -> Result<Options> {
    let mut options = Options {
        build_args: parse_pairs("build-arg", &cli.build_arg)?,
        labels: parse_pairs("label", &cli.label)?,
        run_entrypoint: cli.run_entrypoint,
        entrypoint_args: cli.entrypoint_arg.clone(),
        ..Options::default()
    };

    if let Some(platform) = &cli.platform {
        options.target_platform = platform.parse::<Platform>()?;
    }

    Ok(options)
}

/// Parses repeated `KEY=VALUE` flags.
fn parse_pairs(option: &str, pairs: &[String]) -> Result<BTreeMap<String, String>, BlubberError> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(BlubberError::InvalidOption {
                option: option.to_string(),
                reason: format!("{:?} is not of the form KEY=VALUE", pair),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs("label", &["a=1".into(), "b=x=y".into()]).unwrap();
        assert_eq!(pairs["a"], "1");
        assert_eq!(pairs["b"], "x=y");

        assert!(parse_pairs("label", &["novalue".into()]).is_err());
        assert!(parse_pairs("label", &["=1".into()]).is_err());
    }

    #[test]
    fn test_options_from_cli() {
        let cli = Cli::parse_from([
            "blubber",
            "blubber.yaml",
            "test",
            "--build-arg",
            "RUNS_UID=1000",
            "--platform",
            "linux/arm64",
            "--run-entrypoint",
        ]);

        let options = options(&cli).unwrap();
        assert_eq!(options.build_args["RUNS_UID"], "1000");
        assert_eq!(options.target_platform, Platform::new("linux", "arm64"));
        assert!(options.run_entrypoint);
    }

    #[tokio::test]
    async fn test_policy_checked_before_validation() {
        let mut malformed = tempfile::NamedTempFile::new().unwrap();
        malformed.write_all(b"version: v4\nbogus: true\n").unwrap();

        let mut valid = tempfile::NamedTempFile::new().unwrap();
        valid
            .write_all(
                concat!(
                    "version: v4\nbase: debian:bookworm\n",
                    "variants:\n  production:\n    runs: {as: root}\n",
                )
                .as_bytes(),
            )
            .unwrap();

        let mut policy = tempfile::NamedTempFile::new().unwrap();
        policy
            .write_all(b"enforcements:\n  - {path: variants.production.runs.as, rule: ne=root}\n")
            .unwrap();

        let cli = Cli::parse_from([
            "blubber".to_string(),
            valid.path().display().to_string(),
            "production".to_string(),
            "--offline".to_string(),
            "--policy".to_string(),
            policy.path().display().to_string(),
        ]);

        let err = compile(&cli).await.unwrap_err();
        assert_eq!(crate::exit_code(&err), 6);

        let cli = Cli::parse_from([
            "blubber".to_string(),
            malformed.path().display().to_string(),
            "production".to_string(),
        ]);
        let err = compile(&cli).await.unwrap_err();
        assert_eq!(crate::exit_code(&err), 2);
    }

    #[tokio::test]
    async fn test_compile_dockerfile() {
        let mut config = tempfile::NamedTempFile::new().unwrap();
        config
            .write_all(
                concat!(
                    "version: v4\nbase: debian:bookworm\n",
                    "variants:\n  build: {}\n  production:\n    copies: [build]\n",
                )
                .as_bytes(),
            )
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("Dockerfile");

        let args = |extra: &[&str]| {
            let mut args = vec![
                "blubber".to_string(),
                config.path().display().to_string(),
                "production".to_string(),
                "--format".to_string(),
                "dockerfile".to_string(),
                "--output".to_string(),
                output.display().to_string(),
            ];
            args.extend(extra.iter().map(|a| a.to_string()));
            Cli::parse_from(args)
        };

        compile(&args(&[])).await.unwrap();

        let dockerfile = std::fs::read_to_string(&output).unwrap();
        assert!(dockerfile.starts_with("FROM debian:bookworm AS build\n"));
        assert!(dockerfile.contains("FROM debian:bookworm AS production\n"));
        assert!(dockerfile.contains("LABEL blubber.variant=\"production\""));

        let err = compile(&args(&["--image-config", "image.json"])).await.unwrap_err();
        assert_eq!(crate::exit_code(&err), 3);
    }

    #[tokio::test]
    async fn test_compile_offline_writes_outputs() {
        let mut config = tempfile::NamedTempFile::new().unwrap();
        config
            .write_all(
                concat!(
                    "version: v4\nbase: debian:bookworm\n",
                    "variants:\n  production:\n    entrypoint: [./server]\n",
                )
                .as_bytes(),
            )
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let graph_path = dir.path().join("graph.json");
        let image_path = dir.path().join("image.json");

        let cli = Cli::parse_from([
            "blubber".to_string(),
            config.path().display().to_string(),
            "production".to_string(),
            "--offline".to_string(),
            "--output".to_string(),
            graph_path.display().to_string(),
            "--image-config".to_string(),
            image_path.display().to_string(),
        ]);

        compile(&cli).await.unwrap();

        let image: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&image_path).unwrap()).unwrap();
        assert_eq!(image["config"]["Entrypoint"], serde_json::json!(["./server"]));
        assert_eq!(image["config"]["Labels"]["blubber.variant"], "production");

        let graph: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&graph_path).unwrap()).unwrap();
        assert!(graph["head"].is_string());
    }
}
