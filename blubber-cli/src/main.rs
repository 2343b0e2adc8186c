use blubber_core::BlubberError;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "blubber")]
#[command(
    version,
    about = "Compiles a variant of a blubber config into a build graph or Dockerfile",
    long_about = None
)]
pub struct Cli {
    /// Path to the config (YAML or JSON)
    config: PathBuf,

    /// Variant to compile
    variant: String,

    /// Policy to enforce, as a path, file:// URI or HTTP(S) URL
    #[arg(short, long)]
    policy: Option<String>,

    /// Build argument overrides (KEY=VALUE)
    #[arg(long = "build-arg")]
    build_arg: Vec<String>,

    /// Extra image labels (KEY=VALUE)
    #[arg(long)]
    label: Vec<String>,

    /// Target platform (os/arch[/variant]), defaults to the host
    #[arg(long)]
    platform: Option<String>,

    /// Run the variant's entrypoint as a final build step
    #[arg(long)]
    run_entrypoint: bool,

    /// Argument passed to the entrypoint when running it
    #[arg(long = "entrypoint-arg", allow_hyphen_values = true)]
    entrypoint_arg: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Graph)]
    format: Format,

    /// Write the image config JSON to this file (graph format only)
    #[arg(long)]
    image_config: Option<PathBuf>,

    /// Write the output to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Do not contact registries; base images get an empty config
    #[arg(long)]
    offline: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Build graph definition JSON
    Graph,
    /// Multi-stage Dockerfile
    Dockerfile,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = blubber_core::init_observability(cli.verbose) {
        eprintln!("{} failed to initialize logging: {}", "warning:".yellow().bold(), e);
    }

    match commands::compile(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Exit code for an error; 1 for anything that is not a blubber error.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<BlubberError>()
        .map_or(1, |e| u8::try_from(e.exit_code()).unwrap_or(1))
}
