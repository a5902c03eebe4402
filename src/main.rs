// src/main.rs

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            manifest,
            build,
            workdir,
            fusa,
            defines,
            extend_defines,
            define_files,
            json,
        } => commands::cmd_compile(
            &manifest,
            &build,
            &workdir,
            fusa,
            commands::Overrides {
                defines: &defines,
                extend_defines: &extend_defines,
                define_files: &define_files,
            },
            json,
        ),
        Commands::CheckPolicy {
            build,
            repositories,
            manifest,
        } => commands::cmd_check_policy(&build, &repositories, manifest.as_deref()),
    }
}
