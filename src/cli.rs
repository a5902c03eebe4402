// src/cli.rs
//! CLI definitions for aibuild
//!
//! Command implementations live in the `commands` module.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "aibuild")]
#[command(author = "aibuild Contributors")]
#[command(version)]
#[command(about = "Compile simple image manifests into build variables under a build policy", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Build arguments shared by every command
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Build target (board or platform)
    #[arg(long, default_value = "qemu")]
    pub target: String,

    /// Target architecture
    #[arg(long, default_value = std::env::consts::ARCH)]
    pub arch: String,

    /// Distribution to build
    #[arg(long, default_value = "autosd")]
    pub distro: String,

    /// Build mode (image or package)
    #[arg(long, default_value = "image")]
    pub mode: String,

    /// Policy file restricting what the build may use
    #[arg(long)]
    pub policy: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a simple manifest into build variables
    Compile {
        /// Path to the simple manifest (.aib.yml)
        manifest: PathBuf,

        #[command(flatten)]
        build: BuildArgs,

        /// Directory for generated files
        #[arg(short, long, default_value = ".")]
        workdir: PathBuf,

        /// Enable functional-safety restrictions
        #[arg(long)]
        fusa: bool,

        /// Set a variable (key=value, value parsed as YAML)
        #[arg(long = "define", value_name = "KEY=VALUE")]
        defines: Vec<String>,

        /// Append to a list variable (key=value)
        #[arg(long = "extend-define", value_name = "KEY=VALUE")]
        extend_defines: Vec<String>,

        /// Set variables from a YAML mapping file
        #[arg(long = "define-file", value_name = "PATH")]
        define_files: Vec<PathBuf>,

        /// Print the variables as one JSON object instead of key=value lines
        #[arg(long)]
        json: bool,
    },

    /// Check build arguments (and optionally a manifest) against a policy
    CheckPolicy {
        #[command(flatten)]
        build: BuildArgs,

        /// Repository URLs the build will use
        #[arg(long = "repo", value_name = "URL")]
        repositories: Vec<String>,

        /// Simple manifest to check against the policy's manifest restrictions
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}
