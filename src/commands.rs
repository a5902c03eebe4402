// src/commands.rs
//! Command implementations for the aibuild CLI

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use aibuild::diagnostics::LogDiagnostics;
use aibuild::manifest::{self, CompileOptions, ManifestCompiler};
use aibuild::pipeline::{self, CompileJob};
use aibuild::policy::{BuildRequest, Policy, PolicyLoader};

use crate::cli::BuildArgs;

/// Variable overrides applied after compilation
pub struct Overrides<'a> {
    pub defines: &'a [String],
    pub extend_defines: &'a [String],
    pub define_files: &'a [PathBuf],
}

fn load_policy(build: &BuildArgs) -> Result<Option<Policy>> {
    let Some(path) = &build.policy else {
        return Ok(None);
    };
    let loader = PolicyLoader::new(&LogDiagnostics)?;
    let policy = loader
        .load(path, &build.target)
        .with_context(|| format!("Failed to load policy {}", path.display()))?;
    Ok(Some(policy))
}

fn build_request<'a>(build: &'a BuildArgs, repositories: &'a [String], simple_manifest: bool) -> BuildRequest<'a> {
    BuildRequest {
        mode: &build.mode,
        target: &build.target,
        distribution: &build.distro,
        architecture: &build.arch,
        repositories,
        simple_manifest,
    }
}

/// Compile a manifest and print the resulting variables
pub fn cmd_compile(
    manifest_path: &Path,
    build: &BuildArgs,
    workdir: &Path,
    fusa: bool,
    overrides: Overrides<'_>,
    json: bool,
) -> Result<()> {
    let mut job = CompileJob::new(
        manifest_path,
        build_request(build, &[], true),
        CompileOptions::new(workdir).with_fusa(fusa),
    );
    job.policy = build.policy.as_deref();
    job.defines = overrides.defines;
    job.define_files = overrides.define_files;
    job.extend_defines = overrides.extend_defines;

    let defines = pipeline::run(&job, &LogDiagnostics)
        .with_context(|| format!("Failed to compile {}", manifest_path.display()))?;

    info!("Compiled {} variables", defines.len());
    if json {
        println!("{}", serde_json::to_string_pretty(&defines)?);
    } else {
        for arg in defines.to_define_args() {
            println!("{}", arg);
        }
    }
    Ok(())
}

/// Check build arguments and, optionally, a manifest against a policy
pub fn cmd_check_policy(build: &BuildArgs, repositories: &[String], manifest_path: Option<&Path>) -> Result<()> {
    let policy = load_policy(build)?.context("--policy is required for check-policy")?;

    policy.check_build(&build_request(build, repositories, manifest_path.is_some()))?;

    if let Some(path) = manifest_path {
        let workdir = std::env::temp_dir();
        let compiler = ManifestCompiler::new(CompileOptions::new(workdir), &LogDiagnostics)?;
        let mut document = manifest::load_document(path)?;
        compiler.validate(&mut document, path)?;

        let errors = policy.validate_manifest(&document);
        if !errors.is_empty() {
            anyhow::bail!("{}", manifest::ManifestError::Policy(errors));
        }
    }

    println!(
        "Policy '{}' accepts the build for target {}",
        policy.name(),
        policy.target()
    );
    Ok(())
}
