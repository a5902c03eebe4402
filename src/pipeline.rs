// src/pipeline.rs

//! End-to-end compilation
//!
//! Ties the policy engine and the manifest compiler together the way a build
//! front end uses them: load and resolve the policy for the target, check
//! the build arguments, compile the manifest, then apply variable overrides.

use std::path::{Path, PathBuf};

use crate::Result;
use crate::diagnostics::DiagnosticSink;
use crate::manifest::{BuildVariables, CompileOptions, ManifestCompiler};
use crate::policy::{BuildRequest, PolicyLoader};

/// Everything needed for one compilation
#[derive(Debug, Clone)]
pub struct CompileJob<'a> {
    pub manifest: &'a Path,
    pub request: BuildRequest<'a>,
    pub policy: Option<&'a Path>,
    pub options: CompileOptions,
    /// `key=value` overrides, applied in order after compilation
    pub defines: &'a [String],
    pub define_files: &'a [PathBuf],
    /// `key=value` list extensions, applied last
    pub extend_defines: &'a [String],
}

impl<'a> CompileJob<'a> {
    pub fn new(manifest: &'a Path, request: BuildRequest<'a>, options: CompileOptions) -> Self {
        Self {
            manifest,
            request,
            policy: None,
            options,
            defines: &[],
            define_files: &[],
            extend_defines: &[],
        }
    }

    /// The defines every compilation starts from
    pub fn seed(&self) -> BuildVariables {
        let mut seed = BuildVariables::new();
        seed.set("arch", self.request.architecture);
        seed.set("target", self.request.target);
        seed.set("distro_name", self.request.distribution);
        seed.set("image_mode", self.request.mode);
        let image_type = if self.request.mode == "image" { "ostree" } else { "regular" };
        seed.set("image_type", image_type);
        seed.set("use_fusa", self.options.fusa);
        seed
    }
}

/// Run a compile job end to end
pub fn run(job: &CompileJob<'_>, diagnostics: &dyn DiagnosticSink) -> Result<BuildVariables> {
    let policy = match job.policy {
        Some(path) => {
            let policy = PolicyLoader::new(diagnostics)?.load(path, job.request.target)?;
            policy.check_build(&job.request)?;
            Some(policy)
        }
        None => None,
    };

    let manifest_dir = job.manifest.parent().unwrap_or_else(|| Path::new(""));
    let compiler = ManifestCompiler::new(job.options.clone(), diagnostics)?;
    let mut defines = compiler.compile(job.manifest, manifest_dir, &job.seed(), policy.as_ref())?;

    for define in job.defines {
        defines.apply_define(define)?;
    }
    for path in job.define_files {
        defines.merge_define_file(path)?;
    }
    for define in job.extend_defines {
        defines.extend_define(define)?;
    }
    Ok(defines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::diagnostics::SilentDiagnostics;
    use crate::policy::PolicyError;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn request() -> BuildRequest<'static> {
        BuildRequest {
            mode: "image",
            target: "qemu",
            distribution: "autosd",
            architecture: "aarch64",
            repositories: &[],
            simple_manifest: true,
        }
    }

    #[test]
    fn test_seed() {
        let job = CompileJob::new(Path::new("m.aib.yml"), request(), CompileOptions::new("/w"));
        let seed = job.seed();
        assert_eq!(seed.get_str("arch"), Some("aarch64"));
        assert_eq!(seed.get_str("image_type"), Some("ostree"));
        assert_eq!(seed.get("use_fusa"), Some(&json!(false)));
    }

    #[test]
    fn test_run_with_overrides() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("demo.aib.yml");
        fs::write(&manifest, "name: demo\ncontent:\n  rpms: [bash]\n").unwrap();

        let defines = ["name=other".to_string()];
        let extend = ["simple_rpms=vim".to_string()];
        let mut job = CompileJob::new(&manifest, request(), CompileOptions::new(dir.path()));
        job.defines = &defines;
        job.extend_defines = &extend;

        let vars = run(&job, &SilentDiagnostics).unwrap();
        assert_eq!(vars.get_str("name"), Some("other"));
        assert_eq!(vars.get("simple_rpms"), Some(&json!(["bash", "vim"])));
    }

    #[test]
    fn test_run_rejects_build_args() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("demo.aib.yml");
        fs::write(&manifest, "name: demo\n").unwrap();
        let policy = dir.path().join("policy.yml");
        fs::write(
            &policy,
            "name: arm-only\ndescription: d\nrestrictions:\n  architectures:\n    allow: [x86_64]\n",
        )
        .unwrap();

        let mut job = CompileJob::new(&manifest, request(), CompileOptions::new(dir.path()));
        job.policy = Some(&policy);

        match run(&job, &SilentDiagnostics).unwrap_err() {
            Error::Policy(PolicyError::Violations { errors, .. }) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("architecture 'aarch64'"));
            }
            other => panic!("Expected policy violation, got {:?}", other),
        }
        // Nothing was compiled
        assert!(!dir.path().join("extra-include.ipp.yml").exists());
    }
}
