// src/manifest/mod.rs

//! Manifest compilation
//!
//! Turns a simple image manifest into build variables:
//!
//! 1. parse the YAML document
//! 2. fill in schema defaults and validate against the packaged schema
//!    (plus `noFusa` checks in functional-safety mode)
//! 3. check the manifest against the policy, if one is given
//! 4. run the section handlers, which write into a copy of the seed defines
//! 5. write the extra include document into the work directory and record
//!    its path as `simple_import`
//!
//! Any failure leaves the caller's defines untouched.

pub mod contents;
pub mod extra_include;
pub mod glob_files;
pub mod paths;
pub mod sections;
pub mod variables;

pub use contents::{ContentCompiler, Partition};
pub use extra_include::ExtraIncludeGenerator;
pub use variables::BuildVariables;

use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::diagnostics::DiagnosticSink;
use crate::policy::Policy;
use crate::schema::{PackagedSchema, SchemaDefinitionError};
use crate::size::SizeError;
use paths::PathOperation;

const COMPONENT: &str = "manifest";

/// Default file name of the extra include document
pub const EXTRA_INCLUDE_NAME: &str = "extra-include.ipp.yml";

/// Manifest errors
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Every schema violation, ordered by document path
    #[error("Error parsing {}:\n {}", .path.display(), .errors.join("\n "))]
    SchemaValidation { path: PathBuf, errors: Vec<String> },

    #[error(transparent)]
    SchemaDefinition(#[from] SchemaDefinitionError),

    #[error("Policy validation failed:\n{}", .0.join("\n"))]
    Policy(Vec<String>),

    #[error(
        "Path '{path}' is not allowed for {operation}. Files and directories must be under one of: {allowed}, but not under {disallowed}"
    )]
    InvalidTopLevelPath {
        path: String,
        allowed: String,
        disallowed: String,
        operation: PathOperation,
    },

    #[error("No files matched glob pattern: {0}")]
    NoMatchingFiles(String),

    #[error(
        "Glob pattern '{pattern}' matched {matched} files, but max_files limit is {max_files}. Consider using more specific patterns or increase max_files if needed."
    )]
    TooManyFiles {
        pattern: String,
        matched: usize,
        max_files: usize,
    },

    #[error("Invalid glob pattern '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error(transparent)]
    InvalidSize(#[from] SizeError),

    #[error("{mountpoint} can't be larger than image")]
    InvalidMountSize { mountpoint: &'static str },

    #[error("Invalid relative size for {mountpoint}, must be between 0 and 1")]
    InvalidMountRelSize { mountpoint: &'static str },

    #[error("Failed to write {}: {message}", .path.display())]
    Write { path: PathBuf, message: String },
}

/// Options for one compilation
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Writable directory receiving the extra include document
    pub workdir: PathBuf,
    /// Functional-safety mode: enforce `noFusa` schema annotations
    pub fusa: bool,
    pub extra_include_name: String,
}

impl CompileOptions {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            fusa: false,
            extra_include_name: EXTRA_INCLUDE_NAME.to_string(),
        }
    }

    pub fn with_fusa(mut self, fusa: bool) -> Self {
        self.fusa = fusa;
        self
    }

    pub fn with_extra_include_name(mut self, name: impl Into<String>) -> Self {
        self.extra_include_name = name.into();
        self
    }

    /// Where the extra include document is written
    pub fn extra_include_path(&self) -> PathBuf {
        self.workdir.join(&self.extra_include_name)
    }
}

/// Compiles simple manifests; the packaged schema is compiled once
pub struct ManifestCompiler<'a> {
    schema: PackagedSchema,
    options: CompileOptions,
    diagnostics: &'a dyn DiagnosticSink,
}

impl<'a> ManifestCompiler<'a> {
    pub fn new(options: CompileOptions, diagnostics: &'a dyn DiagnosticSink) -> Result<Self, ManifestError> {
        Ok(Self {
            schema: PackagedSchema::manifest()?,
            options,
            diagnostics,
        })
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile the manifest at `path` on top of `seed`
    pub fn compile(
        &self,
        path: &Path,
        manifest_dir: &Path,
        seed: &BuildVariables,
        policy: Option<&Policy>,
    ) -> Result<BuildVariables, ManifestError> {
        let document = load_document(path)?;
        self.compile_document(document, path, manifest_dir, seed, policy)
    }

    /// Compile an already parsed manifest; `path` is only used in messages
    pub fn compile_document(
        &self,
        mut document: Value,
        path: &Path,
        manifest_dir: &Path,
        seed: &BuildVariables,
        policy: Option<&Policy>,
    ) -> Result<BuildVariables, ManifestError> {
        self.validate(&mut document, path)?;

        if let Some(policy) = policy {
            let errors = policy.validate_manifest(&document);
            if !errors.is_empty() {
                return Err(ManifestError::Policy(errors));
            }
            self.diagnostics.info(
                COMPONENT,
                format!("Manifest {} satisfies policy '{}'", path.display(), policy.name()),
            );
        }

        let mut defines = seed.clone();
        if let Some(policy) = policy {
            policy.apply_defines(&mut defines);
        }

        let empty = serde_json::Map::new();
        let manifest = document.as_object().unwrap_or(&empty);
        let mut extra_include = ExtraIncludeGenerator::new(manifest_dir);

        defines.set_from("name", manifest, "name", None);
        defines.set_from("version", manifest, "version", None);

        ContentCompiler::new(Partition::Root, manifest_dir, self.diagnostics).compile(
            &sections::section(manifest, "content"),
            &mut extra_include,
            &mut defines,
        )?;

        if let Some(qm) = manifest.get("qm").and_then(Value::as_object) {
            let compiler = ContentCompiler::new(Partition::Qm, manifest_dir, self.diagnostics);
            sections::handle_qm(qm, &compiler, &mut extra_include, &mut defines)?;
        }

        sections::handle_network(&sections::section(manifest, "network"), &mut defines);
        sections::handle_auth(&sections::section(manifest, "auth"), &mut defines);
        sections::handle_kernel(&sections::section(manifest, "kernel"), &mut defines);
        sections::handle_image(&sections::section(manifest, "image"), &mut defines)?;
        sections::handle_experimental(&sections::section(manifest, "experimental"), &mut defines);

        let extra_include_path = self.write_extra_include(&extra_include)?;
        defines.set("simple_import", extra_include_path.to_string_lossy().into_owned());

        self.diagnostics.info(
            COMPONENT,
            format!(
                "Compiled {} into {} build variables",
                path.display(),
                defines.len()
            ),
        );
        Ok(defines)
    }

    /// Fill in defaults, then collect every schema (and `noFusa`) violation
    pub fn validate(&self, document: &mut Value, path: &Path) -> Result<(), ManifestError> {
        self.schema.inject_defaults(document);

        let mut violations = self.schema.validate(document);
        if self.options.fusa {
            violations.extend(self.schema.fusa_violations(document));
            violations.sort_by(|a, b| a.path.cmp(&b.path));
        }

        if violations.is_empty() {
            return Ok(());
        }
        for violation in &violations {
            self.diagnostics.debug(COMPONENT, violation.to_string());
        }
        Err(ManifestError::SchemaValidation {
            path: path.to_path_buf(),
            errors: violations.iter().map(ToString::to_string).collect(),
        })
    }

    fn write_extra_include(&self, extra_include: &ExtraIncludeGenerator) -> Result<PathBuf, ManifestError> {
        let path = self.options.extra_include_path();
        let write_error = |message: String| ManifestError::Write {
            path: path.clone(),
            message,
        };

        let content = serde_yaml::to_string(&extra_include.generate()).map_err(|e| write_error(e.to_string()))?;
        std::fs::write(&path, content).map_err(|e| write_error(e.to_string()))?;

        self.diagnostics.debug(
            COMPONENT,
            format!(
                "Wrote {} embedded files to {}",
                extra_include.files().len(),
                path.display()
            ),
        );
        Ok(path)
    }
}

/// Read and parse a manifest file
pub fn load_document(path: &Path) -> Result<Value, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{CollectDiagnostics, SilentDiagnostics};
    use serde_json::json;
    use tempfile::TempDir;

    fn compiler(workdir: &Path, fusa: bool) -> ManifestCompiler<'static> {
        ManifestCompiler::new(CompileOptions::new(workdir).with_fusa(fusa), &SilentDiagnostics).unwrap()
    }

    fn seed() -> BuildVariables {
        let mut seed = BuildVariables::new();
        seed.set("arch", "x86_64");
        seed
    }

    #[test]
    fn test_compile_options() {
        let options = CompileOptions::new("/tmp/work").with_extra_include_name("x.yml");
        assert!(!options.fusa);
        assert_eq!(options.extra_include_path(), PathBuf::from("/tmp/work/x.yml"));
        assert_eq!(
            CompileOptions::new("/w").extra_include_path(),
            PathBuf::from("/w/extra-include.ipp.yml")
        );
    }

    #[test]
    fn test_compile_document_minimal() {
        let work = TempDir::new().unwrap();
        let doc = json!({"name": "minimal", "content": {"rpms": ["bash"]}});
        let defines = compiler(work.path(), false)
            .compile_document(doc, Path::new("minimal.aib.yml"), Path::new("/m"), &seed(), None)
            .unwrap();

        assert_eq!(defines.get_str("name"), Some("minimal"));
        assert_eq!(defines.get("simple_rpms"), Some(&json!(["bash"])));
        assert_eq!(defines.get_str("root_password"), Some(""));
        assert_eq!(defines.get_str("arch"), Some("x86_64"));

        let import = defines.get_str("simple_import").unwrap();
        let written = std::fs::read_to_string(import).unwrap();
        assert!(written.contains("version: '2'") || written.contains("version: \"2\""));
    }

    #[test]
    fn test_schema_errors_are_aggregated() {
        let work = TempDir::new().unwrap();
        let doc = json!({
            "name": "bad",
            "image": {"selinux_mode": "sometimes"},
            "kernel": {"loglevel": 12},
            "bogus": true
        });
        let err = compiler(work.path(), false)
            .compile_document(doc, Path::new("bad.aib.yml"), Path::new("/m"), &seed(), None)
            .unwrap_err();

        match err {
            ManifestError::SchemaValidation { path, errors } => {
                assert_eq!(path, PathBuf::from("bad.aib.yml"));
                assert_eq!(errors.len(), 3);
                // Root first, then /image, then /kernel
                assert!(errors[0].contains("bogus"));
                assert!(errors[1].starts_with("/image/selinux_mode"));
                assert!(errors[2].starts_with("/kernel/loglevel"));
            }
            other => panic!("Expected SchemaValidation, got {:?}", other),
        }
    }

    #[test]
    fn test_fusa_mode() {
        let work = TempDir::new().unwrap();
        let doc = json!({
            "name": "fusa",
            "image": {"selinux_mode": "permissive"},
            "experimental": {"internal_defines": {"x": 1}}
        });

        assert!(compiler(work.path(), false)
            .compile_document(doc.clone(), Path::new("f.aib.yml"), Path::new("/m"), &seed(), None)
            .is_ok());

        let err = compiler(work.path(), true)
            .compile_document(doc, Path::new("f.aib.yml"), Path::new("/m"), &seed(), None)
            .unwrap_err();
        match err {
            ManifestError::SchemaValidation { errors, .. } => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].contains("property 'experimental'"));
                assert!(errors[1].contains("permissive"));
            }
            other => panic!("Expected SchemaValidation, got {:?}", other),
        }
    }

    #[test]
    fn test_glob_defaults_injected() {
        let work = TempDir::new().unwrap();
        let mut doc = json!({
            "content": {"add_files": [{"path": "/etc/app", "source_glob": "*.conf"}]}
        });
        compiler(work.path(), false).validate(&mut doc, Path::new("x")).unwrap();

        let entry = &doc["content"]["add_files"][0];
        assert_eq!(entry["preserve_path"], false);
        assert_eq!(entry["allow_empty"], false);
        assert_eq!(entry["max_files"], 1000);
    }

    #[test]
    fn test_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.aib.yml");
        std::fs::write(&path, "content: [unclosed\n").unwrap();
        let err = compiler(dir.path(), false)
            .compile(&path, dir.path(), &seed(), None)
            .unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
        assert!(err.to_string().starts_with("Error parsing"));
    }

    #[test]
    fn test_diagnostics_recorded() {
        let work = TempDir::new().unwrap();
        let sink = CollectDiagnostics::new();
        let compiler = ManifestCompiler::new(CompileOptions::new(work.path()), &sink).unwrap();
        compiler
            .compile_document(json!({"name": "d"}), Path::new("d.aib.yml"), Path::new("/m"), &seed(), None)
            .unwrap();

        let records = sink.records_for("manifest");
        assert!(records.iter().any(|r| r.message.contains("build variables")));
    }
}
