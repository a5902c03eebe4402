// src/manifest/contents.rs

//! Content compilation for the root and QM partitions
//!
//! Both partitions describe their content with the same `content` syntax
//! (repositories, rpms, container images, file operations, systemd units).
//! The QM partition writes every variable under a rewritten key so the two
//! never collide: `use_X` becomes `use_qm_X`, anything else gets a `qm_`
//! prefix.

use serde_json::{Map, Value, json};
use std::path::Path;

use super::ManifestError;
use super::extra_include::{ExtraIncludeGenerator, FileSource};
use super::glob_files::{self, GlobEntry};
use super::paths::PathOperation;
use super::variables::BuildVariables;
use crate::diagnostics::DiagnosticSink;

const COMPONENT: &str = "content";

/// Package always installed when container images are listed
const CONTAINER_RUNTIME_RPM: &str = "podman";

/// Which partition a content section describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Root,
    Qm,
}

impl Partition {
    /// Variable name for `key` in this partition
    pub fn key(&self, key: &str) -> String {
        match self {
            Self::Root => key.to_string(),
            Self::Qm => match key.strip_prefix("use_") {
                Some(rest) => format!("use_qm_{}", rest),
                None => format!("qm_{}", key),
            },
        }
    }
}

/// Compiles one `content` section into build variables
pub struct ContentCompiler<'a> {
    partition: Partition,
    manifest_dir: &'a Path,
    diagnostics: &'a dyn DiagnosticSink,
}

impl<'a> ContentCompiler<'a> {
    pub fn new(
        partition: Partition,
        manifest_dir: &'a Path,
        diagnostics: &'a dyn DiagnosticSink,
    ) -> Self {
        Self {
            partition,
            manifest_dir,
            diagnostics,
        }
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn compile(
        &self,
        content: &Map<String, Value>,
        extra_include: &mut ExtraIncludeGenerator,
        defines: &mut BuildVariables,
    ) -> Result<(), ManifestError> {
        let add_files = objects(content, "add_files");
        let mut make_dirs: Vec<Value> = list(content, "make_dirs");

        for dir in &make_dirs {
            if let Some(path) = dir.get("path").and_then(Value::as_str) {
                PathOperation::MakeDirs.rules().check(path)?;
            }
        }
        for file in &add_files {
            if let Some(path) = file.get("path").and_then(Value::as_str) {
                PathOperation::AddFiles.rules().check(path)?;
            }
        }

        let mut copies = Vec::new();
        for file in &add_files {
            if let Some(entry) = GlobEntry::from_entry(file) {
                let expansion = glob_files::expand(&entry, self.manifest_dir)?;
                for directory in expansion.directories {
                    let declared = make_dirs
                        .iter()
                        .any(|d| d.get("path").and_then(Value::as_str) == Some(directory.as_str()));
                    if !declared {
                        make_dirs.push(json!({"path": directory, "parents": true}));
                    }
                }
                for file in expansion.files {
                    self.diagnostics.debug(
                        COMPONENT,
                        format!("{} -> {}", file.source.display(), file.destination),
                    );
                    copies.push(extra_include.add_file_copy(FileSource::Path(file.source), &file.destination));
                }
            } else if let (Some(source), Some(path)) = (
                FileSource::from_entry(file),
                file.get("path").and_then(Value::as_str),
            ) {
                copies.push(extra_include.add_file_copy(source, path));
            }
        }
        self.set(defines, "simple_copy", Value::Array(copies));
        self.set(defines, "simple_mkdir", Value::Array(make_dirs));

        self.set(defines, "simple_chmod", keyed_by_path(&objects(content, "chmod_files")));
        self.set(defines, "simple_chown", keyed_by_path(&objects(content, "chown_files")));

        let remove: Vec<Value> = objects(content, "remove_files")
            .iter()
            .filter_map(|f| f.get("path").cloned())
            .collect();
        self.set(defines, "simple_remove", Value::Array(remove));

        let repos = self.substitute_arch(list(content, "repos"), defines);

        let enable_repos = list(content, "enable_repos");
        if enable_repos.iter().any(|r| r == "debug") {
            self.set(defines, "simple_add_debug_repos", Value::Bool(true));
        }
        if enable_repos.iter().any(|r| r == "devel") {
            self.set(defines, "simple_add_devel_repos", Value::Bool(true));
        }

        let containers = list(content, "container_images");
        let mut rpms = list(content, "rpms");
        if !containers.is_empty() {
            rpms.push(Value::String(CONTAINER_RUNTIME_RPM.to_string()));
        }

        self.set(defines, "simple_repos", Value::Array(repos));
        self.set(defines, "simple_rpms", Value::Array(rpms));

        let has_containers = !containers.is_empty();
        self.set(defines, "simple_containers", Value::Array(containers));
        if has_containers {
            self.set(defines, "use_containers_extra_store", Value::Bool(true));
        }

        if let Some(systemd) = content.get("systemd") {
            self.set(defines, "simple_systemd", systemd.clone());
        }
        if let Some(sbom) = content.get("sbom") {
            self.set(defines, "simple_sbom", sbom.clone());
        }

        self.diagnostics.info(
            COMPONENT,
            format!(
                "Compiled {:?} content: {} embedded files",
                self.partition,
                extra_include.files().len()
            ),
        );
        Ok(())
    }

    fn set(&self, defines: &mut BuildVariables, key: &str, value: Value) {
        defines.set(self.partition.key(key), value);
    }

    /// Replace `$arch` in repository base URLs with the build architecture
    fn substitute_arch(&self, mut repos: Vec<Value>, defines: &BuildVariables) -> Vec<Value> {
        let Some(arch) = defines.get_str("arch") else {
            if !repos.is_empty() {
                self.diagnostics.warning(
                    COMPONENT,
                    "No 'arch' define set; repository URLs keep '$arch'".to_string(),
                );
            }
            return repos;
        };

        for repo in repos.iter_mut() {
            if let Some(Value::String(url)) = repo.get_mut("baseurl") {
                *url = url.replace("$arch", arch);
            }
        }
        repos
    }
}

fn list(content: &Map<String, Value>, key: &str) -> Vec<Value> {
    content
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn objects(content: &Map<String, Value>, key: &str) -> Vec<Map<String, Value>> {
    list(content, key)
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

/// `[{path: p, ...rest}]` → `{p: rest}`
fn keyed_by_path(entries: &[Map<String, Value>]) -> Value {
    let mut out = Map::new();
    for entry in entries {
        let Some(path) = entry.get("path").and_then(Value::as_str) else {
            continue;
        };
        let mut rest = entry.clone();
        rest.remove("path");
        out.insert(path.to_string(), Value::Object(rest));
    }
    Value::Object(out)
}
