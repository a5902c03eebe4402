// src/manifest/extra_include.rs

//! Embedded file content
//!
//! Files added by a manifest are embedded into the build description as
//! numbered inputs. The embedding mechanism can only deliver each input into
//! one fixed staging location, so every file takes two copy steps:
//!
//! 1. copy-in: embedded input `inlinefile<N>` → `tree:///image_content_<N>`
//!    (collected here, in the `extra-image-content` pipeline)
//! 2. copy-out: `input://extra/image_content_<N>` → final destination
//!    (returned to the caller, which stores it in `simple_copy`)
//!
//! One generator is shared by the root and QM partitions so ids never repeat.

use serde_json::{Map, Value, json};
use std::path::{Component, Path, PathBuf};

/// Where an embedded file's content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    Text(String),
    Url(String),
    /// Local file, relative paths are taken from the manifest directory
    Path(PathBuf),
}

impl FileSource {
    /// Read the source of an `add_files` entry
    pub fn from_entry(entry: &Map<String, Value>) -> Option<Self> {
        if let Some(text) = entry.get("text").and_then(Value::as_str) {
            return Some(Self::Text(text.to_string()));
        }
        if let Some(url) = entry.get("url").and_then(Value::as_str) {
            return Some(Self::Url(url.to_string()));
        }
        entry
            .get("source_path")
            .and_then(Value::as_str)
            .map(|path| Self::Path(PathBuf::from(path)))
    }
}

/// A registered file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedContentRef {
    pub id: u32,
    pub source: FileSource,
    pub destination: String,
}

/// Collects embedded inputs and copy steps for one compilation
#[derive(Debug, Clone)]
pub struct ExtraIncludeGenerator {
    basedir: PathBuf,
    next_id: u32,
    inputs: Map<String, Value>,
    paths: Vec<Value>,
    files: Vec<EmbeddedContentRef>,
}

impl ExtraIncludeGenerator {
    pub fn new(manifest_dir: &Path) -> Self {
        let basedir = std::path::absolute(manifest_dir).unwrap_or_else(|_| manifest_dir.to_path_buf());
        Self {
            basedir: normalize_path(&basedir),
            next_id: 1,
            inputs: Map::new(),
            paths: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Register a file; returns the copy-out step for its destination
    pub fn add_file_copy(&mut self, source: FileSource, destination: &str) -> Value {
        let id = self.next_id;
        self.next_id += 1;

        let content_id = format!("image_content_id_{}", id);
        let mut embed = Map::new();
        embed.insert("id".to_string(), Value::String(content_id.clone()));
        match &source {
            FileSource::Text(text) => {
                embed.insert("text".to_string(), Value::String(text.clone()));
            }
            FileSource::Url(url) => {
                embed.insert("url".to_string(), Value::String(url.clone()));
            }
            FileSource::Path(path) => {
                let resolved = if path.is_absolute() {
                    path.clone()
                } else {
                    normalize_path(&self.basedir.join(path))
                };
                embed.insert(
                    "path".to_string(),
                    Value::String(resolved.to_string_lossy().into_owned()),
                );
            }
        }

        self.inputs.insert(
            format!("inlinefile{}", id),
            json!({
                "type": "org.osbuild.files",
                "origin": "org.osbuild.source",
                "mpp-embed": embed,
            }),
        );
        self.paths.push(json!({
            "from": {
                "mpp-format-string": format!("input://inlinefile{}/{{embedded['{}']}}", id, content_id)
            },
            "to": format!("tree:///image_content_{}", id),
        }));
        self.files.push(EmbeddedContentRef {
            id,
            source,
            destination: destination.to_string(),
        });

        json!({
            "from": format!("input://extra/image_content_{}", id),
            "to": format!("tree://{}", destination),
        })
    }

    /// Files registered so far, in id order
    pub fn files(&self) -> &[EmbeddedContentRef] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The extra include document
    pub fn generate(&self) -> Value {
        let pipelines = if self.inputs.is_empty() {
            Vec::new()
        } else {
            vec![json!({
                "name": "extra-image-content",
                "stages": [{
                    "type": "org.osbuild.copy",
                    "inputs": self.inputs,
                    "options": {"paths": self.paths},
                }],
            })]
        };

        json!({"version": "2", "pipelines": pipelines})
    }
}

/// Lexically normalize a path (`.` dropped, `..` folded)
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let mut generator = ExtraIncludeGenerator::new(Path::new("/manifests"));
        let first = generator.add_file_copy(FileSource::Text("hello".to_string()), "/etc/motd");
        let second = generator.add_file_copy(FileSource::Url("https://x/y".to_string()), "/etc/y");

        assert_eq!(
            first,
            json!({"from": "input://extra/image_content_1", "to": "tree:///etc/motd"})
        );
        assert_eq!(second["from"], "input://extra/image_content_2");
        let ids: Vec<u32> = generator.files().iter().map(|f| f.id).collect();
        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn test_generate_document() {
        let mut generator = ExtraIncludeGenerator::new(Path::new("/manifests"));
        generator.add_file_copy(FileSource::Text("hello".to_string()), "/etc/motd");
        let doc = generator.generate();

        assert_eq!(doc["version"], "2");
        let stage = &doc["pipelines"][0]["stages"][0];
        assert_eq!(doc["pipelines"][0]["name"], "extra-image-content");
        assert_eq!(stage["type"], "org.osbuild.copy");
        assert_eq!(
            stage["inputs"]["inlinefile1"],
            json!({
                "type": "org.osbuild.files",
                "origin": "org.osbuild.source",
                "mpp-embed": {"id": "image_content_id_1", "text": "hello"}
            })
        );
        assert_eq!(
            stage["options"]["paths"][0],
            json!({
                "from": {"mpp-format-string": "input://inlinefile1/{embedded['image_content_id_1']}"},
                "to": "tree:///image_content_1"
            })
        );
    }

    #[test]
    fn test_empty_generator() {
        let generator = ExtraIncludeGenerator::new(Path::new("/manifests"));
        assert!(generator.is_empty());
        assert_eq!(generator.generate(), json!({"version": "2", "pipelines": []}));
    }

    #[test]
    fn test_relative_source_path_resolved() {
        let mut generator = ExtraIncludeGenerator::new(Path::new("/manifests/demo"));
        generator.add_file_copy(FileSource::Path(PathBuf::from("../files/./a.conf")), "/etc/a.conf");
        generator.add_file_copy(FileSource::Path(PathBuf::from("/abs/b.conf")), "/etc/b.conf");

        let doc = generator.generate();
        let inputs = &doc["pipelines"][0]["stages"][0]["inputs"];
        assert_eq!(inputs["inlinefile1"]["mpp-embed"]["path"], "/manifests/files/a.conf");
        assert_eq!(inputs["inlinefile2"]["mpp-embed"]["path"], "/abs/b.conf");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_path(Path::new("a/../../b")), PathBuf::from("../b"));
    }
}
