// src/manifest/variables.rs

//! Build variables ("defines")
//!
//! The flat, ordered key/value map produced by compilation and consumed by the
//! build-description generator. Empty lists and maps are never stored: an
//! unset variable is absent, not empty.

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from define overrides
#[derive(Debug, Error)]
pub enum DefineError {
    #[error("Invalid value passed to {option}: '{value}': should be key=value")]
    InvalidOption { option: String, value: String },

    #[error("Invalid yaml define file '{}': {message}", .path.display())]
    DefineFile { path: PathBuf, message: String },
}

/// Ordered build-variable map
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BuildVariables {
    values: Map<String, Value>,
}

impl BuildVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, unless `value` is an empty list or map
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let value = value.into();
        let empty = match &value {
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if !empty {
            self.values.insert(key.into(), value);
        }
    }

    /// Copy `src[src_key]` into `key`, falling back to `default` when absent
    pub fn set_from(
        &mut self,
        key: impl Into<String>,
        src: &Map<String, Value>,
        src_key: &str,
        default: Option<Value>,
    ) {
        match src.get(src_key) {
            Some(value) => self.set(key, value.clone()),
            None => {
                if let Some(default) = default {
                    self.set(key, default);
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String value of `key`, if it is a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Apply a `key=value` override; the value is parsed as YAML
    pub fn apply_define(&mut self, define: &str) -> Result<(), DefineError> {
        let (key, value) = parse_define(define, "--define")?;
        self.values.insert(key, value);
        Ok(())
    }

    /// Append a `key=value` override to a list variable.
    ///
    /// Scalars on either side are promoted to one-element lists.
    pub fn extend_define(&mut self, define: &str) -> Result<(), DefineError> {
        let (key, value) = parse_define(define, "--extend-define")?;
        let extra = match value {
            Value::Array(items) => items,
            other => vec![other],
        };

        let entry = self
            .values
            .entry(key)
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(items) => items.extend(extra),
            existing => {
                let mut items = vec![existing.take()];
                items.extend(extra);
                *existing = Value::Array(items);
            }
        }
        Ok(())
    }

    /// Merge every entry of a YAML mapping file
    pub fn merge_define_file(&mut self, path: &Path) -> Result<(), DefineError> {
        let define_file_error = |message: String| DefineError::DefineFile {
            path: path.to_path_buf(),
            message,
        };

        let content = std::fs::read_to_string(path).map_err(|e| define_file_error(e.to_string()))?;
        let document: Value =
            serde_yaml::from_str(&content).map_err(|e| define_file_error(e.to_string()))?;
        let Value::Object(map) = document else {
            return Err(define_file_error("Define file must be yaml dict".to_string()));
        };

        for (key, value) in map {
            self.values.insert(key, value);
        }
        Ok(())
    }

    /// Render as sorted `key=<json>` pairs
    pub fn to_define_args(&self) -> Vec<String> {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| format!("{}={}", key, self.values[key.as_str()]))
            .collect()
    }
}

impl IntoIterator for BuildVariables {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

fn parse_define(define: &str, option: &str) -> Result<(String, Value), DefineError> {
    let invalid = |value: &str| DefineError::InvalidOption {
        option: option.to_string(),
        value: value.to_string(),
    };

    let (key, raw) = define.split_once('=').ok_or_else(|| invalid(define))?;
    let value = if raw.is_empty() {
        Value::Null
    } else {
        serde_yaml::from_str(raw).map_err(|_| invalid(raw))?
    };
    Ok((key.to_string(), value))
}
