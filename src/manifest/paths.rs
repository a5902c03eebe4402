// src/manifest/paths.rs

//! Top-level directory rules for file operations
//!
//! Files may only be written below a few top-level directories, and some
//! subtrees are off limits even inside an allowed directory. A denied prefix
//! always wins over an allowed one.

use strum_macros::Display;

use super::ManifestError;

/// Subtrees no file operation may touch
pub const DENIED_PREFIXES: &[&str] = &["/usr/local/"];

/// File operation a path is checked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PathOperation {
    #[strum(serialize = "add_files")]
    AddFiles,
    #[strum(serialize = "make_dirs")]
    MakeDirs,
}

impl PathOperation {
    /// Top-level directories this operation may write under
    pub fn allowed_prefixes(&self) -> &'static [&'static str] {
        match self {
            Self::AddFiles => &["/etc/", "/usr/"],
            Self::MakeDirs => &["/etc/", "/usr/", "/var/"],
        }
    }

    pub fn rules(&self) -> TopLevelPathRules {
        TopLevelPathRules {
            operation: *self,
            allowed: self.allowed_prefixes(),
            denied: DENIED_PREFIXES,
        }
    }
}

/// Allow/deny prefix rules for one operation
#[derive(Debug, Clone, Copy)]
pub struct TopLevelPathRules {
    operation: PathOperation,
    allowed: &'static [&'static str],
    denied: &'static [&'static str],
}

impl TopLevelPathRules {
    pub fn is_allowed(&self, path: &str) -> bool {
        // Prefix checks only hold for paths without `.`, `..` or `//`
        if !is_plain(path) {
            return false;
        }
        if self.denied.iter().any(|prefix| path.starts_with(prefix)) {
            return false;
        }
        self.allowed.iter().any(|prefix| path.starts_with(prefix))
    }

    pub fn check(&self, path: &str) -> Result<(), ManifestError> {
        if self.is_allowed(path) {
            Ok(())
        } else {
            Err(ManifestError::InvalidTopLevelPath {
                path: path.to_string(),
                allowed: self.allowed.join(", "),
                disallowed: self.denied.join(", "),
                operation: self.operation,
            })
        }
    }
}

/// Absolute path with no empty, `.` or `..` segments (a trailing `/` is fine)
fn is_plain(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    rest.split('/').all(|segment| !matches!(segment, "" | "." | ".."))
}
