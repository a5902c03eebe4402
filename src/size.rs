// src/size.rs

//! Human size strings
//!
//! Manifests express image and partition sizes as strings with an optional
//! decimal (`kB`, `MB`, `GB`, `TB`) or binary (`KiB`, `MiB`, `GiB`, `TiB`)
//! unit suffix. A bare number is a byte count.

use regex::Regex;
use serde_json::Value;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Bytes per disk sector, the unit partition sizes are handed over in
pub const SECTOR_SIZE: u64 = 512;

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)(?:\s*(kB|KiB|MB|MiB|GB|GiB|TB|TiB))?$").unwrap()
});

/// Errors while parsing a size
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeError {
    #[error("invalid size value: '{0}'")]
    Invalid(String),
}

/// A size in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(u64);

impl FromStr for ByteSize {
    type Err = SizeError;

    /// Parse size from string (e.g., "2GiB", "512 MB", "8192")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = SIZE_RE
            .captures(s)
            .ok_or_else(|| SizeError::Invalid(s.to_string()))?;

        let (base, power): (u64, u32) = match caps.get(2).map(|m| m.as_str()) {
            None => (1, 1),
            Some("kB") => (1000, 1),
            Some("KiB") => (1024, 1),
            Some("MB") => (1000, 2),
            Some("MiB") => (1024, 2),
            Some("GB") => (1000, 3),
            Some("GiB") => (1024, 3),
            Some("TB") => (1000, 4),
            Some("TiB") => (1024, 4),
            Some(_) => return Err(SizeError::Invalid(s.to_string())),
        };

        let num: u64 = caps[1]
            .parse()
            .map_err(|_| SizeError::Invalid(s.to_string()))?;

        base.checked_pow(power)
            .and_then(|multiplier| num.checked_mul(multiplier))
            .map(Self)
            .ok_or_else(|| SizeError::Invalid(s.to_string()))
    }
}

impl ByteSize {
    pub fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Size in bytes
    pub fn bytes(&self) -> u64 {
        self.0
    }

    /// Size in whole 512-byte sectors, rounded down
    pub fn sectors(&self) -> u64 {
        self.0 / SECTOR_SIZE
    }

    /// Interpret a manifest value as a size.
    ///
    /// Strings go through the unit parser; non-negative integers are taken
    /// as a byte count.
    pub fn from_value(value: &Value) -> Result<Self, SizeError> {
        match value {
            Value::String(s) => s.parse(),
            Value::Number(n) => n
                .as_u64()
                .map(Self)
                .ok_or_else(|| SizeError::Invalid(n.to_string())),
            other => Err(SizeError::Invalid(other.to_string())),
        }
    }
}

impl std::fmt::Display for ByteSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a size string into a byte count
pub fn parse_size(s: &str) -> Result<u64, SizeError> {
    s.parse::<ByteSize>().map(|size| size.bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_size("2kB").unwrap(), 2 * 1000);
        assert_eq!(parse_size("2KiB").unwrap(), 2 * 1024);
        assert_eq!(parse_size("2MB").unwrap(), 2 * 1000 * 1000);
        assert_eq!(parse_size("2MiB").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("2GB").unwrap(), 2 * 1000 * 1000 * 1000);
        assert_eq!(parse_size("2GiB").unwrap(), 2 * 1024u64.pow(3));
        assert_eq!(parse_size("2TB").unwrap(), 2 * 1000u64.pow(4));
        assert_eq!(parse_size("2TiB").unwrap(), 2 * 1024u64.pow(4));
        assert_eq!(parse_size("42").unwrap(), 42);
    }

    #[test]
    fn test_parse_whitespace() {
        assert_eq!(parse_size("  8 MiB").unwrap(), 8 * 1024 * 1024);
        assert!(parse_size("42 ").is_err());
        assert!(parse_size("8MiB ").is_err());
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(
            parse_size("2Kg"),
            Err(SizeError::Invalid("2Kg".to_string()))
        );
        assert!(parse_size("").is_err());
        assert!(parse_size("GiB").is_err());
        assert!(parse_size("2gib").is_err());
        assert!(parse_size("-1").is_err());
        assert!(parse_size("99999999999999999999TiB").is_err());
    }

    #[test]
    fn test_sectors() {
        let size: ByteSize = "1GB".parse().unwrap();
        assert_eq!(size.sectors(), 1_000_000_000 / 512);
        assert_eq!(ByteSize::from_bytes(1023).sectors(), 1);
    }

    #[test]
    fn test_from_value() {
        assert_eq!(ByteSize::from_value(&json!("1KiB")).unwrap().bytes(), 1024);
        assert_eq!(ByteSize::from_value(&json!(4096)).unwrap().bytes(), 4096);
        assert!(ByteSize::from_value(&json!(-5)).is_err());
        assert!(ByteSize::from_value(&json!(true)).is_err());
    }
}
