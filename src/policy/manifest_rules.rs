// src/policy/manifest_rules.rs

//! Manifest content restrictions
//!
//! `manifest_restrictions` in a policy constrains what a manifest may
//! contain. Both halves are optional:
//!
//! ```yaml
//! manifest_restrictions:
//!   disallow:
//!     properties: [experimental]
//!     values:
//!       image.selinux_mode: [permissive, disabled]
//!       content.container_images[].containers-transport: [docker]
//!   allow:
//!     properties: [name, content.rpms, image]
//!     values:
//!       kernel.loglevel: [0, 1, 2]
//! ```
//!
//! Disallow rules run before allow rules; errors from both are collected.

use serde_json::{Map, Value};

use super::{PolicyError, quoted_list};
use crate::pathexpr::{PathExpression, Resolution};

/// One `values` entry: a path and the listed values
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRule {
    pub path: PathExpression,
    pub values: Vec<Value>,
}

impl ValueRule {
    fn contains(&self, value: &Value) -> bool {
        self.values.iter().any(|v| v == value)
    }

    fn display_values(&self) -> String {
        let items: Vec<String> = self.values.iter().map(display_value).collect();
        quoted_list(&items)
    }
}

/// Disallow half of `manifest_restrictions`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisallowRules {
    pub properties: Vec<PathExpression>,
    pub values: Vec<ValueRule>,
}

/// Allow half of `manifest_restrictions`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllowRules {
    /// `None` when no property allow-list is given (all properties allowed)
    pub properties: Option<Vec<String>>,
    pub values: Vec<ValueRule>,
}

/// Parsed `manifest_restrictions` section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestRestrictions {
    pub disallow: Option<DisallowRules>,
    pub allow: Option<AllowRules>,
}

impl ManifestRestrictions {
    /// Parse the section; every path is checked here so evaluation cannot fail
    pub fn from_section(section: &Map<String, Value>) -> Result<Self, PolicyError> {
        let disallow = match section.get("disallow").and_then(Value::as_object) {
            Some(rules) => Some(DisallowRules {
                properties: string_items(rules.get("properties"))
                    .iter()
                    .map(|p| parse_path(p))
                    .collect::<Result<_, _>>()?,
                values: value_rules(rules.get("values"))?,
            }),
            None => None,
        };

        let allow = match section.get("allow").and_then(Value::as_object) {
            Some(rules) => Some(AllowRules {
                properties: rules.get("properties").map(|p| string_items(Some(p))),
                values: value_rules(rules.get("values"))?,
            }),
            None => None,
        };

        Ok(Self { disallow, allow })
    }

    pub fn is_empty(&self) -> bool {
        self.disallow.is_none() && self.allow.is_none()
    }

    /// Check a manifest, returning one message per violation
    pub fn evaluate(&self, policy: &str, manifest: &Value) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(disallow) = &self.disallow {
            for path in &disallow.properties {
                if path.exists(manifest) {
                    errors.push(format!(
                        "Policy '{}': forbidden property '{}' found in manifest",
                        policy, path
                    ));
                }
            }
            for rule in &disallow.values {
                check_values(policy, manifest, rule, Membership::Forbidden, &mut errors);
            }
        }

        if let Some(allow) = &self.allow {
            if let Some(allowed) = &allow.properties {
                if let Some(root) = manifest.as_object() {
                    walk_allowed(policy, root, "", allowed, &mut errors);
                }
            }
            for rule in &allow.values {
                check_values(policy, manifest, rule, Membership::Required, &mut errors);
            }
        }

        errors
    }
}

#[derive(Clone, Copy)]
enum Membership {
    Forbidden,
    Required,
}

fn check_values(
    policy: &str,
    manifest: &Value,
    rule: &ValueRule,
    membership: Membership,
    errors: &mut Vec<String>,
) {
    let violates = |value: &Value| match membership {
        Membership::Forbidden => rule.contains(value),
        Membership::Required => !rule.contains(value),
    };

    let describe = |element: Option<usize>, value: &Value| {
        let location = match element {
            Some(i) => format!("'{}' (element {})", rule.path, i),
            None => format!("'{}'", rule.path),
        };
        match membership {
            Membership::Forbidden => format!(
                "Policy '{}': property {} has forbidden value '{}'",
                policy,
                location,
                display_value(value)
            ),
            Membership::Required => format!(
                "Policy '{}': property {} has value '{}' which is not in allowed list {}",
                policy,
                location,
                display_value(value),
                rule.display_values()
            ),
        }
    };

    match rule.path.resolve(manifest) {
        Resolution::Single(Some(value)) => {
            if violates(value) {
                errors.push(describe(None, value));
            }
        }
        Resolution::Single(None) => {}
        Resolution::Each(values) => {
            for (i, value) in values.into_iter().enumerate() {
                if let Some(value) = value
                    && violates(value)
                {
                    errors.push(describe(Some(i), value));
                }
            }
        }
    }
}

/// Whether `path` is allow-listed itself or sits below an allow-listed path
fn is_allowed(path: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|entry| {
        path == entry
            || path
                .strip_prefix(entry.as_str())
                .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
    })
}

/// Depth-first allow-list walk.
///
/// A rejected scalar gets one error. A rejected mapping gets one error only if
/// nothing below it is allow-listed, and is then skipped; otherwise its
/// children are checked one by one.
fn walk_allowed(
    policy: &str,
    obj: &Map<String, Value>,
    prefix: &str,
    allowed: &[String],
    errors: &mut Vec<String>,
) {
    for (key, value) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        // An allowed entry also covers its sequence elements (`entry[i]`),
        // not just `entry.` descendants. See "Open question decisions" in DESIGN.md.
        if !is_allowed(&path, allowed) {
            let has_allowed_descendant = || {
                let below = format!("{}.", path);
                allowed.iter().any(|entry| entry.starts_with(&below))
            };
            if !value.is_object() || !has_allowed_descendant() {
                errors.push(format!(
                    "Policy '{}': property '{}' is not in allowed list",
                    policy, path
                ));
                continue;
            }
        }

        match value {
            Value::Object(child) => walk_allowed(policy, child, &path, allowed, errors),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if let Value::Object(child) = item {
                        walk_allowed(policy, child, &format!("{}[{}]", path, i), allowed, errors);
                    }
                }
            }
            _ => {}
        }
    }
}

fn parse_path(path: &str) -> Result<PathExpression, PolicyError> {
    PathExpression::parse(path).map_err(|source| PolicyError::InvalidPath {
        path: path.to_string(),
        source,
    })
}

fn string_items(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().map(display_value).collect())
        .unwrap_or_default()
}

fn value_rules(value: Option<&Value>) -> Result<Vec<ValueRule>, PolicyError> {
    let Some(map) = value.and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    map.iter()
        .map(|(path, values)| {
            Ok(ValueRule {
                path: parse_path(path)?,
                values: values.as_array().cloned().unwrap_or_default(),
            })
        })
        .collect()
}

/// Render a value the way it appears in a manifest (strings unquoted)
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
