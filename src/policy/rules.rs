// src/policy/rules.rs

//! Resolved restriction rules
//!
//! A restriction section in a policy document is a loosely shaped mapping
//! (`allow`, `disallow`, `force`, plus `@target` overlays). Once the overlays
//! for the build target are merged in, each section collapses into exactly one
//! `RestrictionRule`.

use serde_json::{Map, Value};
use strum_macros::{Display, EnumIter};

use super::PolicyError;

/// One resolved restriction
#[derive(Debug, Clone, PartialEq)]
pub enum RestrictionRule {
    /// No allow or disallow list was given
    Unrestricted,
    /// Only the listed values are permitted (order kept, duplicates retained)
    Allow(Vec<String>),
    /// The listed values are forbidden
    Disallow(Vec<String>),
    /// Values forced onto the build (variables, sysctl, SELinux booleans)
    Force(Map<String, Value>),
}

impl RestrictionRule {
    /// Collapse a merged restriction section into a rule.
    ///
    /// The section must already be free of `@target` keys.
    pub fn from_section(name: &str, section: &Map<String, Value>) -> Result<Self, PolicyError> {
        let allow = section.get("allow");
        let disallow = section.get("disallow");

        if allow.is_some() && disallow.is_some() {
            return Err(PolicyError::Consistency(format!(
                "Restriction '{}' cannot have both 'allow' and 'disallow' keys",
                name
            )));
        }

        if let Some(force) = section.get("force") {
            let map = force.as_object().cloned().ok_or_else(|| {
                PolicyError::Schema(format!(
                    "Policy validation failed: '{}.force' must be a mapping",
                    name
                ))
            })?;
            return Ok(Self::Force(map));
        }

        match (allow, disallow) {
            (Some(list), None) => Ok(Self::Allow(string_list(name, "allow", list)?)),
            (None, Some(list)) => Ok(Self::Disallow(string_list(name, "disallow", list)?)),
            _ => Ok(Self::Unrestricted),
        }
    }

    /// Check one value against an allow/disallow rule
    pub fn check(&self, value: &str) -> Verdict {
        match self {
            Self::Allow(list) if !list.iter().any(|v| v == value) => Verdict::NotAllowed,
            Self::Disallow(list) if list.iter().any(|v| v == value) => Verdict::Disallowed,
            _ => Verdict::Permitted,
        }
    }

    /// The allow or disallow list, if this is a list rule
    pub fn values(&self) -> &[String] {
        match self {
            Self::Allow(list) | Self::Disallow(list) => list,
            _ => &[],
        }
    }

    pub fn disallowed(&self) -> &[String] {
        match self {
            Self::Disallow(list) => list,
            _ => &[],
        }
    }

    pub fn forced(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Force(map) => Some(map),
            _ => None,
        }
    }
}

/// Outcome of checking a value against a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Permitted,
    NotAllowed,
    Disallowed,
}

/// Build argument dimensions a policy can restrict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum RestrictionDimension {
    Mode,
    Target,
    Distribution,
    Architecture,
    Repository,
}

impl RestrictionDimension {
    /// Name of the restriction section holding this dimension's rule
    pub fn section(&self) -> &'static str {
        match self {
            Self::Mode => "modes",
            Self::Target => "targets",
            Self::Distribution => "distributions",
            Self::Architecture => "architectures",
            Self::Repository => "repositories",
        }
    }
}

fn string_list(name: &str, kind: &str, value: &Value) -> Result<Vec<String>, PolicyError> {
    let items = value.as_array().ok_or_else(|| {
        PolicyError::Schema(format!(
            "Policy validation failed: '{}.{}' must be a list",
            name, kind
        ))
    })?;

    Ok(items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strum::IntoEnumIterator;

    fn section(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_section() {
        let rule = RestrictionRule::from_section("modes", &section(json!({"allow": ["image"]}))).unwrap();
        assert_eq!(rule, RestrictionRule::Allow(vec!["image".to_string()]));

        let rule = RestrictionRule::from_section("rpms", &section(json!({"disallow": ["a", "a"]}))).unwrap();
        assert_eq!(rule.disallowed(), ["a", "a"]);

        let rule = RestrictionRule::from_section("targets", &section(json!({}))).unwrap();
        assert_eq!(rule, RestrictionRule::Unrestricted);

        let rule = RestrictionRule::from_section("sysctl", &section(json!({"force": {"a": 1}}))).unwrap();
        assert_eq!(rule.forced().unwrap()["a"], 1);
    }

    #[test]
    fn test_allow_and_disallow_conflict() {
        let err = RestrictionRule::from_section(
            "targets",
            &section(json!({"allow": ["qemu"], "disallow": ["aws"]})),
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::Consistency(_)));
        assert!(err.to_string().contains("cannot have both"));
    }

    #[test]
    fn test_check() {
        let allow = RestrictionRule::Allow(vec!["image".to_string()]);
        assert_eq!(allow.check("image"), Verdict::Permitted);
        assert_eq!(allow.check("package"), Verdict::NotAllowed);

        let disallow = RestrictionRule::Disallow(vec!["aws".to_string()]);
        assert_eq!(disallow.check("aws"), Verdict::Disallowed);
        assert_eq!(disallow.check("qemu"), Verdict::Permitted);

        assert_eq!(RestrictionRule::Unrestricted.check("x"), Verdict::Permitted);
    }

    #[test]
    fn test_dimension_names() {
        let names: Vec<String> = RestrictionDimension::iter().map(|d| d.to_string()).collect();
        assert_eq!(names, ["mode", "target", "distribution", "architecture", "repository"]);
        assert_eq!(RestrictionDimension::Architecture.section(), "architectures");
    }
}
