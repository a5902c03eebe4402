// src/policy/mod.rs

//! Build policies
//!
//! A policy is a named set of restrictions on what a build may request
//! (modes, targets, distributions, architectures, repositories) and what a
//! manifest may contain. It also forces values onto the build (variables,
//! sysctl settings, SELinux booleans) and denylists rpms and kernel modules.
//!
//! Restriction sections may carry `@target` overlays such as
//! `disallow@rpi4`. A `Policy` is resolved for exactly one target when it is
//! loaded: matching overlays are merged into the base rule, every other
//! overlay is dropped, and the result is immutable.

pub mod loader;
pub mod manifest_rules;
pub mod rules;

pub use loader::PolicyLoader;
pub use manifest_rules::ManifestRestrictions;
pub use rules::{RestrictionDimension, RestrictionRule, Verdict};

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::manifest::variables::BuildVariables;
use crate::pathexpr::PathExprError;
use crate::schema::SchemaDefinitionError;

/// Policy errors
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Policy file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read policy file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in policy file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Policy file must contain a YAML dictionary")]
    NotAMapping,

    /// The document does not match the policy schema
    #[error("{0}")]
    Schema(String),

    #[error(transparent)]
    SchemaDefinition(#[from] SchemaDefinitionError),

    /// Contradicting allow/disallow orientation inside one restriction
    #[error("{0}")]
    Consistency(String),

    #[error("Invalid property path '{path}' in manifest_restrictions: {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: PathExprError,
    },

    /// Build arguments or manifest content violate the policy
    #[error("Policy validation failed:\n{}", .errors.join("\n"))]
    Violations { policy: String, errors: Vec<String> },
}

static UNRESTRICTED: RestrictionRule = RestrictionRule::Unrestricted;

/// Build arguments checked against a policy before anything is compiled
#[derive(Debug, Clone, Default)]
pub struct BuildRequest<'a> {
    pub mode: &'a str,
    pub target: &'a str,
    pub distribution: &'a str,
    pub architecture: &'a str,
    pub repositories: &'a [String],
    /// Whether the build uses a simple manifest
    pub simple_manifest: bool,
}

/// A policy resolved for one build target
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    name: String,
    description: String,
    target: String,
    restrictions: BTreeMap<String, RestrictionRule>,
    manifest_restrictions: ManifestRestrictions,
    require_simple_manifest: bool,
}

impl Policy {
    /// Resolve a schema-checked policy document for `target`
    pub fn resolve(document: &Map<String, Value>, target: &str) -> Result<Self, PolicyError> {
        let mut sections = document
            .get("restrictions")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        merge_overlays(&mut sections, target);

        let mut restrictions = BTreeMap::new();
        let mut manifest_restrictions = ManifestRestrictions::default();
        let mut require_simple_manifest = false;

        for (name, value) in &sections {
            match (name.as_str(), value) {
                ("manifest_restrictions", Value::Object(section)) => {
                    manifest_restrictions = ManifestRestrictions::from_section(section)?;
                }
                ("require_simple_manifest", value) => {
                    require_simple_manifest = value.as_bool().unwrap_or(false);
                }
                (_, Value::Object(section)) => {
                    restrictions.insert(name.clone(), RestrictionRule::from_section(name, section)?);
                }
                _ => {}
            }
        }

        Ok(Self {
            name: text_field(document, "name", "unknown"),
            description: text_field(document, "description", ""),
            target: target.to_string(),
            restrictions,
            manifest_restrictions,
            require_simple_manifest,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The build target this policy was resolved for
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Rule for a named restriction section (`Unrestricted` if absent)
    pub fn restriction(&self, section: &str) -> &RestrictionRule {
        self.restrictions.get(section).unwrap_or(&UNRESTRICTED)
    }

    /// Names of all resolved restriction sections
    pub fn restriction_names(&self) -> impl Iterator<Item = &str> {
        self.restrictions.keys().map(String::as_str)
    }

    pub fn dimension_rule(&self, dimension: RestrictionDimension) -> &RestrictionRule {
        self.restriction(dimension.section())
    }

    pub fn mode_restrictions(&self) -> &RestrictionRule {
        self.dimension_rule(RestrictionDimension::Mode)
    }

    pub fn target_restrictions(&self) -> &RestrictionRule {
        self.dimension_rule(RestrictionDimension::Target)
    }

    pub fn distribution_restrictions(&self) -> &RestrictionRule {
        self.dimension_rule(RestrictionDimension::Distribution)
    }

    pub fn architecture_restrictions(&self) -> &RestrictionRule {
        self.dimension_rule(RestrictionDimension::Architecture)
    }

    pub fn repository_restrictions(&self) -> &RestrictionRule {
        self.dimension_rule(RestrictionDimension::Repository)
    }

    pub fn manifest_restrictions(&self) -> &ManifestRestrictions {
        &self.manifest_restrictions
    }

    pub fn forced_variables(&self) -> Option<&Map<String, Value>> {
        self.restriction("variables").forced()
    }

    pub fn disallowed_rpms(&self) -> &[String] {
        self.restriction("rpms").disallowed()
    }

    pub fn disallowed_kernel_modules(&self) -> &[String] {
        self.restriction("kernel_modules").disallowed()
    }

    pub fn forced_selinux_booleans(&self) -> Option<&Map<String, Value>> {
        self.restriction("selinux_booleans").forced()
    }

    pub fn forced_sysctl(&self) -> Option<&Map<String, Value>> {
        self.restriction("sysctl").forced()
    }

    pub fn require_simple_manifest(&self) -> bool {
        self.require_simple_manifest
    }

    /// Check build arguments, collecting one error per violated dimension
    pub fn validate_build_args(
        &self,
        mode: &str,
        target: &str,
        distribution: &str,
        architecture: &str,
        repositories: Option<&[String]>,
    ) -> Vec<String> {
        let mut errors = Vec::new();

        for (dimension, value) in [
            (RestrictionDimension::Mode, mode),
            (RestrictionDimension::Target, target),
            (RestrictionDimension::Distribution, distribution),
            (RestrictionDimension::Architecture, architecture),
        ] {
            errors.extend(self.check_dimension(dimension, value));
        }

        for repo in repositories.unwrap_or_default() {
            errors.extend(self.check_dimension(RestrictionDimension::Repository, repo));
        }

        errors
    }

    pub fn validate_manifest_type(&self, is_simple_manifest: bool) -> Vec<String> {
        if self.require_simple_manifest && !is_simple_manifest {
            return vec![format!(
                "Policy '{}' requires using a simple manifest (.aib.yml), \
                 but a low-level manifest (.mpp.yml) was provided",
                self.name
            )];
        }
        Vec::new()
    }

    /// Check manifest content against `manifest_restrictions`
    pub fn validate_manifest(&self, manifest: &Value) -> Vec<String> {
        self.manifest_restrictions.evaluate(&self.name, manifest)
    }

    /// Run the manifest-type and build-argument checks together
    pub fn check_build(&self, request: &BuildRequest<'_>) -> Result<(), PolicyError> {
        let mut errors = self.validate_manifest_type(request.simple_manifest);
        let repositories = (!request.repositories.is_empty()).then_some(request.repositories);
        errors.extend(self.validate_build_args(
            request.mode,
            request.target,
            request.distribution,
            request.architecture,
            repositories,
        ));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PolicyError::Violations {
                policy: self.name.clone(),
                errors,
            })
        }
    }

    /// Write the policy-derived defines into `defines`
    pub fn apply_defines(&self, defines: &mut BuildVariables) {
        for (key, value) in self.forced_variables().into_iter().flatten() {
            defines.set(key, value.clone());
        }

        defines.set("policy_denylist_rpms", string_array(self.disallowed_rpms()));
        defines.set(
            "policy_denylist_modules",
            string_array(self.disallowed_kernel_modules()),
        );

        let sysctl: Vec<Value> = self
            .forced_sysctl()
            .into_iter()
            .flatten()
            .map(|(key, value)| serde_json::json!({"key": key, "value": value}))
            .collect();
        defines.set("policy_systemctl_options", Value::Array(sysctl));

        let booleans: Vec<Value> = self
            .forced_selinux_booleans()
            .into_iter()
            .flatten()
            .map(|(key, value)| Value::String(format!("{}={}", key, truthy(value))))
            .collect();
        defines.set("policy_selinux_booleans", Value::Array(booleans));
    }

    fn check_dimension(&self, dimension: RestrictionDimension, value: &str) -> Option<String> {
        let rule = self.dimension_rule(dimension);
        let relation = match rule.check(value) {
            Verdict::Permitted => return None,
            Verdict::NotAllowed => "is not in allowed list",
            Verdict::Disallowed => "is in disallowed list",
        };
        Some(format!(
            "Policy '{}': {} '{}' {}: {}",
            self.name,
            dimension,
            value,
            relation,
            quoted_list(rule.values())
        ))
    }
}

/// Merge the overlays for `target` into each restriction section.
///
/// `allow@T`/`disallow@T` lists are appended to the base list (duplicates
/// kept), `force@T` maps update the base map key by key. Every `@` key is
/// removed, matching or not.
pub fn merge_overlays(sections: &mut Map<String, Value>, target: &str) {
    for section in sections.values_mut() {
        let Value::Object(section) = section else {
            continue;
        };

        let mut overlays = Vec::new();
        for (key, value) in std::mem::take(section) {
            match key.split_once('@') {
                Some((kind, key_target)) => {
                    if key_target == target {
                        overlays.push((kind.to_string(), value));
                    }
                }
                None => {
                    section.insert(key, value);
                }
            }
        }

        for (kind, overlay) in overlays {
            match (section.get_mut(&kind), overlay) {
                (Some(Value::Array(base)), Value::Array(extra)) => base.extend(extra),
                (Some(Value::Object(base)), Value::Object(extra)) => {
                    for (key, value) in extra {
                        base.insert(key, value);
                    }
                }
                (_, overlay) => {
                    section.insert(kind, overlay);
                }
            }
        }
    }
}

fn text_field(document: &Map<String, Value>, key: &str, default: &str) -> String {
    document
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

/// Render a list for messages: `['a', 'b']`
pub(crate) fn quoted_list<S: AsRef<str>>(items: &[S]) -> String {
    let quoted: Vec<String> = items.iter().map(|item| format!("'{}'", item.as_ref())).collect();
    format!("[{}]", quoted.join(", "))
}

fn string_array(items: &[String]) -> Value {
    Value::Array(items.iter().cloned().map(Value::String).collect())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(document: Value, target: &str) -> Policy {
        Policy::resolve(document.as_object().unwrap(), target).unwrap()
    }

    #[test]
    fn test_quoted_list() {
        assert_eq!(quoted_list(&["rpi4", "rcar_s4"]), "['rpi4', 'rcar_s4']");
        assert_eq!(quoted_list::<String>(&[]), "[]");
    }

    #[test]
    fn test_merge_removes_all_overlay_keys() {
        let mut sections = json!({
            "targets": {"disallow": ["aws"], "disallow@qemu": ["x"], "disallow@rpi4": ["y"]},
            "variables": {"force": {"a": 1}, "force@qemu": {"a": 2, "b": 3}, "force@rpi4": {"c": 4}},
            "require_simple_manifest": true
        });
        let sections = sections.as_object_mut().unwrap();
        merge_overlays(sections, "qemu");

        for section in sections.values().filter_map(Value::as_object) {
            assert!(section.keys().all(|k| !k.contains('@')));
        }
        assert_eq!(sections["targets"]["disallow"], json!(["aws", "x"]));
        assert_eq!(sections["variables"]["force"], json!({"a": 2, "b": 3}));
    }

    #[test]
    fn test_overlay_without_base_key() {
        let mut sections = json!({"modes": {"allow@qemu": ["image"]}});
        let sections = sections.as_object_mut().unwrap();
        merge_overlays(sections, "qemu");
        assert_eq!(sections["modes"], json!({"allow": ["image"]}));
    }

    #[test]
    fn test_validate_build_args_allow() {
        let p = policy(
            json!({"name": "p", "description": "d", "restrictions": {"modes": {"allow": ["image"]}}}),
            "qemu",
        );
        assert!(p.validate_build_args("image", "qemu", "autosd", "x86_64", None).is_empty());

        let errors = p.validate_build_args("package", "qemu", "autosd", "x86_64", None);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("package"));
        assert!(errors[0].contains("not in allowed list"));
        assert_eq!(
            errors[0],
            "Policy 'p': mode 'package' is not in allowed list: ['image']"
        );
    }

    #[test]
    fn test_validate_build_args_disallow() {
        let p = policy(
            json!({"name": "p", "description": "d", "restrictions": {"targets": {"disallow": ["aws"]}}}),
            "aws",
        );
        let errors = p.validate_build_args("image", "aws", "autosd", "x86_64", None);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("disallowed list"));
        assert!(p.validate_build_args("image", "qemu", "autosd", "x86_64", None).is_empty());
    }

    #[test]
    fn test_validate_build_args_accumulates() {
        let p = policy(
            json!({
                "name": "p",
                "description": "d",
                "restrictions": {
                    "modes": {"allow": ["image"]},
                    "architectures": {"allow": ["aarch64"]},
                    "repositories": {"disallow": ["http://bad"]}
                }
            }),
            "qemu",
        );
        let repos = vec!["http://good".to_string(), "http://bad".to_string()];
        let errors = p.validate_build_args("package", "qemu", "autosd", "x86_64", Some(&repos));
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("Policy 'p': mode"));
        assert!(errors[1].starts_with("Policy 'p': architecture"));
        assert!(errors[2].starts_with("Policy 'p': repository 'http://bad'"));

        // Same inputs, same answer
        assert_eq!(
            errors,
            p.validate_build_args("package", "qemu", "autosd", "x86_64", Some(&repos))
        );
    }

    #[test]
    fn test_validate_manifest_type() {
        let p = policy(
            json!({"name": "p", "description": "d", "restrictions": {"require_simple_manifest": true}}),
            "qemu",
        );
        assert!(p.require_simple_manifest());
        assert!(p.validate_manifest_type(true).is_empty());
        let errors = p.validate_manifest_type(false);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("requires using a simple manifest"));
    }

    #[test]
    fn test_check_build_collects_everything() {
        let p = policy(
            json!({
                "name": "p",
                "description": "d",
                "restrictions": {
                    "require_simple_manifest": true,
                    "modes": {"allow": ["image"]}
                }
            }),
            "qemu",
        );
        let request = BuildRequest {
            mode: "package",
            target: "qemu",
            distribution: "autosd",
            architecture: "x86_64",
            repositories: &[],
            simple_manifest: false,
        };
        match p.check_build(&request).unwrap_err() {
            PolicyError::Violations { policy, errors } => {
                assert_eq!(policy, "p");
                assert_eq!(errors.len(), 2);
            }
            other => panic!("Expected Violations, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_defines() {
        let p = policy(
            json!({
                "name": "p",
                "description": "d",
                "restrictions": {
                    "variables": {"force": {"use_debug": false}},
                    "rpms": {"disallow": ["strace"]},
                    "sysctl": {"force": {"kernel.panic": "10"}},
                    "selinux_booleans": {"force": {"container_manage_cgroup": true, "deny_ptrace": false}}
                }
            }),
            "qemu",
        );

        let mut defines = BuildVariables::new();
        p.apply_defines(&mut defines);

        assert_eq!(defines.get("use_debug"), Some(&json!(false)));
        assert_eq!(defines.get("policy_denylist_rpms"), Some(&json!(["strace"])));
        assert_eq!(
            defines.get("policy_systemctl_options"),
            Some(&json!([{"key": "kernel.panic", "value": "10"}]))
        );
        assert_eq!(
            defines.get("policy_selinux_booleans"),
            Some(&json!(["container_manage_cgroup=true", "deny_ptrace=false"]))
        );
        // Nothing forced means nothing written
        assert!(!defines.contains("policy_denylist_modules"));
    }

    #[test]
    fn test_defaults_when_sections_absent() {
        let p = policy(json!({"name": "p", "description": "d"}), "qemu");
        assert_eq!(p.mode_restrictions(), &RestrictionRule::Unrestricted);
        assert!(p.disallowed_rpms().is_empty());
        assert!(p.forced_variables().is_none());
        assert!(!p.require_simple_manifest());
        assert!(p.manifest_restrictions().is_empty());
        assert_eq!(p.target(), "qemu");
    }
}
