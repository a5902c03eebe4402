// src/policy/loader.rs

//! Policy file loading
//!
//! Reads a policy YAML file, checks it against the packaged policy schema and
//! the allow/disallow consistency rules, then resolves it for one target.

use serde_json::{Map, Value};
use std::path::Path;

use super::{Policy, PolicyError, quoted_list};
use crate::diagnostics::DiagnosticSink;
use crate::schema::PackagedSchema;

const COMPONENT: &str = "policy";

/// Loads policy files; the compiled schema is reused across loads
pub struct PolicyLoader<'a> {
    schema: PackagedSchema,
    diagnostics: &'a dyn DiagnosticSink,
}

impl<'a> PolicyLoader<'a> {
    pub fn new(diagnostics: &'a dyn DiagnosticSink) -> Result<Self, PolicyError> {
        Ok(Self {
            schema: PackagedSchema::policy()?,
            diagnostics,
        })
    }

    /// Load a policy file and resolve it for `target`
    pub fn load(&self, path: &Path, target: &str) -> Result<Policy, PolicyError> {
        if !path.exists() {
            return Err(PolicyError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document: Value =
            serde_yaml::from_str(&content).map_err(|source| PolicyError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let policy = self.resolve_document(document, target)?;
        self.diagnostics.info(
            COMPONENT,
            format!(
                "Loaded policy '{}' from {} for target {}",
                policy.name(),
                path.display(),
                target
            ),
        );
        Ok(policy)
    }

    /// Validate an already parsed policy document and resolve it for `target`
    pub fn resolve_document(&self, document: Value, target: &str) -> Result<Policy, PolicyError> {
        let Some(map) = document.as_object() else {
            return Err(PolicyError::NotAMapping);
        };

        if let Some(violation) = self.schema.first_violation(&document) {
            return Err(PolicyError::Schema(format!(
                "Policy validation failed: {}",
                violation.message
            )));
        }

        if let Some(restrictions) = map.get("restrictions").and_then(Value::as_object) {
            check_consistency(restrictions)?;
            for (name, section) in restrictions {
                if let Some(section) = section.as_object() {
                    let overlays: Vec<&String> = section.keys().filter(|k| k.contains('@')).collect();
                    if !overlays.is_empty() {
                        self.diagnostics.debug(
                            COMPONENT,
                            format!("Restriction '{}' has target overlays {}", name, quoted_list(&overlays)),
                        );
                    }
                }
            }
        }

        Policy::resolve(map, target)
    }
}

/// Reject restriction sections whose orientation contradicts itself
pub fn check_consistency(restrictions: &Map<String, Value>) -> Result<(), PolicyError> {
    for (name, section) in restrictions {
        let Some(section) = section.as_object() else {
            continue;
        };

        let has_allow = section.contains_key("allow");
        let has_disallow = section.contains_key("disallow");
        let target_keys = |prefix: &str| -> Vec<String> {
            section
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect()
        };

        if has_allow && has_disallow {
            return Err(PolicyError::Consistency(format!(
                "Restriction '{}' cannot have both 'allow' and 'disallow' keys",
                name
            )));
        }

        let disallow_keys = target_keys("disallow@");
        if has_allow && !disallow_keys.is_empty() {
            return Err(PolicyError::Consistency(format!(
                "Restriction '{}' uses global 'allow' but has target-specific 'disallow@' keys: {}",
                name,
                quoted_list(&disallow_keys)
            )));
        }

        let allow_keys = target_keys("allow@");
        if has_disallow && !allow_keys.is_empty() {
            return Err(PolicyError::Consistency(format!(
                "Restriction '{}' uses global 'disallow' but has target-specific 'allow@' keys: {}",
                name,
                quoted_list(&allow_keys)
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{CollectDiagnostics, SilentDiagnostics};
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_policy(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_missing_file() {
        let loader = PolicyLoader::new(&SilentDiagnostics).unwrap();
        let err = loader.load(Path::new("/nonexistent/policy.yml"), "qemu").unwrap_err();
        assert!(matches!(err, PolicyError::NotFound(_)));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let file = write_policy("name: [unclosed\n");
        let loader = PolicyLoader::new(&SilentDiagnostics).unwrap();
        let err = loader.load(file.path(), "qemu").unwrap_err();
        assert!(matches!(err, PolicyError::Parse { .. }));
    }

    #[test]
    fn test_load_not_a_mapping() {
        let file = write_policy("- just\n- a list\n");
        let loader = PolicyLoader::new(&SilentDiagnostics).unwrap();
        let err = loader.load(file.path(), "qemu").unwrap_err();
        assert!(matches!(err, PolicyError::NotAMapping));
        assert_eq!(err.to_string(), "Policy file must contain a YAML dictionary");
    }

    #[test]
    fn test_load_schema_violation() {
        let file = write_policy("name: test\n");
        let loader = PolicyLoader::new(&SilentDiagnostics).unwrap();
        let err = loader.load(file.path(), "qemu").unwrap_err();
        match err {
            PolicyError::Schema(message) => {
                assert!(message.starts_with("Policy validation failed: "));
                assert!(message.contains("description"));
            }
            other => panic!("Expected Schema, got {:?}", other),
        }
    }

    #[test]
    fn test_rpms_allow_rejected_by_schema() {
        let loader = PolicyLoader::new(&SilentDiagnostics).unwrap();
        let doc = json!({
            "name": "p",
            "description": "d",
            "restrictions": {"rpms": {"allow": ["bash"]}}
        });
        assert!(matches!(
            loader.resolve_document(doc, "qemu"),
            Err(PolicyError::Schema(_))
        ));
    }

    #[test]
    fn test_consistency_global_allow_with_disallow_overlay() {
        let err = check_consistency(
            json!({"targets": {"allow": ["qemu"], "disallow@rpi4": ["x"]}})
                .as_object()
                .unwrap(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Restriction 'targets' uses global 'allow' but has target-specific 'disallow@' keys: ['disallow@rpi4']"
        );

        let err = check_consistency(
            json!({"modes": {"disallow": ["package"], "allow@qemu": ["image"]}})
                .as_object()
                .unwrap(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("uses global 'disallow'"));
    }

    #[test]
    fn test_consistency_both_global_keys() {
        let loader = PolicyLoader::new(&SilentDiagnostics).unwrap();
        let doc = json!({
            "name": "p",
            "description": "d",
            "restrictions": {"targets": {"allow": ["qemu"], "disallow": ["aws"]}}
        });
        let err = loader.resolve_document(doc, "qemu").unwrap_err();
        assert!(matches!(err, PolicyError::Consistency(_)));
    }

    #[test]
    fn test_conflicting_overlays_for_same_target() {
        let loader = PolicyLoader::new(&SilentDiagnostics).unwrap();
        let doc = json!({
            "name": "p",
            "description": "d",
            "restrictions": {"targets": {"allow@qemu": ["qemu"], "disallow@qemu": ["aws"]}}
        });
        assert!(matches!(
            loader.resolve_document(doc.clone(), "qemu"),
            Err(PolicyError::Consistency(_))
        ));
        // Other targets never see either overlay
        let policy = loader.resolve_document(doc, "rpi4").unwrap();
        assert_eq!(policy.target_restrictions(), &crate::policy::RestrictionRule::Unrestricted);
    }

    #[test]
    fn test_load_records_diagnostics() {
        let file = write_policy(
            "name: strict\ndescription: Strict policy\nrestrictions:\n  kernel_modules:\n    disallow: [fat]\n    disallow@rpi4: [bcm2835-dma]\n",
        );
        let sink = CollectDiagnostics::new();
        let loader = PolicyLoader::new(&sink).unwrap();
        let policy = loader.load(file.path(), "rpi4").unwrap();

        assert_eq!(policy.name(), "strict");
        assert_eq!(policy.description(), "Strict policy");
        assert_eq!(policy.disallowed_kernel_modules(), ["fat", "bcm2835-dma"]);

        let records = sink.records_for("policy");
        assert!(records.iter().any(|r| r.message.contains("overlays")));
        assert!(records.iter().any(|r| r.message.contains("Loaded policy 'strict'")));
    }
}
