// src/schema.rs

//! Packaged document schemas
//!
//! Manifests and policies are checked against JSON Schema (Draft 7)
//! documents shipped inside the crate. On top of plain validation this module
//! provides two schema-driven passes the stock validator does not:
//!
//! - **Default injection**: every property whose schema declares a
//!   `default` is inserted into the instance when missing, so later stages
//!   always see a populated subtree.
//! - **`noFusa` checks**: with functional-safety mode enabled, a `noFusa`
//!   list on an object schema forbids the named properties, and on a
//!   string/number schema forbids the listed values.
//!
//! Both passes follow `properties`, `patternProperties`,
//! `additionalProperties`, `items`, `allOf`, matching `anyOf`/`oneOf`
//! branches and local `$ref` pointers.

use jsonschema::Draft;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Manifest schema shipped with the crate
pub const MANIFEST_SCHEMA: &str = include_str!("../files/manifest_schema.yml");

/// Policy schema shipped with the crate
pub const POLICY_SCHEMA: &str = include_str!("../files/policy_schema.yml");

/// Guard against `$ref` cycles
const MAX_DEPTH: usize = 64;

/// The packaged schema itself is broken. Never expected at runtime.
#[derive(Debug, Error)]
#[error("Invalid packaged schema '{name}': {message}")]
pub struct SchemaDefinitionError {
    pub name: String,
    pub message: String,
}

/// One schema violation in an instance document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON pointer of the offending value ("" for the document root)
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// A compiled packaged schema
pub struct PackagedSchema {
    name: String,
    schema: Value,
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for PackagedSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackagedSchema")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PackagedSchema {
    /// Compile a schema document
    pub fn new(name: impl Into<String>, schema: Value) -> Result<Self, SchemaDefinitionError> {
        let name = name.into();
        let validator = jsonschema::options()
            .with_draft(Draft::Draft7)
            .build(&schema)
            .map_err(|e| SchemaDefinitionError {
                name: name.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            name,
            schema,
            validator,
        })
    }

    /// Compile a schema written in YAML
    pub fn from_yaml(name: impl Into<String>, text: &str) -> Result<Self, SchemaDefinitionError> {
        let name = name.into();
        let schema: Value = serde_yaml::from_str(text).map_err(|e| SchemaDefinitionError {
            name: name.clone(),
            message: e.to_string(),
        })?;
        Self::new(name, schema)
    }

    /// The packaged manifest schema
    pub fn manifest() -> Result<Self, SchemaDefinitionError> {
        Self::from_yaml("manifest_schema.yml", MANIFEST_SCHEMA)
    }

    /// The packaged policy schema
    pub fn policy() -> Result<Self, SchemaDefinitionError> {
        Self::from_yaml("policy_schema.yml", POLICY_SCHEMA)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All violations, ordered by document path
    pub fn validate(&self, instance: &Value) -> Vec<SchemaViolation> {
        let mut violations: Vec<SchemaViolation> = self
            .validator
            .iter_errors(instance)
            .map(|error| SchemaViolation {
                path: error.instance_path().to_string(),
                message: error.to_string(),
            })
            .collect();
        violations.sort_by(|a, b| a.path.cmp(&b.path));
        violations
    }

    /// The first violation the validator reports, if any
    pub fn first_violation(&self, instance: &Value) -> Option<SchemaViolation> {
        self.validator
            .iter_errors(instance)
            .next()
            .map(|error| SchemaViolation {
                path: error.instance_path().to_string(),
                message: error.to_string(),
            })
    }

    /// Insert schema-declared defaults for missing properties, in place
    pub fn inject_defaults(&self, instance: &mut Value) {
        self.inject(&self.schema, instance, 0);
    }

    /// Check the instance against `noFusa` annotations
    pub fn fusa_violations(&self, instance: &Value) -> Vec<SchemaViolation> {
        let mut out = Vec::new();
        self.collect_fusa(&self.schema, instance, "", 0, &mut out);
        out
    }

    fn inject(&self, schema: &Value, instance: &mut Value, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        let schema = self.resolve_ref(schema);

        for branch in self.branches(schema, instance) {
            self.inject(branch, instance, depth + 1);
        }

        match instance {
            Value::Object(map) => {
                if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                    for (name, sub) in props {
                        if let Some(default) = self.resolve_ref(sub).get("default") {
                            map.entry(name.clone()).or_insert_with(|| default.clone());
                        }
                    }
                }
                for (key, child) in map.iter_mut() {
                    for sub in self.subschemas_for_key(schema, key) {
                        self.inject(sub, child, depth + 1);
                    }
                }
            }
            Value::Array(items) => {
                if let Some(item_schema) = schema.get("items").filter(|s| s.is_object()) {
                    for item in items.iter_mut() {
                        self.inject(item_schema, item, depth + 1);
                    }
                }
            }
            _ => {}
        }
    }

    fn collect_fusa(
        &self,
        schema: &Value,
        instance: &Value,
        path: &str,
        depth: usize,
        out: &mut Vec<SchemaViolation>,
    ) {
        if depth > MAX_DEPTH {
            return;
        }
        let schema = self.resolve_ref(schema);

        if let Some(forbidden) = schema.get("noFusa").and_then(Value::as_array) {
            match instance {
                Value::Object(map) => {
                    for prop in forbidden.iter().filter_map(Value::as_str) {
                        if map.contains_key(prop) {
                            out.push(SchemaViolation {
                                path: path.to_string(),
                                message: format!("With --fusa, property '{}' is not allowed", prop),
                            });
                        }
                    }
                }
                Value::String(_) | Value::Number(_) => {
                    for value in forbidden.iter().filter(|v| *v == instance) {
                        out.push(SchemaViolation {
                            path: path.to_string(),
                            message: format!(
                                "With --fusa, value {} is not allowed",
                                value
                            ),
                        });
                    }
                }
                _ => {}
            }
        }

        for branch in self.branches(schema, instance) {
            self.collect_fusa(branch, instance, path, depth + 1, out);
        }

        match instance {
            Value::Object(map) => {
                for (key, child) in map {
                    let child_path = format!("{}/{}", path, key);
                    for sub in self.subschemas_for_key(schema, key) {
                        self.collect_fusa(sub, child, &child_path, depth + 1, out);
                    }
                }
            }
            Value::Array(items) => {
                if let Some(item_schema) = schema.get("items").filter(|s| s.is_object()) {
                    for (i, item) in items.iter().enumerate() {
                        let child_path = format!("{}/{}", path, i);
                        self.collect_fusa(item_schema, item, &child_path, depth + 1, out);
                    }
                }
            }
            _ => {}
        }
    }

    /// Follow local `$ref` pointers ("#/definitions/...")
    fn resolve_ref<'s>(&'s self, schema: &'s Value) -> &'s Value {
        let mut current = schema;
        for _ in 0..MAX_DEPTH {
            match current
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix('#'))
                .and_then(|pointer| self.schema.pointer(pointer))
            {
                Some(target) => current = target,
                None => break,
            }
        }
        current
    }

    /// `allOf` plus the `anyOf`/`oneOf` branches that fit the instance
    fn branches<'s>(&'s self, schema: &'s Value, instance: &Value) -> Vec<&'s Value> {
        let mut out: Vec<&Value> = schema
            .get("allOf")
            .and_then(Value::as_array)
            .map(|all| all.iter().collect())
            .unwrap_or_default();

        for keyword in ["anyOf", "oneOf"] {
            if let Some(options) = schema.get(keyword).and_then(Value::as_array) {
                out.extend(
                    options
                        .iter()
                        .filter(|option| self.branch_fits(option, instance)),
                );
            }
        }
        out
    }

    fn branch_fits(&self, branch: &Value, instance: &Value) -> bool {
        let branch = self.resolve_ref(branch);
        let type_ok = match branch.get("type") {
            Some(Value::String(t)) => type_matches(t, instance),
            Some(Value::Array(types)) => types
                .iter()
                .filter_map(Value::as_str)
                .any(|t| type_matches(t, instance)),
            _ => true,
        };
        let required_ok = match (branch.get("required"), instance) {
            (Some(Value::Array(required)), Value::Object(map)) => required
                .iter()
                .filter_map(Value::as_str)
                .all(|key| map.contains_key(key)),
            _ => true,
        };
        type_ok && required_ok
    }

    /// Schemas that apply to the value under `key` of an object
    fn subschemas_for_key<'s>(&'s self, schema: &'s Value, key: &str) -> Vec<&'s Value> {
        let mut out = Vec::new();
        let mut matched = false;

        if let Some(sub) = schema
            .get("properties")
            .and_then(Value::as_object)
            .and_then(|props| props.get(key))
        {
            out.push(sub);
            matched = true;
        }

        if let Some(patterns) = schema.get("patternProperties").and_then(Value::as_object) {
            for (pattern, sub) in patterns {
                if Regex::new(pattern).is_ok_and(|re| re.is_match(key)) {
                    out.push(sub);
                    matched = true;
                }
            }
        }

        if !matched
            && let Some(additional) = schema.get("additionalProperties").filter(|s| s.is_object())
        {
            out.push(additional);
        }
        out
    }
}

fn type_matches(type_name: &str, instance: &Value) -> bool {
    match type_name {
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        "number" => instance.is_number(),
        "integer" => instance.is_i64() || instance.is_u64(),
        _ => true,
    }
}
