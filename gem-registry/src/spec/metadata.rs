//! YAML gemspec parsing.
//!
//! The dump carries Ruby type tags (`!ruby/object:Gem::Version`) and fields
//! whose shape varies between gems. Tags are stripped first, then the
//! polymorphic fields are captured as explicit variants and normalized before
//! anything leaves this module.

use serde::Deserialize;
use serde_yaml_ng::Value;

use super::{full_name, is_prerelease, PackageMetadata, SpecDependency, VersionConstraint};
use crate::error::{AppError, AppResult};

/// `email` may be absent, a single string, or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<Value>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(items) => items.iter().filter_map(scalar_string).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVersion {
    version: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRequirement {
    requirements: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDependency {
    name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    prerelease: bool,
    requirement: Option<RawRequirement>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSpec {
    name: String,
    version: RawVersion,
    platform: Option<String>,
    authors: Option<Vec<Value>>,
    email: Option<OneOrMany>,
    summary: Option<String>,
    description: Option<String>,
    homepage: Option<String>,
    specification_version: Option<i64>,
    require_paths: Option<Vec<String>>,
    licenses: Option<Vec<String>>,
    rubygems_version: Option<String>,
    dependencies: Option<Vec<RawDependency>>,
    required_ruby_version: Option<RawRequirement>,
    required_rubygems_version: Option<RawRequirement>,
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar_string(&tagged.value),
        _ => None,
    }
}

fn strip_tags(value: Value) -> Value {
    match value {
        Value::Tagged(tagged) => strip_tags(tagged.value),
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(strip_tags).collect()),
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (strip_tags(k), strip_tags(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Flatten `[[op, {version: v}], ...]` into ordered pairs.
fn flatten_requirement(raw: Option<RawRequirement>, label: &str) -> AppResult<Vec<VersionConstraint>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let mut constraints = Vec::with_capacity(raw.requirements.len());
    for entry in raw.requirements {
        let Value::Sequence(pair) = entry else {
            return Err(AppError::corrupt_archive(
                label,
                "requirement entry is not a list",
            ));
        };
        let mut operator = None;
        let mut version = None;
        for part in &pair {
            match part {
                Value::Mapping(map) => {
                    version = map.get("version").and_then(scalar_string);
                }
                other => {
                    if let Some(op) = scalar_string(other) {
                        operator = Some(op);
                    }
                }
            }
        }
        match (operator, version) {
            (Some(operator), Some(version)) => {
                constraints.push(VersionConstraint { operator, version })
            }
            _ => {
                return Err(AppError::corrupt_archive(
                    label,
                    "requirement entry is missing an operator or version",
                ))
            }
        }
    }
    Ok(constraints)
}

/// Parse a gemspec YAML document. `label` names the source in errors.
pub fn parse_metadata(yaml: &str, label: &str) -> AppResult<PackageMetadata> {
    let document: Value = serde_yaml_ng::from_str(yaml)
        .map_err(|e| AppError::corrupt_archive(label, format!("invalid metadata YAML: {e}")))?;
    let raw: RawSpec = serde_yaml_ng::from_value(strip_tags(document))
        .map_err(|e| AppError::corrupt_archive(label, format!("unexpected metadata shape: {e}")))?;

    let version = scalar_string(&raw.version.version).unwrap_or_default();
    if raw.name.trim().is_empty() || version.trim().is_empty() {
        return Err(AppError::corrupt_archive(
            label,
            "metadata is missing name or version",
        ));
    }

    let platform = raw
        .platform
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| super::DEFAULT_PLATFORM.to_string());

    let mut dependencies = Vec::new();
    for dep in raw.dependencies.unwrap_or_default() {
        let kind = dep
            .kind
            .as_deref()
            .unwrap_or("runtime")
            .trim_start_matches(':')
            .to_string();
        dependencies.push(SpecDependency {
            requirement: flatten_requirement(dep.requirement, label)?,
            name: dep.name,
            kind,
            prerelease: dep.prerelease,
        });
    }

    let full = full_name(&raw.name, &version, &platform);
    Ok(PackageMetadata {
        original_name: full.clone(),
        original_platform: platform,
        full_name: full,
        prerelease: is_prerelease(&version),
        authors: raw
            .authors
            .unwrap_or_default()
            .iter()
            .filter_map(scalar_string)
            .collect(),
        emails: raw.email.map(OneOrMany::into_vec).unwrap_or_default(),
        summary: raw.summary,
        description: raw.description,
        homepage: raw.homepage,
        spec_version: raw.specification_version,
        require_paths: raw.require_paths.unwrap_or_default(),
        licenses: raw.licenses.unwrap_or_default(),
        rubygems_version: raw.rubygems_version,
        dependencies,
        required_ruby_version: flatten_requirement(raw.required_ruby_version, label)?,
        required_rubygems_version: flatten_requirement(raw.required_rubygems_version, label)?,
        checksum: String::new(),
        name: raw.name,
        version,
    })
}
