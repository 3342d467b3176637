use std::io::Write;

use flate2::{write::ZlibEncoder, Compression};

use super::writer::{dump, Value};
use crate::error::AppResult;
use crate::spec::{PackageMetadata, VersionConstraint};

fn requirement(constraints: &[VersionConstraint]) -> Value {
    let pairs = if constraints.is_empty() {
        vec![Value::Array(vec![Value::str(">="), Value::gem_version("0")])]
    } else {
        constraints
            .iter()
            .map(|c| Value::Array(vec![Value::str(&c.operator), Value::gem_version(&c.version)]))
            .collect()
    };
    Value::UserMarshal(
        "Gem::Requirement".to_string(),
        Box::new(Value::Array(vec![Value::Array(pairs)])),
    )
}

fn specification(meta: &PackageMetadata) -> Value {
    let dependencies = meta
        .dependencies
        .iter()
        .map(|dep| {
            Value::Object(
                "Gem::Dependency".to_string(),
                vec![
                    ("@name".to_string(), Value::str(&dep.name)),
                    ("@requirement".to_string(), requirement(&dep.requirement)),
                    ("@type".to_string(), Value::Symbol(dep.kind.clone())),
                    ("@prerelease".to_string(), Value::Bool(dep.prerelease)),
                ],
            )
        })
        .collect();

    let ivars = vec![
        ("@name", Value::str(&meta.name)),
        ("@version", Value::gem_version(&meta.version)),
        ("@platform", Value::str(&meta.original_platform)),
        ("@summary", Value::opt_str(meta.summary.as_deref())),
        ("@description", Value::opt_str(meta.description.as_deref())),
        ("@homepage", Value::opt_str(meta.homepage.as_deref())),
        ("@authors", Value::str_array(&meta.authors)),
        ("@email", Value::str_array(&meta.emails)),
        ("@licenses", Value::str_array(&meta.licenses)),
        ("@require_paths", Value::str_array(&meta.require_paths)),
        (
            "@rubygems_version",
            Value::opt_str(meta.rubygems_version.as_deref()),
        ),
        (
            "@specification_version",
            meta.spec_version.map(Value::Int).unwrap_or(Value::Nil),
        ),
        (
            "@required_ruby_version",
            requirement(&meta.required_ruby_version),
        ),
        (
            "@required_rubygems_version",
            requirement(&meta.required_rubygems_version),
        ),
        ("@dependencies", Value::Array(dependencies)),
    ];

    Value::Object(
        "Gem::Specification".to_string(),
        ivars
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

/// Marshal a `Gem::Specification` for `quick/Marshal.4.8`.
pub fn encode_gemspec(meta: &PackageMetadata) -> AppResult<Vec<u8>> {
    dump(&specification(meta))
}

/// [`encode_gemspec`] wrapped in zlib, the `.gemspec.rz` payload.
pub fn encode_gemspec_rz(meta: &PackageMetadata) -> AppResult<Vec<u8>> {
    let raw = encode_gemspec(meta)?;
    let mut z = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
    z.write_all(&raw)?;
    Ok(z.finish()?)
}
