use serde::{Deserialize, Serialize};

use super::writer::{dump, Value};
use crate::error::AppResult;
use crate::store::PackageVersion;

/// One version as returned by `/api/v1/dependencies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlerDependency {
    pub name: String,
    pub number: String,
    pub platform: String,
    /// Runtime dependencies as `[name, constraint]`.
    pub dependencies: Vec<[String; 2]>,
}

impl From<&PackageVersion> for BundlerDependency {
    fn from(v: &PackageVersion) -> Self {
        Self {
            name: v.name.clone(),
            number: v.number.clone(),
            platform: v.platform.clone(),
            dependencies: v
                .dependencies
                .iter()
                .filter(|d| d.is_runtime())
                .map(|d| [d.name.clone(), d.version_constraints.clone()])
                .collect(),
        }
    }
}

/// Marshal the dependency list bundler expects: an array of hashes keyed by
/// symbols.
pub fn encode_dependencies(deps: &[BundlerDependency]) -> AppResult<Vec<u8>> {
    let rows = deps
        .iter()
        .map(|d| {
            Value::Hash(vec![
                (Value::Symbol("name".into()), Value::str(&d.name)),
                (Value::Symbol("number".into()), Value::str(&d.number)),
                (Value::Symbol("platform".into()), Value::str(&d.platform)),
                (
                    Value::Symbol("dependencies".into()),
                    Value::Array(
                        d.dependencies
                            .iter()
                            .map(|[name, req]| Value::Array(vec![Value::str(name), Value::str(req)]))
                            .collect(),
                    ),
                ),
            ])
        })
        .collect();
    dump(&Value::Array(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list() {
        assert_eq!(encode_dependencies(&[]).unwrap(), b"\x04\x08[\x00".to_vec());
    }

    #[test]
    fn test_hash_layout() {
        let dep = BundlerDependency {
            name: "foo".into(),
            number: "1.0.0".into(),
            platform: "ruby".into(),
            dependencies: vec![["bar".into(), ">= 1.0".into()]],
        };
        let bytes = encode_dependencies(&[dep.clone(), dep]).unwrap();
        let mut expected = b"\x04\x08[\x07{\x09".to_vec();
        expected.extend_from_slice(b":\x09nameI\"\x08foo\x06:\x06ET");
        expected.extend_from_slice(b":\x0bnumberI\"\x0a1.0.0\x06;\x06T");
        expected.extend_from_slice(b":\x0dplatformI\"\x09ruby\x06;\x06T");
        expected.extend_from_slice(b":\x11dependencies[\x06[\x07I\"\x08bar\x06;\x06TI\"\x0b>= 1.0\x06;\x06T");
        assert!(bytes.starts_with(&expected));
        // the second row reuses every symbol
        assert!(bytes[expected.len()..].starts_with(b"{\x09;\x00I\"\x08foo\x06;\x06T;\x07"));
    }
}
