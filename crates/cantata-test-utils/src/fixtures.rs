//! Composer repository documents used across the test suites.

use serde_json::{Value, json};

/// Pre-built documents.
#[derive(Debug)]
pub struct Fixtures;

impl Fixtures {
    /// One version entry as found in v1 provider files and expanded v2
    /// metadata.
    #[must_use]
    pub fn version(name: &str, version: &str, reference: &str) -> Value {
        let normalized = if version.starts_with("dev-") {
            version.to_string()
        } else {
            format!("{version}.0")
        };
        json!({
            "name": name,
            "version": version,
            "version_normalized": normalized,
            "type": "library",
            "license": ["MIT"],
            "source": {
                "type": "git",
                "url": format!("https://github.com/{name}.git"),
                "reference": reference
            },
            "dist": {
                "type": "zip",
                "url": format!("https://api.github.com/repos/{name}/zipball/{reference}"),
                "reference": reference,
                "shasum": ""
            },
            "require": {"php": ">=8.1"}
        })
    }

    /// A stable release and a dev branch of `name`.
    #[must_use]
    pub fn versions(name: &str) -> Vec<Value> {
        vec![
            Self::version(name, "1.0.0", "aaa111"),
            Self::version(name, "1.1.0", "bbb222"),
            Self::version(name, "dev-main", "ccc333"),
        ]
    }

    /// Root document of a v2-only upstream such as repo.packagist.org.
    #[must_use]
    pub fn v2_root() -> Value {
        json!({
            "packages": [],
            "notify-batch": "/downloads/",
            "metadata-url": "/p2/%package%.json",
            "metadata-changes-url": "/metadata/changes.json",
            "search": "/search.json?q=%query%&type=%type%",
            "list": "/packages/list.json",
            "providers-api": "/providers/%package%.json"
        })
    }

    /// v2 metadata file body for `versions` of `name`.
    #[must_use]
    pub fn v2_package(name: &str, versions: &[Value]) -> Value {
        json!({ "packages": { name: versions } })
    }

    /// v1 provider file body for `versions` of `name`.
    #[must_use]
    pub fn v1_provider(name: &str, versions: &[Value]) -> Value {
        let keyed: serde_json::Map<String, Value> = versions
            .iter()
            .filter_map(|v| Some((v.get("version")?.as_str()?.to_string(), v.clone())))
            .collect();
        json!({ "packages": { name: keyed } })
    }

    /// Local catalog dump with one package.
    #[must_use]
    pub fn catalog_dump(name: &str, source_path: &str) -> Value {
        json!({
            "packages": {
                name: {
                    "1.0.0": {
                        "name": name,
                        "version": "1.0.0",
                        "version_normalized": "1.0.0.0",
                        "source": {"type": "git", "url": source_path, "reference": "1111111"}
                    },
                    "dev-main": {
                        "name": name,
                        "version": "dev-main",
                        "version_normalized": "dev-main",
                        "source": {"type": "git", "url": source_path, "reference": "2222222"}
                    }
                }
            }
        })
    }

    /// Server configuration with a single mirror of `upstream`.
    #[must_use]
    pub fn config(alias: &str, upstream: &str, lazy: bool) -> Value {
        json!({
            "listen": "127.0.0.1:0",
            "sync": {"enabled": false},
            "mirrors": {
                alias: {
                    "url": upstream,
                    "lazy": lazy
                }
            }
        })
    }
}
