use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::models::PackageSpec;

#[derive(Debug, Deserialize)]
struct PoetryLock {
    #[serde(default)]
    package: Vec<LockedPackage>,
}

#[derive(Debug, Deserialize)]
struct LockedPackage {
    name: String,
    version: String,
}

/// Scanner for `poetry.lock` (`[[package]]` tables).
pub struct PoetryScanner;

impl super::Scanner for PoetryScanner {
    fn source_name(&self) -> &'static str {
        "poetry.lock"
    }

    fn can_handle(&self, path: &Path) -> bool {
        path.file_name().is_some_and(|n| n == "poetry.lock")
    }

    fn scan(&self, path: &Path) -> Result<Vec<PackageSpec>> {
        let content = std::fs::read_to_string(path)?;
        let lock: PoetryLock = toml::from_str(&content)?;
        Ok(lock
            .package
            .into_iter()
            .map(|p| PackageSpec::new(p.name, p.version).with_source(self.source_name()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;

    #[test]
    fn test_scan_poetry_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poetry.lock");
        std::fs::write(
            &path,
            r#"
[[package]]
name = "certifi"
version = "2024.2.2"
description = "Python package for providing Mozilla's CA Bundle."
optional = false

[[package]]
name = "idna"
version = "3.6"

[metadata]
lock-version = "2.0"
"#,
        )
        .unwrap();

        let specs = PoetryScanner.scan(&path).unwrap();
        assert_eq!(
            specs,
            vec![
                PackageSpec::new("certifi", "2024.2.2"),
                PackageSpec::new("idna", "3.6"),
            ]
        );
        assert!(specs.iter().all(|s| s.source.as_deref() == Some("poetry.lock")));
    }

    #[test]
    fn test_empty_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poetry.lock");
        std::fs::write(&path, "[metadata]\nlock-version = \"2.0\"\n").unwrap();
        assert!(PoetryScanner.scan(&path).unwrap().is_empty());
    }
}
