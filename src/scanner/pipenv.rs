use std::path::Path;

use anyhow::Result;

use crate::models::PackageSpec;

/// Scanner for `Pipfile.lock` (`default` then `develop` sections).
pub struct PipenvScanner;

impl super::Scanner for PipenvScanner {
    fn source_name(&self) -> &'static str {
        "Pipfile.lock"
    }

    fn can_handle(&self, path: &Path) -> bool {
        path.file_name().is_some_and(|n| n == "Pipfile.lock")
    }

    fn scan(&self, path: &Path) -> Result<Vec<PackageSpec>> {
        let content = std::fs::read_to_string(path)?;
        let json: serde_json::Value = serde_json::from_str(&content)?;
        let mut specs = Vec::new();

        for section in ["default", "develop"] {
            let Some(pkgs) = json.get(section).and_then(|v| v.as_object()) else {
                continue;
            };
            for (name, info) in pkgs {
                let version = info
                    .get("version")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .trim_start_matches("==")
                    .trim();
                if !version.is_empty() {
                    specs.push(PackageSpec::new(name, version).with_source(self.source_name()));
                }
            }
        }

        Ok(specs)
    }
}
