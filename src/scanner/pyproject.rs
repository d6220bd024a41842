//! Root project metadata from `pyproject.toml`.
//!
//! The root project is never looked up remotely: its declared license is
//! normalized locally and completed by the fallback tier.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::license::Normalizer;
use crate::models::{PackageSpec, ResolvedPackage};
use crate::resolver::spdx::SpdxResolver;

#[derive(Debug, Default, Deserialize)]
struct Pyproject {
    project: Option<ProjectTable>,
    tool: Option<ToolTable>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolTable {
    poetry: Option<ProjectTable>,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectTable {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    license: Option<LicenseField>,
    #[serde(default)]
    classifiers: Vec<String>,
    homepage: Option<String>,
    repository: Option<String>,
}

/// `license = "MIT"` or `license = { text = "MIT" }` / `{ file = "LICENSE" }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LicenseField {
    Text(String),
    Table {
        text: Option<String>,
        file: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RootProject {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub repository_url: Option<String>,
    pub license_raw: Option<String>,
    pub license_file: Option<String>,
    pub classifiers: Vec<String>,
}

impl RootProject {
    /// Read `[project]`, or `[tool.poetry]` when `[project]` has no name.
    ///
    /// Returns `Ok(None)` when the directory has no `pyproject.toml`.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join("pyproject.toml");
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let parsed: Pyproject = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        let table = parsed
            .project
            .filter(|p| p.name.is_some())
            .or_else(|| parsed.tool.and_then(|t| t.poetry))
            .unwrap_or_default();
        let Some(name) = table.name else {
            return Ok(None);
        };

        let (license_raw, license_file) = match table.license {
            Some(LicenseField::Text(text)) => (Some(text), None),
            Some(LicenseField::Table { text, file }) => (text, file),
            None => (None, None),
        };

        Ok(Some(Self {
            name,
            version: table.version.unwrap_or_else(|| "0.0.0".to_string()),
            description: table.description,
            homepage: table.homepage,
            repository_url: table.repository,
            license_raw,
            license_file,
            classifiers: table.classifiers,
        }))
    }

    pub fn spec(&self) -> PackageSpec {
        PackageSpec::new(&self.name, &self.version).with_source("pyproject.toml")
    }

    /// Resolve offline: normalize the declared license and attach reference links.
    pub fn resolve(&self, normalizer: &Normalizer) -> ResolvedPackage {
        let mut pkg = ResolvedPackage::pending(&self.spec());
        pkg.description = self.description.clone();
        pkg.homepage = self.homepage.clone();
        pkg.repository_url = self.repository_url.clone();
        pkg.license_raw = self.license_raw.clone();
        pkg.declared_licenses =
            normalizer.normalize(self.license_raw.as_deref().unwrap_or(""), &self.classifiers);
        pkg.is_root_project = true;
        SpdxResolver::new().complete(pkg)
    }
}
