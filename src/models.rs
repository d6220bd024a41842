use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel identifier for licenses that could not be recognized.
pub const UNKNOWN_LICENSE: &str = "UNKNOWN";

/// A dependency as produced by a lock-file scanner.
///
/// Identity is `(name, version)`; the provenance tag does not take part in
/// equality or hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
    /// File the dependency was read from (e.g. `poetry.lock`).
    pub source: Option<String>,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.name, &self.version)
    }
}

impl PartialEq for PackageSpec {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PackageSpec {}

impl Hash for PackageSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl std::fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

/// A resolved license with a link to its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRef {
    /// Canonical identifier, or [`UNKNOWN_LICENSE`].
    pub id: String,
    pub name: String,
    pub url: String,
    /// `true` when `url` points at the license file itself rather than a
    /// generic reference page.
    pub verified: bool,
}

/// Which step of the waterfall produced the final license list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LicenseSource {
    Cache,
    SourceHost,
    Fallback,
}

impl std::fmt::Display for LicenseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LicenseSource::Cache => write!(f, "cache"),
            LicenseSource::SourceHost => write!(f, "source-host"),
            LicenseSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// Package metadata enriched with its licenses.
///
/// While the waterfall runs this doubles as the partial result handed from
/// tier to tier; once returned by the orchestrator it is final and
/// `licenses` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub repository_url: Option<String>,
    pub author: Option<String>,
    pub licenses: Vec<LicenseRef>,
    pub is_root_project: bool,
    pub source: LicenseSource,
    /// Raw license text as declared by the registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_raw: Option<String>,
    /// Canonical identifiers found by normalization, before any URL is attached.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declared_licenses: Vec<String>,
}

impl ResolvedPackage {
    /// Empty partial result for a package about to be resolved.
    pub fn pending(spec: &PackageSpec) -> Self {
        Self {
            name: spec.name.clone(),
            version: spec.version.clone(),
            description: None,
            homepage: None,
            repository_url: None,
            author: None,
            licenses: Vec::new(),
            is_root_project: false,
            source: LicenseSource::Fallback,
            license_raw: None,
            declared_licenses: Vec::new(),
        }
    }

    /// Result rebuilt from a cache record.
    pub fn from_cache(spec: &PackageSpec, licenses: Vec<LicenseRef>) -> Self {
        Self {
            licenses,
            source: LicenseSource::Cache,
            ..Self::pending(spec)
        }
    }

    pub fn primary_license(&self) -> Option<&LicenseRef> {
        self.licenses.first()
    }

    /// `true` when at least one license links to an actual license file.
    pub fn is_verified(&self) -> bool {
        self.licenses.iter().any(|l| l.verified)
    }

    /// License ids joined for display, e.g. `MIT OR Apache-2.0`.
    pub fn license_display(&self) -> String {
        if self.licenses.is_empty() {
            return UNKNOWN_LICENSE.to_string();
        }
        self.licenses
            .iter()
            .map(|l| l.id.as_str())
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

/// One row of the persistent cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub name: String,
    pub version: String,
    /// JSON-serialized `Vec<LicenseRef>`.
    pub payload: String,
    pub resolved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheRecord {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_spec_identity_ignores_source() {
        let a = PackageSpec::new("requests", "2.31.0").with_source("poetry.lock");
        let b = PackageSpec::new("requests", "2.31.0");
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_license_display() {
        let mut pkg = ResolvedPackage::pending(&PackageSpec::new("x", "1"));
        assert_eq!(pkg.license_display(), "UNKNOWN");

        pkg.licenses = vec![
            LicenseRef {
                id: "MIT".into(),
                name: "MIT License".into(),
                url: "https://spdx.org/licenses/MIT.html".into(),
                verified: false,
            },
            LicenseRef {
                id: "Apache-2.0".into(),
                name: "Apache License 2.0".into(),
                url: "https://spdx.org/licenses/Apache-2.0.html".into(),
                verified: false,
            },
        ];
        assert_eq!(pkg.license_display(), "MIT OR Apache-2.0");
        assert!(!pkg.is_verified());
        assert_eq!(pkg.primary_license().map(|l| l.id.as_str()), Some("MIT"));
    }
}
