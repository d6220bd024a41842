use crate::license::spdx::generic_reference;
use crate::models::{LicenseSource, ResolvedPackage, UNKNOWN_LICENSE};

use super::TierOutcome;

/// Fallback tier: turns normalized identifiers into generic reference links.
///
/// Makes no network calls and always succeeds. With no declared identifiers
/// it emits a single `UNKNOWN` reference so the license list is never empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpdxResolver;

impl SpdxResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, partial: &ResolvedPackage) -> TierOutcome {
        TierOutcome::Success(self.complete(partial.clone()))
    }

    /// Fill `licenses` from `declared_licenses` when nothing better was found.
    pub fn complete(&self, mut pkg: ResolvedPackage) -> ResolvedPackage {
        if !pkg.licenses.is_empty() {
            return pkg;
        }
        pkg.licenses = if pkg.declared_licenses.is_empty() {
            vec![generic_reference(UNKNOWN_LICENSE)]
        } else {
            pkg.declared_licenses
                .iter()
                .map(|id| generic_reference(id))
                .collect()
        };
        pkg.source = LicenseSource::Fallback;
        pkg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LicenseRef, PackageSpec};

    fn partial(declared: &[&str]) -> ResolvedPackage {
        let mut pkg = ResolvedPackage::pending(&PackageSpec::new("pkg", "1.0"));
        pkg.declared_licenses = declared.iter().map(|s| s.to_string()).collect();
        pkg
    }

    fn success(outcome: TierOutcome) -> ResolvedPackage {
        match outcome {
            TierOutcome::Success(pkg) => pkg,
            other => panic!("fallback must succeed, got {other:?}"),
        }
    }

    #[test]
    fn test_generic_reference_for_declared_license() {
        let pkg = success(SpdxResolver::new().resolve(&partial(&["Apache-2.0"])));
        assert_eq!(
            pkg.licenses,
            vec![LicenseRef {
                id: "Apache-2.0".into(),
                name: "Apache License 2.0".into(),
                url: "https://spdx.org/licenses/Apache-2.0.html".into(),
                verified: false,
            }]
        );
        assert_eq!(pkg.source, LicenseSource::Fallback);
    }

    #[test]
    fn test_dual_license_yields_two_references() {
        let pkg = success(SpdxResolver::new().resolve(&partial(&["MIT", "Apache-2.0"])));
        let ids: Vec<_> = pkg.licenses.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["MIT", "Apache-2.0"]);
        assert!(pkg.licenses.iter().all(|l| !l.verified));
    }

    #[test]
    fn test_nothing_declared_yields_unknown() {
        let pkg = success(SpdxResolver::new().resolve(&partial(&[])));
        assert_eq!(pkg.licenses.len(), 1);
        assert_eq!(pkg.licenses[0].id, "UNKNOWN");
        assert_eq!(pkg.licenses[0].url, "https://spdx.org/licenses/");
        assert!(!pkg.licenses[0].verified);
    }

    #[test]
    fn test_existing_licenses_are_kept() {
        let mut pkg = partial(&["MIT"]);
        pkg.licenses = vec![LicenseRef {
            id: "MIT".into(),
            name: "MIT License".into(),
            url: "https://github.com/a/b/blob/v1.0/LICENSE".into(),
            verified: true,
        }];
        pkg.source = LicenseSource::SourceHost;
        let out = SpdxResolver::new().complete(pkg.clone());
        assert_eq!(out, pkg);
    }
}
