//! Report renderers for resolved packages.
//!
//! - [`terminal`]: colored tables with a summary box; respects `--verbose` / `--quiet`.
//! - [`json`]: machine-readable document on stdout.
//!
//! Packages resolved only through the fallback tier carry generic reference
//! links; both renderers surface them as warnings.

pub mod json;
pub mod terminal;

use serde::Serialize;

use crate::models::{ResolvedPackage, UNKNOWN_LICENSE};

/// How trustworthy a package's license links are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// At least one link points at the license file itself.
    Verified,
    /// Only generic reference pages.
    Unverified,
    /// No license could be recognised.
    Unknown,
}

impl Status {
    pub fn of(pkg: &ResolvedPackage) -> Self {
        if pkg.licenses.iter().all(|l| l.id == UNKNOWN_LICENSE) {
            Status::Unknown
        } else if pkg.is_verified() {
            Status::Verified
        } else {
            Status::Unverified
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Verified => write!(f, "verified"),
            Status::Unverified => write!(f, "unverified"),
            Status::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub verified: usize,
    pub unverified: usize,
    pub unknown: usize,
}

impl Summary {
    pub fn of(pkgs: &[ResolvedPackage]) -> Self {
        let mut summary = Summary {
            total: pkgs.len(),
            ..Default::default()
        };
        for pkg in pkgs {
            match Status::of(pkg) {
                Status::Verified => summary.verified += 1,
                Status::Unverified => summary.unverified += 1,
                Status::Unknown => summary.unknown += 1,
            }
        }
        summary
    }
}

/// One line per package that only has generic reference links.
pub fn warnings(pkgs: &[ResolvedPackage]) -> Vec<String> {
    pkgs.iter()
        .filter_map(|pkg| match Status::of(pkg) {
            Status::Verified => None,
            Status::Unverified => Some(format!(
                "{}=={}: {} not verified against a license file",
                pkg.name,
                pkg.version,
                pkg.license_display()
            )),
            Status::Unknown => Some(format!(
                "{}=={}: license could not be determined",
                pkg.name, pkg.version
            )),
        })
        .collect()
}
