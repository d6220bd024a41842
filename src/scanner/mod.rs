//! Lock-file scanners: turn a dependency manifest into [`PackageSpec`]s.
//!
//! A path may name a single lock file or a project directory. In a directory
//! every recognised lock file is read in priority order
//! (`poetry.lock` → `Pipfile.lock` → `requirements.txt`) and the results are
//! de-duplicated by case-insensitive package name; the first file wins.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::models::PackageSpec;

pub mod pipenv;
pub mod poetry;
pub mod pyproject;
pub mod requirements;

pub trait Scanner {
    /// Provenance tag attached to every spec this scanner emits.
    fn source_name(&self) -> &'static str;
    fn can_handle(&self, path: &Path) -> bool;
    fn scan(&self, path: &Path) -> Result<Vec<PackageSpec>>;
}

/// Every scanner, in priority order.
fn scanners() -> Vec<Box<dyn Scanner>> {
    vec![
        Box::new(poetry::PoetryScanner),
        Box::new(pipenv::PipenvScanner),
        Box::new(requirements::RequirementsScanner),
    ]
}

/// Scan a lock file, or every lock file found in a project directory.
pub fn scan_path(path: &Path) -> Result<Vec<PackageSpec>> {
    if path.is_file() {
        let Some(scanner) = scanners().into_iter().find(|s| s.can_handle(path)) else {
            bail!(
                "no scanner for '{}' (supported: poetry.lock, Pipfile.lock, requirements*.txt)",
                path.display()
            );
        };
        return scanner
            .scan(path)
            .with_context(|| format!("failed to scan {}", path.display()));
    }

    let mut specs = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut found_any = false;

    for scanner in scanners() {
        let file = path.join(scanner.source_name());
        if !file.is_file() {
            continue;
        }
        found_any = true;
        let parsed = scanner
            .scan(&file)
            .with_context(|| format!("failed to scan {}", file.display()))?;
        debug!(file = %file.display(), packages = parsed.len(), "scanned lock file");

        for spec in parsed {
            if seen.insert(spec.name.to_lowercase()) {
                specs.push(spec);
            }
        }
    }

    if !found_any {
        bail!("no supported lock file found in {}", path.display());
    }
    Ok(specs)
}
