use std::path::Path;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, warn};

use crate::models::PackageSpec;

/// Scanner for pip `requirements*.txt` files.
///
/// Ranged specifiers keep their lower bound: `pkg>=1.0,<2.0` → `1.0`.
/// Lines without a version, options, and VCS URLs are skipped.
pub struct RequirementsScanner;

impl super::Scanner for RequirementsScanner {
    fn source_name(&self) -> &'static str {
        "requirements.txt"
    }

    fn can_handle(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(str::to_lowercase)
            .is_some_and(|name| name.contains("requirements") && name.ends_with(".txt"))
    }

    fn scan(&self, path: &Path) -> Result<Vec<PackageSpec>> {
        let content = std::fs::read_to_string(path)?;
        parse_requirements(&content, self.source_name())
    }
}

fn parse_requirements(content: &str, source: &str) -> Result<Vec<PackageSpec>> {
    let re = Regex::new(
        r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)(?:\[[^\]]*\])?\s*(?:[<>=~!]+)\s*([0-9][0-9A-Za-z._+-]*)",
    )?;
    let vcs = Regex::new(r"(^git\+|\.git[@#]|^-e\s+git\+)")?;
    let mut specs = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if vcs.is_match(line) {
            warn!(line = line_no + 1, "skipping VCS requirement");
            continue;
        }
        if line.starts_with('-') {
            continue;
        }

        let first = line.split([',', ';']).next().unwrap_or(line).trim();
        match re.captures(first) {
            Some(caps) => specs.push(PackageSpec::new(&caps[1], &caps[2]).with_source(source)),
            None => debug!(line = line_no + 1, "no pinned version, skipped"),
        }
    }

    Ok(specs)
}
