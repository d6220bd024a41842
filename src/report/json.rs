use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::ResolvedPackage;

use super::{warnings, Summary};

#[derive(Serialize)]
struct JsonReport<'a> {
    tool: &'static str,
    version: &'static str,
    generated_at: DateTime<Utc>,
    summary: Summary,
    warnings: Vec<String>,
    packages: &'a [ResolvedPackage],
}

pub fn render(pkgs: &[ResolvedPackage]) -> Result<String> {
    let report = JsonReport {
        tool: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        generated_at: Utc::now(),
        summary: Summary::of(pkgs),
        warnings: warnings(pkgs),
        packages: pkgs,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::package;

    #[test]
    fn test_json_report_shape() {
        let pkgs = vec![package("a", &["MIT"], true), package("b", &["UNKNOWN"], false)];
        let out: serde_json::Value = serde_json::from_str(&render(&pkgs).unwrap()).unwrap();

        assert_eq!(out["summary"]["total"], 2);
        assert_eq!(out["summary"]["verified"], 1);
        assert_eq!(out["summary"]["unknown"], 1);
        assert_eq!(out["warnings"].as_array().unwrap().len(), 1);
        assert_eq!(out["packages"][0]["name"], "a");
        assert_eq!(out["packages"][0]["source"], "source-host");
        assert_eq!(out["packages"][0]["licenses"][0]["verified"], true);
        assert_eq!(out["packages"][1]["licenses"][0]["url"], "https://spdx.org/licenses/");
    }
}
