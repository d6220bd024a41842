use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::models::ResolvedPackage;

use super::{warnings, Status, Summary};

/// Render a colored terminal report.
pub fn render(pkgs: &[ResolvedPackage], path: &Path, verbose: bool, quiet: bool) -> Result<()> {
    let summary = Summary::of(pkgs);

    if quiet {
        println!(
            "Total: {}  Verified: {}  Unverified: {}  Unknown: {}",
            summary.total,
            summary.verified.to_string().green(),
            summary.unverified.to_string().yellow(),
            summary.unknown.to_string().red(),
        );
        return Ok(());
    }

    println!(
        "\n {} v{}",
        "license-waterfall".bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!(" Scanned: {}\n", path.display());

    println!(" ┌────────────────────────────────────────────────────┐");
    println!(" │  {:<48} │", "SUMMARY".bold());
    println!(" │  {:<48} │", format!("Total packages     : {}", summary.total));
    println!(
        " │  {:<48} │",
        format!(
            "{}  Verified        : {:>4}  {}",
            "✓".green(),
            summary.verified,
            summarize_licenses(pkgs, Status::Verified)
        )
    );
    println!(
        " │  {:<48} │",
        format!(
            "{}  Unverified      : {:>4}  {}",
            "⚠".yellow(),
            summary.unverified,
            summarize_licenses(pkgs, Status::Unverified)
        )
    );
    println!(
        " │  {:<48} │",
        format!("{}  Unknown         : {:>4}", "✗".red(), summary.unknown)
    );
    println!(" └────────────────────────────────────────────────────┘\n");

    if summary.unknown > 0 {
        println!(" {} Packages without a recognised license:\n", "[UNKNOWN]".red().bold());
        render_table(pkgs, Some(Status::Unknown));
        println!();
    }

    if verbose {
        println!(" {} All packages:\n", "[ALL]".cyan().bold());
        render_table(pkgs, None);
        println!();
    } else if summary.verified + summary.unverified > 0 {
        println!(" {} Resolved packages:\n", "[OK]".green().bold());
        render_table(pkgs, Some(Status::Verified));
        render_table(pkgs, Some(Status::Unverified));
        println!();
    }

    let warnings = warnings(pkgs);
    if !warnings.is_empty() {
        println!(" {} Resolved via fallback only:", "[WARN]".yellow().bold());
        for warning in &warnings {
            println!("   {} {}", "⚠".yellow(), warning);
        }
        println!();
    }

    Ok(())
}

fn render_table(pkgs: &[ResolvedPackage], filter: Option<Status>) {
    let rows: Vec<_> = pkgs
        .iter()
        .filter(|p| filter.map_or(true, |s| Status::of(p) == s))
        .collect();
    if rows.is_empty() {
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Version").add_attribute(Attribute::Bold),
            Cell::new("License").add_attribute(Attribute::Bold),
            Cell::new("Source").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
            Cell::new("URL").add_attribute(Attribute::Bold),
        ]);

    for pkg in rows {
        let status = Status::of(pkg);
        let (status_str, status_color) = match status {
            Status::Verified => ("✓ verified", Color::Green),
            Status::Unverified => ("⚠ unverified", Color::Yellow),
            Status::Unknown => ("✗ unknown", Color::Red),
        };
        let name = if pkg.is_root_project {
            format!("{} (root)", pkg.name)
        } else {
            pkg.name.clone()
        };
        let url = pkg
            .primary_license()
            .map(|l| l.url.as_str())
            .unwrap_or("");

        table.add_row(vec![
            Cell::new(name),
            Cell::new(&pkg.version),
            Cell::new(pkg.license_display()),
            Cell::new(pkg.source.to_string()).fg(Color::DarkGrey),
            Cell::new(status_str)
                .fg(status_color)
                .set_alignment(CellAlignment::Center),
            Cell::new(url),
        ]);
    }

    println!("{}", table);
}

/// Top three license ids among packages with `status`, e.g. `[MIT (4), Apache-2.0 (2)]`.
fn summarize_licenses(pkgs: &[ResolvedPackage], status: Status) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for pkg in pkgs.iter().filter(|p| Status::of(p) == status) {
        for license in &pkg.licenses {
            *counts.entry(license.id.as_str()).or_insert(0) += 1;
        }
    }

    let mut pairs: Vec<(&str, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let summary: Vec<String> = pairs
        .iter()
        .take(3)
        .map(|(lic, cnt)| format!("{} ({})", lic, cnt))
        .collect();

    if summary.is_empty() {
        String::new()
    } else {
        format!("[{}]", summary.join(", "))
    }
}
