//! `license-waterfall`: resolve authoritative license links for Python dependencies.
//!
//! # Flow
//! 1. Parse CLI arguments ([`cli`]) and initialise logging.
//! 2. Load configuration ([`config::load_config`]).
//! 3. Scan the lock file or project directory ([`scanner`]).
//! 4. Purge expired cache records ([`cache`]).
//! 5. Resolve every package through the cached waterfall
//!    ([`resolver::waterfall`]) under a bounded, deadline-aware
//!    [`scheduler::Scheduler`].
//! 6. Render the requested report ([`report`]); fallback-only packages are
//!    warnings, never failures.

mod cache;
mod cli;
mod config;
mod license;
mod models;
mod report;
mod resolver;
mod scanner;
mod scheduler;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use cache::LicenseCache;
use cli::{CacheAction, Cli, Command, ReportFormat, ResolveArgs};
use config::{load_config, Config};
use license::Normalizer;
use resolver::github::GithubResolver;
use resolver::pypi::PypiResolver;
use resolver::ratelimit::{BackoffPolicy, RateLimiter};
use resolver::waterfall::Waterfall;
use scanner::pyproject::RootProject;
use scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Resolve(args) => {
            run_resolve(args, cli.config.as_deref(), cli.verbose, cli.quiet).await
        }
        Command::Cache { action } => {
            let config = load_config(Path::new("."), cli.config.as_deref())?;
            run_cache(action, &config).await
        }
    }
}

/// `RUST_LOG` wins; otherwise warnings only, or debug for this crate with `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,license_waterfall=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run_resolve(
    args: ResolveArgs,
    config_override: Option<&Path>,
    verbose: bool,
    quiet: bool,
) -> Result<()> {
    let path = args
        .path
        .canonicalize()
        .unwrap_or_else(|_| args.path.clone());
    let project_dir = if path.is_file() {
        path.parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        path.clone()
    };

    let config = load_config(&project_dir, config_override)?;
    let specs = scanner::scan_path(&path)?;

    if !quiet {
        eprintln!("  {} {} packages", "→".cyan(), specs.len());
    }

    let normalizer = Arc::new(Normalizer::new());
    let client = resolver::build_client(config.resolver.request_timeout())?;
    let token = args.github_token.or_else(|| config.source_host.token());
    let policy = BackoffPolicy {
        max_attempts: config.source_host.max_attempts.max(1),
        ..BackoffPolicy::default()
    };
    let limiter = Arc::new(RateLimiter::for_credentials(token.is_some(), policy.clone()));

    let cache = if args.no_cache || !config.cache.enabled {
        None
    } else {
        open_cache(&config).await
    };

    let waterfall = Waterfall::new(
        cache,
        PypiResolver::new(
            client.clone(),
            &config.resolver.registry_url,
            Arc::clone(&normalizer),
        )
        .with_retry(policy),
        GithubResolver::new(
            client,
            &config.resolver.source_host_api_url,
            token,
            limiter,
            Arc::clone(&normalizer),
        ),
        config.cache.ttl(),
    );

    let mut scheduler = Scheduler::new(
        Arc::new(waterfall),
        args.concurrency
            .unwrap_or(config.resolver.max_concurrency),
    );
    if let Some(deadline) = args
        .timeout
        .map(Duration::from_secs)
        .or_else(|| config.resolver.deadline())
    {
        scheduler = scheduler.with_deadline(deadline);
    }
    if !quiet && args.report == ReportFormat::Terminal {
        let pb = ProgressBar::new(specs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )?
                .progress_chars("#>-"),
        );
        scheduler = scheduler.with_progress(pb);
    }

    let mut resolved = scheduler.resolve_all(&specs).await;

    if args.include_root {
        match RootProject::load(&project_dir)? {
            Some(root) => resolved.insert(0, root.resolve(&normalizer)),
            None => warn!(dir = %project_dir.display(), "--include-root given but no pyproject.toml project found"),
        }
    }

    match args.report {
        ReportFormat::Terminal => report::terminal::render(&resolved, &path, verbose, quiet)?,
        ReportFormat::Json => println!("{}", report::json::render(&resolved)?),
    }

    Ok(())
}

/// Open the cache and drop expired records. A cache that cannot be opened
/// disables caching for this run instead of failing it.
async fn open_cache(config: &Config) -> Option<LicenseCache> {
    let dir = config.cache.dir();
    let cache = match LicenseCache::open(&dir) {
        Ok(cache) => cache,
        Err(e) => {
            warn!(dir = %dir.display(), "cache unavailable, continuing without it: {e}");
            return None;
        }
    };
    debug!(path = %cache.path().display(), "using license cache");
    match cache.purge_expired().await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "purged expired cache records"),
        Err(e) => warn!("failed to purge expired cache records: {e}"),
    }
    Some(cache)
}

async fn run_cache(action: CacheAction, config: &Config) -> Result<()> {
    let cache = LicenseCache::open(&config.cache.dir())?;

    match action {
        CacheAction::Show => {
            let stats = cache.stats().await?;
            println!("{}", "License cache".bold());
            println!("  Location : {}", stats.path.display());
            println!("  Entries  : {}", stats.entries);
            println!("  Size     : {}", human_size(stats.size_bytes));
            match stats.oldest_resolved_at {
                Some(oldest) => println!("  Oldest   : {}", oldest.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("  Oldest   : -"),
            }
        }
        CacheAction::Clear { package, version } => {
            let removed = cache
                .clear(package.as_deref(), version.as_deref())
                .await?;
            let target = match (&package, &version) {
                (Some(p), Some(v)) => format!("{p}=={v}"),
                (Some(p), None) => p.clone(),
                _ => "all packages".to_string(),
            };
            println!("{} Cleared {} entries ({})", "✓".green(), removed, target);
        }
        CacheAction::Purge => {
            let removed = cache.purge_expired().await?;
            println!("{} Purged {} expired entries", "✓".green(), removed);
        }
    }

    Ok(())
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
