use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "license-waterfall",
    about = "Resolve authoritative license links for Python dependencies",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file [default: ./.license-waterfall/config.toml, fallback ~/.config/license-waterfall/config.toml]
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Show every package and debug logs
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print summary line
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan a lock file or project directory and resolve every package's license
    Resolve(ResolveArgs),
    /// Inspect or clear the license cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Lock file (poetry.lock, Pipfile.lock, requirements*.txt) or project directory
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Report format
    #[arg(long, default_value = "terminal", value_name = "FORMAT")]
    pub report: ReportFormat,

    /// Bypass the cache for reads and writes
    #[arg(long)]
    pub no_cache: bool,

    /// GitHub API token for higher rate limits [default: $GITHUB_TOKEN]
    #[arg(long, value_name = "TOKEN")]
    pub github_token: Option<String>,

    /// Maximum packages resolved at once
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Overall deadline in seconds; unfinished packages are reported as UNKNOWN
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Include the root project's own license from pyproject.toml
    #[arg(long)]
    pub include_root: bool,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show cache location, entry count, and size
    Show,
    /// Remove cached entries: everything, one package, or one package version
    Clear {
        /// Package to clear
        package: Option<String>,
        /// Only this version of PACKAGE
        #[arg(long, requires = "package")]
        version: Option<String>,
    },
    /// Remove expired entries
    Purge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Terminal,
    Json,
}
