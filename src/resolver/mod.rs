//! License resolution tiers and the waterfall that sequences them.
//!
//! Every tier answers the same question ("can you improve this partial
//! result?") with a [`TierOutcome`]. The [`waterfall::Waterfall`] runs them
//! in a fixed order behind the cache:
//!
//! 1. [`pypi`]: registry metadata, declared license text, repository URL.
//! 2. [`github`]: verified license file, only when a repository URL is known.
//! 3. [`spdx`]: generic reference pages; pure and infallible.
//!
//! [`ratelimit`] holds the per-host state shared by source-host calls.

pub mod github;
pub mod pypi;
pub mod ratelimit;
pub mod spdx;
pub mod waterfall;

use std::time::Duration;

use anyhow::Result;
use reqwest::Client;

use crate::models::{PackageSpec, ResolvedPackage};

/// Result of asking one tier to resolve a package.
#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    /// The tier produced an improved partial result.
    Success(ResolvedPackage),
    /// The tier has no data for this package.
    NotFound,
    /// The tier's service reported quota exhaustion.
    RateLimited,
    /// Network or server failure.
    TransientError,
}

/// One data source of the waterfall.
pub enum Tier {
    Registry(pypi::PypiResolver),
    SourceHost(github::GithubResolver),
    Fallback(spdx::SpdxResolver),
}

impl Tier {
    pub fn name(&self) -> &'static str {
        match self {
            Tier::Registry(_) => "registry",
            Tier::SourceHost(_) => "source-host",
            Tier::Fallback(_) => "fallback",
        }
    }

    /// Whether the tier has what it needs to run on `partial`.
    pub fn applies(&self, partial: &ResolvedPackage) -> bool {
        match self {
            Tier::Registry(_) => true,
            Tier::SourceHost(r) => partial
                .repository_url
                .as_deref()
                .is_some_and(|url| r.supports(url)),
            Tier::Fallback(_) => partial.licenses.is_empty(),
        }
    }

    pub async fn resolve(&self, spec: &PackageSpec, partial: &ResolvedPackage) -> TierOutcome {
        match self {
            Tier::Registry(r) => r.resolve(spec, partial).await,
            Tier::SourceHost(r) => r.resolve(spec, partial).await,
            Tier::Fallback(r) => r.resolve(partial),
        }
    }
}

/// Shared HTTP client; connections are pooled across every tier and task.
pub fn build_client(timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .timeout(timeout)
        .user_agent(concat!(
            "license-waterfall/",
            env!("CARGO_PKG_VERSION"),
            " (license resolution tool)"
        ))
        .build()?;
    Ok(client)
}
