use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::LicenseCache;
use crate::models::{PackageSpec, ResolvedPackage};

use super::github::GithubResolver;
use super::pypi::PypiResolver;
use super::spdx::SpdxResolver;
use super::{Tier, TierOutcome};

/// Per-package orchestrator: cache, then registry, source host, and fallback.
///
/// Holds no per-package state, so one instance is shared by every task of a
/// batch. The cache handle is the only shared mutable state it touches.
pub struct Waterfall {
    cache: Option<LicenseCache>,
    tiers: Vec<Tier>,
    fallback: SpdxResolver,
    ttl: Duration,
}

impl Waterfall {
    pub fn new(
        cache: Option<LicenseCache>,
        registry: PypiResolver,
        source_host: GithubResolver,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            tiers: vec![
                Tier::Registry(registry),
                Tier::SourceHost(source_host),
                Tier::Fallback(SpdxResolver::new()),
            ],
            fallback: SpdxResolver::new(),
            ttl,
        }
    }

    /// Resolve one package. Never fails: the worst case is a single
    /// unverified `UNKNOWN` reference.
    pub async fn resolve(&self, spec: &PackageSpec) -> ResolvedPackage {
        if let Some(hit) = self.lookup(spec).await {
            return hit;
        }

        let resolved = self.run_tiers(spec).await;
        self.store(&resolved).await;
        resolved
    }

    /// Result reported for a package that ran out of time.
    pub fn abandoned(&self, spec: &PackageSpec) -> ResolvedPackage {
        self.fallback.complete(ResolvedPackage::pending(spec))
    }

    async fn lookup(&self, spec: &PackageSpec) -> Option<ResolvedPackage> {
        let cache = self.cache.as_ref()?;
        match cache.get(&spec.name, &spec.version).await {
            Ok(Some(licenses)) => {
                debug!(package = %spec.name, version = %spec.version, "cache hit");
                Some(ResolvedPackage::from_cache(spec, licenses))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(package = %spec.name, version = %spec.version, "cache read failed: {e}");
                None
            }
        }
    }

    async fn run_tiers(&self, spec: &PackageSpec) -> ResolvedPackage {
        let mut partial = ResolvedPackage::pending(spec);

        for tier in &self.tiers {
            if !tier.applies(&partial) {
                debug!(package = %spec.name, tier = tier.name(), "tier skipped");
                continue;
            }
            match tier.resolve(spec, &partial).await {
                TierOutcome::Success(next) => {
                    partial = next;
                    if partial.is_verified() {
                        break;
                    }
                }
                TierOutcome::NotFound => {
                    debug!(package = %spec.name, version = %spec.version, tier = tier.name(), "not found");
                }
                outcome @ (TierOutcome::RateLimited | TierOutcome::TransientError) => {
                    warn!(
                        package = %spec.name,
                        version = %spec.version,
                        tier = tier.name(),
                        ?outcome,
                        "tier unavailable, falling through"
                    );
                }
            }
        }

        let resolved = self.fallback.complete(partial);
        info!(
            package = %spec.name,
            version = %spec.version,
            source = %resolved.source,
            licenses = %resolved.license_display(),
            "resolved"
        );
        resolved
    }

    async fn store(&self, resolved: &ResolvedPackage) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache
            .set(&resolved.name, &resolved.version, &resolved.licenses, self.ttl)
            .await
        {
            warn!(package = %resolved.name, version = %resolved.version, "cache write failed: {e}");
        }
    }
}
