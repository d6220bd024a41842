use std::collections::HashMap;
use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::license::Normalizer;
use crate::models::{PackageSpec, ResolvedPackage};

use super::ratelimit::BackoffPolicy;
use super::TierOutcome;

pub const DEFAULT_REGISTRY_URL: &str = "https://pypi.org";

/// `project_urls` keys that usually point at the source repository, in
/// order of preference.
const REPOSITORY_KEYS: &[&str] = &[
    "Source",
    "Repository",
    "Source Code",
    "source",
    "repository",
    "Code",
    "GitHub",
    "GitLab",
];

const SOURCE_HOSTS: &[&str] = &["github.com", "gitlab.com", "bitbucket.org"];

#[derive(Debug, Deserialize)]
struct PypiResponse {
    info: PypiInfo,
}

#[derive(Debug, Default, Deserialize)]
struct PypiInfo {
    summary: Option<String>,
    author: Option<String>,
    home_page: Option<String>,
    license: Option<String>,
    license_expression: Option<String>,
    classifiers: Option<Vec<String>>,
    project_urls: Option<HashMap<String, String>>,
}

/// Registry tier: package metadata from the PyPI JSON API.
pub struct PypiResolver {
    client: Client,
    base_url: String,
    normalizer: Arc<Normalizer>,
    policy: BackoffPolicy,
}

impl PypiResolver {
    pub fn new(client: Client, base_url: &str, normalizer: Arc<Normalizer>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            normalizer,
            policy: BackoffPolicy::default(),
        }
    }

    /// Retry network failures and `5xx` responses under `policy`.
    pub fn with_retry(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch `/pypi/{name}/{version}/json` and merge it into `partial`.
    ///
    /// Transient failures are retried with backoff up to the policy's attempt
    /// bound; the last outcome is returned once attempts run out.
    pub async fn resolve(&self, spec: &PackageSpec, partial: &ResolvedPackage) -> TierOutcome {
        let url = format!("{}/pypi/{}/{}/json", self.base_url, spec.name, spec.version);
        let attempts = self.policy.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            let outcome = self.fetch(spec, partial, &url).await;
            attempt += 1;
            if outcome != TierOutcome::TransientError || attempt >= attempts {
                return outcome;
            }
            let delay = self.policy.backoff(attempt - 1);
            debug!(package = %spec.name, attempt, ?delay, "retrying registry lookup");
            tokio::time::sleep(delay).await;
        }
    }

    async fn fetch(&self, spec: &PackageSpec, partial: &ResolvedPackage, url: &str) -> TierOutcome {
        debug!(package = %spec.name, version = %spec.version, %url, "fetching registry metadata");

        let response = match self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(package = %spec.name, version = %spec.version, "registry request failed: {e}");
                return TierOutcome::TransientError;
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(package = %spec.name, version = %spec.version, "not found on registry");
            return TierOutcome::NotFound;
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return TierOutcome::RateLimited;
        }
        if status.is_server_error() {
            warn!(package = %spec.name, version = %spec.version, %status, "registry server error");
            return TierOutcome::TransientError;
        }
        if !status.is_success() {
            debug!(package = %spec.name, version = %spec.version, %status, "unexpected registry status");
            return TierOutcome::NotFound;
        }

        match response.json::<PypiResponse>().await {
            Ok(data) => TierOutcome::Success(self.apply(data.info, partial.clone())),
            Err(e) if e.is_decode() => {
                warn!(package = %spec.name, version = %spec.version, "unreadable registry response: {e}");
                TierOutcome::NotFound
            }
            Err(e) => {
                warn!(package = %spec.name, version = %spec.version, "registry body read failed: {e}");
                TierOutcome::TransientError
            }
        }
    }

    fn apply(&self, info: PypiInfo, mut pkg: ResolvedPackage) -> ResolvedPackage {
        let raw = non_empty(info.license_expression).or_else(|| non_empty(info.license));
        let classifiers = info.classifiers.unwrap_or_default();

        pkg.declared_licenses = self
            .normalizer
            .normalize(raw.as_deref().unwrap_or(""), &classifiers);
        pkg.license_raw = raw;
        pkg.description = non_empty(info.summary);
        pkg.author = non_empty(info.author);
        pkg.homepage = non_empty(info.home_page);
        pkg.repository_url = repository_url(
            info.project_urls.as_ref(),
            pkg.homepage.as_deref(),
        );
        pkg
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_source_host_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    SOURCE_HOSTS.iter().any(|host| lower.contains(host))
}

/// Pick the repository URL from `project_urls`, falling back to the homepage.
fn repository_url(
    project_urls: Option<&HashMap<String, String>>,
    homepage: Option<&str>,
) -> Option<String> {
    let from_project_urls = project_urls.and_then(|urls| {
        REPOSITORY_KEYS
            .iter()
            .filter_map(|key| urls.get(*key))
            .find(|url| is_source_host_url(url))
            .cloned()
    });

    from_project_urls.or_else(|| {
        homepage
            .filter(|url| is_source_host_url(url))
            .map(str::to_string)
    })
}
