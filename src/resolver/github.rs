use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::license::spdx::{generic_reference, license_name};
use crate::license::Normalizer;
use crate::models::{LicenseRef, LicenseSource, PackageSpec, ResolvedPackage, UNKNOWN_LICENSE};

use super::ratelimit::RateLimiter;
use super::TierOutcome;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const GITHUB_HOSTS: &[&str] = &["github.com", "www.github.com"];
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct LicenseResponse {
    path: Option<String>,
    html_url: Option<String>,
    license: Option<LicenseInfo>,
}

#[derive(Debug, Deserialize)]
struct LicenseInfo {
    spdx_id: Option<String>,
    name: Option<String>,
}

/// What a single call to the source host returned.
enum Fetch<T> {
    Found(T),
    Missing,
    Limited(Option<Duration>),
    Failed,
}

/// Source-host tier: verified license files from the GitHub license API.
pub struct GithubResolver {
    client: Client,
    api_base: String,
    host: String,
    token: Option<String>,
    limiter: Arc<RateLimiter>,
    normalizer: Arc<Normalizer>,
}

impl GithubResolver {
    pub fn new(
        client: Client,
        api_base: &str,
        token: Option<String>,
        limiter: Arc<RateLimiter>,
        normalizer: Arc<Normalizer>,
    ) -> Self {
        let api_base = api_base.trim_end_matches('/').to_string();
        let host = Url::parse(&api_base)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| api_base.clone());
        Self {
            client,
            api_base,
            host,
            token: token.filter(|t| !t.is_empty()),
            limiter,
            normalizer,
        }
    }

    pub fn supports(&self, repository_url: &str) -> bool {
        parse_github_url(repository_url).is_some()
    }

    /// Look up the repository's license file, retrying rate-limited and failed
    /// calls up to the limiter's attempt bound.
    ///
    /// Exhausted rate-limit retries report `NotFound` so the waterfall moves on.
    pub async fn resolve(&self, spec: &PackageSpec, partial: &ResolvedPackage) -> TierOutcome {
        let Some((owner, repo)) = partial.repository_url.as_deref().and_then(parse_github_url)
        else {
            return TierOutcome::NotFound;
        };

        let policy = self.limiter.policy().clone();
        let mut last = TierOutcome::NotFound;

        for attempt in 0..policy.max_attempts {
            let Some(permit) = self.limiter.acquire(&self.host).await else {
                debug!(package = %spec.name, host = %self.host, "source host quota exhausted");
                return TierOutcome::NotFound;
            };
            let fetched = self.fetch_license(&owner, &repo).await;
            drop(permit);

            match fetched {
                Fetch::Found(body) => {
                    return match self.build(spec, partial, &owner, &repo, body).await {
                        Some(pkg) => TierOutcome::Success(pkg),
                        None => TierOutcome::NotFound,
                    };
                }
                Fetch::Missing => {
                    debug!(package = %spec.name, %owner, %repo, "no license file on source host");
                    return TierOutcome::NotFound;
                }
                Fetch::Limited(retry_after) => {
                    self.limiter
                        .record_rate_limited(&self.host, attempt, retry_after);
                    last = TierOutcome::RateLimited;
                }
                Fetch::Failed => {
                    last = TierOutcome::TransientError;
                    if attempt + 1 < policy.max_attempts {
                        tokio::time::sleep(policy.backoff(attempt)).await;
                    }
                }
            }
        }

        match last {
            TierOutcome::RateLimited => {
                warn!(
                    package = %spec.name,
                    attempts = policy.max_attempts,
                    "source host still rate limited, giving up"
                );
                TierOutcome::NotFound
            }
            other => other,
        }
    }

    async fn fetch_license(&self, owner: &str, repo: &str) -> Fetch<LicenseResponse> {
        let url = format!("{}/repos/{owner}/{repo}/license", self.api_base);
        let response = match self.get(&url).await {
            Ok(response) => response,
            Err(e) => {
                warn!(%owner, %repo, "source host request failed: {e}");
                return Fetch::Failed;
            }
        };

        let status = response.status();
        if let Some(retry_after) = rate_limit_signal(status, response.headers()) {
            return Fetch::Limited(retry_after);
        }
        if status.is_server_error() {
            warn!(%owner, %repo, %status, "source host server error");
            return Fetch::Failed;
        }
        if !status.is_success() {
            return Fetch::Missing;
        }

        match response.json::<LicenseResponse>().await {
            Ok(body) => Fetch::Found(body),
            Err(e) if e.is_decode() => {
                debug!(%owner, %repo, "unreadable license response: {e}");
                Fetch::Missing
            }
            Err(e) => {
                warn!(%owner, %repo, "source host body read failed: {e}");
                Fetch::Failed
            }
        }
    }

    async fn build(
        &self,
        spec: &PackageSpec,
        partial: &ResolvedPackage,
        owner: &str,
        repo: &str,
        body: LicenseResponse,
    ) -> Option<ResolvedPackage> {
        let html_url = body.html_url?;
        let info = body.license?;

        let id = info
            .spdx_id
            .filter(|id| !id.is_empty() && id != "NOASSERTION")
            .and_then(|id| self.normalizer.normalize(&id, &[]).into_iter().next())
            .filter(|id| id != UNKNOWN_LICENSE)
            .or_else(|| {
                partial
                    .declared_licenses
                    .first()
                    .filter(|id| *id != UNKNOWN_LICENSE)
                    .cloned()
            })
            .unwrap_or_else(|| UNKNOWN_LICENSE.to_string());

        let name = info
            .name
            .filter(|n| !n.is_empty() && n != "Other")
            .unwrap_or_else(|| license_name(&id));

        let url = match (self.pin_to_tag(owner, repo, &spec.version).await, body.path) {
            (Some(tag), Some(path)) => format!("https://github.com/{owner}/{repo}/blob/{tag}/{path}"),
            _ => html_url,
        };

        let mut licenses = vec![LicenseRef {
            id: id.clone(),
            name,
            url,
            verified: true,
        }];
        licenses.extend(
            partial
                .declared_licenses
                .iter()
                .filter(|other| **other != id && *other != UNKNOWN_LICENSE)
                .map(|other| generic_reference(other)),
        );

        let mut pkg = partial.clone();
        pkg.licenses = licenses;
        pkg.source = LicenseSource::SourceHost;
        Some(pkg)
    }

    /// Find a tag named after `version` (`1.2.3` or `v1.2.3`).
    ///
    /// Best effort: any failure leaves the link on the default branch.
    async fn pin_to_tag(&self, owner: &str, repo: &str, version: &str) -> Option<String> {
        for tag in [version.to_string(), format!("v{version}")] {
            let permit = self.limiter.acquire(&self.host).await?;
            let url = format!("{}/repos/{owner}/{repo}/git/ref/tags/{tag}", self.api_base);
            let response = self.get(&url).await.ok()?;
            drop(permit);

            let status = response.status();
            if let Some(retry_after) = rate_limit_signal(status, response.headers()) {
                self.limiter.record_rate_limited(&self.host, 0, retry_after);
                return None;
            }
            if status.is_success() {
                debug!(%owner, %repo, %tag, "pinned license link to tag");
                return Some(tag);
            }
        }
        None
    }

    async fn get(&self, url: &str) -> Result<Response, reqwest::Error> {
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        request.send().await
    }
}

/// `Some(retry_after)` when the response signals quota exhaustion.
fn rate_limit_signal(status: StatusCode, headers: &HeaderMap) -> Option<Option<Duration>> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };

    let retry_after = header(RETRY_AFTER.as_str())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let exhausted = header("x-ratelimit-remaining") == Some("0");

    let limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && (exhausted || retry_after.is_some()));
    if !limited {
        return None;
    }

    let until_reset = header("x-ratelimit-reset")
        .filter(|_| exhausted)
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|reset| {
            let secs = reset.checked_sub(chrono::Utc::now().timestamp())?;
            u64::try_from(secs).ok().map(Duration::from_secs)
        });

    Some(retry_after.or(until_reset))
}

/// Extract `(owner, repo)` from a GitHub repository URL.
///
/// Accepts `https://`, `git+https://`, and `git@github.com:` forms; extra
/// path segments such as `/tree/main` are ignored.
pub fn parse_github_url(url: &str) -> Option<(String, String)> {
    let url = url.trim();
    let url = url.strip_prefix("git+").unwrap_or(url);
    let normalized = match url.strip_prefix("git@github.com:") {
        Some(rest) => format!("https://github.com/{rest}"),
        None => url.to_string(),
    };

    let parsed = Url::parse(&normalized).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    if !GITHUB_HOSTS.contains(&host.as_str()) {
        return None;
    }

    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ratelimit::BackoffPolicy;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: false,
            max_attempts: 3,
            max_wait: Duration::from_secs(1),
        }
    }

    fn resolver(server: &MockServer, token: Option<&str>) -> GithubResolver {
        GithubResolver::new(
            Client::new(),
            &server.uri(),
            token.map(str::to_string),
            Arc::new(RateLimiter::new(fast_policy(), 4)),
            Arc::new(Normalizer::new()),
        )
    }

    fn partial(repo_url: &str, declared: &[&str]) -> (PackageSpec, ResolvedPackage) {
        let spec = PackageSpec::new("requests", "2.31.0");
        let mut pkg = ResolvedPackage::pending(&spec);
        pkg.repository_url = Some(repo_url.to_string());
        pkg.declared_licenses = declared.iter().map(|s| s.to_string()).collect();
        (spec, pkg)
    }

    fn license_body() -> serde_json::Value {
        serde_json::json!({
            "name": "LICENSE",
            "path": "LICENSE",
            "html_url": "https://github.com/psf/requests/blob/main/LICENSE",
            "license": {
                "key": "apache-2.0",
                "name": "Apache License 2.0",
                "spdx_id": "Apache-2.0"
            }
        })
    }

    async fn mount_license(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/license"))
            .respond_with(ResponseTemplate::new(200).set_body_json(license_body()))
            .mount(server)
            .await;
    }

    fn success(outcome: TierOutcome) -> ResolvedPackage {
        match outcome {
            TierOutcome::Success(pkg) => pkg,
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_verified_reference_pinned_to_version_tag() {
        let server = MockServer::start().await;
        mount_license(&server).await;
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/git/ref/tags/2.31.0"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/git/ref/tags/v2.31.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ref": "refs/tags/v2.31.0"
            })))
            .mount(&server)
            .await;

        let (spec, pkg) = partial("https://github.com/psf/requests", &["Apache-2.0"]);
        let out = success(resolver(&server, None).resolve(&spec, &pkg).await);

        assert_eq!(
            out.licenses,
            vec![LicenseRef {
                id: "Apache-2.0".into(),
                name: "Apache License 2.0".into(),
                url: "https://github.com/psf/requests/blob/v2.31.0/LICENSE".into(),
                verified: true,
            }]
        );
        assert_eq!(out.source, LicenseSource::SourceHost);
    }

    #[tokio::test]
    async fn test_pin_failure_keeps_branch_link() {
        let server = MockServer::start().await;
        mount_license(&server).await;
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/git/ref/tags/2.31.0"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/git/ref/tags/v2.31.0"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (spec, pkg) = partial("https://github.com/psf/requests.git", &[]);
        let out = success(resolver(&server, None).resolve(&spec, &pkg).await);
        assert_eq!(
            out.licenses[0].url,
            "https://github.com/psf/requests/blob/main/LICENSE"
        );
        assert!(out.licenses[0].verified);
    }

    #[tokio::test]
    async fn test_other_declared_licenses_are_appended() {
        let server = MockServer::start().await;
        mount_license(&server).await;

        let (spec, pkg) = partial("https://github.com/psf/requests", &["Apache-2.0", "MIT"]);
        let out = success(resolver(&server, None).resolve(&spec, &pkg).await);
        let ids: Vec<_> = out.licenses.iter().map(|l| (l.id.as_str(), l.verified)).collect();
        assert_eq!(ids, vec![("Apache-2.0", true), ("MIT", false)]);
    }

    #[tokio::test]
    async fn test_missing_license_file_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/license"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (spec, pkg) = partial("https://github.com/psf/requests", &["Apache-2.0"]);
        assert_eq!(
            resolver(&server, None).resolve(&spec, &pkg).await,
            TierOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_falls_through_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/license"))
            .respond_with(
                ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "0"),
            )
            .expect(3)
            .mount(&server)
            .await;

        let (spec, pkg) = partial("https://github.com/psf/requests", &["Apache-2.0"]);
        assert_eq!(
            resolver(&server, None).resolve(&spec, &pkg).await,
            TierOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/license"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        mount_license(&server).await;

        let (spec, pkg) = partial("https://github.com/psf/requests", &[]);
        let out = success(resolver(&server, None).resolve(&spec, &pkg).await);
        assert!(out.licenses[0].verified);
    }

    #[tokio::test]
    async fn test_far_reset_blocks_host_immediately() {
        let server = MockServer::start().await;
        let reset = chrono::Utc::now().timestamp() + 3600;
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/license"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("x-ratelimit-reset", reset.to_string().as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let github = resolver(&server, None);
        let (spec, pkg) = partial("https://github.com/psf/requests", &[]);
        assert_eq!(github.resolve(&spec, &pkg).await, TierOutcome::NotFound);

        // While the host is blocked, later calls do not even try.
        let (spec, pkg) = partial("https://github.com/psf/requests", &[]);
        assert_eq!(github.resolve(&spec, &pkg).await, TierOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/license"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let (spec, pkg) = partial("https://github.com/psf/requests", &[]);
        assert_eq!(
            resolver(&server, None).resolve(&spec, &pkg).await,
            TierOutcome::TransientError
        );
    }

    #[tokio::test]
    async fn test_bearer_token_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/license"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(license_body()))
            .expect(1)
            .mount(&server)
            .await;

        let (spec, pkg) = partial("https://github.com/psf/requests", &[]);
        let out = success(
            resolver(&server, Some("secret-token"))
                .resolve(&spec, &pkg)
                .await,
        );
        assert!(out.is_verified());
    }

    #[tokio::test]
    async fn test_noassertion_uses_declared_identifier() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/license"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "path": "LICENSE.txt",
                "html_url": "https://github.com/psf/requests/blob/main/LICENSE.txt",
                "license": { "spdx_id": "NOASSERTION", "name": "Other" }
            })))
            .mount(&server)
            .await;

        let (spec, pkg) = partial("https://github.com/psf/requests", &["BSD-3-Clause"]);
        let out = success(resolver(&server, None).resolve(&spec, &pkg).await);
        assert_eq!(out.licenses.len(), 1);
        assert_eq!(out.licenses[0].id, "BSD-3-Clause");
        assert_eq!(
            out.licenses[0].name,
            "BSD 3-Clause \"New\" or \"Revised\" License"
        );
    }

    #[test]
    fn test_parse_github_url() {
        let expected = Some(("psf".to_string(), "requests".to_string()));
        assert_eq!(parse_github_url("https://github.com/psf/requests"), expected);
        assert_eq!(parse_github_url("https://github.com/psf/requests/"), expected);
        assert_eq!(parse_github_url("https://www.github.com/psf/requests.git"), expected);
        assert_eq!(parse_github_url("git+https://github.com/psf/requests.git"), expected);
        assert_eq!(parse_github_url("git@github.com:psf/requests.git"), expected);
        assert_eq!(
            parse_github_url("https://github.com/psf/requests/tree/main/src"),
            expected
        );
        assert_eq!(parse_github_url("https://gitlab.com/psf/requests"), None);
        assert_eq!(parse_github_url("https://github.com/psf"), None);
        assert_eq!(parse_github_url("not a url"), None);
    }

    #[test]
    fn test_rate_limit_signal() {
        let mut headers = HeaderMap::new();
        assert_eq!(rate_limit_signal(StatusCode::FORBIDDEN, &headers), None);
        assert_eq!(
            rate_limit_signal(StatusCode::TOO_MANY_REQUESTS, &headers),
            Some(None)
        );

        headers.insert("retry-after", "7".parse().unwrap());
        assert_eq!(
            rate_limit_signal(StatusCode::FORBIDDEN, &headers),
            Some(Some(Duration::from_secs(7)))
        );
        assert_eq!(rate_limit_signal(StatusCode::OK, &headers), None);
    }

    #[test]
    fn test_rate_limit_signal_tolerates_extreme_reset() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        headers.insert("x-ratelimit-reset", i64::MIN.to_string().parse().unwrap());
        assert_eq!(
            rate_limit_signal(StatusCode::FORBIDDEN, &headers),
            Some(None)
        );

        headers.insert("x-ratelimit-reset", i64::MAX.to_string().parse().unwrap());
        assert!(matches!(
            rate_limit_signal(StatusCode::FORBIDDEN, &headers),
            Some(Some(_))
        ));
    }

    #[tokio::test]
    async fn test_huge_retry_after_blocks_without_overflow() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/license"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("retry-after", u64::MAX.to_string().as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (spec, pkg) = partial("https://github.com/psf/requests", &["MIT"]);
        assert_eq!(
            resolver(&server, None).resolve(&spec, &pkg).await,
            TierOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_extreme_reset_header_is_handled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/psf/requests/license"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("x-ratelimit-reset", i64::MAX.to_string().as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (spec, pkg) = partial("https://github.com/psf/requests", &["MIT"]);
        assert_eq!(
            resolver(&server, None).resolve(&spec, &pkg).await,
            TierOutcome::NotFound
        );
    }
}
