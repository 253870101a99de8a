//! Release index: resolves plugin versions to download URLs
//!
//! Releases are read from a GitHub-compatible API
//! (`GET {api}/repos/{owner}/{repo}/releases`). Drafts and pre-releases are
//! never selected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::{InstallerError, Result};
use sdk::release::ReleaseIndex;
use sdk::types::ResolvedRelease;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Public GitHub API
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// The release index is queried with a short fixed timeout
pub const RELEASE_INDEX_TIMEOUT: Duration = Duration::from_secs(5);

/// A single release entry
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// A downloadable file attached to a release
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

/// GitHub-compatible release index client
#[derive(Debug, Clone)]
pub struct GitHubReleases {
    client: reqwest::Client,
    api_url: String,
}

impl GitHubReleases {
    /// Client for the public GitHub API
    pub fn new() -> Result<Self> {
        Self::with_api_url(DEFAULT_API_URL)
    }

    /// Client for a custom API base URL (GitHub Enterprise, mirrors, tests)
    pub fn with_api_url(api_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("vplug/", env!("CARGO_PKG_VERSION")))
            .timeout(RELEASE_INDEX_TIMEOUT)
            .build()
            .map_err(|e| InstallerError::DownloadFailed(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch every release of `repo` (`owner/name`)
    pub async fn fetch_releases(&self, repo: &str) -> Result<Vec<Release>> {
        let url = format!("{}/repos/{}/releases", self.api_url, repo);
        debug!("Fetching release index: {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| InstallerError::DownloadFailed(format!("release index {}: {}", repo, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InstallerError::DownloadFailed(format!(
                "release index {} returned {}",
                repo, status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| InstallerError::DownloadFailed(format!("release index {}: {}", repo, e)))
    }
}

#[async_trait]
impl ReleaseIndex for GitHubReleases {
    async fn resolve_download_url(
        &self,
        repo: &str,
        desired_version: &str,
        asset_substring: &str,
    ) -> Result<ResolvedRelease> {
        let releases = self.fetch_releases(repo).await?;
        let release = select_release(&releases, desired_version)?;
        let asset = select_asset(release, asset_substring)?;

        info!(
            "Resolved {} {} -> {}",
            repo, release.tag_name, asset.browser_download_url
        );

        Ok(ResolvedRelease {
            url: asset.browser_download_url.clone(),
            version: release.tag_name.clone(),
        })
    }
}

/// Pick the release matching `desired_version`, or the newest one when empty
pub fn select_release<'a>(releases: &'a [Release], desired_version: &str) -> Result<&'a Release> {
    let mut qualifying = releases.iter().filter(|r| !r.draft && !r.prerelease);

    if desired_version.is_empty() {
        qualifying
            .max_by_key(|r| r.published_at)
            .ok_or_else(|| InstallerError::VersionNotFound("latest".to_string()))
    } else {
        qualifying
            .find(|r| r.tag_name == desired_version)
            .ok_or_else(|| InstallerError::VersionNotFound(desired_version.to_string()))
    }
}

/// First asset whose name contains `asset_substring`
pub fn select_asset<'a>(release: &'a Release, asset_substring: &str) -> Result<&'a ReleaseAsset> {
    release
        .assets
        .iter()
        .find(|a| a.name.contains(asset_substring))
        .ok_or_else(|| {
            InstallerError::AssetNotFound(format!(
                "no asset matching '{}' in {} (available: {})",
                asset_substring,
                release.tag_name,
                release
                    .assets
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}
