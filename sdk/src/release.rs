//! Artifact source contracts
//!
//! `ReleaseIndex` turns a repository and version into a download URL,
//! `ArtifactFetcher` turns that URL into a verified binary.

use async_trait::async_trait;

use crate::errors::Result;
use crate::types::{Artifact, ResolvedRelease};

#[async_trait]
pub trait ReleaseIndex: Send + Sync {
    /// Find the download URL of the first asset containing `asset_substring`
    ///
    /// An empty `desired_version` selects the most recently published
    /// non-draft, non-prerelease release.
    async fn resolve_download_url(
        &self,
        repo: &str,
        desired_version: &str,
        asset_substring: &str,
    ) -> Result<ResolvedRelease>;
}

#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Download the archive at `url` and return its checksum-verified binary
    async fn download_and_verify(&self, url: &str) -> Result<Artifact>;
}
