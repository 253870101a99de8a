//! vplug artifact handling
//!
//! This crate resolves plugin releases to download URLs, downloads the
//! release archive, unpacks its binary and checksum entries and verifies the
//! binary's SHA-256 digest before anything else sees it.

pub mod download;
pub mod release;
pub mod verifier;

pub use download::{extract_archive, verify_archive, ArchiveContents, HttpArtifactFetcher};
pub use release::{GitHubReleases, Release, ReleaseAsset};
