//! Artifact download: fetch, unpack and verify plugin archives

use async_trait::async_trait;
use sdk::errors::{InstallerError, Result};
use sdk::release::ArtifactFetcher;
use sdk::types::Artifact;
use std::io::{Cursor, Read};
use tracing::{debug, info};

use crate::verifier;

/// Marker in the name of the checksum entry of a release archive
pub const CHECKSUM_MARKER: &str = "SHA256SUM";

/// Largest archive entry that will be unpacked
pub const MAX_ENTRY_BYTES: u64 = 512 * 1024 * 1024;

/// The two entries of a release archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveContents {
    pub binary_name: String,
    pub binary: Vec<u8>,
    /// Checksum file content, whitespace trimmed
    pub expected_digest: String,
}

/// Downloads release archives over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
}

impl HttpArtifactFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("vplug/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| InstallerError::DownloadFailed(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn download_and_verify(&self, url: &str) -> Result<Artifact> {
        info!("Downloading plugin archive: {}", url);

        // Download into memory first (never to disk before verification)
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| InstallerError::DownloadFailed(format!("{}: {}", url, e)))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(InstallerError::DownloadFailed(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| InstallerError::DownloadFailed(format!("{}: {}", url, e)))?;
        debug!("Downloaded {} bytes", bytes.len());

        verify_archive(&bytes)
    }
}

/// Unpack a release archive and check the binary against its checksum file
pub fn verify_archive(bytes: &[u8]) -> Result<Artifact> {
    let contents = extract_archive(bytes)?;
    let digest = verifier::verify_hash(&contents.binary, &contents.expected_digest)?;
    info!(
        "  Hash verified for {}: {}",
        contents.binary_name,
        &digest[..16]
    );

    Ok(Artifact {
        binary: contents.binary,
        digest,
    })
}

/// Split a zip archive into its binary and checksum entries
///
/// The archive must hold exactly two entries, one of which has
/// [`CHECKSUM_MARKER`] in its name.
pub fn extract_archive(bytes: &[u8]) -> Result<ArchiveContents> {
    extract_archive_with_limit(bytes, MAX_ENTRY_BYTES)
}

fn extract_archive_with_limit(bytes: &[u8], limit: u64) -> Result<ArchiveContents> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| InstallerError::MalformedArchive(e.to_string()))?;

    if archive.len() != 2 {
        return Err(InstallerError::MalformedArchive(format!(
            "expected 2 entries, found {}",
            archive.len()
        )));
    }

    let mut checksum: Option<Vec<u8>> = None;
    let mut binary: Option<(String, Vec<u8>)> = None;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| InstallerError::MalformedArchive(e.to_string()))?;
        let name = entry.name().to_string();
        // The header size is untrusted; read at most one byte past the limit
        let mut data = Vec::new();
        entry
            .by_ref()
            .take(limit + 1)
            .read_to_end(&mut data)
            .map_err(|e| InstallerError::MalformedArchive(format!("{}: {}", name, e)))?;
        if data.len() as u64 > limit {
            return Err(InstallerError::MalformedArchive(format!(
                "{} exceeds {} bytes",
                name, limit
            )));
        }

        if name.contains(CHECKSUM_MARKER) {
            if checksum.replace(data).is_some() {
                return Err(InstallerError::MalformedArchive(
                    "archive holds two checksum files".to_string(),
                ));
            }
        } else if binary.replace((name, data)).is_some() {
            return Err(InstallerError::MalformedArchive(
                "archive holds no checksum file".to_string(),
            ));
        }
    }

    let (Some(checksum), Some((binary_name, binary))) = (checksum, binary) else {
        return Err(InstallerError::MalformedArchive(
            "archive holds no binary".to_string(),
        ));
    };

    let expected_digest = String::from_utf8(checksum)
        .map_err(|_| InstallerError::MalformedArchive("checksum file is not text".to_string()))?
        .trim()
        .to_string();

    Ok(ArchiveContents {
        binary_name,
        binary,
        expected_digest,
    })
}
