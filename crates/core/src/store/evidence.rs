//! Step screenshot persistence.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::StoreError;

/// Reference to a stored step screenshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvidenceRef {
    pub step_index: u32,
    pub path: String,
    /// SHA-256 of the stored bytes, hex encoded.
    pub sha256: String,
    pub bytes: u64,
}

/// Where step screenshots go.
#[async_trait]
pub trait EvidenceSink: Send + Sync {
    async fn store(
        &self,
        run_id: &str,
        step_index: u32,
        image: &[u8],
    ) -> Result<EvidenceRef, StoreError>;
}

/// Writes `<root>/<run_id>/step-<nnn>.jpg`.
pub struct FsEvidenceSink {
    root: PathBuf,
}

impl FsEvidenceSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl EvidenceSink for FsEvidenceSink {
    async fn store(
        &self,
        run_id: &str,
        step_index: u32,
        image: &[u8],
    ) -> Result<EvidenceRef, StoreError> {
        // Run ids are generated uuids, but never trust them as path segments
        if run_id.is_empty() || run_id.contains(['/', '\\']) || run_id.contains("..") {
            return Err(StoreError::Io(format!("invalid run id for evidence: {}", run_id)));
        }

        let dir = self.root.join(run_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("step-{:03}.jpg", step_index));
        tokio::fs::write(&path, image).await?;

        let sha256 = hex::encode(Sha256::digest(image));
        debug!(run_id, step_index, path = %path.display(), "Stored step evidence");

        Ok(EvidenceRef {
            step_index,
            path: path.to_string_lossy().into_owned(),
            sha256,
            bytes: image.len() as u64,
        })
    }
}
