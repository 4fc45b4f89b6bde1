//! Spool for notifications the decoder could not place.
//!
//! Each rejected message is written to its own file,
//! `<tag>-<uuid>.json`, under the quarantine directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use uuid::Uuid;

use crate::core::{Error, Result};

/// A quarantined notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedMessage {
    /// The scanned tag; empty when the message had none
    pub tag: String,

    /// Why the decoder rejected the message
    pub error: String,

    /// RFC 3339 timestamp of the rejection
    pub quarantined_at: String,

    /// Envelope version the message arrived with
    pub version: String,

    /// The raw inner message
    pub message: String,
}

/// Directory-backed quarantine spool.
#[derive(Debug, Clone)]
pub struct Quarantine {
    dir: PathBuf,
}

impl Quarantine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one rejected message. Returns the path of the new file.
    pub async fn spool(&self, tag: &str, reason: &str, version: &str, message: &str) -> Result<PathBuf> {
        let record = QuarantinedMessage {
            tag: tag.to_string(),
            error: reason.to_string(),
            quarantined_at: chrono::Utc::now().to_rfc3339(),
            version: version.to_string(),
            message: message.to_string(),
        };
        let content = serde_json::to_vec_pretty(&record).map_err(Error::sink)?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            error!(dir = %self.dir.display(), error = %e, "failed to create quarantine directory");
            Error::sink(e)
        })?;

        let path = self.dir.join(file_name(tag));
        tokio::fs::write(&path, content).await.map_err(|e| {
            error!(path = %path.display(), error = %e, "failed to quarantine message");
            Error::sink(e)
        })?;

        info!(path = %path.display(), tag = %tag, "message quarantined");
        Ok(path)
    }
}

fn file_name(tag: &str) -> String {
    let stem: String = tag
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect();
    let stem = if stem.is_empty() { "untagged".to_string() } else { stem };
    format!("{}-{}.json", stem, Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_is_sanitised() {
        let name = file_name("fleet/rebalance start");
        assert!(name.starts_with("fleet_rebalance_start-"));
        assert!(name.ends_with(".json"));
        assert!(file_name("").starts_with("untagged-"));
    }

    #[tokio::test]
    async fn test_spool_writes_record() {
        let dir = tempfile::tempdir().unwrap();
        let quarantine = Quarantine::new(dir.path().join("spool"));
        let path = quarantine
            .spool("fleet.rebalance.start", "unsupported", "2.0", "{}")
            .await
            .unwrap();

        let record: QuarantinedMessage =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(record.tag, "fleet.rebalance.start");
        assert_eq!(record.message, "{}");
    }
}
