use crate::parser::parse_export;
use crate::types::{DiscussionSource, RawRecord, Result, SourceError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reads exports from disk: either one file, or a directory holding
/// `discussion-<id>.json` files.
pub struct FileDiscussionSource {
    location: PathBuf,
}

impl FileDiscussionSource {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn file_name(discussion_id: u64) -> String {
        format!("discussion-{}.json", discussion_id)
    }

    pub fn path_for(&self, discussion_id: u64) -> PathBuf {
        if self.location.is_dir() {
            self.location.join(Self::file_name(discussion_id))
        } else {
            self.location.clone()
        }
    }

    /// Write records in the flat export layout so they can be read back.
    pub async fn write_records(&self, discussion_id: u64, records: &[RawRecord]) -> Result<PathBuf> {
        let path = self.path_for(discussion_id);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_vec_pretty(records)?).await?;
        info!("Wrote {} records to {}", records.len(), path.display());
        Ok(path)
    }
}

fn read_error(path: &Path, discussion_id: u64, error: std::io::Error) -> SourceError {
    match error.kind() {
        ErrorKind::NotFound => SourceError::NotFound { discussion_id },
        _ => SourceError::Unavailable(format!("{}: {}", path.display(), error)),
    }
}

#[async_trait]
impl DiscussionSource for FileDiscussionSource {
    fn source_name(&self) -> String {
        format!("File export ({})", self.location.display())
    }

    async fn fetch_records(&self, discussion_id: u64) -> std::result::Result<Vec<RawRecord>, SourceError> {
        let path = self.path_for(discussion_id);
        debug!("Reading export {}", path.display());
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| read_error(&path, discussion_id, e))?;
        let mut records = parse_export(&json).map_err(|e| SourceError::Malformed(e.to_string()))?;

        // A shared file may mix discussions; records without an id are kept
        let total = records.len();
        records.retain(|record| record.discussion.map_or(true, |id| id == discussion_id));
        if total > 0 && records.is_empty() {
            return Err(SourceError::NotFound { discussion_id });
        }

        info!("Loaded {} records for discussion {}", records.len(), discussion_id);
        Ok(records)
    }
}
