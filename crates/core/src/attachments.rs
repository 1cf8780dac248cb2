//! File storage for generated quote documents.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::organization::OrgId;
use crate::domain::quote::QuoteId;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("invalid attachment path `{0}`")]
    InvalidPath(String),
    #[error("attachment `{0}` not found")]
    NotFound(String),
    #[error("attachment io failure: {0}")]
    Io(String),
    #[error("attachment signing failure: {0}")]
    Signing(String),
}

/// Relative, tenant-prefixed storage path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredPath(String);

impl StoredPath {
    pub fn parse(raw: &str) -> Result<Self, AttachmentError> {
        let trimmed = raw.trim().trim_start_matches('/');
        let valid = !trimmed.is_empty()
            && trimmed.split('/').all(|segment| {
                !segment.is_empty()
                    && segment != "."
                    && segment != ".."
                    && segment
                        .chars()
                        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
            });
        if valid {
            Ok(Self(trimmed.to_owned()))
        } else {
            Err(AttachmentError::InvalidPath(raw.to_owned()))
        }
    }

    /// `{org}/quotes/{quote}/{file}` with unsafe characters in the file name replaced.
    pub fn for_quote(
        org_id: &OrgId,
        quote_id: &QuoteId,
        file_name: &str,
    ) -> Result<Self, AttachmentError> {
        let file: String = file_name
            .trim()
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') { ch } else { '_' })
            .collect();
        let file = file.trim_start_matches('.');
        if file.is_empty() {
            return Err(AttachmentError::InvalidPath(file_name.to_owned()));
        }
        Self::parse(&format!("{}/quotes/{}/{file}", org_id.as_str(), quote_id.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoredPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn upload(&self, path: &StoredPath, bytes: Vec<u8>) -> Result<StoredPath, AttachmentError>;

    /// Time-limited URL for downloading `path`.
    fn sign(&self, path: &StoredPath, ttl: Duration) -> Result<String, AttachmentError>;
}

#[derive(Default)]
pub struct InMemoryAttachmentStore {
    files: RwLock<HashMap<StoredPath, Vec<u8>>>,
}

impl InMemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self, path: &StoredPath) -> Option<Vec<u8>> {
        self.files.read().await.get(path).cloned()
    }
}

#[async_trait]
impl AttachmentStore for InMemoryAttachmentStore {
    async fn upload(&self, path: &StoredPath, bytes: Vec<u8>) -> Result<StoredPath, AttachmentError> {
        self.files.write().await.insert(path.clone(), bytes);
        Ok(path.clone())
    }

    fn sign(&self, path: &StoredPath, ttl: Duration) -> Result<String, AttachmentError> {
        let expires = Utc::now().timestamp() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        Ok(format!("memory://{path}?expires={expires}"))
    }
}

#[cfg(test)]
mod tests {
    use super::{AttachmentError, StoredPath};
    use crate::domain::organization::OrgId;
    use crate::domain::quote::QuoteId;

    #[test]
    fn quote_paths_are_tenant_prefixed_and_sanitized() {
        let path = StoredPath::for_quote(
            &OrgId("org-1".to_owned()),
            &QuoteId("q-7".to_owned()),
            "Quote #7 (final).pdf",
        )
        .expect("path");
        assert_eq!(path.as_str(), "org-1/quotes/q-7/Quote__7__final_.pdf");
    }

    #[test]
    fn traversal_is_rejected() {
        assert!(matches!(StoredPath::parse("org-1/../org-2/x.pdf"), Err(AttachmentError::InvalidPath(_))));
        assert!(StoredPath::for_quote(&OrgId("o".to_owned()), &QuoteId("q".to_owned()), "..").is_err());
    }
}
