//! Filesystem attachment store with HMAC-signed, expiring download URLs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dealdesk_core::attachments::{AttachmentError, AttachmentStore, StoredPath};
use dealdesk_core::config::AttachmentsConfig;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

pub struct LocalAttachmentStore {
    root: PathBuf,
    base_url: String,
    secret: SecretString,
}

impl std::fmt::Debug for LocalAttachmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAttachmentStore")
            .field("root", &self.root)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl LocalAttachmentStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>, secret: SecretString) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            secret,
        }
    }

    /// `None` while uploads are disabled by configuration.
    pub fn from_config(config: &AttachmentsConfig) -> Option<Self> {
        config.is_enabled().then(|| {
            Self::new(config.root_dir.clone(), config.base_url.clone(), config.signing_secret.clone())
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Checks a download request produced by [`AttachmentStore::sign`].
    pub fn verify(&self, path: &StoredPath, expires: i64, signature: &str) -> Result<(), AttachmentError> {
        if expires < Utc::now().timestamp() {
            return Err(AttachmentError::Signing("download link has expired".to_owned()));
        }
        let provided = hex::decode(signature)
            .map_err(|_| AttachmentError::Signing("malformed signature".to_owned()))?;
        self.mac(path, expires)?
            .verify_slice(&provided)
            .map_err(|_| AttachmentError::Signing("signature mismatch".to_owned()))
    }

    pub async fn read(&self, path: &StoredPath) -> Result<Vec<u8>, AttachmentError> {
        match tokio::fs::read(self.root.join(path.as_str())).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(AttachmentError::NotFound(path.to_string()))
            }
            Err(error) => Err(AttachmentError::Io(error.to_string())),
        }
    }

    fn mac(&self, path: &StoredPath, expires: i64) -> Result<HmacSha256, AttachmentError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|error| AttachmentError::Signing(error.to_string()))?;
        mac.update(format!("{}.{expires}", path.as_str()).as_bytes());
        Ok(mac)
    }
}

#[async_trait]
impl AttachmentStore for LocalAttachmentStore {
    async fn upload(&self, path: &StoredPath, bytes: Vec<u8>) -> Result<StoredPath, AttachmentError> {
        let target = self.root.join(path.as_str());
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|error| AttachmentError::Io(error.to_string()))?;
        }
        // Write to a sibling temp file first so readers never see a partial document.
        let staging = target.with_extension("partial");
        tokio::fs::write(&staging, &bytes).await.map_err(|error| AttachmentError::Io(error.to_string()))?;
        if let Err(error) = tokio::fs::rename(&staging, &target).await {
            warn!(event_name = "attachments.rename_failed", path = %path, error = %error, "upload rename failed");
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(AttachmentError::Io(error.to_string()));
        }
        debug!(event_name = "attachments.uploaded", path = %path, bytes = bytes.len(), "attachment stored");
        Ok(path.clone())
    }

    fn sign(&self, path: &StoredPath, ttl: Duration) -> Result<String, AttachmentError> {
        let ttl = i64::try_from(ttl.as_secs())
            .map_err(|_| AttachmentError::Signing("ttl is too large".to_owned()))?;
        let expires = Utc::now().timestamp().saturating_add(ttl);
        let signature = hex::encode(self.mac(path, expires)?.finalize().into_bytes());
        Ok(format!("{}/{}?expires={expires}&signature={signature}", self.base_url, path.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dealdesk_core::attachments::{AttachmentError, AttachmentStore, StoredPath};
    use secrecy::SecretString;
    use tempfile::TempDir;

    use super::LocalAttachmentStore;

    fn store(dir: &TempDir) -> LocalAttachmentStore {
        LocalAttachmentStore::new(
            dir.path(),
            "https://files.example.com/",
            SecretString::from("0123456789abcdef-secret".to_owned()),
        )
    }

    fn query_param<'a>(url: &'a str, name: &str) -> &'a str {
        url.split(['?', '&'])
            .find_map(|part| part.strip_prefix(&format!("{name}=")))
            .expect("query parameter")
    }

    #[tokio::test]
    async fn uploaded_files_round_trip_through_signed_urls() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir);
        let path = StoredPath::parse("org-1/quotes/q-1/quote.pdf").expect("path");

        store.upload(&path, b"%PDF-1.7".to_vec()).await.expect("upload");
        assert_eq!(store.read(&path).await.expect("read"), b"%PDF-1.7".to_vec());

        let url = store.sign(&path, Duration::from_secs(60)).expect("sign");
        assert!(url.starts_with("https://files.example.com/org-1/quotes/q-1/quote.pdf?expires="));
        let expires: i64 = query_param(&url, "expires").parse().expect("expires");
        let signature = query_param(&url, "signature");
        store.verify(&path, expires, signature).expect("valid signature");

        let other = StoredPath::parse("org-2/quotes/q-1/quote.pdf").expect("path");
        assert!(matches!(store.verify(&other, expires, signature), Err(AttachmentError::Signing(_))));
    }

    #[tokio::test]
    async fn expired_links_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir);
        let path = StoredPath::parse("org-1/quotes/q-1/quote.pdf").expect("path");
        let url = store.sign(&path, Duration::from_secs(0)).expect("sign");
        let expires: i64 = query_param(&url, "expires").parse().expect("expires");

        let result = store.verify(&path, expires - 1, query_param(&url, "signature"));
        assert!(matches!(result, Err(AttachmentError::Signing(_))));
    }

    #[tokio::test]
    async fn missing_files_are_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let path = StoredPath::parse("org-1/none.pdf").expect("path");
        assert!(matches!(store(&dir).read(&path).await, Err(AttachmentError::NotFound(_))));
    }
}
