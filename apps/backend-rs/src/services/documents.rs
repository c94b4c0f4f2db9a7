use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::DocumentHandle;

pub const ALLOWED_PROOF_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "application/pdf",
];

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("file is empty")]
    Empty,
    #[error("file exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("unsupported file type '{0}'. Allowed: PNG, JPEG, WEBP or PDF.")]
    UnsupportedType(String),
    #[error("could not store document: {0}")]
    Io(#[from] std::io::Error),
}

/// Sniff the real type from the leading bytes; the declared type is not trusted.
pub fn detect_content_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"%PDF-") {
        Some("application/pdf")
    } else {
        None
    }
}

/// Check a proof upload and return its detected content type.
pub fn validate_proof(
    declared_type: Option<&str>,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<&'static str, DocumentError> {
    if bytes.is_empty() {
        return Err(DocumentError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(DocumentError::TooLarge { limit: max_bytes });
    }
    let declared = declared_type
        .map(|value| value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .unwrap_or_default();
    if !declared.is_empty()
        && declared != "application/octet-stream"
        && !ALLOWED_PROOF_TYPES.contains(&declared.as_str())
    {
        return Err(DocumentError::UnsupportedType(declared));
    }
    detect_content_type(bytes).ok_or_else(|| {
        DocumentError::UnsupportedType(if declared.is_empty() {
            "unknown".to_string()
        } else {
            declared
        })
    })
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(|ch| ch == '/' || ch == '\\').next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_' | ' '))
        .take(120)
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "proof".to_string()
    } else {
        cleaned
    }
}

/// Where proof-of-payment files live. The ledger only keeps the handle.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(
        &self,
        lease_id: Uuid,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<DocumentHandle, DocumentError>;

    async fn remove(&self, key: &str) -> Result<(), DocumentError>;
}

#[derive(Debug, Clone)]
pub struct LocalDocumentStore {
    root: PathBuf,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty() && *part != "..")
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn put(
        &self,
        lease_id: Uuid,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<DocumentHandle, DocumentError> {
        let key = format!(
            "{lease_id}/{}.{}",
            Uuid::new_v4().simple(),
            extension_for(content_type)
        );
        let path = self.path_for(&key);
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        // Write to a temp file, then rename into place.
        let tmp_path = parent.join(format!(".upload.tmp.{}", Uuid::new_v4()));
        if let Err(error) = tokio::fs::write(&tmp_path, bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(error.into());
        }
        if let Err(error) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(error.into());
        }

        tracing::debug!(key = %key, size_bytes = bytes.len(), "Stored payment proof");
        Ok(DocumentHandle {
            key,
            file_name: sanitize_file_name(file_name),
            content_type: content_type.to_string(),
            size_bytes: i64::try_from(bytes.len()).unwrap_or(i64::MAX),
        })
    }

    async fn remove(&self, key: &str) -> Result<(), DocumentError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
