use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Unsupported file type: {0}. Upload a .txt or .pdf file")]
    Unsupported(String),
    #[error("Failed to extract text from PDF: {0}")]
    Pdf(String),
    #[error("File is not valid UTF-8 text: {0}")]
    Encoding(String),
    #[error("Failed to archive upload: {0}")]
    Archive(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Text,
    Pdf,
}

impl UploadKind {
    pub fn from_file_name(file_name: &str) -> Result<Self, DocumentError> {
        let extension = Path::new(file_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "txt" | "md" | "text" => Ok(UploadKind::Text),
            "pdf" => Ok(UploadKind::Pdf),
            _ => Err(DocumentError::Unsupported(file_name.to_string())),
        }
    }
}

/// A user-supplied document, already decoded to plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub kind: UploadKind,
    pub text: String,
}

impl Upload {
    pub fn from_text(file_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            kind: UploadKind::Text,
            text: text.into(),
        }
    }

    /// Decodes raw file bytes according to the file extension.
    pub fn from_bytes(file_name: &str, bytes: &[u8]) -> Result<Self, DocumentError> {
        let kind = UploadKind::from_file_name(file_name)?;
        let text = match kind {
            UploadKind::Text => String::from_utf8(bytes.to_vec())
                .map_err(|_| DocumentError::Encoding(file_name.to_string()))?,
            UploadKind::Pdf => pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| DocumentError::Pdf(e.to_string()))?,
        };

        Ok(Self {
            file_name: file_name.to_string(),
            kind,
            text,
        })
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let bytes = tokio::fs::read(path).await.map_err(|source| DocumentError::Read {
            path: path.display().to_string(),
            source,
        })?;
        log::info!("Read upload {} ({} bytes)", file_name, bytes.len());
        Self::from_bytes(&file_name, &bytes)
    }
}

/// Keeps a plain-text copy of every saved upload on disk.
#[derive(Debug, Clone)]
pub struct UploadArchive {
    dir: PathBuf,
}

impl UploadArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes the decoded text as `<stem>.txt` and returns its path.
    pub async fn store(&self, upload: &Upload) -> Result<PathBuf, DocumentError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let stem = Path::new(&upload.file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| "upload".to_string());
        let path = self.dir.join(format!("{}.txt", stem));

        tokio::fs::write(&path, &upload.text).await?;
        log::info!("Archived upload to {}", path.display());
        Ok(path)
    }
}
