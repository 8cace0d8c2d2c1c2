//! Input artifacts: screenshots (or text statements) dropped for solving.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::SecurityConfig;
use crate::error::{AutoleetError, Result};
use crate::generator::GenerationInput;

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp", ".bmp"];
const TEXT_EXTENSIONS: &[&str] = &[".txt", ".md"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    Text,
}

/// Which files are accepted, and how large they may be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPolicy {
    /// Lower-cased, with leading dot.
    pub allowed_extensions: Vec<String>,
    pub max_size_bytes: u64,
}

impl ArtifactPolicy {
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions.iter().any(|e| e == extension)
    }
}

impl From<&SecurityConfig> for ArtifactPolicy {
    fn from(sec: &SecurityConfig) -> Self {
        Self {
            allowed_extensions: sec
                .allowed_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            max_size_bytes: sec.max_file_size_bytes(),
        }
    }
}

/// Lower-cased extension of `path` with a leading dot, empty when none.
pub fn normalized_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// A file that passed pre-flight checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputArtifact {
    pub path: PathBuf,
    pub extension: String,
    pub size_bytes: u64,
    pub kind: ArtifactKind,
}

impl InputArtifact {
    /// Check extension, existence, readability and size.
    pub fn inspect(path: &Path, policy: &ArtifactPolicy) -> Result<Self> {
        let extension = normalized_extension(path);
        if !policy.allows_extension(&extension) {
            return Err(AutoleetError::FileHandling(format!(
                "unsupported file type `{extension}` for {}",
                path.display()
            )));
        }
        let kind = if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            ArtifactKind::Image
        } else if TEXT_EXTENSIONS.contains(&extension.as_str()) {
            ArtifactKind::Text
        } else {
            return Err(AutoleetError::FileHandling(format!(
                "no loader for `{extension}` files"
            )));
        };

        let meta = std::fs::metadata(path).map_err(|e| {
            AutoleetError::FileHandling(format!("cannot access {}: {e}", path.display()))
        })?;
        if !meta.is_file() {
            return Err(AutoleetError::FileHandling(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        if meta.len() > policy.max_size_bytes {
            return Err(AutoleetError::FileHandling(format!(
                "{} is {} bytes, limit is {}",
                path.display(),
                meta.len(),
                policy.max_size_bytes
            )));
        }
        std::fs::File::open(path).map_err(|e| {
            AutoleetError::FileHandling(format!("cannot read {}: {e}", path.display()))
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            extension,
            size_bytes: meta.len(),
            kind,
        })
    }

    /// MIME type for image artifacts.
    pub fn media_type(&self) -> &'static str {
        match self.extension.as_str() {
            ".png" => "image/png",
            ".jpg" | ".jpeg" => "image/jpeg",
            ".gif" => "image/gif",
            ".webp" => "image/webp",
            ".bmp" => "image/bmp",
            _ => "text/plain",
        }
    }

    /// Read the artifact into what the generator consumes.
    pub async fn load(&self) -> Result<GenerationInput> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            AutoleetError::FileHandling(format!("cannot read {}: {e}", self.path.display()))
        })?;
        match self.kind {
            ArtifactKind::Image => Ok(GenerationInput::Image {
                bytes,
                media_type: self.media_type().to_string(),
            }),
            ArtifactKind::Text => {
                let text = String::from_utf8_lossy(&bytes).trim().to_string();
                if text.is_empty() {
                    return Err(AutoleetError::FileHandling(format!(
                        "{} is empty",
                        self.path.display()
                    )));
                }
                Ok(GenerationInput::Text(text))
            }
        }
    }
}
