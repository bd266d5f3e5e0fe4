use std::path::PathBuf;

use crate::ImageKind;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("model is not loaded")]
    ModelNotReady,

    #[error("failed to load model: {0:#}")]
    LoadFailed(#[source] anyhow::Error),

    #[error("image generation failed: {0:#}")]
    GenerationFailed(#[source] anyhow::Error),

    #[error("{0}_styles cannot be empty")]
    EmptyCatalog(ImageKind),

    #[error("refusing to overwrite existing artifact {}", .0.display())]
    ArtifactCollision(PathBuf),

    #[error("failed to write artifact {}: {source}", path.display())]
    ArtifactWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to enumerate output directory: {0}")]
    FilesystemEnumerationFailed(#[source] std::io::Error),
}

impl Error {
    /// Whether the caller can fix the failure by changing its input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::EmptyCatalog(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
