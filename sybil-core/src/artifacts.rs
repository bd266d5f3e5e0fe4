//! The output directory. The directory listing is the only index: every
//! `*.png` file in it is an artifact, and its kind comes from its name.
//!
//! Saves use fresh random names and never replace an existing file, so
//! concurrent saves do not interfere. `clear_all` does not coordinate with
//! saves: a file written while a sweep is running may or may not be deleted
//! by it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::{encode_png, ArtifactKind, Error, GeneratedImage, ImageKind, Result};

const ARTIFACT_EXTENSION: &str = "png";
const SUFFIX_LEN: usize = 12;

pub const DEFAULT_RECENT_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub filename: String,
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

impl Artifact {
    pub fn size_kb(&self) -> f64 {
        round_to(self.size_bytes as f64 / 1024.0, 1)
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Opens the store, creating the directory if it does not exist.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| Error::ArtifactWriteFailed {
                path: dir.clone(),
                source,
            })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encodes `image` as PNG under a new `{kind}_{12 hex}.png` name.
    pub async fn save(&self, kind: ImageKind, image: &GeneratedImage) -> Result<Artifact> {
        let filename = new_filename(kind);
        let path = self.dir.join(&filename);
        let bytes = encode_png(&image.image).map_err(|e| Error::ArtifactWriteFailed {
            path: path.clone(),
            source: std::io::Error::other(e),
        })?;
        let metadata = write_new(&path, &bytes).await?;

        Ok(Artifact {
            filename,
            path,
            kind: kind.into(),
            size_bytes: metadata.len(),
            modified: modified_at(&metadata),
        })
    }

    /// All artifacts, newest first.
    pub async fn list(&self) -> Result<Vec<Artifact>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(Error::FilesystemEnumerationFailed)?;
        let mut artifacts = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(Error::FilesystemEnumerationFailed)?
        {
            let path = entry.path();
            if !is_artifact(&path) {
                continue;
            }
            // A file can vanish between listing and stat when a sweep runs
            // concurrently; skip it.
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::FilesystemEnumerationFailed(e)),
            };
            let filename = entry.file_name().to_string_lossy().into_owned();
            artifacts.push(Artifact {
                kind: ArtifactKind::from_filename(&filename),
                filename,
                path,
                size_bytes: metadata.len(),
                modified: modified_at(&metadata),
            });
        }
        artifacts.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(artifacts)
    }

    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Artifact>> {
        let mut artifacts = self.list().await?;
        artifacts.truncate(limit);
        Ok(artifacts)
    }

    pub async fn total_size_bytes(&self) -> Result<u64> {
        Ok(self.list().await?.iter().map(|a| a.size_bytes).sum())
    }

    /// Total artifact size in MiB, rounded to two decimals.
    pub async fn total_size_mb(&self) -> Result<f64> {
        let bytes = self.total_size_bytes().await?;
        Ok(round_to(bytes as f64 / (1024.0 * 1024.0), 2))
    }

    /// Deletes every artifact and returns how many were deleted. A file that
    /// cannot be removed is logged and skipped.
    pub async fn clear_all(&self) -> Result<usize> {
        let artifacts = self.list().await?;
        let deleted = remove_all(&artifacts).await;
        tracing::info!(deleted, found = artifacts.len(), "cleared output directory");
        Ok(deleted)
    }
}

/// Writes `bytes` to a file that must not exist yet. An existing file is
/// left untouched and reported as a collision.
async fn write_new(path: &Path, bytes: &[u8]) -> Result<std::fs::Metadata> {
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(Error::ArtifactCollision(path.to_path_buf()));
        }
        Err(source) => {
            return Err(Error::ArtifactWriteFailed {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let written = async {
        file.write_all(bytes).await?;
        file.sync_all().await?;
        file.metadata().await
    }
    .await;
    match written {
        Ok(metadata) => Ok(metadata),
        Err(source) => {
            drop(file);
            // Never leave a truncated image behind.
            let _ = fs::remove_file(path).await;
            Err(Error::ArtifactWriteFailed {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

/// Deletes each artifact, skipping the ones that fail. Returns how many were
/// actually removed.
async fn remove_all(artifacts: &[Artifact]) -> usize {
    let mut deleted = 0;
    for artifact in artifacts {
        match fs::remove_file(&artifact.path).await {
            Ok(()) => deleted += 1,
            Err(e) => tracing::warn!(
                file = %artifact.filename,
                error = %e,
                "failed to delete artifact"
            ),
        }
    }
    deleted
}

fn new_filename(kind: ImageKind) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}{}.{ARTIFACT_EXTENSION}",
        kind.file_prefix(),
        &id[..SUFFIX_LEN]
    )
}

fn is_artifact(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARTIFACT_EXTENSION))
}

fn modified_at(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn image(seed: u32) -> GeneratedImage {
        GeneratedImage {
            image: DynamicImage::new_rgb8(8, 8),
            width: 8,
            height: 8,
            seed,
        }
    }

    async fn store() -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path().join("output")).await.unwrap();
        (dir, store)
    }

    fn set_mtime(path: &Path, secs_ago: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
            .unwrap();
    }

    #[test]
    fn filenames_follow_the_convention() {
        let name = new_filename(ImageKind::Banner);
        let suffix = name
            .strip_prefix("banner_")
            .and_then(|rest| rest.strip_suffix(".png"))
            .unwrap();
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(new_filename(ImageKind::Banner), name);
    }

    #[tokio::test]
    async fn open_creates_the_directory() {
        let (dir, store) = store().await;
        assert!(dir.path().join("output").is_dir());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_list_recent() {
        let (_dir, store) = store().await;
        let saved = store.save(ImageKind::Avatar, &image(1)).await.unwrap();
        assert!(saved.path.is_file());
        assert!(saved.size_bytes > 0);

        let recent = store.list_recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, ArtifactKind::Avatar);
        assert!(recent[0].filename.starts_with("avatar_"));
        assert_eq!(recent[0].filename, saved.filename);
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_truncated() {
        let (_dir, store) = store().await;
        let old = store.save(ImageKind::Avatar, &image(1)).await.unwrap();
        let mid = store.save(ImageKind::Banner, &image(2)).await.unwrap();
        let new = store.save(ImageKind::Avatar, &image(3)).await.unwrap();
        set_mtime(&old.path, 300);
        set_mtime(&mid.path, 200);
        set_mtime(&new.path, 100);

        let names: Vec<_> = store
            .list_recent(DEFAULT_RECENT_LIMIT)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.filename)
            .collect();
        assert_eq!(names, vec![new.filename.clone(), mid.filename, old.filename]);
        assert_eq!(store.list_recent(1).await.unwrap()[0].filename, new.filename);
    }

    #[tokio::test]
    async fn unknown_prefixes_and_other_extensions() {
        let (_dir, store) = store().await;
        std::fs::write(store.dir().join("logo.png"), b"png").unwrap();
        std::fs::write(store.dir().join("notes.txt"), b"text").unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kind, ArtifactKind::Unknown);
        assert_eq!(store.total_size_bytes().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn total_size_is_rounded_megabytes() {
        let (_dir, store) = store().await;
        assert_eq!(store.total_size_mb().await.unwrap(), 0.0);
        std::fs::write(store.dir().join("banner_aaaaaaaaaaaa.png"), vec![0u8; 1536 * 1024])
            .unwrap();
        assert_eq!(store.total_size_mb().await.unwrap(), 1.5);
    }

    #[tokio::test]
    async fn clear_all_deletes_everything() {
        let (_dir, store) = store().await;
        for seed in 0..5 {
            store.save(ImageKind::Avatar, &image(seed)).await.unwrap();
        }
        std::fs::write(store.dir().join("keep.txt"), b"x").unwrap();

        assert_eq!(store.clear_all().await.unwrap(), 5);
        assert!(store.list_recent(DEFAULT_RECENT_LIMIT).await.unwrap().is_empty());
        assert!(store.dir().join("keep.txt").exists());
        assert_eq!(store.clear_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn size_kb_rounds_to_one_decimal() {
        let artifact = Artifact {
            filename: "avatar_x.png".into(),
            path: PathBuf::from("avatar_x.png"),
            kind: ArtifactKind::Avatar,
            size_bytes: 1500,
            modified: Utc::now(),
        };
        assert_eq!(artifact.size_kb(), 1.5);
    }

    #[tokio::test]
    async fn existing_file_is_never_overwritten() {
        let (_dir, store) = store().await;
        let path = store.dir().join("avatar_0123456789ab.png");
        std::fs::write(&path, b"original").unwrap();

        let err = write_new(&path, b"replacement").await.unwrap_err();
        assert!(matches!(err, Error::ArtifactCollision(ref p) if *p == path));
        assert_eq!(std::fs::read(&path).unwrap(), b"original");
    }

    #[tokio::test]
    async fn write_new_creates_the_file() {
        let (_dir, store) = store().await;
        let path = store.dir().join("banner_0123456789ab.png");
        let metadata = write_new(&path, b"pixels").await.unwrap();
        assert_eq!(metadata.len(), 6);
        assert_eq!(std::fs::read(&path).unwrap(), b"pixels");
    }

    #[tokio::test]
    async fn sweep_skips_files_that_are_already_gone() {
        let (_dir, store) = store().await;
        let mut saved = Vec::new();
        for seed in 0..4 {
            saved.push(store.save(ImageKind::Banner, &image(seed)).await.unwrap());
        }
        std::fs::remove_file(&saved[1].path).unwrap();

        assert_eq!(remove_all(&saved).await, 3);
        for artifact in &saved {
            assert!(!artifact.path.exists());
        }
        assert!(store.list().await.unwrap().is_empty());
    }
}
