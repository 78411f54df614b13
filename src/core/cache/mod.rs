//! Derived-artifact cache.
//!
//! Produces and stores transcoded videos and snapshot thumbnails derived
//! from camera source files. Artifacts are content-addressed by source name
//! under a date-partitioned cache tree, immutable once present, deduplicated
//! across concurrent requests by per-key locking, and evicted oldest-first
//! once the byte budget is exceeded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::SystemTime;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::ffmpeg::{FFmpegRunner, SOFTWARE_ENCODER};
use super::{CoreError, CoreResult};

/// Logical artifact identity: which source file in which date partition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub partition: String,
    pub file_name: String,
}

impl ArtifactKey {
    pub fn new(partition: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            file_name: file_name.into(),
        }
    }
}

/// What to derive from the source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DerivationKind {
    /// Camera recording to browser-friendly MP4.
    Transcode,
    /// Snapshot to resized JPEG thumbnail.
    Thumbnail,
}

impl DerivationKind {
    fn subdir(self) -> &'static str {
        match self {
            DerivationKind::Transcode => "video",
            DerivationKind::Thumbnail => "thumbs",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            DerivationKind::Transcode => "mp4",
            DerivationKind::Thumbnail => "jpg",
        }
    }
}

/// Concurrency-safe, size-bounded cache of derived media artifacts.
pub struct ArtifactCache {
    media_root: PathBuf,
    cache_root: PathBuf,
    max_bytes: u64,
    thumbnail_size: (u32, u32),
    runner: FFmpegRunner,
    /// One lock per distinct key, created lazily, never removed. The key
    /// space is bounded by on-disk files, so the map stays small.
    locks: StdMutex<HashMap<ArtifactKey, Arc<AsyncMutex<()>>>>,
    /// Guards eviction passes and size accounting, distinct from the
    /// per-key locks so eviction never blocks an unrelated derivation.
    evict_lock: AsyncMutex<()>,
}

impl ArtifactCache {
    pub fn new(
        media_root: PathBuf,
        cache_root: PathBuf,
        max_bytes: u64,
        thumbnail_size: (u32, u32),
        runner: FFmpegRunner,
    ) -> Self {
        Self {
            media_root,
            cache_root,
            max_bytes,
            thumbnail_size,
            runner,
            locks: StdMutex::new(HashMap::new()),
            evict_lock: AsyncMutex::new(()),
        }
    }

    /// Returns the cached artifact for a key, deriving it first if absent.
    ///
    /// At most one derivation runs per key at a time; concurrent callers
    /// block on the key's lock and pick up the finished artifact. A failed
    /// derivation leaves nothing behind, so a later request retries from
    /// scratch.
    pub async fn fetch_or_derive(
        &self,
        key: &ArtifactKey,
        kind: DerivationKind,
    ) -> CoreResult<PathBuf> {
        let artifact = self.artifact_path(key, kind);
        if artifact.is_file() {
            touch(&artifact);
            return Ok(artifact);
        }

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        // Another caller may have finished while this one waited.
        if artifact.is_file() {
            touch(&artifact);
            return Ok(artifact);
        }

        let source = self.media_root.join(&key.partition).join(&key.file_name);
        if !source.is_file() {
            return Err(CoreError::NotFound(format!(
                "source file not found: {}",
                source.display()
            )));
        }

        if let Some(parent) = artifact.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(&artifact);

        info!("Deriving {} -> {}", source.display(), artifact.display());
        if let Err(e) = self.derive(&source, &tmp, kind).await {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        let size = match std::fs::metadata(&tmp) {
            Ok(meta) => meta.len(),
            Err(_) => {
                return Err(CoreError::Derivation(
                    "conversion tool reported success but produced no output".into(),
                ))
            }
        };
        if size == 0 {
            let _ = std::fs::remove_file(&tmp);
            return Err(CoreError::Derivation(
                "conversion tool produced an empty output file".into(),
            ));
        }

        std::fs::rename(&tmp, &artifact)?;
        info!("Derivation complete: {} ({} bytes)", artifact.display(), size);

        self.enforce_budget(kind).await;
        Ok(artifact)
    }

    /// Cache path an artifact for this key lives at.
    pub fn artifact_path(&self, key: &ArtifactKey, kind: DerivationKind) -> PathBuf {
        let stem = Path::new(&key.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| key.file_name.clone());
        self.cache_root
            .join(kind.subdir())
            .join(&key.partition)
            .join(format!("{}.{}", stem, kind.extension()))
    }

    fn key_lock(&self, key: &ArtifactKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    async fn derive(&self, source: &Path, tmp: &Path, kind: DerivationKind) -> CoreResult<()> {
        match kind {
            DerivationKind::Thumbnail => self
                .runner
                .thumbnail(source, tmp, self.thumbnail_size)
                .await
                .map_err(|e| CoreError::Derivation(e.to_string())),
            DerivationKind::Transcode => {
                if let Some(hw) = self.runner.info().hw_encoder.clone() {
                    match self.runner.transcode(source, tmp, &hw).await {
                        Ok(()) => return Ok(()),
                        Err(e) => {
                            warn!(
                                "Hardware encoder {} failed ({}), retrying with {}",
                                hw, e, SOFTWARE_ENCODER
                            );
                            let _ = std::fs::remove_file(tmp);
                        }
                    }
                }
                self.runner
                    .transcode(source, tmp, SOFTWARE_ENCODER)
                    .await
                    .map_err(|e| CoreError::Derivation(e.to_string()))
            }
        }
    }

    /// Deletes the oldest artifacts of a kind until total size fits the
    /// budget. Best-effort: a file that cannot be deleted is skipped.
    async fn enforce_budget(&self, kind: DerivationKind) {
        let _guard = self.evict_lock.lock().await;

        let mut artifacts = self.list_artifacts(kind);
        artifacts.sort_by_key(|(_, mtime, _)| *mtime);
        let mut total: u64 = artifacts.iter().map(|(_, _, size)| size).sum();

        let mut oldest_first = artifacts.into_iter();
        while total > self.max_bytes {
            let Some((path, _, size)) = oldest_first.next() else {
                break;
            };
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    total -= size;
                    info!("Cache evict: {} ({} bytes freed)", path.display(), size);
                }
                Err(e) => warn!("Cache evict failed for {}: {}", path.display(), e),
            }
        }
    }

    /// All present artifacts of a kind as (path, mtime, size).
    fn list_artifacts(&self, kind: DerivationKind) -> Vec<(PathBuf, SystemTime, u64)> {
        let mut out = Vec::new();
        let root = self.cache_root.join(kind.subdir());
        let Ok(partitions) = std::fs::read_dir(&root) else {
            return out;
        };
        for partition in partitions.flatten() {
            let Ok(files) = std::fs::read_dir(partition.path()) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                let matches_kind = path
                    .extension()
                    .is_some_and(|ext| ext == kind.extension());
                if !matches_kind {
                    continue;
                }
                if let Ok(meta) = file.metadata() {
                    let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    out.push((path, mtime, meta.len()));
                }
            }
        }
        out
    }
}

/// Bump an artifact's mtime so eviction sees it as recently used.
fn touch(path: &Path) {
    let bumped = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = bumped {
        debug!("Failed to bump artifact mtime for {}: {}", path.display(), e);
    }
}

/// Temporary output path next to the final artifact.
fn temp_path(artifact: &Path) -> PathBuf {
    let ext = artifact
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    artifact.with_extension(format!("tmp.{}", ext))
}
