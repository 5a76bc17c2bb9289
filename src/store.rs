//! Rolling on-disk storage of captured JPEG files
//!
//! Each role keeps its own monotonically increasing sequence. After writing
//! sequence `n`, the file for `n - RETENTION_DEPTH` of the same role is
//! deleted, so at most [`RETENTION_DEPTH`] files per role are on disk.
//! Id assignment, write and eviction happen under the role's lock, so ids
//! follow completion order even when pipelines commit concurrently.

use crate::error::PersistError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Number of files kept per role
pub const RETENTION_DEPTH: u64 = 10;

/// What a persisted file represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageRole {
    Fullsize,
    Thumbnail,
}

impl ImageRole {
    pub const ALL: [ImageRole; 2] = [ImageRole::Fullsize, ImageRole::Thumbnail];

    fn prefix(&self) -> &'static str {
        match self {
            ImageRole::Fullsize => "fullsize",
            ImageRole::Thumbnail => "thumbnail",
        }
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A file written by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedImage {
    pub path: PathBuf,
    pub role: ImageRole,
    pub sequence_id: u64,
}

/// Rolling file window rooted at one directory
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    /// Last committed sequence id per role
    fullsize_seq: Mutex<u64>,
    thumbnail_seq: Mutex<u64>,
}

impl FileStore {
    /// Opens the store, creating the directory and removing files left over
    /// from a previous run
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let store = Self {
            dir,
            fullsize_seq: Mutex::new(0),
            thumbnail_seq: Mutex::new(0),
        };
        store.purge_stale()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic location for a role and sequence id
    pub fn path_for(&self, role: ImageRole, sequence_id: u64) -> PathBuf {
        self.dir.join(format!("{}-{}.jpg", role.prefix(), sequence_id))
    }

    /// Highest sequence id committed for a role so far
    pub fn last_sequence(&self, role: ImageRole) -> u64 {
        *self.counter(role).lock()
    }

    /// Writes `bytes` under the next sequence id of `role`. A failed write
    /// does not consume an id.
    pub fn commit(&self, bytes: &[u8], role: ImageRole) -> Result<CapturedImage, PersistError> {
        let mut last = self.counter(role).lock();
        let image = self.persist(bytes, role, *last + 1)?;
        *last = image.sequence_id;
        Ok(image)
    }

    /// Writes `bytes` for `(role, sequence_id)` and evicts the file that
    /// fell out of the window. Eviction failures are logged, not returned.
    /// Callers hold the role's lock.
    fn persist(
        &self,
        bytes: &[u8],
        role: ImageRole,
        sequence_id: u64,
    ) -> Result<CapturedImage, PersistError> {
        let path = self.path_for(role, sequence_id);

        fs::write(&path, bytes).map_err(|source| PersistError {
            path: path.clone(),
            source,
        })?;

        if sequence_id > RETENTION_DEPTH {
            self.evict(role, sequence_id - RETENTION_DEPTH);
        }

        debug!(role = %role, sequence = sequence_id, bytes = bytes.len(), "Image persisted");

        Ok(CapturedImage {
            path,
            role,
            sequence_id,
        })
    }

    /// Restarts numbering from 1 and clears the directory
    pub fn reset(&self) -> io::Result<()> {
        let mut fullsize = self.fullsize_seq.lock();
        let mut thumbnail = self.thumbnail_seq.lock();
        *fullsize = 0;
        *thumbnail = 0;
        self.purge_stale()
    }

    fn counter(&self, role: ImageRole) -> &Mutex<u64> {
        match role {
            ImageRole::Fullsize => &self.fullsize_seq,
            ImageRole::Thumbnail => &self.thumbnail_seq,
        }
    }

    fn evict(&self, role: ImageRole, sequence_id: u64) {
        let path = self.path_for(role, sequence_id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to evict old image"),
        }
    }

    fn purge_stale(&self) -> io::Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if parse_file_name(&path).is_some() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale image");
                }
            }
        }
        Ok(())
    }
}

/// Recognizes `<role>-<sequence>.jpg`
fn parse_file_name(path: &Path) -> Option<(ImageRole, u64)> {
    let stem = path
        .file_name()?
        .to_str()?
        .strip_suffix(".jpg")?;
    let (prefix, sequence) = stem.rsplit_once('-')?;
    let role = ImageRole::ALL.into_iter().find(|r| r.prefix() == prefix)?;
    Some((role, sequence.parse().ok()?))
}
