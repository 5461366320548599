//! Blob storage for archived content
//!
//! Keys are hierarchical (`timeline/<subject>/<post>`, `media/<file>`).
//! `FsBlobStore` maps them onto a directory tree, optionally gzipping each
//! blob. Compression is invisible to callers: `get` and `exists` accept the
//! plain key whatever was written.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

const GZIP_SUFFIX: &str = ".gz";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Invalid blob key: '{0}'")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob task failed: {0}")]
    Task(String),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Content-addressed object storage
///
/// Writing the same key twice replaces the blob, which makes re-delivered
/// work a no-op for consumers keyed by post ID or media file name.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> BlobResult<()>;

    async fn exists(&self, key: &str) -> BlobResult<bool>;

    async fn get(&self, key: &str) -> BlobResult<Option<Vec<u8>>>;
}

/// Local-disk blob store
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    compress: bool,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            root: root.into(),
            compress,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a key to its plain path, rejecting anything that could escape the root
    fn plain_path(&self, key: &str) -> BlobResult<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('/')
            && key
                .split('/')
                .all(|seg| !seg.is_empty() && seg != "." && seg != ".." && !seg.contains('\\'));
        if !valid {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    fn gzip_path(plain: &Path) -> PathBuf {
        let mut name = plain.as_os_str().to_os_string();
        name.push(GZIP_SUFFIX);
        PathBuf::from(name)
    }
}

fn write_atomic(path: &Path, bytes: &[u8], compress: bool) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    if compress {
        let mut encoder = GzEncoder::new(&mut tmp, Compression::default());
        encoder.write_all(bytes)?;
        encoder.finish()?;
    } else {
        tmp.write_all(bytes)?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_blob(plain: &Path, gzip: &Path) -> std::io::Result<Option<Vec<u8>>> {
    if gzip.exists() {
        let file = std::fs::File::open(gzip)?;
        let mut decoder = GzDecoder::new(file);
        let mut bytes = Vec::new();
        decoder.read_to_end(&mut bytes)?;
        return Ok(Some(bytes));
    }
    if plain.exists() {
        return Ok(Some(std::fs::read(plain)?));
    }
    Ok(None)
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> BlobResult<()> {
        let plain = self.plain_path(key)?;
        let compress = self.compress;
        let target = if compress {
            Self::gzip_path(&plain)
        } else {
            plain
        };

        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes, compress))
            .await
            .map_err(|e| BlobError::Task(e.to_string()))??;

        tracing::trace!("Stored blob {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        let plain = self.plain_path(key)?;
        let gzip = Self::gzip_path(&plain);
        Ok(tokio::fs::try_exists(&gzip).await? || tokio::fs::try_exists(&plain).await?)
    }

    async fn get(&self, key: &str) -> BlobResult<Option<Vec<u8>>> {
        let plain = self.plain_path(key)?;
        let gzip = Self::gzip_path(&plain);
        let bytes = tokio::task::spawn_blocking(move || read_blob(&plain, &gzip))
            .await
            .map_err(|e| BlobError::Task(e.to_string()))??;
        Ok(bytes)
    }
}
