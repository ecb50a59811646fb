use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::path::{CasTransform, Location, PathTransform};

/// Root directory used when none is configured.
pub const DEFAULT_ROOT: &str = "dfs_store";

/// Suffix of in-progress writes. Such files are never visible as objects.
const STAGING_SUFFIX: &str = ".part";

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// On-disk object store addressed by logical keys.
///
/// Every operation resolves the key through the configured
/// [`PathTransform`] and touches only the resulting location. The store does
/// not serialize concurrent writers to the same key.
pub struct Store {
    root: PathBuf,
    transform: Arc<dyn PathTransform>,
}

impl Store {
    /// Create a store rooted at `root`. An empty root falls back to [`DEFAULT_ROOT`].
    pub fn new(root: impl Into<PathBuf>, transform: Arc<dyn PathTransform>) -> Self {
        let mut root = root.into();
        if root.as_os_str().is_empty() {
            root = PathBuf::from(DEFAULT_ROOT);
        }
        Self { root, transform }
    }

    /// Content-addressed store rooted at `root`.
    pub fn with_cas(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Arc::new(CasTransform::new()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn transform(&self) -> &dyn PathTransform {
        self.transform.as_ref()
    }

    /// Resolve a key to its location relative to the root.
    pub fn locate(&self, key: &str) -> Location {
        self.transform.transform(key)
    }

    fn resolve(&self, key: &str) -> StoreResult<Location> {
        let location = self.locate(key);
        if !location.is_contained() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(location)
    }

    /// Copy `reader` to the object for `key`, replacing any previous content.
    ///
    /// Missing directories are created. The bytes go to a staging file next
    /// to the object and are renamed into place once fully written, so
    /// readers never see a partial object. Returns the number of bytes written.
    pub async fn write<R>(&self, key: &str, reader: &mut R) -> StoreResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let (location, staged, written) = self.stage(key, reader).await?;
        self.commit(key, &location, &staged, written).await
    }

    /// Like [`write`](Self::write), but commits only if `reader` yields
    /// exactly `expected` bytes. On a shorter read the staged bytes are
    /// discarded, any previous object under `key` is left untouched, and
    /// [`StoreError::Truncated`] is returned.
    pub async fn write_exact<R>(&self, key: &str, reader: &mut R, expected: u64) -> StoreResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let (location, staged, written) = self.stage(key, reader).await?;
        if written != expected {
            discard(&staged).await;
            return Err(StoreError::Truncated {
                key: key.to_string(),
                expected,
                received: written,
            });
        }
        self.commit(key, &location, &staged, written).await
    }

    async fn stage<R>(&self, key: &str, reader: &mut R) -> StoreResult<(Location, PathBuf, u64)>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let location = self.resolve(key)?;
        let dir = self.root.join(location.directory_path());
        fs::create_dir_all(&dir).await?;

        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let staged = dir.join(format!(
            ".{}.{}.{seq}{STAGING_SUFFIX}",
            location.filename,
            std::process::id()
        ));
        let copied = async {
            let mut file = File::create(&staged).await?;
            let written = tokio::io::copy(reader, &mut file).await?;
            file.flush().await?;
            Ok::<_, std::io::Error>(written)
        }
        .await;

        match copied {
            Ok(written) => Ok((location, staged, written)),
            Err(e) => {
                discard(&staged).await;
                Err(e.into())
            }
        }
    }

    async fn commit(&self, key: &str, location: &Location, staged: &Path, written: u64) -> StoreResult<u64> {
        if let Err(e) = fs::rename(staged, location.under(&self.root)).await {
            discard(staged).await;
            return Err(e.into());
        }
        debug!(key, location = %location, bytes = written, root = %self.root.display(), "object written");
        Ok(written)
    }

    /// Open the object for `key` for streaming reads.
    pub async fn read(&self, key: &str) -> StoreResult<File> {
        let location = self.resolve(key)?;
        match File::open(location.under(&self.root)).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the whole object for `key` into memory.
    pub async fn read_to_vec(&self, key: &str) -> StoreResult<Vec<u8>> {
        let mut file = self.read(key).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Returns `true` if an object is stored under `key`. Never fails.
    pub async fn has(&self, key: &str) -> bool {
        match self.resolve(key) {
            Ok(location) => fs::try_exists(location.under(&self.root))
                .await
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Remove the whole first-level shard that holds `key`.
    ///
    /// Every other object sharing that shard is removed with it. Deleting a
    /// shard that does not exist succeeds.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        let location = self.resolve(key)?;
        let shard = match location.first_segment() {
            Some(segment) => self.root.join(segment),
            None => location.under(&self.root),
        };
        let result = match fs::metadata(&shard).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&shard).await,
            Ok(_) => fs::remove_file(&shard).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!(key, shard = %shard.display(), "shard deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the store root and everything under it.
    pub async fn clear(&self) -> StoreResult<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                debug!(root = %self.root.display(), "store cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of object files currently under the root.
    pub async fn object_count(&self) -> StoreResult<usize> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            if !root.exists() {
                return Ok(0);
            }
            let mut count = 0;
            for entry in WalkDir::new(&root) {
                let entry = entry.map_err(|e| StoreError::Walk(e.to_string()))?;
                let staged = entry.file_name().to_string_lossy().ends_with(STAGING_SUFFIX);
                if entry.file_type().is_file() && !staged {
                    count += 1;
                }
            }
            Ok(count)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

async fn discard(staged: &Path) {
    if let Err(e) = fs::remove_file(staged).await {
        debug!(path = %staged.display(), error = %e, "failed to remove staging file");
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("transform", &self.transform.name())
            .finish()
    }
}
