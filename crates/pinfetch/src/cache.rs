//! Download-once cache for immutable URLs.
//!
//! # Cache Layout
//!
//! Every URL is stored flat in the cache directory under its
//! [safe name](crate::safe_name), next to a sidecar metadata file:
//!
//! ```text
//! <temp dir>/pinfetch-cache/
//!   https-raw.githubusercontent.com-org--AbCdEw--resources-rules.xml              # content
//!   meta_https-raw.githubusercontent.com-org--AbCdEw--resources-rules.xml.properties  # metadata
//!   https-raw.githubusercontent.com-org--AbCdEw--resources-rules.xml.lock         # cross-process lock
//! ```
//!
//! The metadata records `version`, `url`, `downloadedAt` and `sha256`. A
//! content file is only trusted when its metadata names the requested URL.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fetch::{AuthDecorator, Fetcher};
use crate::props;
use crate::safe_name;

/// Value of the `version` metadata field.
pub const METADATA_VERSION: &str = "1";

const PROP_VERSION: &str = "version";
const PROP_URL: &str = "url";
const PROP_DOWNLOADED_AT: &str = "downloadedAt";
const PROP_SHA256: &str = "sha256";

/// Joins a URL and its required suffix into one key; `|` cannot occur in a URL.
const KEY_SEPARATOR: char = '|';

/// Index key for a URL with an optional required suffix.
pub fn cache_key(url: &str, required_suffix: Option<&str>) -> String {
    match required_suffix {
        Some(suffix) => format!("{url}{KEY_SEPARATOR}{suffix}"),
        None => url.to_string(),
    }
}

/// Get the meta file path for a safe name.
pub fn meta_path(cache_dir: &Path, safe_name: &str) -> PathBuf {
    cache_dir.join(format!("meta_{safe_name}.properties"))
}

/// Get the lock file path for a safe name.
pub fn lock_path(cache_dir: &Path, safe_name: &str) -> PathBuf {
    cache_dir.join(format!("{safe_name}.lock"))
}

/// A cached entry as found on disk.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Original URL
    pub url: String,
    /// When the content was downloaded, as recorded
    pub downloaded_at: Option<String>,
    /// Path to the content file
    pub path: PathBuf,
    /// Content size in bytes
    pub size_bytes: u64,
}

/// The download-once cache.
///
/// Each key is fetched at most once per cache instance; concurrent requests
/// for the same key wait for the first one, requests for other keys proceed
/// in parallel. [`ImmutableCache::wipe`] waits for all in-flight requests.
#[derive(Debug)]
pub struct ImmutableCache {
    dir: PathBuf,
    fetcher: Arc<Fetcher>,
    index: Mutex<HashMap<String, PathBuf>>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    gate: RwLock<()>,
}

impl ImmutableCache {
    pub fn new(dir: impl Into<PathBuf>, fetcher: Arc<Fetcher>) -> Self {
        Self {
            dir: dir.into(),
            fetcher,
            index: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            gate: RwLock::new(()),
        }
    }

    /// Get the cache directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Return a local file holding the content of `url`, downloading it if needed.
    ///
    /// With `required_suffix`, the file name is forced to end with it.
    pub fn resolve(
        &self,
        url: &str,
        required_suffix: Option<&str>,
        auth: Option<&AuthDecorator>,
    ) -> Result<PathBuf> {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        self.resolve_gated(url, required_suffix, auth)
    }

    /// [`Self::resolve`] for a caller already holding the read gate.
    fn resolve_gated(
        &self,
        url: &str,
        required_suffix: Option<&str>,
        auth: Option<&AuthDecorator>,
    ) -> Result<PathBuf> {
        let key = cache_key(url, required_suffix);
        if let Some(path) = self.indexed(&key) {
            return Ok(path);
        }

        let key_lock = self.key_lock(&key);
        let resolved = {
            let _key_guard = key_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.resolve_locked(key.clone(), url, required_suffix, auth)
        };
        self.release_key_lock(&key, key_lock);
        resolved
    }

    fn resolve_locked(
        &self,
        key: String,
        url: &str,
        required_suffix: Option<&str>,
        auth: Option<&AuthDecorator>,
    ) -> Result<PathBuf> {
        // Another thread may have finished this key while we waited.
        if let Some(path) = self.indexed(&key) {
            return Ok(path);
        }

        let safe = safe_name::encode_with_suffix(url, required_suffix);
        let data_file = self.dir.join(&safe);
        let meta_file = meta_path(&self.dir, &safe);

        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::io(format!("creating cache directory {}", self.dir.display()), e)
        })?;
        let _file_lock = FileLock::acquire(lock_path(&self.dir, &safe))?;

        if data_file.is_file() && meta_file.is_file() {
            if verify(url, &data_file, &meta_file)? {
                debug!("Using cached {} for {}", data_file.display(), url);
                self.register(key, &data_file);
                return Ok(data_file);
            }
            warn!(
                "Cached content {} does not match its recorded hash, downloading again",
                data_file.display()
            );
        }

        self.download(url, auth, &data_file, &meta_file)?;
        self.register(key, &data_file);
        Ok(data_file)
    }

    /// Forget every entry and delete the whole cache directory.
    pub fn wipe(&self) -> Result<()> {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        if !self.dir.exists() {
            return Ok(());
        }
        info!("Wiping cache {}", self.dir.display());
        for entry in walkdir::WalkDir::new(&self.dir).contents_first(true) {
            let entry = entry.map_err(|e| {
                let context = format!("walking cache directory {}", self.dir.display());
                Error::io(context, io::Error::other(e))
            })?;
            let path = entry.path();
            let removed = if entry.file_type().is_dir() {
                fs::remove_dir(path)
            } else {
                fs::remove_file(path)
            };
            match removed {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(format!("deleting {}", path.display()), e)),
            }
        }
        Ok(())
    }

    /// List all cached entries that have readable metadata.
    pub fn list(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        if !self.dir.exists() {
            return Ok(entries);
        }

        for entry in walkdir::WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if let Some(cache_entry) = Self::try_read_cache_entry(entry.path()) {
                entries.push(cache_entry);
            }
        }
        entries.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(entries)
    }

    /// Read a cache entry from a meta file path, `None` for anything else.
    fn try_read_cache_entry(path: &Path) -> Option<CacheEntry> {
        let name = path.file_name()?.to_str()?;
        let safe = name.strip_prefix("meta_")?.strip_suffix(".properties")?;
        let content_path = path.with_file_name(safe);
        let size_bytes = fs::metadata(&content_path).ok()?.len();
        let mut meta = props::load(path).ok()?;
        Some(CacheEntry {
            url: meta.remove(PROP_URL)?,
            downloaded_at: meta.remove(PROP_DOWNLOADED_AT),
            path: content_path,
            size_bytes,
        })
    }

    fn indexed(&self, key: &str) -> Option<PathBuf> {
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        let path = index.get(key)?;
        if path.is_file() {
            return Some(path.clone());
        }
        debug!("Cached file {} disappeared, resolving again", path.display());
        index.remove(key);
        None
    }

    fn register(&self, key: String, path: &Path) {
        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, path.to_path_buf());
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Drop the per-key lock once no other request holds or waits on it.
    ///
    /// Handles are only cloned and dropped under the map lock, so the count is exact.
    fn release_key_lock(&self, key: &str, key_lock: Arc<Mutex<()>>) {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(key_lock);
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    fn download(
        &self,
        url: &str,
        auth: Option<&AuthDecorator>,
        data_file: &Path,
        meta_file: &Path,
    ) -> Result<()> {
        // A half-written pair is never trusted: start from nothing.
        remove_if_exists(meta_file)?;
        remove_if_exists(data_file)?;

        info!("Downloading {}", url);
        let mut temp_content = new_temp_file(&self.dir)?;
        let mut writer = HashingWriter::new(&mut temp_content);
        self.fetcher.fetch(url, auth, &mut writer)?;
        let sha256 = writer.finish();
        temp_content
            .flush()
            .map_err(|e| Error::io(format!("writing {}", data_file.display()), e))?;
        temp_content.persist(data_file)?;

        let downloaded_at = Utc::now().format("%a %b %d %H:%M:%S UTC %Y").to_string();
        let meta = props::render(
            "pinfetch metadata",
            &[
                (PROP_VERSION, METADATA_VERSION),
                (PROP_URL, url),
                (PROP_DOWNLOADED_AT, downloaded_at.as_str()),
                (PROP_SHA256, sha256.as_str()),
            ],
        );
        let mut temp_meta = new_temp_file(&self.dir)?;
        temp_meta
            .write_all(meta.as_bytes())
            .map_err(|e| Error::io(format!("writing {}", meta_file.display()), e))?;
        temp_meta.persist(meta_file)?;

        debug!("Cached {} as {}", url, data_file.display());
        Ok(())
    }
}

/// Check an existing pair against `url`.
///
/// Returns `Ok(false)` when the content no longer matches its recorded hash.
fn verify(url: &str, data_file: &Path, meta_file: &Path) -> Result<bool> {
    let meta = props::load(meta_file)?;
    let Some(recorded) = meta.get(PROP_URL) else {
        return Err(Error::MetadataMissingUrl(meta_file.to_path_buf()));
    };
    if recorded != url {
        return Err(Error::UrlMismatch {
            expected: url.to_string(),
            actual: recorded.clone(),
            meta_path: meta_file.to_path_buf(),
        });
    }
    match meta.get(PROP_SHA256) {
        Some(expected) => Ok(*expected == hash_file(data_file)?),
        None => Ok(true),
    }
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).map_err(|e| Error::io(format!("opening {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| Error::io(format!("hashing {}", path.display()), e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// A temp file in `dir` that, once persisted, has the same mode as any file
/// created under the current umask.
fn new_temp_file(dir: &Path) -> Result<NamedTempFile> {
    #[cfg_attr(not(unix), allow(unused_mut))]
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    builder
        .tempfile_in(dir)
        .map_err(|e| Error::io(format!("creating temp file in {}", dir.display()), e))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed stale {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(format!("removing {}", path.display()), e)),
    }
}

/// Writer that computes the SHA256 of everything passing through.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Exclusive advisory lock held across processes while an entry is checked or written.
struct FileLock {
    _file: File,
}

impl FileLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        let file = File::create(&path)
            .map_err(|e| Error::io(format!("creating lock file {}", path.display()), e))?;
        if file.try_lock_exclusive().is_err() {
            info!("Waiting for another process to finish {}", path.display());
            file.lock_exclusive()
                .map_err(|e| Error::io(format!("locking {}", path.display()), e))?;
        }
        Ok(Self { _file: file })
    }
}
