//! The resource service: one cache, one active source, one property store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::{debug, info};

use crate::cache::{CacheEntry, ImmutableCache};
use crate::error::{Error, Result};
use crate::fetch::{FetchOptions, Fetcher};
use crate::props::{self, PropertyStore};
use crate::source::{Resolved, Source};

/// Entry point for resolving resources.
///
/// The cache directory must be set with [`Pinfetch::init_cache_dir`] and a
/// source with [`Pinfetch::set_source`] before resources are requested.
#[derive(Debug)]
pub struct Pinfetch {
    fetcher: Arc<Fetcher>,
    cache: OnceLock<ImmutableCache>,
    source: RwLock<Option<Arc<Source>>>,
    properties: PropertyStore,
}

impl Pinfetch {
    pub fn new() -> Result<Self> {
        Ok(Self::with_fetcher(Fetcher::new(&FetchOptions::default())?))
    }

    pub fn with_fetcher(fetcher: Fetcher) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            cache: OnceLock::new(),
            source: RwLock::new(None),
            properties: PropertyStore::new(),
        }
    }

    /// Set the cache directory.
    ///
    /// Setting the same directory again is a no-op; a different one is an error.
    pub fn init_cache_dir(&self, dir: impl Into<PathBuf>) -> Result<()> {
        let requested = dir.into();
        let cache = self
            .cache
            .get_or_init(|| ImmutableCache::new(requested.clone(), Arc::clone(&self.fetcher)));
        if cache.dir() != requested {
            return Err(Error::CacheDirConflict {
                current: cache.dir().to_path_buf(),
                requested,
            });
        }
        debug!("Cache directory is {}", requested.display());
        Ok(())
    }

    pub fn cache_dir(&self) -> Result<&Path> {
        Ok(self.cache()?.dir())
    }

    fn cache(&self) -> Result<&ImmutableCache> {
        self.cache.get().ok_or(Error::CacheNotInitialized)
    }

    /// Activate a source. Fails if one is already active.
    pub fn set_source(&self, source: impl Into<Source>) -> Result<()> {
        let mut slot = self.source.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        let source = source.into();
        info!("Using resource source {}", source);
        *slot = Some(Arc::new(source));
        Ok(())
    }

    /// Deactivate the current source, if any.
    pub fn clear_source(&self) {
        self.source
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn source(&self) -> Result<Arc<Source>> {
        self.source
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::SourceNotInitialized)
    }

    /// Local copy of an immutable URL.
    pub fn immutable_url(&self, url: &str) -> Result<PathBuf> {
        self.immutable_url_with_suffix(url, None)
    }

    /// Local copy of an immutable URL whose file name ends with `suffix`.
    pub fn immutable_url_with_suffix(&self, url: &str, suffix: Option<&str>) -> Result<PathBuf> {
        let auth = self.source().ok().and_then(|source| source.auth());
        self.cache()?.resolve(url, suffix, auth.as_ref())
    }

    /// Local file for a resource path of the active source.
    pub fn file(&self, resource: &str) -> Result<PathBuf> {
        let source = self.source()?;
        match source.resolve(resource, &self.fetcher)? {
            Resolved::Direct(path) => Ok(path),
            Resolved::Url(url) => self.cache()?.resolve(&url, None, source.auth().as_ref()),
        }
    }

    /// Value of `key` in `<prop_file>.properties` of the active source.
    ///
    /// Dev-local files are read on every call so edits show up immediately.
    pub fn prop(&self, prop_file: &str, key: &str) -> Result<String> {
        let file_name = format!("{prop_file}.properties");
        let dev = self.source()?.is_dev();
        let path = self.file(&file_name)?;
        let parsed = if dev {
            Arc::new(props::load(&path)?)
        } else {
            self.properties.load(&path)?
        };
        props::lookup(&parsed, &file_name, key)
    }

    /// Delete every cached file and forget all parsed properties.
    pub fn wipe_cache(&self) -> Result<()> {
        self.properties.clear();
        self.cache()?.wipe()
    }

    /// Everything currently in the cache directory.
    pub fn cache_entries(&self) -> Result<Vec<CacheEntry>> {
        self.cache()?.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::source::{GitAnchorType, SourceSetup};
    use std::fs;
    use tempfile::TempDir;

    fn service() -> Pinfetch {
        Pinfetch::new().unwrap()
    }

    #[test]
    fn test_cache_dir_required() {
        let pinfetch = service();
        assert!(matches!(pinfetch.cache_dir(), Err(Error::CacheNotInitialized)));
        assert!(matches!(
            pinfetch.immutable_url("https://x.org/a"),
            Err(Error::CacheNotInitialized)
        ));
    }

    #[test]
    fn test_cache_dir_reinit() {
        let dir = TempDir::new().unwrap();
        let pinfetch = service();
        pinfetch.init_cache_dir(dir.path()).unwrap();
        pinfetch.init_cache_dir(dir.path()).unwrap();
        assert_eq!(pinfetch.cache_dir().unwrap(), dir.path());

        let err = pinfetch.init_cache_dir(dir.path().join("other")).unwrap_err();
        assert!(matches!(err, Error::CacheDirConflict { .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_set_source_twice() {
        let pinfetch = service();
        let setup = SourceSetup::new(".");
        pinfetch
            .set_source(setup.github("org/repo", GitAnchorType::Tag, "v1").unwrap())
            .unwrap();
        let err = pinfetch
            .set_source(setup.github("org/repo", GitAnchorType::Tag, "v2").unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized));

        pinfetch.clear_source();
        pinfetch
            .set_source(setup.github("org/repo", GitAnchorType::Tag, "v2").unwrap())
            .unwrap();
    }

    #[test]
    fn test_file_requires_source() {
        let dir = TempDir::new().unwrap();
        let pinfetch = service();
        pinfetch.init_cache_dir(dir.path()).unwrap();
        assert!(matches!(
            pinfetch.file("a.txt"),
            Err(Error::SourceNotInitialized)
        ));
    }

    #[test]
    fn test_dev_local_bypasses_cache() {
        let dir = TempDir::new().unwrap();
        let resources = dir.path().join("repo/src/main/resources");
        fs::create_dir_all(&resources).unwrap();
        fs::write(resources.join("sample.properties"), "a=1\n").unwrap();

        let pinfetch = service();
        pinfetch.init_cache_dir(dir.path().join("cache")).unwrap();
        pinfetch
            .set_source(SourceSetup::new(dir.path()).dev_local("repo").unwrap())
            .unwrap();

        let file = pinfetch.file("sample.properties").unwrap();
        assert!(file.starts_with(resources.canonicalize().unwrap()));
        assert_eq!(pinfetch.prop("sample", "a").unwrap(), "1");

        // Edits in a working copy are visible without wiping anything.
        fs::write(resources.join("sample.properties"), "a=2\n").unwrap();
        assert_eq!(pinfetch.prop("sample", "a").unwrap(), "2");
        assert!(!dir.path().join("cache").exists());
    }

    #[test]
    fn test_prop_missing_key_names_file() {
        let dir = TempDir::new().unwrap();
        let resources = dir.path().join("src/main/resources");
        fs::create_dir_all(&resources).unwrap();
        fs::write(resources.join("versions.properties"), "spotless=6\nguava=33\n").unwrap();

        let pinfetch = service();
        pinfetch.init_cache_dir(dir.path().join("cache")).unwrap();
        pinfetch
            .set_source(SourceSetup::new(dir.path()).dev_local(".").unwrap())
            .unwrap();

        let err = pinfetch.prop("versions", "junit").unwrap_err();
        assert_eq!(
            err.to_string(),
            "versions.properties does not have key 'junit', does have [guava, spotless]"
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_wipe_without_files() {
        let dir = TempDir::new().unwrap();
        let pinfetch = service();
        pinfetch.init_cache_dir(dir.path().join("never-created")).unwrap();
        pinfetch.wipe_cache().unwrap();
        assert!(pinfetch.cache_entries().unwrap().is_empty());
    }
}
