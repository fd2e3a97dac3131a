//! Shared argument definitions.

use std::path::{Path, PathBuf};

use anyhow::Context;
use pinfetch::config::PinfetchConfig;
use pinfetch::host::PropertyLookup;
use pinfetch::{Fetcher, Pinfetch};
use tracing::debug;

/// Configuration-related command-line arguments.
///
/// Embedded in every command with `#[command(flatten)]`.
#[derive(clap::Args, Clone, Default)]
pub struct ConfigArgs {
    /// Path to pinfetch.toml (default: search upward from the current directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Custom cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,
}

/// A loaded configuration and the directory it is relative to.
pub struct Session {
    config: PinfetchConfig,
    config_dir: PathBuf,
    cache_dir: PathBuf,
}

impl Session {
    pub fn load(args: &ConfigArgs) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().context("getting current directory")?;
        let (config_dir, config) = match &args.config {
            Some(path) => (parent_dir(path, &cwd), PinfetchConfig::load(path)?),
            None => match PinfetchConfig::load_from_dir(&cwd)? {
                Some((path, config)) => {
                    debug!("Found config: {}", path.display());
                    (parent_dir(&path, &cwd), config)
                }
                None => {
                    debug!("No config file found, using defaults");
                    (cwd, PinfetchConfig::default())
                }
            },
        };
        let cache_dir = args
            .cache_dir
            .clone()
            .unwrap_or_else(|| config.cache_dir(&config_dir));
        Ok(Self {
            config,
            config_dir,
            cache_dir,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// A service with the cache directory set and no source.
    pub fn service(&self) -> anyhow::Result<Pinfetch> {
        let fetcher = Fetcher::new(&self.config.fetch.to_fetch_options())?;
        let pinfetch = Pinfetch::with_fetcher(fetcher);
        pinfetch.init_cache_dir(&self.cache_dir)?;
        Ok(pinfetch)
    }

    /// A service with the configured source active.
    pub fn service_with_source(&self) -> anyhow::Result<Pinfetch> {
        self.activate(true, &env_lookup)
    }

    /// A service with the configured source active if there is one.
    ///
    /// Fetches of plain URLs still carry the source's credentials.
    pub fn service_with_optional_source(&self) -> anyhow::Result<Pinfetch> {
        self.activate(false, &env_lookup)
    }

    fn activate(&self, required: bool, env: &impl PropertyLookup) -> anyhow::Result<Pinfetch> {
        let pinfetch = self.service()?;
        match self.config.build_source_with(&self.config_dir, env)? {
            Some(source) => pinfetch.set_source(source)?,
            None if required => return Err(pinfetch::Error::SourceNotInitialized.into()),
            None => debug!("No source configured, fetching without credentials"),
        }
        Ok(pinfetch)
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parent_dir(config_path: &Path, cwd: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => cwd.join(parent),
        _ => cwd.to_path_buf(),
    }
}
