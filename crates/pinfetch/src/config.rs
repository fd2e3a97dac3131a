//! `pinfetch.toml` configuration.
//!
//! ```toml
//! cache_dir = ".pinfetch"
//! repo_subfolder = "src/main/resources"
//!
//! [fetch]
//! timeout_secs = 30
//! max_retries = 100
//!
//! [source]
//! type = "gitlab"
//! repo_org = "acme/build-config"
//! anchor_type = "tag"
//! anchor = "v1.2.0"
//! domain = "git.acme.internal"
//! auth_token_env = "GITLAB_TOKEN"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::fetch::FetchOptions;
use crate::host::{self, PropertyLookup};
use crate::source::{GitAnchorType, Source, SourceSetup};

/// The standard configuration filename.
pub const CONFIG_FILENAME: &str = "pinfetch.toml";

/// Environment variable overriding the default cache directory.
pub const CACHE_DIR_ENV: &str = "PINFETCH_CACHE_DIR";

/// Default cache directory: `$PINFETCH_CACHE_DIR`, else `pinfetch-cache` in the temp dir.
pub fn default_cache_dir() -> PathBuf {
    std::env::var_os(CACHE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("pinfetch-cache"))
}

/// The main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PinfetchConfig {
    /// Cache directory, relative to the config file.
    pub cache_dir: Option<PathBuf>,
    /// Repository subfolder resource paths are relative to.
    pub repo_subfolder: Option<String>,
    pub fetch: FetchConfig,
    pub source: Option<SourceConfig>,
}

/// HTTP settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    /// Total rate-limit backoff allowed per request; `0` disables the deadline.
    pub max_total_wait_secs: Option<u64>,
    /// Ignore `HTTP_PROXY`/`HTTPS_PROXY` from the environment.
    pub no_proxy: bool,
}

impl FetchConfig {
    pub fn to_fetch_options(&self) -> FetchOptions {
        let mut opts = FetchOptions {
            no_proxy: self.no_proxy,
            ..FetchOptions::default()
        };
        if let Some(secs) = self.timeout_secs {
            opts.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.connect_timeout_secs {
            opts.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = self.max_retries {
            opts.retry.max_retries = retries;
        }
        match self.max_total_wait_secs {
            Some(0) => opts.retry.max_total_wait = None,
            Some(secs) => opts.retry.max_total_wait = Some(Duration::from_secs(secs)),
            None => {}
        }
        opts
    }
}

/// The `[source]` table, selected by its `type` key.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum SourceConfig {
    Github {
        repo_org: String,
        anchor_type: String,
        anchor: String,
        auth_token_env: Option<String>,
    },
    Gitlab {
        repo_org: String,
        anchor_type: String,
        anchor: String,
        domain: Option<String>,
        #[serde(default)]
        http: bool,
        auth_token_env: Option<String>,
    },
    Bitbucket {
        repo_org: String,
        anchor_type: String,
        anchor: String,
        domain: Option<String>,
        #[serde(default)]
        http: bool,
        /// Use the Bitbucket Server layout.
        #[serde(default)]
        server: bool,
        /// Server: a personal access token. Cloud: `username:appPassword`.
        auth_token_env: Option<String>,
    },
    LocalJar {
        path: PathBuf,
    },
    DevLocal {
        path: PathBuf,
    },
}

impl PinfetchConfig {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading {}", path.display()), e))?;
        toml::from_str(&content).map_err(|e| Error::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Find the configuration file by searching upward from the given directory.
    pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
        let mut current = start_dir.to_path_buf();
        loop {
            let config_path = current.join(CONFIG_FILENAME);
            if config_path.exists() {
                return Some(config_path);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Load configuration by searching upward from the given directory.
    pub fn load_from_dir(start_dir: &Path) -> Result<Option<(PathBuf, Self)>> {
        if let Some(config_path) = Self::find_config_file(start_dir) {
            let config = Self::load(&config_path)?;
            Ok(Some((config_path, config)))
        } else {
            Ok(None)
        }
    }

    /// The cache directory, with a relative `cache_dir` resolved against `config_dir`.
    pub fn cache_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => config_dir.join(dir),
            None => default_cache_dir(),
        }
    }

    /// Build the configured source, reading tokens from the environment.
    pub fn build_source(&self, reference_dir: &Path) -> Result<Option<Source>> {
        let env = |key: &str| std::env::var(key).ok();
        self.build_source_with(reference_dir, &env)
    }

    /// Build the configured source, reading tokens from `env`.
    pub fn build_source_with(
        &self,
        reference_dir: &Path,
        env: &impl PropertyLookup,
    ) -> Result<Option<Source>> {
        let Some(source) = &self.source else {
            return Ok(None);
        };
        let mut setup = SourceSetup::new(reference_dir);
        if let Some(subfolder) = &self.repo_subfolder {
            setup = setup.repo_subfolder(subfolder)?;
        }
        let token = |name: &Option<String>| -> Result<Option<String>> {
            name.as_deref()
                .map(|name| host::proj(env, name, "auth token for the configured source"))
                .transpose()
        };

        let source = match source {
            SourceConfig::Github {
                repo_org,
                anchor_type,
                anchor,
                auth_token_env,
            } => {
                let mut github = setup.github(repo_org, anchor_type.parse()?, anchor)?;
                if let Some(token) = token(auth_token_env)? {
                    github = github.auth_token(token);
                }
                github.into()
            }
            SourceConfig::Gitlab {
                repo_org,
                anchor_type,
                anchor,
                domain,
                http,
                auth_token_env,
            } => {
                let mut gitlab = setup.gitlab(repo_org, anchor_type.parse()?, anchor)?;
                if let Some(domain) = domain {
                    gitlab = if *http {
                        gitlab.custom_domain_http(domain)
                    } else {
                        gitlab.custom_domain_https(domain)
                    };
                }
                if let Some(token) = token(auth_token_env)? {
                    gitlab = gitlab.auth_token(token);
                }
                gitlab.into()
            }
            SourceConfig::Bitbucket {
                repo_org,
                anchor_type,
                anchor,
                domain,
                http,
                server,
                auth_token_env,
            } => {
                let anchor_type: GitAnchorType = anchor_type.parse()?;
                let mut bitbucket = setup.bitbucket(repo_org, anchor_type, anchor)?;
                if let Some(domain) = domain {
                    bitbucket = if *http {
                        bitbucket.custom_domain_http(domain)
                    } else {
                        bitbucket.custom_domain_https(domain)
                    };
                }
                bitbucket = match (token(auth_token_env)?, *server) {
                    (Some(token), true) => bitbucket.server_auth(&token),
                    (Some(token), false) => bitbucket.cloud_auth(&token),
                    (None, true) => bitbucket.server(),
                    (None, false) => bitbucket,
                };
                bitbucket.into()
            }
            SourceConfig::LocalJar { path } => setup.local_jar(reference_dir.join(path))?,
            SourceConfig::DevLocal { path } => setup.dev_local(path)?,
        };
        Ok(Some(source))
    }
}
