//! Error types.

use std::io;
use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad setup, raised before anything is fetched.
    Configuration,
    /// Cached metadata disagrees with the request.
    Integrity,
    /// The remote or the archive does not have what was asked for.
    NotFound,
    /// The requested combination is not implemented.
    Unsupported,
    /// Network or filesystem failure.
    Transport,
}

/// Errors that can occur while resolving, fetching, or caching resources.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Configuration errors
    #[error("You already initialized the resource source, you can't do this twice.")]
    AlreadyInitialized,

    #[error("No resource source is configured, set one up before requesting resources.")]
    SourceNotInitialized,

    #[error("The cache directory has not been initialized.")]
    CacheNotInitialized,

    #[error("Cache directory was already initialized to {current}, can't change it to {requested}")]
    CacheDirConflict { current: PathBuf, requested: PathBuf },

    #[error("Remove the {position} slash from {what} '{value}'")]
    SurroundingSlash {
        what: &'static str,
        position: &'static str,
        value: String,
    },

    #[error("repoOrg must be in format 'repoOrg/repoName', was '{0}'")]
    InvalidRepoOrg(String),

    #[error("repoSubfolder has no effect when reading from a jar, remove the subfolder '{0}'")]
    SubfolderWithJar(String),

    #[error("Unknown anchor type '{0}', expected one of tag, commit, tree")]
    UnknownAnchorType(String),

    #[error("Expected a file URL in the format: file:///path-to-dependency.jar!/path-to-file.ext, was {0}")]
    InvalidJarUrl(String),

    #[error("Undefined '{key}': {desc}")]
    UndefinedProperty { key: String, desc: String },

    #[error("Wrong type '{key}': {desc} - expected {expected} but was '{value}'")]
    WrongPropertyType {
        key: String,
        desc: String,
        expected: &'static str,
        value: String,
    },

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // Integrity errors
    #[error("Unexpected content in {0}, it has no url field. Delete it and try again.")]
    MetadataMissingUrl(PathBuf),

    #[error("Expected url {expected} but was {actual} for {meta_path}")]
    UrlMismatch {
        expected: String,
        actual: String,
        meta_path: PathBuf,
    },

    // Not-found errors
    #[error("{url}\nreceived http code {status}\n{body}")]
    HttpStatus { url: String, status: u16, body: String },

    #[error("Could not find '{entry}' in '{archive}'")]
    EntryNotFound { entry: String, archive: PathBuf },

    #[error("{file} does not have key '{key}', does have [{available}]")]
    MissingKey {
        file: String,
        key: String,
        available: String,
    },

    // Unsupported operations
    #[error("{0}")]
    Unsupported(String),

    // Transport errors
    #[error("Rate limit backoff for {url} would exceed the {limit_secs}s deadline")]
    RateLimitDeadline { url: String, limit_secs: u64 },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to persist temp file: {0}")]
    TempfilePersist(#[from] tempfile::PersistError),
}

impl Error {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyInitialized
            | Self::SourceNotInitialized
            | Self::CacheNotInitialized
            | Self::CacheDirConflict { .. }
            | Self::SurroundingSlash { .. }
            | Self::InvalidRepoOrg(_)
            | Self::SubfolderWithJar(_)
            | Self::UnknownAnchorType(_)
            | Self::InvalidJarUrl(_)
            | Self::UndefinedProperty { .. }
            | Self::WrongPropertyType { .. }
            | Self::ConfigInvalid { .. } => ErrorKind::Configuration,
            Self::MetadataMissingUrl(_) | Self::UrlMismatch { .. } => ErrorKind::Integrity,
            Self::HttpStatus { .. } | Self::EntryNotFound { .. } | Self::MissingKey { .. } => {
                ErrorKind::NotFound
            }
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::RateLimitDeadline { .. }
            | Self::Io { .. }
            | Self::Http(_)
            | Self::Zip(_)
            | Self::Json(_)
            | Self::TempfilePersist(_) => ErrorKind::Transport,
        }
    }

    /// Get an actionable hint for the error.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::MetadataMissingUrl(_) | Self::UrlMismatch { .. } => {
                Some("Delete the cached file, or run: pinfetch wipe")
            }
            Self::AlreadyInitialized => Some("Configure the source only once per process"),
            Self::SourceNotInitialized => Some("Add a [source] table to pinfetch.toml"),
            Self::HttpStatus { status: 401 | 403, .. } => {
                Some("Check that the auth token has read access to the repository")
            }
            _ => None,
        }
    }
}
