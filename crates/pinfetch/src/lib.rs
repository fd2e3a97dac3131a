//! Fetch shared build resources from a pinned source and cache them locally.
//!
//! Resources (checkstyle rules, license headers, property sets, scripts) live
//! in a git repository, a jar, or a local checkout. A resource path such as
//! `spotless/license.java` is resolved against the active [`Source`] into an
//! immutable URL, downloaded at most once, and served from the cache after
//! that.
//!
//! # Module Organization
//!
//! - [`source`] - where resources come from, and how paths become URLs
//! - [`cache`] - download-once storage with sidecar metadata
//! - [`fetch`] - HTTP and jar fetching, with retries on HTTP 429
//! - [`safe_name`] - URL to file name encoding
//! - [`props`] - `.properties` files
//! - [`service`] - [`Pinfetch`], which ties the above together
//! - [`host`] - reading settings from a host tool's properties
//! - [`config`] - `pinfetch.toml`
//!
//! # Example
//!
//! ```no_run
//! use pinfetch::{GitAnchorType, Pinfetch, SourceSetup};
//!
//! let pinfetch = Pinfetch::new()?;
//! pinfetch.init_cache_dir(pinfetch::config::default_cache_dir())?;
//! pinfetch.set_source(
//!     SourceSetup::new(".").github("acme/build-config", GitAnchorType::Tag, "v1.2.0")?,
//! )?;
//!
//! let header = pinfetch.file("spotless/license.java")?;
//! let guava = pinfetch.prop("versions", "guava")?;
//! println!("{} {}", header.display(), guava);
//! # Ok::<(), pinfetch::Error>(())
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod host;
pub mod props;
pub mod safe_name;
pub mod service;
pub mod source;

pub use error::{Error, ErrorKind, Result};
pub use fetch::{AuthDecorator, FetchOptions, Fetcher, RetryPolicy};
pub use service::Pinfetch;
pub use source::{GitAnchorType, Source, SourceSetup};
