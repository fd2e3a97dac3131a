//! Where resources come from.
//!
//! A [`Source`] turns a resource path such as `checkstyle/rules.xml` into
//! either an immutable URL for the cache, or, in dev mode, a file on disk.
//! Sources are configured through [`SourceSetup`], which validates every
//! identifier before anything is fetched.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fetch::{AuthDecorator, FILE_PROTOCOL, Fetcher, JAR_ENTRY_SEPARATOR};

const GITHUB_HOST: &str = "raw.githubusercontent.com";
const GITLAB_HOST: &str = "gitlab.com";
const BITBUCKET_HOST: &str = "api.bitbucket.org/2.0/repositories";

const HTTP_PROTOCOL: &str = "http://";
const HTTPS_PROTOCOL: &str = "https://";

/// Subfolder of the repository that resource paths are relative to, unless changed.
pub const DEFAULT_REPO_SUBFOLDER: &str = "src/main/resources";

/// What kind of git reference an anchor is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitAnchorType {
    Tag,
    Commit,
    Tree,
}

impl FromStr for GitAnchorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tag" => Ok(Self::Tag),
            "commit" => Ok(Self::Commit),
            "tree" => Ok(Self::Tree),
            _ => Err(Error::UnknownAnchorType(s.to_string())),
        }
    }
}

impl fmt::Display for GitAnchorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tag => "tag",
            Self::Commit => "commit",
            Self::Tree => "tree",
        })
    }
}

/// Result of resolving a resource path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Fetch through the cache.
    Url(String),
    /// Read directly, bypassing the cache.
    Direct(PathBuf),
}

/// The active resource source.
#[derive(Debug)]
pub enum Source {
    /// A git hosting service.
    Remote(Remote),
    /// A working copy on disk, read without caching.
    LocalDirectory(PathBuf),
    /// Entries of a local jar, extracted through the cache.
    LocalJar(LocalJar),
    /// A caller-supplied mapping from resource path to URL.
    Custom(CustomSource),
}

/// Git hosting services.
#[derive(Debug)]
pub enum Remote {
    GitHub(GitHub),
    GitLab(GitLab),
    Bitbucket(Bitbucket),
}

impl Source {
    /// Resolve a resource path.
    ///
    /// Only Bitbucket Cloud tag anchors use `fetcher`, to look up the commit hash once.
    pub fn resolve(&self, resource: &str, fetcher: &Fetcher) -> Result<Resolved> {
        let resolved = match self {
            Self::Remote(Remote::GitHub(github)) => Resolved::Url(github.resource_url(resource)),
            Self::Remote(Remote::GitLab(gitlab)) => Resolved::Url(gitlab.resource_url(resource)),
            Self::Remote(Remote::Bitbucket(bitbucket)) => {
                Resolved::Url(bitbucket.resource_url(resource, fetcher)?)
            }
            Self::LocalDirectory(root) => Resolved::Direct(root.join(resource)),
            Self::LocalJar(jar) => Resolved::Url(jar.resource_url(resource)),
            Self::Custom(custom) => Resolved::Url((custom.to_url)(resource)),
        };
        debug!("Resolved {} to {:?}", resource, resolved);
        Ok(resolved)
    }

    /// Credentials to attach to requests, matched by URL prefix.
    pub fn auth(&self) -> Option<AuthDecorator> {
        match self {
            Self::Remote(Remote::GitHub(github)) => github.auth(),
            Self::Remote(Remote::GitLab(gitlab)) => gitlab.auth(),
            Self::Remote(Remote::Bitbucket(bitbucket)) => bitbucket.auth(),
            Self::LocalDirectory(_) | Self::LocalJar(_) => None,
            Self::Custom(custom) => custom.auth.clone(),
        }
    }

    /// Whether resources are read straight from a working copy.
    pub fn is_dev(&self) -> bool {
        matches!(self, Self::LocalDirectory(_))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(Remote::GitHub(g)) => write!(f, "github {}@{}", g.repo_org, g.anchor),
            Self::Remote(Remote::GitLab(g)) => {
                write!(f, "gitlab {}{}/{}@{}", g.protocol, g.host, g.repo_org, g.anchor)
            }
            Self::Remote(Remote::Bitbucket(b)) => write!(
                f,
                "bitbucket {} {}/{} {} {}",
                b.flavor, b.repo_org, b.repo_name, b.anchor_type, b.anchor
            ),
            Self::LocalDirectory(root) => write!(f, "dev-local {}", root.display()),
            Self::LocalJar(jar) => write!(f, "local-jar {}", jar.root_url),
            Self::Custom(_) => f.write_str("custom"),
        }
    }
}

impl From<GitHub> for Source {
    fn from(value: GitHub) -> Self {
        Self::Remote(Remote::GitHub(value))
    }
}

impl From<GitLab> for Source {
    fn from(value: GitLab) -> Self {
        Self::Remote(Remote::GitLab(value))
    }
}

impl From<Bitbucket> for Source {
    fn from(value: Bitbucket) -> Self {
        Self::Remote(Remote::Bitbucket(value))
    }
}

impl From<CustomSource> for Source {
    fn from(value: CustomSource) -> Self {
        Self::Custom(value)
    }
}

/// Validates and builds sources.
///
/// ```
/// use pinfetch::source::{GitAnchorType, Source, SourceSetup};
///
/// let setup = SourceSetup::new(".");
/// let source: Source = setup
///     .github("acme/build-config", GitAnchorType::Tag, "v1.2.0")?
///     .into();
/// assert_eq!(source.to_string(), "github acme/build-config@v1.2.0");
/// # Ok::<(), pinfetch::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct SourceSetup {
    reference_dir: PathBuf,
    repo_subfolder: String,
}

impl SourceSetup {
    /// `reference_dir` anchors relative [`SourceSetup::dev_local`] paths.
    pub fn new(reference_dir: impl Into<PathBuf>) -> Self {
        Self {
            reference_dir: reference_dir.into(),
            repo_subfolder: DEFAULT_REPO_SUBFOLDER.to_string(),
        }
    }

    /// Change the repository subfolder; empty means the repository root.
    pub fn repo_subfolder(mut self, subfolder: &str) -> Result<Self> {
        self.repo_subfolder = no_surrounding_slash("repoSubfolder", subfolder)?.to_string();
        Ok(self)
    }

    pub fn github(
        &self,
        repo_org: &str,
        anchor_type: GitAnchorType,
        anchor: &str,
    ) -> Result<GitHub> {
        Ok(GitHub {
            repo_org: no_surrounding_slash("repoOrg", repo_org)?.to_string(),
            anchor_type,
            anchor: no_surrounding_slash("anchor", anchor)?.to_string(),
            subfolder: self.repo_subfolder.clone(),
            auth_token: None,
        })
    }

    pub fn gitlab(
        &self,
        repo_org: &str,
        anchor_type: GitAnchorType,
        anchor: &str,
    ) -> Result<GitLab> {
        Ok(GitLab {
            repo_org: no_surrounding_slash("repoOrg", repo_org)?.to_string(),
            anchor_type,
            anchor: no_surrounding_slash("anchor", anchor)?.to_string(),
            subfolder: self.repo_subfolder.clone(),
            protocol: HTTPS_PROTOCOL,
            host: GITLAB_HOST.to_string(),
            auth_token: None,
        })
    }

    /// Bitbucket Cloud by default; see [`Bitbucket::server`].
    pub fn bitbucket(
        &self,
        repo_org: &str,
        anchor_type: GitAnchorType,
        anchor: &str,
    ) -> Result<Bitbucket> {
        let repo_org = no_surrounding_slash("repoOrg", repo_org)?;
        let Some((org, name)) = repo_org.split_once('/').filter(|(_, name)| !name.contains('/'))
        else {
            return Err(Error::InvalidRepoOrg(repo_org.to_string()));
        };
        Ok(Bitbucket {
            repo_org: org.to_string(),
            repo_name: name.to_string(),
            anchor_type,
            anchor: no_surrounding_slash("anchor", anchor)?.to_string(),
            subfolder: self.repo_subfolder.clone(),
            flavor: BitbucketFlavor::Cloud,
            protocol: HTTPS_PROTOCOL,
            host: BITBUCKET_HOST.to_string(),
            auth_header: None,
            resolved_hash: Mutex::new(None),
        })
    }

    /// Read resources from the entries of a local jar.
    pub fn local_jar(&self, jar: impl AsRef<Path>) -> Result<Source> {
        if self.repo_subfolder != DEFAULT_REPO_SUBFOLDER {
            return Err(Error::SubfolderWithJar(self.repo_subfolder.clone()));
        }
        let jar = jar.as_ref();
        let absolute = std::path::absolute(jar)
            .map_err(|e| Error::io(format!("resolving jar path {}", jar.display()), e))?;
        Ok(Source::LocalJar(LocalJar {
            root_url: format!("{FILE_PROTOCOL}{}{JAR_ENTRY_SEPARATOR}", absolute.display()),
        }))
    }

    /// Read resources straight from a working copy of the resource repository.
    pub fn dev_local(&self, path: impl AsRef<Path>) -> Result<Source> {
        let path = self.reference_dir.join(path.as_ref());
        let project_root = path
            .canonicalize()
            .map_err(|e| Error::io(format!("resolving dev-local path {}", path.display()), e))?;
        let resource_root = if self.repo_subfolder.is_empty() {
            project_root
        } else {
            project_root.join(&self.repo_subfolder)
        };
        Ok(Source::LocalDirectory(resource_root))
    }

    /// Map resource paths to URLs with an arbitrary function.
    pub fn custom(
        &self,
        to_url: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> CustomSource {
        CustomSource {
            to_url: Arc::new(to_url),
            auth: None,
        }
    }
}

fn no_surrounding_slash<'a>(what: &'static str, value: &'a str) -> Result<&'a str> {
    let position = if value.starts_with('/') {
        "leading"
    } else if value.ends_with('/') {
        "trailing"
    } else {
        return Ok(value);
    };
    Err(Error::SurroundingSlash {
        what,
        position,
        value: value.to_string(),
    })
}

fn full_resource_path(subfolder: &str, resource: &str) -> String {
    if subfolder.is_empty() {
        resource.to_string()
    } else {
        format!("{subfolder}/{resource}")
    }
}

/// Form-encode a single URL component, `/` included.
fn encode_part(part: &str) -> String {
    url::form_urlencoded::byte_serialize(part.as_bytes()).collect()
}

/// Form-encode each `/`-separated segment, keeping the slashes.
fn encode_parts(path: &str) -> String {
    path.split('/').map(encode_part).collect::<Vec<_>>().join("/")
}

/// `raw.githubusercontent.com`
#[derive(Debug, Clone)]
pub struct GitHub {
    repo_org: String,
    anchor_type: GitAnchorType,
    anchor: String,
    subfolder: String,
    auth_token: Option<String>,
}

impl GitHub {
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn anchor_type(&self) -> GitAnchorType {
        self.anchor_type
    }

    fn root(&self) -> String {
        format!(
            "{HTTPS_PROTOCOL}{GITHUB_HOST}/{}/{}/",
            self.repo_org, self.anchor
        )
    }

    fn resource_url(&self, resource: &str) -> String {
        format!(
            "{}{}",
            self.root(),
            full_resource_path(&self.subfolder, resource)
        )
    }

    fn auth(&self) -> Option<AuthDecorator> {
        let token = self.auth_token.as_deref()?;
        Some(AuthDecorator::bearer(self.root(), token))
    }
}

/// GitLab's repository files API, on gitlab.com or a custom domain.
#[derive(Debug, Clone)]
pub struct GitLab {
    repo_org: String,
    anchor_type: GitAnchorType,
    anchor: String,
    subfolder: String,
    protocol: &'static str,
    host: String,
    auth_token: Option<String>,
}

impl GitLab {
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn custom_domain_http(mut self, domain: impl Into<String>) -> Self {
        self.protocol = HTTP_PROTOCOL;
        self.host = domain.into();
        self
    }

    pub fn custom_domain_https(mut self, domain: impl Into<String>) -> Self {
        self.protocol = HTTPS_PROTOCOL;
        self.host = domain.into();
        self
    }

    pub fn anchor_type(&self) -> GitAnchorType {
        self.anchor_type
    }

    fn url_start(&self) -> String {
        format!(
            "{}{}/api/v4/projects/{}/repository/files/",
            self.protocol,
            self.host,
            encode_part(&self.repo_org)
        )
    }

    fn resource_url(&self, resource: &str) -> String {
        format!(
            "{}{}/raw?ref={}",
            self.url_start(),
            encode_part(&full_resource_path(&self.subfolder, resource)),
            encode_part(&self.anchor)
        )
    }

    fn auth(&self) -> Option<AuthDecorator> {
        let token = self.auth_token.as_deref()?;
        Some(AuthDecorator::bearer(self.url_start(), token))
    }
}

/// Bitbucket Cloud and Bitbucket Server lay out their URLs differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitbucketFlavor {
    /// `{host}/{org}/{repo}/src/{hash}/{path}`
    Cloud,
    /// `{host}/projects/{org}/repos/{repo}/raw/{path}?at={ref}`
    Server,
}

impl fmt::Display for BitbucketFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cloud => "cloud",
            Self::Server => "server",
        })
    }
}

#[derive(Debug, Deserialize)]
struct RefsTarget {
    target: Target,
}

#[derive(Debug, Deserialize)]
struct Target {
    hash: String,
}

/// Bitbucket Cloud or Server.
#[derive(Debug)]
pub struct Bitbucket {
    repo_org: String,
    repo_name: String,
    anchor_type: GitAnchorType,
    anchor: String,
    subfolder: String,
    flavor: BitbucketFlavor,
    protocol: &'static str,
    host: String,
    auth_header: Option<String>,
    /// Commit hash a tag anchor resolved to, looked up once.
    resolved_hash: Mutex<Option<String>>,
}

impl Bitbucket {
    /// Use the Bitbucket Server layout (5.5+).
    pub fn server(mut self) -> Self {
        self.flavor = BitbucketFlavor::Server;
        self
    }

    /// Bitbucket Server with a personal access token.
    pub fn server_auth(mut self, personal_access_token: &str) -> Self {
        self.auth_header = Some(format!("Bearer {personal_access_token}"));
        self.flavor = BitbucketFlavor::Server;
        self
    }

    /// Bitbucket Cloud with `username:appPassword`.
    pub fn cloud_auth(mut self, username_and_app_password: &str) -> Self {
        let encoded = STANDARD.encode(username_and_app_password.as_bytes());
        self.auth_header = Some(format!("Basic {encoded}"));
        self.flavor = BitbucketFlavor::Cloud;
        self
    }

    pub fn custom_domain_http(mut self, domain: impl Into<String>) -> Self {
        self.protocol = HTTP_PROTOCOL;
        self.host = domain.into();
        self
    }

    pub fn custom_domain_https(mut self, domain: impl Into<String>) -> Self {
        self.protocol = HTTPS_PROTOCOL;
        self.host = domain.into();
        self
    }

    pub fn flavor(&self) -> BitbucketFlavor {
        self.flavor
    }

    fn url_start(&self) -> String {
        match self.flavor {
            BitbucketFlavor::Server => format!(
                "{}{}/projects/{}/repos/{}",
                self.protocol, self.host, self.repo_org, self.repo_name
            ),
            BitbucketFlavor::Cloud => format!(
                "{}{}/{}/{}",
                self.protocol, self.host, self.repo_org, self.repo_name
            ),
        }
    }

    fn resource_url(&self, resource: &str, fetcher: &Fetcher) -> Result<String> {
        if self.anchor_type == GitAnchorType::Tree {
            return Err(Error::Unsupported(
                "TREE not supported for Bitbucket".to_string(),
            ));
        }
        let url_start = self.url_start();
        let path = encode_parts(&full_resource_path(&self.subfolder, resource));
        match self.flavor {
            BitbucketFlavor::Server => {
                let at = match self.anchor_type {
                    GitAnchorType::Tag => format!("refs/tags/{}", self.anchor),
                    _ => self.anchor.clone(),
                };
                Ok(format!("{url_start}/raw/{path}?at={}", encode_part(&at)))
            }
            BitbucketFlavor::Cloud => {
                let hash = self.commit_hash(&url_start, fetcher)?;
                Ok(format!("{url_start}/src/{}/{path}", encode_parts(&hash)))
            }
        }
    }

    fn commit_hash(&self, url_start: &str, fetcher: &Fetcher) -> Result<String> {
        if self.anchor_type == GitAnchorType::Commit {
            return Ok(self.anchor.clone());
        }
        let mut resolved = self
            .resolved_hash
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(hash) = resolved.as_ref() {
            return Ok(hash.clone());
        }
        let refs_url = format!("{url_start}/refs/tags/{}", encode_parts(&self.anchor));
        let auth = self.auth();
        let body = fetcher.get_text(&refs_url, auth.as_ref())?;
        let refs: RefsTarget = serde_json::from_str(&body)?;
        debug!("Tag {} resolved to commit {}", self.anchor, refs.target.hash);
        *resolved = Some(refs.target.hash.clone());
        Ok(refs.target.hash)
    }

    fn auth(&self) -> Option<AuthDecorator> {
        let header = self.auth_header.as_deref()?;
        Some(AuthDecorator::new(format!("{}/", self.url_start()), header))
    }
}

/// Entries of a jar on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalJar {
    root_url: String,
}

impl LocalJar {
    fn resource_url(&self, resource: &str) -> String {
        format!("{}{resource}", self.root_url)
    }
}

/// Arbitrary resource path to URL mapping.
#[derive(Clone)]
pub struct CustomSource {
    to_url: Arc<dyn Fn(&str) -> String + Send + Sync>,
    auth: Option<AuthDecorator>,
}

impl CustomSource {
    pub fn with_auth(mut self, auth: AuthDecorator) -> Self {
        self.auth = Some(auth);
        self
    }
}

impl fmt::Debug for CustomSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomSource")
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}
