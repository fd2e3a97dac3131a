//! Fetching resource bytes from HTTP(S) or from a local jar.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Prefix of the pseudo-URL addressing an entry inside a local archive.
pub const FILE_PROTOCOL: &str = "file:///";
/// Separates the archive path from the entry name in a jar pseudo-URL.
pub const JAR_ENTRY_SEPARATOR: &str = "!/";

/// How HTTP 429 responses are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt before the last 429 is returned as-is.
    pub max_retries: u32,
    /// Used when `Retry-After` is absent, unparsable, or not positive.
    pub min_backoff: Duration,
    /// Upper bound for a single wait.
    pub max_backoff: Duration,
    /// Upper bound for all waits of one request, `None` for unbounded.
    pub max_total_wait: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 100,
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(90),
            max_total_wait: Some(Duration::from_secs(10 * 60)),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait given the `Retry-After` header value, in seconds.
    ///
    /// HTTP-date values are not understood and fall back to `min_backoff`.
    pub fn backoff(&self, retry_after: Option<&str>) -> Duration {
        let millis = retry_after
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(|secs| secs.saturating_mul(1000))
            .unwrap_or(0);
        if millis <= 0 {
            return self.min_backoff;
        }
        Duration::from_millis(millis.unsigned_abs()).min(self.max_backoff)
    }
}

/// Options for the HTTP client.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Connect timeout (default: 10s)
    pub connect_timeout: Duration,
    /// Per-request timeout (default: 30s)
    pub timeout: Duration,
    /// User-Agent header
    pub user_agent: String,
    /// Rate-limit retry policy
    pub retry: RetryPolicy,
    /// Ignore proxy settings from the environment
    pub no_proxy: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            user_agent: format!("pinfetch@{}", env!("CARGO_PKG_VERSION")),
            retry: RetryPolicy::default(),
            no_proxy: false,
        }
    }
}

/// Adds an `Authorization` header to requests whose URL starts with a prefix.
#[derive(Clone)]
pub struct AuthDecorator {
    prefix: String,
    header_value: String,
}

impl AuthDecorator {
    /// Send `header_value` verbatim as the `Authorization` header.
    pub fn new(prefix: impl Into<String>, header_value: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            header_value: header_value.into(),
        }
    }

    /// `Authorization: Bearer <token>`
    pub fn bearer(prefix: impl Into<String>, token: &str) -> Self {
        Self::new(prefix, format!("Bearer {token}"))
    }

    /// `Authorization: Basic <base64(user:password)>`
    pub fn basic(prefix: impl Into<String>, user_and_password: &str) -> Self {
        Self::new(
            prefix,
            format!("Basic {}", STANDARD.encode(user_and_password.as_bytes())),
        )
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The header value to send for `url`, if it is under the prefix.
    pub fn header_for(&self, url: &str) -> Option<&str> {
        url.starts_with(&self.prefix)
            .then_some(self.header_value.as_str())
    }

    pub fn apply(&self, url: &str, builder: RequestBuilder) -> RequestBuilder {
        match self.header_for(url) {
            Some(value) => builder.header(AUTHORIZATION, value),
            None => builder,
        }
    }
}

impl fmt::Debug for AuthDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthDecorator")
            .field("prefix", &self.prefix)
            .field("header_value", &"<redacted>")
            .finish()
    }
}

type SleepFn = Arc<dyn Fn(Duration) + Send + Sync>;

/// Downloads URLs, retrying on HTTP 429.
///
/// `file:///archive.jar!/entry` pseudo-URLs are read from the local archive
/// without touching the network.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    retry: RetryPolicy,
    sleep: SleepFn,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    pub fn new(opts: &FetchOptions) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(opts.connect_timeout)
            .timeout(opts.timeout)
            .user_agent(opts.user_agent.clone());
        if opts.no_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            retry: opts.retry.clone(),
            sleep: Arc::new(std::thread::sleep),
        })
    }

    /// Replace how the fetcher waits between rate-limited attempts.
    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Arc::new(sleep);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Write the content at `url` into `out`, returning the number of bytes.
    pub fn fetch(
        &self,
        url: &str,
        auth: Option<&AuthDecorator>,
        out: &mut dyn Write,
    ) -> Result<u64> {
        if url.starts_with(FILE_PROTOCOL) {
            fetch_jar_entry(url, out)
        } else {
            self.fetch_remote(url, auth, out)
        }
    }

    /// GET `url` as text, failing on non-2xx responses.
    pub fn get_text(&self, url: &str, auth: Option<&AuthDecorator>) -> Result<String> {
        let response = successful(url, self.send(url, auth)?)?;
        Ok(response.text()?)
    }

    fn fetch_remote(
        &self,
        url: &str,
        auth: Option<&AuthDecorator>,
        out: &mut dyn Write,
    ) -> Result<u64> {
        let mut response = successful(url, self.send(url, auth)?)?;
        let written = response.copy_to(out)?;
        debug!("Downloaded {} bytes from {}", written, url);
        Ok(written)
    }

    /// Send a GET, waiting and retrying while the server answers 429.
    fn send(&self, url: &str, auth: Option<&AuthDecorator>) -> Result<Response> {
        let mut retries = 0;
        let mut waited = Duration::ZERO;
        loop {
            let mut request = self.client.get(url);
            if let Some(auth) = auth {
                request = auth.apply(url, request);
            }
            let response = request.send()?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS
                || retries >= self.retry.max_retries
            {
                return Ok(response);
            }

            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok());
            let delay = self.retry.backoff(retry_after);
            drop(response);

            if let Some(limit) = self.retry.max_total_wait
                && waited + delay > limit
            {
                return Err(Error::RateLimitDeadline {
                    url: url.to_string(),
                    limit_secs: limit.as_secs(),
                });
            }

            warn!(
                "Request to {} has been rate-limited, retrying in {} milliseconds",
                url,
                delay.as_millis()
            );
            (self.sleep)(delay);
            waited += delay;
            retries += 1;
        }
    }
}

fn successful(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .unwrap_or_else(|e| format!("<failed to read body: {e}>"));
    Err(Error::HttpStatus {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// Split `file:///path/to.jar!/entry` into the archive path and entry name.
pub fn split_jar_url(url: &str) -> Result<(PathBuf, &str)> {
    let invalid = || Error::InvalidJarUrl(url.to_string());
    let rest = url.strip_prefix(FILE_PROTOCOL).ok_or_else(invalid)?;
    let mut parts = rest.split(JAR_ENTRY_SEPARATOR);
    let (Some(archive), Some(entry), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    if archive.is_empty() || entry.is_empty() {
        return Err(invalid());
    }
    Ok((archive_path(archive), entry))
}

#[cfg(windows)]
fn archive_path(archive: &str) -> PathBuf {
    PathBuf::from(archive)
}

#[cfg(not(windows))]
fn archive_path(archive: &str) -> PathBuf {
    PathBuf::from(format!("/{}", archive.trim_start_matches('/')))
}

fn fetch_jar_entry(url: &str, out: &mut dyn Write) -> Result<u64> {
    let (archive_path, entry) = split_jar_url(url)?;
    let file = File::open(&archive_path)
        .map_err(|e| Error::io(format!("opening archive {}", archive_path.display()), e))?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut found = match archive.by_name(entry) {
        Ok(found) => found,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(Error::EntryNotFound {
                entry: entry.to_string(),
                archive: archive_path,
            });
        }
        Err(e) => return Err(e.into()),
    };
    let written = io::copy(&mut found, out)
        .map_err(|e| Error::io(format!("extracting {entry} from {}", archive_path.display()), e))?;
    debug!("Extracted {} bytes of {} from {}", written, entry, archive_path.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_backoff_uses_retry_after_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(Some("1")), Duration::from_secs(1));
        assert_eq!(policy.backoff(Some(" 7 ")), Duration::from_secs(7));
    }

    #[test]
    fn test_backoff_defaults_and_clamps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(None), Duration::from_millis(100));
        assert_eq!(policy.backoff(Some("0")), Duration::from_millis(100));
        assert_eq!(policy.backoff(Some("-3")), Duration::from_millis(100));
        assert_eq!(
            policy.backoff(Some("Wed, 21 Oct 2015 07:28:00 GMT")),
            Duration::from_millis(100)
        );
        assert_eq!(policy.backoff(Some("3600")), Duration::from_secs(90));
        assert_eq!(
            policy.backoff(Some("99999999999999999")),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_auth_decorator_prefix_match() {
        let auth = AuthDecorator::bearer("https://raw.githubusercontent.com/org/v1/", "tok");
        assert_eq!(
            auth.header_for("https://raw.githubusercontent.com/org/v1/a.txt"),
            Some("Bearer tok")
        );
        assert_eq!(
            auth.header_for("https://raw.githubusercontent.com/other/v1/a.txt"),
            None
        );
    }

    #[test]
    fn test_auth_decorator_basic() {
        let auth = AuthDecorator::basic("https://x/", "user:pw");
        assert_eq!(auth.header_for("https://x/a"), Some("Basic dXNlcjpwdw=="));
        assert!(!format!("{auth:?}").contains("dXNlcjpwdw"));
    }

    #[test]
    fn test_split_jar_url() {
        let (path, entry) = split_jar_url("file:////tmp/lib.jar!/config/a.xml").unwrap();
        assert_eq!(entry, "config/a.xml");
        assert!(path.ends_with("tmp/lib.jar"));
        #[cfg(not(windows))]
        assert_eq!(path, PathBuf::from("/tmp/lib.jar"));

        assert!(matches!(
            split_jar_url("file:///tmp/lib.jar"),
            Err(Error::InvalidJarUrl(_))
        ));
        assert!(matches!(
            split_jar_url("file:///a.jar!/b!/c"),
            Err(Error::InvalidJarUrl(_))
        ));
    }

    fn write_jar(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("test.jar");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("sample", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"a").unwrap();
        zip.start_file("nested/deeper.txt", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"deep").unwrap();
        zip.finish().unwrap();
        path
    }

    #[test]
    fn test_fetch_jar_entry() {
        let dir = TempDir::new().unwrap();
        let jar = write_jar(&dir);
        let fetcher = Fetcher::new(&FetchOptions::default()).unwrap();

        let mut out = Vec::new();
        let url = format!("{FILE_PROTOCOL}{}!/nested/deeper.txt", jar.display());
        assert_eq!(fetcher.fetch(&url, None, &mut out).unwrap(), 4);
        assert_eq!(out, b"deep");
    }

    #[test]
    fn test_fetch_jar_entry_missing() {
        let dir = TempDir::new().unwrap();
        let jar = write_jar(&dir);
        let fetcher = Fetcher::new(&FetchOptions::default()).unwrap();

        let url = format!("{FILE_PROTOCOL}{}!/deeper.txt", jar.display());
        let err = fetcher.fetch(&url, None, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, Error::EntryNotFound { ref entry, .. } if entry == "deeper.txt"));
        assert!(err.to_string().starts_with("Could not find 'deeper.txt'"));
    }
}
