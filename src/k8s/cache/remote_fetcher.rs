/**
 * Remote Cache Fetcher
 *
 * Serves a resource snapshot published by a remote mirror over HTTP. A local
 * copy younger than `minimum_cache` is used as is; an older one is revalidated
 * with a HEAD request against the `Last-Modified` value recorded when it was
 * downloaded, and only re-downloaded when the server has a newer version.
 */
use super::atomic_file::write_atomic;
use super::clock::{Clock, SystemClock};
use super::config::FetcherConfig;
use super::errors::{invalid_last_modified_error, missing_last_modified_error, unexpected_status_error};
use super::resource_store::load_snapshot;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc, Weekday};
use k8s_openapi::serde_json;
use reqwest::header::{HeaderMap, LAST_MODIFIED};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// HTTP-date layout of `Last-Modified` values, always GMT
pub const LAST_MODIFIED_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

// the weekday is checked for shape only, the date alone decides the instant
const LAST_MODIFIED_DATE_FORMAT: &str = "%d %b %Y %H:%M:%S GMT";

const LAST_MODIFIED_FILE: &str = "lastModified";

/// Where a resource's content is downloaded from
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Headers of the resource without its body
    async fn head(&self, resource: &str) -> Result<HeaderMap>;

    /// Headers and full body of the resource
    async fn get(&self, resource: &str) -> Result<(HeaderMap, Bytes)>;
}

/// [`RemoteSource`] serving `<endpoint>/<resource>` over HTTP
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSource {
    #[must_use]
    pub fn new(endpoint: &str) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.endpoint, resource)
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn head(&self, resource: &str) -> Result<HeaderMap> {
        let url = self.url(resource);
        let response = self.client.head(&url).send().await?;
        if !response.status().is_success() {
            return Err(unexpected_status_error(&url, response.status()));
        }
        Ok(response.headers().clone())
    }

    async fn get(&self, resource: &str) -> Result<(HeaderMap, Bytes)> {
        let url = self.url(resource);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(unexpected_status_error(&url, response.status()));
        }
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok((headers, body))
    }
}

/// How a fetched content was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOrigin {
    /// Local file younger than the minimum cache age, no network call
    FreshFile,
    /// Local file confirmed current by a HEAD request
    Revalidated,
    /// Downloaded from the remote source
    Downloaded,
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub content: Bytes,
    pub origin: CacheOrigin,
}

/// Parse a `Last-Modified` value in [`LAST_MODIFIED_FORMAT`]
///
/// A weekday that does not match the date is accepted.
///
/// # Errors
///
/// Returns an error if the value does not follow the format
pub fn parse_last_modified(value: &str) -> Result<DateTime<Utc>> {
    let (weekday, date) = value
        .split_once(", ")
        .ok_or_else(|| invalid_last_modified_error(value, "missing weekday"))?;
    weekday
        .parse::<Weekday>()
        .map_err(|e| invalid_last_modified_error(value, e))?;
    NaiveDateTime::parse_from_str(date, LAST_MODIFIED_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| invalid_last_modified_error(value, e))
}

#[must_use]
pub fn format_last_modified(time: DateTime<Utc>) -> String {
    time.format(LAST_MODIFIED_FORMAT).to_string()
}

fn last_modified_header(resource: &str, headers: &HeaderMap) -> Result<DateTime<Utc>> {
    let value = headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| missing_last_modified_error(resource))?;
    parse_last_modified(value)
}

pub struct RemoteCacheFetcher<S> {
    config: FetcherConfig,
    source: S,
    clock: Arc<dyn Clock>,
}

impl RemoteCacheFetcher<HttpSource> {
    #[must_use]
    pub fn http(config: FetcherConfig) -> Self {
        let source = HttpSource::new(&config.endpoint);
        Self::new(config, source)
    }
}

impl<S: RemoteSource> RemoteCacheFetcher<S> {
    #[must_use]
    pub fn new(config: FetcherConfig, source: S) -> Self {
        Self::with_clock(config, source, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(config: FetcherConfig, source: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            source,
            clock,
        }
    }

    #[must_use]
    pub fn cache_file(&self, resource: &str) -> PathBuf {
        self.config.context_dir().join(resource)
    }

    #[must_use]
    pub fn last_modified_path(&self) -> PathBuf {
        self.config.context_dir().join(LAST_MODIFIED_FILE)
    }

    /// Recorded `Last-Modified` values by resource; an absent file is an empty map
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn load_last_modified(&self) -> Result<BTreeMap<String, String>> {
        let path = self.last_modified_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn record_last_modified(&self, resource: &str, time: DateTime<Utc>) -> Result<()> {
        let mut times = self.load_last_modified()?;
        times.insert(resource.to_string(), format_last_modified(time));
        let bytes = serde_json::to_vec(&times)?;
        write_atomic(&self.config.context_dir(), LAST_MODIFIED_FILE, &bytes)?;
        info!("Updating last modified times for {}", resource);
        Ok(())
    }

    /// Age of the local copy, `None` when there is none
    fn cache_age(&self, resource: &str) -> Option<chrono::Duration> {
        let modified = std::fs::metadata(self.cache_file(resource))
            .and_then(|m| m.modified())
            .ok()?;
        Some(self.clock.now() - DateTime::<Utc>::from(modified))
    }

    fn read_cache(&self, resource: &str) -> Result<Bytes> {
        Ok(Bytes::from(std::fs::read(self.cache_file(resource))?))
    }

    async fn download(&self, resource: &str) -> Result<Fetched> {
        let (headers, content) = self.source.get(resource).await?;
        let last_modified = last_modified_header(resource, &headers)?;

        let dest_dir = self.config.context_dir();
        std::fs::create_dir_all(&dest_dir)?;
        debug!("Caching {} in {}", resource, dest_dir.display());
        write_atomic(&dest_dir, resource, &content)?;
        self.record_last_modified(resource, last_modified)?;

        Ok(Fetched {
            content,
            origin: CacheOrigin::Downloaded,
        })
    }

    /// Content of `resource`, from the local copy when it is fresh or still current
    ///
    /// # Errors
    ///
    /// Returns an error on network failures, on a missing or malformed
    /// `Last-Modified` header, or if the cache files cannot be read or written
    pub async fn fetch(&self, resource: &str) -> Result<Fetched> {
        let Some(age) = self.cache_age(resource) else {
            info!("No cache file for {}, pulling it from server", resource);
            return self.download(resource).await;
        };

        let minimum = chrono::Duration::from_std(self.config.minimum_cache)
            .unwrap_or(chrono::Duration::MAX);
        if age <= minimum {
            info!(
                "Cache file of {} was modified {}s ago, using it",
                resource,
                age.num_seconds()
            );
            return Ok(Fetched {
                content: self.read_cache(resource)?,
                origin: CacheOrigin::FreshFile,
            });
        }

        let times = self.load_last_modified()?;
        let Some(recorded) = times.get(resource) else {
            info!("No modified time for {}, pulling it from server", resource);
            return self.download(resource).await;
        };
        let recorded = parse_last_modified(recorded)?;

        let headers = self.source.head(resource).await?;
        let remote = last_modified_header(resource, &headers)?;
        if remote == recorded {
            debug!("{} unchanged on server since {}", resource, recorded);
            return Ok(Fetched {
                content: self.read_cache(resource)?,
                origin: CacheOrigin::Revalidated,
            });
        }

        info!(
            "{} was modified on server, pulling new version: old modified time {}, new modified time {}",
            resource, recorded, remote
        );
        self.download(resource).await
    }

    /// Fetch `resource` and decode it as a snapshot map
    ///
    /// # Errors
    ///
    /// Returns an error if fetching fails or the content is not a snapshot of `R`
    pub async fn fetch_records<R: DeserializeOwned>(&self, resource: &str) -> Result<BTreeMap<String, R>> {
        let fetched = self.fetch(resource).await?;
        Ok(serde_json::from_slice(&fetched.content)?)
    }

    /// Decode the local copy of `resource` without any network call
    ///
    /// # Errors
    ///
    /// Returns an error if there is no local copy or it cannot be decoded
    pub fn cached_records<R: DeserializeOwned>(&self, resource: &str) -> Result<BTreeMap<String, R>> {
        load_snapshot(&self.cache_file(resource))
    }
}
