//! Object storage abstraction.
//!
//! Sources, sinks, checkpoints and channels all address data through a
//! [`StorageProvider`] rooted at a URL. Supported backends are S3, GCS and
//! the local filesystem.

mod gcs;
mod local;
mod s3;

pub use gcs::GcsConfig;
pub use local::LocalConfig;
pub use s3::S3Config;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use regex::Regex;
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use crate::emit;
use crate::error::{InvalidUrlSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider rooted at a URL.
///
/// Every path accepted or returned by the provider is relative to the key
/// prefix of the URL it was created from.
#[derive(Clone)]
pub struct StorageProvider {
    config: BackendConfig,
    object_store: Arc<dyn ObjectStore>,
    canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

/// A file found by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    /// Path relative to the provider root.
    pub path: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

const S3_PATH: &str =
    r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_ENDPOINT_URL: &str = r"^[sS]3[aA]?::(?<protocol>https?)://(?P<endpoint>[^:/]+):(?<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";

const GCS_PATH: &str =
    r"^https://storage\.googleapis\.com/(?P<bucket>[a-z0-9\-_\.]+)(/(?P<key>.+))?$";
const GCS_URL: &str = r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.+))?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_PATH: &str = r"^(?P<path>/.*)$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    S3,
    Gcs,
    Local,
}

static MATCHERS: LazyLock<Vec<(Backend, Regex)>> = LazyLock::new(|| {
    [
        (Backend::S3, S3_PATH),
        (Backend::S3, S3_ENDPOINT_URL),
        (Backend::S3, S3_URL),
        (Backend::Gcs, GCS_PATH),
        (Backend::Gcs, GCS_URL),
        (Backend::Local, FILE_URI),
        (Backend::Local, FILE_PATH),
    ]
    .into_iter()
    .map(|(backend, pattern)| (backend, Regex::new(pattern).expect("storage URL pattern")))
    .collect()
});

/// Backend configuration parsed from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Gcs(GcsConfig),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let Some((backend, captures)) = MATCHERS
            .iter()
            .find_map(|(backend, regex)| regex.captures(url).map(|c| (*backend, c)))
        else {
            return InvalidUrlSnafu { url }.fail();
        };

        let group = |name: &str| captures.name(name).map(|m| m.as_str());

        Ok(match backend {
            Backend::S3 => {
                let endpoint = std::env::var("AWS_ENDPOINT").ok().or_else(|| {
                    group("endpoint").map(|host| {
                        format!(
                            "{}://{}:{}",
                            group("protocol").unwrap_or("https"),
                            host,
                            group("port").unwrap_or("443")
                        )
                    })
                });
                BackendConfig::S3(S3Config {
                    endpoint,
                    region: std::env::var("AWS_DEFAULT_REGION")
                        .ok()
                        .or_else(|| group("region").map(String::from)),
                    bucket: group("bucket").unwrap_or_default().to_string(),
                    key: group("key").map(Path::from),
                })
            }
            Backend::Gcs => BackendConfig::Gcs(GcsConfig {
                bucket: group("bucket").unwrap_or_default().to_string(),
                key: group("key").map(Path::from),
            }),
            Backend::Local => {
                let path = group("path").unwrap_or("/");
                let path = if path.starts_with('/') {
                    path.to_string()
                } else {
                    format!("/{path}")
                };
                BackendConfig::Local(LocalConfig { path })
            }
        })
    }

    fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Gcs(gcs) => gcs.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL with storage options.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::S3(config) => Self::construct_s3(config, options),
            BackendConfig::Gcs(config) => Self::construct_gcs(config, options),
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// Create a reference-counted provider.
    pub async fn shared(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<StorageProviderRef, StorageError> {
        Ok(Arc::new(Self::for_url_with_options(url, options).await?))
    }

    /// URL identifying the provider root.
    pub fn url(&self) -> &str {
        &self.canonical_url
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// List every file below `prefix` (relative to the root), recursively.
    ///
    /// Returned paths are relative to the root, not to `prefix`.
    pub async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<ListedFile>, StorageError> {
        let start = Instant::now();
        let key_parts = self.config.key().map_or(0, |key| key.parts().count());
        let full_prefix: Option<Path> = match (self.config.key(), prefix) {
            (Some(key), Some(prefix)) => Some(key.parts().chain(Path::from(prefix).parts()).collect()),
            (Some(key), None) => Some(key.clone()),
            (None, Some(prefix)) => Some(Path::from(prefix)),
            (None, None) => None,
        };

        let result: Result<Vec<_>, object_store::Error> = self
            .object_store
            .list(full_prefix.as_ref())
            .map_ok(|meta| ListedFile {
                path: meta
                    .location
                    .parts()
                    .skip(key_parts)
                    .collect::<Path>()
                    .to_string(),
                size: meta.size as u64,
                last_modified: meta.last_modified,
            })
            .try_collect()
            .await;

        record(StorageOperation::List, start, result.is_ok());
        result.context(ObjectStoreSnafu)
    }

    /// Get the contents of a file.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let result = match self.object_store.get(&self.qualify_path(path)).await {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };
        record(StorageOperation::Get, start, result.is_ok());
        result.context(ObjectStoreSnafu)
    }

    /// Get a file, or `None` when it does not exist.
    pub async fn get_if_exists(&self, path: &Path) -> Result<Option<Bytes>, StorageError> {
        match self.get(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Put a payload to a path.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self
            .object_store
            .put(&self.qualify_path(path), payload)
            .await;
        record(StorageOperation::Put, start, result.is_ok());
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Replace `path` with `content` so readers never observe a partial file.
    ///
    /// Writes `{path}.tmp` and renames it over the target.
    pub async fn atomic_write(&self, path: &Path, content: Vec<u8>) -> Result<(), StorageError> {
        let temp_path = Path::from(format!("{path}.tmp"));
        self.put_payload(&temp_path, PutPayload::from(Bytes::from(content)))
            .await?;
        self.rename(&temp_path, path).await
    }

    /// Server-side rename, overwriting the destination.
    pub async fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self
            .object_store
            .rename(&self.qualify_path(from), &self.qualify_path(to))
            .await;
        record(StorageOperation::Rename, start, result.is_ok());
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }
}

fn record(operation: StorageOperation, start: Instant, ok: bool) {
    let status = if ok {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest {
        operation,
        status,
        duration: start.elapsed(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn local(dir: &TempDir) -> StorageProvider {
        StorageProvider::for_url_with_options(dir.path().to_str().unwrap(), HashMap::new())
            .await
            .unwrap()
    }

    #[test]
    fn test_parse_urls() {
        match BackendConfig::parse_url("s3://alerts/online/raw").unwrap() {
            BackendConfig::S3(c) => {
                assert_eq!(c.bucket, "alerts");
                assert_eq!(c.key, Some(Path::from("online/raw")));
            }
            other => panic!("unexpected backend {other:?}"),
        }
        match BackendConfig::parse_url("gs://alerts").unwrap() {
            BackendConfig::Gcs(c) => {
                assert_eq!(c.bucket, "alerts");
                assert!(c.key.is_none());
            }
            other => panic!("unexpected backend {other:?}"),
        }
        match BackendConfig::parse_url("file:///data/science").unwrap() {
            BackendConfig::Local(c) => assert_eq!(c.path, "/data/science"),
            other => panic!("unexpected backend {other:?}"),
        }
        match BackendConfig::parse_url("s3::http://localhost:9000/alerts/raw").unwrap() {
            BackendConfig::S3(c) => {
                if std::env::var("AWS_ENDPOINT").is_err() {
                    assert_eq!(c.endpoint.as_deref(), Some("http://localhost:9000"));
                }
                assert_eq!(c.bucket, "alerts");
            }
            other => panic!("unexpected backend {other:?}"),
        }
        assert!(BackendConfig::parse_url("relative/path").is_err());
    }

    #[tokio::test]
    async fn test_list_files_is_recursive_and_relative() {
        let dir = TempDir::new().unwrap();
        let storage = local(&dir).await;

        storage
            .put_payload(&Path::from("20240115/a.parquet"), PutPayload::from_static(b"a"))
            .await
            .unwrap();
        storage
            .put_payload(
                &Path::from("20240115/year=2024/b.parquet"),
                PutPayload::from_static(b"bb"),
            )
            .await
            .unwrap();
        storage
            .put_payload(&Path::from("20240116/c.parquet"), PutPayload::from_static(b"c"))
            .await
            .unwrap();

        let mut files = storage.list_files(Some("20240115")).await.unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["20240115/a.parquet", "20240115/year=2024/b.parquet"]);
        assert_eq!(files[1].size, 2);

        assert_eq!(storage.list_files(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_missing_prefix_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = local(&dir).await;
        let files = storage.list_files(Some("20990101")).await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let storage = local(&dir).await;
        let path = Path::from("ckpt/checkpoint.json");

        storage.atomic_write(&path, b"first".to_vec()).await.unwrap();
        storage.atomic_write(&path, b"second".to_vec()).await.unwrap();

        assert_eq!(storage.get(&path).await.unwrap().as_ref(), b"second");
        assert!(!dir.path().join("ckpt/checkpoint.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_get_if_exists() {
        let dir = TempDir::new().unwrap();
        let storage = local(&dir).await;
        assert!(
            storage
                .get_if_exists(&Path::from("missing.json"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
