//! Addressable storage locations backed by object_store.
//!
//! A [`Location`] is a URI plus the object store that serves it. Locations
//! are created through a [`LocationFactory`], which resolves the scheme and
//! authority of a URI to a store. Stores can be registered up front (tests
//! register `memory://`); anything else is built with
//! [`object_store::parse_url_opts`].

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::buffered::BufWriter;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use crate::error::{LaunchError, LaunchResult};

/// A byte stream read from a location or remote URL.
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Size and modification time of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStatus {
    /// Last modification time in epoch milliseconds.
    pub last_modified: i64,
    /// Size in bytes.
    pub size: u64,
}

/// Resolves URIs to [`Location`]s.
#[derive(Clone)]
pub struct LocationFactory {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
    options: Vec<(String, String)>,
    http: reqwest::Client,
}

impl fmt::Debug for LocationFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationFactory")
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Default for LocationFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationFactory {
    /// Create a factory with no registered stores.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stores: HashMap::new(),
            options: Vec::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Create a factory that passes cloud credentials from the environment
    /// (`AWS_*`, `GOOGLE_*`, `AZURE_*`) to the stores it builds.
    #[must_use]
    pub fn from_env() -> Self {
        let options = std::env::vars()
            .filter(|(key, _)| {
                ["AWS_", "GOOGLE_", "AZURE_"]
                    .iter()
                    .any(|prefix| key.starts_with(prefix))
            })
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();

        Self {
            options,
            ..Self::new()
        }
    }

    /// Serve every URI with the given scheme and authority from `store`.
    ///
    /// Pass an empty authority for URIs such as `memory:///path`.
    #[must_use]
    pub fn with_store(
        mut self,
        scheme: &str,
        authority: &str,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        self.stores.insert(store_key(scheme, authority), store);
        self
    }

    /// Use a specific HTTP client for `http` and `https` sources.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Resolve a URI to a location.
    pub fn create(&self, uri: &str) -> LaunchResult<Location> {
        let url = Url::parse(uri).map_err(|e| LaunchError::invalid_location(uri, e.to_string()))?;
        self.create_url(url)
    }

    fn create_url(&self, url: Url) -> LaunchResult<Location> {
        let key = store_key(url.scheme(), url.host_str().unwrap_or_default());

        let (store, path) = match self.stores.get(&key) {
            Some(store) => {
                let path = ObjectPath::from_url_path(url.path())
                    .map_err(|e| LaunchError::invalid_location(&url, e.to_string()))?;
                (Arc::clone(store), path)
            }
            None => {
                let (store, path) = object_store::parse_url_opts(&url, self.options.iter().cloned())
                    .map_err(|e| LaunchError::invalid_location(&url, e.to_string()))?;
                (Arc::from(store), path)
            }
        };

        Ok(Location { url, store, path })
    }

    /// Open a byte stream for any supported URI.
    ///
    /// `http` and `https` are fetched with the HTTP client; all other schemes
    /// go through the resolved object store.
    pub async fn open(&self, uri: &str) -> LaunchResult<ByteReader> {
        let url = Url::parse(uri).map_err(|e| LaunchError::invalid_location(uri, e.to_string()))?;

        if matches!(url.scheme(), "http" | "https") {
            debug!(%url, "fetching over HTTP");
            let response = self.http.get(url).send().await?.error_for_status()?;
            let stream = response.bytes_stream().map_err(std::io::Error::other);
            return Ok(Box::pin(StreamReader::new(stream)));
        }

        self.create_url(url)?.open().await
    }
}

fn store_key(scheme: &str, authority: &str) -> String {
    format!("{scheme}://{authority}")
}

/// A file or directory in some object store.
#[derive(Clone)]
pub struct Location {
    url: Url,
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Location").field("url", &self.url.as_str()).finish()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl Location {
    /// The full URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        self.url.as_str()
    }

    /// The URI scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Location of a child entry.
    #[must_use]
    pub fn append(&self, name: &str) -> Self {
        let mut url = self.url.clone();
        let joined = format!("{}/{name}", url.path().trim_end_matches('/'));
        url.set_path(&joined);

        Self {
            url,
            store: Arc::clone(&self.store),
            path: self.path.child(name),
        }
    }

    /// A fresh, uniquely named child `<stem>.<unique>.<suffix>`.
    ///
    /// An empty suffix is left off.
    #[must_use]
    pub fn temp_file(&self, stem: &str, suffix: &str) -> Self {
        let unique = ulid::Ulid::new().to_string().to_lowercase();
        let name = if suffix.is_empty() {
            format!("{stem}.{unique}")
        } else {
            format!("{stem}.{unique}.{suffix}")
        };
        self.append(&name)
    }

    /// Fetch size and modification time.
    pub async fn status(&self) -> LaunchResult<FileStatus> {
        let meta = self
            .store
            .head(&self.path)
            .await
            .map_err(|e| LaunchError::storage(&self.url, e))?;

        Ok(FileStatus {
            last_modified: meta.last_modified.timestamp_millis(),
            size: meta.size as u64,
        })
    }

    /// Write the whole object at once.
    pub async fn put(&self, data: Bytes) -> LaunchResult<()> {
        self.store
            .put(&self.path, data.into())
            .await
            .map_err(|e| LaunchError::storage(&self.url, e))?;
        Ok(())
    }

    /// Read the whole object into memory.
    pub async fn read(&self) -> LaunchResult<Bytes> {
        let result = self
            .store
            .get(&self.path)
            .await
            .map_err(|e| LaunchError::storage(&self.url, e))?;
        result
            .bytes()
            .await
            .map_err(|e| LaunchError::storage(&self.url, e))
    }

    /// Open the object as a byte stream.
    pub async fn open(&self) -> LaunchResult<ByteReader> {
        let result = self
            .store
            .get(&self.path)
            .await
            .map_err(|e| LaunchError::storage(&self.url, e))?;
        let stream = result.into_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }

    /// Stream `reader` into this location, returning the bytes written.
    pub async fn copy_from<R>(&self, reader: &mut R) -> LaunchResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut writer = BufWriter::new(Arc::clone(&self.store), self.path.clone());
        let written = tokio::io::copy(reader, &mut writer).await?;
        writer.shutdown().await?;
        Ok(written)
    }

    /// Delete this location and everything beneath it.
    ///
    /// A location that does not exist is not an error.
    pub async fn delete_recursive(&self) -> LaunchResult<()> {
        let children: Vec<ObjectPath> = self
            .store
            .list(Some(&self.path))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
            .map_err(|e| LaunchError::storage(&self.url, e))?;

        for child in &children {
            debug!(path = %child, "deleting");
            match self.store.delete(child).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(LaunchError::storage(&self.url, e)),
            }
        }

        match self.store.delete(&self.path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(LaunchError::storage(&self.url, e)),
        }
    }

    /// Whether any object exists at or beneath this location.
    pub async fn exists(&self) -> LaunchResult<bool> {
        match self.store.head(&self.path).await {
            Ok(_) => return Ok(true),
            Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(LaunchError::storage(&self.url, e)),
        }

        let mut listing = self.store.list(Some(&self.path));
        match listing.next().await {
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(LaunchError::storage(&self.url, e)),
            None => Ok(false),
        }
    }
}

/// Split a file name into stem and suffix at the last dot.
///
/// Names without a dot, or whose only dot is leading, have no suffix.
#[must_use]
pub fn split_suffix(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx + 1..]),
        _ => (name, ""),
    }
}
