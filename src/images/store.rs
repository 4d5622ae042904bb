//! Image Store collaborators
//!
//! The pipeline never decides where images live; it asks an `ImageStore`
//! for the bytes behind an `ImageRef`. `DefaultImageStore` dispatches on
//! the URL scheme: `file://` and bare paths go to disk, `http(s)://` to
//! reqwest.

use crate::domain::ImageRef;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("Failed to read image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch image {url}: {message}")]
    Http { url: String, message: String },

    #[error("Unsupported image URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Failed to decode image {id}: {message}")]
    Decode { id: String, message: String },
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn fetch(&self, image: &ImageRef) -> Result<Bytes, ImageStoreError>;
}

/// Reads `file://` URLs and plain paths, optionally relative to a root.
#[derive(Debug, Clone, Default)]
pub struct FsImageStore {
    root: Option<PathBuf>,
}

impl FsImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, url: &str) -> PathBuf {
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn fetch(&self, image: &ImageRef) -> Result<Bytes, ImageStoreError> {
        let path = self.resolve(&image.url);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ImageStoreError::NotFound(path.display().to_string()))
            }
            Err(source) => Err(ImageStoreError::Io { path, source }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpImageStore {
    client: reqwest::Client,
}

impl HttpImageStore {
    pub fn new(timeout: Duration) -> Result<Self, ImageStoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ImageStoreError::Http {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageStore for HttpImageStore {
    async fn fetch(&self, image: &ImageRef) -> Result<Bytes, ImageStoreError> {
        debug!(id = %image.id, url = %image.url, "Fetching image over HTTP");
        let http_err = |e: reqwest::Error| ImageStoreError::Http {
            url: image.url.clone(),
            message: e.to_string(),
        };

        let response = self.client.get(&image.url).send().await.map_err(http_err)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ImageStoreError::NotFound(image.url.clone()));
        }
        let response = response.error_for_status().map_err(http_err)?;
        response.bytes().await.map_err(http_err)
    }
}

/// Scheme-dispatching store used by the CLI.
#[derive(Debug, Clone)]
pub struct DefaultImageStore {
    fs: FsImageStore,
    http: HttpImageStore,
}

impl DefaultImageStore {
    pub fn new(fs: FsImageStore, http: HttpImageStore) -> Self {
        Self { fs, http }
    }
}

#[async_trait]
impl ImageStore for DefaultImageStore {
    async fn fetch(&self, image: &ImageRef) -> Result<Bytes, ImageStoreError> {
        let url = image.url.as_str();
        if url.starts_with("http://") || url.starts_with("https://") {
            self.http.fetch(image).await
        } else if url.starts_with("file://") || !url.contains("://") {
            self.fs.fetch(image).await
        } else {
            Err(ImageStoreError::UnsupportedScheme(url.to_string()))
        }
    }
}

/// In-memory store keyed by image id or URL.
#[derive(Debug, Default)]
pub struct MemoryImageStore {
    images: RwLock<HashMap<String, Bytes>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.images
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.into(), data.into());
    }

    pub fn len(&self) -> usize {
        self.images.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn fetch(&self, image: &ImageRef) -> Result<Bytes, ImageStoreError> {
        let images = self.images.read().unwrap_or_else(|p| p.into_inner());
        images
            .get(&image.id)
            .or_else(|| images.get(&image.url))
            .cloned()
            .ok_or_else(|| ImageStoreError::NotFound(image.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_reads_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"jpegbytes").unwrap();

        let store = FsImageStore::new();
        let image = ImageRef::new("a", format!("file://{}", path.display()), "h");
        let data = store.fetch(&image).await.unwrap();
        assert_eq!(&data[..], b"jpegbytes");
    }

    #[tokio::test]
    async fn test_fs_store_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"png").unwrap();

        let store = FsImageStore::with_root(dir.path());
        let data = store.fetch(&ImageRef::new("b", "b.png", "h")).await.unwrap();
        assert_eq!(&data[..], b"png");

        let missing = store.fetch(&ImageRef::new("c", "c.png", "h")).await;
        assert!(matches!(missing, Err(ImageStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_memory_store_by_id_or_url() {
        let store = MemoryImageStore::new();
        store.insert("img1", Bytes::from_static(b"one"));
        store.insert("mem://two", Bytes::from_static(b"two"));

        let one = store.fetch(&ImageRef::new("img1", "mem://x", "h")).await.unwrap();
        let two = store.fetch(&ImageRef::new("other", "mem://two", "h")).await.unwrap();
        assert_eq!(&one[..], b"one");
        assert_eq!(&two[..], b"two");
        assert!(store
            .fetch(&ImageRef::new("nope", "mem://nope", "h"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_default_store_rejects_unknown_scheme() {
        let store = DefaultImageStore::new(
            FsImageStore::new(),
            HttpImageStore::new(Duration::from_secs(1)).unwrap(),
        );
        let result = store.fetch(&ImageRef::new("a", "s3://bucket/a.jpg", "h")).await;
        assert!(matches!(result, Err(ImageStoreError::UnsupportedScheme(_))));
    }
}
