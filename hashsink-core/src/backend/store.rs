use super::{Backend, BackendWriter, ByteStream, ListEntry, ObjectAttributes};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, ObjectMeta, ObjectStore, PutMultipartOpts, PutOptions, PutPayload,
    WriteMultipart,
};
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;

/// Upper bound of in-flight parts for a multipart upload.
const MAX_CONCURRENT_PARTS: usize = 8;

/// Objects below this size are sent with a single PUT by non-resumable writes.
const SINGLE_PUT_CAPACITY: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
enum Container {
    /// Directory under the local root, created on bootstrap.
    Directory(PathBuf),
    /// In-memory store; the first bootstrap creates it.
    Memory,
    /// Pre-provisioned remote bucket; bootstrap only checks it is reachable.
    Bucket,
}

/// [`Backend`] over any `object_store` implementation.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    name: String,
    prefix: Option<String>,
    container: Container,
    record_attributes: bool,
    created: AtomicBool,
}

impl ObjectStoreBackend {
    /// Local filesystem store; the bucket is a directory below `root`.
    pub fn local(root: impl Into<PathBuf>, bucket: &str) -> BackendResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let store = LocalFileSystem::new_with_prefix(&root)?;

        Ok(Self {
            store: Arc::new(store),
            name: bucket.to_string(),
            prefix: Some(bucket.to_string()),
            container: Container::Directory(root.join(bucket)),
            record_attributes: false,
            created: AtomicBool::new(false),
        })
    }

    pub fn memory(bucket: &str) -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            name: bucket.to_string(),
            prefix: None,
            container: Container::Memory,
            record_attributes: true,
            created: AtomicBool::new(false),
        }
    }

    pub fn gcs(bucket: &str, key_filename: &str) -> BackendResult<Self> {
        let store = GoogleCloudStorageBuilder::new()
            .with_bucket_name(bucket)
            .with_service_account_path(key_filename)
            .build()?;
        Ok(Self::from_store(Arc::new(store), bucket))
    }

    pub fn s3(
        bucket: &str,
        region: &str,
        endpoint: Option<&str>,
        credentials: Option<(&str, &str)>,
    ) -> BackendResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(region);

        if let Some(endpoint) = endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        if let Some((access_key_id, secret_access_key)) = credentials {
            builder = builder
                .with_access_key_id(access_key_id)
                .with_secret_access_key(secret_access_key);
        }

        Ok(Self::from_store(Arc::new(builder.build()?), bucket))
    }

    /// Wraps an already configured store whose bucket exists.
    pub fn from_store(store: Arc<dyn ObjectStore>, bucket: &str) -> Self {
        Self {
            store,
            name: bucket.to_string(),
            prefix: None,
            container: Container::Bucket,
            record_attributes: true,
            created: AtomicBool::new(false),
        }
    }

    /// Storage location of a key. Keys never reach the store without going
    /// through here.
    ///
    /// The key is taken verbatim, so listings hand back the same string. Keys
    /// the store cannot represent as-is are rejected.
    fn object_path(&self, key: &str) -> BackendResult<Path> {
        let parsed = match &self.prefix {
            Some(prefix) => Path::parse(format!("{}/{}", prefix, key)),
            None => Path::parse(key),
        };
        parsed.map_err(|err| BackendError::InvalidKey {
            key: key.to_string(),
            message: err.to_string(),
        })
    }

    fn key_of(&self, meta: &ObjectMeta) -> String {
        let location = meta.location.as_ref();
        match &self.prefix {
            Some(prefix) => location
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(location)
                .to_string(),
            None => location.to_string(),
        }
    }

    fn attributes(&self, attributes: &ObjectAttributes) -> Attributes {
        let mut recorded = Attributes::new();
        if !self.record_attributes {
            return recorded;
        }

        recorded.insert(
            Attribute::ContentType,
            attributes.content_type.clone().into(),
        );
        let visibility = if attributes.public { "public" } else { "private" };
        recorded.insert(
            Attribute::Metadata(Cow::Borrowed("visibility")),
            visibility.into(),
        );
        for (key, value) in &attributes.metadata {
            recorded.insert(Attribute::Metadata(Cow::Owned(key.clone())), value.clone().into());
        }
        recorded
    }
}

/// Reports a missing object under the caller's key rather than the store path.
fn keyed(key: &str) -> impl Fn(object_store::Error) -> BackendError + '_ {
    move |err| match BackendError::from(err) {
        BackendError::NotFound { data, .. } => BackendError::NotFound {
            key: key.to_string(),
            data,
        },
        other => other,
    }
}

#[async_trait]
impl Backend for ObjectStoreBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_container(&self) -> BackendResult<()> {
        let already_exists = || BackendError::AlreadyExists {
            name: self.name.clone(),
        };

        match &self.container {
            Container::Directory(path) => match tokio::fs::create_dir(path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    Err(already_exists())
                }
                Err(err) => Err(err.into()),
            },
            Container::Memory => {
                if self.created.swap(true, Ordering::SeqCst) {
                    Err(already_exists())
                } else {
                    Ok(())
                }
            }
            Container::Bucket => {
                self.store.list_with_delimiter(None).await?;
                Err(already_exists())
            }
        }
    }

    async fn open_write_stream(
        &self,
        key: &str,
        attributes: ObjectAttributes,
    ) -> BackendResult<Box<dyn BackendWriter>> {
        let path = self.object_path(key)?;
        let recorded = self.attributes(&attributes);

        if attributes.resumable {
            let upload = self
                .store
                .put_multipart_opts(
                    &path,
                    PutMultipartOpts {
                        attributes: recorded,
                        ..Default::default()
                    },
                )
                .await?;
            tracing::debug!("Opened multipart upload for {}", path);
            return Ok(Box::new(MultipartWriter {
                inner: WriteMultipart::new(upload),
            }));
        }

        let writer = BufWriter::with_capacity(Arc::clone(&self.store), path, SINGLE_PUT_CAPACITY)
            .with_attributes(recorded);
        Ok(Box::new(BufferedWriter { inner: writer }))
    }

    async fn open_read_stream(&self, key: &str) -> BackendResult<ByteStream> {
        let result = self
            .store
            .get(&self.object_path(key)?)
            .await
            .map_err(keyed(key))?;
        Ok(result.into_stream().map_err(BackendError::from).boxed())
    }

    async fn exists(&self, key: &str) -> BackendResult<Option<bool>> {
        match self.store.head(&self.object_path(key)?).await {
            Ok(_) => Ok(Some(true)),
            Err(object_store::Error::NotFound { .. }) => Ok(Some(false)),
            Err(err) => Err(err.into()),
        }
    }

    async fn download(&self, key: &str) -> BackendResult<Bytes> {
        let result = self
            .store
            .get(&self.object_path(key)?)
            .await
            .map_err(keyed(key))?;
        result.bytes().await.map_err(keyed(key))
    }

    async fn save(
        &self,
        key: &str,
        content: Bytes,
        attributes: ObjectAttributes,
    ) -> BackendResult<()> {
        let size = content.len();
        self.store
            .put_opts(
                &self.object_path(key)?,
                PutPayload::from(content),
                PutOptions {
                    attributes: self.attributes(&attributes),
                    ..Default::default()
                },
            )
            .await?;
        tracing::debug!("Saved {} ({} bytes) to {}", key, size, self.name);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        self.store
            .rename(&self.object_path(from)?, &self.object_path(to)?)
            .await
            .map_err(keyed(from))
    }

    async fn list_with_prefix(&self, prefix: &str) -> BackendResult<Option<Vec<ListEntry>>> {
        let location = self.object_path(prefix)?;
        let listing = if location.as_ref().is_empty() {
            None
        } else {
            Some(&location)
        };

        let metas: Vec<ObjectMeta> = self.store.list(listing).try_collect().await?;
        let entries = metas
            .iter()
            .map(|meta| ListEntry {
                key: self.key_of(meta),
            })
            .collect();
        Ok(Some(entries))
    }
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("store", &self.store.to_string())
            .field("name", &self.name)
            .field("container", &self.container)
            .finish()
    }
}

struct MultipartWriter {
    inner: WriteMultipart,
}

#[async_trait]
impl BackendWriter for MultipartWriter {
    async fn write(&mut self, chunk: Bytes) -> BackendResult<()> {
        self.inner.wait_for_capacity(MAX_CONCURRENT_PARTS).await?;
        self.inner.write(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> BackendResult<()> {
        self.inner.finish().await?;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> BackendResult<()> {
        self.inner.abort().await?;
        Ok(())
    }
}

struct BufferedWriter {
    inner: BufWriter,
}

#[async_trait]
impl BackendWriter for BufferedWriter {
    async fn write(&mut self, chunk: Bytes) -> BackendResult<()> {
        self.inner.write_all(&chunk).await?;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> BackendResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    async fn abort(mut self: Box<Self>) -> BackendResult<()> {
        self.inner.abort().await?;
        Ok(())
    }
}
