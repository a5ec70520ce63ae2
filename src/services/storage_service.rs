//! src/services/storage_service.rs
//!
//! ObjectStore — upload, download, list, delete and presign against an
//! S3-compatible store through one shared `aws-sdk-s3` client. The target
//! bucket is provisioned on demand; nothing about objects is cached locally,
//! every query goes to the store.

use crate::config::StorageConfig;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    Client,
    config::{
        BehaviorVersion, Builder as S3ConfigBuilder, Region, RequestChecksumCalculation,
        ResponseChecksumValidation, retry::RetryConfig, timeout::TimeoutConfig,
    },
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    operation::{
        create_bucket::CreateBucketError, get_object::GetObjectError,
        head_bucket::HeadBucketError, head_object::HeadObjectError,
    },
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use http_body::Frame;
use http_body_util::StreamBody;
use serde::Serialize;
use std::{
    collections::HashMap,
    fmt,
    future::Future,
    io,
    ops::Deref,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::{debug, error, info};

const MAX_OBJECT_KEY_LEN: usize = 1024;
/// Chunks buffered between an upload source and the outgoing request body.
const UPLOAD_CHANNEL_DEPTH: usize = 4;
/// Region that must not be sent as an explicit `LocationConstraint`.
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable during {operation}: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },
    #[error("object `{key}` not found")]
    NotFound { key: String },
    #[error("invalid object key `{key}`: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("presigned URL expiry {0:?} must be between 1 second and 7 days")]
    InvalidExpiry(Duration),
    #[error("content length {0} exceeds the largest length the store accepts")]
    InvalidLength(u64),
    #[error("storage operation cancelled")]
    Cancelled,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Optional attributes sent along with an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    /// User metadata, stored by the service as `x-amz-meta-*` headers.
    pub metadata: Option<HashMap<String, String>>,
}

/// A fully downloaded object.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Lazily-read object body. Chunks are yielded as they arrive from the
/// network; the stream is finite and cannot be restarted.
pub struct ObjectStream {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    inner: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>,
    _lease: ClientLease,
}

impl fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStream")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl Stream for ObjectStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Client handle held for the duration of one operation.
///
/// Counts in-flight operations; the count drops on every exit path,
/// including a cancelled future or an abandoned download stream.
struct ClientLease {
    client: Client,
    in_flight: Arc<AtomicUsize>,
}

impl ClientLease {
    fn acquire(client: &Client, in_flight: &Arc<AtomicUsize>) -> Self {
        in_flight.fetch_add(1, Ordering::AcqRel);
        Self {
            client: client.clone(),
            in_flight: in_flight.clone(),
        }
    }
}

impl Deref for ClientLease {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// ObjectStore provides the storage operations used by the HTTP layer and
/// the startup routine:
/// - bucket provisioning (idempotent, safe under concurrent callers)
/// - upload from bytes or from a stream
/// - download into memory or as a chunk stream
/// - existence check, delete, prefix listing, presigned GET URLs
///
/// Construct one per process and share it by cloning; clones share the
/// underlying connection pool.
#[derive(Clone)]
pub struct ObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
    region: String,
    /// Write-once: set after the bucket was seen or created, never cleared.
    bucket_ready: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
}

/// SDK client settings for an S3-compatible endpoint.
///
/// Retries are disabled; a failed call surfaces to the caller immediately.
/// Flexible checksums are only computed or validated when an operation
/// requires them.
pub fn sdk_config(config: &StorageConfig) -> S3ConfigBuilder {
    let credentials = Credentials::new(
        &config.access_key_id,
        &config.secret_access_key,
        None,
        None,
        "storage-api",
    );

    let mut builder = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .endpoint_url(config.endpoint_url())
        .region(Region::new(config.region.clone()))
        .credentials_provider(credentials)
        .force_path_style(true)
        .retry_config(RetryConfig::disabled())
        .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
        .response_checksum_validation(ResponseChecksumValidation::WhenRequired);

    if let Some(timeout) = config.operation_timeout {
        builder = builder.timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(timeout)
                .build(),
        );
    }

    builder
}

impl ObjectStore {
    /// Build a store with its own SDK client for the configured endpoint.
    pub fn new(config: &StorageConfig) -> Self {
        let client = Client::from_conf(sdk_config(config).build());
        info!(
            bucket = %config.bucket,
            endpoint = %config.endpoint_url(),
            region = %config.region,
            "S3 storage client initialized"
        );
        Self::from_client(client, config)
    }

    /// Wrap an already configured SDK client.
    pub fn from_client(client: Client, config: &StorageConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint_url(),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            bucket_ready: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Number of operations currently holding a client lease.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn lease(&self) -> ClientLease {
        ClientLease::acquire(&self.client, &self.in_flight)
    }

    /// Human-readable `{endpoint}/{bucket}/{key}` locator. Not a fetchable
    /// URL on its own; see [`ObjectStore::presigned_url`].
    pub fn locator(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    /// Race a store operation against `token`. The operation future is
    /// dropped as soon as the token fires, which aborts its network call.
    pub async fn cancellable<F, T>(token: &CancellationToken, operation: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(StorageError::Cancelled),
            result = operation => result,
        }
    }

    /// Make sure the bucket exists, creating it when the store reports it
    /// missing. "Already exists" answers from a concurrent creator count as
    /// success.
    pub async fn ensure_bucket(&self) -> StorageResult<()> {
        if self.bucket_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let lease = self.lease();
        match lease.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => debug!(bucket = %self.bucket, "Bucket already exists"),
            Err(err) if err.as_service_error().is_some_and(HeadBucketError::is_not_found) => {
                self.create_bucket(&lease).await?;
            }
            Err(err) => {
                let err = unavailable("head_bucket", err);
                error!(bucket = %self.bucket, error = %err, "Error checking bucket");
                return Err(err);
            }
        }

        self.bucket_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn create_bucket(&self, client: &Client) -> StorageResult<()> {
        let mut request = client.create_bucket().bucket(&self.bucket);
        if !self.region.eq_ignore_ascii_case(DEFAULT_REGION) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!(bucket = %self.bucket, "Created bucket");
                Ok(())
            }
            Err(err) if err.as_service_error().is_some_and(already_exists) => {
                debug!(bucket = %self.bucket, "Bucket created concurrently");
                Ok(())
            }
            Err(err) => {
                let err = unavailable("create_bucket", err);
                error!(bucket = %self.bucket, error = %err, "Error creating bucket");
                Err(err)
            }
        }
    }

    /// Check bucket reachability without touching the provisioning flag.
    pub async fn check_bucket(&self) -> StorageResult<bool> {
        let lease = self.lease();
        match lease.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(HeadBucketError::is_not_found) => {
                Ok(false)
            }
            Err(err) => Err(unavailable("head_bucket", err)),
        }
    }

    /// Upload an in-memory payload; returns the object's locator.
    pub async fn upload_bytes(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        options: UploadOptions,
    ) -> StorageResult<String> {
        validate_key(key)?;
        self.ensure_bucket().await?;

        let data = data.into();
        let size = data.len();
        let lease = self.lease();
        lease
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .set_content_type(options.content_type)
            .set_metadata(options.metadata)
            .send()
            .await
            .map_err(|err| unavailable("put_object", err))?;

        info!(bucket = %self.bucket, key = %key, size, "Uploaded object");
        Ok(self.locator(key))
    }

    /// Upload from a byte stream of known total length; returns the locator.
    ///
    /// Chunks are forwarded to the request body as they are produced with at
    /// most `UPLOAD_CHANNEL_DEPTH` chunks in flight. A source error aborts
    /// the request and is reported as `Unavailable`.
    pub async fn upload_stream<S>(
        &self,
        key: &str,
        source: S,
        content_length: u64,
        options: UploadOptions,
    ) -> StorageResult<String>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        validate_key(key)?;
        let length =
            i64::try_from(content_length).map_err(|_| StorageError::InvalidLength(content_length))?;
        self.ensure_bucket().await?;

        let (tx, rx) = mpsc::channel::<io::Result<Frame<Bytes>>>(UPLOAD_CHANNEL_DEPTH);
        // Filled before the failing chunk reaches the body, so it is visible
        // once the request has observed the error.
        let (failure_tx, mut failure_rx) = oneshot::channel::<String>();
        let pump = tokio::spawn(async move {
            let mut source = Box::pin(source);
            while let Some(chunk) = source.next().await {
                match chunk {
                    Ok(data) => {
                        if tx.send(Ok(Frame::data(data))).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = failure_tx.send(err.to_string());
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }
        });
        let body = ByteStream::from_body_1_x(StreamBody::new(ReceiverStream::new(rx)));

        let lease = self.lease();
        let result = lease
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(length)
            .body(body)
            .set_content_type(options.content_type)
            .set_metadata(options.metadata)
            .send()
            .await;
        pump.abort();

        // The source error wins over whatever the HTTP client made of the
        // truncated body.
        if let Ok(message) = failure_rx.try_recv() {
            error!(bucket = %self.bucket, key = %key, error = %message, "Upload source failed");
            return Err(StorageError::Unavailable {
                operation: "put_object",
                message: format!("upload source failed: {message}"),
            });
        }
        result.map_err(|err| unavailable("put_object", err))?;

        info!(bucket = %self.bucket, key = %key, size = content_length, "Uploaded object stream");
        Ok(self.locator(key))
    }

    /// Download the whole object into memory.
    pub async fn download_bytes(&self, key: &str) -> StorageResult<StoredObject> {
        validate_key(key)?;
        let lease = self.lease();
        let output = lease
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| get_object_error(key, err))?;

        let content_type = output.content_type;
        let metadata = output.metadata.unwrap_or_default();
        let data = output
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Unavailable {
                operation: "get_object",
                message: err.to_string(),
            })?
            .into_bytes();

        debug!(bucket = %self.bucket, key = %key, size = data.len(), "Downloaded object");
        Ok(StoredObject {
            data,
            content_type,
            metadata,
        })
    }

    /// Open the object for streaming. Every call issues a new remote read.
    pub async fn download_stream(&self, key: &str) -> StorageResult<ObjectStream> {
        validate_key(key)?;
        let lease = self.lease();
        let output = lease
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| get_object_error(key, err))?;

        debug!(bucket = %self.bucket, key = %key, "Streaming object");
        Ok(ObjectStream {
            content_type: output.content_type,
            content_length: output.content_length.and_then(|len| u64::try_from(len).ok()),
            inner: Box::pin(ReaderStream::new(output.body.into_async_read())),
            _lease: lease,
        })
    }

    /// Remove an object. Returns `false` when there was nothing to remove.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        // S3 answers DeleteObject with success for absent keys, so presence
        // is probed first.
        if !self.exists(key).await? {
            debug!(bucket = %self.bucket, key = %key, "Object already absent");
            return Ok(false);
        }

        let lease = self.lease();
        lease
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| unavailable("delete_object", err))?;

        info!(bucket = %self.bucket, key = %key, "Deleted object");
        Ok(true)
    }

    /// Whether `key` currently exists. Errors other than "not found" are
    /// reported, never folded into `false`.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let lease = self.lease();
        match lease
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(HeadObjectError::is_not_found) => {
                Ok(false)
            }
            Err(err) => Err(unavailable("head_object", err)),
        }
    }

    /// Time-limited GET URL usable without credentials. Signing is local;
    /// the key is not checked for presence.
    pub async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        validate_key(key)?;
        if expires_in.is_zero() {
            return Err(StorageError::InvalidExpiry(expires_in));
        }
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|_| StorageError::InvalidExpiry(expires_in))?;

        let lease = self.lease();
        let request = lease
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| unavailable("presign_get_object", err))?;

        debug!(bucket = %self.bucket, key = %key, expires_in = expires_in.as_secs(), "Presigned URL generated");
        Ok(request.uri().to_string())
    }

    /// List every object under `prefix`, following continuation tokens until
    /// the listing is exhausted. Order is the store's.
    pub async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<ObjectMetadata>> {
        let lease = self.lease();
        let mut pages = lease
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(prefix.map(str::to_string))
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| unavailable("list_objects_v2", err))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                objects.push(ObjectMetadata {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(|ts| DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())),
                });
            }
        }

        debug!(bucket = %self.bucket, prefix = ?prefix, count = objects.len(), "Listed objects");
        Ok(objects)
    }
}

/// Reject keys the store would refuse before spending a round trip.
fn validate_key(key: &str) -> StorageResult<()> {
    let reason = if key.is_empty() {
        "must not be empty"
    } else if key.len() > MAX_OBJECT_KEY_LEN {
        "must be at most 1024 bytes"
    } else {
        return Ok(());
    };

    Err(StorageError::InvalidKey {
        key: key.to_string(),
        reason,
    })
}

fn already_exists(err: &CreateBucketError) -> bool {
    err.is_bucket_already_owned_by_you() || err.is_bucket_already_exists()
}

fn get_object_error<R>(key: &str, err: SdkError<GetObjectError, R>) -> StorageError
where
    R: fmt::Debug + 'static,
{
    match err.as_service_error() {
        Some(service) if service.is_no_such_key() || service.code() == Some("NoSuchBucket") => {
            StorageError::NotFound {
                key: key.to_string(),
            }
        }
        _ => unavailable("get_object", err),
    }
}

fn unavailable<E, R>(operation: &'static str, err: SdkError<E, R>) -> StorageError
where
    E: std::error::Error + 'static,
    R: fmt::Debug + 'static,
{
    StorageError::Unavailable {
        operation,
        message: DisplayErrorContext(&err).to_string(),
    }
}
