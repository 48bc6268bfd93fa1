use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::model::{ListingPage, ObjectHead, ObjectRewrite, RemoteObject};
use crate::store::ObjectStore;
use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, MetadataDirective};
use aws_sdk_s3::Client;
use aws_smithy_runtime::client::http::hyper_014::HyperClientBuilder;
use aws_smithy_types::retry::RetryConfig;
use chrono::DateTime;
use futures::stream::{self, StreamExt, TryStreamExt};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::collections::HashMap;
use tracing::{debug, warn};

const MAX_KEYS_PER_PAGE: i32 = 1000;

const MIB: i64 = 1024 * 1024;
/// Largest object a single CopyObject or PutObject accepts.
const MAX_SINGLE_REQUEST_SIZE: i64 = 5 * 1024 * MIB;
const DEFAULT_PART_SIZE: i64 = 64 * MIB;
const MAX_PART_SIZE: i64 = 5 * 1024 * MIB;
const MAX_PARTS: i64 = 10_000;
const CONCURRENT_PART_COPIES: usize = 4;

// Characters left as-is in the `x-amz-copy-source` header.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// [`ObjectStore`] backed by AWS S3 or any S3-compatible endpoint.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Build a client for one environment's storage account.
    pub async fn connect(storage: &StorageConfig, concurrency: usize) -> Self {
        // Configure a custom Hyper client with increased connection pool limits
        let mut hyper_builder = hyper::Client::builder();
        hyper_builder.pool_max_idle_per_host(concurrency);
        hyper_builder.retry_canceled_requests(true);
        hyper_builder.http2_only(false); // Allow fallback to HTTP/1.1
        hyper_builder.pool_idle_timeout(std::time::Duration::from_secs(90));

        let http_client = HyperClientBuilder::new()
            .hyper_builder(hyper_builder)
            .build_https();

        let credentials = Credentials::new(
            &storage.access_key,
            &storage.secret_key,
            None,
            None,
            "s3-migrate-environment",
        );

        // Retries are driven by `retry::with_retry` so every attempt is visible.
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .http_client(http_client)
            .retry_config(RetryConfig::disabled())
            .credentials_provider(credentials)
            .region(Region::new(storage.region.clone()))
            .endpoint_url(&storage.endpoint)
            .load()
            .await;

        // Non-AWS endpoints (MinIO, Ceph, ...) only understand path-style addressing
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(!storage.is_aws())
            .build();

        Self {
            client: Client::from_conf(s3_config),
        }
    }
}

fn request_error<E: std::error::Error>(operation: &'static str, err: E) -> StoreError {
    StoreError::Request {
        operation,
        message: DisplayErrorContext(&err).to_string(),
    }
}

fn not_found(bucket: &str, key: &str) -> StoreError {
    StoreError::NotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, utf8_percent_encode(key, COPY_SOURCE))
}

fn needs_multipart(size: i64) -> bool {
    size > MAX_SINGLE_REQUEST_SIZE
}

/// Part size for an object of `size` bytes, whole MiB and within the part count limit.
fn part_size_for(size: i64) -> i64 {
    let required = (size + MAX_PARTS - 1) / MAX_PARTS;
    let required_mib = (required + MIB - 1) / MIB * MIB;
    DEFAULT_PART_SIZE.max(required_mib).min(MAX_PART_SIZE)
}

/// One part of a multipart transfer: 1-based number and inclusive byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PartRange {
    number: i32,
    start: i64,
    end: i64,
}

impl PartRange {
    fn header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

fn part_ranges(size: i64, part_size: i64) -> Vec<PartRange> {
    let mut parts = Vec::new();
    let mut start = 0;
    while start < size {
        let end = (start + part_size).min(size) - 1;
        parts.push(PartRange {
            number: parts.len() as i32 + 1,
            start,
            end,
        });
        start = end + 1;
    }
    parts
}

fn completed_part(number: i32, etag: Option<&str>) -> CompletedPart {
    CompletedPart::builder()
        .part_number(number)
        .set_e_tag(etag.map(str::to_string))
        .build()
}

impl S3ObjectStore {
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<String, StoreError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| request_error("CreateMultipartUpload", e))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Request {
                operation: "CreateMultipartUpload",
                message: format!("no upload id returned for s3://{bucket}/{key}"),
            })
    }

    async fn upload_part_copy(
        &self,
        source: &str,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part: PartRange,
    ) -> Result<CompletedPart, StoreError> {
        let output = self
            .client
            .upload_part_copy()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part.number)
            .copy_source(source)
            .copy_source_range(part.header())
            .send()
            .await
            .map_err(|e| request_error("UploadPartCopy", e))?;

        let etag = output.copy_part_result().and_then(|result| result.e_tag());
        Ok(completed_part(part.number, etag))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        number: i32,
        chunk: Vec<u8>,
    ) -> Result<CompletedPart, StoreError> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(number)
            .content_length(chunk.len() as i64)
            .body(ByteStream::from(chunk))
            .send()
            .await
            .map_err(|e| request_error("UploadPart", e))?;

        Ok(completed_part(number, output.e_tag()))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        mut parts: Vec<CompletedPart>,
    ) -> Result<(), StoreError> {
        parts.sort_by_key(|part| part.part_number());
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| request_error("CompleteMultipartUpload", e))?;
        Ok(())
    }

    /// Abort after a failed transfer so no orphaned parts are billed.
    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;
        if let Err(e) = result {
            warn!(
                bucket,
                key,
                error = %DisplayErrorContext(&e),
                "Failed to abort multipart upload"
            );
        }
    }

    async fn multipart_copy(
        &self,
        source: String,
        size: i64,
        dest_bucket: &str,
        dest_key: &str,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let parts = part_ranges(size, part_size_for(size));
        debug!(dest_key, parts = parts.len(), "Copying object in parts");
        let upload_id = self
            .create_multipart_upload(dest_bucket, dest_key, content_type, metadata)
            .await?;

        let result = async {
            let completed: Vec<CompletedPart> = stream::iter(parts)
                .map(|part| self.upload_part_copy(&source, dest_bucket, dest_key, &upload_id, part))
                .buffer_unordered(CONCURRENT_PART_COPIES)
                .try_collect()
                .await?;
            self.complete_multipart_upload(dest_bucket, dest_key, &upload_id, completed)
                .await
        }
        .await;

        if result.is_err() {
            self.abort_multipart_upload(dest_bucket, dest_key, &upload_id)
                .await;
        }
        result
    }

    async fn multipart_put(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream,
        head: &ObjectHead,
    ) -> Result<(), StoreError> {
        let part_size = part_size_for(head.content_length) as usize;
        let upload_id = self
            .create_multipart_upload(bucket, key, head.content_type.clone(), head.metadata.clone())
            .await?;

        // Parts are buffered one at a time so memory stays at one part per task
        let result = async {
            let mut completed = Vec::new();
            let mut chunk = Vec::with_capacity(part_size);
            while let Some(bytes) = body.next().await {
                let bytes = bytes.map_err(|e| request_error("GetObject", e))?;
                chunk.extend_from_slice(&bytes);
                while chunk.len() >= part_size {
                    let rest = chunk.split_off(part_size);
                    let number = completed.len() as i32 + 1;
                    completed.push(self.upload_part(bucket, key, &upload_id, number, chunk).await?);
                    chunk = rest;
                }
            }
            if !chunk.is_empty() {
                let number = completed.len() as i32 + 1;
                completed.push(self.upload_part(bucket, key, &upload_id, number, chunk).await?);
            }
            self.complete_multipart_upload(bucket, key, &upload_id, completed)
                .await
        }
        .await;

        if result.is_err() {
            self.abort_multipart_upload(bucket, key, &upload_id).await;
        }
        result
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_objects_page<'a>(
        &self,
        bucket: &str,
        prefix: Option<&'a str>,
        continuation_token: Option<&'a str>,
    ) -> Result<ListingPage, StoreError> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .max_keys(MAX_KEYS_PER_PAGE);

        if let Some(prefix) = prefix {
            request = request.prefix(prefix);
        }
        if let Some(token) = continuation_token {
            request = request.continuation_token(token);
        }

        let output = request
            .send()
            .await
            .map_err(|e| request_error("ListObjectsV2", e))?;

        let items = output
            .contents()
            .iter()
            .map(|object| RemoteObject {
                key: object.key().unwrap_or_default().to_string(),
                size: object.size().unwrap_or(0),
                last_modified: object
                    .last_modified()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                content_type: None,
                metadata: None,
            })
            .collect();

        Ok(ListingPage {
            items,
            continuation_token: output.next_continuation_token().map(str::to_string),
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, StoreError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(ObjectHead {
                content_type: output.content_type().map(str::to_string),
                content_length: output.content_length().unwrap_or(0),
                metadata: output.metadata().cloned().unwrap_or_default(),
            }),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    return Err(not_found(bucket, key));
                }
                Err(request_error("HeadObject", service_error))
            }
        }
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        rewrite: Option<ObjectRewrite>,
    ) -> Result<(), StoreError> {
        let source = copy_source(source_bucket, source_key);
        let head = self.head_object(source_bucket, source_key).await?;
        if needs_multipart(head.content_length) {
            let (content_type, metadata) = match rewrite {
                Some(rewrite) => (Some(rewrite.content_type), rewrite.metadata),
                None => (head.content_type, head.metadata),
            };
            return self
                .multipart_copy(source, head.content_length, dest_bucket, dest_key, content_type, metadata)
                .await;
        }

        let mut builder = self
            .client
            .copy_object()
            .bucket(dest_bucket)
            .key(dest_key)
            .copy_source(source);

        if let Some(rewrite) = rewrite {
            builder = builder
                .metadata_directive(MetadataDirective::Replace)
                .content_type(rewrite.content_type)
                .set_metadata(Some(rewrite.metadata));
        }

        builder
            .send()
            .await
            .map_err(|e| request_error("CopyObject", e))?;
        Ok(())
    }

    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ByteStream, StoreError> {
        match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(output.body),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Err(not_found(bucket, key));
                }
                Err(request_error("GetObject", service_error))
            }
        }
    }

    async fn put_object_stream(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        head: &ObjectHead,
    ) -> Result<(), StoreError> {
        if needs_multipart(head.content_length) {
            return self.multipart_put(bucket, key, body, head).await;
        }

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_length(head.content_length)
            .set_content_type(head.content_type.clone())
            .set_metadata(Some(head.metadata.clone()))
            .send()
            .await
            .map_err(|e| request_error("PutObject", e))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| request_error("DeleteObject", e))?;
        Ok(())
    }
}
