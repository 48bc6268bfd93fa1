use crate::error::StoreError;
use crate::model::{ListingPage, ObjectHead, ObjectRewrite};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;

/// Request/response operations the engine needs from an object store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one listing page, resuming after `continuation_token`.
    async fn list_objects_page<'a>(
        &self,
        bucket: &str,
        prefix: Option<&'a str>,
        continuation_token: Option<&'a str>,
    ) -> Result<ListingPage, StoreError>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, StoreError>;

    /// Server-side copy. Metadata is kept unless `rewrite` replaces it.
    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        rewrite: Option<ObjectRewrite>,
    ) -> Result<(), StoreError>;

    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ByteStream, StoreError>;

    /// Overwrites `key` with `body`, applying the type and metadata from `head`.
    async fn put_object_stream(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        head: &ObjectHead,
    ) -> Result<(), StoreError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
}
