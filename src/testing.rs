//! In-memory stores for tests.

use crate::documents::{DocumentStore, Upserted};
use crate::error::StoreError;
use crate::model::{ListingPage, ObjectHead, ObjectRewrite, RemoteObject};
use crate::store::ObjectStore;
use crate::unique_id;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, TimeZone, Utc};
use mongodb::bson::{Bson, Document};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const ALWAYS: usize = usize::MAX;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub last_modified: DateTime<Utc>,
}

pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    page_size: usize,
    dangling_token: bool,
    delay: Option<Duration>,
    failing_keys: Mutex<HashMap<String, usize>>,
    list_failures_after: Mutex<Option<usize>>,
    list_calls: AtomicUsize,
    writes: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            page_size: 1000,
            dangling_token: false,
            delay: None,
            failing_keys: Mutex::new(HashMap::new()),
            list_failures_after: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Keep returning a continuation token after the last page.
    pub fn with_dangling_token(mut self) -> Self {
        self.dangling_token = true;
        self
    }

    /// Make every data operation take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn insert(&self, bucket: &str, key: &str, body: &[u8]) {
        self.insert_object(
            bucket,
            key,
            StoredObject {
                body: body.to_vec(),
                content_type: None,
                metadata: HashMap::new(),
                last_modified: Utc.with_ymd_and_hms(2023, 5, 17, 8, 30, 0).unwrap(),
            },
        );
    }

    pub fn insert_object(&self, bucket: &str, key: &str, object: StoredObject) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), object);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Fail operations touching `key` for the next `times` calls.
    pub fn fail_key(&self, key: &str, times: usize) {
        self.failing_keys
            .lock()
            .unwrap()
            .insert(key.to_string(), times);
    }

    /// Fail every listing call after the first `successful` ones.
    pub fn fail_listing_after(&self, successful: usize) {
        *self.list_failures_after.lock().unwrap() = Some(successful);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// `bucket/key` of every copy or put destination, in call order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn injected_failure(&self, operation: &'static str, key: &str) -> Result<(), StoreError> {
        let mut failing = self.failing_keys.lock().unwrap();
        match failing.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != ALWAYS {
                    *remaining -= 1;
                }
                Err(StoreError::Request {
                    operation,
                    message: format!("injected failure for {key}"),
                })
            }
            _ => Ok(()),
        }
    }

    async fn simulate_latency(&self) {
        if let Some(delay) = self.delay {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn not_found(bucket: &str, key: &str) -> StoreError {
        StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_objects_page<'a>(
        &self,
        bucket: &str,
        prefix: Option<&'a str>,
        continuation_token: Option<&'a str>,
    ) -> Result<ListingPage, StoreError> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(successful) = *self.list_failures_after.lock().unwrap() {
            if call > successful {
                return Err(StoreError::Request {
                    operation: "ListObjectsV2",
                    message: "503 Service Unavailable".to_string(),
                });
            }
        }

        let offset: usize = continuation_token
            .map(|t| t.parse().unwrap())
            .unwrap_or(0);
        let objects = self.objects.lock().unwrap();
        let matching: Vec<RemoteObject> = objects
            .iter()
            .filter(|((b, k), _)| b == bucket && prefix.is_none_or(|p| k.starts_with(p)))
            .map(|((_, key), object)| RemoteObject {
                key: key.clone(),
                size: object.body.len() as i64,
                last_modified: Some(object.last_modified),
                content_type: None,
                metadata: None,
            })
            .collect();

        let items: Vec<RemoteObject> = matching
            .iter()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect();
        let next = offset + items.len();
        let continuation_token = if next < matching.len() || self.dangling_token {
            Some(next.to_string())
        } else {
            None
        };

        Ok(ListingPage {
            items,
            continuation_token,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, StoreError> {
        self.injected_failure("HeadObject", key)?;
        let object = self
            .object(bucket, key)
            .ok_or_else(|| Self::not_found(bucket, key))?;
        Ok(ObjectHead {
            content_type: object.content_type,
            content_length: object.body.len() as i64,
            metadata: object.metadata,
        })
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        rewrite: Option<ObjectRewrite>,
    ) -> Result<(), StoreError> {
        self.simulate_latency().await;
        self.injected_failure("CopyObject", source_key)?;
        let mut object = self
            .object(source_bucket, source_key)
            .ok_or_else(|| Self::not_found(source_bucket, source_key))?;
        if let Some(rewrite) = rewrite {
            object.content_type = Some(rewrite.content_type);
            object.metadata = rewrite.metadata;
        }
        self.insert_object(dest_bucket, dest_key, object);
        self.writes
            .lock()
            .unwrap()
            .push(format!("{dest_bucket}/{dest_key}"));
        Ok(())
    }

    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ByteStream, StoreError> {
        self.simulate_latency().await;
        self.injected_failure("GetObject", key)?;
        let object = self
            .object(bucket, key)
            .ok_or_else(|| Self::not_found(bucket, key))?;
        Ok(ByteStream::from(object.body))
    }

    async fn put_object_stream(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        head: &ObjectHead,
    ) -> Result<(), StoreError> {
        self.injected_failure("PutObject", key)?;
        let body = body
            .collect()
            .await
            .map_err(|e| StoreError::Request {
                operation: "PutObject",
                message: e.to_string(),
            })?
            .into_bytes()
            .to_vec();
        self.insert_object(
            bucket,
            key,
            StoredObject {
                body,
                content_type: head.content_type.clone(),
                metadata: head.metadata.clone(),
                last_modified: Utc::now(),
            },
        );
        self.writes.lock().unwrap().push(format!("{bucket}/{key}"));
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.injected_failure("DeleteObject", key)?;
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        self.deletes.lock().unwrap().push(format!("{bucket}/{key}"));
        Ok(())
    }
}

pub struct InMemoryDocumentStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, collection: &str, record: Document) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(record);
    }

    pub fn records(&self, collection: &str) -> Vec<Document> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn matches(record: &Document, filter: &Document) -> bool {
    filter.iter().all(|(field, expected)| {
        record.get(field).is_some_and(|actual| {
            match (as_number(actual), as_number(expected)) {
                (Some(a), Some(b)) => a == b,
                _ => actual == expected,
            }
        })
    })
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self
            .records(collection)
            .into_iter()
            .find(|record| matches(record, &filter)))
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .records(collection)
            .into_iter()
            .filter(|record| matches(record, &filter))
            .collect())
    }

    async fn upsert_by_key(
        &self,
        collection: &str,
        key_field: &str,
        key_value: &str,
        fields: Document,
    ) -> Result<Upserted, StoreError> {
        let mut collections = self.collections.lock().unwrap();
        let records = collections.entry(collection.to_string()).or_default();

        if let Some(record) = records
            .iter_mut()
            .find(|r| r.get_str(key_field).is_ok_and(|v| v == key_value))
        {
            for (field, value) in fields {
                record.insert(field, value);
            }
            return Ok(Upserted {
                created: false,
                record: record.clone(),
            });
        }

        let mut record = Document::new();
        record.insert("_id", unique_id::create());
        record.insert(key_field, key_value);
        for (field, value) in fields {
            record.insert(field, value);
        }
        records.push(record.clone());
        Ok(Upserted {
            created: true,
            record,
        })
    }

    async fn replace_by_id(&self, collection: &str, record: Document) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().unwrap();
        let records = collections.entry(collection.to_string()).or_default();
        match records.iter_mut().find(|r| r.get("_id") == record.get("_id")) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.collections.lock().unwrap().remove(collection);
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.collections.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
