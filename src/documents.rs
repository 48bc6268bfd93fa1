use crate::error::{RetryExhausted, StoreError};
use crate::retry::{RetryPolicy, with_retry};
use crate::unique_id;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::ReturnDocument;
use mongodb::{Client, Database};

/// Result of an upsert by natural key.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub created: bool,
    pub record: Document,
}

impl Upserted {
    pub fn record_id(&self) -> String {
        match self.record.get("_id") {
            Some(Bson::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

/// A record a transform policy wants written for a migrated object.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPlan {
    pub collection: String,
    pub key_field: &'static str,
    pub key_value: String,
    pub fields: Document,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError>;

    async fn find_many(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Vec<Document>, StoreError>;

    /// Creates the record if no `key_field == key_value` exists, otherwise sets `fields` on it.
    async fn upsert_by_key(
        &self,
        collection: &str,
        key_field: &str,
        key_value: &str,
        fields: Document,
    ) -> Result<Upserted, StoreError>;

    /// Replaces the record with the same `_id`, inserting it if absent.
    async fn replace_by_id(&self, collection: &str, record: Document) -> Result<(), StoreError>;

    async fn delete_collection(&self, collection: &str) -> Result<(), StoreError>;

    async fn collection_names(&self) -> Result<Vec<String>, StoreError>;
}

/// Document store calls wrapped in the retry policy.
pub struct DocumentLookup<'a> {
    documents: &'a dyn DocumentStore,
    retry: &'a RetryPolicy,
}

impl<'a> DocumentLookup<'a> {
    pub fn new(documents: &'a dyn DocumentStore, retry: &'a RetryPolicy) -> Self {
        Self { documents, retry }
    }

    pub async fn find_by_id(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, RetryExhausted> {
        let description = format!("FIND {collection} {id}");
        with_retry(self.retry, &description, || {
            self.documents.find_one(collection, doc! { "_id": id })
        })
        .await
    }

    pub async fn find_all(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Vec<Document>, RetryExhausted> {
        let description = format!("FIND {collection} {filter}");
        with_retry(self.retry, &description, || {
            self.documents.find_many(collection, filter.clone())
        })
        .await
    }

    pub async fn replace(&self, collection: &str, record: &Document) -> Result<(), RetryExhausted> {
        let description = format!(
            "REPLACE {collection} {}",
            record.get("_id").map(|id| id.to_string()).unwrap_or_default()
        );
        with_retry(self.retry, &description, || {
            self.documents.replace_by_id(collection, record.clone())
        })
        .await
    }

    pub async fn upsert(&self, plan: &RecordPlan) -> Result<Upserted, RetryExhausted> {
        let description = format!("UPSERT {} {}", plan.collection, plan.key_value);
        with_retry(self.retry, &description, || {
            self.documents.upsert_by_key(
                &plan.collection,
                plan.key_field,
                &plan.key_value,
                plan.fields.clone(),
            )
        })
        .await
    }
}

/// [`DocumentStore`] backed by a MongoDB database.
pub struct MongoDocumentStore {
    database: Database,
}

fn document_error(err: mongodb::error::Error) -> StoreError {
    StoreError::Document(err.to_string())
}

impl MongoDocumentStore {
    /// Connects and selects `database`, or the URI's default database.
    pub async fn connect(uri: &str, database: Option<&str>) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await.map_err(document_error)?;
        let database = match database {
            Some(name) => client.database(name),
            None => client.default_database().ok_or_else(|| {
                StoreError::Document("connection URI names no default database".to_string())
            })?,
        };
        Ok(Self { database })
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError> {
        self.database
            .collection::<Document>(collection)
            .find_one(filter)
            .await
            .map_err(document_error)
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Vec<Document>, StoreError> {
        let cursor = self
            .database
            .collection::<Document>(collection)
            .find(filter)
            .await
            .map_err(document_error)?;
        cursor.try_collect().await.map_err(document_error)
    }

    async fn upsert_by_key(
        &self,
        collection: &str,
        key_field: &str,
        key_value: &str,
        fields: Document,
    ) -> Result<Upserted, StoreError> {
        // An id only lands on the record when the upsert inserts it.
        let id_if_inserted = unique_id::create();

        let mut filter = Document::new();
        filter.insert(key_field, key_value);
        let update = doc! {
            "$set": fields,
            "$setOnInsert": { "_id": id_if_inserted.clone() },
        };

        let record = self
            .database
            .collection::<Document>(collection)
            .find_one_and_update(filter, update)
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(document_error)?
            .ok_or_else(|| {
                StoreError::Document(format!(
                    "upsert of {collection} {key_field}={key_value} returned no record"
                ))
            })?;

        let created = record.get_str("_id").is_ok_and(|id| id == id_if_inserted);
        Ok(Upserted { created, record })
    }

    async fn replace_by_id(&self, collection: &str, record: Document) -> Result<(), StoreError> {
        let id = record
            .get("_id")
            .cloned()
            .ok_or_else(|| StoreError::Document(format!("{collection} record has no _id")))?;
        self.database
            .collection::<Document>(collection)
            .replace_one(doc! { "_id": id }, record)
            .upsert(true)
            .await
            .map_err(document_error)?;
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.database
            .collection::<Document>(collection)
            .drop()
            .await
            .map_err(document_error)
    }

    async fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        self.database
            .list_collection_names()
            .await
            .map_err(document_error)
    }
}
