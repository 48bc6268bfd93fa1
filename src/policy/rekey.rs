use super::{TransformPolicy, portable_url, resource, timestamp};
use crate::documents::{DocumentLookup, RecordPlan};
use crate::error::MigrationError;
use crate::model::{AttachedMetadata, MigrationTask, RemoteObject};
use async_trait::async_trait;
use mongodb::bson::doc;
use std::collections::HashMap;

/// Moves everything under one prefix to another, optionally keeping a record per object.
#[derive(Debug, Clone)]
pub struct RekeyPolicy {
    source_prefix: String,
    destination_prefix: String,
    collection: Option<String>,
    rewrite_metadata: bool,
}

impl RekeyPolicy {
    pub fn new(source_prefix: impl Into<String>, destination_prefix: impl Into<String>) -> Self {
        Self {
            source_prefix: source_prefix.into(),
            destination_prefix: destination_prefix.into(),
            collection: None,
            rewrite_metadata: false,
        }
    }

    /// Upsert a record per migrated object into `collection`.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Replace content type and user metadata on the copied objects.
    pub fn with_metadata_rewrite(mut self, rewrite_metadata: bool) -> Self {
        self.rewrite_metadata = rewrite_metadata;
        self
    }
}

#[async_trait]
impl TransformPolicy for RekeyPolicy {
    fn name(&self) -> &str {
        "rekey"
    }

    fn action(&self) -> &'static str {
        "MOVE"
    }

    fn listing_prefix(&self) -> Option<&str> {
        Some(&self.source_prefix)
    }

    fn is_in_scope(&self, object: &RemoteObject) -> bool {
        object.key.starts_with(&self.source_prefix) && !resource::is_directory_marker(&object.key)
    }

    fn destination_key(&self, object: &RemoteObject) -> Option<String> {
        let rest = object.key.strip_prefix(&self.source_prefix)?;
        Some(format!("{}{rest}", self.destination_prefix))
    }

    fn derive_metadata(&self, object: &RemoteObject, destination_key: &str) -> AttachedMetadata {
        let file_name = resource::file_name(destination_key);
        let resource_type = resource::resource_type(file_name);
        let object_metadata = if self.rewrite_metadata {
            HashMap::from([
                ("resource-type".to_string(), resource_type.as_str().to_string()),
                ("source-key".to_string(), object.key.clone()),
            ])
        } else {
            HashMap::new()
        };

        AttachedMetadata {
            resource_type,
            content_type: resource::content_type(file_name),
            tags: resource::derive_tags(file_name, None),
            object_metadata,
        }
    }

    fn removes_source(&self) -> bool {
        true
    }

    async fn build_record(
        &self,
        task: &MigrationTask,
        _lookup: &DocumentLookup<'_>,
    ) -> Result<Option<RecordPlan>, MigrationError> {
        let Some(collection) = &self.collection else {
            return Ok(None);
        };

        let url = portable_url(&task.destination_key);
        let metadata = &task.metadata;
        let fields = doc! {
            "resourceType": metadata.resource_type.as_str(),
            "contentType": metadata.content_type.clone(),
            "size": task.source.size,
            "createdOn": timestamp(&task.source),
            "url": url.clone(),
            "tags": metadata.tags.clone(),
        };

        Ok(Some(RecordPlan {
            collection: collection.clone(),
            key_field: "url",
            key_value: url,
            fields,
        }))
    }
}
