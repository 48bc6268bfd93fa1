use super::{TransformPolicy, portable_url, resource, timestamp};
use crate::documents::{DocumentLookup, RecordPlan};
use crate::error::MigrationError;
use crate::model::{AttachedMetadata, MigrationTask, RemoteObject};
use async_trait::async_trait;
use mongodb::bson::{Bson, doc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

pub const MEDIA_LIBRARY_PREFIX: &str = "media-library/";
pub const LICENCE: &str = "CC0-1.0";

static DOCUMENT_MEDIA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"document-media/(.+)/").expect("valid document media pattern"));

/// Moves per-document media into the shared media library and records each item.
#[derive(Debug, Clone, Default)]
pub struct DocumentMediaPolicy;

impl DocumentMediaPolicy {
    pub fn new() -> Self {
        Self
    }

    fn document_id(key: &str) -> Option<&str> {
        DOCUMENT_MEDIA
            .captures(key)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str())
    }

    fn library_file_name(destination_key: &str) -> &str {
        destination_key
            .strip_prefix(MEDIA_LIBRARY_PREFIX)
            .unwrap_or(destination_key)
    }
}

#[async_trait]
impl TransformPolicy for DocumentMediaPolicy {
    fn name(&self) -> &str {
        "document-media"
    }

    fn action(&self) -> &'static str {
        "MIGRATE"
    }

    fn is_in_scope(&self, object: &RemoteObject) -> bool {
        DOCUMENT_MEDIA.is_match(&object.key) && !object.key.contains("__DIRMARKER__")
    }

    fn destination_key(&self, object: &RemoteObject) -> Option<String> {
        if !self.is_in_scope(object) {
            return None;
        }
        Some(
            DOCUMENT_MEDIA
                .replace(&object.key, MEDIA_LIBRARY_PREFIX)
                .into_owned(),
        )
    }

    fn derive_metadata(&self, object: &RemoteObject, destination_key: &str) -> AttachedMetadata {
        let file_name = Self::library_file_name(destination_key);
        AttachedMetadata {
            resource_type: resource::resource_type(file_name),
            content_type: resource::content_type(file_name),
            tags: resource::derive_tags(file_name, Self::document_id(&object.key)),
            object_metadata: HashMap::new(),
        }
    }

    fn removes_source(&self) -> bool {
        true
    }

    async fn build_record(
        &self,
        task: &MigrationTask,
        lookup: &DocumentLookup<'_>,
    ) -> Result<Option<RecordPlan>, MigrationError> {
        let key = &task.source.key;
        let document_id = Self::document_id(key)
            .ok_or_else(|| MigrationError::transform(key, "key carries no document id"))?;

        let document = lookup
            .find_by_id("documents", document_id)
            .await?
            .ok_or_else(|| {
                MigrationError::transform(key, format!("document '{document_id}' not found"))
            })?;
        let author_id = document.get_str("createdBy").map_err(|_| {
            MigrationError::transform(key, format!("document '{document_id}' has no author"))
        })?;
        let author = lookup.find_by_id("users", author_id).await?.ok_or_else(|| {
            MigrationError::transform(key, format!("user '{author_id}' not found"))
        })?;
        let author_id = author
            .get("_id")
            .cloned()
            .unwrap_or_else(|| Bson::String(author_id.to_string()));

        let url = portable_url(&task.destination_key);
        let created_on = timestamp(&task.source);
        let metadata = &task.metadata;
        let fields = doc! {
            "resourceType": metadata.resource_type.as_str(),
            "contentType": metadata.content_type.clone(),
            "size": task.source.size,
            "createdBy": author_id.clone(),
            "createdOn": created_on.clone(),
            "updatedBy": author_id,
            "updatedOn": created_on,
            "url": url.clone(),
            "description": "",
            "languages": Bson::Array(Vec::new()),
            "licenses": [LICENCE],
            "tags": metadata.tags.clone(),
        };

        Ok(Some(RecordPlan {
            collection: "mediaLibraryItems".to_string(),
            key_field: "url",
            key_value: url,
            fields,
        }))
    }
}
