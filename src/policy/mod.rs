//! Transform policies: the only part that differs between migration scenarios.

use crate::documents::{DocumentLookup, RecordPlan};
use crate::error::MigrationError;
use crate::model::{AttachedMetadata, MigrationTask, RemoteObject};
use async_trait::async_trait;
use mongodb::bson::{Bson, DateTime as BsonDateTime};
use std::collections::HashMap;

mod document_media;
mod mirror;
mod rekey;
pub mod resource;
mod room_media;

pub use document_media::DocumentMediaPolicy;
pub use mirror::MirrorPolicy;
pub use rekey::RekeyPolicy;
pub use room_media::RoomMediaPolicy;

/// Portable URL stored in document records for an object key.
pub fn portable_url(key: &str) -> String {
    format!("cdn://{key}")
}

pub(crate) fn timestamp(object: &RemoteObject) -> Bson {
    object
        .last_modified
        .map(|t| Bson::DateTime(BsonDateTime::from_millis(t.timestamp_millis())))
        .unwrap_or(Bson::Null)
}

/// Decides which listed objects migrate, where to, and with which record.
#[async_trait]
pub trait TransformPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Label used in progress lines.
    fn action(&self) -> &'static str {
        "COPY"
    }

    /// Narrow the listing to this prefix.
    fn listing_prefix(&self) -> Option<&str> {
        None
    }

    fn is_in_scope(&self, object: &RemoteObject) -> bool;

    /// `None` filters the object out before it reaches the queue.
    fn destination_key(&self, object: &RemoteObject) -> Option<String>;

    fn derive_metadata(&self, _object: &RemoteObject, destination_key: &str) -> AttachedMetadata {
        let file_name = resource::file_name(destination_key);
        AttachedMetadata {
            resource_type: resource::resource_type(file_name),
            content_type: resource::content_type(file_name),
            tags: resource::derive_tags(file_name, None),
            object_metadata: HashMap::new(),
        }
    }

    /// Whether workers transfer object bytes at all.
    fn moves_objects(&self) -> bool {
        true
    }

    /// Whether migrated originals are deleted after a clean run.
    fn removes_source(&self) -> bool {
        false
    }

    /// One-shot preload of lookup data, run before the queue starts.
    async fn prepare(&self, _lookup: &DocumentLookup<'_>) -> Result<(), MigrationError> {
        Ok(())
    }

    /// The record to upsert for a task, if the scenario keeps one.
    async fn build_record(
        &self,
        _task: &MigrationTask,
        _lookup: &DocumentLookup<'_>,
    ) -> Result<Option<RecordPlan>, MigrationError> {
        Ok(None)
    }
}

/// Turn the listing into tasks, returning them with the number of skipped objects.
pub fn plan_tasks(
    policy: &dyn TransformPolicy,
    objects: Vec<RemoteObject>,
) -> (Vec<MigrationTask>, usize) {
    let listed = objects.len();
    let tasks: Vec<MigrationTask> = objects
        .into_iter()
        .filter(|object| policy.is_in_scope(object))
        .filter_map(|object| {
            let destination_key = policy.destination_key(&object)?;
            let metadata = policy.derive_metadata(&object, &destination_key);
            Some((object, destination_key, metadata))
        })
        .enumerate()
        .map(|(sequence_index, (source, destination_key, metadata))| MigrationTask {
            source,
            destination_key,
            metadata,
            sequence_index,
        })
        .collect();

    let skipped = listed - tasks.len();
    (tasks, skipped)
}
