use super::{TransformPolicy, portable_url, timestamp};
use crate::documents::{DocumentLookup, RecordPlan};
use crate::error::MigrationError;
use crate::model::{MigrationTask, RemoteObject};
use async_trait::async_trait;
use mongodb::bson::{Bson, doc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{LazyLock, OnceLock};
use tracing::info;

pub const ROOM_MEDIA_PREFIX: &str = "room-media/";
const DIRECTORY_MARKER_SUFFIX: &str = "/__DIRMARKER__";

static ROOM_MEDIA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"room-media/(.+)/").expect("valid room media pattern"));

/// Records every room media object in `roomMediaItems` without moving it.
#[derive(Debug, Default)]
pub struct RoomMediaPolicy {
    /// Room id to owner id, loaded once per run.
    owners: OnceLock<HashMap<String, Bson>>,
}

impl RoomMediaPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn room_id(key: &str) -> Option<&str> {
        ROOM_MEDIA
            .captures(key)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str())
    }
}

fn id_string(value: &Bson) -> String {
    match value {
        Bson::String(id) => id.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl TransformPolicy for RoomMediaPolicy {
    fn name(&self) -> &str {
        "room-media"
    }

    fn action(&self) -> &'static str {
        "UPSERT"
    }

    fn listing_prefix(&self) -> Option<&str> {
        Some(ROOM_MEDIA_PREFIX)
    }

    fn is_in_scope(&self, object: &RemoteObject) -> bool {
        object.key.starts_with(ROOM_MEDIA_PREFIX) && !object.key.ends_with(DIRECTORY_MARKER_SUFFIX)
    }

    fn destination_key(&self, object: &RemoteObject) -> Option<String> {
        Some(object.key.clone())
    }

    fn moves_objects(&self) -> bool {
        false
    }

    async fn prepare(&self, lookup: &DocumentLookup<'_>) -> Result<(), MigrationError> {
        if self.owners.get().is_some() {
            return Ok(());
        }

        info!("Fetching all rooms");
        let rooms = lookup.find_all("rooms", doc! {}).await?;
        let owners: HashMap<String, Bson> = rooms
            .iter()
            .filter_map(|room| {
                let id = room.get("_id")?;
                let owner = room.get("ownedBy").cloned().unwrap_or(Bson::Null);
                Some((id_string(id), owner))
            })
            .collect();
        info!(rooms = owners.len(), "Loaded room owners");

        let _ = self.owners.set(owners);
        Ok(())
    }

    async fn build_record(
        &self,
        task: &MigrationTask,
        _lookup: &DocumentLookup<'_>,
    ) -> Result<Option<RecordPlan>, MigrationError> {
        let key = &task.source.key;
        let owners = self
            .owners
            .get()
            .ok_or_else(|| MigrationError::transform(key, "rooms have not been loaded"))?;
        let room_id = Self::room_id(key)
            .ok_or_else(|| MigrationError::transform(key, "key carries no room id"))?;
        let owner = owners.get(room_id).ok_or_else(|| {
            MigrationError::transform(key, format!("could not find room with ID '{room_id}'"))
        })?;

        let url = portable_url(key);
        let metadata = &task.metadata;
        let fields = doc! {
            "roomId": room_id,
            "resourceType": metadata.resource_type.as_str(),
            "contentType": metadata.content_type.clone(),
            "size": task.source.size,
            "createdBy": owner.clone(),
            "createdOn": timestamp(&task.source),
            "url": url.clone(),
        };

        Ok(Some(RecordPlan {
            collection: "roomMediaItems".to_string(),
            key_field: "url",
            key_value: url,
            fields,
        }))
    }
}
