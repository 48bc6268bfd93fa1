use crate::error::MigrationError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Snapshot of one listed object.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

impl RemoteObject {
    pub fn new(key: impl Into<String>, size: i64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: None,
            content_type: None,
            metadata: None,
        }
    }
}

/// One page of a listing; the listing ends once no token is returned.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub items: Vec<RemoteObject>,
    pub continuation_token: Option<String>,
}

/// Result of a HEAD request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectHead {
    pub content_type: Option<String>,
    pub content_length: i64,
    pub metadata: HashMap<String, String>,
}

/// Replacement content type and user metadata for a copied object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRewrite {
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

/// Coarse media classification derived from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    None,
    Unknown,
    Audio,
    Video,
    Image,
    Pdf,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Unknown => "unknown",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Image => "image",
            Self::Pdf => "pdf",
        }
    }
}

/// Metadata a transform policy derives for a task.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachedMetadata {
    pub resource_type: ResourceType,
    pub content_type: String,
    pub tags: Vec<String>,
    /// Written onto the destination object when non-empty.
    pub object_metadata: HashMap<String, String>,
}

impl AttachedMetadata {
    pub fn rewrite(&self) -> Option<ObjectRewrite> {
        if self.object_metadata.is_empty() {
            return None;
        }
        Some(ObjectRewrite {
            content_type: self.content_type.clone(),
            metadata: self.object_metadata.clone(),
        })
    }
}

/// A planned unit of work, consumed exactly once by a worker.
#[derive(Debug, Clone)]
pub struct MigrationTask {
    pub source: RemoteObject,
    pub destination_key: String,
    pub metadata: AttachedMetadata,
    /// Enumeration position, used for progress percentages only.
    pub sequence_index: usize,
}

/// Document-store write performed by a successful task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordWrite {
    pub id: String,
    pub created: bool,
}

#[derive(Debug)]
pub struct MigrationOutcome {
    pub task: MigrationTask,
    pub result: Result<(), MigrationError>,
    pub record: Option<RecordWrite>,
}

impl MigrationOutcome {
    pub fn success(task: MigrationTask, record: Option<RecordWrite>) -> Self {
        Self {
            task,
            result: Ok(()),
            record,
        }
    }

    pub fn failure(task: MigrationTask, error: MigrationError) -> Self {
        Self {
            task,
            result: Err(error),
            record: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Counters for one invocation of the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub total_tasks: usize,
    /// Listed objects that never became tasks.
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub delete_failures: usize,
    pub error_occurred: bool,
}

impl RunReport {
    pub fn summary_line(&self) -> String {
        if self.error_occurred {
            "CANCELLED BECAUSE OF ERRORS!".to_string()
        } else {
            format!(
                "{} item(s) updated, {} item(s) inserted",
                self.updated, self.created
            )
        }
    }

    pub fn into_result(self) -> Result<Self, MigrationError> {
        if self.error_occurred {
            return Err(MigrationError::PartialBatchFailure {
                failed: self.failed,
                cancelled: self.cancelled,
                total: self.total_tasks,
            });
        }
        Ok(self)
    }
}
