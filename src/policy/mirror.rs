use super::TransformPolicy;
use crate::model::RemoteObject;

/// Objects above this size are left behind when skipping large objects.
pub const LARGE_OBJECT_THRESHOLD: i64 = 2_000_000;

/// Copies every object to the same key, optionally leaving large ones behind.
#[derive(Debug, Clone, Default)]
pub struct MirrorPolicy {
    skip_large: bool,
}

impl MirrorPolicy {
    pub fn new(skip_large: bool) -> Self {
        Self { skip_large }
    }
}

impl TransformPolicy for MirrorPolicy {
    fn name(&self) -> &str {
        "mirror"
    }

    fn is_in_scope(&self, object: &RemoteObject) -> bool {
        !self.skip_large || object.size <= LARGE_OBJECT_THRESHOLD
    }

    fn destination_key(&self, object: &RemoteObject) -> Option<String> {
        Some(object.key.clone())
    }
}
