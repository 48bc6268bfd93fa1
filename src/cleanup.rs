use crate::error::MigrationError;
use crate::lister::list_all;
use crate::model::RemoteObject;
use crate::retry::{RetryPolicy, with_retry};
use crate::store::ObjectStore;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info};

/// What a cleanup pass deleted and which keys it had to leave behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: Vec<String>,
}

/// Delete `objects` from `bucket`, at most `concurrency` at a time.
///
/// Failed deletes are collected, never rolled back or retried beyond the policy.
pub async fn delete_all(
    store: &dyn ObjectStore,
    bucket: &str,
    objects: &[RemoteObject],
    concurrency: usize,
    retry: &RetryPolicy,
) -> CleanupReport {
    let results: Vec<_> = stream::iter(objects)
        .map(|object| async move {
            let key = object.key.as_str();
            debug!(bucket, key, "Deleting object");
            let description = format!("DELETE {key}");
            let result = with_retry(retry, &description, || store.delete_object(bucket, key)).await;
            (key, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = CleanupReport::default();
    for (key, result) in results {
        match result {
            Ok(()) => report.deleted += 1,
            Err(err) => {
                error!(bucket, key, error = %err, "Failed to delete object");
                report.failed.push(key.to_string());
            }
        }
    }
    report.failed.sort();

    info!(
        bucket,
        deleted = report.deleted,
        failed = report.failed.len(),
        "Cleanup finished"
    );
    report
}

/// Remove every object from `bucket`.
pub async fn empty_bucket(
    store: &dyn ObjectStore,
    bucket: &str,
    concurrency: usize,
    retry: &RetryPolicy,
) -> Result<CleanupReport, MigrationError> {
    let objects = list_all(store, bucket, None, retry).await?;
    Ok(delete_all(store, bucket, &objects, concurrency, retry).await)
}
