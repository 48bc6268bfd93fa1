use crate::error::MigrationError;
use crate::model::RemoteObject;
use crate::retry::{RetryPolicy, with_retry};
use crate::store::ObjectStore;
use tracing::debug;

/// List every object under `prefix`, following continuation tokens.
///
/// Objects keep the store's native order. If any page exhausts its retries the
/// whole listing fails and nothing is returned.
pub async fn list_all(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: Option<&str>,
    retry: &RetryPolicy,
) -> Result<Vec<RemoteObject>, MigrationError> {
    let mut objects = Vec::new();
    let mut continuation_token: Option<String> = None;

    loop {
        let description = format!(
            "LIST prefix='{}' continuationToken='{}'",
            prefix.unwrap_or_default(),
            continuation_token.as_deref().unwrap_or_default()
        );

        let page = with_retry(retry, &description, || {
            store.list_objects_page(bucket, prefix, continuation_token.as_deref())
        })
        .await
        .map_err(|source| MigrationError::List {
            bucket: bucket.to_string(),
            prefix: prefix.unwrap_or_default().to_string(),
            source,
        })?;

        debug!(bucket, items = page.items.len(), "Fetched listing page");

        if page.items.is_empty() {
            break;
        }
        objects.extend(page.items);

        match page.continuation_token {
            Some(token) => continuation_token = Some(token),
            None => break,
        }
    }

    Ok(objects)
}
