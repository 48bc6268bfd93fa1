use crate::documents::{DocumentLookup, DocumentStore};
use crate::error::MigrationError;
use crate::progress::Console;
use crate::retry::{RetryPolicy, with_retry};
use crate::store::ObjectStore;
use mongodb::bson::{Bson, Document, doc};
use tracing::warn;

/// Collections whose records carry the `size` of the object behind their `url`.
const SIZED_COLLECTIONS: [(&str, &str); 3] = [
    ("roomMediaItems", "Rooms"),
    ("mediaLibraryItems", "Media Library"),
    ("documentInputMediaItems", "Document input"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionReport {
    pub sizes_corrected: usize,
    pub users_corrected: usize,
}

fn number(value: Option<&Bson>) -> i64 {
    match value {
        Some(Bson::Int32(v)) => i64::from(*v),
        Some(Bson::Int64(v)) => *v,
        Some(Bson::Double(v)) => *v as i64,
        _ => 0,
    }
}

/// Fix media records stored with a zero size, then recompute the storage
/// usage of every user on a storage plan.
pub async fn correct_sizes(
    store: &dyn ObjectStore,
    bucket: &str,
    documents: &dyn DocumentStore,
    retry: &RetryPolicy,
    console: &Console,
) -> Result<CorrectionReport, MigrationError> {
    let lookup = DocumentLookup::new(documents, retry);
    let mut report = CorrectionReport::default();

    for (collection, label) in SIZED_COLLECTIONS {
        let records = lookup.find_all(collection, doc! { "size": 0 }).await?;
        console.line(format!(
            "Found {} {collection} record(s) to correct.",
            records.len()
        ));

        for mut record in records {
            let Some(key) = record
                .get_str("url")
                .ok()
                .and_then(|url| url.strip_prefix("cdn://"))
                .map(str::to_string)
            else {
                warn!(collection, id = ?record.get("_id"), "Record has no portable url");
                continue;
            };

            let description = format!("HEAD {key}");
            let head = with_retry(retry, &description, || store.head_object(bucket, &key)).await?;
            record.insert("size", head.content_length);
            lookup.replace(collection, &record).await?;

            report.sizes_corrected += 1;
            console.line(format!(
                "{label} - Corrected {key} size to {}",
                head.content_length
            ));
        }
    }

    let users: Vec<Document> = lookup
        .find_all("users", doc! {})
        .await?
        .into_iter()
        .filter(|user| {
            user.get_document("storage")
                .is_ok_and(|storage| storage.get("planId").is_some_and(|plan| plan != &Bson::Null))
        })
        .collect();
    console.line(format!("Found {} users with storage.", users.len()));

    for mut user in users {
        let Some(user_id) = user.get("_id").cloned() else {
            continue;
        };
        let actual = used_bytes(&lookup, &user_id).await?;
        let Ok(storage) = user.get_document_mut("storage") else {
            continue;
        };
        let recorded = number(storage.get("usedBytes"));
        if recorded == actual {
            continue;
        }

        storage.insert("usedBytes", actual);
        console.line(format!(
            "Correcting user {user_id} used bytes from {recorded} to {actual}"
        ));
        lookup.replace("users", &user).await?;
        report.users_corrected += 1;
    }

    Ok(report)
}

/// Bytes used by the media of every room the user owns.
async fn used_bytes(lookup: &DocumentLookup<'_>, user_id: &Bson) -> Result<i64, MigrationError> {
    let rooms = lookup
        .find_all("rooms", doc! { "ownedBy": user_id.clone() })
        .await?;

    let mut total = 0;
    for room in rooms {
        let Some(room_id) = room.get("_id").cloned() else {
            continue;
        };
        for collection in ["roomMediaItems", "documentInputMediaItems"] {
            let items = lookup
                .find_all(collection, doc! { "roomId": room_id.clone() })
                .await?;
            total += items
                .iter()
                .map(|item| number(item.get("size")))
                .sum::<i64>();
        }
    }
    Ok(total)
}
