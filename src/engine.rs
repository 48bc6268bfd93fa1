use crate::cleanup;
use crate::documents::{DocumentLookup, DocumentStore};
use crate::error::MigrationError;
use crate::lister::list_all;
use crate::model::{MigrationOutcome, MigrationTask, RecordWrite, RemoteObject, RunReport};
use crate::policy::{TransformPolicy, plan_tasks};
use crate::progress::{Console, progress_line, task_bar};
use crate::queue::{self, TaskWorker};
use crate::retry::{RetryPolicy, with_retry};
use crate::store::ObjectStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Knobs for one engine run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub source_bucket: String,
    /// Defaults to the source bucket.
    pub destination_bucket: Option<String>,
    pub concurrency: usize,
    pub dry_run: bool,
    pub quiet: bool,
    pub retry: RetryPolicy,
}

impl EngineConfig {
    pub fn new(source_bucket: impl Into<String>, concurrency: usize) -> Self {
        Self {
            source_bucket: source_bucket.into(),
            destination_bucket: None,
            concurrency,
            dry_run: false,
            quiet: false,
            retry: RetryPolicy::default(),
        }
    }

    pub fn destination_bucket(&self) -> &str {
        self.destination_bucket
            .as_deref()
            .unwrap_or(&self.source_bucket)
    }
}

/// Lists, plans, migrates and cleans up according to one transform policy.
pub struct MigrationEngine {
    config: EngineConfig,
    source: Arc<dyn ObjectStore>,
    /// Set when the destination lives in another account.
    destination: Option<Arc<dyn ObjectStore>>,
    documents: Option<Arc<dyn DocumentStore>>,
    policy: Arc<dyn TransformPolicy>,
}

impl MigrationEngine {
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn ObjectStore>,
        policy: Arc<dyn TransformPolicy>,
    ) -> Self {
        Self {
            config,
            source,
            destination: None,
            documents: None,
            policy,
        }
    }

    /// Stream objects into a store of a different account instead of copying server-side.
    pub fn with_destination_store(mut self, destination: Arc<dyn ObjectStore>) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Run the migration end to end.
    ///
    /// Setup failures (listing, preloading) are returned as errors. Task
    /// failures are not: they show up in the report with `error_occurred` set,
    /// and the cleanup pass is skipped.
    pub async fn run(&self) -> Result<RunReport, MigrationError> {
        let config = &self.config;
        let startup = Console::plain(config.quiet);

        startup.line(format!(
            "Listing all objects from source: '{}'",
            config.source_bucket
        ));
        let objects = list_all(
            self.source.as_ref(),
            &config.source_bucket,
            self.policy.listing_prefix(),
            &config.retry,
        )
        .await?;

        if let Some(documents) = &self.documents {
            let lookup = DocumentLookup::new(documents.as_ref(), &config.retry);
            self.policy.prepare(&lookup).await?;
        }

        let listed = objects.len();
        let (tasks, skipped) = plan_tasks(self.policy.as_ref(), objects);
        info!(
            policy = self.policy.name(),
            listed,
            tasks = tasks.len(),
            skipped,
            "Planned migration"
        );

        if config.dry_run {
            startup.line("🚨 DRY RUN MODE: No data will be modified.");
        }
        startup.line(format!(
            "Migrating {} objects from '{}' to '{}'",
            tasks.len(),
            config.source_bucket,
            config.destination_bucket()
        ));

        let bar = task_bar(tasks.len(), config.quiet);
        let runner = TaskRunner {
            source: self.source.clone(),
            destination: self.destination.clone(),
            documents: self.documents.clone(),
            policy: self.policy.clone(),
            source_bucket: config.source_bucket.clone(),
            destination_bucket: config.destination_bucket().to_string(),
            retry: config.retry.clone(),
            dry_run: config.dry_run,
            total: tasks.len(),
            console: Console::new(bar.clone(), config.quiet),
        };

        let queue_run = queue::run(tasks, config.concurrency, Arc::new(runner), bar.clone()).await;
        bar.finish_and_clear();

        let mut report = queue_run.report.clone();
        report.skipped = skipped;

        if report.error_occurred {
            error!(
                failed = report.failed,
                cancelled = report.cancelled,
                "Migration cancelled"
            );
            startup.line(report.summary_line());
            return Ok(report);
        }

        if self.policy.removes_source() && !config.dry_run {
            let originals = self.removable_sources(queue_run.succeeded_tasks());
            startup.line(format!(
                "Deleting {} old objects within S3 on '{}'",
                originals.len(),
                config.source_bucket
            ));
            let cleanup = cleanup::delete_all(
                self.source.as_ref(),
                &config.source_bucket,
                &originals,
                config.concurrency,
                &config.retry,
            )
            .await;
            report.deleted = cleanup.deleted;
            report.delete_failures = cleanup.failed.len();
            for key in &cleanup.failed {
                startup.line(format!("Could not delete '{key}'"));
            }
        }

        startup.line(report.summary_line());
        Ok(report)
    }

    /// Sources that may go once their copy exists. An object migrated onto
    /// itself is never deleted.
    fn removable_sources<'a>(
        &self,
        migrated: impl Iterator<Item = &'a MigrationTask>,
    ) -> Vec<RemoteObject> {
        let same_place = self.destination.is_none()
            && self.config.destination_bucket() == self.config.source_bucket;
        migrated
            .filter(|task| !(same_place && task.destination_key == task.source.key))
            .map(|task| task.source.clone())
            .collect()
    }
}

/// The per-task worker handed to the queue.
struct TaskRunner {
    source: Arc<dyn ObjectStore>,
    destination: Option<Arc<dyn ObjectStore>>,
    documents: Option<Arc<dyn DocumentStore>>,
    policy: Arc<dyn TransformPolicy>,
    source_bucket: String,
    destination_bucket: String,
    retry: RetryPolicy,
    dry_run: bool,
    total: usize,
    console: Console,
}

impl TaskRunner {
    async fn migrate(&self, task: &MigrationTask) -> Result<Option<RecordWrite>, MigrationError> {
        if self.policy.moves_objects() {
            if self.dry_run {
                self.console.line(format!(
                    "   [Dry Run] Would write s3://{}/{}",
                    self.destination_bucket, task.destination_key
                ));
            } else {
                self.move_object(task).await?;
            }
        }

        let Some(documents) = &self.documents else {
            return Ok(None);
        };
        let lookup = DocumentLookup::new(documents.as_ref(), &self.retry);
        let Some(plan) = self.policy.build_record(task, &lookup).await? else {
            return Ok(None);
        };

        if self.dry_run {
            self.console.line(format!(
                "   [Dry Run] Would upsert {} {}",
                plan.collection, plan.key_value
            ));
            return Ok(None);
        }

        let upserted = lookup.upsert(&plan).await?;
        let record = RecordWrite {
            id: upserted.record_id(),
            created: upserted.created,
        };
        debug!(
            key = %task.source.key,
            collection = %plan.collection,
            id = %record.id,
            created = record.created,
            "Upserted record"
        );
        Ok(Some(record))
    }

    async fn move_object(&self, task: &MigrationTask) -> Result<(), MigrationError> {
        let source = self.source.as_ref();
        let source_bucket = self.source_bucket.as_str();
        let source_key = task.source.key.as_str();
        let destination_bucket = self.destination_bucket.as_str();
        let destination_key = task.destination_key.as_str();
        let rewrite = task.metadata.rewrite();

        match &self.destination {
            None => {
                let description = format!("COPY {source_key} -> {destination_key}");
                with_retry(&self.retry, &description, || {
                    source.copy_object(
                        source_bucket,
                        source_key,
                        destination_bucket,
                        destination_key,
                        rewrite.clone(),
                    )
                })
                .await?;
            }
            Some(destination) => {
                // A consumed stream cannot be replayed, so each attempt starts from HEAD
                let destination = destination.as_ref();
                let rewrite = rewrite.as_ref();
                let description = format!("STREAM {source_key} -> {destination_key}");
                with_retry(&self.retry, &description, move || async move {
                    let mut head = source.head_object(source_bucket, source_key).await?;
                    if let Some(rewrite) = rewrite {
                        head.content_type = Some(rewrite.content_type.clone());
                        head.metadata = rewrite.metadata.clone();
                    }
                    let body = source.get_object_stream(source_bucket, source_key).await?;
                    destination
                        .put_object_stream(destination_bucket, destination_key, body, &head)
                        .await
                })
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskWorker for TaskRunner {
    async fn process(&self, task: MigrationTask) -> MigrationOutcome {
        self.console.line(progress_line(
            task.sequence_index,
            self.total,
            self.policy.action(),
            &task.source.key,
        ));

        match self.migrate(&task).await {
            Ok(record) => MigrationOutcome::success(task, record),
            Err(err) => MigrationOutcome::failure(task, err),
        }
    }
}
