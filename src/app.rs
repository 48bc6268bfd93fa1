use crate::cleanup::{self, CleanupReport};
use crate::config::EnvironmentConfig;
use crate::correct;
use crate::documents::{DocumentStore, MongoDocumentStore};
use crate::dump::MongoTools;
use crate::engine::{EngineConfig, MigrationEngine};
use crate::lister::list_all;
use crate::model::RunReport;
use crate::policy::{
    DocumentMediaPolicy, MirrorPolicy, RekeyPolicy, RoomMediaPolicy, TransformPolicy,
};
use crate::progress::Console;
use crate::retry::{RetryPolicy, with_retry};
use crate::s3_store::S3ObjectStore;
use crate::store::ObjectStore;
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use tracing::info;

const DUMP_DIRECTORY: &str = "./dump";

/// Arguments of the `rekey` command.
#[derive(Debug, Clone)]
pub struct RekeyRequest {
    pub env: String,
    pub source_prefix: String,
    pub destination_prefix: String,
    pub destination_bucket: Option<String>,
    pub collection: Option<String>,
    pub rewrite_metadata: bool,
}

/// Main application structure
#[derive(Clone)]
pub struct MigrateApp {
    concurrency: usize,
    retry: RetryPolicy,
    pub quiet: bool,
    pub dry_run: bool,
}

impl MigrateApp {
    pub fn new(concurrency: usize, max_attempts: u32, quiet: bool, dry_run: bool) -> Self {
        Self {
            concurrency,
            retry: RetryPolicy::default().with_max_attempts(max_attempts),
            quiet,
            dry_run,
        }
    }

    fn console(&self) -> Console {
        Console::plain(self.quiet)
    }

    fn engine_config(&self, bucket: &str) -> EngineConfig {
        let mut config = EngineConfig::new(bucket, self.concurrency);
        config.dry_run = self.dry_run;
        config.quiet = self.quiet;
        config.retry = self.retry.clone();
        config
    }

    fn print_header(&self, title: &str, environments: &[&EnvironmentConfig]) -> Result<()> {
        if self.quiet {
            return Ok(());
        }
        println!("\n=== {title} ===");
        for env in environments {
            println!("{}", serde_json::to_string_pretty(&env.summary())?);
        }
        println!("Concurrency: {} objects", self.concurrency);
        println!("=========================\n");
        if self.dry_run {
            println!("🚨 DRY RUN MODE: No data will be modified.");
        }
        Ok(())
    }

    async fn object_store(&self, env: &EnvironmentConfig) -> Arc<dyn ObjectStore> {
        Arc::new(S3ObjectStore::connect(&env.storage, self.concurrency).await)
    }

    async fn document_store(&self, env: &EnvironmentConfig) -> Result<Arc<dyn DocumentStore>> {
        let store = MongoDocumentStore::connect(&env.database.uri, env.database.name.as_deref())
            .await
            .with_context(|| {
                format!("Failed to connect to {}", env.database.safe_uri())
            })?;
        Ok(Arc::new(store))
    }

    /// Copy database and bucket of `from` into `to`.
    pub async fn copy(&self, from: &str, to: &str, db_only: bool, skip_large: bool) -> Result<()> {
        let source = EnvironmentConfig::from_env(from, true)?;
        let destination = EnvironmentConfig::from_env(to, true)?;
        self.print_header("Environment Copy", &[&source, &destination])?;

        let console = self.console();
        let (Some(source_db), Some(destination_db)) =
            (&source.database.name, &destination.database.name)
        else {
            return Err(anyhow!("Database names are required for a copy"));
        };

        if self.dry_run {
            console.line(format!(
                "[Dry Run] Would dump '{source_db}' and restore it into '{destination_db}'"
            ));
        } else {
            let tools = MongoTools::new(DUMP_DIRECTORY)?;
            tools
                .dump(&source.database.uri, source_db)
                .await
                .context("Database dump failed")?;
            tools
                .restore(&destination.database.uri, source_db, destination_db)
                .await
                .context("Database restore failed")?;
        }

        if db_only {
            console.line("SUCCESSFULLY FINISHED!");
            return Ok(());
        }

        let same_account = source.storage.same_account(&destination.storage);
        let source_store = self.object_store(&source).await;
        let destination_store = if same_account {
            source_store.clone()
        } else {
            self.object_store(&destination).await
        };

        let destination_bucket = destination.storage.bucket.as_str();
        console.line(format!(
            "Deleting old objects from destination: '{destination_bucket}'"
        ));
        if self.dry_run {
            let old = list_all(destination_store.as_ref(), destination_bucket, None, &self.retry)
                .await?;
            console.line(format!("[Dry Run] Would delete {} objects", old.len()));
        } else {
            let emptied = cleanup::empty_bucket(
                destination_store.as_ref(),
                destination_bucket,
                self.concurrency,
                &self.retry,
            )
            .await?;
            ensure_cleaned(destination_bucket, &emptied)?;
        }

        console.line(format!(
            "Copying objects {}",
            if same_account {
                "within S3"
            } else {
                "between S3 accounts"
            }
        ));

        let mut config = self.engine_config(&source.storage.bucket);
        config.destination_bucket = Some(destination_bucket.to_string());
        let policy: Arc<dyn TransformPolicy> = Arc::new(MirrorPolicy::new(skip_large));
        let mut engine = MigrationEngine::new(config, source_store, policy);
        if !same_account {
            engine = engine.with_destination_store(destination_store);
        }

        let report = engine.run().await?.into_result()?;
        info!(copied = report.succeeded, skipped = report.skipped, "Bucket copied");
        console.line("SUCCESSFULLY FINISHED!");
        Ok(())
    }

    /// Dump the database of `from` into the local dump directory.
    pub async fn dump(&self, from: &str) -> Result<()> {
        let env = EnvironmentConfig::from_env(from, true)?;
        self.print_header("Database Dump", &[&env])?;
        let db = env
            .database
            .name
            .as_deref()
            .ok_or_else(|| anyhow!("Database name is required for a dump"))?;

        if self.dry_run {
            self.console()
                .line(format!("[Dry Run] Would dump '{db}' into {DUMP_DIRECTORY}"));
            return Ok(());
        }

        let tools = MongoTools::new(DUMP_DIRECTORY)?;
        tools
            .dump(&env.database.uri, db)
            .await
            .context("Database dump failed")?;
        self.console()
            .line(format!("Dumped '{db}' into {}", tools.directory().display()));
        Ok(())
    }

    /// Drop all collections and delete all objects of `on`.
    pub async fn prune(&self, on: &str) -> Result<()> {
        let env = EnvironmentConfig::from_env(on, true)?;
        self.print_header("Prune Environment", &[&env])?;
        let console = self.console();

        let documents = self.document_store(&env).await?;
        let names = with_retry(&self.retry, "LIST COLLECTIONS", || documents.collection_names())
            .await?;
        for name in &names {
            if self.dry_run {
                console.line(format!("[Dry Run] Would drop collection {name}"));
                continue;
            }
            console.line(format!("Dropping collection {name}"));
            let description = format!("DROP {name}");
            with_retry(&self.retry, &description, || documents.delete_collection(name)).await?;
        }

        let objects = self.object_store(&env).await;
        let bucket = env.storage.bucket.as_str();
        if self.dry_run {
            let all = list_all(objects.as_ref(), bucket, None, &self.retry).await?;
            console.line(format!("[Dry Run] Would delete {} objects from '{bucket}'", all.len()));
            return Ok(());
        }

        let emptied =
            cleanup::empty_bucket(objects.as_ref(), bucket, self.concurrency, &self.retry).await?;
        ensure_cleaned(bucket, &emptied)?;
        console.line(format!(
            "Dropped {} collections and deleted {} objects",
            names.len(),
            emptied.deleted
        ));
        Ok(())
    }

    async fn run_with_documents(
        &self,
        env: &EnvironmentConfig,
        config: EngineConfig,
        policy: Arc<dyn TransformPolicy>,
    ) -> Result<RunReport> {
        let objects = self.object_store(env).await;
        let documents = self.document_store(env).await?;
        let report = MigrationEngine::new(config, objects, policy)
            .with_documents(documents)
            .run()
            .await?
            .into_result()?;
        Ok(report)
    }

    /// Move document media into the media library of `on`.
    pub async fn migrate_document_media(&self, on: &str) -> Result<()> {
        let env = EnvironmentConfig::from_env(on, false)?;
        self.print_header("Document Media Migration", &[&env])?;
        let config = self.engine_config(&env.storage.bucket);
        self.run_with_documents(&env, config, Arc::new(DocumentMediaPolicy::new()))
            .await?;
        Ok(())
    }

    /// Create or refresh the room media records of `on`.
    pub async fn migrate_room_media(&self, on: &str) -> Result<()> {
        let env = EnvironmentConfig::from_env(on, false)?;
        self.print_header("Room Media Records", &[&env])?;
        let config = self.engine_config(&env.storage.bucket);
        self.run_with_documents(&env, config, Arc::new(RoomMediaPolicy::new()))
            .await?;
        Ok(())
    }

    /// Move everything under one prefix to another.
    pub async fn rekey(&self, request: RekeyRequest) -> Result<()> {
        let env = EnvironmentConfig::from_env(&request.env, false)?;
        self.print_header("Re-key Objects", &[&env])?;

        let mut policy = RekeyPolicy::new(&request.source_prefix, &request.destination_prefix)
            .with_metadata_rewrite(request.rewrite_metadata);
        if let Some(collection) = &request.collection {
            policy = policy.with_collection(collection);
        }

        let mut config = self.engine_config(&env.storage.bucket);
        config.destination_bucket = request.destination_bucket.clone();

        if request.collection.is_some() {
            self.run_with_documents(&env, config, Arc::new(policy)).await?;
        } else {
            let objects = self.object_store(&env).await;
            MigrationEngine::new(config, objects, Arc::new(policy))
                .run()
                .await?
                .into_result()?;
        }
        Ok(())
    }

    /// Repair zero sizes in the media records of `env`.
    pub async fn correct_sizes(&self, env: &str) -> Result<()> {
        let env = EnvironmentConfig::from_env(env, false)?;
        self.print_header("Correct Media Sizes", &[&env])?;
        if self.dry_run {
            self.console()
                .line("[Dry Run] Size correction writes records, nothing to preview");
            return Ok(());
        }

        let objects = self.object_store(&env).await;
        let documents = self.document_store(&env).await?;
        let report = correct::correct_sizes(
            objects.as_ref(),
            &env.storage.bucket,
            documents.as_ref(),
            &self.retry,
            &self.console(),
        )
        .await?;
        self.console().line(format!(
            "Corrected {} record size(s) and {} user storage total(s)",
            report.sizes_corrected, report.users_corrected
        ));
        Ok(())
    }
}

/// Bucket emptying must be complete before new objects go in.
fn ensure_cleaned(bucket: &str, report: &CleanupReport) -> Result<()> {
    if report.failed.is_empty() {
        return Ok(());
    }
    Err(anyhow!(
        "Could not delete {} object(s) from '{bucket}': {}",
        report.failed.len(),
        report.failed.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_carries_run_flags() {
        let app = MigrateApp::new(7, 3, true, true);
        let config = app.engine_config("media");

        assert_eq!(config.source_bucket, "media");
        assert_eq!(config.destination_bucket(), "media");
        assert_eq!(config.concurrency, 7);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.dry_run);
        assert!(config.quiet);
    }

    #[test]
    fn incomplete_cleanup_is_an_error() {
        assert!(ensure_cleaned("media", &CleanupReport::default()).is_ok());

        let report = CleanupReport {
            deleted: 3,
            failed: vec!["a".to_string(), "b".to_string()],
        };
        let err = ensure_cleaned("media", &report).unwrap_err();
        assert_eq!(err.to_string(), "Could not delete 2 object(s) from 'media': a, b");
    }
}
