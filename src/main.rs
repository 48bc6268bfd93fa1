use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod args;
mod cleanup;
mod config;
mod correct;
mod documents;
mod dump;
mod engine;
mod error;
mod lister;
mod model;
mod policy;
mod progress;
mod queue;
mod retry;
mod s3_store;
mod store;
mod unique_id;

#[cfg(test)]
mod testing;

use app::{MigrateApp, RekeyRequest};
use args::{Args, Command, MAX_CONCURRENCY};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    config::load_dotenv();
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();
    let concurrency = args
        .concurrency
        .unwrap_or_else(|| args.command.default_concurrency());

    // Validate concurrency
    if concurrency == 0 || concurrency > MAX_CONCURRENCY {
        return Err(anyhow::anyhow!(
            "Concurrency must be between 1 and {}",
            MAX_CONCURRENCY
        ));
    }

    let app = MigrateApp::new(concurrency, args.max_attempts, args.quiet, args.dry_run);

    let result = match args.command {
        Command::Copy {
            from,
            to,
            db_only,
            skip_large,
        } => app.copy(&from, &to, db_only, skip_large).await,
        Command::Dump { from } => app.dump(&from).await,
        Command::Prune { on } => app.prune(&on).await,
        Command::MigrateDocumentMedia { on } => app.migrate_document_media(&on).await,
        Command::MigrateRoomMedia { on } => app.migrate_room_media(&on).await,
        Command::Rekey {
            on,
            source_prefix,
            destination_prefix,
            destination_bucket,
            collection,
            rewrite_metadata,
        } => {
            app.rekey(RekeyRequest {
                env: on,
                source_prefix,
                destination_prefix,
                destination_bucket,
                collection,
                rewrite_metadata,
            })
            .await
        }
        Command::CorrectSizes { env } => app.correct_sizes(&env).await,
    };

    match result {
        Ok(()) => {
            if !app.quiet {
                println!("\n🎉 Finished successfully!");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            Err(e)
        }
    }
}
