use clap::{Parser, Subcommand};

pub const DEFAULT_COPY_CONCURRENCY: usize = 10;
pub const DEFAULT_DOCUMENT_MEDIA_CONCURRENCY: usize = 10;
pub const DEFAULT_ROOM_MEDIA_CONCURRENCY: usize = 20;
pub const MAX_CONCURRENCY: usize = 1000;

/// CLI arguments for the environment migration tool
#[derive(Parser, Debug)]
#[command(name = "s3_migrate")]
#[command(author, version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_AUTHORS"), ")"), about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Number of objects migrated in parallel (default depends on the command)
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Attempts per remote operation before a task fails
    #[arg(long, global = true, default_value_t = crate::retry::DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: u32,

    /// Suppress informational output and progress bars
    #[arg(short, long, global = true, default_value_t = false)]
    pub quiet: bool,

    /// Perform a dry run without modifying any data
    #[arg(long, global = true, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Copy the database and the bucket of one environment into another
    Copy {
        /// Source environment (reads DB_URI_<ENV>, S3_BUCKET_NAME_<ENV>, ...)
        #[arg(long)]
        from: String,

        /// Destination environment; its database and bucket are overwritten
        #[arg(long)]
        to: String,

        /// Only dump and restore the database
        #[arg(long, default_value_t = false)]
        db_only: bool,

        /// Do not copy objects larger than 2 MB
        #[arg(long, default_value_t = false)]
        skip_large: bool,
    },

    /// Dump the database of an environment into ./dump
    Dump {
        #[arg(long)]
        from: String,
    },

    /// Drop every collection and delete every object of an environment
    Prune {
        #[arg(long)]
        on: String,
    },

    /// Move document media into the media library and create library records
    MigrateDocumentMedia {
        #[arg(long)]
        on: String,
    },

    /// Create room media records for every object under room-media/
    MigrateRoomMedia {
        #[arg(long)]
        on: String,
    },

    /// Move every object under one prefix to another prefix
    Rekey {
        #[arg(long)]
        on: String,

        #[arg(long)]
        source_prefix: String,

        #[arg(long)]
        destination_prefix: String,

        /// Bucket receiving the objects (defaults to the environment's bucket)
        #[arg(long)]
        destination_bucket: Option<String>,

        /// Upsert one record per moved object into this collection
        #[arg(long)]
        collection: Option<String>,

        /// Replace content type and metadata with values derived from the file name
        #[arg(long, default_value_t = false)]
        rewrite_metadata: bool,
    },

    /// Fix media records stored with a zero size and recompute user storage
    CorrectSizes {
        #[arg(long)]
        env: String,
    },
}

impl Command {
    pub fn default_concurrency(&self) -> usize {
        match self {
            Command::MigrateRoomMedia { .. } => DEFAULT_ROOM_MEDIA_CONCURRENCY,
            Command::MigrateDocumentMedia { .. } => DEFAULT_DOCUMENT_MEDIA_CONCURRENCY,
            _ => DEFAULT_COPY_CONCURRENCY,
        }
    }
}
