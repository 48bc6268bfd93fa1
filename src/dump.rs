//! Database dump and restore through the `mongotools` docker image.

use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::info;

const IMAGE: &str = "mongotools";
const CONTAINER_DUMP_DIR: &str = "/mongodump";
const BUILD_CONTEXT_DIR: &str = "mongotools";

/// Overrides where the image's Dockerfile is looked up.
pub const BUILD_CONTEXT_VAR: &str = "MONGOTOOLS_DIR";

/// Runs `mongodump`/`mongorestore` in a container with `directory` mounted.
pub struct MongoTools {
    directory: PathBuf,
    build_context: PathBuf,
    image_built: OnceCell<()>,
}

impl MongoTools {
    pub fn new(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = std::path::absolute(directory.as_ref())
            .with_context(|| format!("Invalid dump directory {}", directory.as_ref().display()))?;
        let cwd = std::env::current_dir().context("Cannot read the working directory")?;
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        let build_context = resolve_build_context(
            std::env::var_os(BUILD_CONTEXT_VAR).map(PathBuf::from),
            exe_dir.as_deref(),
            &cwd,
            |path| path.join("Dockerfile").is_file(),
        );
        info!(build_context = %build_context.display(), "Using mongotools image context");
        Ok(Self {
            directory,
            build_context,
            image_built: OnceCell::new(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Dump every collection of `db` into `<directory>/<db>`.
    pub async fn dump(&self, uri: &str, db: &str) -> Result<()> {
        self.ensure_image().await?;
        let user = user_and_group().await?;
        info!(user = %user, "Running with user ID and group ID");

        let local_dir = self.directory.join(db);
        info!(directory = %local_dir.display(), "Purging dump directory");
        match tokio::fs::remove_dir_all(&local_dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to purge {}", local_dir.display()));
            }
        }
        tokio::fs::create_dir_all(&local_dir)
            .await
            .with_context(|| format!("Failed to create {}", local_dir.display()))?;

        run_command("docker", &dump_args(&user, &self.directory, uri)).await
    }

    /// Restore the dump of `from_db` into `to_db`, dropping existing collections.
    pub async fn restore(&self, uri: &str, from_db: &str, to_db: &str) -> Result<()> {
        self.ensure_image().await?;
        let user = user_and_group().await?;
        info!(user = %user, "Running with user ID and group ID");

        run_command(
            "docker",
            &restore_args(&user, &self.directory, uri, from_db, to_db),
        )
        .await
    }

    async fn ensure_image(&self) -> Result<()> {
        self.image_built
            .get_or_try_init(|| async {
                let args = vec![
                    "build".to_string(),
                    "-t".to_string(),
                    IMAGE.to_string(),
                    self.build_context.display().to_string(),
                ];
                run_command("docker", &args).await
            })
            .await?;
        Ok(())
    }
}

/// Picks the image build context: the explicit override, then a `mongotools`
/// directory shipped next to the executable, then one in the working directory.
fn resolve_build_context(
    explicit: Option<PathBuf>,
    exe_dir: Option<&Path>,
    cwd: &Path,
    has_dockerfile: impl Fn(&Path) -> bool,
) -> PathBuf {
    if let Some(explicit) = explicit.filter(|path| !path.as_os_str().is_empty()) {
        return explicit;
    }
    exe_dir
        .map(|dir| dir.join(BUILD_CONTEXT_DIR))
        .filter(|candidate| has_dockerfile(candidate))
        .unwrap_or_else(|| cwd.join(BUILD_CONTEXT_DIR))
}

/// `docker run` arguments shared by dump and restore.
fn container_args(user: &str, directory: &Path) -> Vec<String> {
    vec![
        "run".into(),
        "--rm".into(),
        "--user".into(),
        user.into(),
        "-v".into(),
        format!("{}:{CONTAINER_DUMP_DIR}", directory.display()),
        IMAGE.into(),
    ]
}

pub fn dump_args(user: &str, directory: &Path, uri: &str) -> Vec<String> {
    let mut args = container_args(user, directory);
    args.extend([
        "mongodump".into(),
        "--uri".into(),
        uri.into(),
        "--out".into(),
        CONTAINER_DUMP_DIR.into(),
    ]);
    args
}

pub fn restore_args(
    user: &str,
    directory: &Path,
    uri: &str,
    from_db: &str,
    to_db: &str,
) -> Vec<String> {
    let mut args = container_args(user, directory);
    args.extend([
        "mongorestore".into(),
        "--drop".into(),
        "--uri".into(),
        uri.into(),
        "--db".into(),
        to_db.into(),
        "--nsFrom".into(),
        from_db.into(),
        "--nsTo".into(),
        to_db.into(),
        format!("{CONTAINER_DUMP_DIR}/{from_db}"),
    ]);
    args
}

/// `uid:gid` of the current user, so dump files are not owned by root.
async fn user_and_group() -> Result<String> {
    let user = capture("id", "-u").await?;
    let group = capture("id", "-g").await?;
    Ok(format!("{user}:{group}"))
}

async fn capture(cmd: &str, arg: &str) -> Result<String> {
    let output = Command::new(cmd)
        .arg(arg)
        .output()
        .await
        .with_context(|| format!("Failed to run {cmd} {arg}"))?;
    if !output.status.success() {
        return Err(anyhow!("{cmd} {arg} exited with {}", output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Runs `cmd` with inherited stdio; a non-zero exit is an error.
async fn run_command(cmd: &str, args: &[String]) -> Result<()> {
    // Connection strings carry credentials
    let printable: Vec<String> = args
        .iter()
        .map(|arg| {
            if arg.starts_with("mongodb://") || arg.starts_with("mongodb+srv://") {
                "<uri>".to_string()
            } else {
                arg.clone()
            }
        })
        .collect();
    info!(command = %format!("{cmd} {}", printable.join(" ")), "Running external command");

    let status = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .status()
        .await
        .with_context(|| format!("Failed to spawn {cmd}"))?;

    if !status.success() {
        return Err(anyhow!("{cmd} {} exited with {status}", printable.join(" ")));
    }
    Ok(())
}
