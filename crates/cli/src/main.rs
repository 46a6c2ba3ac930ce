use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::Context;
use archive::{FolderArchive, ZipArchive};
use clap::Parser;
use core_model::ArchiveSource;
use store_sqlite::SqliteStore;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser)]
#[command(name = "slack-archive")]
#[command(about = "Import Slack exports into SQLite and browse them over HTTP")]
struct Cli {
    /// Import an unpacked export directory.
    #[arg(short, long, conflicts_with = "zip")]
    dir: Option<PathBuf>,
    /// Import an export zip file.
    #[arg(short, long)]
    zip: Option<PathBuf>,
    #[arg(long)]
    db: Option<PathBuf>,
    #[arg(long)]
    bind: Option<String>,
    /// Directory holding the browser viewer (`index.html` and its assets).
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let t = Instant::now();

    let db = config.database_path(cli.db);
    info!(path = %db.display(), "opening database");
    let store = SqliteStore::create(&db)?;
    store.init_schema()?;

    let source: Option<Box<dyn ArchiveSource>> = match (cli.dir, cli.zip) {
        (Some(dir), _) => Some(Box::new(FolderArchive::open(dir)?)),
        (None, Some(zip)) => Some(Box::new(ZipArchive::open(zip)?)),
        (None, None) => None,
    };

    match source {
        Some(source) => {
            let summary = ingest::import_archive(source.as_ref(), &store, |phase| {
                debug!(?phase, "import phase")
            })
            .with_context(|| format!("importing {}", source.describe()))?;
            info!(
                channels = summary.channels,
                messages = summary.messages,
                users = summary.users,
                elapsed = ?t.elapsed(),
                "imported"
            );
        }
        None => {
            let bind = config.bind(cli.bind);
            let static_dir = config.static_dir(cli.static_dir);
            tokio::runtime::Runtime::new()
                .context("failed to start async runtime")?
                .block_on(server::serve(Arc::new(store), &bind, static_dir))?;
        }
    }
    Ok(())
}
