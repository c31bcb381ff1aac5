//! packstore maintenance tool
//!
//! One-shot batch operations against a packed store.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use packstore::blob::path;
use packstore::maintenance::{Collector, Compactor, Reindexer};
use packstore::{MetaIndex, StoreConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// packstore maintenance tool
#[derive(Parser, Debug)]
#[command(name = "packstore")]
#[command(about = "Maintenance passes for a packed blob store")]
#[command(version)]
struct Args {
    /// Metadata index database (defaults to <dir>/index.db)
    #[arg(short, long, env = "PACKSTORE_INDEX", global = true)]
    index: Option<PathBuf>,

    /// Extension of single-piece files
    #[arg(long, default_value = "sj1", global = true)]
    extension: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the index from a one-file-per-piece tree
    Reindex {
        /// Store directory holding the {ns}/{prefix}/{rest} tree
        dir: PathBuf,
    },

    /// Pack all live pieces into one new file
    Compact {
        /// Store directory
        dir: PathBuf,

        /// Name of the new file, relative to the store directory
        file: String,
    },

    /// Delete files no piece references anymore
    Clean {
        /// Store directory
        dir: PathBuf,
    },

    /// Print usage per namespace and dead space
    Stat {
        /// Store directory
        #[arg(default_value = "./packstore_data")]
        dir: PathBuf,
    },
}

impl Commands {
    fn dir(&self) -> &PathBuf {
        match self {
            Commands::Reindex { dir }
            | Commands::Compact { dir, .. }
            | Commands::Clean { dir }
            | Commands::Stat { dir } => dir,
        }
    }
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,packstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> packstore::Result<()> {
    let dir = args.command.dir().clone();
    let index_path = args.index.unwrap_or_else(|| dir.join("index.db"));

    tracing::info!("packstore v{}", packstore::VERSION);
    tracing::info!("Store directory: {}", dir.display());
    tracing::info!("Index: {}", index_path.display());

    let config = StoreConfig::builder()
        .store_dir(&dir)
        .index_path(&index_path)
        .file_extension(&args.extension)
        .build();
    config.validate()?;
    let index = Arc::new(MetaIndex::open(&config)?);

    match args.command {
        Commands::Reindex { .. } => {
            let report = Reindexer::new(&dir, &args.extension, Arc::clone(&index)).run()?;
            println!(
                "indexed {} pieces ({} bytes), skipped {} files",
                report.pieces_indexed, report.bytes_indexed, report.files_skipped
            );
        }
        Commands::Compact { file, .. } => {
            let report = Compactor::new(&dir, Arc::clone(&index)).run(&file)?;
            println!(
                "moved {} pieces ({} bytes) into {}, skipped {}",
                report.pieces_moved,
                report.bytes_copied,
                report.destination,
                report.pieces_skipped
            );
        }
        Commands::Clean { .. } => {
            let report = Collector::new(&dir, Arc::clone(&index)).run()?;
            println!(
                "removed {} files ({} bytes), {} already missing, {} extents dropped",
                report.files_removed,
                report.bytes_reclaimed,
                report.files_missing,
                report.extents_removed
            );
        }
        Commands::Stat { .. } => print_stat(&index)?,
    }

    match Arc::try_unwrap(index) {
        Ok(index) => index.close(),
        Err(_) => Ok(()),
    }
}

fn print_stat(index: &MetaIndex) -> packstore::Result<()> {
    let mut live_pieces = 0;
    let mut live_bytes = 0;
    let mut trashed_bytes = 0;

    println!(
        "{:<40} {:>10} {:>14} {:>10} {:>14}",
        "namespace", "pieces", "bytes", "trashed", "trash bytes"
    );
    for usage in index.namespace_usage()? {
        println!(
            "{:<40} {:>10} {:>14} {:>10} {:>14}",
            path::encode_component(&usage.namespace),
            usage.live_pieces,
            usage.live_bytes,
            usage.trashed_pieces,
            usage.trashed_bytes
        );
        live_pieces += usage.live_pieces;
        live_bytes += usage.live_bytes;
        trashed_bytes += usage.trashed_bytes;
    }

    let extents = index.extent_usage()?;
    println!();
    println!("live pieces:      {live_pieces} ({live_bytes} bytes)");
    println!("trashed bytes:    {trashed_bytes}");
    println!("files:            {}", extents.files);
    println!("extents:          {}", extents.extents);
    println!(
        "orphaned extents: {} ({} bytes)",
        extents.orphaned_extents, extents.orphaned_bytes
    );
    Ok(())
}
