//! bucketdb CLI
//!
//! Read-only inspection of a bucketdb data directory.

use std::path::{Path, PathBuf};
use std::process;

use bucketdb::bucket::Bucket;
use bucketdb::bucket_list::BucketListState;
use bucketdb::index::{persist, IndexKind};
use bucketdb::{Config, Hash256, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// bucketdb CLI
#[derive(Parser, Debug)]
#[command(name = "bucketdb")]
#[command(about = "Inspect bucketdb levels, bucket files and index files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every level's buckets and entry counts
    Levels {
        /// Data directory
        #[arg(short, long, default_value = "./bucketdb_data")]
        data_dir: PathBuf,
    },

    /// Print a bucket file's header, footer and (optionally) its records
    Bucket {
        /// Path to a bucket-<hash>.bkt file
        file: PathBuf,

        /// Also print every record
        #[arg(short, long)]
        entries: bool,

        /// Recompute the record checksum
        #[arg(short, long)]
        verify: bool,
    },

    /// Print an index file's parameters and shape
    Index {
        /// Path to a bucket-<hash>.index file
        file: PathBuf,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,bucketdb=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Levels { data_dir } => print_levels(&data_dir),
        Commands::Bucket {
            file,
            entries,
            verify,
        } => print_bucket(&file, entries, verify),
        Commands::Index { file } => print_index(&file),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn print_levels(data_dir: &Path) -> Result<()> {
    let config = Config::builder().data_dir(data_dir).build();
    let Some(state) = BucketListState::load(&config.state_path())? else {
        println!("no bucket list in {}", data_dir.display());
        return Ok(());
    };

    println!("round {}", state.round);
    let bucket_dir = config.bucket_dir();
    for (level, level_state) in state.levels.iter().enumerate() {
        match &level_state.pending {
            Some(pending) => println!(
                "L{:<2} curr  merging {} + {}",
                level,
                short(&pending.newer),
                short(&pending.older)
            ),
            None => println!(
                "L{:<2} curr  {} {:>10}",
                level,
                short(&level_state.curr),
                entry_count(&bucket_dir, &level_state.curr)?
            ),
        }
        println!(
            "    snap  {} {:>10}",
            short(&level_state.snap),
            entry_count(&bucket_dir, &level_state.snap)?
        );
    }
    Ok(())
}

fn print_bucket(file: &Path, entries: bool, verify: bool) -> Result<()> {
    let hash = hash_from_file_name(file)?;
    let bucket = Bucket::open(file, hash)?;

    println!("hash      {}", bucket.hash());
    println!("entries   {}", bucket.entry_count());
    println!("size      {} bytes", bucket.file_size());
    if verify {
        let ok = bucket.verify_checksum()?;
        println!("checksum  {}", if ok { "ok" } else { "MISMATCH" });
    }
    if entries {
        for item in bucket.iter()? {
            let (offset, record) = item?;
            println!("{:>10}  {:?}", offset, record);
        }
    }
    Ok(())
}

fn print_index(file: &Path) -> Result<()> {
    let (hash, index) = persist::read_index_file(file)?;
    let fingerprint = index.fingerprint();

    println!("bucket        {}", hash);
    println!("version       {}", fingerprint.version);
    println!("page exponent {}", fingerprint.page_size_exponent);
    println!("cutoff        {} bytes", fingerprint.cutoff_bytes);
    println!("strategy      {:?}", index.strategy());
    println!(
        "records       {} live, {} dead",
        index.counters().live,
        index.counters().dead
    );
    println!("pool assets   {}", index.asset_pools().num_assets());
    match index.kind() {
        IndexKind::Individual(individual) => println!("keys          {}", individual.len()),
        IndexKind::Range(range) => {
            println!(
                "pages         {} x {} bytes",
                range.num_pages(),
                range.page_size()
            );
            match range.filter() {
                Some(filter) => println!("key filter    {} bytes", filter.size_bytes()),
                None => println!("key filter    none"),
            }
        }
    }
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn short(hash: &Hash256) -> String {
    if hash.is_zero() {
        "(empty)".to_string()
    } else {
        hash.to_hex()[..16].to_string()
    }
}

fn entry_count(bucket_dir: &Path, hash: &Hash256) -> Result<u64> {
    if hash.is_zero() {
        return Ok(0);
    }
    let path = bucket_dir.join(bucketdb::bucket::bucket_file_name(hash));
    Ok(Bucket::open(&path, *hash)?.entry_count())
}

/// "bucket-<hex>.bkt" → hash
fn hash_from_file_name(file: &Path) -> Result<Hash256> {
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    Hash256::from_hex(stem.strip_prefix("bucket-").unwrap_or(stem))
}
