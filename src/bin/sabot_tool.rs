//! Sabot Tool Binary
//!
//! Writes synthetic data files into a file volume and inspects them.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use sabot::disk::{Engine, FileEngine};
use sabot::layer::notification_channel;
use sabot::{Config, DataFile, DataFileReader, IndexId, MemoryLayer, Outcome, Update, Value};
use tracing_subscriber::{fmt, EnvFilter};

/// Sabot data file tool
#[derive(Parser, Debug)]
#[command(name = "sabot-tool")]
#[command(about = "Generate and inspect Sabot data files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a synthetic memory layer as a new data file
    Generate {
        /// Volume file (its catalog is stored next to it)
        #[arg(short, long)]
        volume: PathBuf,

        /// Distinct keys per index
        #[arg(short, long, default_value = "1000")]
        keys: u64,

        /// Logical indexes
        #[arg(short, long, default_value = "1")]
        indexes: u64,

        /// Older revisions written for every key
        #[arg(long, default_value = "0")]
        history: u64,

        /// Logical block size in bytes
        #[arg(short, long, default_value = "65536")]
        block_size: usize,
    },

    /// List the data files in a volume
    Inspect {
        /// Volume file
        #[arg(short, long)]
        volume: PathBuf,

        /// Logical block size in bytes
        #[arg(short, long, default_value = "65536")]
        block_size: usize,

        /// Print every current key
        #[arg(long)]
        dump_keys: bool,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sabot=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::info!("Sabot Tool v{}", sabot::VERSION);

    let result = match args.command {
        Commands::Generate {
            volume,
            keys,
            indexes,
            history,
            block_size,
        } => generate(&volume, keys, indexes, history, block_size),
        Commands::Inspect {
            volume,
            block_size,
            dump_keys,
        } => inspect(&volume, block_size, dump_keys),
    };

    if let Err(e) = result {
        tracing::error!("Command failed: {}", e);
        std::process::exit(1);
    }
}

fn generate(volume: &Path, keys: u64, indexes: u64, history: u64, block_size: usize) -> sabot::Result<()> {
    let config = Config::builder().block_size(block_size).build();
    let engine = FileEngine::open(volume, block_size)?;
    let file_id = engine.files().iter().map(|f| f.file_id + 1).max().unwrap_or(1);

    // One update per revision round; round 0 is the oldest
    let mut layer = MemoryLayer::new();
    let mut receivers = Vec::new();
    for round in 0..=history {
        let seq = file_id * 1_000_000 + round + 1;
        let (notifier, rx) = notification_channel();
        let mut update = Update::new(
            seq,
            &Value::record([("round", Value::UInt64(round))]),
            &Value::Uuid(uuid_for(seq)),
        )?
        .with_notifier(notifier);
        for index in 0..indexes {
            let index_id = IndexId::from_u128(index as u128 + 1);
            for key in 0..keys {
                let key_value = Value::tuple([Value::Int64(key as i64), Value::str(format!("k{:08}", key))]);
                let op = Value::str(format!("value-{}-{}", key, round));
                update.add_entry(index_id, &key_value, &op)?;
            }
        }
        layer.push(update);
        receivers.push(rx);
    }

    let file = DataFile::write(&engine, &mut layer, file_id, file_id, &config)?;
    let completed = receivers
        .iter()
        .filter(|rx| matches!(rx.try_recv(), Ok(Outcome::Completed)))
        .count();
    tracing::info!(
        file_id = file.file_id(),
        blocks = file.len() / block_size as u64,
        keys = file.num_keys(),
        history = file.num_hist_keys(),
        completed,
        "Generated data file"
    );
    Ok(())
}

fn inspect(volume: &Path, block_size: usize, dump_keys: bool) -> sabot::Result<()> {
    let config = Config::builder().block_size(block_size).build();
    let engine = FileEngine::open(volume, block_size)?;
    let files = engine.files();
    println!("{} data file(s) in {}", files.len(), volume.display());

    for info in &files {
        let reader = DataFileReader::for_file(engine.volume(), info, &config)?;
        println!(
            "file {} (gen {}): {} blocks, {} updates, {} current keys, {} history, seq {}..={}",
            info.file_id,
            info.gen_id,
            reader.block_count(),
            reader.num_updates(),
            reader.num_cur_keys(),
            reader.num_hist_keys(),
            reader.lowest_seq()?,
            reader.highest_seq()?,
        );
        println!(
            "  main arena: {} notes, {} bytes, {} type boundaries",
            reader.main_arena().note_count,
            reader.main_arena().byte_count,
            reader.main_arena().boundaries.len()
        );
        for index in reader.indexes() {
            println!(
                "  index {}: {} keys, {} history, {} arena notes",
                index.id(),
                index.num_cur_keys(),
                index.num_hist_keys(),
                index.arena().note_count
            );
            for (fields, (offset, size)) in index.hash_tables().iter().enumerate() {
                println!("    hash[{}]: {} slots at {}", fields + 1, size, offset);
            }
            if dump_keys {
                for item in index.current_keys()? {
                    println!(
                        "    @{} {:?} => {:?} ({} older)",
                        item.seq, item.key, item.value, item.num_hist
                    );
                }
            }
        }
    }
    Ok(())
}

fn uuid_for(seq: u64) -> [u8; 16] {
    (seq as u128).to_be_bytes()
}
