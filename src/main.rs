//! # packoxide
//!
//! Recovers the key of an encrypted resource pack `contents.json` by
//! brute force, and decrypts or builds such files once the key is known.
//!
//! ## File Format
//! - 4 bytes: version (little endian, 0)
//! - 4 bytes: magic `FC B9 CF 9B`
//! - 1 byte at 0x10: content id length, followed by the content id
//! - zero padding up to 0x100
//! - Ciphertext (rest of file), AES-256-CFB8 with IV = first 16 key bytes
//!
//! ## Usage
//!
//! ```sh
//! cargo build --release
//! ./target/release/packoxide search contents.json --threads 16
//! ./target/release/packoxide search contents.json --mode sequential --start 0 --count 1000000000
//! ./target/release/packoxide decrypt contents.json --key <KEY> --output contents.plain.json
//! ```
//!
//! Ctrl+C stops a running search and reports how far it got.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use packoxide::container::{self, Container, MAGIC};
use packoxide::generator::DEFAULT_RESERVATION;
use packoxide::search::{default_workers, Outcome, RateMeter, SearchConfig, SearchHandle, MAX_WORKERS};
use packoxide::validator::{CONTENT_PREFIX, DEFAULT_EXTENDED};
use packoxide::{Backend, Engine, Key, Policy, Strategy, Validator};

/// Longest text span `--extended` accepts.
const MAX_EXTENDED: i64 = 4096;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search for the key of an encrypted contents.json.
    Search(SearchArgs),
    /// Decrypt an encrypted contents.json with a known key.
    Decrypt {
        input: PathBuf,
        #[arg(short, long)]
        key: Key,
        /// Write the plaintext here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Encrypt a plaintext document into the container format.
    Seal {
        plaintext: PathBuf,
        #[arg(short, long)]
        key: Key,
        #[arg(long, default_value = "")]
        content_id: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the header fields of a container.
    Info { input: PathBuf },
}

#[derive(clap::Args, Debug)]
struct SearchArgs {
    input: PathBuf,

    /// Worker threads [default: available cores].
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..=MAX_WORKERS as i64))]
    threads: Option<u16>,

    #[arg(short, long, value_enum, default_value_t = Mode::Random)]
    mode: Mode,

    /// First counter to enumerate (sequential mode).
    #[arg(long, default_value_t = 0)]
    start: u64,

    /// Counters to enumerate (sequential mode) [default: up to u64::MAX].
    #[arg(long)]
    count: Option<u64>,

    /// Counters each worker reserves at once (sequential mode).
    #[arg(long, default_value_t = DEFAULT_RESERVATION)]
    batch: u64,

    /// Bytes after the known prefix that must decrypt to text.
    #[arg(
        long,
        default_value_t = DEFAULT_EXTENDED as u16,
        value_parser = clap::value_parser!(u16).range(0..=MAX_EXTENDED)
    )]
    extended: u16,

    #[arg(long, value_enum, default_value_t = BackendChoice::Auto)]
    backend: BackendChoice,

    /// Progress refresh interval in milliseconds.
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Random,
    Sequential,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendChoice {
    Auto,
    Portable,
    Accelerated,
}

fn select_engine(choice: BackendChoice) -> Engine {
    match choice {
        BackendChoice::Auto => Engine::detect(),
        BackendChoice::Portable => Engine::portable(),
        BackendChoice::Accelerated => Engine::new(Backend::Accelerated).unwrap_or_else(|e| {
            warn!("{e}; falling back to the portable backend");
            Engine::portable()
        }),
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("Failed to open file {:?}", path))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .await
        .with_context(|| format!("Failed to read file {:?}", path))?;
    Ok(data)
}

async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path)
        .await
        .with_context(|| format!("Failed to create file {:?}", path))?;
    file.write_all(data)
        .await
        .with_context(|| format!("Failed to write file {:?}", path))?;
    file.flush().await?;
    Ok(())
}

async fn read_container(path: &Path) -> Result<Container> {
    let data = read_file(path).await?;
    Container::parse(data).with_context(|| format!("Failed to parse container {:?}", path))
}

/// Run a search until it ends or Ctrl+C stops it. True when a key was found.
async fn search(args: SearchArgs) -> Result<bool> {
    let data = read_file(&args.input).await?;
    let strategy = match args.mode {
        Mode::Random => {
            if args.start != 0 || args.count.is_some() {
                warn!("--start and --count only apply to sequential mode");
            }
            Strategy::Random
        }
        Mode::Sequential => Strategy::sequential(args.start, args.count),
    };
    let config = SearchConfig {
        strategy,
        workers: args.threads.map_or_else(default_workers, usize::from),
        engine: select_engine(args.backend),
        policy: Policy::new(CONTENT_PREFIX, usize::from(args.extended)),
        reservation: args.batch,
    };
    let handle = SearchHandle::start(data, config)
        .with_context(|| format!("Failed to start search on {:?}", args.input))?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .context("Invalid progress template")?,
    );
    let mut meter = RateMeter::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(10)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = handle.poll();
                let rate = meter.sample(&status);
                pb.set_message(format!(
                    "{} keys | {:.2} Mkeys/s | {} near misses | last {}",
                    status.attempted,
                    rate / 1e6,
                    status.plausible,
                    status.last_sampled
                ));
                pb.tick();
                if status.phase.is_terminal() {
                    break;
                }
            }
            res = &mut ctrl_c, if !interrupted => {
                res.context("Failed to listen for Ctrl+C")?;
                info!("Stop requested, waiting for workers");
                handle.request_stop();
                interrupted = true;
            }
        }
    }

    let status = handle.poll();
    let outcome = tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("Search thread failed")?;
    pb.finish_and_clear();

    let summary = format!("{} keys in {:.1}s", status.attempted, status.elapsed.as_secs_f64());
    match outcome {
        Outcome::Found(key) => {
            println!("KEY FOUND -> {key}");
            println!("{summary}");
            Ok(true)
        }
        Outcome::Cancelled => {
            println!("Search cancelled after {summary}, last sampled {}", status.last_sampled);
            Ok(false)
        }
        Outcome::Exhausted => {
            println!("Range exhausted after {summary}, NO KEY FOUND");
            Ok(false)
        }
    }
}

/// Decrypt with a known key. True when the key passes validation.
async fn decrypt(input: PathBuf, key: Key, output: Option<PathBuf>) -> Result<bool> {
    let container = read_container(&input).await?;
    let engine = Engine::detect();
    let verdict = Validator::new(container.ciphertext(), Policy::default(), engine)?.check(&key);
    if !verdict.is_confirmed() {
        warn!("Key does not produce the expected plaintext ({:?})", verdict);
    }

    let plain = container.decrypt(&key, engine);
    match output {
        Some(path) => {
            write_file(&path, &plain).await?;
            info!("Wrote {} bytes to {:?}", plain.len(), path);
        }
        None => println!("{}", String::from_utf8_lossy(&plain)),
    }
    Ok(verdict.is_confirmed())
}

async fn seal(plaintext: PathBuf, key: Key, content_id: String, output: PathBuf) -> Result<bool> {
    let plain = read_file(&plaintext).await?;
    let bytes = container::seal(&content_id, &key, &plain, Engine::detect())
        .context("Failed to build container")?;
    write_file(&output, &bytes).await?;
    info!("Sealed {} bytes into {:?}", plain.len(), output);
    Ok(true)
}

async fn show_info(input: PathBuf) -> Result<bool> {
    let container = read_container(&input).await?;
    println!("version:    {}", container.version());
    println!("magic:      {}", hex::encode(MAGIC));
    println!("content id: {}", container.content_id().unwrap_or("<none>"));
    println!("ciphertext: {} bytes", container.ciphertext().len());
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }
    info!("Starting packoxide {}", env!("CARGO_PKG_VERSION"));

    let success = match args.command {
        Command::Search(search_args) => search(search_args).await?,
        Command::Decrypt { input, key, output } => decrypt(input, key, output).await?,
        Command::Seal { plaintext, key, content_id, output } => {
            seal(plaintext, key, content_id, output).await?
        }
        Command::Info { input } => show_info(input).await?,
    };
    Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
