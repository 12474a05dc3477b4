//! Easel annotation daemon.
//!
//! Runs the caption worker against the shared store: claims pending
//! annotations, calls the configured caption provider, and stores results
//! (and embeddings, when semantic search is enabled).
//!
//! ```bash
//! easel-daemon              # Run in foreground
//! easel-daemon --once       # Drain the queue once and exit
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::info;

use easel::caption::create_provider;
use easel::config::{apply_pending_move, Config};
use easel::embed::create_embedder;
use easel::worker::Worker;
use easel::Store;

#[derive(Default)]
struct DaemonArgs {
    once: bool,
    poll_seconds: Option<f64>,
    config_path: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = parse_args();
    easel::logging::init(None)?;
    info!("Easel daemon starting");

    let config_path = args.config_path.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load_from(&config_path).context("loading configuration")?;

    // A scheduled data-directory move must land before the store opens.
    let data_dir = apply_pending_move(&mut config, &config_path)
        .unwrap_or_else(|| config.resolve_data_dir());

    let store = Store::open(&data_dir)
        .with_context(|| format!("opening store at {}", data_dir.display()))?
        .with_thumbnail_dimension(config.thumbnails.max_dimension);
    info!(data_dir = %data_dir.display(), "Store opened");

    if config.worker.retry_failed_on_start {
        let requeued = store.retry_stalled_annotations()?;
        if requeued > 0 {
            info!(requeued, "Re-queued stalled annotations");
        }
    }

    let provider = create_provider(&config.ai);
    let embedder = create_embedder(&config.ai);
    info!(provider = provider.name(), semantic = embedder.is_some(), "Worker configured");
    let worker = Worker::new(&store, provider, embedder);

    if args.once {
        let mut processed = 0usize;
        while worker.run_once()? {
            processed += 1;
        }
        info!(processed, "Single-shot run complete");
        return Ok(());
    }

    let poll = Duration::from_secs_f64(
        args.poll_seconds
            .unwrap_or(config.worker.poll_seconds)
            .max(0.1),
    );
    info!(poll_seconds = poll.as_secs_f64(), "Entering poll loop");
    let stop = AtomicBool::new(false);
    worker.run_loop(poll, &stop);

    info!("Easel daemon stopped");
    Ok(())
}

fn parse_args() -> DaemonArgs {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = DaemonArgs::default();

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--once" | "-1" => args.once = true,
            "--interval" | "-i" => {
                if i + 1 < argv.len() {
                    if let Ok(seconds) = argv[i + 1].parse() {
                        args.poll_seconds = Some(seconds);
                    }
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < argv.len() {
                    args.config_path = Some(PathBuf::from(&argv[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    args
}

fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("EASEL_CONFIG") {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("easel")
        .join("config.toml")
}

fn print_help() {
    println!(
        r#"easel-daemon - Background annotation worker for Easel

USAGE:
    easel-daemon [OPTIONS]

OPTIONS:
    --once, -1          Drain the pending queue once and exit
    --interval, -i N    Poll interval in seconds (default: from config)
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    EASEL_CONFIG        Path to config file (overrides default location)
    EASEL_LOG           Log level (trace, debug, info, warn, error)
"#
    );
}
