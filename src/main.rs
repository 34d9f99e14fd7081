//! Bitcoin Key Range Search CLI
//!
//! Usage:
//!   keyrange-search -l 1 -u 10 -t 19ZewH8Kk1PDbSNdJ97FP4EiCjTRaZMZQA
//!   keyrange-search -l 0x20000 -u 0x3ffff -t <address> -w 4
//!   keyrange-search -l 1 -u 1000000 -t <address> -f uncompressed -o found.txt
//!
//! While searching, type `pause`, `resume` or `stop` and press Enter.

use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use keyrange_search::{
    AddressFormat, Config, EventSink, MatchResult, ProgressSnapshot, RunState, SearchController,
    Target,
};

fn main() {
    init_tracing();

    let config = Config::parse();

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        process::exit(1);
    }

    match run(config) {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
}

/// Runs one search to completion. Returns whether the key was found.
fn run(config: Config) -> Result<bool> {
    let settings = config.engine_settings();
    let total = config.high - config.low;

    if Target::new(config.target.as_str()).hash160().is_none() {
        warn!(
            target = %config.target,
            "target is not a mainnet P2PKH address, no key can match it"
        );
    }

    // Print startup info
    println!("Bitcoin Key Range Search");
    println!("========================");
    println!(
        "Range:      {} .. {} (0x{:x} .. 0x{:x})",
        config.low, config.high, config.low, config.high
    );
    println!("Keys:       {}", format_number(total.saturating_add(1)));
    println!("Target:     {} ({})", config.target, config.format);
    println!("Workers:    {}", settings.workers);
    println!("Chunk size: {}", format_number(settings.chunk_size));
    println!();

    let sink = Arc::new(ConsoleSink::new(config.format, config.output.clone()));
    let controller = Arc::new(
        SearchController::new(settings, sink).context("Invalid engine settings")?,
    );

    // Set up ctrl-c handler
    {
        let controller = Arc::clone(&controller);
        ctrlc::set_handler(move || controller.stop()).context("Error setting Ctrl-C handler")?;
    }

    controller
        .start(config.low, config.high, &config.target)
        .context("Failed to start search")?;

    if config.no_stdin {
        println!("Searching... (Press Ctrl+C to stop)\n");
    } else {
        println!("Searching... (type pause / resume / stop, or press Ctrl+C)\n");
        spawn_command_reader(Arc::clone(&controller))?;
    }

    let outcome = controller
        .wait()
        .context("Search ended without an outcome")?;

    // Print final stats
    let progress = outcome.progress;
    println!("\n--- Final Statistics ---");
    println!("Outcome:              {:?}", outcome.reason);
    println!("Total keys scanned:   {}", format_number(progress.scanned));
    println!("Coverage:             {:.2}%", progress.fraction() * 100.0);
    println!("Time elapsed:         {:.2}s", progress.elapsed.as_secs_f64());
    println!(
        "Average speed:        {}/s",
        format_number(progress.keys_per_second() as u64)
    );

    Ok(outcome.matched())
}

/// Forwards `pause`, `resume` and `stop` lines from stdin to the controller.
fn spawn_command_reader(controller: Arc<SearchController>) -> Result<()> {
    thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match line.trim().to_lowercase().as_str() {
                    "p" | "pause" => controller.pause(),
                    "r" | "resume" => controller.resume(),
                    "s" | "stop" | "q" | "quit" => controller.stop(),
                    "" => {}
                    other => {
                        println!("Unknown command '{}' (pause | resume | stop)", other);
                        continue;
                    }
                }
                let state = controller.state();
                println!("[{}]", state);
                if !state.is_active() && state != RunState::Idle {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(())
}

/// Prints events to stdout and appends found keys to an optional file.
struct ConsoleSink {
    format: AddressFormat,
    output: Option<PathBuf>,
}

impl ConsoleSink {
    fn new(format: AddressFormat, output: Option<PathBuf>) -> Self {
        Self { format, output }
    }

    fn save_result(&self, path: &Path, result: &MatchResult) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(
            file,
            "{} {} {} {}",
            result.scalar,
            result.private_key_hex(),
            result.wif(self.format),
            result.address
        )
    }
}

impl EventSink for ConsoleSink {
    fn on_progress(&self, progress: &ProgressSnapshot) {
        println!(
            "[{:>4}s] Scanned {} / {} ({:.2}%) ({}/s)",
            progress.elapsed.as_secs(),
            format_number(progress.scanned),
            format_number(progress.total),
            progress.fraction() * 100.0,
            format_number(progress.keys_per_second() as u64)
        );
    }

    fn on_found(&self, result: &MatchResult) {
        println!("\n=== Key Found ===");
        println!("Scalar:      {}", result.scalar);
        println!("Private Key: {}", result.private_key_hex());
        println!("WIF:         {}", result.wif(self.format));
        println!("Address:     {}", result.address);
        println!("Worker:      {}", result.worker_id);

        if let Some(path) = &self.output {
            match self.save_result(path, result) {
                Ok(()) => println!("Saved to:    {}", path.display()),
                Err(e) => error!(path = %path.display(), error = %e, "failed to save result"),
            }
        }
    }

    fn on_finished(&self, matched: bool) {
        if matched {
            println!("\nSearch finished: key found.");
        } else {
            println!("\nSearch finished: key not found.");
        }
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
