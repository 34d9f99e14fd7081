//! Runtime configuration for the key range search.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::crypto::AddressFormat;

/// Default scalars per claimed chunk.
pub const DEFAULT_CHUNK_SIZE: u64 = 65_536;

/// Default scalars between control checks.
pub const DEFAULT_CHECK_INTERVAL: u64 = 1_024;

/// Engine tunables. None of these affect the search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Number of worker threads
    pub workers: usize,
    /// Scalars per chunk claimed from the partitioner
    pub chunk_size: u64,
    /// Scalars scanned between control checks
    pub check_interval: u64,
    /// Minimum time between progress events
    pub progress_interval: Duration,
    /// Minimum time between a worker's progress reports
    pub flush_interval: Duration,
    /// Silence after which a worker is given up on (`None` = never)
    pub stall_timeout: Option<Duration>,
    /// Public key serialization for derived addresses
    pub format: AddressFormat,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            check_interval: DEFAULT_CHECK_INTERVAL,
            progress_interval: Duration::from_millis(500),
            flush_interval: Duration::from_millis(100),
            stall_timeout: Some(Duration::from_secs(30)),
            format: AddressFormat::Compressed,
        }
    }
}

impl EngineSettings {
    /// Validates the settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidSetting(
                "Worker count must be at least 1".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidSetting(
                "Chunk size must be at least 1".into(),
            ));
        }
        if self.check_interval == 0 {
            return Err(ConfigError::InvalidSetting(
                "Check interval must be at least 1".into(),
            ));
        }
        if self.stall_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidSetting(
                "Stall timeout must be positive (use None to disable)".into(),
            ));
        }
        Ok(())
    }
}

/// Bitcoin private key range search
///
/// Scans every scalar in [LOW, HIGH] for the private key whose P2PKH
/// address equals TARGET. While running, type `pause`, `resume` or `stop`
/// followed by Enter.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// First scalar of the range (decimal or 0x-prefixed hex)
    #[arg(short, long, value_parser = parse_scalar)]
    pub low: u64,

    /// Last scalar of the range, inclusive (decimal or 0x-prefixed hex)
    #[arg(short = 'u', long, value_parser = parse_scalar)]
    pub high: u64,

    /// Target address, compared verbatim
    #[arg(short, long)]
    pub target: String,

    /// Number of worker threads (default: number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Scalars per chunk claimed by a worker
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Scalars between pause/stop checks
    #[arg(long, default_value_t = DEFAULT_CHECK_INTERVAL)]
    pub check_interval: u64,

    /// Progress report interval in milliseconds
    #[arg(short = 'r', long, default_value = "1000")]
    pub report_interval: u64,

    /// Address scheme: compressed, uncompressed or secret-hash
    #[arg(short = 'f', long, default_value = "compressed")]
    pub format: AddressFormat,

    /// Seconds of worker silence before it is abandoned (0 = never)
    #[arg(long, default_value = "30")]
    pub stall_timeout: u64,

    /// Append found keys to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Do not read pause/resume/stop commands from stdin
    #[arg(long, default_value = "false")]
    pub no_stdin: bool,
}

impl Config {
    /// Returns the number of workers, defaulting to CPU count
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.low > self.high {
            return Err(ConfigError::InvalidRange {
                low: self.low,
                high: self.high,
            });
        }

        if self.target.is_empty() {
            return Err(ConfigError::InvalidTarget("Target cannot be empty".into()));
        }

        if self.report_interval == 0 {
            return Err(ConfigError::InvalidSetting(
                "Report interval must be at least 1 ms".into(),
            ));
        }

        self.engine_settings().validate()
    }

    /// Builds the engine settings from the command line.
    pub fn engine_settings(&self) -> EngineSettings {
        let progress_interval = Duration::from_millis(self.report_interval);
        EngineSettings {
            workers: self.worker_count(),
            chunk_size: self.chunk_size,
            check_interval: self.check_interval,
            progress_interval,
            flush_interval: progress_interval.min(EngineSettings::default().flush_interval),
            stall_timeout: (self.stall_timeout > 0).then(|| Duration::from_secs(self.stall_timeout)),
            format: self.format,
        }
    }
}

/// Parses a scalar written in decimal or as `0x`-prefixed hex.
pub fn parse_scalar(s: &str) -> Result<u64, String> {
    let s = s.trim().replace('_', "");
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("Invalid scalar '{}': {}", s, e))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid range: low ({low}) is greater than high ({high})")]
    InvalidRange { low: u64, high: u64 },
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}
