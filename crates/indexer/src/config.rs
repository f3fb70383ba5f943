//! Configuration management for the burn ledger indexer.
//!
//! This module handles loading configuration from:
//! - TOML files
//! - Environment variables (`${VAR}` placeholders inside the TOML)
//! - Default values (fallbacks)

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network configuration
    pub network: NetworkConfig,

    /// Token being tracked
    pub token: TokenConfig,

    /// Where ledger, coverage and reports are written
    #[serde(default)]
    pub storage: StorageConfig,

    /// Incremental sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Failfast retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Gap backfill configuration
    #[serde(default)]
    pub backfill: BackfillConfig,

    /// Coverage tracker configuration
    #[serde(default)]
    pub coverage: CoverageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Ethereum RPC URLs, tried in order of health
    pub rpc_urls: Vec<String>,

    /// Chain ID (1 for mainnet)
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

/// Token configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// ERC-20 contract address
    pub address: Address,

    /// Transfers to this address count as burns
    #[serde(default)]
    pub burn_address: Address,

    /// Token decimals
    #[serde(default = "default_decimals")]
    pub decimals: u8,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// First block to scan when no ledger exists yet (0 = head - initial_lookback_blocks)
    #[serde(default)]
    pub start_block: u64,

    /// Blocks per eth_getLogs request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Lookback used for a fresh ledger without a start block (~30 days at 12s)
    #[serde(default = "default_initial_lookback_blocks")]
    pub initial_lookback_blocks: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            chunk_size: default_chunk_size(),
            initial_lookback_blocks: default_initial_lookback_blocks(),
        }
    }
}

/// Failfast retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds (10 minutes)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

/// Gap backfill configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Blocks per backfill sub-chunk
    #[serde(default = "default_backfill_chunk_size")]
    pub chunk_size: u64,

    /// Attempts per sub-chunk before it is recorded as failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Linear backoff step in milliseconds (delay = step * attempt)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Largest gaps processed per run
    #[serde(default = "default_max_gaps_per_run")]
    pub max_gaps_per_run: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_backfill_chunk_size(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_gaps_per_run: default_max_gaps_per_run(),
        }
    }
}

/// Coverage tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Treat blocks between the coverage end and the ledger resume pointer as
    /// scanned. Disable for strict mode, where such drift is only reported.
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            auto_sync: default_auto_sync(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_chain_id() -> u64 {
    1
}

fn default_decimals() -> u8 {
    18
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_chunk_size() -> u64 {
    800 // stays under provider log limits
}

fn default_initial_lookback_blocks() -> u64 {
    216_000 // 30 days of 12s blocks
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    600_000 // 10 minutes
}

fn default_attempt_timeout_secs() -> u64 {
    30
}

fn default_backfill_chunk_size() -> u64 {
    400
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_gaps_per_run() -> usize {
    5
}

fn default_auto_sync() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl RetryConfig {
    /// First backoff delay.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Backoff cap.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Per-attempt timeout.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables can be referenced using `${VAR_NAME}` syntax.
    /// For example: `rpc_urls = ["${MAINNET_RPC_URL}"]`
    ///
    /// # Example
    /// ```no_run
    /// # use burnledger_indexer::config::Config;
    /// let config = Config::from_file("burnledger.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = expand_env_vars(&contents)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_urls.is_empty() {
            anyhow::bail!("Network rpc_urls must list at least one endpoint");
        }
        for url in &self.network.rpc_urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("Network RPC URL must be http(s): {}", url);
            }
        }

        if self.network.chain_id == 0 {
            anyhow::bail!("Chain ID must be non-zero");
        }

        if self.token.address.is_zero() {
            anyhow::bail!("Token address must be a non-zero address");
        }
        if self.token.address == self.token.burn_address {
            anyhow::bail!("Token burn_address cannot equal the token address");
        }
        if self.token.decimals > 77 {
            anyhow::bail!("Token decimals must be <= 77 (got {})", self.token.decimals);
        }

        if self.storage.data_dir.as_os_str().is_empty() {
            anyhow::bail!("Storage data_dir cannot be empty");
        }

        if self.sync.chunk_size == 0 {
            anyhow::bail!("Sync chunk_size must be > 0");
        }

        if self.retry.base_delay_ms == 0 {
            anyhow::bail!("Retry base_delay_ms must be > 0");
        }
        if self.retry.max_backoff_ms < self.retry.base_delay_ms {
            anyhow::bail!(
                "Retry max_backoff_ms ({}) cannot be below base_delay_ms ({})",
                self.retry.max_backoff_ms,
                self.retry.base_delay_ms
            );
        }
        if self.retry.attempt_timeout_secs == 0 {
            anyhow::bail!("Retry attempt_timeout_secs must be > 0");
        }

        if self.backfill.chunk_size == 0 {
            anyhow::bail!("Backfill chunk_size must be > 0");
        }
        if self.backfill.chunk_size > self.sync.chunk_size {
            anyhow::bail!(
                "Backfill chunk_size ({}) must not exceed sync chunk_size ({})",
                self.backfill.chunk_size,
                self.sync.chunk_size
            );
        }
        if self.backfill.max_attempts == 0 {
            anyhow::bail!("Backfill max_attempts must be > 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }
}

/// Replace `${VAR_NAME}` placeholders with environment values.
///
/// Placeholders inside `#` comments are left alone; a `#` inside a quoted
/// string does not start a comment.
fn expand_env_vars(input: &str) -> Result<String> {
    let mut output = String::with_capacity(input.len());

    for (line_no, line) in input.split_inclusive('\n').enumerate() {
        let code_len = comment_start(line).unwrap_or(line.len());
        let (code, comment) = line.split_at(code_len);

        let mut rest = code;
        while let Some(open) = rest.find("${") {
            output.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let close = after.find('}').with_context(|| {
                format!("Unterminated environment placeholder on line {}", line_no + 1)
            })?;
            let name = &after[..close];
            if name.is_empty() {
                anyhow::bail!("Empty environment placeholder on line {}", line_no + 1);
            }
            let value = std::env::var(name).with_context(|| {
                format!(
                    "Environment variable '{}' referenced on line {} is not set",
                    name,
                    line_no + 1
                )
            })?;
            output.push_str(&value);
            rest = &after[close + 1..];
        }
        output.push_str(rest);
        output.push_str(comment);
    }

    Ok(output)
}

/// Byte offset of a `#` that starts a comment, ignoring quoted strings.
fn comment_start(line: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        match quote {
            Some('"') if escaped => escaped = false,
            Some('"') if ch == '\\' => escaped = true,
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == '#' => return Some(idx),
            None => {}
        }
    }
    None
}
