//! Store configuration.
//!
//! All knobs are plain public fields with serde defaults; `validate()` is
//! called after deserialization (and by the store on open) to keep bad
//! values out of the mapping layer. Bucket counts are immutable once a
//! store has been created — they size the on-disk hash-table headers.

use std::path::PathBuf;

use serde::Deserialize;
use snafu::Snafu;

/// Settings validation failure.
#[derive(Debug, Snafu)]
pub enum SettingsError {
    /// A field value is out of range.
    #[snafu(display("invalid settings: {message}"))]
    Validation {
        /// What was wrong.
        message: String,
    },
}

/// Storage engine settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Root directory of the store's files.
    pub directory: PathBuf,

    /// Enable the spends, history and stealth indexes.
    #[serde(default = "default_index_addresses")]
    pub index_addresses: bool,

    /// Fsync every commit instead of relying on OS flush at close.
    #[serde(default)]
    pub flush_writes: bool,

    /// File expansion multiplier applied when a mapping must grow.
    ///
    /// Must be >= 1.0. Growth is multiplicative, so the amortized remap
    /// cost is constant.
    #[serde(default = "default_file_growth_rate")]
    pub file_growth_rate: f64,

    /// Block table bucket count (immutable after create).
    #[serde(default = "default_block_table_buckets")]
    pub block_table_buckets: u64,

    /// Transaction table bucket count (immutable after create).
    #[serde(default = "default_transaction_table_buckets")]
    pub transaction_table_buckets: u64,

    /// Spend table bucket count (immutable after create).
    #[serde(default = "default_spend_table_buckets")]
    pub spend_table_buckets: u64,

    /// History table bucket count (immutable after create).
    #[serde(default = "default_history_table_buckets")]
    pub history_table_buckets: u64,

    /// Unspent-output cache capacity, in outputs. Zero disables the cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Settings {
    /// Settings rooted at `directory` with every other field defaulted.
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            index_addresses: default_index_addresses(),
            flush_writes: false,
            file_growth_rate: default_file_growth_rate(),
            block_table_buckets: default_block_table_buckets(),
            transaction_table_buckets: default_transaction_table_buckets(),
            spend_table_buckets: default_spend_table_buckets(),
            history_table_buckets: default_history_table_buckets(),
            cache_capacity: default_cache_capacity(),
        }
    }

    /// Validate field ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Validation`] if the growth rate is below 1.0
    /// or any bucket count is zero.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.file_growth_rate < 1.0 {
            return Err(SettingsError::Validation {
                message: format!("file_growth_rate must be >= 1.0, got {}", self.file_growth_rate),
            });
        }
        for (name, buckets) in [
            ("block_table_buckets", self.block_table_buckets),
            ("transaction_table_buckets", self.transaction_table_buckets),
            ("spend_table_buckets", self.spend_table_buckets),
            ("history_table_buckets", self.history_table_buckets),
        ] {
            if buckets == 0 {
                return Err(SettingsError::Validation {
                    message: format!("{name} must be nonzero"),
                });
            }
        }
        Ok(())
    }
}

fn default_index_addresses() -> bool {
    true
}

fn default_file_growth_rate() -> f64 {
    1.5
}

// Bucket defaults are primes: the table distributes keys by modulus, and a
// prime count keeps structured keys from clustering.
fn default_block_table_buckets() -> u64 {
    650_011
}

fn default_transaction_table_buckets() -> u64 {
    4_000_037
}

fn default_spend_table_buckets() -> u64 {
    8_000_009
}

fn default_history_table_buckets() -> u64 {
    4_000_037
}

fn default_cache_capacity() -> usize {
    10_000
}
