//! Engine settings
//!
//! Envelope padding, decoder limits and proof limits, loadable from JSON.

use log::{debug, LevelFilter};
use serde::{Deserialize, Serialize};

use crate::error::{to_config_error, CoreError};

/// Subsection envelope configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Smallest random padding of a private subsection, in bytes
    pub min_padding: usize,

    /// Largest random padding of a private subsection, in bytes
    pub max_padding: usize,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        EnvelopeConfig { min_padding: 0, max_padding: 32 }
    }
}

/// Decoder resource limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Largest array length accepted from a stream
    pub max_array_length: usize,

    /// Largest string or binary length accepted from a stream
    pub max_string_length: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        DecodeConfig { max_array_length: 65_536, max_string_length: 1 << 20 }
    }
}

/// Proof verification limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleConfig {
    /// Deepest nesting of subtree scopes a proof may describe
    pub max_scope_depth: usize,

    /// Largest number of witness hashes a proof may carry
    pub max_witnesses: usize,
}

impl Default for MerkleConfig {
    fn default() -> Self {
        MerkleConfig { max_scope_depth: 32, max_witnesses: 4096 }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Envelope configuration
    pub envelope: EnvelopeConfig,

    /// Decoder limits
    pub decode: DecodeConfig,

    /// Proof limits
    pub merkle: MerkleConfig,

    /// Log level
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            envelope: EnvelopeConfig::default(),
            decode: DecodeConfig::default(),
            merkle: MerkleConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and validate a JSON configuration
    pub fn from_file(path: &str) -> Result<Self, CoreError> {
        let file = std::fs::File::open(path)?;
        let config: EngineConfig = serde_json::from_reader(file)?;
        config.validate()?;
        debug!(
            "engine config from {}: padding {}..={}, {} witnesses max",
            path, config.envelope.min_padding, config.envelope.max_padding, config.merkle.max_witnesses
        );
        Ok(config)
    }

    /// Write as pretty JSON
    pub fn to_file(&self, path: &str) -> Result<(), CoreError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.envelope.min_padding > self.envelope.max_padding {
            return Err(to_config_error(format!(
                "min_padding {} exceeds max_padding {}",
                self.envelope.min_padding, self.envelope.max_padding
            )));
        }
        if self.merkle.max_scope_depth == 0 {
            return Err(to_config_error("max_scope_depth must be at least 1"));
        }
        if self.merkle.max_witnesses == 0 {
            return Err(to_config_error("max_witnesses must be at least 1"));
        }
        Ok(())
    }

    /// Verbose logs, default limits
    pub fn development() -> Self {
        let mut config = Self::default();
        config.log_level = "debug".to_string();
        config
    }

    /// Wider envelope padding
    pub fn production() -> Self {
        let mut config = Self::default();
        config.log_level = "info".to_string();
        config.envelope.min_padding = 8;
        config.envelope.max_padding = 64;
        config
    }

    /// Tight decoder limits for unit tests
    pub fn testing() -> Self {
        let mut config = Self::default();
        config.log_level = "debug".to_string();
        config.decode.max_array_length = 1024;
        config.decode.max_string_length = 4096;
        config
    }

    /// Install `env_logger` with `log_level` as default filter
    ///
    /// `RUST_LOG` overrides the configured level. Only the first call
    /// installs a logger.
    pub fn init_logging(&self) {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(LevelFilter::Info).parse_filters(&self.log_level);
        if let Ok(filters) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filters);
        }
        let _ = builder.is_test(cfg!(test)).try_init();
    }
}
