//! Configuration module

use crate::{Result, StreamError};
use serde::{Deserialize, Deserializer, Serialize};

/// Default local buffer spill threshold (2 MiB)
pub const DEFAULT_SPILL_THRESHOLD: usize = 2 * 1024 * 1024;

/// Default number of bytes inspected for content-type detection (1 MiB)
pub const DEFAULT_SNIFF_PREFIX: u64 = 1024 * 1024;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Content-type detection settings
    #[serde(default)]
    pub sniff: SniffConfig,
    /// Local buffer settings
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Object-store transport tuning
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Content-type detection for truncating uploads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SniffConfig {
    /// Buffer truncating writes locally and declare a detected content type
    #[serde(default)]
    pub detect_content_type: bool,
    /// How many leading bytes the detector looks at
    #[serde(
        default = "default_sniff_prefix",
        deserialize_with = "deserialize_size"
    )]
    pub prefix_len: u64,
}

impl Default for SniffConfig {
    fn default() -> Self {
        Self {
            detect_content_type: false,
            prefix_len: DEFAULT_SNIFF_PREFIX,
        }
    }
}

fn default_sniff_prefix() -> u64 {
    DEFAULT_SNIFF_PREFIX
}

/// Local buffer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Bytes kept in memory before spilling to a temporary file
    #[serde(default = "default_spill", deserialize_with = "deserialize_usize_size")]
    pub spill_threshold: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
        }
    }
}

fn default_spill() -> usize {
    DEFAULT_SPILL_THRESHOLD
}

/// Smallest part S3 accepts anywhere but at the end of a multipart upload
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Object-store transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Size of each ranged download in bytes (default: 8MB)
    #[serde(deserialize_with = "deserialize_usize_size")]
    pub read_chunk_size: usize,
    /// Number of chunks a seekable reader keeps cached (default: 4)
    pub read_cache_size: usize,
    /// Size of the upload buffer in bytes (default: 8MB)
    #[serde(deserialize_with = "deserialize_usize_size")]
    pub write_buffer_size: usize,
    /// Whether to use multipart upload for large objects (default: true)
    pub use_multipart_upload: bool,
    /// Threshold for multipart upload in bytes (default: 64MB)
    #[serde(deserialize_with = "deserialize_usize_size")]
    pub multipart_threshold: usize,
    /// Smallest non-final multipart part (default: 5MiB, the S3 minimum)
    #[serde(deserialize_with = "deserialize_usize_size")]
    pub min_part_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 8 * 1024 * 1024,  // 8MB
            read_cache_size: 4,
            write_buffer_size: 8 * 1024 * 1024, // 8MB
            use_multipart_upload: true,
            multipart_threshold: 64 * 1024 * 1024, // 64MB
            min_part_size: MIN_PART_SIZE,
        }
    }
}

impl TransportConfig {
    /// Size of every multipart part except the last
    pub fn part_size(&self) -> usize {
        self.write_buffer_size.max(self.min_part_size).max(1)
    }
}

impl StreamConfig {
    /// Parse a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| StreamError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Serialize to a TOML document
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| StreamError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Enable content-type detection with the default prefix length
    pub fn with_content_type_detection(mut self) -> Self {
        self.sniff.detect_content_type = true;
        self
    }
}

/// Size given either as a number of bytes or a string like "1MiB"
#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Bytes(u64),
    Text(String),
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Bytes(bytes) => Ok(bytes),
        SizeValue::Text(text) => parse_size(&text)
            .map_err(|e| D::Error::custom(format!("Failed to parse size: {}", e))),
    }
}

fn deserialize_usize_size<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let bytes = deserialize_size(deserializer)?;
    usize::try_from(bytes).map_err(|_| D::Error::custom(format!("Size too large: {}", bytes)))
}

/// Size suffixes, matched case-insensitively
const SIZE_UNITS: &[(&str, u64)] = &[
    ("", 1),
    ("b", 1),
    ("k", 1_000),
    ("kb", 1_000),
    ("ki", 1 << 10),
    ("kib", 1 << 10),
    ("m", 1_000_000),
    ("mb", 1_000_000),
    ("mi", 1 << 20),
    ("mib", 1 << 20),
    ("g", 1_000_000_000),
    ("gb", 1_000_000_000),
    ("gi", 1 << 30),
    ("gib", 1 << 30),
    ("t", 1_000_000_000_000),
    ("tb", 1_000_000_000_000),
    ("ti", 1 << 40),
    ("tib", 1 << 40),
];

/// Parse a byte count, optionally with a unit ("4096", "64KiB", "1.5MB")
pub fn parse_size(text: &str) -> Result<u64> {
    let text = text.trim();
    let invalid = || StreamError::Config(format!("Invalid size: {:?}", text));

    let digits_end = text
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(digits_end);
    let unit = unit.trim().to_ascii_lowercase();
    let multiplier = SIZE_UNITS
        .iter()
        .find(|(suffix, _)| *suffix == unit)
        .map(|(_, multiplier)| *multiplier)
        .ok_or_else(|| StreamError::Config(format!("Unknown size unit in {:?}", text)))?;

    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(multiplier).ok_or_else(invalid);
    }
    let fractional: f64 = number.parse().map_err(|_| invalid())?;
    Ok((fractional * multiplier as f64) as u64)
}
