use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE: u64 = 500 * 1024 * 1024;
pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024;
pub const DEFAULT_LABEL_PREFIX: &str = "c";
pub const DEFAULT_HASH: HashAlgorithm = HashAlgorithm::Sha1;

/// Settings persisted into every map file and re-applied when it is read back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defaults {
    pub chunk_size: u64,
    pub block_size: usize,
    pub label_prefix: String,
    pub hash: HashAlgorithm,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            label_prefix: DEFAULT_LABEL_PREFIX.to_string(),
            hash: DEFAULT_HASH,
        }
    }
}

impl Defaults {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk size must be positive".into()));
        }
        if self.block_size == 0 {
            return Err(Error::InvalidConfig("block size must be positive".into()));
        }
        if self.block_size as u64 > self.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "block size {} exceeds chunk size {}",
                self.block_size, self.chunk_size
            )));
        }
        if self.chunk_size.checked_add(self.block_size as u64 - 1).is_none() {
            return Err(Error::InvalidConfig(format!(
                "chunk size {} leaves no room for a {}-byte block overrun",
                self.chunk_size, self.block_size
            )));
        }
        validate_label_prefix(&self.label_prefix)
    }

    /// Label of the chunk at `index`, e.g. `c0`, `c1`, ...
    pub fn label(&self, index: u64) -> String {
        format!("{}{}", self.label_prefix, index)
    }

    /// Inverse of [`Defaults::label`]; `None` for keys that are not labels.
    pub fn label_index(&self, key: &str) -> Option<u64> {
        let digits = key.strip_prefix(self.label_prefix.as_str())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // Reject leading zeros so that every index has exactly one label.
        if digits.len() > 1 && digits.starts_with('0') {
            return None;
        }
        digits.parse().ok()
    }

    /// Upper bound on chunks a file of `file_size` bytes can produce.
    pub fn declared_chunk_count(&self, file_size: u64) -> u64 {
        file_size / self.chunk_size + 1
    }

    /// Largest byte length a single chunk can reach given block-granular
    /// boundary checks.
    pub fn max_chunk_len(&self) -> u64 {
        self.chunk_size.saturating_add(self.block_size as u64 - 1)
    }
}

fn validate_label_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(Error::InvalidConfig("chunk label prefix must not be empty".into()));
    }
    if let Some(c) = prefix
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || "=:[]/\\#;".contains(*c))
    {
        return Err(Error::InvalidConfig(format!(
            "chunk label prefix {prefix:?} contains forbidden character {c:?}"
        )));
    }
    if prefix.ends_with(|c: char| c.is_ascii_digit()) {
        return Err(Error::InvalidConfig(format!(
            "chunk label prefix {prefix:?} must not end with a digit"
        )));
    }
    if prefix == "." || prefix == ".." {
        return Err(Error::InvalidConfig(format!("chunk label prefix {prefix:?} is reserved")));
    }
    Ok(())
}
