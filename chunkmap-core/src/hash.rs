//! Incremental digests with a non-consuming "digest so far" snapshot.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 6] = [
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha224,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
        HashAlgorithm::Blake3,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    /// Digest length in bytes (hex strings are twice this long).
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha224 => 28,
            HashAlgorithm::Sha256 | HashAlgorithm::Blake3 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn is_digest_hex(self, s: &str) -> bool {
        s.len() == self.digest_len() * 2
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        HashAlgorithm::ALL
            .into_iter()
            .find(|a| a.name() == wanted)
            .ok_or_else(|| Error::UnsupportedAlgorithm(s.to_string()))
    }
}

#[derive(Clone)]
enum State {
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl State {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha1 => State::Sha1(Sha1::new()),
            HashAlgorithm::Sha224 => State::Sha224(Sha224::new()),
            HashAlgorithm::Sha256 => State::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => State::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => State::Sha512(Sha512::new()),
            HashAlgorithm::Blake3 => State::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

/// Running digest over a byte stream.
///
/// `digest_now` snapshots the digest of everything fed so far and leaves the
/// accumulator usable, which lets a splitter record the whole-file digest at
/// each chunk boundary while the stream keeps going.
#[derive(Clone)]
pub struct Accumulator {
    algorithm: HashAlgorithm,
    state: State,
    fed: u64,
}

impl Accumulator {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm, state: State::new(algorithm), fed: 0 }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Number of bytes fed since creation or the last reset.
    pub fn bytes_fed(&self) -> u64 {
        self.fed
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match &mut self.state {
            State::Sha1(h) => h.update(bytes),
            State::Sha224(h) => h.update(bytes),
            State::Sha256(h) => h.update(bytes),
            State::Sha384(h) => h.update(bytes),
            State::Sha512(h) => h.update(bytes),
            State::Blake3(h) => {
                h.update(bytes);
            }
        }
        self.fed += bytes.len() as u64;
    }

    pub fn digest_now(&self) -> String {
        match &self.state {
            State::Sha1(h) => hex::encode(h.clone().finalize()),
            State::Sha224(h) => hex::encode(h.clone().finalize()),
            State::Sha256(h) => hex::encode(h.clone().finalize()),
            State::Sha384(h) => hex::encode(h.clone().finalize()),
            State::Sha512(h) => hex::encode(h.clone().finalize()),
            State::Blake3(h) => hex::encode(h.finalize().as_bytes()),
        }
    }

    pub fn reset(&mut self) {
        self.state = State::new(self.algorithm);
        self.fed = 0;
    }
}

impl fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accumulator")
            .field("algorithm", &self.algorithm)
            .field("fed", &self.fed)
            .finish()
    }
}

/// Stream `reader` through `acc` in `block_size` reads until a zero-length read.
///
/// Returns the number of bytes consumed.
pub fn feed_reader<R: Read>(
    reader: &mut R,
    acc: &mut Accumulator,
    block_size: usize,
    cancel: &CancelToken,
) -> std::io::Result<u64> {
    let mut buf = vec![0u8; block_size];
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(std::io::Error::new(ErrorKind::Interrupted, "cancelled"));
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        acc.update(&buf[..n]);
        total += n as u64;
    }
}

/// Digest a whole file with bounded memory.
pub fn digest_file(
    path: &Path,
    algorithm: HashAlgorithm,
    block_size: usize,
    cancel: &CancelToken,
) -> Result<String> {
    let mut f = File::open(path).map_err(|e| Error::unreadable(path, e))?;
    let mut acc = Accumulator::new(algorithm);
    feed_reader(&mut f, &mut acc, block_size, cancel).map_err(|e| {
        if cancel.is_cancelled() {
            Error::Cancelled
        } else {
            Error::unreadable(path, e)
        }
    })?;
    Ok(acc.digest_now())
}
