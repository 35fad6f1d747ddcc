//! Map files: the sidecar document describing how each source file was split.
//!
//! ```text
//! [Defaults]
//! default_chunk_size = 536870912
//! default_block_size = 32768
//! default_chunk_label = c
//! default_hash_type = sha1
//!
//! [file:/data/big.iso]
//! fsize = 3000000
//! fchunks = 3
//! c0 = 0 1048576 <chunk digest> <running file digest>
//! ...
//! file_checksum = <file digest>
//! ```
//!
//! Parsing validates the whole document once; the typed model handed back is
//! contiguous and self-consistent, so consumers never re-check shape.

use crate::config::Defaults;
use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use crate::ini;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULTS_SECTION: &str = "Defaults";
pub const FILE_SECTION_PREFIX: &str = "file:";

pub const KEY_CHUNK_SIZE: &str = "default_chunk_size";
pub const KEY_BLOCK_SIZE: &str = "default_block_size";
pub const KEY_LABEL_PREFIX: &str = "default_chunk_label";
pub const KEY_HASH: &str = "default_hash_type";
pub const KEY_FILE_SIZE: &str = "fsize";
pub const KEY_DECLARED_CHUNKS: &str = "fchunks";
pub const KEY_FILE_CHECKSUM: &str = "file_checksum";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub label: String,
    /// Inclusive byte offset into the source.
    pub start: u64,
    /// Exclusive byte offset into the source.
    pub end: u64,
    pub chunk_digest: String,
    /// Digest of the source from offset 0 through `end`.
    pub cumulative_digest: String,
}

impl ChunkRecord {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn to_value(&self) -> String {
        format!("{} {} {} {}", self.start, self.end, self.chunk_digest, self.cumulative_digest)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSection {
    pub source_path: String,
    pub file_size: u64,
    pub declared_chunk_count: u64,
    pub records: Vec<ChunkRecord>,
    pub file_checksum: String,
}

impl FileSection {
    pub fn section_name(&self) -> String {
        format!("{FILE_SECTION_PREFIX}{}", self.source_path)
    }

    /// Enforce the relationship between the declared and actual chunk counts.
    ///
    /// The declared count is `floor(size / chunk_size) + 1`, an upper bound:
    /// block-granular boundaries can only ever produce fewer chunks.
    pub fn check_chunk_count(&self, defaults: &Defaults) -> Result<()> {
        let expected = defaults.declared_chunk_count(self.file_size);
        if self.declared_chunk_count != expected {
            return Err(Error::ChunkCountInvariant(format!(
                "{}: fchunks is {} but a {}-byte file with chunk size {} declares {}",
                self.source_path,
                self.declared_chunk_count,
                self.file_size,
                defaults.chunk_size,
                expected
            )));
        }
        let actual = self.records.len() as u64;
        if actual == 0 || actual > self.declared_chunk_count {
            return Err(Error::ChunkCountInvariant(format!(
                "{}: {} chunk records, expected between 1 and {}",
                self.source_path, actual, self.declared_chunk_count
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapFile {
    pub defaults: Defaults,
    pub sections: Vec<FileSection>,
}

impl MapFile {
    pub fn new(defaults: Defaults) -> Self {
        Self { defaults, sections: Vec::new() }
    }

    /// Look up a section by the key the user supplied.
    ///
    /// Exact match on the stored path first; failing that, the key is made
    /// absolute and matched again.
    pub fn section(&self, key: &str) -> Result<&FileSection> {
        if let Some(s) = self.sections.iter().find(|s| s.source_path == key) {
            return Ok(s);
        }
        if let Ok(abs) = std::path::absolute(key) {
            if let Some(abs) = abs.to_str() {
                if let Some(s) = self.sections.iter().find(|s| s.source_path == abs) {
                    return Ok(s);
                }
            }
        }
        Err(Error::SectionNotFound(key.to_string()))
    }

    /// Replace the section with the same stored path, or append.
    pub fn upsert(&mut self, section: FileSection) {
        match self.sections.iter_mut().find(|s| s.source_path == section.source_path) {
            Some(slot) => *slot = section,
            None => self.sections.push(section),
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let d = &self.defaults;
        ini::write_section(
            &mut out,
            DEFAULTS_SECTION,
            [
                (KEY_CHUNK_SIZE, d.chunk_size.to_string()),
                (KEY_BLOCK_SIZE, d.block_size.to_string()),
                (KEY_LABEL_PREFIX, d.label_prefix.clone()),
                (KEY_HASH, d.hash.to_string()),
            ],
        );
        for s in &self.sections {
            let entries = [
                (KEY_FILE_SIZE, s.file_size.to_string()),
                (KEY_DECLARED_CHUNKS, s.declared_chunk_count.to_string()),
            ]
            .into_iter()
            .chain(s.records.iter().map(|r| (r.label.as_str(), r.to_value())))
            .chain(std::iter::once((KEY_FILE_CHECKSUM, s.file_checksum.clone())));
            ini::write_section(&mut out, &s.section_name(), entries);
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self> {
        let raw = ini::parse(text)?;
        let defaults_raw = raw
            .iter()
            .find(|s| s.name == DEFAULTS_SECTION)
            .ok_or_else(|| Error::malformed(DEFAULTS_SECTION, "missing section"))?;
        let defaults = parse_defaults(defaults_raw)?;

        let mut sections = Vec::new();
        for rs in &raw {
            if rs.name == DEFAULTS_SECTION {
                continue;
            }
            let Some(path) = rs.name.strip_prefix(FILE_SECTION_PREFIX) else {
                return Err(Error::malformed(&rs.name, "unknown section"));
            };
            if path.is_empty() {
                return Err(Error::malformed(&rs.name, "empty file path"));
            }
            sections.push(parse_file_section(path, rs, &defaults)?);
        }
        Ok(Self { defaults, sections })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::unreadable(path, e))?;
        let map = Self::parse(&text)?;
        tracing::debug!(map = %path.display(), sections = map.sections.len(), "loaded map file");
        Ok(map)
    }

    /// Write the whole document to a temporary sibling, then rename it over
    /// `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = temp_sibling(path);
        let written = (|| {
            let mut f = File::create(&tmp)?;
            f.write_all(self.to_text().as_bytes())?;
            f.sync_all()
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(Error::write(&tmp, e));
        }
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::write(path, e)
        })?;
        tracing::debug!(map = %path.display(), sections = self.sections.len(), "wrote map file");
        Ok(())
    }
}

impl fmt::Display for MapFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl FromStr for MapFile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// A stored path must survive being written inside `[file:...]`.
pub(crate) fn is_representable(path: &str) -> bool {
    !path.is_empty() && !path.contains(|c: char| c == ']' || c == '\n' || c == '\r')
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value.parse().map_err(|_| Error::malformed(key, format!("{value:?} is not an unsigned integer")))
}

fn parse_defaults(rs: &ini::RawSection) -> Result<Defaults> {
    let mut chunk_size = None;
    let mut block_size = None;
    let mut label_prefix = None;
    let mut hash = None;
    for e in &rs.entries {
        match e.key.as_str() {
            KEY_CHUNK_SIZE => chunk_size = Some(parse_u64(&e.key, &e.value)?),
            KEY_BLOCK_SIZE => {
                let v = parse_u64(&e.key, &e.value)?;
                let v = usize::try_from(v)
                    .map_err(|_| Error::malformed(&e.key, "block size does not fit in memory"))?;
                block_size = Some(v);
            }
            KEY_LABEL_PREFIX => label_prefix = Some(e.value.clone()),
            KEY_HASH => hash = Some(e.value.parse::<HashAlgorithm>()?),
            other => return Err(Error::malformed(other, "unknown key in [Defaults]")),
        }
    }
    let missing = |key: &str| Error::malformed(key, "missing from [Defaults]");
    let defaults = Defaults {
        chunk_size: chunk_size.ok_or_else(|| missing(KEY_CHUNK_SIZE))?,
        block_size: block_size.ok_or_else(|| missing(KEY_BLOCK_SIZE))?,
        label_prefix: label_prefix.ok_or_else(|| missing(KEY_LABEL_PREFIX))?,
        hash: hash.ok_or_else(|| missing(KEY_HASH))?,
    };
    defaults.validate().map_err(|e| match e {
        Error::InvalidConfig(reason) => Error::malformed(DEFAULTS_SECTION, reason),
        other => other,
    })?;
    Ok(defaults)
}

fn parse_digest(key: &str, value: &str, hash: HashAlgorithm) -> Result<String> {
    if !hash.is_digest_hex(value) {
        return Err(Error::malformed(key, format!("{value:?} is not a {hash} hex digest")));
    }
    Ok(value.to_string())
}

fn parse_record(label: &str, value: &str, hash: HashAlgorithm) -> Result<ChunkRecord> {
    let fields: Vec<&str> = value.split_ascii_whitespace().collect();
    let &[start, end, chunk_digest, cumulative_digest] = &fields[..] else {
        return Err(Error::malformed(
            label,
            format!("expected 4 fields (start end digest cumulative), found {}", fields.len()),
        ));
    };
    let start = parse_u64(label, start)?;
    let end = parse_u64(label, end)?;
    if end < start {
        return Err(Error::malformed(label, format!("end offset {end} precedes start {start}")));
    }
    Ok(ChunkRecord {
        label: label.to_string(),
        start,
        end,
        chunk_digest: parse_digest(label, chunk_digest, hash)?,
        cumulative_digest: parse_digest(label, cumulative_digest, hash)?,
    })
}

fn parse_file_section(
    path: &str,
    rs: &ini::RawSection,
    defaults: &Defaults,
) -> Result<FileSection> {
    let mut file_size = None;
    let mut declared = None;
    let mut checksum = None;
    let mut records: BTreeMap<u64, ChunkRecord> = BTreeMap::new();
    for e in &rs.entries {
        match e.key.as_str() {
            KEY_FILE_SIZE => file_size = Some(parse_u64(&e.key, &e.value)?),
            KEY_DECLARED_CHUNKS => declared = Some(parse_u64(&e.key, &e.value)?),
            KEY_FILE_CHECKSUM => checksum = Some(parse_digest(&e.key, &e.value, defaults.hash)?),
            key => {
                let idx = defaults.label_index(key).ok_or_else(|| {
                    Error::malformed(key, format!("unknown key in [{}]", rs.name))
                })?;
                records.insert(idx, parse_record(key, &e.value, defaults.hash)?);
            }
        }
    }
    let missing = |key: &str| Error::malformed(key, format!("missing from [{}]", rs.name));
    let file_size = file_size.ok_or_else(|| missing(KEY_FILE_SIZE))?;
    let declared_chunk_count = declared.ok_or_else(|| missing(KEY_DECLARED_CHUNKS))?;
    let file_checksum = checksum.ok_or_else(|| missing(KEY_FILE_CHECKSUM))?;

    let count = records.len() as u64;
    if count == 0 {
        return Err(Error::malformed(defaults.label(0), "missing chunk record"));
    }
    if let Some(gap) = (0..count).find(|i| !records.contains_key(i)) {
        return Err(Error::malformed(defaults.label(gap), "missing chunk record"));
    }
    let records: Vec<ChunkRecord> = records.into_values().collect();

    let mut expected_start = 0u64;
    for r in &records {
        if r.start != expected_start {
            return Err(Error::malformed(
                &r.label,
                format!("starts at {} but previous chunk ended at {expected_start}", r.start),
            ));
        }
        if r.len() > defaults.max_chunk_len() {
            return Err(Error::malformed(
                &r.label,
                format!("{} bytes exceeds the largest possible chunk", r.len()),
            ));
        }
        expected_start = r.end;
    }
    if expected_start != file_size {
        let last = &records[records.len() - 1];
        return Err(Error::malformed(
            &last.label,
            format!("last chunk ends at {expected_start} but fsize is {file_size}"),
        ));
    }

    Ok(FileSection {
        source_path: path.to_string(),
        file_size,
        declared_chunk_count,
        records,
        file_checksum,
    })
}
