use crate::cancel::CancelToken;
use crate::config::Defaults;
use crate::error::{Error, Result};
use crate::hash;
use crate::map::{ChunkRecord, FileSection, MapFile};
use crate::path_safety::ChunkResolver;
use crate::progress::Progress;
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    DigestMismatch { expected: String, actual: String },
    Unreadable { message: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChunkFailure {
    pub label: String,
    #[serde(flatten)]
    pub reason: FailureReason,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    pub source_path: String,
    pub chunks_total: u64,
    pub chunks_ok: u64,
    /// Failed chunks in record order.
    pub failures: Vec<ChunkFailure>,
}

impl VerifyReport {
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_labels(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.label.as_str()).collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct VerifyOptions {
    /// Hash chunks on the rayon pool instead of one after another.
    pub parallel: bool,
    pub cancel: CancelToken,
    pub progress: Progress,
}

/// Recompute every chunk's digest from its file and compare with the map.
///
/// Missing or unreadable chunk files and digest mismatches are collected in
/// the report; only cancellation, resolver errors and chunk-count invariant
/// violations abort the scan.
pub fn verify<R>(
    section: &FileSection,
    defaults: &Defaults,
    chunks: &R,
    opts: &VerifyOptions,
) -> Result<VerifyReport>
where
    R: ChunkResolver + ?Sized,
{
    section.check_chunk_count(defaults)?;
    tracing::info!(
        source = %section.source_path,
        chunks = section.records.len(),
        parallel = opts.parallel,
        "verifying chunks"
    );
    opts.progress.begin("Verifying", section.records.len() as u64, section.file_size);
    opts.progress.start();

    let check = |rec: &ChunkRecord| {
        let outcome = check_chunk(rec, defaults, chunks, &opts.cancel);
        opts.progress.inc_chunk();
        opts.progress.add_bytes(rec.len());
        outcome
    };
    let outcomes: Vec<Result<Option<FailureReason>>> = if opts.parallel {
        section.records.par_iter().map(check).collect()
    } else {
        section.records.iter().map(check).collect()
    };
    opts.progress.stop();

    let mut failures = Vec::new();
    for (rec, outcome) in section.records.iter().zip(outcomes) {
        if let Some(reason) = outcome? {
            tracing::warn!(label = %rec.label, ?reason, "chunk failed verification");
            failures.push(ChunkFailure { label: rec.label.clone(), reason });
        }
    }
    let chunks_total = section.records.len() as u64;
    Ok(VerifyReport {
        source_path: section.source_path.clone(),
        chunks_total,
        chunks_ok: chunks_total - failures.len() as u64,
        failures,
    })
}

/// Load `map_path`, pick the section for `key` and verify it.
pub fn examine<R>(
    map_path: &Path,
    key: &str,
    chunks: &R,
    opts: &VerifyOptions,
) -> Result<VerifyReport>
where
    R: ChunkResolver + ?Sized,
{
    let map = MapFile::load(map_path)?;
    let section = map.section(key)?;
    verify(section, &map.defaults, chunks, opts)
}

fn check_chunk<R>(
    rec: &ChunkRecord,
    defaults: &Defaults,
    chunks: &R,
    cancel: &CancelToken,
) -> Result<Option<FailureReason>>
where
    R: ChunkResolver + ?Sized,
{
    let path = chunks.resolve(&rec.label)?;
    match hash::digest_file(&path, defaults.hash, defaults.block_size, cancel) {
        Ok(actual) if actual == rec.chunk_digest => {
            tracing::debug!(label = %rec.label, "chunk ok");
            Ok(None)
        }
        Ok(actual) => Ok(Some(FailureReason::DigestMismatch {
            expected: rec.chunk_digest.clone(),
            actual,
        })),
        Err(Error::SourceUnreadable { source, .. }) => {
            Ok(Some(FailureReason::Unreadable { message: source.to_string() }))
        }
        Err(e) => Err(e),
    }
}
