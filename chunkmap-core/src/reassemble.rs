use crate::cancel::CancelToken;
use crate::config::Defaults;
use crate::error::{Error, Result};
use crate::hash::{self, Accumulator};
use crate::map::{FileSection, MapFile};
use crate::path_safety::ChunkResolver;
use crate::progress::Progress;
use crate::split::read_block;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default)]
pub struct ReassembleOptions {
    /// Replace an existing destination file.
    pub overwrite: bool,
    pub cancel: CancelToken,
    pub progress: Progress,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReassembleReport {
    pub destination: PathBuf,
    pub chunks: u64,
    pub bytes: u64,
    pub file_checksum: String,
}

/// Concatenate the section's chunks, in record order, into `dest`.
///
/// Every chunk is verified before its bytes are copied, the running file
/// digest is checked against each record's cumulative digest, and the final
/// digest against the section's file checksum. Output goes to `<dest>.part`
/// and is renamed over `dest` only when all of that holds.
pub fn reassemble<R>(
    section: &FileSection,
    defaults: &Defaults,
    chunks: &R,
    dest: &Path,
    opts: &ReassembleOptions,
) -> Result<ReassembleReport>
where
    R: ChunkResolver + ?Sized,
{
    section.check_chunk_count(defaults)?;
    if dest.exists() && !opts.overwrite {
        return Err(Error::write(
            dest,
            io::Error::new(io::ErrorKind::AlreadyExists, "destination already exists"),
        ));
    }
    ensure_space(dest, section.file_size)?;

    let part = part_path(dest);
    tracing::info!(
        source = %section.source_path,
        dest = %dest.display(),
        chunks = section.records.len(),
        "reassembling"
    );
    opts.progress.begin("Reassembling", section.records.len() as u64, section.file_size);
    opts.progress.start();
    let res = assemble_into(&part, section, defaults, chunks, opts);
    opts.progress.stop();

    let bytes = match res {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = fs::remove_file(&part);
            return Err(e);
        }
    };
    fs::rename(&part, dest).map_err(|e| {
        let _ = fs::remove_file(&part);
        Error::write(dest, e)
    })?;
    tracing::info!(dest = %dest.display(), bytes, "reassembly verified");
    Ok(ReassembleReport {
        destination: dest.to_path_buf(),
        chunks: section.records.len() as u64,
        bytes,
        file_checksum: section.file_checksum.clone(),
    })
}

/// Load `map_path`, pick the section for `key` and reassemble it into `dest`.
pub fn reassemble_file<R>(
    map_path: &Path,
    key: &str,
    chunks: &R,
    dest: &Path,
    opts: &ReassembleOptions,
) -> Result<ReassembleReport>
where
    R: ChunkResolver + ?Sized,
{
    let map = MapFile::load(map_path)?;
    let section = map.section(key)?;
    reassemble(section, &map.defaults, chunks, dest, opts)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn ensure_space(dest: &Path, needed: u64) -> Result<()> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match fs2::available_space(dir) {
        Ok(avail) if avail < needed => Err(Error::write(
            dest,
            io::Error::other(format!("need {needed} bytes, {avail} available")),
        )),
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "free space unknown");
            Ok(())
        }
    }
}

fn assemble_into<R>(
    part: &Path,
    section: &FileSection,
    defaults: &Defaults,
    chunks: &R,
    opts: &ReassembleOptions,
) -> Result<u64>
where
    R: ChunkResolver + ?Sized,
{
    let mut out = File::create(part).map_err(|e| Error::write(part, e))?;
    let mut whole = Accumulator::new(defaults.hash);
    let mut buf = vec![0u8; defaults.block_size];

    for rec in &section.records {
        let path = chunks.resolve(&rec.label)?;
        let actual = hash::digest_file(&path, defaults.hash, defaults.block_size, &opts.cancel)?;
        if actual != rec.chunk_digest {
            return Err(Error::DigestMismatch {
                label: rec.label.clone(),
                expected: rec.chunk_digest.clone(),
                actual,
            });
        }

        let mut f = File::open(&path).map_err(|e| Error::unreadable(&path, e))?;
        let mut copied = Accumulator::new(defaults.hash);
        loop {
            opts.cancel.check()?;
            let n = read_block(&mut f, &mut buf).map_err(|e| Error::unreadable(&path, e))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).map_err(|e| Error::write(part, e))?;
            copied.update(&buf[..n]);
            whole.update(&buf[..n]);
            opts.progress.add_bytes(n as u64);
        }
        // The chunk file may have changed since it was verified.
        let recopied = copied.digest_now();
        if recopied != rec.chunk_digest {
            return Err(Error::DigestMismatch {
                label: rec.label.clone(),
                expected: rec.chunk_digest.clone(),
                actual: recopied,
            });
        }
        if whole.digest_now() != rec.cumulative_digest {
            return Err(Error::CumulativeDigestMismatch { label: rec.label.clone() });
        }
        tracing::debug!(label = %rec.label, bytes = copied.bytes_fed(), "chunk appended");
        opts.progress.inc_chunk();
    }
    out.sync_all().map_err(|e| Error::write(part, e))?;

    let actual = whole.digest_now();
    if actual != section.file_checksum {
        return Err(Error::FileChecksumMismatch {
            expected: section.file_checksum.clone(),
            actual,
        });
    }
    Ok(whole.bytes_fed())
}
