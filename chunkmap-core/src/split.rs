use crate::cancel::CancelToken;
use crate::config::Defaults;
use crate::error::{Error, Result};
use crate::hash::Accumulator;
use crate::map::{self, ChunkRecord, FileSection, MapFile};
use crate::path_safety::{ChunkDir, ChunkResolver};
use crate::progress::Progress;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// How the source path is recorded in the map file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PathMode {
    #[default]
    AsGiven,
    Absolute,
}

#[derive(Clone, Debug)]
pub struct SplitOptions {
    /// Materialize chunk files; when false only the map is produced.
    pub write_chunks: bool,
    pub chunk_dir: PathBuf,
    pub path_mode: PathMode,
    pub cancel: CancelToken,
    pub progress: Progress,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            write_chunks: true,
            chunk_dir: PathBuf::from("."),
            path_mode: PathMode::AsGiven,
            cancel: CancelToken::new(),
            progress: Progress::default(),
        }
    }
}

pub struct Splitter;

impl Splitter {
    /// Stream `source` in `block_size` reads, cutting a chunk whenever the
    /// bytes accumulated since the last cut reach `chunk_size`.
    ///
    /// The boundary test runs after each block, so a chunk holds between
    /// `chunk_size` and `chunk_size + block_size - 1` bytes (the last chunk may
    /// be shorter, and is empty when the stream ends exactly on a boundary).
    /// Chunk files created by a failed or cancelled split are removed.
    pub fn split(source: &Path, defaults: &Defaults, opts: &SplitOptions) -> Result<FileSection> {
        defaults.validate()?;
        let source_path = stored_path(source, opts.path_mode)?;
        let mut created: Vec<PathBuf> = Vec::new();
        opts.progress.start();
        let res = split_stream(source, source_path, defaults, opts, &mut created);
        opts.progress.stop();
        if let Err(e) = &res {
            tracing::warn!(source = %source.display(), error = %e, "split failed, removing chunk files");
            for p in &created {
                let _ = fs::remove_file(p);
            }
        }
        res
    }

    /// Split `source` and write the resulting map to `map_path`.
    ///
    /// With `append`, an existing map is loaded, its defaults take precedence
    /// over `defaults`, and this file's section is added or replaced. The map
    /// is only written once the split has fully succeeded.
    pub fn generate(
        source: &Path,
        map_path: &Path,
        defaults: &Defaults,
        opts: &SplitOptions,
        append: bool,
    ) -> Result<MapFile> {
        let mut map = if append && map_path.exists() {
            let existing = MapFile::load(map_path)?;
            if existing.defaults != *defaults {
                tracing::warn!(
                    map = %map_path.display(),
                    "appending with the defaults already recorded in the map file"
                );
            }
            existing
        } else {
            MapFile::new(defaults.clone())
        };
        let section = Self::split(source, &map.defaults, opts)?;
        tracing::info!(
            source = %section.source_path,
            bytes = section.file_size,
            chunks = section.records.len(),
            checksum = %section.file_checksum,
            "split complete"
        );
        map.upsert(section);
        map.save(map_path)?;
        Ok(map)
    }
}

fn stored_path(source: &Path, mode: PathMode) -> Result<String> {
    let p = match mode {
        PathMode::AsGiven => source.to_path_buf(),
        PathMode::Absolute => std::path::absolute(source).map_err(|e| Error::io(source, e))?,
    };
    match p.to_str() {
        Some(s) if map::is_representable(s) => Ok(s.to_string()),
        _ => Err(Error::UnrepresentablePath(p)),
    }
}

/// Fill `buf` from `r`, short only at end of stream.
pub(crate) fn read_block<R: Read>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

struct ChunkState {
    index: u64,
    start: u64,
    filled: u64,
    digest: Accumulator,
    out: Option<(PathBuf, File)>,
}

impl ChunkState {
    fn record(&self, defaults: &Defaults, end: u64, whole: &Accumulator) -> ChunkRecord {
        ChunkRecord {
            label: defaults.label(self.index),
            start: self.start,
            end,
            chunk_digest: self.digest.digest_now(),
            cumulative_digest: whole.digest_now(),
        }
    }

    fn open_output(
        &mut self,
        defaults: &Defaults,
        chunks: &ChunkDir,
        created: &mut Vec<PathBuf>,
    ) -> Result<&mut (PathBuf, File)> {
        let out = match self.out.take() {
            Some(out) => out,
            None => {
                let path = chunks.resolve(&defaults.label(self.index))?;
                tracing::debug!(chunk = %path.display(), "opening chunk file");
                let f = File::create(&path).map_err(|e| Error::write(&path, e))?;
                created.push(path.clone());
                (path, f)
            }
        };
        Ok(self.out.insert(out))
    }

    fn close_output(&mut self) -> Result<()> {
        if let Some((path, mut f)) = self.out.take() {
            f.flush().map_err(|e| Error::write(&path, e))?;
        }
        Ok(())
    }
}

fn split_stream(
    source: &Path,
    source_path: String,
    defaults: &Defaults,
    opts: &SplitOptions,
    created: &mut Vec<PathBuf>,
) -> Result<FileSection> {
    let mut src = File::open(source).map_err(|e| Error::unreadable(source, e))?;
    let file_size = src.metadata().map_err(|e| Error::unreadable(source, e))?.len();
    let declared = defaults.declared_chunk_count(file_size);
    let chunks = ChunkDir::new(&opts.chunk_dir);
    tracing::info!(
        source = %source.display(),
        bytes = file_size,
        declared_chunks = declared,
        "splitting"
    );
    opts.progress.begin("Splitting", declared, file_size);

    let mut whole = Accumulator::new(defaults.hash);
    let mut chunk = ChunkState {
        index: 0,
        start: 0,
        filled: 0,
        digest: Accumulator::new(defaults.hash),
        out: None,
    };
    let mut records = Vec::new();
    let mut offset = 0u64;
    let mut buf = vec![0u8; defaults.block_size];

    loop {
        if chunk.index >= declared {
            return Err(Error::ChunkCountExceeded { declared });
        }
        opts.cancel.check()?;
        let n = read_block(&mut src, &mut buf).map_err(|e| Error::unreadable(source, e))?;
        if n == 0 {
            break;
        }
        let block = &buf[..n];
        if opts.write_chunks {
            let (path, f) = chunk.open_output(defaults, &chunks, created)?;
            f.write_all(block).map_err(|e| Error::write(path.as_path(), e))?;
        }
        chunk.digest.update(block);
        whole.update(block);
        offset += n as u64;
        chunk.filled += n as u64;
        opts.progress.add_bytes(n as u64);

        if chunk.filled >= defaults.chunk_size {
            let rec = chunk.record(defaults, offset, &whole);
            tracing::debug!(
                label = %rec.label,
                start = rec.start,
                end = rec.end,
                digest = %rec.chunk_digest,
                "chunk boundary"
            );
            records.push(rec);
            chunk.close_output()?;
            chunk.digest.reset();
            chunk.index += 1;
            chunk.start = offset;
            chunk.filled = 0;
            opts.progress.inc_chunk();
        }
    }

    if offset != file_size {
        return Err(Error::SourceChanged {
            path: source.to_path_buf(),
            expected: file_size,
            actual: offset,
        });
    }
    if opts.write_chunks {
        // An empty trailing chunk still gets a (zero-length) file.
        chunk.open_output(defaults, &chunks, created)?;
    }
    let last = chunk.record(defaults, offset, &whole);
    tracing::debug!(
        label = %last.label,
        start = last.start,
        end = last.end,
        digest = %last.chunk_digest,
        "last chunk"
    );
    records.push(last);
    chunk.close_output()?;
    opts.progress.inc_chunk();

    Ok(FileSection {
        source_path,
        file_size,
        declared_chunk_count: declared,
        records,
        file_checksum: whole.digest_now(),
    })
}
