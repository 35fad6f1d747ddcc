use anyhow::{anyhow, Context, Result};
use chunkmap_core::map::MapFile;
use chunkmap_core::path_safety::{ChunkDir, PathPolicy};
use chunkmap_core::reassemble::{reassemble, ReassembleOptions};
use chunkmap_core::split::{PathMode, SplitOptions, Splitter};
use chunkmap_core::verify::{verify, FailureReason, VerifyOptions, VerifyReport};
use chunkmap_core::{Defaults, ErrorKind, HashAlgorithm};
use clap::{ArgGroup, Parser};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const EXIT_CHUNKS_FAILED: u8 = 1;
const EXIT_UNREADABLE: u8 = 3;
const EXIT_MALFORMED_MAP: u8 = 4;
const EXIT_INTEGRITY: u8 = 5;
const EXIT_CHUNK_COUNT: u8 = 6;
const EXIT_CONFIG: u8 = 7;
const EXIT_CANCELLED: u8 = 8;
const EXIT_IO: u8 = 10;

#[derive(Parser)]
#[command(
    name = "chunkmap",
    version,
    about = "Split a large file into verifiable chunks, check them, and put them back together"
)]
#[command(group(ArgGroup::new("mode").required(true).args(["generate", "examine", "reassemble"])))]
struct Cli {
    /// Map file to write (generate) or read (examine, reassemble)
    #[arg(short = 'm', long)]
    mapfile: PathBuf,
    /// File to chunk, or the file whose section is looked up in the map
    #[arg(short = 'f', long = "filetoprocess")]
    file: PathBuf,

    /// Split the file into chunks and write the map
    #[arg(short = 'g', long)]
    generate: bool,
    /// Verify existing chunk files against the map
    #[arg(short = 'x', long)]
    examine: bool,
    /// Rebuild the file from its chunks
    #[arg(short = 'r', long)]
    reassemble: bool,

    /// Chunk size for generate (K/M/G suffixes allowed)
    #[arg(long, value_parser = parse_size)]
    chunk_size: Option<u64>,
    /// Read block size for generate (K/M/G suffixes allowed)
    #[arg(long, value_parser = parse_size)]
    block_size: Option<u64>,
    /// Chunk label prefix for generate
    #[arg(long)]
    label_prefix: Option<String>,
    /// Digest algorithm for generate (sha1, sha224, sha256, sha384, sha512, blake3)
    #[arg(long)]
    hash: Option<String>,
    /// Record the absolute source path in the map
    #[arg(long)]
    absolute_paths: bool,
    /// Only write the map, no chunk files
    #[arg(long)]
    map_only: bool,
    /// Add this file's section to an existing map instead of starting fresh
    #[arg(long)]
    append: bool,

    /// Directory holding the chunk files
    #[arg(long, default_value = ".")]
    chunk_dir: PathBuf,
    /// Accept chunk files that are symlinks inside the chunk directory
    #[arg(long)]
    follow_symlinks: bool,

    /// Reassembly destination (defaults to --filetoprocess)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
    /// Overwrite an existing reassembly destination
    #[arg(long)]
    force: bool,

    /// Parallel verification workers for examine
    #[arg(short = 'j', long)]
    jobs: Option<usize>,
    /// Print the examine report as JSON
    #[arg(long)]
    json: bool,

    /// Log progress periodically
    #[arg(long)]
    progress: bool,
    /// Debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<ExitCode> {
    if cli.generate {
        generate(cli)?;
        Ok(ExitCode::SUCCESS)
    } else {
        warn_ignored_generate_flags(cli);
        if cli.examine {
            examine(cli)
        } else {
            rebuild(cli)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn defaults_from_flags(cli: &Cli) -> Result<Defaults> {
    let mut d = Defaults::default();
    if let Some(v) = cli.chunk_size {
        d.chunk_size = v;
    }
    if let Some(v) = cli.block_size {
        d.block_size = usize::try_from(v).map_err(|_| anyhow!("block size {v} too large"))?;
    }
    if let Some(p) = &cli.label_prefix {
        d.label_prefix = p.clone();
    }
    if let Some(h) = &cli.hash {
        d.hash = h.parse::<HashAlgorithm>()?;
    }
    d.validate()?;
    Ok(d)
}

fn warn_ignored_generate_flags(cli: &Cli) {
    let given = [
        ("--chunk-size", cli.chunk_size.is_some()),
        ("--block-size", cli.block_size.is_some()),
        ("--label-prefix", cli.label_prefix.is_some()),
        ("--hash", cli.hash.is_some()),
        ("--absolute-paths", cli.absolute_paths),
        ("--map-only", cli.map_only),
        ("--append", cli.append),
    ];
    for (flag, _) in given.iter().filter(|(_, set)| *set) {
        tracing::warn!("{flag} only applies to --generate; using the map file's settings");
    }
}

fn chunk_dir(cli: &Cli) -> ChunkDir {
    ChunkDir::new(&cli.chunk_dir).with_policy(PathPolicy { follow_symlinks: cli.follow_symlinks })
}

fn section_key(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| anyhow!("{} is not valid UTF-8", path.display()))
}

fn generate(cli: &Cli) -> Result<()> {
    let defaults = defaults_from_flags(cli)?;
    let opts = SplitOptions {
        write_chunks: !cli.map_only,
        chunk_dir: cli.chunk_dir.clone(),
        path_mode: if cli.absolute_paths { PathMode::Absolute } else { PathMode::AsGiven },
        progress: chunkmap_core::progress::Progress::new(cli.progress),
        ..SplitOptions::default()
    };
    let map = Splitter::generate(&cli.file, &cli.mapfile, &defaults, &opts, cli.append)
        .with_context(|| format!("generate {}", cli.file.display()))?;
    let key = section_key(&cli.file)?;
    let section = map.section(key)?;
    println!(
        "{}: {} bytes in {} chunk(s), {} {}",
        section.source_path,
        section.file_size,
        section.records.len(),
        map.defaults.hash,
        section.file_checksum
    );
    Ok(())
}

fn examine(cli: &Cli) -> Result<ExitCode> {
    let map = MapFile::load(&cli.mapfile)
        .with_context(|| format!("load map {}", cli.mapfile.display()))?;
    let section = map.section(section_key(&cli.file)?)?;
    let chunks = chunk_dir(cli);
    let opts = VerifyOptions {
        parallel: cli.jobs.is_some_and(|j| j > 1),
        progress: chunkmap_core::progress::Progress::new(cli.progress),
        ..VerifyOptions::default()
    };
    let report = match cli.jobs {
        Some(j) if j > 1 => rayon::ThreadPoolBuilder::new()
            .num_threads(j)
            .build()
            .context("start verification workers")?
            .install(|| verify(section, &map.defaults, &chunks, &opts))?,
        _ => verify(section, &map.defaults, &chunks, &opts)?,
    };
    if cli.json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(if report.all_passed() { ExitCode::SUCCESS } else { ExitCode::from(EXIT_CHUNKS_FAILED) })
}

fn print_json(report: &VerifyReport) -> Result<()> {
    let out = serde_json::json!({
        "all_passed": report.all_passed(),
        "report": report,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn print_report(report: &VerifyReport) {
    for f in &report.failures {
        match &f.reason {
            FailureReason::DigestMismatch { expected, actual } => {
                println!("{}: digest mismatch (expected {}, got {})", f.label, expected, actual)
            }
            FailureReason::Unreadable { message } => println!("{}: unreadable ({})", f.label, message),
        }
    }
    println!(
        "Chunks ok={}, bad={} of {}",
        report.chunks_ok,
        report.failures.len(),
        report.chunks_total
    );
    println!("{}", if report.all_passed() { "OK" } else { "BAD" });
}

fn rebuild(cli: &Cli) -> Result<()> {
    let map = MapFile::load(&cli.mapfile)
        .with_context(|| format!("load map {}", cli.mapfile.display()))?;
    let section = map.section(section_key(&cli.file)?)?;
    let dest = cli.output.as_deref().unwrap_or(&cli.file);
    let opts = ReassembleOptions {
        overwrite: cli.force,
        progress: chunkmap_core::progress::Progress::new(cli.progress),
        ..ReassembleOptions::default()
    };
    let report = reassemble(section, &map.defaults, &chunk_dir(cli), dest, &opts)
        .with_context(|| format!("reassemble {}", dest.display()))?;
    println!(
        "{}: {} bytes from {} chunk(s), {} {}",
        report.destination.display(),
        report.bytes,
        report.chunks,
        map.defaults.hash,
        report.file_checksum
    );
    println!("OK");
    Ok(())
}

fn exit_code(e: &anyhow::Error) -> u8 {
    let kind = e.chain().find_map(|c| c.downcast_ref::<chunkmap_core::Error>()).map(|e| e.kind());
    match kind {
        Some(ErrorKind::SourceUnreadable) => EXIT_UNREADABLE,
        Some(ErrorKind::MalformedMap) => EXIT_MALFORMED_MAP,
        Some(ErrorKind::Integrity) => EXIT_INTEGRITY,
        Some(ErrorKind::ChunkCount) => EXIT_CHUNK_COUNT,
        Some(ErrorKind::Config | ErrorKind::UnsupportedAlgorithm) => EXIT_CONFIG,
        Some(ErrorKind::Cancelled) => EXIT_CANCELLED,
        Some(ErrorKind::Io) | None => EXIT_IO,
    }
}

fn parse_size(spec: &str) -> Result<u64, String> {
    let s = spec.trim().to_uppercase();
    let (num, mul) = if let Some(n) = s.strip_suffix('K') {
        (n, 1u64 << 10)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1 << 20)
    } else if let Some(n) = s.strip_suffix('G') {
        (n, 1 << 30)
    } else {
        (s.as_str(), 1)
    };
    let v: u64 = num.trim().parse().map_err(|_| format!("bad size {spec:?}"))?;
    match v.checked_mul(mul) {
        Some(0) | None => Err(format!("size {spec:?} must be positive and fit in 64 bits")),
        Some(n) => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_with_suffixes() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("32k").unwrap(), 32 * 1024);
        assert_eq!(parse_size("500M").unwrap(), 500 * 1024 * 1024);
        assert_eq!(parse_size("2G").unwrap(), 2 << 30);
        assert!(parse_size("0").is_err());
        assert!(parse_size("12X").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn core_errors_map_to_exit_codes() {
        let e = anyhow::Error::new(chunkmap_core::Error::SectionNotFound("x".into()))
            .context("examine");
        assert_eq!(exit_code(&e), EXIT_MALFORMED_MAP);
        let e = anyhow::Error::new(chunkmap_core::Error::UnsupportedAlgorithm("md5".into()));
        assert_eq!(exit_code(&e), EXIT_CONFIG);
        assert_eq!(exit_code(&anyhow!("plain")), EXIT_IO);
    }

    #[test]
    fn cli_shape_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
