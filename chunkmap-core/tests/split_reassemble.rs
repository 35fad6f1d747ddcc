use chunkmap_core::hash::Accumulator;
use chunkmap_core::reassemble::{reassemble, ReassembleOptions};
use chunkmap_core::split::{PathMode, SplitOptions, Splitter};
use chunkmap_core::verify::{verify, VerifyOptions};
use chunkmap_core::{CancelToken, ChunkDir, Defaults, Error, HashAlgorithm, MapFile};
use proptest::prelude::*;
use std::fs;
use std::path::Path;

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..len).map(|_| rng.u8(..)).collect()
}

fn defaults(chunk_size: u64, block_size: usize, hash: HashAlgorithm) -> Defaults {
    Defaults { chunk_size, block_size, label_prefix: "c".into(), hash }
}

fn opts_in(dir: &Path) -> SplitOptions {
    SplitOptions { chunk_dir: dir.to_path_buf(), ..SplitOptions::default() }
}

fn digest(alg: HashAlgorithm, bytes: &[u8]) -> String {
    let mut acc = Accumulator::new(alg);
    acc.update(bytes);
    acc.digest_now()
}

#[test]
fn three_megabyte_file_splits_into_three_chunks() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("big.bin");
    let data = random_bytes(3_000_000, 7);
    fs::write(&src, &data).unwrap();

    let d = defaults(1_048_576, 65_536, HashAlgorithm::Sha1);
    let section = Splitter::split(&src, &d, &opts_in(tmp.path())).unwrap();

    assert_eq!(section.file_size, 3_000_000);
    assert_eq!(section.declared_chunk_count, 3);
    let bounds: Vec<(u64, u64)> = section.records.iter().map(|r| (r.start, r.end)).collect();
    assert_eq!(bounds, vec![(0, 1_048_576), (1_048_576, 2_097_152), (2_097_152, 3_000_000)]);

    for r in &section.records {
        let slice = &data[r.start as usize..r.end as usize];
        assert_eq!(r.chunk_digest, digest(HashAlgorithm::Sha1, slice), "{}", r.label);
        assert_eq!(r.cumulative_digest, digest(HashAlgorithm::Sha1, &data[..r.end as usize]));
        let on_disk = fs::read(tmp.path().join(&r.label)).unwrap();
        assert_eq!(on_disk, slice);
    }
    assert_eq!(section.file_checksum, digest(HashAlgorithm::Sha1, &data));
    section.check_chunk_count(&d).unwrap();

    let chunks = ChunkDir::new(tmp.path());
    let report = verify(&section, &d, &chunks, &VerifyOptions::default()).unwrap();
    assert!(report.all_passed());
    let dest = tmp.path().join("big.out");
    let done = reassemble(&section, &d, &chunks, &dest, &ReassembleOptions::default()).unwrap();
    assert_eq!(done.file_checksum, section.file_checksum);
    assert_eq!(fs::read(&dest).unwrap(), data);
}

#[test]
fn empty_file_yields_single_empty_chunk() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("empty");
    fs::write(&src, b"").unwrap();

    let d = defaults(1024, 256, HashAlgorithm::Sha256);
    let section = Splitter::split(&src, &d, &opts_in(tmp.path())).unwrap();

    assert_eq!(section.declared_chunk_count, 1);
    assert_eq!(section.records.len(), 1);
    let r = &section.records[0];
    assert_eq!((r.label.as_str(), r.start, r.end), ("c0", 0, 0));
    assert_eq!(r.chunk_digest, digest(HashAlgorithm::Sha256, b""));
    assert_eq!(r.cumulative_digest, section.file_checksum);
    assert_eq!(fs::metadata(tmp.path().join("c0")).unwrap().len(), 0);
}

#[test]
fn exact_multiple_leaves_empty_trailing_chunk() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("exact");
    let data = random_bytes(4096, 1);
    fs::write(&src, &data).unwrap();

    let d = defaults(1024, 512, HashAlgorithm::Sha1);
    let section = Splitter::split(&src, &d, &opts_in(tmp.path())).unwrap();

    assert_eq!(section.declared_chunk_count, 5);
    assert_eq!(section.records.len(), 5);
    let last = section.records.last().unwrap();
    assert_eq!((last.start, last.end), (4096, 4096));
    assert!(last.is_empty());
    assert_eq!(last.cumulative_digest, section.file_checksum);
    assert!(tmp.path().join("c4").exists());
}

#[test]
fn chunk_overruns_when_block_does_not_divide_chunk() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("odd");
    let data = random_bytes(2500, 3);
    fs::write(&src, &data).unwrap();

    let d = defaults(1000, 300, HashAlgorithm::Sha1);
    let section = Splitter::split(&src, &d, &opts_in(tmp.path())).unwrap();

    let bounds: Vec<(u64, u64)> = section.records.iter().map(|r| (r.start, r.end)).collect();
    assert_eq!(bounds, vec![(0, 1200), (1200, 2400), (2400, 2500)]);
    assert!(section.records.iter().all(|r| r.len() <= d.max_chunk_len()));
    assert!(section.records.len() as u64 <= section.declared_chunk_count);
}

#[test]
fn map_only_writes_no_chunk_files() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src.bin");
    fs::write(&src, random_bytes(5000, 9)).unwrap();
    let chunks = tmp.path().join("chunks");
    fs::create_dir(&chunks).unwrap();

    let d = defaults(2048, 512, HashAlgorithm::Blake3);
    let opts = SplitOptions { write_chunks: false, ..opts_in(&chunks) };
    let section = Splitter::split(&src, &d, &opts).unwrap();

    assert_eq!(section.records.len(), 3);
    assert_eq!(fs::read_dir(&chunks).unwrap().count(), 0);
}

#[test]
fn cancelled_split_removes_chunk_files() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src.bin");
    fs::write(&src, random_bytes(8192, 4)).unwrap();
    let chunks = tmp.path().join("chunks");
    fs::create_dir(&chunks).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let opts = SplitOptions { cancel, ..opts_in(&chunks) };
    let err = Splitter::split(&src, &defaults(1024, 256, HashAlgorithm::Sha1), &opts).unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(fs::read_dir(&chunks).unwrap().count(), 0);
}

#[cfg(unix)]
#[test]
fn endless_source_hits_chunk_bound() {
    let tmp = tempfile::tempdir().unwrap();
    let chunks = tmp.path().join("chunks");
    fs::create_dir(&chunks).unwrap();

    // /dev/zero reports a size of 0, so only one chunk is declared.
    let err = Splitter::split(
        Path::new("/dev/zero"),
        &defaults(1024, 256, HashAlgorithm::Sha1),
        &opts_in(&chunks),
    )
    .unwrap_err();

    assert!(matches!(err, Error::ChunkCountExceeded { declared: 1 }), "{err:?}");
    assert_eq!(fs::read_dir(&chunks).unwrap().count(), 0);
}

#[cfg(target_os = "linux")]
#[test]
fn source_longer_than_its_reported_size_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let chunks = tmp.path().join("chunks");
    fs::create_dir(&chunks).unwrap();

    // procfs files report a size of 0 but yield a few hundred bytes.
    let err = Splitter::split(
        Path::new("/proc/self/stat"),
        &defaults(1 << 20, 4096, HashAlgorithm::Sha1),
        &opts_in(&chunks),
    )
    .unwrap_err();

    assert!(
        matches!(err, Error::SourceChanged { expected: 0, actual, .. } if actual > 0),
        "{err:?}"
    );
    assert_eq!(fs::read_dir(&chunks).unwrap().count(), 0);
}

#[test]
fn missing_source_is_unreadable() {
    let tmp = tempfile::tempdir().unwrap();
    let err = Splitter::split(
        &tmp.path().join("nope"),
        &defaults(1024, 256, HashAlgorithm::Sha1),
        &opts_in(tmp.path()),
    )
    .unwrap_err();
    assert!(matches!(err, Error::SourceUnreadable { .. }));
}

#[test]
fn block_larger_than_chunk_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src.bin");
    fs::write(&src, b"abc").unwrap();
    let err = Splitter::split(&src, &defaults(100, 200, HashAlgorithm::Sha1), &opts_in(tmp.path()))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn absolute_mode_records_absolute_path() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("abs.bin");
    fs::write(&src, b"hello world").unwrap();

    let opts = SplitOptions { path_mode: PathMode::Absolute, ..opts_in(tmp.path()) };
    let section = Splitter::split(&src, &defaults(1024, 256, HashAlgorithm::Sha1), &opts).unwrap();
    assert!(Path::new(&section.source_path).is_absolute());
}

#[test]
fn generate_then_reassemble_restores_bytes() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("payload.bin");
    let data = random_bytes(10_000, 11);
    fs::write(&src, &data).unwrap();
    let map_path = tmp.path().join("payload.map");

    let d = defaults(4096, 1024, HashAlgorithm::Sha256);
    let map = Splitter::generate(&src, &map_path, &d, &opts_in(tmp.path()), false).unwrap();
    assert_eq!(MapFile::load(&map_path).unwrap(), map);

    let key = src.to_str().unwrap();
    let section = map.section(key).unwrap();
    let dest = tmp.path().join("restored.bin");
    let report = reassemble(
        section,
        &map.defaults,
        &ChunkDir::new(tmp.path()),
        &dest,
        &ReassembleOptions::default(),
    )
    .unwrap();

    assert_eq!(report.bytes, data.len() as u64);
    assert_eq!(report.chunks, 3);
    assert_eq!(fs::read(&dest).unwrap(), data);
}

#[test]
fn append_keeps_existing_sections_and_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let a = tmp.path().join("a.bin");
    let b = tmp.path().join("b.bin");
    fs::write(&a, random_bytes(3000, 21)).unwrap();
    fs::write(&b, random_bytes(1500, 22)).unwrap();
    let map_path = tmp.path().join("both.map");

    let first = defaults(1024, 256, HashAlgorithm::Sha1);
    Splitter::generate(&a, &map_path, &first, &opts_in(tmp.path()), false).unwrap();
    let other = defaults(2048, 512, HashAlgorithm::Sha512);
    let map = Splitter::generate(&b, &map_path, &other, &opts_in(tmp.path()), true).unwrap();

    assert_eq!(map.defaults, first);
    assert_eq!(map.sections.len(), 2);
    assert_eq!(map.section(b.to_str().unwrap()).unwrap().records.len(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn split_then_reassemble_is_identity(
        len in 0usize..6000,
        chunk in 64u64..2048,
        block_div in 1u64..8,
        seed in any::<u64>(),
    ) {
        let block = (chunk / block_div).max(1) as usize;
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.bin");
        let data = random_bytes(len, seed);
        fs::write(&src, &data).unwrap();

        let d = defaults(chunk, block, HashAlgorithm::Sha1);
        let section = Splitter::split(&src, &d, &opts_in(tmp.path())).unwrap();

        prop_assert_eq!(section.records.first().unwrap().start, 0);
        prop_assert_eq!(section.records.last().unwrap().end, len as u64);
        for w in section.records.windows(2) {
            prop_assert_eq!(w[0].end, w[1].start);
        }
        prop_assert!(section.records.len() as u64 <= section.declared_chunk_count);

        let dest = tmp.path().join("out.bin");
        reassemble(&section, &d, &ChunkDir::new(tmp.path()), &dest, &ReassembleOptions::default())
            .unwrap();
        prop_assert_eq!(fs::read(&dest).unwrap(), data);
    }
}
