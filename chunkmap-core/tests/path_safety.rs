use chunkmap_core::path_safety::{validate_label_path, ChunkDir, ChunkResolver, PathPolicy};
use chunkmap_core::Error;
use std::fs;

#[test]
fn plain_labels_resolve_under_root() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = ChunkDir::new(tmp.path());
    assert_eq!(dir.resolve("c0").unwrap(), tmp.path().join("c0"));
    assert_eq!(dir.resolve("part12").unwrap(), tmp.path().join("part12"));
}

#[test]
fn escaping_labels_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = ChunkDir::new(tmp.path());
    for label in ["", "..", ".", "a/b", "../c0", "a\\b", "/etc/passwd"] {
        assert!(
            matches!(dir.resolve(label), Err(Error::UnsafeLabel(_))),
            "{label:?} should be rejected"
        );
    }
}

#[cfg(target_family = "unix")]
#[test]
fn symlinked_chunk_needs_policy_and_containment() {
    use std::os::unix::fs::symlink;

    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("chunks");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("real"), b"chunk bytes").unwrap();
    symlink(root.join("real"), root.join("c0")).unwrap();
    let outside = tmp.path().join("outside");
    fs::write(&outside, b"not a chunk").unwrap();
    symlink(&outside, root.join("c1")).unwrap();

    let strict = PathPolicy::default();
    assert!(matches!(validate_label_path(&root, "c0", strict), Err(Error::UnsafeLabel(_))));

    let follow = PathPolicy { follow_symlinks: true };
    let resolved = validate_label_path(&root, "c0", follow).unwrap();
    assert_eq!(fs::read(resolved).unwrap(), b"chunk bytes");
    assert!(matches!(validate_label_path(&root, "c1", follow), Err(Error::UnsafeLabel(_))));
}

#[test]
fn missing_chunk_still_resolves() {
    let tmp = tempfile::tempdir().unwrap();
    let p = validate_label_path(tmp.path(), "c9", PathPolicy::default()).unwrap();
    assert!(!p.exists());
}
