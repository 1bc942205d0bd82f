use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use tempfile::tempdir;

use dustbin_core::{address, Error, TrashEngine, TrashLimits, TrashRegistry};

fn test_engine(root: &Path) -> TrashEngine {
    let registry = TrashRegistry::with_roots(root.join("Trash"), vec![]).unwrap();
    let mut engine = TrashEngine::new(registry, TrashLimits::default());
    engine.init().unwrap();
    engine
}

/// Layout used by the directory-shaped tests:
///   victim/
///     top.txt            ("top level")
///     nested/
///       leaf.txt         ("leaf content")
///       link             (symlink -> ../top.txt)
fn create_victim_dir(parent: &Path) -> std::path::PathBuf {
    let victim = parent.join("victim");
    fs::create_dir_all(victim.join("nested")).unwrap();
    fs::write(victim.join("top.txt"), "top level").unwrap();
    fs::write(victim.join("nested/leaf.txt"), "leaf content").unwrap();
    symlink("../top.txt", victim.join("nested/link")).unwrap();
    victim
}

#[test]
fn test_trash_file_concrete_scenario() {
    let tmp = tempdir().unwrap();
    let mut engine = test_engine(tmp.path());
    let trash_root = tmp.path().join("Trash");

    let src = tmp.path().join("report.txt");
    fs::write(&src, "twelve bytes").unwrap(); // 12 bytes

    let item = engine.trash(&src).unwrap();
    assert_eq!(item.trash_id, 0);
    assert_eq!(item.file_id, "report.txt");
    assert!(!src.exists());

    let content = trash_root.join("files/report.txt");
    assert_eq!(fs::metadata(&content).unwrap().len(), 12);
    let info = fs::read_to_string(trash_root.join("info/report.txt.trashinfo")).unwrap();
    assert!(info.contains(&format!(
        "Path={}",
        urlencoding::encode(&src.to_string_lossy())
    )));

    // Recreate the source and trash it again: same base name, new id.
    fs::write(&src, "twelve bytes").unwrap();
    let second = engine.trash(&src).unwrap();
    assert_eq!(second.file_id, "report.txt (1)");

    // Deleting the first leaves the second untouched.
    engine.del(0, "report.txt", "").unwrap();
    assert!(!content.exists());
    assert!(!trash_root.join("info/report.txt.trashinfo").exists());
    assert!(trash_root.join("files/report.txt (1)").exists());
    assert!(trash_root.join("info/report.txt (1).trashinfo").exists());
}

#[test]
fn test_restore_reproduces_file_and_removes_record() {
    let tmp = tempdir().unwrap();
    let mut engine = test_engine(tmp.path());

    let src = tmp.path().join("notes.md");
    fs::write(&src, "# scribbles\n").unwrap();

    let item = engine.trash(&src).unwrap();
    assert!(!src.exists());
    assert!(!engine.is_empty());

    let restored_to = engine.restore(item.trash_id, &item.file_id).unwrap();
    assert_eq!(restored_to, src);
    assert_eq!(fs::read_to_string(&src).unwrap(), "# scribbles\n");
    assert!(engine.is_empty());
    assert!(matches!(
        engine.info_for_file(item.trash_id, &item.file_id),
        Err(Error::DoesNotExist { .. })
    ));
}

#[test]
fn test_restore_preserves_symlink_target() {
    let tmp = tempdir().unwrap();
    let mut engine = test_engine(tmp.path());

    let link = tmp.path().join("dangling");
    symlink("/nowhere/in/particular", &link).unwrap();

    let item = engine.trash(&link).unwrap();
    engine.restore(item.trash_id, &item.file_id).unwrap();
    assert_eq!(
        fs::read_link(&link).unwrap(),
        Path::new("/nowhere/in/particular")
    );
}

#[test]
fn test_restore_to_missing_parent_fails_closed() {
    let tmp = tempdir().unwrap();
    let mut engine = test_engine(tmp.path());

    let parent = tmp.path().join("workdir");
    fs::create_dir(&parent).unwrap();
    let src = parent.join("draft.txt");
    fs::write(&src, "draft").unwrap();

    let item = engine.trash(&src).unwrap();
    fs::remove_dir(&parent).unwrap();

    let err = engine.restore(item.trash_id, &item.file_id).unwrap_err();
    assert!(matches!(err, Error::RestoreTargetMissing { .. }));

    // The missing directory was not auto-created, and the item is still
    // fully in the trash.
    assert!(!parent.exists());
    assert!(item.physical_path.exists());
    assert!(engine.info_for_file(item.trash_id, &item.file_id).is_ok());
}

#[test]
fn test_restore_to_occupied_target_is_rejected() {
    let tmp = tempdir().unwrap();
    let mut engine = test_engine(tmp.path());

    let src = tmp.path().join("clash.txt");
    fs::write(&src, "original").unwrap();
    let item = engine.trash(&src).unwrap();

    fs::write(&src, "squatter").unwrap();
    let err = engine.restore(item.trash_id, &item.file_id).unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));
    assert_eq!(fs::read_to_string(&src).unwrap(), "squatter");
    assert!(item.physical_path.exists());
}

#[test]
fn test_directory_roundtrip_with_nested_symlink() {
    let tmp = tempdir().unwrap();
    let mut engine = test_engine(tmp.path());
    let victim = create_victim_dir(tmp.path());

    let item = engine.trash(&victim).unwrap();
    assert!(!victim.exists());

    // Nested entries are addressable below the top-level file id.
    let leaf = engine
        .physical_path(item.trash_id, &item.file_id, "nested/leaf.txt")
        .unwrap();
    assert_eq!(fs::read_to_string(leaf).unwrap(), "leaf content");

    engine.restore(item.trash_id, &item.file_id).unwrap();
    assert_eq!(fs::read_to_string(victim.join("top.txt")).unwrap(), "top level");
    assert_eq!(
        fs::read_link(victim.join("nested/link")).unwrap(),
        Path::new("../top.txt")
    );
}

#[test]
fn test_delete_inside_trashed_directory_is_all_or_nothing() {
    let tmp = tempdir().unwrap();
    let mut engine = test_engine(tmp.path());
    let victim = create_victim_dir(tmp.path());

    let item = engine.trash(&victim).unwrap();

    let err = engine
        .del(item.trash_id, &item.file_id, "nested/leaf.txt")
        .unwrap_err();
    assert!(matches!(err, Error::CannotDeletePartial { .. }));

    // Both the content and the record are intact.
    assert!(item.physical_path.join("nested/leaf.txt").exists());
    assert!(engine.info_for_file(item.trash_id, &item.file_id).is_ok());

    // Whole-item delete removes both.
    engine.del(item.trash_id, &item.file_id, "").unwrap();
    assert!(!item.physical_path.exists());
    assert!(matches!(
        engine.info_for_file(item.trash_id, &item.file_id),
        Err(Error::DoesNotExist { .. })
    ));
}

#[test]
fn test_del_unknown_file_id() {
    let tmp = tempdir().unwrap();
    let mut engine = test_engine(tmp.path());
    assert!(matches!(
        engine.del(0, "never-trashed", ""),
        Err(Error::DoesNotExist { .. })
    ));
}

#[test]
fn test_list_and_addresses() {
    let tmp = tempdir().unwrap();
    let mut engine = test_engine(tmp.path());

    let a = tmp.path().join("a.txt");
    let b = tmp.path().join("b.txt");
    fs::write(&a, "aa").unwrap();
    fs::write(&b, "bb").unwrap();
    engine.trash(&a).unwrap();
    engine.trash(&b).unwrap();

    let mut items = engine.list();
    items.sort_by(|x, y| x.file_id.cmp(&y.file_id));
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].file_id, "a.txt");
    assert_eq!(items[0].orig_path, a);
    assert_eq!(items[1].deletion_date.is_some(), true);

    // Every listed item resolves back through its external address.
    for item in &items {
        let encoded = address::encode(item.trash_id, &item.file_id, &item.relative_path);
        let decoded = address::decode(&encoded).unwrap();
        let physical = engine
            .physical_path(decoded.trash_id, &decoded.file_id, &decoded.relative_path)
            .unwrap();
        assert_eq!(physical, item.physical_path);
    }
}

#[test]
fn test_empty_trash_clears_every_record() {
    let tmp = tempdir().unwrap();
    let mut engine = test_engine(tmp.path());

    let file = tmp.path().join("loose.txt");
    fs::write(&file, "x").unwrap();
    let dir = create_victim_dir(tmp.path());
    engine.trash(&file).unwrap();
    engine.trash(&dir).unwrap();
    assert_eq!(engine.list().len(), 2);

    engine.empty_trash().unwrap();
    assert!(engine.is_empty());
    assert_eq!(engine.list().len(), 0);
    let trash_root = tmp.path().join("Trash");
    assert_eq!(fs::read_dir(trash_root.join("files")).unwrap().count(), 0);
    assert_eq!(fs::read_dir(trash_root.join("info")).unwrap().count(), 0);
}

#[test]
fn test_copy_to_trash_retains_source() {
    let tmp = tempdir().unwrap();
    let mut engine = test_engine(tmp.path());

    let src = tmp.path().join("keep.txt");
    fs::write(&src, "keep me").unwrap();

    let (trash_id, file_id) = engine.create_info(&src).unwrap();
    engine.copy_to_trash(&src, trash_id, &file_id).unwrap();

    assert_eq!(fs::read_to_string(&src).unwrap(), "keep me");
    let physical = engine.physical_path(trash_id, &file_id, "").unwrap();
    assert_eq!(fs::read_to_string(physical).unwrap(), "keep me");

    // And copy back out next to the original.
    let out = tmp.path().join("copy-out.txt");
    engine.copy_from_trash(&out, trash_id, &file_id, "").unwrap();
    assert_eq!(fs::read_to_string(out).unwrap(), "keep me");
    assert!(engine.info_for_file(trash_id, &file_id).is_ok());
}

#[test]
fn test_trash_size_tracks_directory_contents() {
    let tmp = tempdir().unwrap();
    let mut engine = test_engine(tmp.path());
    let victim = create_victim_dir(tmp.path());
    let expected = "top level".len() as u64 + "leaf content".len() as u64;

    let item = engine.trash(&victim).unwrap();
    let total = engine.trash_size(0).unwrap();
    // Symlink sizes vary by filesystem; the regular files must be counted.
    assert!(total >= expected, "expected at least {}, got {}", expected, total);

    engine.del(item.trash_id, &item.file_id, "").unwrap();
    assert_eq!(engine.trash_size(0).unwrap(), 0);
}

#[test]
fn test_physical_path_for_missing_item() {
    let tmp = tempdir().unwrap();
    let engine = test_engine(tmp.path());
    assert!(matches!(
        engine.physical_path(0, "ghost", ""),
        Err(Error::DoesNotExist { .. })
    ));
}
