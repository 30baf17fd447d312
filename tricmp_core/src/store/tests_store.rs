use super::*;
use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::sync::atomic::AtomicUsize;
use tempfile::TempDir;
use tricmp_common::{CompareMethod, CompareResult};

fn two_way() -> ComparisonStore {
    ComparisonStore::new(Arity::Two, CompareEngine::default())
}

fn buffers(contents: &[Option<&str>]) -> Vec<Option<Vec<u8>>> {
    contents
        .iter()
        .map(|c| c.map(|s| s.as_bytes().to_vec()))
        .collect()
}

fn write_pair(dir: &TempDir, name: &str, left: &str, right: &str) -> PathSet {
    let a = dir.path().join(format!("{}.left", name));
    let b = dir.path().join(format!("{}.right", name));
    fs::write(&a, left).unwrap();
    fs::write(&b, right).unwrap();
    PathSet::new([a, b])
}

#[test]
fn test_identical_files_are_same() {
    let temp = TempDir::new().unwrap();
    let store = two_way();
    let handle = store.register_paths(write_pair(&temp, "f", "abc", "abc")).unwrap();

    let code = store.evaluate(handle).unwrap();
    assert!(code.exist_all(Arity::Two));
    assert_eq!(code.result(), CompareResult::Same);
    assert!(!code.is_binary());
    assert_eq!(store.state(handle), Some(ItemState::Evaluated));
}

#[test]
fn test_different_files_are_different() {
    let temp = TempDir::new().unwrap();
    let store = two_way();
    let handle = store.register_paths(write_pair(&temp, "f", "abc", "abd")).unwrap();

    let code = store.evaluate(handle).unwrap();
    assert!(code.is_different());
    assert!(code.exist_all(Arity::Two));
}

#[test]
fn test_three_way_missing_side_is_same_among_present() {
    let store = ComparisonStore::new(Arity::Three, CompareEngine::default());
    let (_, handle) = store
        .register_buffers(buffers(&[None, Some("x"), Some("x")]))
        .unwrap();

    let code = store.evaluate(handle).unwrap();
    assert!(!code.exists(Side::FIRST));
    assert!(code.exists(Side::SECOND));
    assert!(code.exists(Side::THIRD));
    assert!(code.is_same());
}

#[test]
fn test_unique_file_is_same() {
    let temp = TempDir::new().unwrap();
    let present = temp.path().join("only");
    fs::write(&present, b"solo").unwrap();
    let store = two_way();
    let handle = store
        .register_paths(PathSet::new([present, temp.path().join("missing")]))
        .unwrap();

    let code = store.evaluate(handle).unwrap();
    assert!(code.is_unique(Arity::Two));
    assert!(code.exists(Side::FIRST));
    assert!(code.is_same());
    assert_eq!(store.aggregate_diff_count().uniques, 1);
}

#[test]
fn test_register_is_idempotent() {
    let store = two_way();
    let paths = PathSet::new(["/a/x", "/b/x"]);
    let first = store.register_paths(paths.clone()).unwrap();
    let second = store.register_paths(paths.clone()).unwrap();
    assert_eq!(first, second);
    assert_eq!(store.len(), 1);
    assert_eq!(store.find_by_paths(&paths), Some(first));
}

#[test]
fn test_session_lookup() {
    let store = two_way();
    let (session, handle) = store.register_buffers(buffers(&[Some("a"), Some("b")])).unwrap();
    assert_eq!(store.find_session(session), Some(handle));
    assert_eq!(
        store.register_session(session, buffers(&[Some("z"), Some("z")])).unwrap(),
        handle
    );
}

#[test]
fn test_wrong_side_count_is_rejected() {
    let store = two_way();
    let result = store.register_paths(PathSet::new(["/a", "/b", "/c"]));
    assert!(matches!(
        result,
        Err(TricmpError::InconsistentSideCount { expected: 2, actual: 3 })
    ));
    assert!(store.is_empty());
}

#[test]
fn test_unknown_handle() {
    let store = two_way();
    assert!(matches!(
        store.evaluate(ItemHandle(42)),
        Err(TricmpError::UnknownItem(42))
    ));
    assert!(store.snapshot(ItemHandle(42)).is_none());
}

#[test]
fn test_remove_is_idempotent() {
    let store = two_way();
    let paths = PathSet::new(["/a/x", "/b/x"]);
    let handle = store.register_paths(paths.clone()).unwrap();
    assert!(store.remove(handle));
    assert!(!store.remove(handle));
    assert!(store.find_by_paths(&paths).is_none());
    assert!(!store.contains(handle));
}

#[test]
fn test_copy_all_marks_stale_then_same() {
    let store = two_way();
    let (_, handle) = store
        .register_buffers(buffers(&[Some("hello"), Some("world")]))
        .unwrap();
    assert!(store.evaluate(handle).unwrap().is_different());

    store.copy_all(handle, Side::FIRST, Side::SECOND).unwrap();
    assert_eq!(store.state(handle), Some(ItemState::Stale));
    assert!(store.diff_code(handle).unwrap().is_different());
    assert_eq!(store.modified_sides(handle).unwrap(), vec![Side::SECOND]);

    assert!(store.evaluate(handle).unwrap().is_same());
    assert_eq!(store.state(handle), Some(ItemState::Evaluated));
}

#[test]
fn test_copy_selection_out_of_range_changes_nothing() {
    let store = two_way();
    let (_, handle) = store
        .register_buffers(buffers(&[Some("abcdef"), Some("xyz")]))
        .unwrap();
    store.evaluate(handle).unwrap();

    let result = store.copy_selection(handle, Side::FIRST, Side::SECOND, 2..6);
    assert!(matches!(result, Err(TricmpError::Range { .. })));
    assert_eq!(store.state(handle), Some(ItemState::Evaluated));
    assert!(store.modified_sides(handle).unwrap().is_empty());
}

#[test]
fn test_copy_on_path_item_needs_buffers() {
    let store = two_way();
    let handle = store.register_paths(PathSet::new(["/a/x", "/b/x"])).unwrap();
    assert!(matches!(
        store.copy_all(handle, Side::FIRST, Side::SECOND),
        Err(TricmpError::NoBuffers(_))
    ));
}

#[test]
fn test_load_edit_and_save_round_trip() {
    let temp = TempDir::new().unwrap();
    let paths = write_pair(&temp, "doc", "new text", "old text");
    let right = paths.get(Side::SECOND).unwrap().clone();
    let store = two_way();
    let handle = store.register_paths(paths).unwrap();
    assert!(store.evaluate(handle).unwrap().is_different());

    store.load_buffers(handle).unwrap();
    store.copy_all(handle, Side::FIRST, Side::SECOND).unwrap();
    store.save_side(handle, Side::SECOND).unwrap();

    assert_eq!(fs::read_to_string(&right).unwrap(), "new text");
    assert!(store.modified_sides(handle).unwrap().is_empty());
    assert!(store.evaluate(handle).unwrap().is_same());
}

#[test]
fn test_redundant_evaluation_is_stable() {
    let temp = TempDir::new().unwrap();
    let store = two_way();
    let handle = store.register_paths(write_pair(&temp, "f", "one", "two")).unwrap();
    let first = store.evaluate(handle).unwrap();
    let second = store.evaluate(handle).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_mark_dirty_does_not_evaluate() {
    let temp = TempDir::new().unwrap();
    let paths = write_pair(&temp, "f", "same", "same");
    let right = paths.get(Side::SECOND).unwrap().clone();
    let store = two_way();
    let handle = store.register_paths(paths).unwrap();
    store.evaluate(handle).unwrap();

    fs::write(&right, "changed").unwrap();
    store.mark_dirty(handle, Side::SECOND).unwrap();
    assert_eq!(store.state(handle), Some(ItemState::Stale));
    assert!(store.diff_code(handle).unwrap().is_same());

    let summary = store.evaluate_pending(None);
    assert_eq!(summary.evaluated, 1);
    assert!(store.diff_code(handle).unwrap().is_different());
}

#[test]
fn test_mark_dirty_rejects_third_side_in_two_way() {
    let store = two_way();
    let handle = store.register_paths(PathSet::new(["/a", "/b"])).unwrap();
    assert!(matches!(
        store.mark_dirty(handle, Side::THIRD),
        Err(TricmpError::InvalidSide(_))
    ));
}

#[test]
fn test_directory_side_counts_as_missing() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("file");
    fs::write(&file, b"data").unwrap();
    let dir = temp.path().join("dir");
    fs::create_dir(&dir).unwrap();

    let store = two_way();
    let handle = store.register_paths(PathSet::new([file, dir])).unwrap();
    let code = store.evaluate(handle).unwrap();
    assert!(code.exists(Side::FIRST));
    assert!(!code.exists(Side::SECOND));
    assert!(code.is_same());
}

#[test]
fn test_concurrent_matches_sequential() {
    let temp = TempDir::new().unwrap();
    let sequential = two_way();
    let parallel = two_way().with_worker_threads(4).unwrap();

    for i in 0..32 {
        let right = if i % 3 == 0 { "changed" } else { "content" };
        let paths = write_pair(&temp, &format!("f{}", i), "content", right);
        sequential.register_paths(paths.clone()).unwrap();
        parallel.register_paths(paths).unwrap();
    }

    for handle in sequential.handles() {
        sequential.evaluate(handle).unwrap();
    }
    let summary = parallel.evaluate_all(None);
    assert_eq!(summary.evaluated, 32);
    assert!(!summary.cancelled);

    let left: Vec<DiffCode> = sequential.snapshots().iter().map(|s| s.code).collect();
    let right: Vec<DiffCode> = parallel.snapshots().iter().map(|s| s.code).collect();
    assert_eq!(left, right);
    assert_eq!(parallel.aggregate_diff_count().differences, 11);
    assert_eq!(parallel.aggregate_diff_count().identical, 21);
}

#[test]
fn test_cancelled_batch_leaves_items_unevaluated() {
    let store = two_way();
    for _ in 0..5 {
        store.register_buffers(buffers(&[Some("a"), Some("b")])).unwrap();
    }
    let cancel = AtomicBool::new(true);
    let summary = store.evaluate_all(Some(&cancel));

    assert!(summary.cancelled);
    assert_eq!(summary.evaluated, 0);
    assert_eq!(summary.skipped, 5);
    assert_eq!(store.aggregate_diff_count().unevaluated, 5);
}

#[test]
fn test_subscribers_see_commits() {
    let store = two_way();
    let rx = store.subscribe();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    store.on_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let (_, handle) = store.register_buffers(buffers(&[Some("a"), Some("a")])).unwrap();
    store.evaluate(handle).unwrap();
    store.evaluate(handle).unwrap();

    let first = rx.try_recv().unwrap();
    assert_eq!(first.handle, handle);
    assert!(!first.old.is_evaluated());
    assert!(first.new.is_same());
    let second = rx.try_recv().unwrap();
    assert!(!second.is_change());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_callback_may_reenter_store() {
    let store = Arc::new(two_way());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let weak = Arc::downgrade(&store);
    let sink = Arc::clone(&seen);
    store.on_change(move |change| {
        let Some(store) = weak.upgrade() else {
            return;
        };
        sink.lock().unwrap().push(store.diff_code(change.handle));
        store.on_change(|_| {});
    });

    let (_, handle) = store.register_buffers(buffers(&[Some("a"), Some("b")])).unwrap();
    let code = store.evaluate(handle).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![Some(code)]);
}

#[test]
fn test_date_mode_uses_timestamps() {
    let temp = TempDir::new().unwrap();
    let paths = write_pair(&temp, "f", "aaa", "bbb");
    let stamp = FileTime::from_unix_time(1_700_000_000, 0);
    for path in paths.iter() {
        set_file_mtime(path, stamp).unwrap();
    }

    let store = ComparisonStore::new(Arity::Two, CompareEngine::with_method(CompareMethod::ByDate));
    let handle = store.register_paths(paths.clone()).unwrap();
    assert!(store.evaluate(handle).unwrap().is_same());

    let later = FileTime::from_unix_time(1_700_000_100, 0);
    set_file_mtime(paths.get(Side::SECOND).unwrap(), later).unwrap();
    store.mark_dirty(handle, Side::SECOND).unwrap();
    assert!(store.evaluate(handle).unwrap().is_different());
}

#[test]
fn test_loaded_buffers_keep_file_timestamps() {
    let temp = TempDir::new().unwrap();
    let paths = write_pair(&temp, "f", "same", "same");
    let stamp = FileTime::from_unix_time(1_700_000_000, 0);
    for path in paths.iter() {
        set_file_mtime(path, stamp).unwrap();
    }

    let store = ComparisonStore::new(Arity::Two, CompareEngine::with_method(CompareMethod::ByDate));
    let handle = store.register_paths(paths).unwrap();
    let before = store.evaluate(handle).unwrap();
    assert!(before.is_same());

    store.load_buffers(handle).unwrap();
    assert_eq!(store.evaluate(handle).unwrap(), before);
}

#[test]
fn test_fresh_buffers_are_same_by_date() {
    let store = ComparisonStore::new(Arity::Two, CompareEngine::with_method(CompareMethod::ByDate));
    let (_, handle) = store.register_buffers(buffers(&[Some("x"), Some("x")])).unwrap();
    assert!(store.evaluate(handle).unwrap().is_same());
}

fn mirrored_roots(left: &TempDir, right: &TempDir) -> Vec<PathBuf> {
    for root in [left, right] {
        fs::write(root.path().join("doc.txt"), "same").unwrap();
    }
    vec![left.path().to_path_buf(), right.path().to_path_buf()]
}

#[test]
fn test_rescan_after_loading_buffers_reports_no_change() {
    let left = TempDir::new().unwrap();
    let right = TempDir::new().unwrap();
    let roots = mirrored_roots(&left, &right);
    let scanner = FolderScanner::new(&AppConfig::default());
    let store = two_way();

    store.rescan(&roots, &scanner, None).unwrap();
    store.evaluate_all(None);
    let handle = store.handles()[0];
    store.load_buffers(handle).unwrap();
    store.evaluate(handle).unwrap();

    let again = store.rescan(&roots, &scanner, None).unwrap();
    assert_eq!(again.changed, 0);
    assert_eq!(store.state(handle), Some(ItemState::Evaluated));
}

#[test]
fn test_rescan_leaves_unsaved_edits_alone() {
    let left = TempDir::new().unwrap();
    let right = TempDir::new().unwrap();
    let roots = mirrored_roots(&left, &right);
    let scanner = FolderScanner::new(&AppConfig::default());
    let store = two_way();

    store.rescan(&roots, &scanner, None).unwrap();
    let handle = store.handles()[0];
    store.load_buffers(handle).unwrap();
    store
        .copy_selection(handle, Side::FIRST, Side::SECOND, 0..2)
        .unwrap();
    store.evaluate(handle).unwrap();
    assert_eq!(store.modified_sides(handle).unwrap(), vec![Side::SECOND]);

    let again = store.rescan(&roots, &scanner, None).unwrap();
    assert_eq!(again.changed, 0);
    assert_eq!(store.state(handle), Some(ItemState::Evaluated));
}

#[test]
fn test_rescan_tracks_added_removed_and_changed() {
    let left = TempDir::new().unwrap();
    let right = TempDir::new().unwrap();
    fs::write(left.path().join("same.txt"), "x").unwrap();
    fs::write(right.path().join("same.txt"), "x").unwrap();
    fs::write(left.path().join("gone.txt"), "g").unwrap();
    fs::create_dir(right.path().join("sub")).unwrap();
    fs::write(right.path().join("sub/new.txt"), "n").unwrap();

    let roots = vec![left.path().to_path_buf(), right.path().to_path_buf()];
    let scanner = FolderScanner::new(&AppConfig::default());
    let store = two_way();

    let first = store.rescan(&roots, &scanner, None).unwrap();
    assert_eq!(first.added, 3);
    store.evaluate_all(None);
    assert_eq!(store.items_under(Path::new("sub")).len(), 1);

    fs::remove_file(left.path().join("gone.txt")).unwrap();
    fs::write(right.path().join("same.txt"), "longer").unwrap();
    let second = store.rescan(&roots, &scanner, None).unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.removed, 1);
    assert_eq!(second.changed, 1);
    assert_eq!(store.len(), 2);

    let same = store
        .find_by_paths(&PathSet::new([
            left.path().join("same.txt"),
            right.path().join("same.txt"),
        ]))
        .unwrap();
    assert_eq!(store.state(same), Some(ItemState::Stale));
    store.evaluate_pending(None);
    assert!(store.diff_code(same).unwrap().is_different());
}

#[test]
fn test_rescan_rejects_wrong_root_count() {
    let store = ComparisonStore::new(Arity::Three, CompareEngine::default());
    let scanner = FolderScanner::new(&AppConfig::default());
    let roots = vec![PathBuf::from("/a"), PathBuf::from("/b")];
    assert!(matches!(
        store.rescan(&roots, &scanner, None),
        Err(TricmpError::InconsistentSideCount { expected: 3, actual: 2 })
    ));
}

#[test]
fn test_cached_fingerprints_are_recorded() {
    let temp = TempDir::new().unwrap();
    let big = "z".repeat(20_000);
    let store = two_way().with_cache(HashCache::in_memory());
    let handle = store
        .register_paths(write_pair(&temp, "big", &big, &big))
        .unwrap();
    assert!(store.evaluate(handle).unwrap().is_same());
    assert_eq!(store.cache().map(HashCache::len), Some(2));
}
