use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use fileevents::events::{EventMask, FileEvent};
use fileevents::watcher::{FileEventSystem, FileEventsConfig, FileEventsError};
use tempfile::TempDir;

fn canonical_temp_dir() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let canonical = dir.path().canonicalize().expect("canonicalize temp root");
    (dir, canonical)
}

fn counting_system() -> (FileEventSystem, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    let system = FileEventSystem::with_callback(FileEventsConfig::default(), move |_| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    })
    .expect("init");
    (system, count)
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn wait_for(
    system: &FileEventSystem,
    timeout: Duration,
    predicate: impl Fn(&FileEvent) -> bool,
) -> Option<FileEvent> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match system.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(event)) if predicate(&event) => return Some(event),
            Ok(_) => {}
            Err(err) => panic!("event queue error: {err}"),
        }
    }
    None
}

#[test]
fn init_then_close_delivers_nothing() {
    let (mut system, count) = counting_system();
    assert!(system.is_open());

    system.close();

    assert!(!system.is_open());
    thread::sleep(Duration::from_millis(200));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn add_watch_on_missing_path_fails() {
    let (_dir, root) = canonical_temp_dir();
    let mut system = FileEventSystem::init(FileEventsConfig::default()).expect("init");

    let missing = root.join("no exist");
    match system.add_watch(&missing, EventMask::ALL) {
        Err(FileEventsError::PathNotFound(path)) => assert_eq!(path, missing),
        other => panic!("expected PathNotFound, got {other:?}"),
    }
    assert!(system.watches().is_empty());
}

#[test]
fn operations_after_close_fail() {
    let (_dir, root) = canonical_temp_dir();
    let mut system = FileEventSystem::init(FileEventsConfig::default()).expect("init");
    let id = system.add_watch(&root, EventMask::ALL).expect("add watch");

    system.close();
    system.close();

    assert!(matches!(
        system.add_watch(&root, EventMask::ALL),
        Err(FileEventsError::Closed)
    ));
    assert!(matches!(
        system.remove_watch(id),
        Err(FileEventsError::Closed)
    ));
    assert!(matches!(
        system.recv_timeout(Duration::from_millis(10)),
        Err(FileEventsError::Closed)
    ));
    assert!(system.watches().is_empty());
}

#[test]
fn watching_same_path_updates_mask() {
    let (_dir, root) = canonical_temp_dir();
    let mut system = FileEventSystem::init(FileEventsConfig::default()).expect("init");

    let first = system.add_watch(&root, EventMask::CREATED).expect("first");
    let second = system.add_watch(&root, EventMask::REMOVED).expect("second");

    assert_eq!(first, second);
    assert_eq!(first.get(), 1);
    let watches = system.watches();
    assert_eq!(watches.len(), 1);
    assert_eq!(watches[0].1, root);
    assert_eq!(watches[0].2, EventMask::REMOVED);
}

#[test]
fn empty_mask_means_all() {
    let (_dir, root) = canonical_temp_dir();
    let mut system = FileEventSystem::init(FileEventsConfig::default()).expect("init");

    system.add_watch(&root, EventMask::NONE).expect("add watch");

    assert_eq!(system.watches()[0].2, EventMask::ALL);
}

#[test]
fn remove_watch_rejects_unknown_ids() {
    let (_dir, root) = canonical_temp_dir();
    let mut system = FileEventSystem::init(FileEventsConfig::default()).expect("init");
    let id = system.add_watch(&root, EventMask::ALL).expect("add watch");

    system.remove_watch(id).expect("remove");

    assert!(matches!(
        system.remove_watch(id),
        Err(FileEventsError::UnknownWatch(unknown)) if unknown == id
    ));
    let next = system.add_watch(&root, EventMask::ALL).expect("re-add");
    assert_ne!(next, id, "ids are never reused");
}

#[test]
fn callback_sessions_cannot_be_polled() {
    let (system, _count) = counting_system();
    assert!(matches!(
        system.try_recv(),
        Err(FileEventsError::CallbackDelivery)
    ));
}

#[test]
fn no_callback_runs_after_close() {
    let (_dir, root) = canonical_temp_dir();
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    let mut system = FileEventSystem::with_callback(FileEventsConfig::default(), move |_| {
        thread::sleep(Duration::from_millis(20));
        count_clone.fetch_add(1, Ordering::SeqCst);
    })
    .expect("init");
    system.add_watch(&root, EventMask::ALL).expect("add watch");

    for i in 0..10 {
        std::fs::write(root.join(format!("before{i}.txt")), "x").expect("write");
    }
    thread::sleep(Duration::from_millis(100));
    system.close();
    let after_close = count.load(Ordering::SeqCst);

    for i in 0..10 {
        std::fs::write(root.join(format!("after{i}.txt")), "x").expect("write");
    }
    thread::sleep(Duration::from_millis(300));
    assert_eq!(count.load(Ordering::SeqCst), after_close);
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
#[test]
fn created_file_is_reported() {
    let (_dir, root) = canonical_temp_dir();
    let mut system = FileEventSystem::init(FileEventsConfig::default()).expect("init");
    let id = system.add_watch(&root, EventMask::ALL).expect("add watch");

    thread::sleep(Duration::from_millis(300));
    let file_path = root.join("foo.txt");
    std::fs::write(&file_path, "test").expect("write file");

    let event = wait_for(&system, Duration::from_secs(5), |event| {
        event.path == file_path
            && event
                .flags
                .intersects(EventMask::CREATED | EventMask::MODIFIED)
    })
    .expect("expected an event for the created file");

    assert_eq!(event.watch, id);
    system.close();
}

#[cfg(target_os = "linux")]
#[test]
fn mask_filters_unwanted_kinds() {
    let (_dir, root) = canonical_temp_dir();
    let file_path = root.join("doomed.txt");
    let mut system = FileEventSystem::init(FileEventsConfig::default()).expect("init");
    system
        .add_watch(&root, EventMask::REMOVED)
        .expect("add watch");

    thread::sleep(Duration::from_millis(300));
    std::fs::write(&file_path, "test").expect("write file");
    std::fs::remove_file(&file_path).expect("remove file");

    let event = wait_for(&system, Duration::from_secs(5), |event| {
        event.path == file_path
    })
    .expect("expected a removal event");

    assert!(event.flags.contains(EventMask::REMOVED), "flags: {}", event.flags);
    assert!(!event.flags.intersects(EventMask::CREATED | EventMask::MODIFIED));
}

#[cfg(target_os = "linux")]
#[test]
fn generated_tree_is_observed() {
    let (_dir, root) = canonical_temp_dir();
    let mut system = FileEventSystem::init(FileEventsConfig::default()).expect("init");
    system.add_watch(&root, EventMask::CREATED).expect("add watch");
    thread::sleep(Duration::from_millis(300));

    fileevents::generator::generate(&root, &[]).expect("generate");

    let expected = root.join("file19.txt");
    let event = wait_for(&system, Duration::from_secs(5), |event| event.path == expected);
    assert!(event.is_some(), "expected creation of {}", expected.display());
}

#[cfg(target_os = "linux")]
fn collect_for(system: &FileEventSystem, duration: Duration) -> Vec<FileEvent> {
    let deadline = Instant::now() + duration;
    let mut events = Vec::new();
    while Instant::now() < deadline {
        match system.recv_timeout(Duration::from_millis(50)) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(err) => panic!("event queue error: {err}"),
        }
    }
    events
}

#[cfg(target_os = "linux")]
fn settle() {
    thread::sleep(Duration::from_millis(300));
}

#[cfg(target_os = "linux")]
#[test]
fn rename_is_reported_once_per_path() {
    let (_dir, root) = canonical_temp_dir();
    let from = root.join("a.txt");
    let to = root.join("b.txt");
    std::fs::write(&from, "test").expect("write file");
    let mut system = FileEventSystem::init(FileEventsConfig::default()).expect("init");
    system.add_watch(&root, EventMask::RENAMED).expect("add watch");
    settle();

    std::fs::rename(&from, &to).expect("rename");

    let events = collect_for(&system, Duration::from_millis(1500));
    let renames_of = |path: &PathBuf| {
        events
            .iter()
            .filter(|event| &event.path == path && event.flags.contains(EventMask::RENAMED))
            .count()
    };
    assert_eq!(renames_of(&from), 1, "events: {events:?}");
    assert_eq!(renames_of(&to), 1, "events: {events:?}");
    assert_eq!(events.len(), 2, "events: {events:?}");
}

#[cfg(target_os = "linux")]
#[test]
fn child_watch_survives_parent_removal() {
    let (_dir, root) = canonical_temp_dir();
    let sub = root.join("sub");
    std::fs::create_dir(&sub).expect("create sub");
    let mut system = FileEventSystem::init(FileEventsConfig::default()).expect("init");
    let parent = system.add_watch(&root, EventMask::ALL).expect("watch root");
    let child = system.add_watch(&sub, EventMask::ALL).expect("watch sub");

    system.remove_watch(parent).expect("remove parent");
    settle();
    let file_path = sub.join("x.txt");
    std::fs::write(&file_path, "test").expect("write file");

    let event = wait_for(&system, Duration::from_secs(5), |event| event.path == file_path)
        .expect("child watch should still deliver");
    assert_eq!(event.watch, child);
    assert_eq!(system.watches().len(), 1);
}

#[cfg(target_os = "linux")]
#[test]
fn parent_watch_survives_child_removal() {
    let (_dir, root) = canonical_temp_dir();
    let sub = root.join("sub");
    std::fs::create_dir(&sub).expect("create sub");
    let mut system = FileEventSystem::init(FileEventsConfig::default()).expect("init");
    let parent = system.add_watch(&root, EventMask::ALL).expect("watch root");
    let child = system.add_watch(&sub, EventMask::ALL).expect("watch sub");

    system.remove_watch(child).expect("remove child");
    settle();
    let file_path = sub.join("y.txt");
    std::fs::write(&file_path, "test").expect("write file");

    let event = wait_for(&system, Duration::from_secs(5), |event| event.path == file_path)
        .expect("parent watch should still cover sub");
    assert_eq!(event.watch, parent);
}

#[cfg(target_os = "linux")]
#[test]
fn overlapping_watches_deliver_under_lowest_id() {
    let (_dir, root) = canonical_temp_dir();
    let sub = root.join("sub");
    std::fs::create_dir(&sub).expect("create sub");
    let mut system = FileEventSystem::init(FileEventsConfig::default()).expect("init");
    let child = system.add_watch(&sub, EventMask::ALL).expect("watch sub");
    let parent = system.add_watch(&root, EventMask::ALL).expect("watch root");
    settle();

    let nested = sub.join("nested.txt");
    std::fs::write(&nested, "test").expect("write nested");
    let event = wait_for(&system, Duration::from_secs(5), |event| event.path == nested)
        .expect("event under sub");
    assert_eq!(event.watch, child);

    let top = root.join("top.txt");
    std::fs::write(&top, "test").expect("write top");
    let event = wait_for(&system, Duration::from_secs(5), |event| event.path == top)
        .expect("event under root");
    assert_eq!(event.watch, parent);
}

#[cfg(target_os = "linux")]
#[test]
fn non_recursive_watch_ignores_grandchildren() {
    let (_dir, root) = canonical_temp_dir();
    let sub = root.join("sub");
    std::fs::create_dir(&sub).expect("create sub");
    let config = FileEventsConfig {
        recursive: false,
        ..FileEventsConfig::default()
    };
    let mut system = FileEventSystem::init(config).expect("init");
    system.add_watch(&root, EventMask::ALL).expect("watch root");
    settle();

    let deep = sub.join("deep.txt");
    std::fs::write(&deep, "test").expect("write deep");
    let top = root.join("top.txt");
    std::fs::write(&top, "test").expect("write top");

    let events = collect_for(&system, Duration::from_millis(1500));
    assert!(
        events.iter().any(|event| event.path == top),
        "direct child not reported: {events:?}"
    );
    assert!(
        events.iter().all(|event| event.path != deep),
        "grandchild reported: {events:?}"
    );
}

#[cfg(target_os = "linux")]
#[test]
fn removed_watch_stops_delivery() {
    let (_dir, root) = canonical_temp_dir();
    let mut system = FileEventSystem::init(FileEventsConfig::default()).expect("init");
    let id = system.add_watch(&root, EventMask::ALL).expect("add watch");

    system.remove_watch(id).expect("remove watch");
    settle();
    std::fs::write(root.join("ignored.txt"), "test").expect("write file");

    let events = collect_for(&system, Duration::from_millis(700));
    assert!(events.is_empty(), "unexpected events: {events:?}");
}
