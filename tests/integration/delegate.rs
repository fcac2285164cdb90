//! Delegate hook integration tests: skipping items and continuing past errors.

#[path = "../common/mod.rs"]
mod common;

use common::{TestFixture, is_root, portable_manager};
use copysess::{CopyDelegate, CopyFlags, CopyManager, Error, HookDelegate};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[test]
fn test_skip_directory_omits_subtree() {
    let fx = TestFixture::new();
    fx.create_tree();
    let manager = portable_manager();
    let delegate = Arc::new(HookDelegate::new().on_item(|src, _, is_dir| {
        !(is_dir && src.file_name().is_some_and(|name| name == "sub"))
    }));
    manager.set_delegate(&delegate);

    manager
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
        .unwrap();

    assert!(fx.dst().join("a.txt").exists());
    assert!(fx.dst().join("b.txt").exists());
    assert!(!fx.dst().join("sub").exists());
}

#[test]
fn test_skipping_root_copies_nothing() {
    let fx = TestFixture::new();
    fx.create_tree();
    let manager = portable_manager();
    let delegate = Arc::new(HookDelegate::new().on_item(|_, _, is_dir| !is_dir));
    manager.set_delegate(&delegate);

    manager
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
        .unwrap();

    assert!(!fx.dst().exists());
}

#[test]
fn test_skip_by_extension() {
    let fx = TestFixture::new();
    fx.write("keep.txt", "keep");
    fx.write("drop.log", "drop");
    fx.write("nested/also.log", "drop");
    fx.write("nested/fine.txt", "fine");
    let manager = portable_manager();
    let delegate = Arc::new(
        HookDelegate::new()
            .on_item(|src, _, is_dir| is_dir || src.extension().is_none_or(|ext| ext != "log")),
    );
    manager.set_delegate(&delegate);

    manager
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
        .unwrap();

    assert_eq!(fx.count_files_recursive(&fx.dst()), 2);
    fx.assert_file_content(&fx.dst().join("nested/fine.txt"), "fine");
    assert!(!fx.dst().join("drop.log").exists());
}

#[test]
fn test_item_hook_receives_destination_paths() {
    let fx = TestFixture::new();
    fx.create_tree();
    let seen: Arc<Mutex<Vec<(PathBuf, PathBuf)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let manager = portable_manager();
    let delegate = Arc::new(HookDelegate::new().on_item(move |src, dst, _| {
        sink.lock()
            .unwrap()
            .push((src.to_path_buf(), dst.to_path_buf()));
        true
    }));
    manager.set_delegate(&delegate);

    manager
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
        .unwrap();

    let seen = seen.lock().unwrap();
    // 3 directories and 5 files.
    assert_eq!(seen.len(), 8);
    for (src, dst) in seen.iter() {
        let rel = src.strip_prefix(fx.src()).unwrap();
        assert_eq!(dst, &fx.dst().join(rel));
    }
}

#[test]
fn test_error_hook_continue_drops_failing_item() {
    let fx = TestFixture::new();
    fx.write("a.txt", "a");
    let fifo = fx.mkfifo("pipe");
    fx.write("z.txt", "z");
    let errors: Arc<Mutex<Vec<(i32, Option<PathBuf>)>>> = Arc::default();
    let sink = Arc::clone(&errors);
    let manager = portable_manager();
    let delegate = Arc::new(HookDelegate::new().on_error(move |error, src, _| {
        sink.lock()
            .unwrap()
            .push((error.raw_os_error().unwrap_or(0), src.map(Path::to_path_buf)));
        true
    }));
    manager.set_delegate(&delegate);

    manager
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
        .unwrap();

    fx.assert_file_content(&fx.dst().join("a.txt"), "a");
    fx.assert_file_content(&fx.dst().join("z.txt"), "z");
    assert!(fs::symlink_metadata(fx.dst().join("pipe")).is_err());
    let errors = errors.lock().unwrap();
    assert_eq!(errors.as_slice(), &[(libc::ENOTSUP, Some(fifo))]);
}

#[test]
fn test_error_hook_stop_fails_with_item_error() {
    let fx = TestFixture::new();
    fx.write("a.txt", "a");
    let fifo = fx.mkfifo("pipe");
    fx.write("z.txt", "z");
    let manager = portable_manager();
    let delegate = Arc::new(HookDelegate::new().on_error(|_, _, _| false));
    manager.set_delegate(&delegate);

    let error = manager
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
        .unwrap_err();

    assert_eq!(error.raw_os_error(), Some(libc::ENOTSUP));
    assert_eq!(error.src_path(), Some(fifo.as_path()));
    assert_eq!(error.dst_path(), Some(fx.dst().join("pipe").as_path()));
    assert!(fx.dst().join("a.txt").exists());
    assert!(!fx.dst().join("z.txt").exists());
}

#[test]
fn test_no_delegate_stops_at_first_error() {
    let fx = TestFixture::new();
    let fifo = fx.mkfifo("pipe");
    fx.write("z.txt", "z");

    let error = portable_manager()
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
        .unwrap_err();

    assert!(matches!(error, Error::Copy { .. }));
    assert_eq!(error.src_path(), Some(fifo.as_path()));
    assert!(!fx.dst().join("z.txt").exists());
}

#[test]
fn test_skipped_item_never_reaches_error_hook() {
    let fx = TestFixture::new();
    fx.mkfifo("pipe");
    fx.write("z.txt", "z");
    let errors = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&errors);
    let manager = portable_manager();
    let delegate = Arc::new(
        HookDelegate::new()
            .on_item(|src, _, _| !src.ends_with("pipe"))
            .on_error(move |_, _, _| {
                *sink.lock().unwrap() += 1;
                false
            }),
    );
    manager.set_delegate(&delegate);

    manager
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
        .unwrap();

    assert_eq!(*errors.lock().unwrap(), 0);
    fx.assert_file_content(&fx.dst().join("z.txt"), "z");
}

#[test]
fn test_dropped_delegate_is_ignored() {
    let fx = TestFixture::new();
    fx.create_tree();
    let manager = portable_manager();
    let delegate = Arc::new(HookDelegate::new().on_item(|_, _, _| false));
    manager.set_delegate(&delegate);
    drop(delegate);

    manager
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
        .unwrap();

    assert_eq!(fx.count_files_recursive(&fx.dst()), 5);
}

struct Recording {
    primitives: Mutex<Vec<&'static str>>,
}

impl CopyDelegate for Recording {
    fn should_copy_item(&self, manager: &CopyManager, _: &Path, _: &Path, _: bool) -> bool {
        self.primitives.lock().unwrap().push(manager.primitive_name());
        true
    }
}

#[test]
fn test_trait_delegate_sees_its_manager() {
    let fx = TestFixture::new();
    fx.write("one.txt", "1");
    let manager = portable_manager();
    let delegate = Arc::new(Recording {
        primitives: Mutex::new(Vec::new()),
    });
    manager.set_delegate(&delegate);

    manager
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
        .unwrap();

    let primitives = delegate.primitives.lock().unwrap();
    assert_eq!(primitives.as_slice(), &["portable", "portable"]);
}

#[test]
fn test_unreadable_directory_can_be_skipped_past() {
    if is_root() {
        return;
    }
    let fx = TestFixture::new();
    fx.write("a.txt", "a");
    let locked = fx.mkdir("locked");
    fx.write("locked/secret.txt", "secret");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    let manager = portable_manager();
    let delegate = Arc::new(HookDelegate::new().on_error(|error, _, _| {
        error.raw_os_error() == Some(libc::EACCES)
    }));
    manager.set_delegate(&delegate);
    let result = manager.copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    result.unwrap();
    fx.assert_file_content(&fx.dst().join("a.txt"), "a");
    assert!(!fx.dst().join("locked").exists());
}
