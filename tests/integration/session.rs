//! Copy session integration tests: tree copies, flags and outcomes.

#[path = "../common/mod.rs"]
mod common;

use common::{TestFixture, portable_manager};
use copysess::primitive::{Primitive, PrimitiveState};
use copysess::{CopyFlags, CopyManager, Error, ErrorCode, HookDelegate, ProgressCallback};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[test]
fn test_copies_whole_tree() {
    let fx = TestFixture::new();
    fx.create_tree();

    CopyManager::new()
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
        .unwrap();

    assert_eq!(fx.count_files_recursive(&fx.dst()), 5);
    fx.assert_file_content(&fx.dst().join("a.txt"), "alpha");
    fx.assert_file_content(&fx.dst().join("sub/deep/e.txt"), "echo");
}

#[test]
fn test_copy_into_existing_directory_merges() {
    let fx = TestFixture::new();
    fx.create_tree();
    fs::create_dir(fx.dst()).unwrap();
    fs::write(fx.dst().join("keep.txt"), "kept").unwrap();

    portable_manager()
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
        .unwrap();

    fx.assert_file_content(&fx.dst().join("keep.txt"), "kept");
    fx.assert_file_content(&fx.dst().join("sub/c.txt"), "charlie");
}

#[test]
fn test_single_file_without_recursion() {
    let fx = TestFixture::new();
    let src = fx.write("only.txt", "single");
    let dst = fx.root().join("only-copy.txt");

    CopyManager::new()
        .copy_item_blocking(&src, &dst, CopyFlags::ALL, None)
        .unwrap();

    fx.assert_file_content(&dst, "single");
}

#[test]
fn test_directory_without_recursion_copies_no_children() {
    let fx = TestFixture::new();
    fx.create_tree();

    portable_manager()
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::ALL, None)
        .unwrap();

    assert!(fx.dst().is_dir());
    assert_eq!(fx.count_files_recursive(&fx.dst()), 0);
}

#[test]
fn test_missing_source_reports_code_and_paths() {
    let fx = TestFixture::new();
    let src = fx.src().join("missing");

    let error = portable_manager()
        .copy_item_blocking(&src, fx.dst(), CopyFlags::default(), None)
        .unwrap_err();

    assert_eq!(error.raw_os_error(), Some(libc::ENOENT));
    assert_eq!(error.code(), ErrorCode::NotFound);
    assert_eq!(error.src_path(), Some(src.as_path()));
    assert!(!fx.dst().exists());
}

struct NoMemory;

impl Primitive for NoMemory {
    fn alloc_state(&self) -> Option<Box<dyn PrimitiveState>> {
        None
    }

    fn name(&self) -> &'static str {
        "no-memory"
    }
}

#[test]
fn test_allocation_failure_is_out_of_memory() {
    let fx = TestFixture::new();
    fx.create_tree();
    let marker = Arc::new(());
    let held = Arc::clone(&marker);
    let progress: ProgressCallback =
        Box::new(move |_: Option<&Path>, _: Option<&Path>, _: u64| {
            let _ = &held;
        });

    let manager = CopyManager::new().with_primitive(Arc::new(NoMemory));
    let error = manager
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), Some(progress))
        .unwrap_err();

    assert!(matches!(error, Error::OutOfMemory));
    assert_eq!(error.raw_os_error(), Some(libc::ENOMEM));
    assert_eq!(Arc::strong_count(&marker), 1);
    assert!(!fx.dst().exists());
}

#[test]
fn test_concurrent_sessions_are_isolated() {
    let fixtures: Vec<TestFixture> = (0..4)
        .map(|i| {
            let fx = TestFixture::new();
            fx.write("data.bin", vec![i as u8; 4096 * (i + 1)]);
            fx
        })
        .collect();
    let manager = CopyManager::new();

    let seen: Vec<Arc<Mutex<Vec<PathBuf>>>> =
        fixtures.iter().map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
    let copies = fixtures.iter().zip(&seen).map(|(fx, seen)| {
        let sink = Arc::clone(seen);
        let progress: ProgressCallback = Box::new(move |src: Option<&Path>, _: Option<&Path>, _: u64| {
            if let Some(src) = src {
                sink.lock().unwrap().push(src.to_path_buf());
            }
        });
        manager.copy_item(fx.src(), fx.dst(), CopyFlags::default(), Some(progress))
    });

    let results = futures::executor::block_on(futures::future::join_all(copies));
    for result in results {
        result.unwrap();
    }

    for (i, (fx, seen)) in fixtures.iter().zip(&seen).enumerate() {
        assert_eq!(fs::read(fx.dst().join("data.bin")).unwrap().len(), 4096 * (i + 1));
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|path| path.starts_with(fx.src())));
    }
}

#[test]
fn test_panicking_hook_reaches_caller() {
    let fx = TestFixture::new();
    fx.create_tree();
    let manager = portable_manager();
    let delegate = Arc::new(HookDelegate::new().on_item(|_, _, _| panic!("hook exploded")));
    manager.set_delegate(&delegate);

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        manager.copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
    }));

    let payload = outcome.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"hook exploded"));
}

#[test]
fn test_exclusive_refuses_existing_file() {
    let fx = TestFixture::new();
    let src = fx.write("new.txt", "new");
    let dst = fx.root().join("existing.txt");
    fs::write(&dst, "old").unwrap();

    let error = CopyManager::new()
        .copy_item_blocking(&src, &dst, CopyFlags::ALL | CopyFlags::EXCL, None)
        .unwrap_err();

    assert_eq!(error.raw_os_error(), Some(libc::EEXIST));
    assert_eq!(error.code(), ErrorCode::AlreadyExists);
    fx.assert_file_content(&dst, "old");
}

#[test]
fn test_overwrites_existing_file_by_default() {
    let fx = TestFixture::new();
    let src = fx.write("new.txt", "new");
    let dst = fx.root().join("existing.txt");
    fs::write(&dst, "much older content").unwrap();

    CopyManager::new()
        .copy_item_blocking(&src, &dst, CopyFlags::ALL, None)
        .unwrap();

    fx.assert_file_content(&dst, "new");
}

#[test]
fn test_unlink_replaces_instead_of_truncating() {
    let fx = TestFixture::new();
    let src = fx.write("new.txt", "new");
    let dst = fx.root().join("existing.txt");
    let other_link = fx.root().join("other-link.txt");
    fs::write(&dst, "old").unwrap();
    fs::hard_link(&dst, &other_link).unwrap();

    CopyManager::new()
        .copy_item_blocking(&src, &dst, CopyFlags::ALL | CopyFlags::UNLINK, None)
        .unwrap();

    fx.assert_file_content(&dst, "new");
    fx.assert_file_content(&other_link, "old");
}

#[test]
fn test_copy_onto_itself_keeps_source() {
    let fx = TestFixture::new();
    let src = fx.write("precious.txt", "precious data");

    for flags in [CopyFlags::ALL, CopyFlags::ALL | CopyFlags::UNLINK] {
        let error = portable_manager()
            .copy_item_blocking(&src, &src, flags, None)
            .unwrap_err();

        assert_eq!(error.raw_os_error(), Some(libc::EINVAL));
        assert_eq!(error.src_path(), Some(src.as_path()));
        fx.assert_file_content(&src, "precious data");
    }
}

#[test]
fn test_copy_onto_hard_link_keeps_source() {
    let fx = TestFixture::new();
    let src = fx.write("precious.txt", "precious data");
    let dst = fx.root().join("alias.txt");
    fs::hard_link(&src, &dst).unwrap();

    let error = portable_manager()
        .copy_item_blocking(&src, &dst, CopyFlags::ALL, None)
        .unwrap_err();

    assert_eq!(error.raw_os_error(), Some(libc::EINVAL));
    fx.assert_file_content(&src, "precious data");
}

#[test]
fn test_copy_onto_link_to_source_keeps_source() {
    let fx = TestFixture::new();
    let src = fx.write("precious.txt", "precious data");
    let dst = fx.root().join("pointer.txt");
    symlink(&src, &dst).unwrap();

    let error = portable_manager()
        .copy_item_blocking(&src, &dst, CopyFlags::ALL, None)
        .unwrap_err();

    assert_eq!(error.raw_os_error(), Some(libc::EINVAL));
    fx.assert_file_content(&src, "precious data");
}

#[test]
fn test_tree_onto_itself_keeps_source() {
    let fx = TestFixture::new();
    fx.create_tree();

    let error = portable_manager()
        .copy_item_blocking(fx.src(), fx.src(), CopyFlags::default(), None)
        .unwrap_err();

    assert_eq!(error.raw_os_error(), Some(libc::EINVAL));
    fx.assert_file_content(&fx.src().join("a.txt"), "alpha");
    fx.assert_file_content(&fx.src().join("sub/deep/e.txt"), "echo");
}

#[test]
fn test_descriptor_copy_onto_same_file_is_refused() {
    let fx = TestFixture::new();
    let path = fx.write("same.txt", "unchanged");
    let reader = fs::File::open(&path).unwrap();
    let writer = fs::OpenOptions::new().write(true).open(&path).unwrap();

    let error = portable_manager()
        .copy_file_handle_blocking(&reader, &writer, CopyFlags::ALL, None)
        .unwrap_err();

    assert_eq!(error.raw_os_error(), Some(libc::EINVAL));
    fx.assert_file_content(&path, "unchanged");
}

#[test]
fn test_move_removes_source_tree() {
    let fx = TestFixture::new();
    fx.create_tree();

    portable_manager()
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default() | CopyFlags::MOVE, None)
        .unwrap();

    assert!(!fx.src().exists());
    assert_eq!(fx.count_files_recursive(&fx.dst()), 5);
}

#[test]
fn test_move_single_file() {
    let fx = TestFixture::new();
    let src = fx.write("moving.txt", "moved");
    let dst = fx.root().join("moved.txt");

    CopyManager::new()
        .copy_item_blocking(&src, &dst, CopyFlags::ALL | CopyFlags::MOVE, None)
        .unwrap();

    assert!(!src.exists());
    fx.assert_file_content(&dst, "moved");
}

#[test]
fn test_symlinks_inside_tree_are_copied_as_links() {
    let fx = TestFixture::new();
    fx.write("target.txt", "pointed at");
    symlink("target.txt", fx.src().join("link")).unwrap();

    CopyManager::new()
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::default(), None)
        .unwrap();

    let link = fx.dst().join("link");
    assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&link).unwrap(), Path::new("target.txt"));
    fx.assert_file_content(&link, "pointed at");
}

#[test]
fn test_nofollow_src_copies_the_link() {
    let fx = TestFixture::new();
    let target = fx.write("target.txt", "content");
    let link = fx.root().join("link");
    symlink(&target, &link).unwrap();
    let dst = fx.root().join("link-copy");

    CopyManager::new()
        .copy_item_blocking(&link, &dst, CopyFlags::ALL | CopyFlags::NOFOLLOW_SRC, None)
        .unwrap();

    assert!(dst.symlink_metadata().unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&dst).unwrap(), target);
}

#[test]
fn test_follows_source_link_by_default() {
    let fx = TestFixture::new();
    let target = fx.write("target.txt", "content");
    let link = fx.root().join("link");
    symlink(&target, &link).unwrap();
    let dst = fx.root().join("resolved");

    CopyManager::new()
        .copy_item_blocking(&link, &dst, CopyFlags::ALL, None)
        .unwrap();

    assert!(dst.symlink_metadata().unwrap().is_file());
    fx.assert_file_content(&dst, "content");
}

#[test]
fn test_nofollow_dst_refuses_destination_link() {
    let fx = TestFixture::new();
    let src = fx.write("new.txt", "new");
    let victim = fx.root().join("victim.txt");
    fs::write(&victim, "untouched").unwrap();
    let dst = fx.root().join("dst-link");
    symlink(&victim, &dst).unwrap();

    let result = portable_manager().copy_item_blocking(
        &src,
        &dst,
        CopyFlags::ALL | CopyFlags::NOFOLLOW_DST,
        None,
    );

    assert_eq!(result.unwrap_err().raw_os_error(), Some(libc::ELOOP));
    fx.assert_file_content(&victim, "untouched");
}

#[test]
fn test_destination_inside_source_terminates() {
    let fx = TestFixture::new();
    fx.create_tree();
    let nested = fx.src().join("zz-backup");

    portable_manager()
        .copy_item_blocking(fx.src(), &nested, CopyFlags::default(), None)
        .unwrap();

    fx.assert_file_content(&nested.join("sub/deep/e.txt"), "echo");
    assert!(!nested.join("zz-backup").exists());
}

#[test]
fn test_special_file_is_not_supported() {
    let fx = TestFixture::new();
    let fifo = fx.mkfifo("pipe");
    let dst = fx.root().join("pipe-copy");

    let error = portable_manager()
        .copy_item_blocking(&fifo, &dst, CopyFlags::ALL, None)
        .unwrap_err();

    assert_eq!(error.raw_os_error(), Some(libc::ENOTSUP));
    assert!(!dst.exists());
}

#[test]
fn test_clone_falls_back_to_copy() {
    let fx = TestFixture::new();
    fx.create_tree();

    portable_manager()
        .copy_item_blocking(fx.src(), fx.dst(), CopyFlags::CLONE | CopyFlags::RECURSIVE, None)
        .unwrap();

    assert_eq!(fx.count_files_recursive(&fx.dst()), 5);
    fx.assert_file_content(&fx.dst().join("sub/c.txt"), "charlie");
}

#[test]
fn test_clone_force_copies_or_fails_cleanly() {
    let fx = TestFixture::new();
    let src = fx.write("image.bin", vec![9u8; 64 * 1024]);
    let dst = fx.root().join("image-clone.bin");

    match portable_manager().copy_item_blocking(&src, &dst, CopyFlags::CLONE_FORCE, None) {
        Ok(()) => assert_eq!(fs::read(&dst).unwrap(), fs::read(&src).unwrap()),
        Err(error) => {
            assert!(error.raw_os_error().is_some());
            assert!(!dst.exists());
        }
    }
}

#[test]
fn test_clone_force_rejects_directories() {
    let fx = TestFixture::new();
    fx.create_tree();

    let error = portable_manager()
        .copy_item_blocking(
            fx.src(),
            fx.dst(),
            CopyFlags::CLONE_FORCE | CopyFlags::RECURSIVE,
            None,
        )
        .unwrap_err();

    assert_eq!(error.raw_os_error(), Some(libc::EISDIR));
    assert!(!fx.dst().exists());
}

#[test]
fn test_descriptor_copy() {
    let fx = TestFixture::new();
    let src_path = fx.write("fd-src.txt", "through descriptors");
    let dst_path = fx.root().join("fd-dst.txt");
    let src = fs::File::open(&src_path).unwrap();
    let dst = fs::File::create(&dst_path).unwrap();

    CopyManager::new()
        .copy_file_handle_blocking(&src, &dst, CopyFlags::ALL, None)
        .unwrap();

    fx.assert_file_content(&dst_path, "through descriptors");
    // The caller's descriptors stay open and usable.
    assert!(src.metadata().is_ok());
    assert!(dst.metadata().is_ok());
}

#[cfg(target_os = "linux")]
#[test]
fn test_descriptor_copy_starts_at_current_offset() {
    use std::io::{Seek, SeekFrom};

    let fx = TestFixture::new();
    let src_path = fx.write("fd-src.txt", "header:payload");
    let dst_path = fx.root().join("fd-dst.txt");
    let mut src = fs::File::open(&src_path).unwrap();
    src.seek(SeekFrom::Start(7)).unwrap();
    let dst = fs::File::create(&dst_path).unwrap();

    portable_manager()
        .copy_file_handle_blocking(&src, &dst, CopyFlags::DATA, None)
        .unwrap();

    fx.assert_file_content(&dst_path, "payload");
    // Duplicated descriptors share the offset.
    assert_eq!(src.stream_position().unwrap(), 14);
}

#[cfg(target_os = "linux")]
#[test]
fn test_sparse_copy_keeps_holes() {
    use std::os::unix::fs::{FileExt, MetadataExt};

    let fx = TestFixture::new();
    let src_path = fx.src().join("sparse.img");
    let len: u64 = 8 * 1024 * 1024;
    {
        let file = fs::File::create(&src_path).unwrap();
        file.set_len(len).unwrap();
        file.write_all_at(b"head", 0).unwrap();
        file.write_all_at(b"tail", len - 4).unwrap();
    }
    let dst_path = fx.root().join("sparse-copy.img");

    portable_manager()
        .copy_item_blocking(
            &src_path,
            &dst_path,
            CopyFlags::DATA | CopyFlags::DATA_SPARSE,
            None,
        )
        .unwrap();

    let src_meta = fs::metadata(&src_path).unwrap();
    let dst_meta = fs::metadata(&dst_path).unwrap();
    assert_eq!(dst_meta.len(), len);
    assert_eq!(fs::read(&dst_path).unwrap(), fs::read(&src_path).unwrap());
    if src_meta.blocks() * 512 < len {
        assert!(dst_meta.blocks() * 512 < len);
    }
}
