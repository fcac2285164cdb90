//! Error handling integration tests for the cpsess CLI.
//!
//! Failures print `error[<code>]: <message>` on stderr; invalid input exits
//! with 2, copy failures with 1.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use rstest::rstest;
use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tempfile::TempDir;

fn mkfifo(path: &Path) {
    let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
    // SAFETY: c_path is a valid NUL-terminated string.
    assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) }, 0);
}

#[test]
fn test_source_not_found() {
    let dst = TempDir::new().unwrap();

    let mut cmd = cargo_bin_cmd!("cpsess");
    cmd.arg("/nonexistent/source.txt")
        .arg(dst.path().join("out.txt"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error[not_found]"));
}

#[test]
fn test_copy_directory_without_recursive_flag() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();

    let mut cmd = cargo_bin_cmd!("cpsess");
    cmd.arg(src.path())
        .arg(dst.path().join("out"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("error[invalid_input]"))
        .stderr(predicate::str::contains("-r/--recursive"));

    assert!(!dst.path().join("out").exists());
}

#[test]
fn test_no_clobber_refuses_existing_file() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    fs::write(src.path().join("file.txt"), "new").unwrap();
    fs::write(dst.path().join("file.txt"), "old").unwrap();

    let mut cmd = cargo_bin_cmd!("cpsess");
    cmd.arg("-n")
        .arg(src.path().join("file.txt"))
        .arg(dst.path().join("file.txt"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error[already_exists]"));

    assert_eq!(
        fs::read_to_string(dst.path().join("file.txt")).unwrap(),
        "old"
    );
}

#[rstest]
#[case::unknown_flag(&["--flags", "DATA | SHINY"], "Invalid --flags value")]
#[case::bad_glob(&["--exclude", "a["], "Invalid --exclude pattern")]
fn test_invalid_input(#[case] extra: &[&str], #[case] message: &str) {
    let src = TempDir::new().unwrap();
    fs::write(src.path().join("file.txt"), "x").unwrap();

    let mut cmd = cargo_bin_cmd!("cpsess");
    cmd.args(extra)
        .arg(src.path().join("file.txt"))
        .arg(src.path().join("copy.txt"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("error[invalid_input]"))
        .stderr(predicate::str::contains(message));

    assert!(!src.path().join("copy.txt").exists());
}

#[test]
fn test_copy_to_readonly_directory() {
    use std::os::unix::fs::PermissionsExt;

    // SAFETY: geteuid has no preconditions.
    if unsafe { libc::geteuid() } == 0 {
        return;
    }
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    fs::write(src.path().join("file.txt"), "content").unwrap();

    fs::set_permissions(dst.path(), fs::Permissions::from_mode(0o555)).unwrap();
    let _restore = scopeguard::guard(dst.path(), |path| {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o755));
    });

    let mut cmd = cargo_bin_cmd!("cpsess");
    cmd.arg(src.path().join("file.txt"))
        .arg(dst.path().join("file.txt"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error[permission_denied]"));
}

#[test]
fn test_copy_to_nonexistent_parent_directory() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    fs::write(src.path().join("file.txt"), "x").unwrap();

    let mut cmd = cargo_bin_cmd!("cpsess");
    cmd.arg(src.path().join("file.txt"))
        .arg(dst.path().join("missing/parent/file.txt"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error[not_found]"));
}

#[test]
fn test_special_file_stops_copy() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    fs::write(src.path().join("a.txt"), "a").unwrap();
    mkfifo(&src.path().join("pipe"));
    fs::write(src.path().join("z.txt"), "z").unwrap();

    let mut cmd = cargo_bin_cmd!("cpsess");
    cmd.arg("-r")
        .arg(src.path())
        .arg(dst.path().join("out"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("pipe"));

    assert!(!dst.path().join("out/z.txt").exists());
}

#[test]
fn test_keep_going_reports_failed_items() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    fs::write(src.path().join("a.txt"), "a").unwrap();
    mkfifo(&src.path().join("pipe"));
    fs::write(src.path().join("z.txt"), "z").unwrap();

    let mut cmd = cargo_bin_cmd!("cpsess");
    cmd.arg("-rk")
        .arg(src.path())
        .arg(dst.path().join("out"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error[items_failed]"))
        .stderr(predicate::str::contains("skipped after error"));

    assert!(dst.path().join("out/a.txt").exists());
    assert!(dst.path().join("out/z.txt").exists());
}

#[test]
fn test_keep_going_json_lists_failures() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    fs::write(src.path().join("a.txt"), "a").unwrap();
    mkfifo(&src.path().join("pipe"));

    let mut cmd = cargo_bin_cmd!("cpsess");
    let output = cmd
        .arg("-rk")
        .arg("--output")
        .arg("json")
        .arg(src.path())
        .arg(dst.path().join("out"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["outcome"], "copied_with_errors");
    let failures = value["skipped_errors"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(
        failures[0]["source"]
            .as_str()
            .unwrap()
            .ends_with("pipe")
    );
}

#[test]
fn test_json_output_on_failure() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    fs::write(src.path().join("file.txt"), "new").unwrap();
    fs::write(dst.path().join("file.txt"), "old").unwrap();

    let mut cmd = cargo_bin_cmd!("cpsess");
    let output = cmd
        .arg("-n")
        .arg("--output")
        .arg("json")
        .arg(src.path().join("file.txt"))
        .arg(dst.path().join("file.txt"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["outcome"], "failed");
    assert_eq!(value["error"]["error_code"], "already_exists");
}
