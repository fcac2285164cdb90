//! cpsess - Copy Session
//!
//! Copy files and directories through a copysess session.

use clap::{Parser, ValueEnum};
use copysess::{
    CopyFlags, CopyManager, Error as CopyError, HookDelegate, create_progress_bar,
    is_no_space_error, progress_bar_callback,
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::{Value, json};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// cpsess - copy files and directories with metadata
///
/// Copies SOURCE to DEST. When DEST is an existing directory, SOURCE is
/// copied into it under its own name.
///
/// Usage:
///   cpsess SOURCE DEST
///   cpsess -r SOURCE_DIR DEST
#[derive(Parser, Debug)]
#[command(name = "cpsess", version, about, long_about = None)]
struct Args {
    /// Source file or directory
    source: PathBuf,

    /// Destination path
    dest: PathBuf,

    /// Copy directories recursively
    #[arg(short = 'r', long)]
    recursive: bool,

    /// Base flags in text form, e.g. "DATA | STAT" (default: ALL)
    #[arg(long, value_name = "TEXT")]
    flags: Option<String>,

    /// Clone files where the filesystem allows it, copying otherwise
    #[arg(long, conflicts_with = "clone_force")]
    clone: bool,

    /// Require a clone; fail where none is possible
    #[arg(long)]
    clone_force: bool,

    /// Fail on items that already exist at the destination
    #[arg(short = 'n', long)]
    no_clobber: bool,

    /// Remove existing destination files before copying
    #[arg(long)]
    unlink: bool,

    /// Remove source items once copied
    #[arg(long = "move")]
    move_source: bool,

    /// Never follow symlinks in SOURCE or DEST
    #[arg(short = 'P', long)]
    no_dereference: bool,

    /// Preserve holes in sparse files
    #[arg(long)]
    sparse: bool,

    /// Skip items whose name or relative path matches GLOB (repeatable)
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,

    /// Keep copying after an item fails, reporting it at the end
    #[arg(short = 'k', long)]
    keep_going: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "human")]
    output: OutputMode,

    /// Disable progress bar
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
enum CliError {
    #[error("Source is a directory. Use -r/--recursive to copy directories: {path}")]
    SourceIsDirectoryWithoutRecursive { path: PathBuf },

    #[error("Source does not exist: {path}")]
    SourceNotFound { path: PathBuf },

    #[error("Failed to read source metadata: {path}: {source}")]
    SourceMetadata { path: PathBuf, source: io::Error },

    #[error("Source has no filename: {path}")]
    SourceHasNoFilename { path: PathBuf },

    #[error("Invalid --flags value '{text}': {message}")]
    InvalidFlags { text: String, message: String },

    #[error("Invalid --exclude pattern: {source}")]
    InvalidExclude { source: globset::Error },

    #[error("{source}")]
    Copy { source: CopyError },

    #[error("{count} item(s) could not be copied")]
    ItemsFailed { count: usize },

    #[error("Failed to serialize JSON output: {source}")]
    JsonSerialize { source: serde_json::Error },
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            Self::SourceIsDirectoryWithoutRecursive { .. }
            | Self::SourceHasNoFilename { .. }
            | Self::InvalidFlags { .. }
            | Self::InvalidExclude { .. } => "invalid_input",
            Self::SourceNotFound { .. } => "not_found",
            Self::SourceMetadata { source, .. } => io_error_code(source),
            Self::Copy { source, .. } => source.code().as_str(),
            Self::ItemsFailed { .. } => "items_failed",
            Self::JsonSerialize { .. } => "internal",
        }
    }
}

fn io_error_code(error: &io::Error) -> &'static str {
    if is_no_space_error(error) {
        return "no_space";
    }
    if error.kind() == io::ErrorKind::PermissionDenied {
        return "permission_denied";
    }
    "io_error"
}

fn exit_code_for(code: &str) -> i32 {
    match code {
        "invalid_input" => 2,
        "cancelled" => 130,
        _ => 1,
    }
}

/// One item the copy continued past.
#[derive(Debug, Clone)]
struct ItemFailure {
    source: Option<PathBuf>,
    destination: Option<PathBuf>,
    code: &'static str,
    message: String,
}

impl ItemFailure {
    fn from_error(error: &CopyError) -> Self {
        Self {
            source: error.src_path().map(Path::to_path_buf),
            destination: error.dst_path().map(Path::to_path_buf),
            code: error.code().as_str(),
            message: error.to_string(),
        }
    }

    fn to_json_value(&self) -> Value {
        json!({
            "source": self.source.as_deref().map(display_path),
            "destination": self.destination.as_deref().map(display_path),
            "error_code": self.code,
            "error_message": self.message,
        })
    }
}

/// Files, directories and bytes below a source, measured before copying.
#[derive(Debug, Default, Clone, Copy)]
struct SourceSummary {
    files: u64,
    dirs: u64,
    bytes: u64,
}

fn main() {
    if let Err(error) = run() {
        let code = error.code();
        eprintln!("error[{code}]: {error}");
        std::process::exit(exit_code_for(code));
    }
}

fn run() -> CliResult<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Partially copied items are left in place.
    ctrlc::set_handler(|| {
        eprintln!("\nInterrupted.");
        std::process::exit(130);
    })
    .ok();

    let flags = build_flags(&args)?;
    let excludes = build_excludes(&args.exclude)?;

    let source_meta = source_metadata(&args.source, flags)?;
    if source_meta.is_dir() && !flags.contains(CopyFlags::RECURSIVE) {
        return Err(CliError::SourceIsDirectoryWithoutRecursive {
            path: args.source.clone(),
        });
    }
    let dest = resolve_destination(&args.source, &args.dest)?;
    let summary = measure(&args.source, &source_meta, flags);
    tracing::debug!(
        source = %args.source.display(),
        dest = %dest.display(),
        %flags,
        files = summary.files,
        bytes = summary.bytes,
        "starting copy"
    );

    let failures: Arc<Mutex<Vec<ItemFailure>>> = Arc::default();
    let delegate = Arc::new(build_delegate(
        &args.source,
        excludes,
        args.keep_going.then(|| Arc::clone(&failures)),
    ));
    let manager = CopyManager::new();
    manager.set_delegate(&delegate);

    let pb = if args.output == OutputMode::Human && !args.quiet && summary.bytes > 0 {
        let pb = create_progress_bar(summary.bytes);
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };
    let progress = pb.as_ref().map(|pb| progress_bar_callback(pb.clone()));

    let start_time = Instant::now();
    let result = manager.copy_item_blocking(&args.source, &dest, flags, progress);
    let duration = start_time.elapsed();

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let failures = failures
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    let error = result.err().map(|source| CliError::Copy { source });

    match args.output {
        OutputMode::Human => {
            for failure in &failures {
                eprintln!("warning: skipped after error: {}", failure.message);
            }
            if error.is_none() {
                print_summary(&summary, &failures, duration, args.verbose);
            }
        }
        OutputMode::Json => {
            emit_json(&args.source, &dest, flags, &summary, &failures, error.as_ref())?;
        }
    }

    match error {
        Some(error) => Err(error),
        None if !failures.is_empty() => Err(CliError::ItemsFailed {
            count: failures.len(),
        }),
        None => Ok(()),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn build_flags(args: &Args) -> CliResult<CopyFlags> {
    let mut flags = match args.flags.as_deref() {
        Some(text) => CopyFlags::parse(text).map_err(|error| CliError::InvalidFlags {
            text: text.to_owned(),
            message: error.to_string(),
        })?,
        None => CopyFlags::ALL,
    };

    if args.recursive {
        flags |= CopyFlags::RECURSIVE;
    }
    if args.clone {
        flags |= CopyFlags::CLONE;
    }
    if args.clone_force {
        flags |= CopyFlags::CLONE_FORCE;
    }
    if args.no_clobber {
        flags |= CopyFlags::EXCL;
    }
    if args.unlink {
        flags |= CopyFlags::UNLINK;
    }
    if args.move_source {
        flags |= CopyFlags::MOVE;
    }
    if args.no_dereference {
        flags |= CopyFlags::NOFOLLOW;
    }
    if args.sparse {
        flags |= CopyFlags::DATA_SPARSE;
    }
    Ok(flags)
}

fn build_excludes(patterns: &[String]) -> CliResult<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| CliError::InvalidExclude { source })?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|source| CliError::InvalidExclude { source })?;
    Ok(Some(set))
}

/// Delegate for `--exclude` and `--keep-going`.
fn build_delegate(
    root: &Path,
    excludes: Option<GlobSet>,
    failures: Option<Arc<Mutex<Vec<ItemFailure>>>>,
) -> HookDelegate {
    let mut delegate = HookDelegate::new();

    if let Some(excludes) = excludes {
        let root = root.to_path_buf();
        delegate = delegate.on_item(move |src, _, _| {
            let excluded = is_excluded(&excludes, &root, src);
            if excluded {
                tracing::debug!(path = %src.display(), "excluded");
            }
            !excluded
        });
    }

    if let Some(failures) = failures {
        delegate = delegate.on_error(move |error, _, _| {
            tracing::warn!(%error, "continuing after error");
            failures
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(ItemFailure::from_error(error));
            true
        });
    }

    delegate
}

fn is_excluded(excludes: &GlobSet, root: &Path, src: &Path) -> bool {
    if src.file_name().is_some_and(|name| excludes.is_match(name)) {
        return true;
    }
    match src.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => excludes.is_match(rel),
        _ => false,
    }
}

fn source_metadata(path: &Path, flags: CopyFlags) -> CliResult<fs::Metadata> {
    let meta = if flags.contains(CopyFlags::NOFOLLOW_SRC) {
        fs::symlink_metadata(path)
    } else {
        fs::metadata(path)
    };
    meta.map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            CliError::SourceNotFound {
                path: path.to_path_buf(),
            }
        } else {
            CliError::SourceMetadata {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

/// Copying into an existing directory keeps the source's name.
fn resolve_destination(src: &Path, dest: &Path) -> CliResult<PathBuf> {
    if !dest.is_dir() {
        return Ok(dest.to_path_buf());
    }
    let filename = src
        .file_name()
        .ok_or_else(|| CliError::SourceHasNoFilename {
            path: src.to_path_buf(),
        })?;
    Ok(dest.join(filename))
}

/// Best-effort size of what will be copied; unreadable entries count as empty.
fn measure(path: &Path, meta: &fs::Metadata, flags: CopyFlags) -> SourceSummary {
    let mut summary = SourceSummary::default();
    if !meta.is_dir() {
        summary.files = 1;
        if meta.is_file() {
            summary.bytes = meta.len();
        }
        return summary;
    }

    summary.dirs = 1;
    if !flags.contains(CopyFlags::RECURSIVE) {
        return summary;
    }
    let Ok(entries) = fs::read_dir(path) else {
        return summary;
    };
    for entry in entries.flatten() {
        let Ok(child_meta) = fs::symlink_metadata(entry.path()) else {
            continue;
        };
        let child = measure(&entry.path(), &child_meta, flags);
        summary.files += child.files;
        summary.dirs += child.dirs;
        summary.bytes += child.bytes;
    }
    summary
}

fn print_summary(
    summary: &SourceSummary,
    failures: &[ItemFailure],
    duration: Duration,
    verbose: bool,
) {
    let bytes_str = format_bytes(summary.bytes);

    if verbose {
        println!("Copy completed in {:?}", duration);
        println!("  Files:          {}", summary.files);
        println!("  Directories:    {}", summary.dirs);
        println!("  Total size:     {}", bytes_str);
        println!("  Failed items:   {}", failures.len());

        if duration.as_secs_f64() > 0.0 {
            let speed = summary.bytes as f64 / duration.as_secs_f64();
            println!("  Speed:          {}/s", format_bytes(speed as u64));
        }
    } else if summary.files == 0 && summary.dirs <= 1 {
        println!("Done");
    } else {
        println!("Copied {} files ({})", summary.files, bytes_str);
    }
}

fn emit_json(
    source: &Path,
    destination: &Path,
    flags: CopyFlags,
    summary: &SourceSummary,
    failures: &[ItemFailure],
    error: Option<&CliError>,
) -> CliResult<()> {
    let outcome = match (error, failures.is_empty()) {
        (Some(_), _) => "failed",
        (None, true) => "copied",
        (None, false) => "copied_with_errors",
    };
    let mut payload = json!({
        "schema_version": "1.0",
        "source": display_path(source),
        "destination": display_path(destination),
        "flags": flags.to_string(),
        "outcome": outcome,
        "files": summary.files,
        "dirs": summary.dirs,
        "bytes": summary.bytes,
        "skipped_errors": failures.iter().map(ItemFailure::to_json_value).collect::<Vec<Value>>(),
    });
    if let (Some(CliError::Copy { source, .. }), Value::Object(obj)) = (error, &mut payload) {
        obj.insert(
            "error".to_owned(),
            ItemFailure::from_error(source).to_json_value(),
        );
    }
    print_json_value(&payload)
}

fn print_json_value(value: &Value) -> CliResult<()> {
    let serialized =
        serde_json::to_string(value).map_err(|source| CliError::JsonSerialize { source })?;
    println!("{serialized}");
    Ok(())
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
