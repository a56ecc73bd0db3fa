/// Folder organization: moving files into category and date subfolders.
///
/// A pass looks only at the files directly inside the folder. Everything it
/// moves ends up two levels deeper, at `<category>/<YYYY-MM-DD>/<name>`, so a
/// later pass never sees those files again.
use crate::action_log::{ActionLog, LogEntry};
use crate::categories::CategoryRules;
use crate::classifier::Classifier;
use crate::config::CompiledFilters;
use chrono::{Local, NaiveDate};
use filetime::FileTime;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A planned move of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMoveOperation {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: String,
    /// Calendar date of the pass, used as the subfolder name.
    pub date_bucket: NaiveDate,
}

/// A file that was moved, with the log entry written for it.
#[derive(Debug, Clone)]
pub struct MovedFile {
    pub operation: FileMoveOperation,
    pub entry: LogEntry,
}

/// A file that could not be moved.
#[derive(Debug)]
pub struct FailedMove {
    pub operation: FileMoveOperation,
    pub error: OrganizeError,
}

/// Outcome of one organize pass.
#[derive(Debug)]
pub struct OrganizeReport {
    pub folder: PathBuf,
    pub moved: Vec<MovedFile>,
    pub failed: Vec<FailedMove>,
}

impl OrganizeReport {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            moved: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Log entries of the successful moves, in move order.
    pub fn log_entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.moved.iter().map(|moved| &moved.entry)
    }

    /// Number of moved files per category.
    pub fn category_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for moved in &self.moved {
            *counts.entry(moved.operation.category.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// True when no file failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// True when the pass had nothing to do.
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty() && self.failed.is_empty()
    }
}

/// Errors that can occur while organizing a folder.
///
/// The first three abort the whole pass; the rest only affect one file.
#[derive(Debug, thiserror::Error)]
pub enum OrganizeError {
    #[error("folder {} does not exist", .path.display())]
    FolderNotFound { path: PathBuf },

    #[error("{} is not a directory", .path.display())]
    NotADirectory { path: PathBuf },

    #[error("cannot list {}: {source}", .path.display())]
    FolderUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} disappeared before it could be moved", .path.display())]
    SourceVanished { path: PathBuf },

    #[error("{} already exists", .destination.display())]
    MoveConflict { destination: PathBuf },

    #[error("failed to create directory {}: {source}", .path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("permission denied moving {}", .path.display())]
    PermissionDenied { path: PathBuf },

    #[error("failed to move {} to {}: {source}", .from.display(), .to.display())]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl OrganizeError {
    /// Returns true for errors that stop the whole pass.
    pub fn is_folder_level(&self) -> bool {
        matches!(
            self,
            Self::FolderNotFound { .. } | Self::NotADirectory { .. } | Self::FolderUnreadable { .. }
        )
    }
}

/// Result type for organize operations.
pub type OrganizeResult<T> = Result<T, OrganizeError>;

/// Moves the files of a folder into category subfolders.
///
/// The organizer owns its rules; build a new one to apply edited rules.
/// It is `Send + Sync` and can be shared between a manual trigger and the
/// watch worker through an `Arc`.
#[derive(Debug)]
pub struct Organizer {
    rules: CategoryRules,
    filters: CompiledFilters,
    log: ActionLog,
    protected: Vec<PathBuf>,
}

impl Organizer {
    /// Creates an organizer that moves every regular file in the folder.
    pub fn new(rules: CategoryRules, log: ActionLog) -> Self {
        Self {
            rules,
            filters: CompiledFilters::allow_all(),
            log,
            protected: Vec::new(),
        }
    }

    pub fn with_filters(mut self, filters: CompiledFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Marks a file that must never be moved, such as the rules file or
    /// the log itself when they live inside the organized folder.
    pub fn protect(mut self, path: impl AsRef<Path>) -> Self {
        self.protected.push(absolute(path.as_ref()));
        self
    }

    pub fn action_log(&self) -> &ActionLog {
        &self.log
    }

    /// Computes the moves a pass would make, without touching anything.
    ///
    /// # Errors
    ///
    /// Fails only when the folder itself is missing, is not a directory, or
    /// cannot be listed.
    pub fn plan(&self, folder: &Path) -> OrganizeResult<Vec<FileMoveOperation>> {
        let metadata = fs::metadata(folder).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => OrganizeError::FolderNotFound {
                path: folder.to_path_buf(),
            },
            _ => OrganizeError::FolderUnreadable {
                path: folder.to_path_buf(),
                source: e,
            },
        })?;
        if !metadata.is_dir() {
            return Err(OrganizeError::NotADirectory {
                path: folder.to_path_buf(),
            });
        }

        let entries = fs::read_dir(folder).map_err(|source| OrganizeError::FolderUnreadable {
            path: folder.to_path_buf(),
            source,
        })?;

        let classifier = Classifier::new(&self.rules);
        let date_bucket = Local::now().date_naive();
        let bucket_name = date_bucket.format("%Y-%m-%d").to_string();

        let mut operations = Vec::new();
        for entry in entries.flatten() {
            let source = entry.path();
            // Follows symlinks, so a link to a regular file is organized too.
            let Ok(metadata) = fs::metadata(&source) else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            if self.is_protected(&source) {
                debug!(file = %source.display(), "skipping protected file");
                continue;
            }
            if !self.filters.should_include(&source) {
                debug!(file = %source.display(), "skipping filtered file");
                continue;
            }

            let file_name = entry.file_name();
            let category = classifier.classify(&file_name.to_string_lossy());
            let destination = folder.join(category).join(&bucket_name).join(&file_name);

            operations.push(FileMoveOperation {
                source,
                destination,
                category: category.to_string(),
                date_bucket,
            });
        }

        operations.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(operations)
    }

    /// Runs one pass over `folder`.
    ///
    /// Every regular file directly inside the folder is moved once. Files
    /// that cannot be moved are reported in [`OrganizeReport::failed`]; they
    /// never stop the rest of the pass.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fileforge::action_log::ActionLog;
    /// use fileforge::categories::CategoryRules;
    /// use fileforge::organizer::Organizer;
    /// use std::path::Path;
    ///
    /// let organizer = Organizer::new(CategoryRules::default(), ActionLog::new("fileforge_log.txt"));
    /// let report = organizer.organize(Path::new("/home/me/Downloads"))?;
    /// println!("moved {} files", report.moved.len());
    /// # Ok::<(), fileforge::organizer::OrganizeError>(())
    /// ```
    pub fn organize(&self, folder: &Path) -> OrganizeResult<OrganizeReport> {
        self.organize_with(folder, |_| {})
    }

    /// Like [`Organizer::organize`], reporting each file as it is handled.
    pub fn organize_with<F>(&self, folder: &Path, mut on_file: F) -> OrganizeResult<OrganizeReport>
    where
        F: FnMut(Result<&MovedFile, &FailedMove>),
    {
        let operations = self.plan(folder)?;
        let mut report = OrganizeReport::new(folder);

        for operation in operations {
            match self.apply(&operation) {
                Ok(entry) => {
                    info!(
                        from = %operation.source.display(),
                        to = %operation.destination.display(),
                        category = %operation.category,
                        "moved file"
                    );
                    let moved = MovedFile { operation, entry };
                    on_file(Ok(&moved));
                    report.moved.push(moved);
                }
                Err(error) => {
                    warn!(file = %operation.source.display(), "{error}");
                    let failed = FailedMove { operation, error };
                    on_file(Err(&failed));
                    report.failed.push(failed);
                }
            }
        }

        info!(
            folder = %folder.display(),
            moved = report.moved.len(),
            failed = report.failed.len(),
            "organize pass finished"
        );
        Ok(report)
    }

    /// Executes a single planned move and records it in the log.
    ///
    /// An existing destination is never replaced, even one that appears
    /// between the conflict check and the move itself.
    pub fn apply(&self, operation: &FileMoveOperation) -> OrganizeResult<LogEntry> {
        let source = &operation.source;
        let destination = &operation.destination;

        if fs::symlink_metadata(source).is_err() {
            return Err(OrganizeError::SourceVanished {
                path: source.clone(),
            });
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| OrganizeError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        if fs::symlink_metadata(destination).is_ok() {
            return Err(OrganizeError::MoveConflict {
                destination: destination.clone(),
            });
        }

        relocate(source, destination).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound if fs::symlink_metadata(source).is_err() => {
                OrganizeError::SourceVanished {
                    path: source.clone(),
                }
            }
            io::ErrorKind::AlreadyExists => OrganizeError::MoveConflict {
                destination: destination.clone(),
            },
            io::ErrorKind::PermissionDenied => OrganizeError::PermissionDenied {
                path: source.clone(),
            },
            _ => OrganizeError::MoveFailed {
                from: source.clone(),
                to: destination.clone(),
                source: e,
            },
        })?;

        let entry = LogEntry::now(source, destination);
        if let Err(e) = self.log.append(&entry) {
            warn!(log = %self.log.path().display(), "could not record move: {e}");
        }
        Ok(entry)
    }

    fn is_protected(&self, path: &Path) -> bool {
        if self.protected.is_empty() {
            return false;
        }
        let path = absolute(path);
        self.protected.iter().any(|protected| *protected == path)
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Moves a file without ever replacing an existing destination.
///
/// The file is hard-linked under its new name and then unlinked from the old
/// one, so a destination that already exists fails with `AlreadyExists`.
/// Across filesystems the file is copied instead. Filesystems without hard
/// links fall back to a rename, which relies on the earlier conflict check.
fn relocate(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::hard_link(source, destination) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(source) {
                let _ = fs::remove_file(destination);
                return Err(e);
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(from = %source.display(), "link crosses devices, copying instead");
            copy_then_remove(source, destination)
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::AlreadyExists | io::ErrorKind::NotFound) => {
            Err(e)
        }
        Err(e) => {
            debug!(from = %source.display(), "hard link unavailable ({e}), renaming instead");
            match fs::rename(source, destination) {
                Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                    copy_then_remove(source, destination)
                }
                result => result,
            }
        }
    }
}

/// Copies `source` to a new file at `destination` with its permissions and
/// timestamps, then deletes the source.
///
/// Either the source or a complete copy survives, never both: a failed copy
/// removes the partial destination, and a source that cannot be deleted
/// takes the copy with it. Losing the timestamps only costs a warning.
/// A symlinked source is copied as the file it points to.
fn copy_then_remove(source: &Path, destination: &Path) -> io::Result<()> {
    let metadata = fs::metadata(source)?;
    let mut reader = File::open(source)?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)?;

    let copied = io::copy(&mut reader, &mut writer).and_then(|_| writer.sync_all());
    drop(writer);
    if let Err(e) = copied {
        let _ = fs::remove_file(destination);
        return Err(e);
    }

    if let Err(e) = fs::set_permissions(destination, metadata.permissions()) {
        warn!(file = %destination.display(), "could not copy permissions: {e}");
    }
    if let Err(e) = filetime::set_file_times(
        destination,
        FileTime::from_last_access_time(&metadata),
        FileTime::from_last_modification_time(&metadata),
    ) {
        warn!(file = %destination.display(), "could not copy timestamps: {e}");
    }

    if let Err(e) = fs::remove_file(source) {
        let _ = fs::remove_file(destination);
        return Err(e);
    }
    Ok(())
}
