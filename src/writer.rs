use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;
use time::{OffsetDateTime, UtcOffset};
use tracing_subscriber::fmt::MakeWriter;

use crate::clock::{Clock, SystemClock};
use crate::rotation::{self, BackupFile, RotationPeriod, RotationPolicy};
use crate::{Error, Result};

/// Offset used for local-time backup stamps, resolved once per process.
///
/// `None` when the platform refuses to report it, which on Unix happens as
/// soon as the process has more than one thread.
static LOCAL_OFFSET: Lazy<Option<UtcOffset>> =
    Lazy::new(|| UtcOffset::current_local_offset().ok());

/// The file currently receiving records.
#[derive(Debug)]
struct ActiveFile {
    file: File,
    /// Bytes in the file, including content that predates this writer.
    size: u64,
    /// When the file was started, in the writer's stamping offset.
    opened_at: OffsetDateTime,
}

#[derive(Debug)]
enum Phase {
    /// Constructed; the file is opened on first use.
    Pending,
    Active(ActiveFile),
    /// Explicitly closed; only `open` leaves this phase.
    Closed,
}

#[derive(Debug)]
struct WriterState {
    phase: Phase,
    /// Known backups, newest first.
    backups: Vec<BackupFile>,
    next_sequence: u64,
    /// Non-fatal failures waiting to be collected by `take_warnings`.
    warnings: Vec<Error>,
}

#[derive(Debug)]
struct Inner {
    directory: PathBuf,
    filename: String,
    active_path: PathBuf,
    policy: RotationPolicy,
    clock: Arc<dyn Clock>,
    offset: UtcOffset,
    state: Mutex<WriterState>,
}

/// A writer that appends records to `{directory}/{filename}` and rotates it
/// into timestamped backups on size overflow or when its period elapses.
///
/// Clones share the same file and state. Writing, rotating and the retention
/// sweep all run under one lock, so concurrent writers never interleave
/// records and the size accounting stays exact.
#[derive(Debug, Clone)]
pub struct RotatingWriter {
    inner: Arc<Inner>,
}

impl RotatingWriter {
    /// Create a writer for `{directory}/{filename}`. Nothing is opened until
    /// the first write or an explicit [`open`](Self::open).
    pub fn new(
        directory: impl Into<PathBuf>,
        filename: impl Into<String>,
        policy: RotationPolicy,
    ) -> Result<Self> {
        Self::with_clock(directory, filename, policy, SystemClock)
    }

    /// Like [`new`](Self::new), reading time from `clock`.
    pub fn with_clock(
        directory: impl Into<PathBuf>,
        filename: impl Into<String>,
        policy: RotationPolicy,
        clock: impl Clock + 'static,
    ) -> Result<Self> {
        let directory = directory.into();
        let filename = filename.into();
        validate_filename(&filename)?;

        let mut warnings = Vec::new();
        let offset = match (policy.local_time, *LOCAL_OFFSET) {
            (false, _) => UtcOffset::UTC,
            (true, Some(local)) => local,
            (true, None) => {
                warnings.push(Error::Config(
                    "local UTC offset unavailable, stamping backups in UTC".to_string(),
                ));
                UtcOffset::UTC
            }
        };

        Ok(Self {
            inner: Arc::new(Inner {
                active_path: directory.join(&filename),
                directory,
                filename,
                policy,
                clock: Arc::new(clock),
                offset,
                state: Mutex::new(WriterState {
                    phase: Phase::Pending,
                    backups: Vec::new(),
                    next_sequence: 0,
                    warnings,
                }),
            }),
        })
    }

    /// Create a writer from the full path of the active file.
    pub fn from_path(path: impl AsRef<Path>, policy: RotationPolicy) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::Config(format!("invalid log file path: {}", path.display())))?;
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::new(directory, filename, policy)
    }

    /// Open the active file if it is not open yet.
    ///
    /// Creates the directory, picks up existing backups and appends to an
    /// existing active file that is still under the size limit. An existing
    /// file at or over the limit is rotated away first.
    pub fn open(&self) -> Result<()> {
        let mut state = self.inner.lock();
        self.inner.open_locked(&mut state)
    }

    /// Append `record` to the active file, rotating first if it would not fit.
    ///
    /// The record is written whole even if it alone exceeds the size limit.
    /// Returns the number of bytes written.
    pub fn write(&self, record: &[u8]) -> Result<usize> {
        self.inner.append(record)
    }

    /// Move the active file into a backup, start a new one and sweep backups.
    pub fn rotate(&self) -> Result<()> {
        let mut state = self.inner.lock();
        self.inner.ensure_open(&mut state)?;
        self.inner.rotate_locked(&mut state)
    }

    /// Flush the active file.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.inner.lock();
        match &mut state.phase {
            Phase::Active(active) => active.file.flush().map_err(|source| Error::Write {
                path: self.inner.active_path.clone(),
                source,
            }),
            _ => Ok(()),
        }
    }

    /// Flush, sync and close the active file. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.inner.lock();
        match std::mem::replace(&mut state.phase, Phase::Closed) {
            Phase::Active(mut active) => active
                .file
                .flush()
                .and_then(|()| active.file.sync_all())
                .map_err(|source| Error::Write {
                    path: self.inner.active_path.clone(),
                    source,
                }),
            Phase::Pending | Phase::Closed => Ok(()),
        }
    }

    /// Whether [`close`](Self::close) was called and no `open` followed.
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.lock().phase, Phase::Closed)
    }

    /// Size of the active file, or `None` when no file is open.
    pub fn current_size(&self) -> Option<u64> {
        match &self.inner.lock().phase {
            Phase::Active(active) => Some(active.size),
            _ => None,
        }
    }

    /// Known backups, newest first.
    pub fn backups(&self) -> Vec<BackupFile> {
        self.inner.lock().backups.clone()
    }

    /// Drain the non-fatal failures collected since the last call, such as
    /// backups the retention sweep could not delete or a local offset that
    /// could not be determined.
    pub fn take_warnings(&self) -> Vec<Error> {
        std::mem::take(&mut self.inner.lock().warnings)
    }

    /// Path of the active file.
    pub fn active_path(&self) -> &Path {
        &self.inner.active_path
    }

    /// Directory holding the active file and its backups.
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// Rotation and retention settings of this writer.
    pub fn policy(&self) -> &RotationPolicy {
        &self.inner.policy
    }
}

fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty() {
        return Err(Error::Config("log filename must not be empty".to_string()));
    }
    if filename.contains(['/', '\\']) || filename == "." || filename == ".." {
        return Err(Error::Config(format!(
            "log filename must be a plain file name: {}",
            filename
        )));
    }
    Ok(())
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> OffsetDateTime {
        self.clock.now().to_offset(self.offset)
    }

    fn open_active(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.active_path)
            .map_err(|source| Error::FileOpen {
                path: self.active_path.clone(),
                source,
            })
    }

    fn open_locked(&self, state: &mut WriterState) -> Result<()> {
        if let Phase::Active(_) = state.phase {
            return Ok(());
        }

        std::fs::create_dir_all(&self.directory).map_err(|source| Error::DirectoryCreation {
            path: self.directory.clone(),
            source,
        })?;

        state.backups = self.scan_backups(state);
        state.next_sequence = state
            .backups
            .iter()
            .map(|b| b.sequence + 1)
            .max()
            .unwrap_or(0);

        let file = self.open_active()?;
        let metadata = file.metadata().ok();
        let size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
        let opened_at = match metadata.and_then(|m| m.modified().ok()) {
            Some(modified) if size > 0 => OffsetDateTime::from(modified).to_offset(self.offset),
            _ => self.now(),
        };
        state.phase = Phase::Active(ActiveFile {
            file,
            size,
            opened_at,
        });

        if self.policy.max_size > 0 && size >= self.policy.max_size {
            self.rotate_locked(state)?;
        }
        Ok(())
    }

    /// Backups on disk, or the in-memory list if the directory can't be read.
    fn scan_backups(&self, state: &mut WriterState) -> Vec<BackupFile> {
        match rotation::list_backups(&self.directory, &self.filename, self.offset) {
            Ok(backups) => backups,
            Err(e) => {
                state.warnings.push(Error::Io(e));
                state.backups.clone()
            }
        }
    }

    /// Open lazily, refusing to revive a closed writer.
    fn ensure_open(&self, state: &mut WriterState) -> Result<()> {
        match state.phase {
            Phase::Closed => Err(Error::Closed),
            Phase::Pending => self.open_locked(state),
            Phase::Active(_) => Ok(()),
        }
    }

    fn append(&self, record: &[u8]) -> Result<usize> {
        let mut guard = self.lock();
        let state = &mut *guard;
        self.ensure_open(state)?;

        if self.should_rotate(state, record.len() as u64) {
            self.rotate_locked(state)?;
        }

        let Phase::Active(active) = &mut state.phase else {
            return Err(Error::Closed);
        };
        match active.file.write_all(record) {
            Ok(()) => {
                active.size += record.len() as u64;
                Ok(record.len())
            }
            Err(source) => {
                // A partial write may have landed; resync with the file.
                if let Ok(metadata) = active.file.metadata() {
                    active.size = metadata.len();
                }
                Err(Error::Write {
                    path: self.active_path.clone(),
                    source,
                })
            }
        }
    }

    fn should_rotate(&self, state: &WriterState, incoming: u64) -> bool {
        let Phase::Active(active) = &state.phase else {
            return false;
        };
        if self.policy.size_exceeded(active.size, incoming) {
            return true;
        }
        self.policy.period != RotationPeriod::Never
            && active.size > 0
            && self.policy.period.elapsed(active.opened_at, self.now())
    }

    fn rotate_locked(&self, state: &mut WriterState) -> Result<()> {
        let now = self.now();
        let sequence = state.next_sequence;
        let backup_path = self
            .directory
            .join(rotation::backup_name(&self.filename, now, sequence)?);

        let mut active = match std::mem::replace(&mut state.phase, Phase::Pending) {
            Phase::Active(active) => active,
            other => {
                state.phase = other;
                return Err(Error::Closed);
            }
        };

        if let Err(source) = active.file.flush() {
            state.phase = Phase::Active(active);
            return Err(Error::Write {
                path: self.active_path.clone(),
                source,
            });
        }
        let size = active.size;
        drop(active);

        if let Err(source) = std::fs::rename(&self.active_path, &backup_path) {
            // Keep appending to the old file so the writer stays usable.
            let file = self.open_active()?;
            state.phase = Phase::Active(ActiveFile {
                file,
                size,
                opened_at: now,
            });
            return Err(Error::Rename {
                from: self.active_path.clone(),
                to: backup_path,
                source,
            });
        }
        state.next_sequence += 1;
        state.backups.insert(
            0,
            BackupFile {
                path: backup_path,
                created_at: now,
                sequence,
                size,
            },
        );

        let file = self.open_active()?;
        state.phase = Phase::Active(ActiveFile {
            file,
            size: 0,
            opened_at: now,
        });

        self.sweep_locked(state, now);
        Ok(())
    }

    fn sweep_locked(&self, state: &mut WriterState, now: OffsetDateTime) {
        if self.policy.retains_all() {
            return;
        }
        let backups = self.scan_backups(state);
        let (kept, report) = rotation::sweep_backups(backups, &self.policy, now);
        state.backups = kept;
        state.warnings.extend(report.failures);
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.append(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        RotatingWriter::flush(self).map_err(io::Error::from)
    }
}

impl Write for &RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.append(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        RotatingWriter::flush(*self).map_err(io::Error::from)
    }
}

impl<'a> MakeWriter<'a> for RotatingWriter {
    type Writer = &'a RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}
