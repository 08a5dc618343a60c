//! Rotation-safe directory tailer for the kernel audit log.
//!
//! The audit daemon writes `audit.log` and rotates it to
//! `audit.log.1`, `audit.log.2`, ... with larger suffixes being older.
//! [`DirectoryTailer::start`] reads every historical file to
//! completion, oldest first, then follows the live file across
//! rotation and truncation, emitting raw text lines on a bounded
//! channel.
//!
//! The filesystem watch is established before catch-up begins, so
//! writes that land during catch-up are queued and picked up by the
//! live phase instead of being missed.
//!
//! Rotation is detected two ways: create/remove/rename notifications
//! for the live path reset the read offset, and a shrink of the
//! file's size does the same regardless of notification kind, which
//! covers missed or batched notifications.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use auditlink_core::config::TailerConfig as CoreTailerConfig;
use auditlink_core::metrics as metric_names;
use metrics::counter;

use crate::retry::{RetryError, RetryPolicy, retry};

/// Directory tailer settings.
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// Directory containing the live file and its rotated siblings.
    pub directory: PathBuf,
    /// Name of the live (unsuffixed) file.
    pub live_file: String,
    /// Capacity of the emitted-lines channel.
    pub channel_capacity: usize,
    /// Backoff policy for transient read failures.
    pub retry: RetryPolicy,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/var/log/audit"),
            live_file: "audit.log".to_owned(),
            channel_capacity: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl TailerConfig {
    /// Build from the core `[tailer]` section.
    pub fn from_core(core: &CoreTailerConfig) -> Self {
        Self {
            directory: PathBuf::from(&core.directory),
            live_file: core.live_file.clone(),
            channel_capacity: core.channel_capacity,
            retry: RetryPolicy {
                initial_delay: Duration::from_millis(core.retry_initial_ms),
                max_delay: Duration::from_millis(core.retry_max_ms),
                max_elapsed: Duration::from_secs(core.retry_max_elapsed_secs),
            },
        }
    }
}

/// Tailer failures. Every exit of the tail task is one of these;
/// [`TailerError::Cancelled`] is the cooperative-shutdown case.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TailerError {
    /// The directory could not be resolved or listed.
    #[error("tail directory {path}: {reason}")]
    Directory {
        /// Directory path.
        path: String,
        /// Underlying failure.
        reason: String,
    },

    /// The filesystem watch could not be established or died.
    #[error("filesystem watch on {path}: {reason}")]
    Watch {
        /// Watched path.
        path: String,
        /// Underlying failure.
        reason: String,
    },

    /// A file read failed permanently or exhausted its retries.
    #[error("read {path}: {reason}")]
    Read {
        /// File path.
        path: String,
        /// Underlying failure.
        reason: String,
    },

    /// The line receiver was dropped.
    #[error("line channel closed by receiver")]
    ChannelClosed,

    /// The shared cancellation token fired.
    #[error("tail cancelled")]
    Cancelled,

    /// The tail task could not be joined.
    #[error("tail task join failed: {0}")]
    Join(String),
}

/// Filesystem changes the tail loop reacts to.
#[derive(Debug)]
enum FsChange {
    /// Data may have been appended.
    Write(PathBuf),
    /// The file was created, removed, or renamed.
    Reset(PathBuf),
}

/// Handle to a running directory tail.
///
/// A tail cannot be restarted; start a new instance instead.
pub struct DirectoryTailer {
    lines_rx: Option<mpsc::Receiver<String>>,
    catch_up_rx: watch::Receiver<bool>,
    task: Option<JoinHandle<TailerError>>,
    terminal: Option<TailerError>,
}

impl DirectoryTailer {
    /// Start tailing `config.directory`.
    ///
    /// Fails fast on startup problems (directory unreadable, watch
    /// setup failure); everything after that surfaces through
    /// [`DirectoryTailer::wait`].
    pub async fn start(
        config: TailerConfig,
        cancel: CancellationToken,
    ) -> Result<Self, TailerError> {
        let directory = tokio::fs::canonicalize(&config.directory)
            .await
            .map_err(|e| TailerError::Directory {
                path: config.directory.display().to_string(),
                reason: e.to_string(),
            })?;

        // Watch before reading anything, so events raised during
        // catch-up are queued rather than missed.
        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<notify::Event, notify::Error>| match result {
                Ok(event) => {
                    let change = classify_event(&event.kind);
                    for path in event.paths {
                        let change = match change {
                            Some(Change::Write) => FsChange::Write(path),
                            Some(Change::Reset) => FsChange::Reset(path),
                            None => continue,
                        };
                        let _ = fs_tx.send(change);
                    }
                }
                Err(error) => {
                    warn!(%error, "filesystem watch error");
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| TailerError::Watch {
            path: directory.display().to_string(),
            reason: e.to_string(),
        })?;
        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|e| TailerError::Watch {
                path: directory.display().to_string(),
                reason: e.to_string(),
            })?;

        let historical = collect_log_files(&directory, &config.live_file).await?;
        info!(
            directory = %directory.display(),
            files = historical.len(),
            "starting catch-up"
        );

        let (line_tx, lines_rx) = mpsc::channel(config.channel_capacity);
        let (catch_up_tx, catch_up_rx) = watch::channel(false);

        let worker = TailWorker {
            live_path: directory.join(&config.live_file),
            line_tx,
            fs_rx,
            cancel,
            retry: config.retry,
            offset: 0,
            last_size: 0,
            _watcher: watcher,
        };
        let task = tokio::spawn(tail_loop(worker, historical, catch_up_tx));

        Ok(Self {
            lines_rx: Some(lines_rx),
            catch_up_rx,
            task: Some(task),
            terminal: None,
        })
    }

    /// Take the line receiver. Yields `None` on the second call.
    pub fn lines(&mut self) -> Option<mpsc::Receiver<String>> {
        self.lines_rx.take()
    }

    /// One-shot signal flipped to `true` when every historical file
    /// has been drained.
    pub fn catch_up_done(&self) -> watch::Receiver<bool> {
        self.catch_up_rx.clone()
    }

    /// Wait for the tail to end and return its terminal error.
    ///
    /// Idempotent: repeated calls return the same value. Cancel-safe:
    /// dropping the future mid-wait loses nothing.
    pub async fn wait(&mut self) -> TailerError {
        if let Some(error) = &self.terminal {
            return error.clone();
        }
        let error = match self.task.as_mut() {
            Some(task) => match task.await {
                Ok(error) => error,
                Err(e) => TailerError::Join(e.to_string()),
            },
            None => TailerError::Join("tail task already consumed".to_owned()),
        };
        self.task = None;
        self.terminal = Some(error.clone());
        error
    }
}

#[derive(Clone, Copy)]
enum Change {
    Write,
    Reset,
}

/// Map a notify event kind to the tail loop's view of the world.
///
/// Unknown kinds are treated as writes: the size check in the live
/// phase catches a rotation either way.
fn classify_event(kind: &notify::EventKind) -> Option<Change> {
    use notify::EventKind;
    use notify::event::ModifyKind;

    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => Some(Change::Reset),
        EventKind::Modify(ModifyKind::Name(_)) => Some(Change::Reset),
        EventKind::Modify(_) => Some(Change::Write),
        EventKind::Access(_) => None,
        _ => Some(Change::Write),
    }
}

/// List `<live>.N` files plus the live file, sorted oldest first.
///
/// Larger numeric suffixes are older; the live file sorts last.
/// Anything else in the directory is ignored.
async fn collect_log_files(
    directory: &Path,
    live_file: &str,
) -> Result<Vec<PathBuf>, TailerError> {
    let dir_error = |e: std::io::Error| TailerError::Directory {
        path: directory.display().to_string(),
        reason: e.to_string(),
    };

    let mut entries = tokio::fs::read_dir(directory).await.map_err(dir_error)?;
    let mut rotated: Vec<(u64, PathBuf)> = Vec::new();
    let mut live: Option<PathBuf> = None;

    while let Some(entry) = entries.next_entry().await.map_err(dir_error)? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name == live_file {
            live = Some(entry.path());
        } else if let Some(suffix) = rotation_suffix(name, live_file) {
            rotated.push((suffix, entry.path()));
        }
    }

    rotated.sort_by(|a, b| b.0.cmp(&a.0));
    let mut files: Vec<PathBuf> = rotated.into_iter().map(|(_, path)| path).collect();
    if let Some(live) = live {
        files.push(live);
    }
    Ok(files)
}

/// Parse the numeric rotation suffix of `<live>.N`. Returns `None`
/// for any other name.
fn rotation_suffix(name: &str, live_file: &str) -> Option<u64> {
    name.strip_prefix(live_file)?
        .strip_prefix('.')?
        .parse()
        .ok()
}

struct TailWorker {
    live_path: PathBuf,
    line_tx: mpsc::Sender<String>,
    fs_rx: mpsc::UnboundedReceiver<FsChange>,
    cancel: CancellationToken,
    retry: RetryPolicy,
    /// Byte offset into the live file up to which complete lines have
    /// been emitted.
    offset: u64,
    /// Last observed live-file size, for shrink detection.
    last_size: u64,
    /// Keeps the watch registered for the lifetime of the task.
    _watcher: RecommendedWatcher,
}

/// The tail task: catch-up, then follow the live file.
///
/// Always returns an error; [`TailerError::Cancelled`] is the
/// graceful case. The watcher is dropped (and the watch released) on
/// every exit path.
async fn tail_loop(
    mut worker: TailWorker,
    historical: Vec<PathBuf>,
    catch_up_tx: watch::Sender<bool>,
) -> TailerError {
    // Catch-up: strictly sequential, oldest first. Parallel reads
    // would scramble cross-file ordering.
    for path in historical {
        let is_live = path == worker.live_path;
        if let Err(error) = worker.drain_historical(&path, is_live).await {
            return error;
        }
        counter!(metric_names::TAILER_CATCHUP_FILES_TOTAL).increment(1);
    }
    let _ = catch_up_tx.send(true);
    info!(live = %worker.live_path.display(), "catch-up complete, tailing live file");

    loop {
        tokio::select! {
            _ = worker.cancel.cancelled() => return TailerError::Cancelled,
            change = worker.fs_rx.recv() => {
                let change = match change {
                    Some(change) => change,
                    None => {
                        return TailerError::Watch {
                            path: worker.live_path.display().to_string(),
                            reason: "watch event channel closed".to_owned(),
                        };
                    }
                };
                let result = match change {
                    FsChange::Reset(path) if path == worker.live_path => {
                        debug!(path = %path.display(), "live file replaced, resetting offset");
                        counter!(metric_names::TAILER_ROTATIONS_TOTAL).increment(1);
                        worker.offset = 0;
                        worker.last_size = 0;
                        worker.consume_live().await
                    }
                    FsChange::Write(path) if path == worker.live_path => {
                        worker.consume_live().await
                    }
                    // other files in the directory (rotations being
                    // written, unrelated files)
                    _ => Ok(()),
                };
                if let Err(error) = result {
                    return error;
                }
            }
        }
    }
}

impl TailWorker {
    /// Read one historical file start to end, emitting its complete
    /// lines. For the live file, record how many bytes were consumed
    /// so the live phase resumes exactly there.
    async fn drain_historical(&mut self, path: &Path, is_live: bool) -> Result<(), TailerError> {
        let Some(buffer) = self.read_from(path, 0).await? else {
            // vanished between listing and reading: nothing to emit
            return Ok(());
        };
        let consumed = self.emit_complete_lines(&buffer).await?;
        if is_live {
            self.offset = consumed;
            self.last_size = buffer.len() as u64;
        }
        debug!(path = %path.display(), bytes = consumed, "drained historical file");
        Ok(())
    }

    /// React to live-file activity: detect truncation by size shrink,
    /// then read from the current offset to EOF.
    async fn consume_live(&mut self) -> Result<(), TailerError> {
        let size = match tokio::fs::metadata(&self.live_path).await {
            Ok(meta) => meta.len(),
            // absent mid-rotation; it is expected to reappear
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(TailerError::Read {
                    path: self.live_path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        // Second rotation signal, independent of notification kind:
        // a shrink means the file was truncated or swapped.
        if size < self.last_size || size < self.offset {
            debug!(
                size,
                last_size = self.last_size,
                "live file shrank, resetting offset"
            );
            counter!(metric_names::TAILER_ROTATIONS_TOTAL).increment(1);
            self.offset = 0;
        }
        self.last_size = size;

        if size == self.offset {
            return Ok(());
        }

        let path = self.live_path.clone();
        let Some(buffer) = self.read_from(&path, self.offset).await? else {
            return Ok(());
        };
        let consumed = self.emit_complete_lines(&buffer).await?;
        self.offset += consumed;
        Ok(())
    }

    /// Read a file from `offset` to EOF with backoff on transient
    /// errors. `Ok(None)` means the file does not exist.
    async fn read_from(
        &mut self,
        path: &Path,
        offset: u64,
    ) -> Result<Option<Vec<u8>>, TailerError> {
        let attempt = || async {
            let mut file = match tokio::fs::File::open(path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e),
            };
            if offset > 0 {
                file.seek(SeekFrom::Start(offset)).await?;
            }
            let mut buffer = Vec::new();
            file.read_to_end(&mut buffer).await?;
            Ok(Some(buffer))
        };

        retry(&self.retry, &self.cancel, io_is_transient, attempt)
            .await
            .map_err(|error| match error {
                RetryError::Cancelled => TailerError::Cancelled,
                RetryError::Exhausted(e) => {
                    counter!(metric_names::TAILER_READ_RETRIES_TOTAL).increment(1);
                    TailerError::Read {
                        path: path.display().to_string(),
                        reason: format!("retries exhausted: {e}"),
                    }
                }
                RetryError::Permanent(e) => TailerError::Read {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                },
            })
    }

    /// Emit every complete (newline-terminated) line in `buffer`.
    /// Returns the number of bytes consumed; a trailing partial line
    /// is not counted and will be re-read on the next notification.
    async fn emit_complete_lines(&mut self, buffer: &[u8]) -> Result<u64, TailerError> {
        let mut consumed = 0usize;
        let mut start = 0usize;

        while let Some(nl) = memchr(&buffer[start..], b'\n') {
            let end = start + nl;
            let mut line = &buffer[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line).into_owned();

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TailerError::Cancelled),
                sent = self.line_tx.send(line) => {
                    if sent.is_err() {
                        return Err(TailerError::ChannelClosed);
                    }
                }
            }
            counter!(metric_names::TAILER_LINES_TOTAL).increment(1);

            start = end + 1;
            consumed = start;
        }

        Ok(consumed as u64)
    }
}

/// Classification for the read retry loop: interruptions and timeouts
/// are worth retrying; everything else (permissions, the directory
/// itself being gone) is not.
fn io_is_transient(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        error.kind(),
        ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::UnexpectedEof
            | ErrorKind::ResourceBusy
    )
}

fn memchr(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}
