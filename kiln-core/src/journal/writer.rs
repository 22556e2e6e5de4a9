//! Journal writer and replay.

use super::record::{JournalPayload, JournalRecord};
use crate::error::{KilnError, Result};
use crate::state::{ExecutionState, ExecutionStateMap, InteractionAttempt};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Configuration for the journal.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory holding the journal file.
    pub directory: PathBuf,
    /// Journal file name.
    pub file_name: String,
    /// Sync to disk after every append.
    ///
    /// The append-before-proceed durability guarantee requires this in
    /// production; tests may disable it.
    pub sync_on_write: bool,
    /// Keep records in memory only (tests).
    pub in_memory: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".kiln"),
            file_name: "deployment.journal".to_string(),
            sync_on_write: true,
            in_memory: false,
        }
    }
}

impl JournalConfig {
    /// In-memory configuration for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Self::default()
        }
    }

    /// Set the directory.
    #[must_use]
    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = dir.into();
        self
    }

    /// Set sync-on-write.
    #[must_use]
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Create configuration from environment variables, or use defaults.
    ///
    /// Reads `KILN_DATA_DIR` and `KILN_JOURNAL_SYNC`.
    #[must_use]
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("KILN_DATA_DIR") {
            config.directory = PathBuf::from(dir);
        }
        if let Ok(sync) = std::env::var("KILN_JOURNAL_SYNC") {
            config.sync_on_write = sync != "false" && sync != "0";
        }
        config
    }

    fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

enum Backing {
    File {
        writer: BufWriter<File>,
        path: PathBuf,
    },
    Memory {
        buf: Vec<u8>,
    },
}

/// Durable append-only journal of execution state transitions.
///
/// The journal is the single source of truth for resumability: every
/// transition that produces or observes an on-chain effect is appended
/// (and synced, when configured) before the driver proceeds, so the
/// on-disk journal never lags the last externally-visible side effect.
pub struct Journal {
    inner: Mutex<Backing>,
    sync_on_write: bool,
}

impl Journal {
    /// Create or open a journal.
    ///
    /// File-backed journals take an exclusive lock so two deployer
    /// processes cannot interleave appends.
    pub fn open(config: JournalConfig) -> Result<Self> {
        if config.in_memory {
            return Ok(Self {
                inner: Mutex::new(Backing::Memory { buf: Vec::new() }),
                sync_on_write: false,
            });
        }

        let path = config.path();
        std::fs::create_dir_all(&config.directory).map_err(|e| KilnError::JournalRead {
            path: path.clone(),
            cause: format!("failed to create journal directory: {e}"),
        })?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| KilnError::JournalRead {
                path: path.clone(),
                cause: format!("failed to open journal file: {e}"),
            })?;

        file.try_lock_exclusive().map_err(|e| KilnError::JournalRead {
            path: path.clone(),
            cause: format!("failed to lock journal file: {e}"),
        })?;

        Ok(Self {
            inner: Mutex::new(Backing::File {
                writer: BufWriter::new(file),
                path,
            }),
            sync_on_write: config.sync_on_write,
        })
    }

    /// Open an in-memory journal for tests.
    pub fn in_memory() -> Self {
        Self::open(JournalConfig::in_memory()).expect("in-memory journal cannot fail to open")
    }

    /// Append a record.
    ///
    /// Returns only after the record is durably written (flushed and, when
    /// configured, synced); callers rely on this ordering.
    pub fn append(&self, record: &JournalRecord) -> Result<()> {
        let bytes = record.to_bytes().map_err(|e| KilnError::JournalWrite {
            future_id: record.future_id.clone(),
            cause: e.to_string(),
        })?;

        let mut inner = self.inner.lock();
        match &mut *inner {
            Backing::File { writer, .. } => {
                writer
                    .write_all(&bytes)
                    .and_then(|()| writer.flush())
                    .map_err(|e| KilnError::JournalWrite {
                        future_id: record.future_id.clone(),
                        cause: e.to_string(),
                    })?;
                if self.sync_on_write {
                    writer
                        .get_ref()
                        .sync_data()
                        .map_err(|e| KilnError::JournalWrite {
                            future_id: record.future_id.clone(),
                            cause: e.to_string(),
                        })?;
                }
            }
            Backing::Memory { buf } => buf.extend_from_slice(&bytes),
        }
        Ok(())
    }

    /// Read back every record in append order.
    ///
    /// A truncated record at the tail (crash mid-append) is tolerated and
    /// dropped; corruption anywhere else is an error.
    pub fn records(&self) -> Result<Vec<JournalRecord>> {
        let (bytes, path) = {
            let inner = self.inner.lock();
            match &*inner {
                Backing::File { path, .. } => {
                    let bytes = std::fs::read(path).map_err(|e| KilnError::JournalRead {
                        path: path.clone(),
                        cause: e.to_string(),
                    })?;
                    (bytes, path.clone())
                }
                Backing::Memory { buf } => (buf.clone(), PathBuf::from("<memory>")),
            }
        };
        parse_records(&bytes, &path)
    }

    /// Replay the journal into an execution state map.
    pub fn replay(&self) -> Result<ExecutionStateMap> {
        replay_records(&self.records()?)
    }
}

fn parse_records(bytes: &[u8], path: &Path) -> Result<Vec<JournalRecord>> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        match JournalRecord::from_bytes(&bytes[offset..]) {
            Ok((record, consumed)) => {
                records.push(record);
                offset += consumed;
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                // Torn tail write from a crash mid-append. Everything before
                // it is intact, and the interrupted transition had not yet
                // become externally visible.
                tracing::warn!(
                    position = offset,
                    trailing_bytes = bytes.len() - offset,
                    "Dropping truncated journal tail record"
                );
                break;
            }
            Err(e) => {
                return Err(KilnError::JournalCorruption {
                    position: offset as u64,
                    cause: format!("{e} ({})", path.display()),
                });
            }
        }
    }

    Ok(records)
}

/// Fold journal records into per-future execution states.
pub fn replay_records(records: &[JournalRecord]) -> Result<ExecutionStateMap> {
    let mut states = ExecutionStateMap::new();

    for record in records {
        let id = &record.future_id;
        match &record.payload {
            JournalPayload::RunStart { .. } => {}
            JournalPayload::ExecutionStart {
                kind,
                dependencies,
                params,
                account,
                strategy,
            } => {
                states.insert(ExecutionState::started(
                    id.clone(),
                    *kind,
                    dependencies.clone(),
                    params.clone(),
                    *account,
                    strategy.clone(),
                ));
            }
            JournalPayload::SubmissionRecorded { payload, tx } => {
                let state = states.get_mut(id).ok_or_else(|| missing_start(id))?;
                state.record_submission(InteractionAttempt {
                    payload: payload.clone(),
                    tx: *tx,
                    note: None,
                })?;
            }
            JournalPayload::ExecutionSuccess { value } => {
                let state = states.get_mut(id).ok_or_else(|| missing_start(id))?;
                state.succeed(value.clone())?;
            }
            JournalPayload::ExecutionFailure { result } => {
                let state = states.get_mut(id).ok_or_else(|| missing_start(id))?;
                state.fail(result.clone())?;
            }
            JournalPayload::ExecutionTimeout => {
                let state = states.get_mut(id).ok_or_else(|| missing_start(id))?;
                state.time_out()?;
            }
            JournalPayload::WaitResumed => {
                let state = states.get_mut(id).ok_or_else(|| missing_start(id))?;
                state.resume_wait();
            }
        }
    }

    Ok(states)
}

fn missing_start(id: &crate::types::FutureId) -> KilnError {
    KilnError::JournalReplay {
        future_id: id.clone(),
        cause: "record precedes its execution start".to_string(),
    }
}
