//! File-backed saga log: one append-only file per saga

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::SagaError;
use crate::log::{check_append, SagaLog};
use crate::messages::SagaMessage;
use crate::state::SagaId;

/// Durable [`SagaLog`] over a directory.
///
/// Each saga's history lives in its own file, one JSON-encoded message
/// per line, flushed and synced on every append. A completed append
/// always ends in a newline, so a trailing fragment without one is an
/// append that never finished: reads ignore it and the next append
/// truncates it away, keeping the durable record exactly as it was
/// before the failed write. Saga ids are opaque strings, so file names
/// carry the hex encoding of the id; reopening a `FileSagaLog` over the
/// same directory sees every previously logged saga.
pub struct FileSagaLog {
    root: PathBuf,
    // serializes appends and gives readers a consistent prefix
    lock: Mutex<()>,
}

const LOG_EXTENSION: &str = "sagalog";

impl FileSagaLog {
    /// Open (creating if needed) a log rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SagaError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    fn path_for(&self, saga_id: &SagaId) -> PathBuf {
        self.root
            .join(format!("{}.{}", encode_id(saga_id), LOG_EXTENSION))
    }

    /// Parse the durable prefix of a saga's file: every complete line.
    ///
    /// Returns the messages and the byte length of that prefix, so
    /// writers can truncate a torn tail before appending. An
    /// undecodable complete line means the store itself is damaged.
    fn read_history(
        &self,
        saga_id: &SagaId,
        path: &Path,
    ) -> Result<(Vec<SagaMessage>, u64), SagaError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SagaError::NotFound(saga_id.clone()))
            }
            Err(e) => return Err(SagaError::LogAppend(e.to_string().into())),
        };
        let durable = match content.rfind('\n') {
            Some(pos) => &content[..=pos],
            None => "",
        };
        if durable.len() < content.len() {
            tracing::warn!(saga_id = %saga_id, "ignoring torn trailing append");
        }
        let messages = durable
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| SagaError::CorruptedLog {
                    saga_id: saga_id.clone(),
                    reason: format!("undecodable message: {e}").into(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok((messages, durable.len() as u64))
    }

    fn append_line(file: &mut fs::File, message: &SagaMessage) -> Result<(), SagaError> {
        let line = serde_json::to_string(message)
            .map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        writeln!(file, "{line}").map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        file.sync_all()
            .map_err(|e| SagaError::LogAppend(e.to_string().into()))
    }
}

impl SagaLog for FileSagaLog {
    fn start_saga(&self, saga_id: &SagaId, job: &[u8]) -> Result<(), SagaError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        let path = self.path_for(saga_id);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let (_, durable_len) = self.read_history(saga_id, &path)?;
                if durable_len > 0 {
                    return Err(SagaError::AlreadyStarted(saga_id.clone()));
                }
                // only a torn start fragment reached the file; the saga
                // never durably started, so retry over a clean file
                let file = OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
                file.set_len(0)
                    .map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
                file
            }
            Err(e) => return Err(SagaError::LogAppend(e.to_string().into())),
        };
        let message = SagaMessage::start_saga(saga_id.clone(), job.to_vec());
        Self::append_line(&mut file, &message)?;
        tracing::debug!(saga_id = %saga_id, path = %path.display(), "saga history started");
        Ok(())
    }

    fn log_message(&self, message: SagaMessage) -> Result<(), SagaError> {
        if matches!(message, SagaMessage::StartSaga { .. }) {
            return Err(SagaError::LogAppend(
                "start_saga must go through the start operation".into(),
            ));
        }
        let _guard = self
            .lock
            .lock()
            .map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        let saga_id = message.saga_id().clone();
        let path = self.path_for(&saga_id);
        let (history, durable_len) = self.read_history(&saga_id, &path)?;
        check_append(&saga_id, &history, &message)?;

        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        // drop any torn tail so the new line starts on a clean boundary
        file.set_len(durable_len)
            .map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        Self::append_line(&mut file, &message)
    }

    fn messages(&self, saga_id: &SagaId) -> Result<Vec<SagaMessage>, SagaError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        self.read_history(saga_id, &self.path_for(saga_id))
            .map(|(messages, _)| messages)
    }

    fn list_sagas(&self) -> Result<Vec<SagaId>, SagaError> {
        let entries =
            fs::read_dir(&self.root).map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_id(stem) {
                Some(id) => ids.push(id),
                None => {
                    tracing::warn!(path = %path.display(), "skipping log file with undecodable name")
                }
            }
        }
        Ok(ids)
    }
}

// The `s` marker keeps the stem non-empty even for an empty saga id;
// a bare `.sagalog` file name would parse as extensionless and hide
// the saga from `list_sagas`.
fn encode_id(saga_id: &SagaId) -> String {
    use std::fmt::Write as _;
    let mut encoded = String::with_capacity(saga_id.as_str().len() * 2 + 1);
    encoded.push('s');
    for byte in saga_id.as_str().bytes() {
        let _ = write!(encoded, "{byte:02x}");
    }
    encoded
}

fn decode_id(stem: &str) -> Option<SagaId> {
    let hex = stem.strip_prefix('s')?;
    if hex.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok().map(SagaId::from)
}
