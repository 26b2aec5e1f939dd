//! Append-only log file and its writer task.

use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::{AuditError, LogFormat, LogRecord};

const CHANNEL_CAPACITY: usize = 1024;
const BATCH_SIZE: usize = 256;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

enum Command {
    Append(LogRecord),
    Flush(oneshot::Sender<Result<(), AuditError>>),
}

/// Handle to the audit log. Cheap to clone; all clones feed the same writer.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<Command>,
    path: PathBuf,
    format: LogFormat,
}

impl AuditLog {
    /// Open the log at `path` and start its writer task.
    ///
    /// The file itself is created on the first write. Must be called from
    /// within a tokio runtime.
    pub fn open<P: AsRef<Path>>(path: P, format: LogFormat) -> Self {
        let path = path.as_ref().to_path_buf();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(run_writer(rx, LogFile::new(path.clone(), format)));

        Self { tx, path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a record for appending.
    ///
    /// Never fails: if the writer is gone the record is reported on stderr.
    pub async fn append(&self, record: LogRecord) {
        if let Err(mpsc::error::SendError(cmd)) = self.tx.send(Command::Append(record)).await {
            if let Command::Append(record) = cmd {
                report_unpersisted(&record, &AuditError::Closed);
            }
        }
    }

    /// Wait until every record queued before this call is on disk.
    pub async fn flush(&self) -> Result<(), AuditError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack_tx))
            .await
            .map_err(|_| AuditError::Closed)?;
        ack_rx.await.map_err(|_| AuditError::Closed)?
    }

    /// Every record appended before this call, oldest first.
    ///
    /// Pending records are written out first. Returns `AuditError::NotFound`
    /// if nothing has been written yet.
    pub async fn read_all(&self) -> Result<Vec<LogRecord>, AuditError> {
        if let Err(e) = self.flush().await {
            // Records that failed to persist were already reported
            tracing::warn!("Reading audit log after failed flush: {}", e);
        }
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(AuditError::NotFound),
            Err(e) => return Err(e.into()),
        };
        Ok(self.format.decode_all(&contents))
    }

    /// Records with `timestamp >= since`, oldest first.
    pub async fn read_since(&self, since: DateTime<Utc>) -> Result<Vec<LogRecord>, AuditError> {
        let mut records = self.read_all().await?;
        records.retain(|r| r.timestamp >= since);
        Ok(records)
    }
}

/// The on-disk side, owned by the writer task.
struct LogFile {
    path: PathBuf,
    format: LogFormat,
    file: Option<File>,
}

impl LogFile {
    fn new(path: PathBuf, format: LogFormat) -> Self {
        Self {
            path,
            format,
            file: None,
        }
    }

    fn handle(&mut self) -> Result<&mut File, AuditError> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            self.file = Some(file);
        }
        self.file.as_mut().ok_or(AuditError::Closed)
    }

    /// Append a batch with a single write.
    fn append_batch(&mut self, records: &[LogRecord]) -> Result<(), AuditError> {
        let mut batch = String::new();
        for record in records {
            batch.push_str(&self.format.encode(record)?);
            batch.push('\n');
        }

        let result = self
            .handle()
            .and_then(|file| file.write_all(batch.as_bytes()).map_err(AuditError::from));

        if result.is_err() {
            // Reopen on the next batch
            self.file = None;
        }
        result
    }
}

/// Run the writer that accumulates and flushes records.
async fn run_writer(mut rx: mpsc::Receiver<Command>, log: LogFile) {
    let log = Arc::new(Mutex::new(log));
    let mut buffer: Vec<LogRecord> = Vec::with_capacity(BATCH_SIZE);
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(Command::Append(record)) => {
                        buffer.push(record);
                        if buffer.len() >= BATCH_SIZE {
                            let _ = flush_buffer(&log, &mut buffer).await;
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        let _ = ack.send(flush_buffer(&log, &mut buffer).await);
                    }
                    None => {
                        // Channel closed, flush remaining and exit
                        let _ = flush_buffer(&log, &mut buffer).await;
                        break;
                    }
                }
            }
            _ = interval.tick() => {
                let _ = flush_buffer(&log, &mut buffer).await;
            }
        }
    }
}

/// Write the buffered records on the blocking pool.
///
/// Batches are awaited one at a time, so file order follows append order.
async fn flush_buffer(log: &Arc<Mutex<LogFile>>, buffer: &mut Vec<LogRecord>) -> Result<(), AuditError> {
    if buffer.is_empty() {
        return Ok(());
    }

    let records = std::mem::replace(buffer, Vec::with_capacity(BATCH_SIZE));
    let log = Arc::clone(log);

    tokio::task::spawn_blocking(move || {
        let result = match log.lock() {
            Ok(mut log) => log.append_batch(&records),
            Err(_) => Err(AuditError::Closed),
        };
        if let Err(e) = &result {
            for record in &records {
                report_unpersisted(record, e);
            }
        }
        result
    })
    .await
    .unwrap_or_else(|e| {
        tracing::error!("Audit log write task failed: {}", e);
        Err(AuditError::Closed)
    })
}

/// Fallback channel: a record the log store could not take goes to stderr.
fn report_unpersisted(record: &LogRecord, error: &AuditError) {
    let line = serde_json::to_string(record).unwrap_or_else(|_| record.message.clone());
    tracing::error!(error = %error, record = %line, "Audit log unavailable, record not persisted");
}
