//! Asynchronous audit pipeline (C9): a bounded `mpsc` queue drained by a
//! pool of worker tasks that append to the repository. A full queue never
//! rejects the calculation that triggered it — it spills to a local JSONL
//! file instead, reconciled into the repository at the next startup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::models::AuditRecord;
use crate::repository::Repository;

/// Handed to request handlers; cheap to clone, enqueue never suspends past
/// `enqueue_timeout` (§4.9).
#[derive(Clone)]
pub struct AuditHandle {
    sender: mpsc::Sender<AuditRecord>,
    enqueue_timeout: Duration,
    spill_path: Arc<PathBuf>,
}

impl AuditHandle {
    /// Enqueues `record`. Blocks up to `enqueue_timeout` waiting for queue
    /// capacity; on timeout, spills to disk instead of rejecting the
    /// caller's calculation.
    pub async fn enqueue(&self, record: AuditRecord) {
        // `reserve` (not `send`) so a timed-out wait never consumes `record`
        // before we've actually queued it, and the caller can fall back to
        // spilling the very value that failed to enqueue.
        match tokio::time::timeout(self.enqueue_timeout, self.sender.reserve()).await {
            Ok(Ok(permit)) => permit.send(record),
            Ok(Err(_closed)) => self.spill(record).await,
            Err(_timed_out) => self.spill(record).await,
        }
    }

    async fn spill(&self, record: AuditRecord) {
        let Ok(line) = serde_json::to_string(&record) else {
            error!(audit_id = %record.audit_id, "failed to serialize audit record for spill, dropping");
            return;
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.spill_path.as_path())
            .await;
        match result {
            Ok(mut file) => {
                if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                    error!(error = %e, audit_id = %record.audit_id, "failed to spill audit record to disk");
                }
            }
            Err(e) => {
                error!(error = %e, audit_id = %record.audit_id, "failed to open audit spill file");
            }
        }
    }
}

/// Spawns the worker pool and returns the handle request handlers enqueue
/// through. `queue_capacity` and `worker_count` come from `Config`.
pub fn spawn(
    repo: Arc<dyn Repository>,
    worker_count: usize,
    queue_capacity: usize,
    enqueue_timeout: Duration,
    spill_path: PathBuf,
) -> AuditHandle {
    let (sender, receiver) = mpsc::channel(queue_capacity);
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

    for worker_id in 0..worker_count {
        let repo = repo.clone();
        let receiver = receiver.clone();
        tokio::spawn(async move {
            loop {
                let record = {
                    let mut rx = receiver.lock().await;
                    rx.recv().await
                };
                let Some(record) = record else {
                    info!(worker_id, "audit worker shutting down, channel closed");
                    break;
                };
                if let Err(e) = repo.append_audit(&record).await {
                    warn!(worker_id, audit_id = %record.audit_id, error = %e, "audit append failed");
                }
            }
        });
    }

    AuditHandle {
        sender,
        enqueue_timeout,
        spill_path: Arc::new(spill_path),
    }
}

/// Replays any records left in the spill file from a previous run into the
/// repository, then truncates the file. Call once at startup before serving
/// traffic.
pub async fn reconcile_spill(repo: &dyn Repository, spill_path: &PathBuf) -> anyhow::Result<usize> {
    let Ok(file) = File::open(spill_path).await else {
        return Ok(0);
    };

    let mut lines = BufReader::new(file).lines();
    let mut replayed = 0usize;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditRecord>(&line) {
            Ok(record) => {
                if let Err(e) = repo.append_audit(&record).await {
                    warn!(error = %e, "failed to reconcile spilled audit record, leaving for next startup");
                    continue;
                }
                replayed += 1;
            }
            Err(e) => {
                error!(error = %e, "unparseable spill line, skipping");
            }
        }
    }

    tokio::fs::remove_file(spill_path).await.ok();
    Ok(replayed)
}
