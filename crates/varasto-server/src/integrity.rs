//! Integrity verification: periodic scrubbing of volumes to catch bit rot
//! and hardware failures before they spread.
//!
//! A single supervisor task owns the `job id → cancellation handle` map and
//! mutates it only in response to messages over bounded channels, so the
//! map needs no lock. Each resumed job runs in its own worker; workers
//! deregister through the `stopped` channel. On shutdown the supervisor
//! waits for every worker to drain before returning; nothing is killed
//! forcibly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use varasto_db::MetaDb;
use varasto_types::{ids, Blob, BlobRef, IntegrityVerificationJob, VolumeId};

use crate::diskaccess::Scrubber;
use crate::{Result, ServerError};

/// The report is capped; a job that produces more error text than this is
/// aborted and left for the operator.
const ERROR_REPORT_MAX_LENGTH: usize = 20 * 1024;

const BATCH_LIMIT: usize = 1000;

const STATUS_PERSIST_INTERVAL: Duration = Duration::from_secs(5);

/// Creates (and persists) a new scrub job for one volume, resumable from
/// the start.
pub fn create_job(db: &MetaDb, volume_id: VolumeId) -> Result<IntegrityVerificationJob> {
    let job = IntegrityVerificationJob::new(
        ids::new_integrity_verification_job_id(),
        volume_id,
        Utc::now(),
    );
    let mut wtxn = db.write_txn()?;
    db.ivjobs.put(&mut wtxn, &job)?;
    wtxn.commit().map_err(varasto_db::StoreError::from)?;
    Ok(job)
}

enum Command {
    Resume {
        job_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        job_id: String,
    },
    ListRunning {
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// Thread-safe handle to the supervisor. All methods enqueue work; the
/// supervisor task does the actual map mutation.
#[derive(Clone)]
pub struct IntegrityController {
    commands: mpsc::Sender<Command>,
}

impl IntegrityController {
    /// Spawns the supervisor. `shutdown` is the parent cancellation: when
    /// it trips, every running job is allowed to drain and the returned
    /// join handle completes.
    pub fn start(
        db: Arc<MetaDb>,
        scrubber: Arc<dyn Scrubber>,
        shutdown: CancellationToken,
    ) -> (IntegrityController, tokio::task::JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let handle = tokio::spawn(supervise(db, scrubber, shutdown, commands_rx));
        (
            IntegrityController {
                commands: commands_tx,
            },
            handle,
        )
    }

    /// Resumes the job from its persisted cursor. A job that is already
    /// running answers [`ServerError::JobAlreadyRunning`].
    pub async fn resume(&self, job_id: &str) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Resume {
                job_id: job_id.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| ServerError::ControllerUnavailable)?;
        reply_rx.await.map_err(|_| ServerError::ControllerUnavailable)?
    }

    /// Requests cooperative cancellation of one running job.
    pub async fn stop(&self, job_id: &str) -> Result<()> {
        self.commands
            .send(Command::Stop {
                job_id: job_id.to_string(),
            })
            .await
            .map_err(|_| ServerError::ControllerUnavailable)
    }

    pub async fn list_running(&self) -> Result<Vec<String>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::ListRunning { reply: reply_tx })
            .await
            .map_err(|_| ServerError::ControllerUnavailable)?;
        reply_rx.await.map_err(|_| ServerError::ControllerUnavailable)
    }
}

struct RunningJob {
    cancel: CancellationToken,
    volume_id: VolumeId,
}

async fn supervise(
    db: Arc<MetaDb>,
    scrubber: Arc<dyn Scrubber>,
    shutdown: CancellationToken,
    mut commands: mpsc::Receiver<Command>,
) {
    let (stopped_tx, mut stopped_rx) = mpsc::channel::<String>(8);
    let mut running: HashMap<String, RunningJob> = HashMap::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                // child tokens are already tripped; wait for each worker
                // to deregister
                while !running.is_empty() {
                    info!(jobs = running.len(), "waiting for scrub jobs to stop");
                    match stopped_rx.recv().await {
                        Some(job_id) => {
                            running.remove(&job_id);
                        }
                        None => break,
                    }
                }
                return;
            }
            Some(job_id) = stopped_rx.recv() => {
                running.remove(&job_id);
            }
            command = commands.recv() => {
                let Some(command) = command else { return };
                match command {
                    Command::Resume { job_id, reply } => {
                        let result = resume_job(
                            &db,
                            &scrubber,
                            &shutdown,
                            &stopped_tx,
                            &mut running,
                            &job_id,
                        );
                        let _ = reply.send(result);
                    }
                    Command::Stop { job_id } => {
                        match running.get(&job_id) {
                            Some(job) => {
                                info!(job = %job_id, "stopping scrub job");
                                job.cancel.cancel();
                            }
                            None => warn!(job = %job_id, "stop requested for job that is not running"),
                        }
                    }
                    Command::ListRunning { reply } => {
                        let _ = reply.send(running.keys().cloned().collect());
                    }
                }
            }
        }
    }
}

fn resume_job(
    db: &Arc<MetaDb>,
    scrubber: &Arc<dyn Scrubber>,
    shutdown: &CancellationToken,
    stopped_tx: &mpsc::Sender<String>,
    running: &mut HashMap<String, RunningJob>,
    job_id: &str,
) -> Result<()> {
    if running.contains_key(job_id) {
        return Err(ServerError::JobAlreadyRunning(job_id.to_string()));
    }

    let job = {
        let rtxn = db.read_txn()?;
        db.ivjobs.require(&rtxn, job_id.as_bytes())?
    };

    // two concurrent scrubs of one volume would fight over the same disk
    // and share no cursor; different volumes may proceed in parallel
    if let Some((other, _)) = running.iter().find(|(_, r)| r.volume_id == job.volume_id) {
        return Err(ServerError::JobAlreadyRunning(other.clone()));
    }

    info!(job = %job_id, volume = job.volume_id, "resuming scrub job");

    // one child token per job: trips on parent cancel (shutdown) or on a
    // targeted stop
    let cancel = shutdown.child_token();
    running.insert(
        job_id.to_string(),
        RunningJob {
            cancel: cancel.clone(),
            volume_id: job.volume_id,
        },
    );

    let db = db.clone();
    let scrubber = scrubber.clone();
    let stopped_tx = stopped_tx.clone();
    let job_id = job_id.to_string();

    tokio::spawn(async move {
        let result =
            tokio::task::spawn_blocking(move || run_job(&db, scrubber.as_ref(), &cancel, job))
                .await;
        match result {
            Ok(Ok(())) => debug!(job = %job_id, "scrub worker finished"),
            Ok(Err(e)) => error!(job = %job_id, error = %e, "scrub worker failed"),
            Err(e) => error!(job = %job_id, error = %e, "scrub worker panicked"),
        }
        let _ = stopped_tx.send(job_id).await;
    });

    Ok(())
}

fn next_batch(db: &MetaDb, after: Option<&BlobRef>, limit: usize) -> Result<Vec<Blob>> {
    let rtxn = db.read_txn()?;
    let mut batch = Vec::new();
    db.blobs.each_after(
        &rtxn,
        after.map(|r| &r.as_bytes()[..]),
        |_, blob| {
            batch.push(blob);
            if batch.len() >= limit {
                std::ops::ControlFlow::Break(())
            } else {
                std::ops::ControlFlow::Continue(())
            }
        },
    )?;
    Ok(batch)
}

fn persist_job(db: &MetaDb, job: &IntegrityVerificationJob) -> Result<()> {
    let mut wtxn = db.write_txn()?;
    db.ivjobs.put(&mut wtxn, job)?;
    wtxn.commit().map_err(varasto_db::StoreError::from)?;
    Ok(())
}

/// Appends one report line. Returns true when the error budget is
/// exhausted and the job must terminate.
fn push_error(job: &mut IntegrityVerificationJob, line: String) -> bool {
    job.errors_found += 1;
    job.report.push_str(&line);
    if job.report.len() > ERROR_REPORT_MAX_LENGTH {
        job.report.push_str("maximum errors detected; aborting job");
        return true;
    }
    false
}

fn run_job(
    db: &MetaDb,
    scrubber: &dyn Scrubber,
    cancel: &CancellationToken,
    mut job: IntegrityVerificationJob,
) -> Result<()> {
    let result = scrub_blobs(db, scrubber, cancel, &mut job);
    // final status write covers every exit path, error included
    if let Err(e) = persist_job(db, &job) {
        error!(job = %job.id, error = %e, "failed to persist job status");
    }
    result
}

fn scrub_blobs(
    db: &MetaDb,
    scrubber: &dyn Scrubber,
    cancel: &CancellationToken,
    job: &mut IntegrityVerificationJob,
) -> Result<()> {
    let mut last_persist = Instant::now();

    loop {
        // the cursor is exclusive: the blob persisted as last completed is
        // not fetched again by the next batch
        let batch = next_batch(db, job.last_completed_blob_ref.as_ref(), BATCH_LIMIT)?;
        if batch.is_empty() {
            break;
        }
        let batch_len = batch.len();

        for blob in batch {
            // progress marker, not a success marker: advance even when the
            // blob is skipped so sparse volumes still show movement
            job.last_completed_blob_ref = Some(blob.blob_ref);

            if last_persist.elapsed() >= STATUS_PERSIST_INTERVAL {
                persist_job(db, job)?;
                last_persist = Instant::now();
            }

            if !blob.volumes.contains(&job.volume_id) {
                continue;
            }

            match scrubber.scrub(&blob, job.volume_id) {
                Ok(bytes_scanned) => {
                    if bytes_scanned != blob.size_on_disk as u64 {
                        let line = format!(
                            "blob {} size mismatch; expected={} got={}\n",
                            blob.blob_ref.as_hex(),
                            blob.size_on_disk,
                            bytes_scanned
                        );
                        if push_error(job, line) {
                            job.completed = Some(Utc::now());
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    let line = format!("blob {}: {}\n", blob.blob_ref.as_hex(), e);
                    if push_error(job, line) {
                        job.completed = Some(Utc::now());
                        return Ok(());
                    }
                }
            }

            job.bytes_scanned += blob.size_on_disk as u64;
        }

        if cancel.is_cancelled() {
            debug!(job = %job.id, "scrub job cancelled, checkpointing");
            return Ok(());
        }

        if batch_len < BATCH_LIMIT {
            // fewer blobs than requested, the tail is reached
            break;
        }
    }

    job.completed = Some(Utc::now());
    job.report
        .push_str(&format!("Completed with {} error(s)\n", job.errors_found));
    Ok(())
}
