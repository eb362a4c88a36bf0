//! Release jobs, queued in memory and processed one at a time.

mod worker;

pub use worker::{Worker, WorkerConfig};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tagsync_api::job::{JobId, JobStatus};
use tagsync_api::ReleaseSpec;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Releases requested by a user.
pub const PRIORITY_RELEASE: i32 = 100;
/// Releases found by the automation scanner.
pub const PRIORITY_AUTOMATED: i32 = 10;

/// Number of finished jobs to remember.
const HISTORY: usize = 256;

#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub spec: ReleaseSpec,
    pub priority: i32,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Running {
    job: Job,
    claimed_at: DateTime<Utc>,
    heartbeat: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    queued: Vec<Job>,
    running: HashMap<JobId, Running>,
    finished: HashMap<JobId, JobStatus>,
    /// Finished jobs, oldest first.
    history: VecDeque<JobId>,
}

impl Inner {
    /// Index of the next job: highest priority, then earliest scheduled.
    fn next(&self) -> Option<usize> {
        self.queued
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.scheduled_at.cmp(&b.scheduled_at))
            })
            .map(|(i, _)| i)
    }

    fn finish(&mut self, id: JobId, status: JobStatus) {
        self.running.remove(&id);
        if self.finished.insert(id, status).is_none() {
            self.history.push_back(id);
        }
        while self.history.len() > HISTORY {
            if let Some(oldest) = self.history.pop_front() {
                self.finished.remove(&oldest);
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct Queue {
    inner: Arc<RwLock<Inner>>,
    notify: Arc<Notify>,
}

impl Queue {
    pub fn submit(&self, spec: impl Into<ReleaseSpec>, priority: i32) -> JobId {
        self.submit_at(spec.into(), priority, Utc::now())
    }

    fn submit_at(&self, spec: ReleaseSpec, priority: i32, now: DateTime<Utc>) -> JobId {
        let job = Job {
            id: JobId::new(),
            spec,
            priority,
            scheduled_at: now,
        };
        let id = job.id;

        info!(job = %id, priority, "Submitted job");
        self.inner.write().queued.push(job);
        self.notify.notify_one();

        id
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        let inner = self.inner.read();
        if let Some(status) = inner.finished.get(&id) {
            return Some(status.clone());
        }
        if inner.running.contains_key(&id) {
            return Some(JobStatus::Running);
        }
        inner
            .queued
            .iter()
            .any(|job| job.id == id)
            .then_some(JobStatus::Queued)
    }

    pub fn claim(&self) -> Option<Job> {
        self.claim_at(Utc::now())
    }

    pub fn claim_at(&self, now: DateTime<Utc>) -> Option<Job> {
        let mut inner = self.inner.write();
        let job = inner.next().map(|i| inner.queued.remove(i))?;

        debug!(job = %job.id, "Claimed job");
        inner.running.insert(
            job.id,
            Running {
                job: job.clone(),
                claimed_at: now,
                heartbeat: now,
            },
        );

        Some(job)
    }

    /// Wait for the next job, and claim it.
    pub async fn next(&self) -> Job {
        loop {
            if let Some(job) = self.claim() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub fn heartbeat(&self, id: JobId) {
        self.heartbeat_at(id, Utc::now())
    }

    fn heartbeat_at(&self, id: JobId, now: DateTime<Utc>) {
        if let Some(running) = self.inner.write().running.get_mut(&id) {
            running.heartbeat = now;
        }
    }

    pub fn complete(&self, id: JobId, status: JobStatus) {
        let mut inner = self.inner.write();
        if let Some(running) = inner.running.get(&id) {
            let took = Utc::now() - running.claimed_at;
            info!(job = %id, took_ms = took.num_milliseconds(), "Finished job");
        }
        inner.finish(id, status);
    }

    /// Put running jobs without a recent heartbeat back into the queue.
    pub fn reclaim_stale(&self, window: Duration, now: DateTime<Utc>) -> Vec<JobId> {
        let mut inner = self.inner.write();

        let stale: Vec<_> = inner
            .running
            .values()
            .filter(|r| (now - r.heartbeat).to_std().unwrap_or_default() > window)
            .map(|r| r.job.id)
            .collect();

        for id in &stale {
            if let Some(running) = inner.running.remove(id) {
                warn!(job = %id, "Reclaiming stale job");
                inner.queued.push(running.job);
            }
        }

        if !stale.is_empty() {
            self.notify.notify_one();
        }

        stale
    }
}

/// Periodically reclaim stale jobs.
pub async fn reclaim(queue: Queue, window: Duration) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(window);
    loop {
        interval.tick().await;
        queue.reclaim_stale(window, Utc::now());
    }
}
