use super::{Job, Queue};
use crate::context::LiveContext;
use crate::git::{self, Repo};
use crate::manifests::Manifests;
use crate::registry::Registry;
use crate::store::Store;
use crate::update::{Release, Scope};
use anyhow::{anyhow, bail};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::pin::pin;
use std::time::Duration;
use tagsync_api::job::{JobId, JobStatus};
use tagsync_api::{ReleaseKind, ReleaseResult, ReleaseSpec};
use tracing::{info, info_span, warn, Instrument};

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Limit for computing a release.
    pub timeout: Duration,
    pub heartbeat: Duration,
}

/// What is recorded, as a git note, on each release commit.
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Note {
    job_id: JobId,
    spec: ReleaseSpec,
    result: ReleaseResult,
}

/// Processes jobs from the queue, one at a time.
pub struct Worker<R> {
    queue: Queue,
    store: Store,
    manifests: Manifests,
    repo: Repo,
    registry: R,
    scope: Vec<Scope>,
    config: WorkerConfig,
}

impl<R: Registry> Worker<R> {
    pub fn new(
        queue: Queue,
        store: Store,
        manifests: Manifests,
        repo: Repo,
        registry: R,
        scope: Vec<Scope>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            manifests,
            repo,
            registry,
            scope,
            config,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            let job = self.queue.next().await;
            let status = self.process(&job).await;
            self.queue.complete(job.id, status);
        }
    }

    /// Run one job, sending heartbeats while it runs.
    async fn process(&self, job: &Job) -> JobStatus {
        let mut work = pin!(self.release(job).instrument(info_span!("job", id = %job.id)));
        let mut ticks = tokio::time::interval(self.config.heartbeat);

        let outcome = loop {
            tokio::select! {
                outcome = &mut work => break outcome,
                _ = ticks.tick() => self.queue.heartbeat(job.id),
            }
        };

        match outcome {
            Ok((result, commit)) => JobStatus::Succeeded { result, commit },
            Err(err) => {
                info!(job = %job.id, "Job failed: {err:#}");
                JobStatus::Failed {
                    error: format!("{err:#}"),
                }
            }
        }
    }

    async fn release(&self, job: &Job) -> anyhow::Result<(ReleaseResult, Option<String>)> {
        let repo = self.repo.clone();
        tokio::task::spawn_blocking(move || repo.pull()).await??;

        let ctx = LiveContext::load(&self.store, &self.manifests, &self.registry, &self.scope)?;
        let Ok(calculated) =
            tokio::time::timeout(self.config.timeout, job.spec.calculate_release(&ctx)).await
        else {
            bail!("timed out");
        };
        let (updates, result) = calculated?;

        if job.spec.release_kind() == ReleaseKind::Plan {
            return Ok((result, None));
        }

        let updates: Vec<_> = updates
            .into_iter()
            .filter(|u| !u.updates.is_empty())
            .collect();
        if updates.is_empty() {
            info!("Nothing to release");
            return Ok((result, None));
        }

        let message = job.spec.commit_message(&result);
        let note = Note {
            job_id: job.id,
            spec: job.spec.clone(),
            result: result.clone(),
        };
        let manifests = self.manifests.clone();
        let repo = self.repo.clone();

        let commit = tokio::task::spawn_blocking(move || {
            let head = repo.head().ok();
            let originals = updates
                .iter()
                .map(|u| manifests.root().join(u.definition.path()))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|file| std::fs::read(&file).map(|content| (file, content)))
                .collect::<Result<Vec<_>, _>>()?;

            let committed = manifests
                .write(&updates)
                .map_err(anyhow::Error::from)
                .and_then(|files| {
                    let files: Vec<_> = files
                        .into_iter()
                        .map(|file| manifests.root().join(file))
                        .collect();
                    git::commit_release(&repo, &files, &message, &note)
                        .map_err(|err| anyhow!("failed to commit release: {err}"))
                });

            if committed.is_err() {
                rollback(&repo, head.as_deref(), &originals);
            }
            committed
        })
        .await??;

        Ok((result, Some(commit)))
    }
}

/// Put the checkout back to where it was before a release started.
fn rollback(repo: &Repo, head: Option<&str>, originals: &[(PathBuf, Vec<u8>)]) {
    if let Some(head) = head {
        if let Err(err) = repo.reset(head) {
            warn!(%head, "Failed to reset checkout: {err}");
        }
    }
    for (file, content) in originals {
        if let Err(err) = std::fs::write(file, content) {
            warn!(file = %file.display(), "Failed to restore manifest: {err}");
        }
    }
    warn!(files = originals.len(), "Rolled back release");
}
