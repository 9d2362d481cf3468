//! Restore orchestration.
//!
//! A restore job applies its chain one step at a time in a background task:
//! every step but the last runs `WITH NORECOVERY`, the last one recovers (and
//! carries `STOPAT` for point-in-time targets). A step starts only after the
//! previous engine call returned successfully.
//!
//! Jobs are persisted on every transition, so `status` and `cancel` work
//! from any process sharing the catalog. Cancellation is checked between
//! steps; an engine command in flight always runs to completion.
//!
//! A failure after the first engine command leaves the target database
//! restoring. That surfaces as [`Error::PartialRestore`]; the target is never
//! dropped here.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use backchain_core::{
    retry::with_retry, BackupRecord, BlobStore, Component, DatabaseEngine, DatabaseName, Error,
    FileMove, JobId, RestoreChain, RestoreCommand, RestoreJob, Result, RetryPolicy,
};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::{
    catalog::Catalog,
    lease::{LeaseGuard, LeaseManager},
};

/// Where and how to restore a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    pub target_database: DatabaseName,
    /// `MOVE` clauses for the first (FULL) step
    pub relocations: Vec<FileMove>,
    /// Overwrite an existing target database
    pub replace: bool,
}

impl RestoreRequest {
    #[must_use]
    pub fn new(target_database: DatabaseName) -> Self {
        Self {
            target_database,
            relocations: Vec::new(),
            replace: false,
        }
    }

    #[must_use]
    pub fn with_relocations(mut self, relocations: Vec<FileMove>) -> Self {
        self.relocations = relocations;
        self
    }

    #[must_use]
    pub const fn with_replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }
}

/// A running restore job.
pub struct RestoreHandle {
    job_id: JobId,
    task: JoinHandle<Result<RestoreJob>>,
}

impl RestoreHandle {
    #[must_use]
    pub const fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Wait for the job to finish.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the job, or `Error::Invariant` if the
    /// background task panicked.
    pub async fn wait(self) -> Result<RestoreJob> {
        self.task.await.map_err(|e| {
            Error::invariant(format!("restore job {} task failed: {e}", self.job_id))
        })?
    }
}

/// Artifact ready for the engine to read.
struct StepSource {
    path: PathBuf,
    /// Fetched copy to remove after the step
    fetched: bool,
}

/// Runs restore jobs against the engine.
#[derive(Clone)]
pub struct RestoreOrchestrator {
    catalog: Arc<dyn Catalog>,
    engine: Arc<dyn DatabaseEngine>,
    store: Arc<dyn BlobStore>,
    leases: LeaseManager,
    retry: RetryPolicy,
    staging_dir: PathBuf,
}

impl RestoreOrchestrator {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        engine: Arc<dyn DatabaseEngine>,
        store: Arc<dyn BlobStore>,
        leases: LeaseManager,
    ) -> Self {
        Self {
            catalog,
            engine,
            store,
            leases,
            retry: RetryPolicy::default(),
            staging_dir: PathBuf::from(".backchain/staging"),
        }
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = staging_dir.into();
        self
    }

    /// Create a job for `chain` and start running it in the background.
    ///
    /// The target database lease is taken before this returns; a busy target
    /// leaves the job `ROLLED_BACK` without touching the engine.
    ///
    /// # Errors
    ///
    /// - `Error::Invariant` if the chain fails structural validation
    /// - `ExecutionError::LeaseHeld` (after retries) if the target is busy
    /// - catalog errors while creating the job
    #[instrument(skip(self, chain, request), fields(target = %request.target_database))]
    pub async fn start(&self, chain: RestoreChain, request: RestoreRequest) -> Result<RestoreHandle> {
        chain
            .validate()
            .map_err(|e| e.tagged(Component::Orchestrator, None))?;

        let mut job = RestoreJob::new(request.target_database.clone(), chain);
        self.catalog
            .save_job(&job)
            .await
            .map_err(|e| e.tagged(Component::Catalog, None))?;

        let holder = format!("restore:{}", job.id);
        let guard = match with_retry("acquire lease", &self.retry, || {
            self.leases
                .acquire_guarded(&request.target_database, &holder)
        })
        .await
        {
            Ok(guard) => guard,
            Err(e) => {
                if job.roll_back(e.to_string()).is_ok() {
                    self.persist(&job).await;
                }
                return Err(e.tagged(Component::Lease, None));
            }
        };

        info!(job = %job.id, steps = job.total_steps(), "Restore job started");
        let job_id = job.id.clone();
        let orchestrator = self.clone();
        let task = tokio::spawn(async move { orchestrator.run(job, request, guard).await });
        Ok(RestoreHandle { job_id, task })
    }

    /// Current state of a job.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` for an unknown job.
    pub async fn status(&self, job_id: &JobId) -> Result<RestoreJob> {
        self.catalog
            .load_job(job_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Restore job {job_id} not found")))
    }

    /// Ask a job to stop before its next step.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` for an unknown job and an input error
    /// if the job already ended.
    pub async fn cancel(&self, job_id: &JobId) -> Result<RestoreJob> {
        let job = self.status(job_id).await?;
        if job.state.is_terminal() {
            return Err(Error::invalid_argument(format!(
                "Restore job {job_id} already ended ({})",
                job.state
            )));
        }
        self.catalog.request_cancel(job_id).await?;
        info!(job = %job_id, "Cancellation requested");
        Ok(RestoreJob {
            cancel_requested: true,
            ..job
        })
    }

    #[instrument(skip_all, fields(job = %job.id, target = %job.target_database))]
    async fn run(
        self,
        mut job: RestoreJob,
        request: RestoreRequest,
        guard: LeaseGuard,
    ) -> Result<RestoreJob> {
        let outcome = self.run_steps(&mut job, &request).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "Failed to release lease");
        }
        outcome.map(|()| job)
    }

    async fn run_steps(&self, job: &mut RestoreJob, request: &RestoreRequest) -> Result<()> {
        let total = job.total_steps();
        let steps = job.chain.steps().to_vec();

        for (index, step) in steps.iter().enumerate() {
            if self.cancel_flagged(&job.id).await {
                return self.stop_cancelled(job, index, step).await;
            }

            let source = match self.fetch(job, index, step).await {
                Ok(source) => source,
                Err(e) => {
                    return self
                        .stop_failed(job, index, step, e.tagged(Component::Storage, Some(index)))
                        .await
                }
            };

            job.begin_step(index)?;
            self.persist(job).await;

            let mode = job.chain.mode_for_step(index);
            info!(
                step = index + 1,
                total,
                backup = %step.describe(),
                ?mode,
                "Applying restore step"
            );
            let mut command = RestoreCommand::new(
                job.target_database.clone(),
                step.backup_type,
                &source.path,
                mode,
            );
            if index == 0 {
                command = command
                    .with_relocations(request.relocations.clone())
                    .with_replace(request.replace);
            }

            let applied = self.engine.restore(&command).await;
            if source.fetched {
                remove_fetched(&source.path).await;
            }
            if let Err(e) = applied {
                return self
                    .stop_failed(job, index, step, e.tagged(Component::Engine, Some(index)))
                    .await;
            }
        }

        job.complete()?;
        self.persist(job).await;
        info!(steps = total, "Restore completed");
        Ok(())
    }

    async fn cancel_flagged(&self, job_id: &JobId) -> bool {
        match self.catalog.cancel_requested(job_id).await {
            Ok(flagged) => flagged,
            Err(e) => {
                warn!(job = %job_id, error = %e, "Could not read cancellation flag");
                false
            }
        }
    }

    /// Local path of a step's artifact, fetching it into staging when the store is remote.
    async fn fetch(&self, job: &RestoreJob, index: usize, step: &BackupRecord) -> Result<StepSource> {
        let exists = with_retry("locate artifact", &self.retry, || {
            self.store.exists(&step.location)
        })
        .await?;
        if !exists {
            return Err(Error::storage(
                false,
                format!("Artifact {} for {} is missing", step.location, step.describe()),
            ));
        }

        if let Some(path) = self.store.local_path(&step.location) {
            return Ok(StepSource {
                path,
                fetched: false,
            });
        }

        let bytes = with_retry("fetch artifact", &self.retry, || {
            self.store.get(&step.location)
        })
        .await?;
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let path = self.staging_dir.join(format!(
            "restore-{}-{index}.{}",
            job.id,
            step.backup_type.extension()
        ));
        tokio::fs::write(&path, bytes).await?;
        Ok(StepSource {
            path,
            fetched: true,
        })
    }

    async fn stop_cancelled(
        &self,
        job: &mut RestoreJob,
        index: usize,
        step: &BackupRecord,
    ) -> Result<()> {
        if !job.has_started() {
            job.roll_back("Cancelled before any step ran")?;
            self.persist(job).await;
            info!("Restore cancelled before the first step");
            return Err(Error::cancelled(format!(
                "restore job {} cancelled before any step ran",
                job.id
            ))
            .tagged(Component::Orchestrator, None));
        }
        let cause = Error::cancelled(format!("restore job {} cancelled", job.id))
            .tagged(Component::Orchestrator, Some(index));
        self.stop_failed(job, index, step, cause).await
    }

    /// Fail the job at `index`; after the first engine command this is a partial restore.
    async fn stop_failed(
        &self,
        job: &mut RestoreJob,
        index: usize,
        step: &BackupRecord,
        cause: Error,
    ) -> Result<()> {
        let started = job.has_started();
        job.fail(cause.to_string())?;
        if started {
            job.failed_step = Some(index);
        }
        self.persist(job).await;

        if !started {
            warn!(error = %cause, "Restore failed before the first step");
            return Err(cause);
        }
        warn!(
            step = index + 1,
            total = job.total_steps(),
            error = %cause,
            "Restore stopped mid-chain; target left restoring"
        );
        Err(Error::PartialRestore {
            database: job.target_database.to_string(),
            failed_step: index,
            total_steps: job.total_steps(),
            artifact: step.location.clone(),
            cause: Box::new(cause),
        })
    }

    async fn persist(&self, job: &RestoreJob) {
        if let Err(e) = self.catalog.save_job(job).await {
            warn!(job = %job.id, state = %job.state, error = %e, "Failed to persist restore job");
        }
    }
}

async fn remove_fetched(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Could not remove fetched artifact");
    }
}
