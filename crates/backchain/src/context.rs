//! Wiring: one catalog, one engine, one blob store shared by every component.

use std::{path::Path, sync::Arc};

use backchain_core::{BlobStore, Config, DatabaseEngine, Error, Result};
use chrono::Duration;
use tracing::debug;

use crate::{
    catalog::{Catalog, SqliteCatalog},
    engine::SqlcmdEngine,
    executor::BackupExecutor,
    lease::LeaseManager,
    resolver::ChainResolver,
    restore::RestoreOrchestrator,
    storage::LocalBlobStore,
    verify::VerificationService,
};

/// Every component, built from one [`Config`].
#[derive(Clone)]
pub struct Backchain {
    pub config: Config,
    pub catalog: Arc<dyn Catalog>,
    pub executor: BackupExecutor,
    pub resolver: ChainResolver,
    pub orchestrator: RestoreOrchestrator,
    pub verifier: VerificationService,
}

impl Backchain {
    /// Open the catalog and drive the configured server through `sqlcmd`.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be opened or the lease TTL is out of range.
    pub async fn open(config: Config) -> Result<Self> {
        let engine: Arc<dyn DatabaseEngine> = Arc::new(SqlcmdEngine::new(config.engine.clone()));
        Self::with_engine(config, engine).await
    }

    /// Build every component around an existing engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be opened or the lease TTL is out of range.
    pub async fn with_engine(config: Config, engine: Arc<dyn DatabaseEngine>) -> Result<Self> {
        let sqlite = SqliteCatalog::open(Path::new(&config.catalog_db)).await?;

        let ttl = i64::try_from(config.lease.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                Error::invalid_config(format!(
                    "lease.ttl_secs {} is out of range",
                    config.lease.ttl_secs
                ))
            })?;
        let leases = LeaseManager::with_ttl(sqlite.shared_pool(), ttl);
        leases.init().await?;

        let catalog: Arc<dyn Catalog> = Arc::new(sqlite);
        let store: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new());

        let executor = BackupExecutor::new(
            Arc::clone(&catalog),
            Arc::clone(&engine),
            Arc::clone(&store),
            leases.clone(),
        )
        .with_retry(config.retry)
        .with_staging_dir(&config.staging_dir)
        .with_backup_root(config.backup_root.clone());

        let resolver = ChainResolver::new(Arc::clone(&catalog), config.verification.policy);

        let orchestrator = RestoreOrchestrator::new(
            Arc::clone(&catalog),
            Arc::clone(&engine),
            Arc::clone(&store),
            leases,
        )
        .with_retry(config.retry)
        .with_staging_dir(&config.staging_dir);

        let verifier = VerificationService::new(
            Arc::clone(&catalog),
            engine,
            store,
            resolver.clone(),
            orchestrator.clone(),
        )
        .with_scratch(
            &config.verification.scratch_dir,
            config.verification.scratch_prefix.clone(),
        );

        debug!(catalog = %config.catalog_db, server = %config.engine.server, "Components ready");
        Ok(Self {
            config,
            catalog,
            executor,
            resolver,
            orchestrator,
            verifier,
        })
    }
}
