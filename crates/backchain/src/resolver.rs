//! Catalog-backed chain resolution.

use std::sync::Arc;

use backchain_core::{
    error::ResolutionError, resolver, BackupRecord, Component, DatabaseName, Error, RestoreChain,
    RestoreTarget, Result, VerificationPolicy,
};
use tracing::{info, instrument};

use crate::catalog::{Catalog, RecordOrder, RecordQuery};

/// Resolves restore chains from the records cataloged for a database.
#[derive(Clone)]
pub struct ChainResolver {
    catalog: Arc<dyn Catalog>,
    policy: VerificationPolicy,
}

impl ChainResolver {
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>, policy: VerificationPolicy) -> Self {
        Self { catalog, policy }
    }

    #[must_use]
    pub const fn policy(&self) -> VerificationPolicy {
        self.policy
    }

    /// Shortest valid chain restoring `database` to `target`.
    ///
    /// A target past the last log backup resolves to the latest reachable
    /// point; [`RestoreChain::coverage`] reports the shortfall.
    ///
    /// # Errors
    ///
    /// - `ResolutionError::NoRestorePath` if no eligible FULL precedes the target
    /// - `ResolutionError::BrokenChain` if a log is missing before the target
    #[instrument(skip(self), fields(database = %database))]
    pub async fn resolve(
        &self,
        database: &DatabaseName,
        target: RestoreTarget,
    ) -> Result<RestoreChain> {
        if let RestoreTarget::PointInTime(at) = target {
            let base = self
                .catalog
                .latest_full_before(database, at, self.policy)
                .await?;
            if base.is_none() {
                return Err(Error::from(ResolutionError::NoRestorePath {
                    database: database.to_string(),
                    point_in_time: Some(at),
                })
                .tagged(Component::Resolver, None));
            }
        }

        let records = self.eligible_records(database).await?;
        let chain = resolver::resolve(database, &records, target, self.policy)
            .map_err(|e| e.tagged(Component::Resolver, None))?;

        info!(steps = chain.len(), coverage = ?chain.coverage(), "Resolved restore chain");
        Ok(chain)
    }

    /// Shortest chain ending with `record`, for restoring a specific backup.
    ///
    /// # Errors
    ///
    /// Returns an input error if `record` has not completed and a resolution
    /// error if the records it depends on are missing or ineligible.
    pub async fn resolve_through(&self, record: &BackupRecord) -> Result<RestoreChain> {
        let records = self.eligible_records(&record.database_name).await?;
        resolver::resolve_through(record, &records, self.policy)
            .map_err(|e| e.tagged(Component::Resolver, None))
    }

    async fn eligible_records(&self, database: &DatabaseName) -> Result<Vec<BackupRecord>> {
        self.catalog
            .query(
                &RecordQuery::for_database(database)
                    .eligible_under(self.policy)
                    .ordered(RecordOrder::LsnAscending),
            )
            .await
            .map_err(|e| e.tagged(Component::Catalog, None))
    }
}
