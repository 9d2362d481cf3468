//! Shared fixtures: a scripted in-memory engine and a throwaway workspace.
//!
//! The engine writes real artifact files (so checksums and promotion run for
//! real) and hands out LSNs the way a server would: each backup advances the
//! LSN, differentials report their base full's checkpoint, and log backups
//! continue from where the previous log ended.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use backchain::Backchain;
use backchain_core::{
    ArtifactFile, BackupArtifact, BackupCommand, BackupLsns, BackupType, Config,
    ConsistencyReport, DatabaseEngine, DatabaseName, Error, Lsn, RecoveryModel, RestoreCommand,
    Result, RetryPolicy,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;

#[derive(Default)]
struct EngineState {
    next_lsn: u128,
    last_full_checkpoint: Option<Lsn>,
    log_end: Option<Lsn>,
    recovery_models: HashMap<String, RecoveryModel>,
    backup_failures: VecDeque<Error>,
    restore_failures: HashMap<usize, Error>,
    backups: usize,
    restores: Vec<RestoreCommand>,
    corrupt: HashSet<String>,
    dropped: Vec<String>,
}

/// In-memory engine whose behavior each test scripts.
pub struct ScriptedEngine {
    state: Mutex<EngineState>,
    /// When set, every restore waits for a permit
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self {
            state: Mutex::new(EngineState {
                next_lsn: 100,
                ..EngineState::default()
            }),
            gate: Mutex::new(None),
        }
    }
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_recovery_model(&self, database: &str, model: RecoveryModel) {
        self.state
            .lock()
            .unwrap()
            .recovery_models
            .insert(database.to_string(), model);
    }

    /// The next backup call fails with `error`.
    pub fn fail_next_backup(&self, error: Error) {
        self.state.lock().unwrap().backup_failures.push_back(error);
    }

    /// The restore call with this zero-based index fails with `error`.
    pub fn fail_restore_call(&self, call: usize, error: Error) {
        self.state
            .lock()
            .unwrap()
            .restore_failures
            .insert(call, error);
    }

    pub fn mark_corrupt(&self, database: &str) {
        self.state
            .lock()
            .unwrap()
            .corrupt
            .insert(database.to_string());
    }

    /// Block restores until [`Self::release_restores`] hands out permits.
    pub fn hold_restores(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_restores(&self, permits: usize) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(permits);
        }
    }

    pub fn backup_calls(&self) -> usize {
        self.state.lock().unwrap().backups
    }

    pub fn restores(&self) -> Vec<RestoreCommand> {
        self.state.lock().unwrap().restores.clone()
    }

    pub fn dropped(&self) -> Vec<String> {
        self.state.lock().unwrap().dropped.clone()
    }

    /// Wait until at least `count` restore calls have been issued.
    pub async fn wait_for_restores(&self, count: usize) {
        for _ in 0..500 {
            if self.restores().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("engine never saw {count} restore calls");
    }

    fn next_lsns(&self, backup_type: BackupType) -> BackupLsns {
        let mut state = self.state.lock().unwrap();
        let first = Lsn::new(state.next_lsn);
        let lsns = match backup_type {
            BackupType::Full => {
                let last = Lsn::new(state.next_lsn + 100);
                state.last_full_checkpoint = Some(first);
                if state.log_end.is_none() {
                    state.log_end = Some(first);
                }
                BackupLsns {
                    first,
                    last,
                    checkpoint: first,
                    database_backup: Lsn::new(0),
                }
            }
            BackupType::Differential => BackupLsns {
                first,
                last: Lsn::new(state.next_lsn + 50),
                checkpoint: first,
                database_backup: state.last_full_checkpoint.unwrap_or(Lsn::new(0)),
            },
            BackupType::Log => BackupLsns {
                first: state.log_end.unwrap_or(first),
                last: Lsn::new(state.next_lsn + 25),
                checkpoint: state.last_full_checkpoint.unwrap_or(first),
                database_backup: state.last_full_checkpoint.unwrap_or(Lsn::new(0)),
            },
        };
        state.next_lsn = lsns.last.value();
        if backup_type == BackupType::Log {
            state.log_end = Some(lsns.last);
        }
        lsns
    }
}

#[async_trait]
impl DatabaseEngine for ScriptedEngine {
    async fn recovery_model(&self, database: &DatabaseName) -> Result<RecoveryModel> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .recovery_models
            .get(database.as_str())
            .copied()
            .unwrap_or(RecoveryModel::Full))
    }

    async fn backup(&self, command: &BackupCommand) -> Result<BackupArtifact> {
        let failure = {
            let mut state = self.state.lock().unwrap();
            state.backups += 1;
            state.backup_failures.pop_front()
        };
        if let Some(error) = failure {
            return Err(error);
        }

        let lsns = self.next_lsns(command.backup_type);
        let content = format!(
            "{}:{}:{}-{}",
            command.database, command.backup_type, lsns.first, lsns.last
        );
        if let Some(parent) = command.target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&command.target, content.as_bytes()).await?;
        Ok(BackupArtifact {
            path: command.target.clone(),
            lsns,
            size_bytes: content.len() as u64,
        })
    }

    async fn restore(&self, command: &RestoreCommand) -> Result<()> {
        let call = {
            let mut state = self.state.lock().unwrap();
            state.restores.push(command.clone());
            state.restores.len() - 1
        };
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        match self.state.lock().unwrap().restore_failures.remove(&call) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn verify_artifact(&self, path: &Path) -> Result<bool> {
        Ok(path.exists())
    }

    async fn list_files(&self, _path: &Path) -> Result<Vec<ArtifactFile>> {
        Ok(vec![
            ArtifactFile {
                logical_name: "data".to_string(),
                physical_name: "/var/opt/mssql/data/db.mdf".to_string(),
                file_type: "D".to_string(),
            },
            ArtifactFile {
                logical_name: "log".to_string(),
                physical_name: "/var/opt/mssql/data/db_log.ldf".to_string(),
                file_type: "L".to_string(),
            },
        ])
    }

    async fn check_consistency(&self, database: &DatabaseName) -> Result<ConsistencyReport> {
        let state = self.state.lock().unwrap();
        let source_corrupt = state
            .corrupt
            .iter()
            .any(|name| database.as_str().contains(name.as_str()));
        Ok(if source_corrupt {
            ConsistencyReport::corrupt(vec!["Table error: page (1:153) is damaged".to_string()])
        } else {
            ConsistencyReport::clean()
        })
    }

    async fn drop_database(&self, database: &DatabaseName) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .dropped
            .push(database.to_string());
        Ok(())
    }
}

/// A temp directory holding the catalog, staging area and backup root.
pub struct TestEnv {
    pub dir: TempDir,
    pub engine: Arc<ScriptedEngine>,
    pub app: Backchain,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        adjust(&mut config);
        let engine = ScriptedEngine::new();
        let app = Backchain::with_engine(config, engine.clone()).await.unwrap();
        Self { dir, engine, app }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }
}

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.catalog_db = root.join("catalog.db").display().to_string();
    config.staging_dir = root.join("staging").display().to_string();
    config.backup_root = root.join("backups").display().to_string();
    config.verification.scratch_dir = root.join("scratch").display().to_string();
    config.retry = RetryPolicy::new()
        .with_max_retries(2)
        .with_base_delay_ms(1)
        .with_max_delay_ms(5);
    config
}

pub fn db(name: &str) -> DatabaseName {
    DatabaseName::parse(name).unwrap()
}

/// Let the wall clock move so consecutive records get distinct timestamps.
pub async fn tick() {
    tokio::time::sleep(Duration::from_millis(15)).await;
}
