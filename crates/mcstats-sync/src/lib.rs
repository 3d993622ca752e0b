//! Sync pipeline orchestration: acquire the stats source, reconcile the schema, then write
//! every player inside one transaction.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mcstats_core::{ParsedStats, PlayerFile, TableNames};
use mcstats_parser::{load_usercache, parse_stats_file, Usercache};
use mcstats_storage::{
    acquire_source, default_connector, AcquireError, AcquiredSource, SourceKind,
    TransferConnector,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub mod backend;
pub mod config;
pub mod memory;
pub mod mysql;
pub mod observer;
pub mod schema;

pub use backend::{BackendError, PlayerUpsert, StatsBackend, StatsTransaction};
pub use config::{ConfigError, DatabaseTarget, SyncConfig, DEFAULT_CONFIG_PATH};
pub use memory::MemoryBackend;
pub use mysql::MySqlBackend;
pub use observer::{NoopObserver, SyncEvent, SyncObserver, SyncPhase, TracingObserver};
pub use schema::{table_specs, SchemaChange, SchemaReport, TableSpec};

use observer::AcquireForwarder;

pub const CRATE_NAME: &str = "mcstats-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
    #[error("source acquisition failed")]
    Acquisition(#[from] AcquireError),
    #[error("schema reconciliation failed")]
    Schema(#[source] BackendError),
    #[error("data write failed; transaction rolled back")]
    DataWrite(#[source] BackendError),
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source: SourceKind,
    pub files_discovered: usize,
    pub players_processed: usize,
    pub files_skipped: usize,
    pub schema: SchemaReport,
}

pub struct SyncPipeline {
    config: SyncConfig,
    connector: Arc<dyn TransferConnector>,
    observer: Arc<dyn SyncObserver>,
    clock: Arc<dyn Clock>,
}

struct BatchOutcome {
    processed: usize,
    skipped: usize,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            connector: default_connector(),
            observer: Arc::new(TracingObserver),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn TransferConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn emit(&self, event: SyncEvent) {
        self.observer.on_event(&event);
    }

    fn tables(&self) -> &TableNames {
        &self.config.tables
    }

    /// Reconcile the schema without touching player data.
    pub async fn ensure_schema_only(
        &self,
        backend: &mut dyn StatsBackend,
    ) -> Result<SchemaReport, SyncError> {
        let report = backend
            .ensure_schema(&table_specs(self.tables()))
            .await
            .map_err(SyncError::Schema)?;
        for change in &report.changes {
            self.emit(SyncEvent::SchemaChanged(change.clone()));
        }
        Ok(report)
    }

    /// One complete sync run. The staging directory is gone by the time this returns,
    /// whatever the outcome.
    pub async fn run_once(
        &self,
        backend: &mut dyn StatsBackend,
    ) -> Result<SyncRunSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id);
        let result = self.run_inner(run_id, backend).instrument(span).await;
        if result.is_err() {
            self.emit(SyncEvent::Phase(SyncPhase::Failed));
        }
        result
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        backend: &mut dyn StatsBackend,
    ) -> Result<SyncRunSummary, SyncError> {
        let started_at = self.clock.now();

        self.emit(SyncEvent::Phase(SyncPhase::AcquiringSource));
        let forwarder = Arc::new(AcquireForwarder(Arc::clone(&self.observer)));
        let source = acquire_source(&self.config.source, Arc::clone(&self.connector), forwarder)
            .await?;

        let outcome = self.sync_source(&source, started_at, backend).await;

        match source.release.release() {
            Ok(Some(path)) => self.emit(SyncEvent::StagingReleased { path }),
            Ok(None) => {}
            Err(err) => self.emit(SyncEvent::StagingReleaseFailed {
                error: err.to_string(),
            }),
        }
        self.emit(SyncEvent::Phase(SyncPhase::CleanedUp));

        let (files_discovered, batch, schema) = outcome?;
        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at: self.clock.now(),
            source: source.kind,
            files_discovered,
            players_processed: batch.processed,
            files_skipped: batch.skipped,
            schema,
        })
    }

    async fn sync_source(
        &self,
        source: &AcquiredSource,
        synced_at: DateTime<Utc>,
        backend: &mut dyn StatsBackend,
    ) -> Result<(usize, BatchOutcome, SchemaReport), SyncError> {
        let files = source.player_files()?;
        self.emit(SyncEvent::SourceResolved {
            kind: source.kind.clone(),
            stats_dir: source.stats_dir.clone(),
            files: files.len(),
        });

        let usercache = load_usercache(&source.usercache_path);
        self.emit(SyncEvent::Usercache {
            status: usercache.status().clone(),
            entries: usercache.len(),
        });

        let schema = self.ensure_schema_only(backend).await?;
        self.emit(SyncEvent::Phase(SyncPhase::SchemaReady));

        let batch = self.write_batch(&files, &usercache, synced_at, backend).await?;
        Ok((files.len(), batch, schema))
    }

    async fn write_batch(
        &self,
        files: &[PlayerFile],
        usercache: &Usercache,
        synced_at: DateTime<Utc>,
        backend: &mut dyn StatsBackend,
    ) -> Result<BatchOutcome, SyncError> {
        self.emit(SyncEvent::Phase(SyncPhase::Processing));
        let mut tx = backend.begin().await.map_err(SyncError::DataWrite)?;

        let mut outcome = BatchOutcome {
            processed: 0,
            skipped: 0,
        };
        for file in files {
            let parsed = match parse_stats_file(&file.path) {
                Ok(parsed) => parsed,
                Err(err) => {
                    outcome.skipped += 1;
                    self.emit(SyncEvent::FileSkipped {
                        player_id: file.player_id.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            let name = usercache.name_for(&file.player_id);
            let written = self
                .write_player(tx.as_mut(), &file.player_id, name, &parsed, synced_at)
                .await;
            if let Err(err) = written {
                if let Err(rollback_err) = tx.rollback().await {
                    self.emit(SyncEvent::RollbackFailed {
                        error: rollback_err.to_string(),
                    });
                }
                self.emit(SyncEvent::Phase(SyncPhase::RolledBack));
                return Err(SyncError::DataWrite(err));
            }
            outcome.processed += 1;
            if outcome.processed % self.config.progress_every == 0 {
                self.emit(SyncEvent::Progress {
                    processed: outcome.processed,
                    total: files.len(),
                });
            }
        }

        if let Err(err) = tx.commit().await {
            self.emit(SyncEvent::Phase(SyncPhase::RolledBack));
            return Err(SyncError::DataWrite(err));
        }
        self.emit(SyncEvent::Phase(SyncPhase::Committed));
        self.emit(SyncEvent::Completed {
            processed: outcome.processed,
            skipped: outcome.skipped,
        });
        Ok(outcome)
    }

    async fn write_player(
        &self,
        tx: &mut (dyn StatsTransaction + '_),
        player_id: &str,
        name: Option<&str>,
        parsed: &ParsedStats,
        synced_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        tx.upsert_player(PlayerUpsert {
            player_id,
            name,
            seen_at: synced_at,
        })
        .await?;
        tx.upsert_raw(&self.tables().raw, player_id, &parsed.raw, synced_at)
            .await?;
        // Categories missing from this document keep their previous rows.
        for (section, values) in &parsed.sections {
            tx.replace_section(self.tables().section(*section), player_id, values, synced_at)
                .await?;
        }
        Ok(())
    }
}

/// Load the config at `config_path` and run one sync against the configured database,
/// or against an in-memory store when `dry_run` is set.
pub async fn run_sync_once(config_path: &Path, dry_run: bool) -> Result<SyncRunSummary> {
    let config = SyncConfig::load(config_path)
        .await
        .map_err(SyncError::from)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let pipeline = SyncPipeline::new(config);

    if dry_run {
        let mut backend = MemoryBackend::new();
        return pipeline
            .run_once(&mut backend)
            .await
            .context("dry-run sync failed");
    }

    let mut backend = MySqlBackend::new(pipeline.config().database.connect_options()?);
    let summary = pipeline.run_once(&mut backend).await.context("sync failed");
    settle(summary, backend.close().await)
}

/// Load the config and only reconcile the schema.
pub async fn ensure_schema_once(config_path: &Path) -> Result<SchemaReport> {
    let config = SyncConfig::load(config_path)
        .await
        .map_err(SyncError::from)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let pipeline = SyncPipeline::new(config);
    let mut backend = MySqlBackend::new(pipeline.config().database.connect_options()?);
    let report = pipeline
        .ensure_schema_only(&mut backend)
        .await
        .context("schema reconciliation failed");
    settle(report, backend.close().await)
}

/// A failed close only surfaces when the run itself succeeded; otherwise the run's error wins.
fn settle<T>(outcome: Result<T>, closed: Result<(), BackendError>) -> Result<T> {
    match (outcome, closed) {
        (Ok(value), closed) => {
            closed.context("closing database connection")?;
            Ok(value)
        }
        (Err(err), Err(close_err)) => {
            tracing::warn!(error = %close_err, "closing database connection failed");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
    }
}
