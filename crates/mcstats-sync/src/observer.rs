//! Run-scoped observability sink. The engine never logs directly; it reports here.

use std::path::PathBuf;
use std::sync::Arc;

use mcstats_parser::UsercacheStatus;
use mcstats_storage::{AcquireEvent, AcquireObserver, SourceKind};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::schema::SchemaChange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    AcquiringSource,
    SchemaReady,
    Processing,
    Committed,
    RolledBack,
    CleanedUp,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Phase(SyncPhase),
    Acquire(AcquireEvent),
    SourceResolved {
        kind: SourceKind,
        stats_dir: PathBuf,
        files: usize,
    },
    Usercache {
        status: UsercacheStatus,
        entries: usize,
    },
    SchemaChanged(SchemaChange),
    FileSkipped {
        player_id: String,
        reason: String,
    },
    Progress {
        processed: usize,
        total: usize,
    },
    RollbackFailed {
        error: String,
    },
    Completed {
        processed: usize,
        skipped: usize,
    },
    StagingReleased {
        path: PathBuf,
    },
    StagingReleaseFailed {
        error: String,
    },
}

pub trait SyncObserver: Send + Sync {
    fn on_event(&self, event: &SyncEvent);
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {
    fn on_event(&self, _event: &SyncEvent) {}
}

/// Default sink: one `tracing` record per event.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::Phase(phase) => debug!(?phase, "sync phase"),
            SyncEvent::Acquire(event) => log_acquire(event),
            SyncEvent::SourceResolved {
                kind,
                stats_dir,
                files,
            } => info!(
                ?kind,
                stats_dir = %stats_dir.display(),
                files,
                "stats source ready"
            ),
            SyncEvent::Usercache { status, entries } => match status {
                UsercacheStatus::Loaded => info!(entries, "usercache loaded"),
                UsercacheStatus::Missing => warn!("usercache not found; player names will be empty"),
                UsercacheStatus::Malformed(reason) => {
                    warn!(%reason, "usercache unreadable; player names will be empty")
                }
            },
            SyncEvent::SchemaChanged(change) => match change {
                SchemaChange::CreateTable { table } => info!(%table, "created table"),
                SchemaChange::AddColumn { table, column } => {
                    info!(%table, %column, "added missing column")
                }
            },
            SyncEvent::FileSkipped { player_id, reason } => {
                warn!(%player_id, %reason, "skipping unreadable stats file")
            }
            SyncEvent::Progress { processed, total } => {
                info!(processed, total, "processed players")
            }
            SyncEvent::RollbackFailed { error } => warn!(%error, "rollback failed"),
            SyncEvent::Completed { processed, skipped } => {
                info!(processed, skipped, "sync committed")
            }
            SyncEvent::StagingReleased { path } => {
                debug!(path = %path.display(), "removed staging directory")
            }
            SyncEvent::StagingReleaseFailed { error } => {
                warn!(%error, "could not remove staging directory")
            }
        }
    }
}

fn log_acquire(event: &AcquireEvent) {
    match event {
        AcquireEvent::LocalSource { stats_dir } => {
            info!(stats_dir = %stats_dir.display(), "using local world")
        }
        AcquireEvent::RemoteUnconfigured { reason } => {
            warn!(%reason, "remote fetch enabled but not configured; using local world")
        }
        AcquireEvent::Connecting { host, port } => info!(%host, port, "connecting to remote"),
        AcquireEvent::UsercacheFetched { remote_path } => {
            debug!(%remote_path, "fetched remote usercache")
        }
        AcquireEvent::UsercacheMissing { remote_path } => {
            warn!(%remote_path, "remote usercache not found")
        }
        AcquireEvent::UsercacheFailed { remote_path, error } => {
            warn!(%remote_path, %error, "could not fetch remote usercache")
        }
        AcquireEvent::RemoteListing {
            entries,
            stat_files,
        } => info!(entries, stat_files, "listed remote stats directory"),
        AcquireEvent::RemoteFileVanished { remote_path } => {
            warn!(%remote_path, "remote stats file disappeared before download")
        }
        AcquireEvent::Mirrored { stats_dir, files } => {
            info!(stats_dir = %stats_dir.display(), files, "mirrored remote stats")
        }
        AcquireEvent::SessionCloseFailed { error } => {
            warn!(%error, "closing remote session failed")
        }
        AcquireEvent::StagingRemoved { path } => {
            debug!(path = %path.display(), "removed staging directory")
        }
        AcquireEvent::StagingCleanupFailed { path, error } => {
            warn!(path = %path.display(), %error, "could not remove staging directory")
        }
    }
}

/// Routes acquisition events into the run's [`SyncObserver`].
pub(crate) struct AcquireForwarder(pub(crate) Arc<dyn SyncObserver>);

impl AcquireObserver for AcquireForwarder {
    fn on_acquire(&self, event: &AcquireEvent) {
        self.0.on_event(&SyncEvent::Acquire(event.clone()));
    }
}
