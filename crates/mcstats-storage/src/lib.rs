//! Source acquisition for mcstats: local world lookup, remote mirroring into a scoped
//! staging directory, and atomic file writes.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mcstats_core::PlayerFile;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info_span};
use uuid::Uuid;

#[cfg(feature = "sftp")]
mod sftp;

#[cfg(feature = "sftp")]
pub use sftp::SftpConnector;

pub const CRATE_NAME: &str = "mcstats-storage";

pub const STAGING_PREFIX: &str = "mcstats_sftp_";
pub const USERCACHE_FILE: &str = "usercache.json";
pub const STAT_FILE_SUFFIX: &str = ".json";

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub remote_root_path: String,
    pub world_name: String,
    pub remote_world_path: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 22,
            user: String::new(),
            password: String::new(),
            remote_root_path: String::new(),
            world_name: String::new(),
            remote_world_path: String::new(),
        }
    }
}

impl fmt::Debug for RemoteSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSettings")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("remote_root_path", &self.remote_root_path)
            .field("world_name", &self.world_name)
            .field("remote_world_path", &self.remote_world_path)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Remote locations derived from [`RemoteSettings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePlan {
    pub endpoint: RemoteEndpoint,
    pub world_dir: String,
    pub stats_dir: String,
    pub usercache_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteResolution {
    Disabled,
    Unconfigured(&'static str),
    Remote(RemotePlan),
}

impl RemoteSettings {
    /// An explicit `remote_world_path` wins; otherwise the world is `remote_root_path/world_name`.
    pub fn resolve(&self) -> RemoteResolution {
        if !self.enabled {
            return RemoteResolution::Disabled;
        }
        let host = self.host.trim();
        if host.is_empty() {
            return RemoteResolution::Unconfigured("remote.host is empty");
        }

        let root = self.remote_root_path.trim();
        let explicit = self.remote_world_path.trim();
        let world_name = self.world_name.trim().trim_matches('/');
        let world_dir = if !explicit.is_empty() {
            explicit.trim_end_matches('/').to_string()
        } else if !root.is_empty() && !world_name.is_empty() {
            join_remote(root, world_name)
        } else {
            return RemoteResolution::Unconfigured(
                "set remote.remote_world_path or both remote.remote_root_path and remote.world_name",
            );
        };

        let usercache_path = if root.is_empty() {
            join_remote(parent_remote(&world_dir), USERCACHE_FILE)
        } else {
            join_remote(root, USERCACHE_FILE)
        };

        RemoteResolution::Remote(RemotePlan {
            endpoint: RemoteEndpoint {
                host: host.to_string(),
                port: self.port,
                user: self.user.clone(),
                password: self.password.clone(),
            },
            stats_dir: join_remote(&world_dir, "stats"),
            world_dir,
            usercache_path,
        })
    }
}

/// Join remote path segments with exactly one `/`, keeping relative paths relative.
pub fn join_remote(base: &str, child: &str) -> String {
    let child = child.trim_start_matches('/');
    if base.is_empty() {
        return child.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), child)
}

fn parent_remote(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

/// Where the world lives locally and whether to stage it from a remote host instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub world_path: PathBuf,
    pub temp_root: Option<PathBuf>,
    pub remote: RemoteSettings,
}

impl SourceSettings {
    pub fn local_stats_dir(&self) -> PathBuf {
        self.world_path.join("stats")
    }

    /// The usercache sits next to the world directory, not inside it.
    pub fn local_usercache_path(&self) -> PathBuf {
        self.world_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(USERCACHE_FILE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_file: bool,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("connecting to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: BoxError,
    },
    #[error("authenticating as {user}: {source}")]
    Auth {
        user: String,
        #[source]
        source: BoxError,
    },
    #[error("listing {path}: {source}")]
    List {
        path: String,
        #[source]
        source: BoxError,
    },
    #[error("{path} not found on remote")]
    NotFound { path: String },
    #[error("fetching {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: BoxError,
    },
    #[error("remote transfer unavailable: {0}")]
    Unavailable(String),
}

impl TransferError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransferError::NotFound { .. })
    }
}

/// Opens sessions against a remote host. Implementations block; callers run them off the
/// async executor.
pub trait TransferConnector: Send + Sync {
    fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn TransferSession>, TransferError>;
}

pub trait TransferSession: Send {
    fn list(&mut self, remote_dir: &str) -> Result<Vec<RemoteEntry>, TransferError>;

    /// Copy one remote file to `local_path`. A missing remote file is [`TransferError::NotFound`].
    fn fetch(&mut self, remote_path: &str, local_path: &Path) -> Result<(), TransferError>;

    fn close(self: Box<Self>) -> Result<(), TransferError>;
}

/// Stand-in used when the crate is built without a transfer backend.
#[derive(Debug, Default)]
pub struct UnavailableConnector;

impl TransferConnector for UnavailableConnector {
    fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn TransferSession>, TransferError> {
        Err(TransferError::Unavailable(format!(
            "cannot reach {}:{}; mcstats was built without the `sftp` feature",
            endpoint.host, endpoint.port
        )))
    }
}

pub fn default_connector() -> Arc<dyn TransferConnector> {
    #[cfg(feature = "sftp")]
    {
        Arc::new(SftpConnector::default())
    }
    #[cfg(not(feature = "sftp"))]
    {
        Arc::new(UnavailableConnector)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireEvent {
    LocalSource { stats_dir: PathBuf },
    RemoteUnconfigured { reason: &'static str },
    Connecting { host: String, port: u16 },
    UsercacheFetched { remote_path: String },
    UsercacheMissing { remote_path: String },
    UsercacheFailed { remote_path: String, error: String },
    RemoteListing { entries: usize, stat_files: usize },
    RemoteFileVanished { remote_path: String },
    Mirrored { stats_dir: PathBuf, files: usize },
    SessionCloseFailed { error: String },
    StagingRemoved { path: PathBuf },
    StagingCleanupFailed { path: PathBuf, error: String },
}

pub trait AcquireObserver: Send + Sync {
    fn on_acquire(&self, event: &AcquireEvent);
}

#[derive(Debug, Default)]
pub struct NoopAcquireObserver;

impl AcquireObserver for NoopAcquireObserver {
    fn on_acquire(&self, _event: &AcquireEvent) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    Local,
    Remote { host: String },
}

/// Owns the staging directory of a remote fetch. [`SourceRelease::release`] consumes it;
/// dropping it unreleased still removes the directory.
#[derive(Debug)]
pub struct SourceRelease {
    staging: Option<TempDir>,
}

impl SourceRelease {
    pub fn noop() -> Self {
        Self { staging: None }
    }

    pub fn staging_path(&self) -> Option<&Path> {
        self.staging.as_ref().map(TempDir::path)
    }

    /// Delete the staging tree. Returns the removed path, if there was one.
    pub fn release(self) -> io::Result<Option<PathBuf>> {
        match self.staging {
            Some(dir) => {
                let path = dir.path().to_path_buf();
                dir.close()?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }
}

#[derive(Debug)]
pub struct AcquiredSource {
    pub kind: SourceKind,
    pub stats_dir: PathBuf,
    pub usercache_path: PathBuf,
    pub release: SourceRelease,
}

impl AcquiredSource {
    /// Per-player stats files in the resolved directory.
    pub fn player_files(&self) -> Result<Vec<PlayerFile>, AcquireError> {
        list_stat_files(&self.stats_dir).map_err(|source| AcquireError::Listing {
            path: self.stats_dir.clone(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("stats directory not found: {}", .0.display())]
    StatsDirMissing(PathBuf),
    #[error("preparing staging directory {}: {source}", .path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("listing stats directory {}: {source}", .path.display())]
    Listing {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("remote acquisition task failed: {0}")]
    Task(String),
}

/// Resolve the stats directory for this run, mirroring it from the remote host when enabled.
pub async fn acquire_source(
    settings: &SourceSettings,
    connector: Arc<dyn TransferConnector>,
    observer: Arc<dyn AcquireObserver>,
) -> Result<AcquiredSource, AcquireError> {
    let plan = match settings.remote.resolve() {
        RemoteResolution::Remote(plan) => plan,
        RemoteResolution::Disabled => return acquire_local(settings, observer.as_ref()).await,
        RemoteResolution::Unconfigured(reason) => {
            observer.on_acquire(&AcquireEvent::RemoteUnconfigured { reason });
            return acquire_local(settings, observer.as_ref()).await;
        }
    };

    let temp_root = settings.temp_root.clone();
    tokio::task::spawn_blocking(move || {
        stage_remote(&plan, temp_root.as_deref(), connector.as_ref(), observer.as_ref())
    })
    .await
    .map_err(|err| AcquireError::Task(err.to_string()))?
}

async fn acquire_local(
    settings: &SourceSettings,
    observer: &dyn AcquireObserver,
) -> Result<AcquiredSource, AcquireError> {
    let stats_dir = settings.local_stats_dir();
    match tokio::fs::metadata(&stats_dir).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return Err(AcquireError::StatsDirMissing(stats_dir)),
    }
    observer.on_acquire(&AcquireEvent::LocalSource {
        stats_dir: stats_dir.clone(),
    });
    Ok(AcquiredSource {
        kind: SourceKind::Local,
        stats_dir,
        usercache_path: settings.local_usercache_path(),
        release: SourceRelease::noop(),
    })
}

fn stage_remote(
    plan: &RemotePlan,
    temp_root: Option<&Path>,
    connector: &dyn TransferConnector,
    observer: &dyn AcquireObserver,
) -> Result<AcquiredSource, AcquireError> {
    let span = info_span!("stage_remote", host = %plan.endpoint.host, port = plan.endpoint.port);
    let _guard = span.enter();

    let staging = create_staging(temp_root)?;
    match mirror_remote(plan, staging.path(), connector, observer) {
        Ok(stats_dir) => Ok(AcquiredSource {
            kind: SourceKind::Remote {
                host: plan.endpoint.host.clone(),
            },
            stats_dir,
            usercache_path: staging.path().join(USERCACHE_FILE),
            release: SourceRelease {
                staging: Some(staging),
            },
        }),
        Err(err) => {
            discard_staging(staging, observer);
            Err(err)
        }
    }
}

fn create_staging(temp_root: Option<&Path>) -> Result<TempDir, AcquireError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(STAGING_PREFIX);
    match temp_root {
        Some(root) => {
            fs::create_dir_all(root).map_err(|source| AcquireError::Staging {
                path: root.to_path_buf(),
                source,
            })?;
            builder.tempdir_in(root).map_err(|source| AcquireError::Staging {
                path: root.to_path_buf(),
                source,
            })
        }
        None => builder.tempdir().map_err(|source| AcquireError::Staging {
            path: std::env::temp_dir(),
            source,
        }),
    }
}

fn discard_staging(staging: TempDir, observer: &dyn AcquireObserver) {
    let path = staging.path().to_path_buf();
    match staging.close() {
        Ok(()) => observer.on_acquire(&AcquireEvent::StagingRemoved { path }),
        Err(err) => observer.on_acquire(&AcquireEvent::StagingCleanupFailed {
            path,
            error: err.to_string(),
        }),
    }
}

fn mirror_remote(
    plan: &RemotePlan,
    staging: &Path,
    connector: &dyn TransferConnector,
    observer: &dyn AcquireObserver,
) -> Result<PathBuf, AcquireError> {
    let stats_dir = staging.join("world").join("stats");
    fs::create_dir_all(&stats_dir).map_err(|source| AcquireError::Staging {
        path: stats_dir.clone(),
        source,
    })?;

    observer.on_acquire(&AcquireEvent::Connecting {
        host: plan.endpoint.host.clone(),
        port: plan.endpoint.port,
    });
    let mut session = connector.connect(&plan.endpoint)?;
    let outcome = mirror_with_session(session.as_mut(), plan, staging, &stats_dir, observer);
    if let Err(err) = session.close() {
        observer.on_acquire(&AcquireEvent::SessionCloseFailed {
            error: err.to_string(),
        });
    }
    let files = outcome?;

    observer.on_acquire(&AcquireEvent::Mirrored {
        stats_dir: stats_dir.clone(),
        files,
    });
    Ok(stats_dir)
}

fn mirror_with_session(
    session: &mut dyn TransferSession,
    plan: &RemotePlan,
    staging: &Path,
    stats_dir: &Path,
    observer: &dyn AcquireObserver,
) -> Result<usize, AcquireError> {
    let remote_path = plan.usercache_path.clone();
    match session.fetch(&remote_path, &staging.join(USERCACHE_FILE)) {
        Ok(()) => observer.on_acquire(&AcquireEvent::UsercacheFetched { remote_path }),
        Err(err) if err.is_not_found() => {
            observer.on_acquire(&AcquireEvent::UsercacheMissing { remote_path })
        }
        Err(err) => observer.on_acquire(&AcquireEvent::UsercacheFailed {
            remote_path,
            error: err.to_string(),
        }),
    }

    let entries = session.list(&plan.stats_dir)?;
    let mut names: Vec<&str> = entries
        .iter()
        .filter(|entry| entry.is_file && is_stat_file_name(&entry.name))
        .map(|entry| entry.name.as_str())
        .collect();
    names.sort_unstable();
    observer.on_acquire(&AcquireEvent::RemoteListing {
        entries: entries.len(),
        stat_files: names.len(),
    });

    let mut fetched = 0usize;
    for name in names {
        let remote_path = join_remote(&plan.stats_dir, name);
        match session.fetch(&remote_path, &stats_dir.join(name)) {
            Ok(()) => {
                debug!(%remote_path, "mirrored stats file");
                fetched += 1;
            }
            Err(err) if err.is_not_found() => {
                observer.on_acquire(&AcquireEvent::RemoteFileVanished { remote_path });
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(fetched)
}

/// `*.json`, excluding dot-files. Applied identically to local and remote listings.
pub fn is_stat_file_name(name: &str) -> bool {
    !name.starts_with('.') && name.len() > STAT_FILE_SUFFIX.len() && name.ends_with(STAT_FILE_SUFFIX)
}

/// Regular files in `dir` named `<identifier>.json`, sorted by name. Not recursive.
pub fn list_stat_files(dir: &Path) -> io::Result<Vec<PlayerFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !is_stat_file_name(&name) {
            continue;
        }
        // Follows symlinks, like a shell glob would.
        if !fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false) {
            continue;
        }
        let player_id = name[..name.len() - STAT_FILE_SUFFIX.len()].to_string();
        files.push(PlayerFile { player_id, path });
    }
    files.sort_by(|a, b| a.player_id.cmp(&b.player_id));
    Ok(files)
}

/// Write `bytes` to `path` via a temp file in the same directory and an atomic rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let written = (|| {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()
    })();

    match written.and_then(|()| fs::rename(&temp_path, path)) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&temp_path);
            Err(err)
        }
    }
}
