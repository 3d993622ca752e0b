//! Typed sync configuration loaded from YAML and validated before any I/O.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use mcstats_core::{is_valid_table_name, TableNames, MAX_TABLE_NAME_LEN, PLAYERS_TABLE};
use mcstats_storage::{RemoteSettings, SourceSettings};
use serde::Deserialize;
use sqlx::mysql::MySqlConnectOptions;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "mcstats.yaml";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("missing config key: {0}")]
    Missing(&'static str),
    #[error("table name for `{key}` is invalid: {name:?} (use [A-Za-z0-9_], at most {MAX_TABLE_NAME_LEN} characters)")]
    InvalidTableName { key: String, name: String },
    #[error("table name {0:?} is used more than once")]
    DuplicateTable(String),
    #[error("invalid database url: {0}")]
    DatabaseUrl(String),
    #[error("sync.progress_every must be at least 1")]
    ProgressEvery,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    paths: RawPaths,
    #[serde(default)]
    database: RawDatabase,
    #[serde(default)]
    remote: RemoteSettings,
    #[serde(default)]
    sync: RawSync,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPaths {
    #[serde(default)]
    world_path: String,
    #[serde(default)]
    temp_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawDatabase {
    url: Option<String>,
    host: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
    tables: TableNames,
}

impl Default for RawDatabase {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 3306,
            user: None,
            password: None,
            database: None,
            tables: TableNames::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSync {
    progress_every: usize,
}

impl Default for RawSync {
    fn default() -> Self {
        Self { progress_every: 50 }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Url(String),
    Parts {
        host: String,
        port: u16,
        user: Option<String>,
        password: Option<String>,
        database: String,
    },
}

impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseTarget::Url(_) => f.write_str("Url(<redacted>)"),
            DatabaseTarget::Parts {
                host,
                port,
                user,
                database,
                ..
            } => f
                .debug_struct("Parts")
                .field("host", host)
                .field("port", port)
                .field("user", user)
                .field("database", database)
                .finish_non_exhaustive(),
        }
    }
}

impl DatabaseTarget {
    pub fn connect_options(&self) -> Result<MySqlConnectOptions, ConfigError> {
        match self {
            DatabaseTarget::Url(url) => url
                .parse::<MySqlConnectOptions>()
                .map_err(|err| ConfigError::DatabaseUrl(err.to_string())),
            DatabaseTarget::Parts {
                host,
                port,
                user,
                password,
                database,
            } => {
                let mut options = MySqlConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .database(database);
                if let Some(user) = user {
                    options = options.username(user);
                }
                if let Some(password) = password {
                    options = options.password(password);
                }
                Ok(options)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub source: SourceSettings,
    pub database: DatabaseTarget,
    pub tables: TableNames,
    pub progress_every: usize,
}

impl SyncConfig {
    /// Read and validate a config file. `DATABASE_URL` overrides the file's database section.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let env_url = std::env::var(DATABASE_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty());
        Self::from_yaml_str(&text, &path.display().to_string(), env_url)
    }

    pub fn from_yaml_str(
        text: &str,
        origin: &str,
        env_database_url: Option<String>,
    ) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        Self::validate(raw, env_database_url)
    }

    fn validate(raw: RawConfig, env_database_url: Option<String>) -> Result<Self, ConfigError> {
        let world_path = raw.paths.world_path.trim();
        if world_path.is_empty() {
            return Err(ConfigError::Missing("paths.world_path"));
        }
        let temp_root = raw
            .paths
            .temp_dir
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(expand_home);

        validate_tables(&raw.database.tables)?;

        let database = match env_database_url.or(raw.database.url) {
            Some(url) => DatabaseTarget::Url(url),
            None => DatabaseTarget::Parts {
                host: raw.database.host,
                port: raw.database.port,
                user: raw.database.user,
                password: raw.database.password,
                database: raw
                    .database
                    .database
                    .filter(|d| !d.trim().is_empty())
                    .ok_or(ConfigError::Missing("database.database"))?,
            },
        };
        database.connect_options()?;

        if raw.sync.progress_every == 0 {
            return Err(ConfigError::ProgressEvery);
        }

        Ok(Self {
            source: SourceSettings {
                world_path: expand_home(world_path),
                temp_root,
                remote: raw.remote,
            },
            database,
            tables: raw.database.tables,
            progress_every: raw.sync.progress_every,
        })
    }
}

fn validate_tables(tables: &TableNames) -> Result<(), ConfigError> {
    let keys = std::iter::once("raw").chain(
        mcstats_core::Section::ALL
            .into_iter()
            .map(mcstats_core::Section::config_key),
    );
    let mut seen = BTreeSet::from([PLAYERS_TABLE.to_string()]);
    for (key, name) in keys.zip(tables.all()) {
        if !is_valid_table_name(name) {
            return Err(ConfigError::InvalidTableName {
                key: key.to_string(),
                name: name.to_string(),
            });
        }
        if !seen.insert(name.to_ascii_lowercase()) {
            return Err(ConfigError::DuplicateTable(name.to_string()));
        }
    }
    Ok(())
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(path.trim_start_matches('~').trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcstats_core::Section;

    const MINIMAL: &str = r#"
paths:
  world_path: /srv/mc/world
database:
  user: mc
  password: hunter2
  database: stats
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = SyncConfig::from_yaml_str(MINIMAL, "test", None).unwrap();
        assert_eq!(config.source.world_path, PathBuf::from("/srv/mc/world"));
        assert_eq!(config.source.temp_root, None);
        assert!(!config.source.remote.enabled);
        assert_eq!(config.source.remote.port, 22);
        assert_eq!(config.tables, TableNames::default());
        assert_eq!(config.progress_every, 50);
        assert_eq!(
            config.database,
            DatabaseTarget::Parts {
                host: "localhost".into(),
                port: 3306,
                user: Some("mc".into()),
                password: Some("hunter2".into()),
                database: "stats".into(),
            }
        );
    }

    #[test]
    fn full_config_with_remote_and_overrides() {
        let text = r#"
paths:
  world_path: /srv/mc/world
  temp_dir: /var/tmp/mcstats
database:
  host: db.internal
  port: 3307
  database: stats
  tables:
    raw: raw_stats
    killed_by: deaths
remote:
  enabled: true
  host: mc.example.net
  port: 2222
  user: sync
  password: pw
  remote_root_path: /home/mc
  world_name: survival
sync:
  progress_every: 10
"#;
        let config = SyncConfig::from_yaml_str(text, "test", None).unwrap();
        assert_eq!(
            config.source.temp_root,
            Some(PathBuf::from("/var/tmp/mcstats"))
        );
        assert_eq!(config.tables.raw, "raw_stats");
        assert_eq!(config.tables.section(Section::KilledBy), "deaths");
        assert_eq!(config.tables.section(Section::Mined), "player_stats_mined");
        assert!(config.source.remote.enabled);
        assert_eq!(config.source.remote.port, 2222);
        assert_eq!(config.progress_every, 10);
    }

    #[test]
    fn missing_world_path_fails() {
        let err = SyncConfig::from_yaml_str("paths: {}\ndatabase: {database: x}\n", "t", None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("paths.world_path")));
    }

    #[test]
    fn missing_database_name_fails_without_url() {
        let text = "paths:\n  world_path: /w\n";
        let err = SyncConfig::from_yaml_str(text, "t", None).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("database.database")));

        let config = SyncConfig::from_yaml_str(
            text,
            "t",
            Some("mysql://mc:pw@db.internal:3306/stats".into()),
        )
        .unwrap();
        assert!(matches!(config.database, DatabaseTarget::Url(_)));
    }

    #[test]
    fn environment_url_overrides_file() {
        let text = "paths:\n  world_path: /w\ndatabase:\n  url: mysql://a@file/x\n";
        let config =
            SyncConfig::from_yaml_str(text, "t", Some("mysql://b@env/y".into())).unwrap();
        assert_eq!(config.database, DatabaseTarget::Url("mysql://b@env/y".into()));
    }

    #[test]
    fn invalid_url_fails_before_connecting() {
        let text = "paths:\n  world_path: /w\ndatabase:\n  url: 'not a url'\n";
        let err = SyncConfig::from_yaml_str(text, "t", None).unwrap_err();
        assert!(matches!(err, ConfigError::DatabaseUrl(_)));
    }

    #[test]
    fn table_names_are_validated() {
        let bad = format!("{MINIMAL}  tables:\n    mined: \"mined; drop\"\n");
        assert!(matches!(
            SyncConfig::from_yaml_str(&bad, "t", None).unwrap_err(),
            ConfigError::InvalidTableName { .. }
        ));

        let dup = format!("{MINIMAL}  tables:\n    used: player_stats_mined\n");
        assert!(matches!(
            SyncConfig::from_yaml_str(&dup, "t", None).unwrap_err(),
            ConfigError::DuplicateTable(_)
        ));

        let clash = format!("{MINIMAL}  tables:\n    raw: players\n");
        assert!(matches!(
            SyncConfig::from_yaml_str(&clash, "t", None).unwrap_err(),
            ConfigError::DuplicateTable(_)
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = format!("{MINIMAL}sftp:\n  enabled: true\n");
        assert!(matches!(
            SyncConfig::from_yaml_str(&text, "t", None).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }

    #[test]
    fn zero_progress_interval_is_rejected() {
        let text = format!("{MINIMAL}sync:\n  progress_every: 0\n");
        assert!(matches!(
            SyncConfig::from_yaml_str(&text, "t", None).unwrap_err(),
            ConfigError::ProgressEvery
        ));
    }

    #[test]
    fn shipped_example_config_is_valid() {
        let text = include_str!("../../../mcstats.example.yaml");
        let config = SyncConfig::from_yaml_str(text, "mcstats.example.yaml", None).unwrap();
        assert_eq!(
            config.source.local_stats_dir(),
            PathBuf::from("/srv/minecraft/world/stats")
        );
        assert!(!config.source.remote.enabled);
    }

    #[test]
    fn debug_output_hides_credentials() {
        let config = SyncConfig::from_yaml_str(MINIMAL, "test", None).unwrap();
        let rendered = format!("{:?}", config.database);
        assert!(!rendered.contains("hunter2"));
        let url = DatabaseTarget::Url("mysql://mc:hunter2@db/stats".into());
        assert!(!format!("{url:?}").contains("hunter2"));
    }
}
