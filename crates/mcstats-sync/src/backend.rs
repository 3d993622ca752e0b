//! Database collaborator contract shared by the MySQL and in-memory backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mcstats_core::SectionValues;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::schema::{SchemaReport, TableSpec};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("table `{0}` does not exist; reconcile the schema first")]
    SchemaNotReady(String),
    #[error("`{table}` references unknown player {player_id}")]
    ForeignKey { table: String, player_id: String },
    #[error("no DDL known for planned change on `{0}`")]
    UnknownChange(String),
}

/// Values written for one player row. The same instant feeds `first_seen` (on insert only)
/// and `last_seen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerUpsert<'a> {
    pub player_id: &'a str,
    pub name: Option<&'a str>,
    pub seen_at: DateTime<Utc>,
}

#[async_trait]
pub trait StatsBackend: Send {
    /// Create missing tables and add missing columns. Never alters or drops anything.
    async fn ensure_schema(&mut self, specs: &[TableSpec]) -> Result<SchemaReport, BackendError>;

    async fn begin<'a>(&'a mut self) -> Result<Box<dyn StatsTransaction + 'a>, BackendError>;
}

/// One open transaction. Dropping it without [`StatsTransaction::commit`] discards every write.
#[async_trait]
pub trait StatsTransaction: Send {
    /// Insert the player or refresh `last_seen`; a `None` name never clears a stored one.
    async fn upsert_player(&mut self, player: PlayerUpsert<'_>) -> Result<(), BackendError>;

    async fn upsert_raw(
        &mut self,
        table: &str,
        player_id: &str,
        document: &JsonValue,
        updated_at: DateTime<Utc>,
    ) -> Result<(), BackendError>;

    /// Delete every row of `player_id` in `table`, then insert `values`.
    async fn replace_section(
        &mut self,
        table: &str,
        player_id: &str,
        values: &SectionValues,
        updated_at: DateTime<Utc>,
    ) -> Result<(), BackendError>;

    async fn commit(self: Box<Self>) -> Result<(), BackendError>;

    async fn rollback(self: Box<Self>) -> Result<(), BackendError>;
}
