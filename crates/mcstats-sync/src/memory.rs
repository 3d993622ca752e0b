//! In-process backend with the same semantics as MySQL. Backs `--dry-run` and the tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mcstats_core::{SectionValues, PLAYERS_TABLE};
use serde_json::Value as JsonValue;

use crate::backend::{BackendError, PlayerUpsert, StatsBackend, StatsTransaction};
use crate::schema::{plan_schema, Catalog, SchemaChange, SchemaReport, TableSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRow {
    pub name: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub stats_json: JsonValue,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRow {
    pub stat_value: i64,
    pub updated_at: DateTime<Utc>,
}

/// Stat key -> row, for one player in one section table.
pub type SectionRows = BTreeMap<String, SectionRow>;

/// Full table contents. Two equal snapshots mean identical table data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryState {
    pub catalog: Catalog,
    pub players: BTreeMap<String, PlayerRow>,
    pub raw: BTreeMap<String, BTreeMap<String, RawRow>>,
    pub sections: BTreeMap<String, BTreeMap<String, SectionRows>>,
}

impl MemoryState {
    fn require_table(&self, table: &str) -> Result<(), BackendError> {
        if self.catalog.contains_key(table) {
            Ok(())
        } else {
            Err(BackendError::SchemaNotReady(table.to_string()))
        }
    }

    fn require_player(&self, table: &str, player_id: &str) -> Result<(), BackendError> {
        if self.players.contains_key(player_id) {
            Ok(())
        } else {
            Err(BackendError::ForeignKey {
                table: table.to_string(),
                player_id: player_id.to_string(),
            })
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: MemoryState,
    writes: usize,
    transactions: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing catalogue, e.g. a legacy schema missing some columns.
    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            state: MemoryState {
                catalog,
                ..MemoryState::default()
            },
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> MemoryState {
        self.state.clone()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.state.catalog
    }

    pub fn player(&self, player_id: &str) -> Option<&PlayerRow> {
        self.state.players.get(player_id)
    }

    pub fn player_count(&self) -> usize {
        self.state.players.len()
    }

    pub fn raw(&self, table: &str, player_id: &str) -> Option<&RawRow> {
        self.state.raw.get(table)?.get(player_id)
    }

    pub fn section_rows(&self, table: &str, player_id: &str) -> Option<&SectionRows> {
        self.state.sections.get(table)?.get(player_id)
    }

    /// Schema changes plus data statements issued, committed or not.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions
    }

    /// Remove a player and, by cascade, every dependent row.
    pub fn delete_player(&mut self, player_id: &str) -> bool {
        let removed = self.state.players.remove(player_id).is_some();
        for rows in self.state.raw.values_mut() {
            rows.remove(player_id);
        }
        for rows in self.state.sections.values_mut() {
            rows.remove(player_id);
        }
        removed
    }
}

#[async_trait]
impl StatsBackend for MemoryBackend {
    async fn ensure_schema(&mut self, specs: &[TableSpec]) -> Result<SchemaReport, BackendError> {
        let changes = plan_schema(specs, &self.state.catalog);
        for change in &changes {
            let table = match change {
                SchemaChange::CreateTable { table } | SchemaChange::AddColumn { table, .. } => table,
            };
            let spec = specs
                .iter()
                .find(|s| &s.name == table)
                .ok_or_else(|| BackendError::UnknownChange(table.clone()))?;
            let columns = self.state.catalog.entry(table.clone()).or_default();
            match change {
                SchemaChange::CreateTable { .. } => {
                    columns.extend(spec.column_names().map(str::to_string));
                }
                SchemaChange::AddColumn { column, .. } => {
                    columns.insert(column.clone());
                }
            }
            self.writes += 1;
        }
        Ok(SchemaReport { changes })
    }

    async fn begin<'a>(&'a mut self) -> Result<Box<dyn StatsTransaction + 'a>, BackendError> {
        self.transactions += 1;
        let staged = self.state.clone();
        Ok(Box::new(MemoryTransaction {
            backend: self,
            staged,
        }))
    }
}

/// Writes go to a private copy that replaces the backend state on commit.
struct MemoryTransaction<'a> {
    backend: &'a mut MemoryBackend,
    staged: MemoryState,
}

#[async_trait]
impl<'a> StatsTransaction for MemoryTransaction<'a> {
    async fn upsert_player(&mut self, player: PlayerUpsert<'_>) -> Result<(), BackendError> {
        self.backend.writes += 1;
        self.staged.require_table(PLAYERS_TABLE)?;
        self.staged
            .players
            .entry(player.player_id.to_string())
            .and_modify(|row| {
                if let Some(name) = player.name {
                    row.name = Some(name.to_string());
                }
                row.last_seen = player.seen_at;
            })
            .or_insert_with(|| PlayerRow {
                name: player.name.map(str::to_string),
                first_seen: player.seen_at,
                last_seen: player.seen_at,
            });
        Ok(())
    }

    async fn upsert_raw(
        &mut self,
        table: &str,
        player_id: &str,
        document: &JsonValue,
        updated_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        self.backend.writes += 1;
        self.staged.require_table(table)?;
        self.staged.require_player(table, player_id)?;
        self.staged.raw.entry(table.to_string()).or_default().insert(
            player_id.to_string(),
            RawRow {
                stats_json: document.clone(),
                updated_at,
            },
        );
        Ok(())
    }

    async fn replace_section(
        &mut self,
        table: &str,
        player_id: &str,
        values: &SectionValues,
        updated_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        self.backend.writes += 1;
        self.staged.require_table(table)?;
        self.staged.require_player(table, player_id)?;
        let rows = values
            .iter()
            .map(|(key, value)| {
                (
                    key.clone(),
                    SectionRow {
                        stat_value: *value,
                        updated_at,
                    },
                )
            })
            .collect();
        self.staged
            .sections
            .entry(table.to_string())
            .or_default()
            .insert(player_id.to_string(), rows);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), BackendError> {
        let MemoryTransaction { backend, staged } = *self;
        backend.state = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::table_specs;
    use chrono::TimeZone;
    use mcstats_core::TableNames;
    use serde_json::json;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    async fn ready_backend() -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        backend
            .ensure_schema(&table_specs(&TableNames::default()))
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn writes_before_schema_are_rejected() {
        let mut backend = MemoryBackend::new();
        let mut tx = backend.begin().await.unwrap();
        let err = tx
            .upsert_player(PlayerUpsert {
                player_id: "p",
                name: None,
                seen_at: at(1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::SchemaNotReady(_)));
    }

    #[tokio::test]
    async fn dependent_rows_need_a_player() {
        let mut backend = ready_backend().await;
        let mut tx = backend.begin().await.unwrap();
        let err = tx
            .upsert_raw("player_stats", "ghost", &json!({}), at(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::ForeignKey { .. }));
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let mut backend = ready_backend().await;
        {
            let mut tx = backend.begin().await.unwrap();
            tx.upsert_player(PlayerUpsert {
                player_id: "p",
                name: Some("Alex"),
                seen_at: at(1),
            })
            .await
            .unwrap();
            tx.rollback().await.unwrap();
        }
        {
            let mut tx = backend.begin().await.unwrap();
            tx.upsert_player(PlayerUpsert {
                player_id: "q",
                name: None,
                seen_at: at(1),
            })
            .await
            .unwrap();
        }
        assert_eq!(backend.player_count(), 0);
        assert_eq!(backend.transaction_count(), 2);
    }

    #[tokio::test]
    async fn player_upsert_keeps_first_seen_and_known_name() {
        let mut backend = ready_backend().await;
        for (name, hour) in [(Some("Alex"), 1), (None, 2)] {
            let mut tx = backend.begin().await.unwrap();
            tx.upsert_player(PlayerUpsert {
                player_id: "p",
                name,
                seen_at: at(hour),
            })
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }
        let row = backend.player("p").unwrap();
        assert_eq!(row.name.as_deref(), Some("Alex"));
        assert_eq!(row.first_seen, at(1));
        assert_eq!(row.last_seen, at(2));
    }

    #[tokio::test]
    async fn deleting_a_player_cascades() {
        let mut backend = ready_backend().await;
        let mut tx = backend.begin().await.unwrap();
        tx.upsert_player(PlayerUpsert {
            player_id: "p",
            name: None,
            seen_at: at(1),
        })
        .await
        .unwrap();
        tx.upsert_raw("player_stats", "p", &json!({"stats": {}}), at(1))
            .await
            .unwrap();
        tx.replace_section(
            "player_stats_mined",
            "p",
            &SectionValues::from([("minecraft:stone".to_string(), 3)]),
            at(1),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert!(backend.delete_player("p"));
        assert!(backend.raw("player_stats", "p").is_none());
        assert!(backend.section_rows("player_stats_mined", "p").is_none());
        assert!(!backend.delete_player("p"));
    }
}
