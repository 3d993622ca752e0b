//! MySQL backend over a single `sqlx` connection owned by the run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mcstats_core::{SectionValues, PLAYERS_TABLE};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::types::Json;
use sqlx::{Connection, MySql, QueryBuilder, Transaction};
use tracing::debug;

use crate::backend::{BackendError, PlayerUpsert, StatsBackend, StatsTransaction};
use crate::schema::{change_sql, plan_schema, Catalog, SchemaReport, TableSpec};

/// Rows per multi-row INSERT when replacing a section.
const INSERT_CHUNK: usize = 500;

const CATALOG_SQL: &str = "SELECT CAST(TABLE_NAME AS CHAR) AS table_name, \
     CAST(COLUMN_NAME AS CHAR) AS column_name \
     FROM information_schema.columns WHERE table_schema = DATABASE()";

/// Connects lazily so source acquisition can finish before the database is touched.
pub struct MySqlBackend {
    options: MySqlConnectOptions,
    conn: Option<MySqlConnection>,
}

impl MySqlBackend {
    pub fn new(options: MySqlConnectOptions) -> Self {
        Self {
            options,
            conn: None,
        }
    }

    async fn connection(&mut self) -> Result<&mut MySqlConnection, BackendError> {
        match self.conn {
            Some(ref mut conn) => Ok(conn),
            None => {
                let conn = MySqlConnection::connect_with(&self.options).await?;
                Ok(self.conn.insert(conn))
            }
        }
    }

    pub async fn catalog(&mut self) -> Result<Catalog, BackendError> {
        let conn = self.connection().await?;
        let rows: Vec<(String, String)> = sqlx::query_as(CATALOG_SQL).fetch_all(&mut *conn).await?;
        let mut catalog = Catalog::new();
        for (table, column) in rows {
            catalog
                .entry(table)
                .or_default()
                .insert(column.to_ascii_lowercase());
        }
        Ok(catalog)
    }

    /// Close the connection if one was opened.
    pub async fn close(mut self) -> Result<(), BackendError> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StatsBackend for MySqlBackend {
    async fn ensure_schema(&mut self, specs: &[TableSpec]) -> Result<SchemaReport, BackendError> {
        let catalog = self.catalog().await?;
        let changes = plan_schema(specs, &catalog);
        let conn = self.connection().await?;
        for change in &changes {
            let sql = change_sql(specs, change)
                .ok_or_else(|| BackendError::UnknownChange(format!("{change:?}")))?;
            debug!(%sql, "applying schema change");
            sqlx::query(&sql).execute(&mut *conn).await?;
        }
        Ok(SchemaReport { changes })
    }

    async fn begin<'a>(&'a mut self) -> Result<Box<dyn StatsTransaction + 'a>, BackendError> {
        let conn = self.connection().await?;
        let tx = conn.begin().await?;
        Ok(Box::new(MySqlTransaction { tx }))
    }
}

struct MySqlTransaction<'c> {
    tx: Transaction<'c, MySql>,
}

#[async_trait]
impl<'c> StatsTransaction for MySqlTransaction<'c> {
    async fn upsert_player(&mut self, player: PlayerUpsert<'_>) -> Result<(), BackendError> {
        let sql = format!(
            "INSERT INTO `{PLAYERS_TABLE}` (`uuid`, `name`, `first_seen`, `last_seen`) \
             VALUES (?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE `name` = COALESCE(VALUES(`name`), `name`), \
             `last_seen` = VALUES(`last_seen`)"
        );
        sqlx::query(&sql)
            .bind(player.player_id)
            .bind(player.name)
            .bind(player.seen_at)
            .bind(player.seen_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn upsert_raw(
        &mut self,
        table: &str,
        player_id: &str,
        document: &JsonValue,
        updated_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        let sql = format!(
            "INSERT INTO `{table}` (`uuid`, `stats_json`, `updated_at`) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE `stats_json` = VALUES(`stats_json`), \
             `updated_at` = VALUES(`updated_at`)"
        );
        sqlx::query(&sql)
            .bind(player_id)
            .bind(Json(document))
            .bind(updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn replace_section(
        &mut self,
        table: &str,
        player_id: &str,
        values: &SectionValues,
        updated_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        sqlx::query(&format!("DELETE FROM `{table}` WHERE `uuid` = ?"))
            .bind(player_id)
            .execute(&mut *self.tx)
            .await?;

        let rows: Vec<(&str, i64)> = values.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<MySql> = QueryBuilder::new(format!(
                "INSERT INTO `{table}` (`uuid`, `stat_key`, `stat_value`, `updated_at`) "
            ));
            builder.push_values(chunk, |mut row, (key, value)| {
                row.push_bind(player_id)
                    .push_bind(*key)
                    .push_bind(*value)
                    .push_bind(updated_at);
            });
            builder.build().execute(&mut *self.tx).await?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), BackendError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BackendError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
