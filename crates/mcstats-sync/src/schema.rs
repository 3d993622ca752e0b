//! Expected table layout and the additive planner that reconciles a live catalogue with it.

use std::collections::{BTreeMap, BTreeSet};

use mcstats_core::{Section, TableNames, PLAYERS_TABLE};
use serde::Serialize;

/// Live schema: table name -> lowercased column names.
pub type Catalog = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Players,
    Raw,
    Section(Section),
}

/// A column that can be added to an existing table after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub definition: &'static str,
}

const PLAYER_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec {
        name: "name",
        definition: "VARCHAR(64) NULL",
    },
    ColumnSpec {
        name: "first_seen",
        definition: "DATETIME NULL",
    },
    ColumnSpec {
        name: "last_seen",
        definition: "DATETIME NULL",
    },
];

const RAW_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec {
        name: "stats_json",
        definition: "JSON NULL",
    },
    ColumnSpec {
        name: "updated_at",
        definition: "DATETIME NULL",
    },
];

// stat_key stays at 128 characters so the (uuid, stat_key) index fits InnoDB's prefix limit.
const SECTION_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec {
        name: "stat_key",
        definition: "VARCHAR(128) NOT NULL DEFAULT ''",
    },
    ColumnSpec {
        name: "stat_value",
        definition: "BIGINT NOT NULL DEFAULT 0",
    },
    ColumnSpec {
        name: "updated_at",
        definition: "DATETIME NULL",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub kind: TableKind,
    /// Created with the table only, never added later.
    pub key_columns: &'static [&'static str],
    pub columns: &'static [ColumnSpec],
}

impl TableSpec {
    fn players() -> Self {
        Self {
            name: PLAYERS_TABLE.to_string(),
            kind: TableKind::Players,
            key_columns: &["uuid"],
            columns: PLAYER_COLUMNS,
        }
    }

    fn raw(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: TableKind::Raw,
            key_columns: &["uuid"],
            columns: RAW_COLUMNS,
        }
    }

    fn section(section: Section, name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: TableKind::Section(section),
            key_columns: &["id", "uuid"],
            columns: SECTION_COLUMNS,
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.key_columns
            .iter()
            .copied()
            .chain(self.columns.iter().map(|c| c.name))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn create_sql(&self) -> String {
        let table = &self.name;
        let mut lines: Vec<String> = Vec::new();
        match self.kind {
            TableKind::Players => lines.push("`uuid` CHAR(36) NOT NULL".to_string()),
            TableKind::Raw => lines.push("`uuid` CHAR(36) NOT NULL".to_string()),
            TableKind::Section(_) => {
                lines.push("`id` BIGINT UNSIGNED NOT NULL AUTO_INCREMENT".to_string());
                lines.push("`uuid` CHAR(36) NOT NULL".to_string());
            }
        }
        lines.extend(
            self.columns
                .iter()
                .map(|c| format!("`{}` {}", c.name, c.definition)),
        );
        match self.kind {
            TableKind::Players => {
                lines.push("PRIMARY KEY (`uuid`)".to_string());
                lines.push("KEY `idx_name` (`name`)".to_string());
            }
            TableKind::Raw => {
                lines.push("PRIMARY KEY (`uuid`)".to_string());
                lines.push(foreign_key(table));
            }
            TableKind::Section(_) => {
                lines.push("PRIMARY KEY (`id`)".to_string());
                lines.push(format!("UNIQUE KEY `uq_{table}` (`uuid`, `stat_key`)"));
                lines.push("KEY `idx_stat_key` (`stat_key`)".to_string());
                lines.push("KEY `idx_stat_value` (`stat_value`)".to_string());
                lines.push(foreign_key(table));
            }
        }
        format!(
            "CREATE TABLE IF NOT EXISTS `{table}` (\n  {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            lines.join(",\n  ")
        )
    }

    pub fn add_column_sql(&self, column: &ColumnSpec) -> String {
        format!(
            "ALTER TABLE `{}` ADD COLUMN `{}` {}",
            self.name, column.name, column.definition
        )
    }
}

fn foreign_key(table: &str) -> String {
    format!(
        "CONSTRAINT `fk_{table}_player` FOREIGN KEY (`uuid`) REFERENCES `{PLAYERS_TABLE}` (`uuid`) \
         ON DELETE CASCADE ON UPDATE CASCADE"
    )
}

/// Players first so every foreign key has its target.
pub fn table_specs(tables: &TableNames) -> Vec<TableSpec> {
    let mut specs = vec![TableSpec::players(), TableSpec::raw(&tables.raw)];
    specs.extend(
        Section::ALL
            .into_iter()
            .map(|section| TableSpec::section(section, tables.section(section))),
    );
    specs
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum SchemaChange {
    CreateTable { table: String },
    AddColumn { table: String, column: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub changes: Vec<SchemaChange>,
}

impl SchemaReport {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn created_tables(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, SchemaChange::CreateTable { .. }))
            .count()
    }

    pub fn added_columns(&self) -> usize {
        self.changes.len() - self.created_tables()
    }
}

/// Diff `catalog` against `specs`. Only creations and column additions are ever planned.
pub fn plan_schema(specs: &[TableSpec], catalog: &Catalog) -> Vec<SchemaChange> {
    let mut changes = Vec::new();
    for spec in specs {
        let Some(existing) = catalog.get(&spec.name) else {
            changes.push(SchemaChange::CreateTable {
                table: spec.name.clone(),
            });
            continue;
        };
        for column in spec.columns {
            if !existing.contains(column.name) {
                changes.push(SchemaChange::AddColumn {
                    table: spec.name.clone(),
                    column: column.name.to_string(),
                });
            }
        }
    }
    changes
}

/// SQL for one planned change, or `None` when it does not match any spec.
pub fn change_sql(specs: &[TableSpec], change: &SchemaChange) -> Option<String> {
    match change {
        SchemaChange::CreateTable { table } => specs
            .iter()
            .find(|s| &s.name == table)
            .map(TableSpec::create_sql),
        SchemaChange::AddColumn { table, column } => {
            let spec = specs.iter().find(|s| &s.name == table)?;
            spec.column(column).map(|c| spec.add_column_sql(c))
        }
    }
}
