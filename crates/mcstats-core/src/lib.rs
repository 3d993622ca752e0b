//! Core domain model for mcstats: section categories, parsed player stats, table naming.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "mcstats-core";

/// Name of the central players table. Not configurable; every other table references it.
pub const PLAYERS_TABLE: &str = "players";

pub const DEFAULT_RAW_TABLE: &str = "player_stats";

/// One of the fixed statistic groupings found under `stats` in a player document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Used,
    Mined,
    Broken,
    Custom,
    Killed,
    Crafted,
    Dropped,
    KilledBy,
    PickedUp,
}

impl Section {
    pub const ALL: [Section; 9] = [
        Section::Used,
        Section::Mined,
        Section::Broken,
        Section::Custom,
        Section::Killed,
        Section::Crafted,
        Section::Dropped,
        Section::KilledBy,
        Section::PickedUp,
    ];

    /// Key of this category inside the document's `stats` object.
    pub fn document_key(self) -> &'static str {
        match self {
            Section::Used => "minecraft:used",
            Section::Mined => "minecraft:mined",
            Section::Broken => "minecraft:broken",
            Section::Custom => "minecraft:custom",
            Section::Killed => "minecraft:killed",
            Section::Crafted => "minecraft:crafted",
            Section::Dropped => "minecraft:dropped",
            Section::KilledBy => "minecraft:killed_by",
            Section::PickedUp => "minecraft:picked_up",
        }
    }

    pub fn config_key(self) -> &'static str {
        match self {
            Section::Used => "used",
            Section::Mined => "mined",
            Section::Broken => "broken",
            Section::Custom => "custom",
            Section::Killed => "killed",
            Section::Crafted => "crafted",
            Section::Dropped => "dropped",
            Section::KilledBy => "killed_by",
            Section::PickedUp => "picked_up",
        }
    }

    pub fn default_table(self) -> String {
        format!("{DEFAULT_RAW_TABLE}_{}", self.config_key())
    }

    pub fn from_document_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.document_key() == key)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.document_key())
    }
}

/// Stat key -> integer value for one category. Ordered so writes are deterministic.
pub type SectionValues = BTreeMap<String, i64>;

/// Categories that survived filtering. A category is only present when it kept at least one entry.
pub type SectionMap = BTreeMap<Section, SectionValues>;

/// Result of parsing one `<identifier>.json` document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStats {
    pub sections: SectionMap,
    /// The decoded document exactly as read, stored verbatim in the raw table.
    pub raw: JsonValue,
}

impl ParsedStats {
    pub fn section(&self, section: Section) -> Option<&SectionValues> {
        self.sections.get(&section)
    }

    pub fn stat_count(&self) -> usize {
        self.sections.values().map(BTreeMap::len).sum()
    }
}

/// One discovered per-player stats file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerFile {
    pub player_id: String,
    pub path: std::path::PathBuf,
}

/// Target table names for the raw table and each section table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableNames {
    pub raw: String,
    pub used: String,
    pub mined: String,
    pub broken: String,
    pub custom: String,
    pub killed: String,
    pub crafted: String,
    pub dropped: String,
    pub killed_by: String,
    pub picked_up: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            raw: DEFAULT_RAW_TABLE.to_string(),
            used: Section::Used.default_table(),
            mined: Section::Mined.default_table(),
            broken: Section::Broken.default_table(),
            custom: Section::Custom.default_table(),
            killed: Section::Killed.default_table(),
            crafted: Section::Crafted.default_table(),
            dropped: Section::Dropped.default_table(),
            killed_by: Section::KilledBy.default_table(),
            picked_up: Section::PickedUp.default_table(),
        }
    }
}

impl TableNames {
    pub fn section(&self, section: Section) -> &str {
        match section {
            Section::Used => &self.used,
            Section::Mined => &self.mined,
            Section::Broken => &self.broken,
            Section::Custom => &self.custom,
            Section::Killed => &self.killed,
            Section::Crafted => &self.crafted,
            Section::Dropped => &self.dropped,
            Section::KilledBy => &self.killed_by,
            Section::PickedUp => &self.picked_up,
        }
    }

    /// Every configurable table, raw table first.
    pub fn all(&self) -> Vec<&str> {
        let mut out = vec![self.raw.as_str()];
        out.extend(Section::ALL.into_iter().map(|s| self.section(s)));
        out
    }
}

/// Leaves room for the `fk_<table>_player` constraint name within MySQL's 64-character limit.
pub const MAX_TABLE_NAME_LEN: usize = 54;

/// Table names are interpolated into DDL, so only plain identifiers are accepted.
pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TABLE_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_keys_round_trip() {
        for section in Section::ALL {
            assert_eq!(Section::from_document_key(section.document_key()), Some(section));
        }
        assert_eq!(Section::from_document_key("minecraft:walked"), None);
    }

    #[test]
    fn default_tables_follow_config_keys() {
        let tables = TableNames::default();
        assert_eq!(tables.section(Section::KilledBy), "player_stats_killed_by");
        assert_eq!(tables.section(Section::PickedUp), "player_stats_picked_up");
        assert_eq!(tables.all().len(), 10);
        assert_eq!(tables.all()[0], "player_stats");
    }

    #[test]
    fn table_overrides_deserialize_over_defaults() {
        let tables: TableNames =
            serde_json::from_str(r#"{"raw":"stats_raw","mined":"mined_blocks"}"#).unwrap();
        assert_eq!(tables.raw, "stats_raw");
        assert_eq!(tables.section(Section::Mined), "mined_blocks");
        assert_eq!(tables.section(Section::Used), "player_stats_used");
    }

    #[test]
    fn table_name_validation_rejects_quoting() {
        assert!(is_valid_table_name("player_stats_2"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("stats`; DROP TABLE players"));
        assert!(is_valid_table_name(&"x".repeat(MAX_TABLE_NAME_LEN)));
        assert!(!is_valid_table_name(&"x".repeat(MAX_TABLE_NAME_LEN + 1)));
    }
}
