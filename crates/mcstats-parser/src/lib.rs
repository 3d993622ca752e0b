//! Per-player stats document parsing and usercache loading.
//!
//! Both entry points are tolerant: a broken stats document is reported as a [`ParseError`] for
//! the caller to skip, and a broken usercache degrades to an empty name mapping.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use mcstats_core::{ParsedStats, Section, SectionMap, SectionValues};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

pub const CRATE_NAME: &str = "mcstats-parser";

/// Top-level member holding the nested category objects.
pub const STATS_MEMBER: &str = "stats";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: top-level value is not an object")]
    NotAnObject { path: String },
}

/// Parse one `<identifier>.json` file. `None` means the file should be skipped.
pub fn parse_stats(path: impl AsRef<Path>) -> Option<ParsedStats> {
    parse_stats_file(path).ok()
}

/// Same as [`parse_stats`] but keeps the reason the document was rejected.
pub fn parse_stats_file(path: impl AsRef<Path>) -> Result<ParsedStats, ParseError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ParseError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let raw: JsonValue = serde_json::from_str(&text).map_err(|source| ParseError::Decode {
        path: path.display().to_string(),
        source,
    })?;
    if !raw.is_object() {
        return Err(ParseError::NotAnObject {
            path: path.display().to_string(),
        });
    }
    Ok(parse_stats_document(raw))
}

/// Extract the known categories from an already decoded document.
pub fn parse_stats_document(raw: JsonValue) -> ParsedStats {
    let sections = match raw.get(STATS_MEMBER).and_then(JsonValue::as_object) {
        Some(stats) => extract_sections(stats),
        None => SectionMap::new(),
    };
    ParsedStats { sections, raw }
}

fn extract_sections(stats: &Map<String, JsonValue>) -> SectionMap {
    let mut sections = SectionMap::new();
    for section in Section::ALL {
        let Some(entries) = stats.get(section.document_key()).and_then(JsonValue::as_object) else {
            continue;
        };
        let cleaned: SectionValues = entries
            .iter()
            .filter_map(|(key, value)| coerce_stat_value(value).map(|v| (key.clone(), v)))
            .collect();
        if !cleaned.is_empty() {
            sections.insert(section, cleaned);
        }
    }
    sections
}

/// Lenient integer cast: integers, booleans, truncated finite floats and integer strings.
pub fn coerce_stat_value(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => {
            if let Some(v) = n.as_i64() {
                return Some(v);
            }
            if n.is_u64() {
                return None;
            }
            n.as_f64().and_then(truncate_float)
        }
        JsonValue::Bool(b) => Some(i64::from(*b)),
        JsonValue::String(s) => s.trim().parse::<i64>().ok(),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

fn truncate_float(f: f64) -> Option<i64> {
    // i64::MAX is not representable as f64; the bound is 2^63 exclusive.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_finite() && f >= -LIMIT && f < LIMIT {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsercacheStatus {
    Loaded,
    Missing,
    Malformed(String),
}

/// Best-effort identifier -> display name mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usercache {
    names: HashMap<String, String>,
    status: UsercacheStatus,
}

#[derive(Debug, Deserialize)]
struct UsercacheEntry {
    uuid: Option<JsonValue>,
    name: Option<JsonValue>,
}

impl Usercache {
    pub fn empty() -> Self {
        Self {
            names: HashMap::new(),
            status: UsercacheStatus::Missing,
        }
    }

    pub fn name_for(&self, player_id: &str) -> Option<&str> {
        self.names.get(player_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn status(&self) -> &UsercacheStatus {
        &self.status
    }
}

/// Load `usercache.json`. Never fails: a missing or malformed file yields an empty mapping
/// whose [`UsercacheStatus`] tells the caller what to warn about.
pub fn load_usercache(path: impl AsRef<Path>) -> Usercache {
    let path = path.as_ref();
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Usercache::empty(),
        Err(err) => {
            return Usercache {
                names: HashMap::new(),
                status: UsercacheStatus::Malformed(format!("reading {}: {err}", path.display())),
            }
        }
    };
    match parse_usercache(&text) {
        Ok(names) => Usercache {
            names,
            status: UsercacheStatus::Loaded,
        },
        Err(err) => Usercache {
            names: HashMap::new(),
            status: UsercacheStatus::Malformed(format!("parsing {}: {err}", path.display())),
        },
    }
}

fn parse_usercache(text: &str) -> Result<HashMap<String, String>, serde_json::Error> {
    // Entries are decoded loosely so one odd record does not reject the whole file.
    let entries: Vec<JsonValue> = serde_json::from_str(text)?;
    let names = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<UsercacheEntry>(entry).ok())
        .filter_map(|entry| match (entry.uuid, entry.name) {
            (Some(JsonValue::String(uuid)), Some(JsonValue::String(name))) => Some((uuid, name)),
            _ => None,
        })
        .collect();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn coercion_mirrors_lenient_integer_cast() {
        assert_eq!(coerce_stat_value(&json!(42)), Some(42));
        assert_eq!(coerce_stat_value(&json!(-7)), Some(-7));
        assert_eq!(coerce_stat_value(&json!(3.9)), Some(3));
        assert_eq!(coerce_stat_value(&json!(-3.9)), Some(-3));
        assert_eq!(coerce_stat_value(&json!(true)), Some(1));
        assert_eq!(coerce_stat_value(&json!(" 17 ")), Some(17));
        assert_eq!(coerce_stat_value(&json!("+5")), Some(5));
        assert_eq!(coerce_stat_value(&json!("oops")), None);
        assert_eq!(coerce_stat_value(&json!("4.2")), None);
        assert_eq!(coerce_stat_value(&json!(null)), None);
        assert_eq!(coerce_stat_value(&json!([1])), None);
        assert_eq!(coerce_stat_value(&json!({"v": 1})), None);
        assert_eq!(coerce_stat_value(&json!(u64::MAX)), None);
        assert_eq!(coerce_stat_value(&json!(1e300)), None);
    }

    #[test]
    fn non_numeric_entries_are_dropped_and_empty_sections_omitted() {
        let parsed = parse_stats_document(json!({
            "stats": {
                "minecraft:mined": {"minecraft:stone": 42, "minecraft:dirt": "oops"},
                "minecraft:used": {"minecraft:bow": "broken"},
                "minecraft:custom": {},
                "minecraft:walked": {"minecraft:stone": 1}
            },
            "DataVersion": 3700
        }));

        assert_eq!(parsed.sections.len(), 1);
        let mined = parsed.section(Section::Mined).unwrap();
        assert_eq!(mined.len(), 1);
        assert_eq!(mined.get("minecraft:stone"), Some(&42));
        assert!(parsed.section(Section::Used).is_none());
        assert!(parsed.section(Section::Custom).is_none());
        assert_eq!(parsed.raw["DataVersion"], json!(3700));
    }

    #[test]
    fn non_object_sections_are_ignored() {
        let parsed = parse_stats_document(json!({
            "stats": {
                "minecraft:killed": [1, 2, 3],
                "minecraft:crafted": {"minecraft:torch": 64}
            }
        }));
        assert!(parsed.section(Section::Killed).is_none());
        assert_eq!(parsed.stat_count(), 1);
    }

    #[test]
    fn missing_stats_member_keeps_raw_document() {
        let raw = json!({"DataVersion": 1});
        let parsed = parse_stats_document(raw.clone());
        assert!(parsed.sections.is_empty());
        assert_eq!(parsed.raw, raw);

        let parsed = parse_stats_document(json!({"stats": "nope"}));
        assert!(parsed.sections.is_empty());
    }

    #[test]
    fn decode_failures_yield_no_result() {
        let dir = tempdir().unwrap();
        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{\"stats\": ").unwrap();
        assert!(parse_stats(&broken).is_none());
        assert!(matches!(
            parse_stats_file(&broken),
            Err(ParseError::Decode { .. })
        ));

        let list = dir.path().join("list.json");
        fs::write(&list, "[1, 2]").unwrap();
        assert!(matches!(
            parse_stats_file(&list),
            Err(ParseError::NotAnObject { .. })
        ));

        assert!(matches!(
            parse_stats_file(dir.path().join("absent.json")),
            Err(ParseError::Read { .. })
        ));
    }

    #[test]
    fn usercache_skips_incomplete_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("usercache.json");
        fs::write(
            &path,
            r#"[
                {"uuid": "a", "name": "Alex", "expiresOn": "2026-01-01 00:00:00 +0000"},
                {"uuid": "b"},
                {"name": "NoId"},
                {"uuid": "c", "name": 7},
                "junk"
            ]"#,
        )
        .unwrap();

        let cache = load_usercache(&path);
        assert_eq!(cache.status(), &UsercacheStatus::Loaded);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.name_for("a"), Some("Alex"));
        assert_eq!(cache.name_for("b"), None);
    }

    #[test]
    fn usercache_missing_or_malformed_is_empty() {
        let dir = tempdir().unwrap();
        let missing = load_usercache(dir.path().join("usercache.json"));
        assert!(missing.is_empty());
        assert_eq!(missing.status(), &UsercacheStatus::Missing);

        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        let malformed = load_usercache(&path);
        assert!(malformed.is_empty());
        assert!(matches!(malformed.status(), UsercacheStatus::Malformed(_)));

        fs::write(&path, r#"{"uuid": "a", "name": "Alex"}"#).unwrap();
        assert!(matches!(
            load_usercache(&path).status(),
            UsercacheStatus::Malformed(_)
        ));
    }
}
