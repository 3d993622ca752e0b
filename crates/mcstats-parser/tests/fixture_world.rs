use std::path::{Path, PathBuf};

use mcstats_core::Section;
use mcstats_parser::{load_usercache, parse_stats, UsercacheStatus};

fn fixtures_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

fn stats_file(id: &str) -> PathBuf {
    fixtures_root().join("world").join("stats").join(format!("{id}.json"))
}

#[test]
fn fixture_player_keeps_only_numeric_mined_entries() {
    let parsed = parse_stats(stats_file("11111111-1111-1111-1111-111111111111")).expect("parse");
    assert_eq!(parsed.sections.len(), 1);
    let mined = parsed.section(Section::Mined).expect("mined");
    assert_eq!(mined.len(), 1);
    assert_eq!(mined.get("minecraft:stone"), Some(&42));
    assert_eq!(
        parsed.raw["stats"]["minecraft:mined"]["minecraft:dirt"],
        serde_json::json!("oops")
    );
}

#[test]
fn fixture_player_with_many_sections() {
    let parsed = parse_stats(stats_file("22222222-2222-2222-2222-222222222222")).expect("parse");
    let present: Vec<Section> = parsed.sections.keys().copied().collect();
    assert_eq!(
        present,
        vec![
            Section::Mined,
            Section::Custom,
            Section::Killed,
            Section::KilledBy,
            Section::PickedUp
        ]
    );
    assert_eq!(parsed.stat_count(), 8);
}

#[test]
fn truncated_fixture_is_skipped() {
    assert!(parse_stats(stats_file("33333333-3333-3333-3333-333333333333")).is_none());
}

#[test]
fn fixture_usercache_names_known_players() {
    let cache = load_usercache(fixtures_root().join("usercache.json"));
    assert_eq!(cache.status(), &UsercacheStatus::Loaded);
    assert_eq!(cache.len(), 1);
    assert_eq!(
        cache.name_for("22222222-2222-2222-2222-222222222222"),
        Some("Steve")
    );
}
