use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use mcstats_core::{Section, TableNames};
use mcstats_storage::{RemoteSettings, SourceKind, SourceSettings};
use mcstats_sync::{
    DatabaseTarget, FixedClock, MemoryBackend, NoopObserver, SyncConfig, SyncPipeline,
};

fn fixtures_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

fn fixture_config() -> SyncConfig {
    SyncConfig {
        source: SourceSettings {
            world_path: fixtures_root().join("world"),
            temp_root: None,
            remote: RemoteSettings::default(),
        },
        database: DatabaseTarget::Url("mysql://unused@localhost/unused".into()),
        tables: TableNames::default(),
        progress_every: 50,
    }
}

#[tokio::test]
async fn fixture_world_syncs_into_memory() {
    let synced_at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
    let pipeline = SyncPipeline::new(fixture_config())
        .with_observer(Arc::new(NoopObserver))
        .with_clock(Arc::new(FixedClock(synced_at)));

    let mut backend = MemoryBackend::new();
    let summary = pipeline.run_once(&mut backend).await.expect("sync");

    assert_eq!(summary.source, SourceKind::Local);
    assert_eq!(summary.files_discovered, 3);
    assert_eq!(summary.players_processed, 2);
    assert_eq!(summary.files_skipped, 1);
    assert_eq!(backend.player_count(), 2);

    let steve = backend
        .player("22222222-2222-2222-2222-222222222222")
        .expect("steve");
    assert_eq!(steve.name.as_deref(), Some("Steve"));
    assert_eq!(steve.first_seen, synced_at);

    let tables = TableNames::default();
    let custom = backend
        .section_rows(
            tables.section(Section::Custom),
            "22222222-2222-2222-2222-222222222222",
        )
        .expect("custom rows");
    assert_eq!(custom.len(), 3);

    let anonymous = backend
        .player("11111111-1111-1111-1111-111111111111")
        .expect("anonymous player");
    assert_eq!(anonymous.name, None);
    assert!(backend
        .player("33333333-3333-3333-3333-333333333333")
        .is_none());
}

#[tokio::test]
async fn summary_serializes_for_reporting() {
    let pipeline = SyncPipeline::new(fixture_config()).with_observer(Arc::new(NoopObserver));
    let mut backend = MemoryBackend::new();
    let summary = pipeline.run_once(&mut backend).await.expect("sync");

    let value = serde_json::to_value(&summary).expect("serialize");
    assert_eq!(value["source"]["kind"], "local");
    assert_eq!(value["players_processed"], 2);
    assert_eq!(value["schema"]["changes"][0]["change"], "create_table");
    assert_eq!(value["schema"]["changes"][0]["table"], "players");
}
