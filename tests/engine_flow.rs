//! End-to-end flow across the store, aggregator, and media index.

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use trafficscope::core::stats::{Aggregator, StatsRange};
use trafficscope::core::store::EventStore;
use trafficscope::core::sun::{CollectionPolicy, Unrestricted};
use trafficscope::core::media::MediaIndex;
use trafficscope::core::{Attributes, EventKind};

fn direction(value: &str) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("direction".into(), value.into());
    attrs
}

#[test]
fn traffic_day_report_from_durable_store() {
    let dir = tempfile::tempdir().unwrap();
    let policy: Arc<dyn CollectionPolicy> = Arc::new(Unrestricted);
    let store = Arc::new(
        EventStore::open(dir.path().join("events.db"), policy.clone(), 10).unwrap(),
    );

    store
        .append(
            EventKind::Traffic,
            &direction("A"),
            "cam1",
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 15).unwrap(),
        )
        .unwrap();
    store
        .append(
            EventKind::Traffic,
            &direction("B"),
            "cam1",
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 2, 40).unwrap(),
        )
        .unwrap();

    let agg = Aggregator::new(store.clone(), policy);
    let report = agg
        .stats(StatsRange::Day, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
        .unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.buckets.len(), 1);
    assert_eq!(report.buckets[0].time, "2024-06-01 08:00");
    assert_eq!(report.buckets[0].count, 2);
    assert_eq!(report.buckets[0].directions.len(), 2);
    assert_eq!(report.peak_1min.count, 1);
    assert_eq!(report.peak_1min.start.as_deref(), Some("2024-06-01 08:00"));

    // Re-running with no intervening writes yields byte-identical output.
    let again = agg
        .stats(StatsRange::Day, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
        .unwrap();
    assert_eq!(
        serde_json::to_vec(&report).unwrap(),
        serde_json::to_vec(&again).unwrap()
    );
}

#[test]
fn intrusions_enriched_with_matched_media() {
    let dir = tempfile::tempdir().unwrap();
    let policy: Arc<dyn CollectionPolicy> = Arc::new(Unrestricted);
    let store =
        EventStore::in_memory(policy, 10).unwrap();

    let at = Utc.with_ymd_and_hms(2024, 6, 1, 11, 2, 30).unwrap();
    store
        .append(EventKind::Intrusion, &Attributes::new(), "cam1", at)
        .unwrap();

    // Camera uploads use local time (UTC+2 here in June).
    let partition = dir.path().join("2024-06-01");
    std::fs::create_dir_all(&partition).unwrap();
    std::fs::write(partition.join("001_20240601130235_[M][0@0][0].jpg"), b"jpeg").unwrap();
    std::fs::write(partition.join("13.00.00-13.05.00[M][0@0][0].dav"), b"dav").unwrap();

    let index = MediaIndex::new(dir.path().to_path_buf(), chrono_tz::Europe::Berlin, 30);
    let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let events = store.intrusion_events(date).unwrap();
    let matched = index.match_events(events, date);

    assert_eq!(matched.len(), 1);
    let snap = matched[0].snapshot.as_ref().unwrap();
    assert_eq!(snap.file_name, "001_20240601130235_[M][0@0][0].jpg");
    assert_eq!(snap.partition, "2024-06-01");
    let clip = matched[0].clip.as_ref().unwrap();
    assert_eq!(clip.file_name, "13.00.00-13.05.00[M][0@0][0].dav");
}
