mod common;

use std::sync::Arc;

use common::{series, MemoryObjects, MemoryStore};
use tankobon_core::{
    CleanupMode, CleanupOptions, NewVolume, ObjectStore, ReviewDecision, VolumeCleaner,
};

fn volume(title: &str, publisher: &str, isbn_13: Option<&str>, key: Option<&str>) -> NewVolume {
    NewVolume {
        title: title.to_string(),
        subtitle: None,
        volume_number: tankobon_core::models::extract_volume_number(title),
        isbn_13: isbn_13.map(str::to_string),
        isbn_10: None,
        page_count: None,
        publisher: Some(publisher.to_string()),
        published_date: None,
        description: None,
        language: Some("en".to_string()),
        categories: Vec::new(),
        price_amount: None,
        price_currency: None,
        country: None,
        preview_link: None,
        info_link: None,
        thumbnail_url: None,
        thumbnail_key: key.map(str::to_string),
    }
}

/// Naruto with four clean volumes, one mild outlier (severity 3) and one
/// severe outlier (severity 6); Akira with too few volumes to judge.
async fn seeded() -> (Arc<MemoryStore>, Arc<MemoryObjects>, i64, i64) {
    let store = MemoryStore::default();
    let objects = MemoryObjects::default();

    let naruto = store.seed_series(series(20, "Naruto"), None);
    for n in 1..=4 {
        let isbn = format!("978142150{:04}", n);
        store.seed_volume(
            naruto,
            volume(&format!("Naruto, Vol. {}", n), "Viz Media", Some(&isbn), None),
        );
    }
    let mild = store.seed_volume(
        naruto,
        volume("Naruto, Vol. 5", "Random House", None, Some("volumes/mild/1_a.jpg")),
    );
    let severe = store.seed_volume(
        naruto,
        volume(
            "Practical Sourdough Baking",
            "Random House",
            None,
            Some("volumes/severe/1_b.jpg"),
        ),
    );
    objects.put("volumes/mild/1_a.jpg", b"a", "image/jpeg").await.unwrap();
    objects.put("volumes/severe/1_b.jpg", b"b", "image/jpeg").await.unwrap();

    let akira = store.seed_series(series(30, "Akira"), None);
    store.seed_volume(akira, volume("Cookbook", "Nobody", None, None));

    (Arc::new(store), Arc::new(objects), mild, severe)
}

#[tokio::test]
async fn test_dry_run_reports_without_deleting() {
    let (store, objects, mild, severe) = seeded().await;
    let cleaner = VolumeCleaner::new(store.clone(), objects.clone());

    let summary = cleaner.run(CleanupOptions::default()).await.unwrap();

    assert_eq!(summary.series_analyzed, 1);
    assert_eq!(summary.series_with_issues, 1);
    assert_eq!(summary.total_outliers, 2);
    assert_eq!(summary.eligible, 1);
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.deleted, 0);
    assert_eq!(store.volumes_of(1).len(), 6);
    assert_eq!(objects.keys().len(), 2);

    let report = &summary.reports[0];
    let ids: Vec<i64> = report.outliers.iter().map(|o| o.volume.id).collect();
    assert_eq!(ids, vec![mild, severe]);
    assert_eq!(report.outliers[0].severity, 3);
    assert_eq!(report.outliers[1].severity, 6);
}

#[tokio::test]
async fn test_live_run_deletes_only_eligible() {
    let (store, objects, _, _) = seeded().await;
    let cleaner = VolumeCleaner::new(store.clone(), objects.clone());

    let summary = cleaner
        .run(CleanupOptions {
            min_severity: 4,
            mode: CleanupMode::Delete,
        })
        .await
        .unwrap();

    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.pending, 0);
    let remaining = store.volumes_of(1);
    assert_eq!(remaining.len(), 5);
    assert!(remaining.iter().all(|v| v.title != "Practical Sourdough Baking"));
    assert_eq!(objects.keys(), vec!["volumes/mild/1_a.jpg".to_string()]);
}

#[tokio::test]
async fn test_lower_severity_bar_deletes_more() {
    let (store, objects, _, _) = seeded().await;
    let cleaner = VolumeCleaner::new(store.clone(), objects.clone());

    let summary = cleaner
        .run(CleanupOptions {
            min_severity: 3,
            mode: CleanupMode::Delete,
        })
        .await
        .unwrap();

    assert_eq!(summary.deleted, 2);
    assert_eq!(store.volumes_of(1).len(), 4);
    assert!(objects.keys().is_empty());
}

#[tokio::test]
async fn test_object_delete_failure_keeps_rows_deleted() {
    let (store, _, _, _) = seeded().await;
    let failing = Arc::new(MemoryObjects {
        fail_deletes: true,
        ..MemoryObjects::default()
    });
    let cleaner = VolumeCleaner::new(store.clone(), failing);

    let summary = cleaner
        .run(CleanupOptions {
            min_severity: 4,
            mode: CleanupMode::Delete,
        })
        .await
        .unwrap();

    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.object_delete_failures, 1);
    assert_eq!(store.volumes_of(1).len(), 5);
}

#[tokio::test]
async fn test_review_quit_stops_immediately() {
    let (store, objects, mild, _) = seeded().await;
    let cleaner = VolumeCleaner::new(store.clone(), objects);

    let mut seen = Vec::new();
    let summary = cleaner
        .review(CleanupMode::Delete, |_, outlier| {
            seen.push(outlier.volume.id);
            if outlier.volume.id == mild {
                ReviewDecision::Delete
            } else {
                ReviewDecision::Quit
            }
        })
        .await
        .unwrap();

    assert_eq!(seen.len(), 2);
    assert_eq!(summary.deleted, 1);
    assert_eq!(store.volumes_of(1).len(), 5);
}

#[tokio::test]
async fn test_review_dry_run_counts_pending() {
    let (store, objects, _, _) = seeded().await;
    let cleaner = VolumeCleaner::new(store.clone(), objects);

    let summary = cleaner
        .review(CleanupMode::DryRun, |_, _| ReviewDecision::Delete)
        .await
        .unwrap();

    assert_eq!(summary.pending, 2);
    assert_eq!(summary.deleted, 0);
    assert_eq!(store.volumes_of(1).len(), 6);
}
