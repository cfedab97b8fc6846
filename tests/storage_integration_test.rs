use std::sync::Arc;
use tally::models::NewVisitorDay;
use tally::storage::{SqliteStorage, Storage, StorageError, VisitPosition};
use tally::tracking::models::{DeviceInfo, GeoLocation};

/// Helper to create test storage
async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

fn new_visit(address: &str, date: &str, visitor_id: &str, page: &str, at: i64) -> NewVisitorDay {
    NewVisitorDay {
        ip_address: address.to_string(),
        visit_date: date.to_string(),
        visitor_id: visitor_id.to_string(),
        session_id: String::new(),
        page_path: page.to_string(),
        page_type: String::new(),
        reference_id: String::new(),
        referrer: "https://example.com/".to_string(),
        device: DeviceInfo::default(),
        geo: GeoLocation::local(),
        at,
    }
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let storage = create_test_storage().await;
    storage.init().await.unwrap();
}

#[tokio::test]
async fn test_create_visitor_day_conflict_writes_nothing() {
    let storage = create_test_storage().await;

    let first = storage
        .create_visitor_day(&new_visit("1.2.3.4", "2024-01-01", "v1", "/", 100))
        .await
        .unwrap();
    assert!(first.is_new_visitor);

    let second = storage
        .create_visitor_day(&new_visit("1.2.3.4", "2024-01-01", "v1", "/other", 200))
        .await;
    assert!(matches!(second, Err(StorageError::Conflict)));

    let record = storage
        .get_visitor_day("1.2.3.4", "2024-01-01")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.page_view_count, 1);
    assert_eq!(record.visited_pages, vec!["/"]);
    assert_eq!(record.country_code, "LOCAL");

    let stats = storage.get_daily_stats("2024-01-01").await.unwrap().unwrap();
    assert_eq!(stats.page_views, 1);
    assert_eq!(stats.unique_visitors, 1);
}

#[tokio::test]
async fn test_repeat_view_without_record_is_noop() {
    let storage = create_test_storage().await;

    let applied = storage
        .record_repeat_view("1.2.3.4", "2024-01-01", "/", 100)
        .await
        .unwrap();
    assert!(!applied);
    assert!(storage.get_daily_stats("2024-01-01").await.unwrap().is_none());
}

#[tokio::test]
async fn test_repeat_view_keeps_page_set_distinct() {
    let storage = create_test_storage().await;
    storage
        .create_visitor_day(&new_visit("1.2.3.4", "2024-01-01", "v1", "/a", 100))
        .await
        .unwrap();

    for (page, at) in [("/b", 110), ("/a", 120), ("/b", 130)] {
        assert!(storage
            .record_repeat_view("1.2.3.4", "2024-01-01", page, at)
            .await
            .unwrap());
    }

    let record = storage
        .get_visitor_day("1.2.3.4", "2024-01-01")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.page_view_count, 4);
    assert_eq!(record.visited_pages, vec!["/a", "/b"]);
    assert_eq!(record.last_visit_at, 130);
    assert_eq!(record.created_at, 100);

    let stats = storage.get_daily_stats("2024-01-01").await.unwrap().unwrap();
    assert_eq!(stats.page_views, 4);
    assert_eq!(stats.unique_visitors, 1);
}

#[tokio::test]
async fn test_set_visit_duration_targets_latest_record_with_page() {
    let storage = create_test_storage().await;
    storage
        .create_visitor_day(&new_visit("1.2.3.4", "2024-01-01", "v1", "/a", 100))
        .await
        .unwrap();
    storage
        .create_visitor_day(&new_visit("1.2.3.4", "2024-01-02", "v1", "/a", 90_000))
        .await
        .unwrap();
    storage
        .create_visitor_day(&new_visit("5.6.7.8", "2024-01-03", "v1", "/b", 180_000))
        .await
        .unwrap();

    assert!(storage.set_visit_duration("v1", "/a", 30).await.unwrap());
    assert!(!storage.set_visit_duration("v1", "/missing", 30).await.unwrap());

    let older = storage
        .get_visitor_day("1.2.3.4", "2024-01-01")
        .await
        .unwrap()
        .unwrap();
    let newer = storage
        .get_visitor_day("1.2.3.4", "2024-01-02")
        .await
        .unwrap()
        .unwrap();
    let other_page = storage
        .get_visitor_day("5.6.7.8", "2024-01-03")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(older.duration, 0);
    assert_eq!(newer.duration, 30);
    assert_eq!(other_page.duration, 0);
}

#[tokio::test]
async fn test_list_visits_keyset_and_filter() {
    let storage = create_test_storage().await;
    for (i, address) in ["10.0.0.1", "10.0.0.2", "10.0.0.3"].iter().enumerate() {
        storage
            .create_visitor_day(&new_visit(address, "2024-01-01", "v", "/", 100 + i as i64))
            .await
            .unwrap();
    }
    storage
        .create_visitor_day(&new_visit("10.0.0.9", "2024-01-02", "v", "/", 100_000))
        .await
        .unwrap();

    assert_eq!(storage.count_visits(None).await.unwrap(), 4);
    assert_eq!(storage.count_visits(Some("2024-01-01")).await.unwrap(), 3);

    let all = storage.list_visits(None, None, 10).await.unwrap();
    assert_eq!(all[0].ip_address, "10.0.0.9");

    let first = storage
        .list_visits(Some("2024-01-01"), None, 2)
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].ip_address, "10.0.0.3");

    let last = first.last().unwrap();
    let rest = storage
        .list_visits(
            Some("2024-01-01"),
            Some(VisitPosition {
                created_at: last.created_at,
                id: last.id,
            }),
            2,
        )
        .await
        .unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].ip_address, "10.0.0.1");
}

#[tokio::test]
async fn test_access_list_crud() {
    let storage = create_test_storage().await;

    let entry = storage
        .add_to_blacklist("203.0.113.1", "scraping", Some(2_000_000_000))
        .await
        .unwrap();
    assert_eq!(entry.reason, "scraping");
    assert!(matches!(
        storage.add_to_blacklist("203.0.113.1", "again", None).await,
        Err(StorageError::Conflict)
    ));

    assert!(storage.is_blacklisted("203.0.113.1", 1_900_000_000).await.unwrap());
    assert!(!storage.is_blacklisted("203.0.113.1", 2_000_000_000).await.unwrap());
    assert_eq!(storage.list_blacklist().await.unwrap().len(), 1);

    assert!(storage.remove_from_blacklist(entry.id).await.unwrap());
    assert!(!storage.remove_from_blacklist(entry.id).await.unwrap());

    assert!(!storage.has_whitelist().await.unwrap());
    let allowed = storage
        .add_to_whitelist("198.51.100.1", "office")
        .await
        .unwrap();
    assert!(storage.has_whitelist().await.unwrap());
    assert!(storage.is_whitelisted("198.51.100.1").await.unwrap());
    assert!(!storage.is_whitelisted("198.51.100.2").await.unwrap());
    assert!(matches!(
        storage.add_to_whitelist("198.51.100.1", "").await,
        Err(StorageError::Conflict)
    ));

    assert!(storage.remove_from_whitelist(allowed.id).await.unwrap());
    assert!(!storage.has_whitelist().await.unwrap());
}

#[tokio::test]
async fn test_clear_operations() {
    let storage = create_test_storage().await;
    storage
        .create_visitor_day(&new_visit("1.2.3.4", "2024-01-01", "v1", "/", 100))
        .await
        .unwrap();
    storage.touch_presence("global", false, 100).await.unwrap();

    storage.clear_daily_stats().await.unwrap();
    assert!(storage.get_daily_stats("2024-01-01").await.unwrap().is_none());
    assert_eq!(storage.count_visits(None).await.unwrap(), 1);

    storage.clear_visits().await.unwrap();
    assert_eq!(storage.count_visits(None).await.unwrap(), 0);
    assert!(storage.get_presence("global").await.unwrap().is_none());

    // The address starts over as a new visitor
    let again = storage
        .create_visitor_day(&new_visit("1.2.3.4", "2024-01-02", "v1", "/", 90_000))
        .await
        .unwrap();
    assert!(again.is_new_visitor);
}
