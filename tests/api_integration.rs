//! HTTP integration tests
//!
//! These drive the full router with `oneshot`, injecting the connection
//! address the way the server's connect-info layer would.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tally::access::AccessGate;
use tally::api::{self, AppState};
use tally::config::TrackingConfig;
use tally::cursor::CursorSigner;
use tally::storage::{SqliteStorage, Storage};
use tally::tracking::{GeoResolver, TrackingEngine};
use tower::ServiceExt;

const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Helper to create test storage
async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

fn create_app(storage: &Arc<dyn Storage>) -> Router {
    let engine = Arc::new(TrackingEngine::new(
        Arc::clone(storage),
        GeoResolver::disabled(),
        &TrackingConfig::default(),
    ));
    api::create_router(Arc::new(AppState {
        storage: Arc::clone(storage),
        engine,
        gate: Arc::new(AccessGate::new(Arc::clone(storage))),
        cursor: CursorSigner::new(Some("test-secret")),
    }))
}

fn with_peer(mut req: Request<Body>, peer: &str) -> Request<Body> {
    let addr: SocketAddr = format!("{peer}:40000").parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

fn get(uri: &str, peer: &str) -> Request<Body> {
    with_peer(
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
        peer,
    )
}

fn post_json(uri: &str, peer: &str, body: Value) -> Request<Body> {
    with_peer(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, CHROME_UA)
            .body(Body::from(body.to_string()))
            .unwrap(),
        peer,
    )
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

#[tokio::test]
async fn test_health() {
    let storage = create_test_storage().await;
    let app = create_app(&storage);

    let response = app.oneshot(get("/health", "127.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_track_page_view() {
    let storage = create_test_storage().await;
    let app = create_app(&storage);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/track",
            "203.0.113.5",
            json!({ "action": "pageview", "visitor_id": "v1", "page_path": "/home" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert!(json.get("ignored").is_none());

    let record = storage
        .get_visitor_day("203.0.113.5", &today())
        .await
        .unwrap()
        .expect("page view should be stored");
    assert_eq!(record.page_path, "/home");

    let response = app
        .oneshot(get(&format!("/api/visitors/daily/{}", today()), "127.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["page_views"], 1);
    assert_eq!(json["data"]["unique_visitors"], 1);
}

#[tokio::test]
async fn test_track_uses_forwarded_address() {
    let storage = create_test_storage().await;
    let app = create_app(&storage);

    let mut req = post_json(
        "/api/track",
        "127.0.0.1",
        json!({ "action": "pageview", "page_path": "/" }),
    );
    req.headers_mut().insert(
        "x-forwarded-for",
        "198.51.100.20, 10.0.0.1".parse().unwrap(),
    );

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(storage
        .get_visitor_day("198.51.100.20", &today())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_track_accepts_text_plain_beacon() {
    let storage = create_test_storage().await;
    let app = create_app(&storage);

    let req = with_peer(
        Request::builder()
            .method("POST")
            .uri("/api/track")
            .header(header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(Body::from(
                json!({ "action": "heartbeat", "visitor_id": "v1" }).to_string(),
            ))
            .unwrap(),
        "203.0.113.5",
    );

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(storage.get_presence("global").await.unwrap().is_some());
}

#[tokio::test]
async fn test_track_ignores_bots() {
    let storage = create_test_storage().await;
    let app = create_app(&storage);

    let mut req = post_json(
        "/api/track",
        "203.0.113.5",
        json!({ "action": "pageview", "page_path": "/" }),
    );
    req.headers_mut().insert(
        header::USER_AGENT,
        "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)"
            .parse()
            .unwrap(),
    );

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["ignored"], "bot");
    assert_eq!(storage.count_visits(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_track_bot_with_malformed_body_is_ignored() {
    let storage = create_test_storage().await;
    let app = create_app(&storage);

    let mut req = with_peer(
        Request::builder()
            .method("POST")
            .uri("/api/track")
            .body(Body::from("{not json"))
            .unwrap(),
        "203.0.113.5",
    );
    req.headers_mut()
        .insert(header::USER_AGENT, "curl/8.4.0".parse().unwrap());

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["ignored"], "bot");
}

#[tokio::test]
async fn test_track_rejects_bad_requests() {
    let storage = create_test_storage().await;
    let app = create_app(&storage);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/track",
            "203.0.113.5",
            json!({ "action": "click" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);

    let req = with_peer(
        Request::builder()
            .method("POST")
            .uri("/api/track")
            .body(Body::from("{not json"))
            .unwrap(),
        "203.0.113.5",
    );
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Anonymous leave still departs the room
    let response = app
        .oneshot(post_json(
            "/api/track",
            "203.0.113.5",
            json!({ "action": "leave", "duration": 10 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let room = storage.get_presence("global").await.unwrap().unwrap();
    assert_eq!(room.online_count, 0);
}

#[tokio::test]
async fn test_online_endpoint() {
    let storage = create_test_storage().await;
    let app = create_app(&storage);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/track",
            "203.0.113.5",
            json!({
                "action": "heartbeat",
                "visitor_id": "v1",
                "page_type": "live",
                "reference_id": "99"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get("/api/track/online?room=match_99", "203.0.113.5"))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["total"], 1);

    let response = app
        .oneshot(get("/api/track/online", "203.0.113.5"))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["total"], 1);
}

#[tokio::test]
async fn test_admin_gate_blacklist_and_whitelist() {
    let storage = create_test_storage().await;
    let app = create_app(&storage);

    // Empty lists: everyone may reach the admin surface
    let response = app
        .clone()
        .oneshot(get("/api/system/client-ip", "203.0.113.5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ip"], "203.0.113.5");

    storage
        .add_to_whitelist("127.0.0.1", "localhost")
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get("/api/blacklist", "203.0.113.5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);

    let response = app
        .clone()
        .oneshot(get("/api/blacklist", "127.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Blacklisting a whitelisted address still denies it
    storage
        .add_to_blacklist("127.0.0.1", "locked out", None)
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(get("/api/blacklist", "127.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Tracking stays public
    let response = app
        .oneshot(post_json(
            "/api/track",
            "127.0.0.1",
            json!({ "action": "pageview" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_blacklist_endpoints() {
    let storage = create_test_storage().await;
    let app = create_app(&storage);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/blacklist",
            "127.0.0.1",
            json!({
                "ip_address": "203.0.113.66",
                "reason": "spam",
                "expires_at": "2099-01-01 00:00:00"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    let id = json["data"]["id"].as_i64().unwrap();
    assert_eq!(json["data"]["reason"], "spam");

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/blacklist",
            "127.0.0.1",
            json!({ "ip_address": "203.0.113.66" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/blacklist",
            "127.0.0.1",
            json!({ "ip_address": "203.0.113.67", "expires_at": "soon" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(get("/api/blacklist", "127.0.0.1"))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);

    let delete = |id: i64| {
        with_peer(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/blacklist/{id}"))
                .body(Body::empty())
                .unwrap(),
            "127.0.0.1",
        )
    };

    let response = app.clone().oneshot(delete(id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(delete(id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_visitor_list_pagination() {
    let storage = create_test_storage().await;
    let app = create_app(&storage);

    for i in 1..=3 {
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/track",
                &format!("203.0.113.{i}"),
                json!({ "action": "pageview", "page_path": "/" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(get("/api/visitors/list?limit=2", "127.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total"], 3);
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
    let cursor = json["next_cursor"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(get(
            &format!("/api/visitors/list?limit=2&cursor={cursor}"),
            "127.0.0.1",
        ))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
    assert!(json["next_cursor"].is_null());

    let response = app
        .clone()
        .oneshot(get("/api/visitors/list?cursor=forged.cursor", "127.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(get("/api/visitors/list?date=yesterday", "127.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_trend_and_clear() {
    let storage = create_test_storage().await;
    let app = create_app(&storage);

    app.clone()
        .oneshot(post_json(
            "/api/track",
            "203.0.113.5",
            json!({ "action": "pageview" }),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get("/api/visitors/trend?days=500", "127.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(post_json("/api/system/clear-stats", "127.0.0.1", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(storage.count_visits(None).await.unwrap(), 1);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/visitors/daily/{}", today()), "127.0.0.1"))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"]["page_views"], 0);

    let response = app
        .oneshot(post_json("/api/system/clear-visitors", "127.0.0.1", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(storage.count_visits(None).await.unwrap(), 0);
}
