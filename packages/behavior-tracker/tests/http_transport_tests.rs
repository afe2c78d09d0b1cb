//! HttpTransport and the full engine against a local collector.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use behavior_tracker::config::{DEFAULT_COLLECT_ENDPOINT, DEFAULT_EVENTS_ENDPOINT};
use behavior_tracker::{
    BehaviorTracker, BrowserPage, Credential, EventDefinition, EventId, EventProperties,
    HttpTransport, TrackerConfig, TrackerOverrides, TrackerTransport, TriggerType,
};
use reqwest::cookie::Jar;
use reqwest::Url;
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct Collector {
    catalog: Arc<Mutex<Value>>,
    events_status: Arc<Mutex<Option<StatusCode>>>,
    fetch_headers: Arc<Mutex<Vec<HeaderMap>>>,
    posts: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

async fn active_events(State(collector): State<Collector>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    collector.fetch_headers.lock().unwrap().push(headers);
    let status = collector.events_status.lock().unwrap().unwrap_or(StatusCode::OK);
    (status, Json(collector.catalog.lock().unwrap().clone()))
}

async fn collect(
    State(collector): State<Collector>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    collector.posts.lock().unwrap().push((headers, body));
    StatusCode::ACCEPTED
}

async fn start(collector: Collector) -> SocketAddr {
    let app = Router::new()
        .route(DEFAULT_EVENTS_ENDPOINT, get(active_events))
        .route(DEFAULT_COLLECT_ENDPOINT, post(collect))
        .with_state(collector);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config_for(addr: SocketAddr) -> TrackerConfig {
    TrackerConfig {
        api_base_url: format!("http://{}", addr),
        token_provider: Credential::literal("tok-123"),
        ..TrackerConfig::default()
    }
}

#[tokio::test]
async fn test_fetch_parses_catalog_and_sends_bearer() {
    let collector = Collector::default();
    *collector.catalog.lock().unwrap() = json!([
        {"id": 1, "name": "Thanks", "triggerType": "PAGE_VIEW", "triggerPayload": {"urlPattern": "/thanks"}},
        {"id": "c-1", "triggerType": "CLICK", "triggerPayload": {"selector": ".buy-btn", "color": "red"}},
        {"id": 3, "triggerType": "PURCHASE"}
    ]);
    let addr = start(collector.clone()).await;

    let transport = HttpTransport::new(&config_for(addr)).unwrap();
    let catalog = transport.fetch_active_events().await.unwrap();

    assert_eq!(catalog.len(), 3);
    assert_eq!(catalog[0].id, EventId::Number(1));
    assert_eq!(catalog[0].url_pattern(), Some("/thanks"));
    assert_eq!(catalog[1].selector(), Some(".buy-btn"));
    assert_eq!(catalog[2].trigger_type, Some(TriggerType::Other("PURCHASE".into())));

    let headers = collector.fetch_headers.lock().unwrap();
    assert_eq!(headers[0]["authorization"], "Bearer tok-123");
}

#[tokio::test]
async fn test_malformed_entries_do_not_sink_the_catalog() {
    let collector = Collector::default();
    *collector.catalog.lock().unwrap() = json!([
        {"id": "e1", "triggerType": "PAGE_VIEW", "triggerPayload": {"urlPattern": "/thanks"}},
        {"name": "No id", "triggerType": "PAGE_VIEW"},
        {"id": "e2", "triggerType": "CLICK", "triggerPayload": {"selector": 5}},
        {"id": "e3", "name": 12, "triggerType": "CLICK"},
        {"id": "e4", "triggerType": "CLICK", "triggerPayload": {"selector": ".buy-btn"}}
    ]);
    let addr = start(collector.clone()).await;

    let transport = HttpTransport::new(&config_for(addr)).unwrap();
    let catalog = transport.fetch_active_events().await.unwrap();

    let ids: Vec<EventId> = catalog.iter().map(|d| d.id.clone()).collect();
    assert_eq!(ids, vec![EventId::from("e1"), EventId::from("e4")]);
}

#[tokio::test]
async fn test_null_catalog_is_empty() {
    let collector = Collector::default();
    let addr = start(collector.clone()).await;

    let transport = HttpTransport::new(&config_for(addr)).unwrap();

    assert!(transport.fetch_active_events().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_non_2xx_carries_status() {
    let collector = Collector::default();
    *collector.events_status.lock().unwrap() = Some(StatusCode::SERVICE_UNAVAILABLE);
    let addr = start(collector.clone()).await;

    let transport = HttpTransport::new(&config_for(addr)).unwrap();
    let err = transport.fetch_active_events().await.unwrap_err();

    assert_eq!(err.status(), Some(503));
}

#[tokio::test]
async fn test_unreachable_collector_is_an_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpTransport::new(&config_for(addr)).unwrap();
    let err = transport.fetch_active_events().await.unwrap_err();

    assert_eq!(err.status(), None);
}

#[tokio::test]
async fn test_tracker_posts_through_page_origin_with_cookies() {
    let collector = Collector::default();
    *collector.catalog.lock().unwrap() = json!([
        {"id": "e1", "name": "Thanks", "triggerType": "PAGE_VIEW", "triggerPayload": {"urlPattern": "/thanks"}}
    ]);
    let addr = start(collector.clone()).await;

    let origin = Url::parse(&format!("http://{}/", addr)).unwrap();
    let jar = Arc::new(Jar::default());
    jar.add_cookie_str("sid=abc", &origin);
    let page = Arc::new(
        BrowserPage::new(origin.join("/cart").unwrap())
            .with_referrer("https://search.test/")
            .with_cookie_jar(jar),
    );

    let tracker = BehaviorTracker::new(page.clone());
    let loaded = tracker
        .init(
            TrackerOverrides::new()
                .with_auto_refresh_ms(0)
                .with_token_provider(Credential::from_fn(|| Some("tok-9".to_string())))
                .with_user_id_provider(Credential::literal("u-1")),
        )
        .await;
    assert!(loaded);

    page.push_state("/thanks").unwrap();
    tracker.flush().await;

    let posts = collector.posts.lock().unwrap();
    assert_eq!(posts.len(), 1);
    let (headers, body) = &posts[0];
    assert_eq!(headers["authorization"], "Bearer tok-9");
    assert_eq!(headers["content-type"], "application/json");
    assert_eq!(headers["cookie"], "sid=abc");
    assert_eq!(body["eventId"], "e1");
    assert_eq!(body["eventName"], "Thanks");
    assert_eq!(body["triggerType"], "PAGE_VIEW");
    assert_eq!(body["pageUrl"], format!("http://{}/thanks", addr));
    assert_eq!(body["referrer"], "https://search.test/");
    assert_eq!(body["userId"], "u-1");
    assert!(body["occurredAt"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_deliver_non_2xx_is_status_error() {
    let app = Router::new().route(
        DEFAULT_COLLECT_ENDPOINT,
        post(|| async { StatusCode::BAD_REQUEST }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let transport = HttpTransport::new(&config_for(addr)).unwrap();
    let page = Arc::new(BrowserPage::open("https://shop.test/").unwrap());
    let tracker = BehaviorTracker::builder(page)
        .transport(Arc::new(transport))
        .build();
    tracker
        .init(TrackerOverrides::new().with_auto_refresh_ms(0))
        .await;

    let err = tracker
        .send_event(
            &EventDefinition::page_view("e1", "E1", None),
            EventProperties::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(400));
}
