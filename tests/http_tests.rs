// Integration tests for the status API

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{destination, FakeGateway, RecordingDelivery, SharedGateway};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use voice_archiver::audio::RawEncoder;
use voice_archiver::config::{ChannelConfig, RecorderConfig};
use voice_archiver::{create_router, AppState, DeliveryRegistry, SessionDeps, SessionRegistry};

fn channel(id: &str, kind: &str) -> ChannelConfig {
    ChannelConfig {
        id: id.to_string(),
        time_zone: "UTC".to_string(),
        segment_interval_secs: 60,
        ignored_speakers: Vec::new(),
        destinations: vec![destination(kind, "d", true, false)],
    }
}

fn registry(dir: &TempDir, fake: &Arc<FakeGateway>) -> Arc<SessionRegistry> {
    let mut deliveries = DeliveryRegistry::new();
    deliveries.register("fake", RecordingDelivery::new());

    let recorder = RecorderConfig {
        work_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let deps = SessionDeps {
        gateway: Arc::new(SharedGateway(fake.clone())),
        encoder: Arc::new(RawEncoder),
        deliveries,
    };

    Arc::new(SessionRegistry::start(
        &[
            channel("100", "fake"),
            channel("200", "fake"),
            // Duplicate, unknown delivery type and escaping id are skipped
            channel("100", "fake"),
            channel("300", "missing"),
            channel("..", "fake"),
        ],
        &recorder,
        deps,
    ))
}

async fn get(registry: &Arc<SessionRegistry>, uri: &str) -> (StatusCode, serde_json::Value) {
    let app = create_router(AppState::new(Arc::clone(registry)));
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_registry_skips_bad_channels() {
    let dir = TempDir::new().unwrap();
    let fake = FakeGateway::new();
    let registry = registry(&dir, &fake);

    assert_eq!(registry.channel_ids(), vec!["100", "200"]);
    assert!(registry.stats("300").is_none());
    assert!(registry.stats("..").is_none());

    fake.wait_for_joins(2).await;
    registry.shutdown().await;
    // Idempotent
    registry.shutdown().await;

    for stats in registry.all_stats() {
        assert_eq!(stats.state, "stopped");
    }
    assert_eq!(fake.leaves().len(), 2);
    assert!(dir.path().exists());
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = TempDir::new().unwrap();
    let fake = FakeGateway::new();
    let registry = registry(&dir, &fake);

    let (status, _) = get(&registry, "/health").await;
    assert_eq!(status, StatusCode::OK);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_channel_endpoints() {
    let dir = TempDir::new().unwrap();
    let fake = FakeGateway::new();
    let registry = registry(&dir, &fake);

    let (status, json) = get(&registry, "/channels").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["channels"].as_array().unwrap().len(), 2);

    let (status, json) = get(&registry, "/channels/200/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["channel_id"], "200");

    let (status, json) = get(&registry, "/channels/999/status").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("999"));

    registry.shutdown().await;
}
