use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::realtime::RealtimeHub;
use crate::repository::{MockTenantSettingsReader, RepositoryError};
use crate::tests::fixtures::{endpoint, webhook_settings, MemoryStore};
use crate::tests::helpers::{fast_config, settings_reader, test_dispatcher};
use crate::webhooks::{
    verify_signature, DeliveryOutcome, DispatchError, DispatcherConfig, NetworkPolicy, EVENT_HEADER,
    SIGNATURE_HEADER,
};

const SECRET: &str = "whsec_test_4f1c";

fn payload() -> Value {
    json!({
        "order_id": "9b2f7a4e-1c1d-4a43-9d55-0e0a2b9c6f11",
        "order_number": "SO-1001",
        "total_amount": 249.9,
        "items": [{"sku": "TSHIRT-M", "qty": 2}]
    })
}

async fn target(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_successful_delivery_is_signed_and_recorded() {
    let server = target(200).await;
    let tenant_id = Uuid::new_v4();
    let url = format!("{}/hook", server.uri());
    let settings = webhook_settings(json!([endpoint(&url, SECRET, json!(["order.created"]))]));

    let store = MemoryStore::new();
    let dispatcher = test_dispatcher(settings_reader(tenant_id, Some(settings)), &store, fast_config(Duration::from_millis(5)));

    let reports = dispatcher
        .deliver(&CancellationToken::new(), tenant_id, "order.created", &payload())
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, DeliveryOutcome::Delivered { status: 200, attempts: 1 });

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.headers.get("content-type").unwrap(), "application/json");
    assert_eq!(request.headers.get(EVENT_HEADER).unwrap(), "order.created");

    let signature = request.headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
    assert!(verify_signature(SECRET, &request.body, signature));
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body, payload());

    let deliveries = store.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, "success");
    assert_eq!(deliveries[0].response_code, Some(200));
    assert_eq!(deliveries[0].url, url);
    assert_eq!(deliveries[0].event_type, "order.created");
    assert_eq!(deliveries[0].payload, payload());
    assert!(deliveries[0].error.is_none());
}

#[tokio::test]
async fn test_endpoints_filtered_by_event_subscription() {
    let specific = target(200).await;
    let wildcard = target(200).await;
    let inactive = target(200).await;
    let tenant_id = Uuid::new_v4();

    let mut disabled = endpoint(&format!("{}/hook", inactive.uri()), SECRET, json!("*"));
    disabled["active"] = json!(false);
    let settings = webhook_settings(json!([
        endpoint(&format!("{}/hook", specific.uri()), SECRET, json!(["order.created"])),
        endpoint(&format!("{}/hook", wildcard.uri()), SECRET, json!(["*"])),
        disabled,
    ]));

    let store = MemoryStore::new();
    let dispatcher = test_dispatcher(settings_reader(tenant_id, Some(settings)), &store, fast_config(Duration::from_millis(5)));
    let ctx = CancellationToken::new();

    let reports = dispatcher.deliver(&ctx, tenant_id, "order.updated", &payload()).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(specific.received_requests().await.unwrap().is_empty());
    assert_eq!(wildcard.received_requests().await.unwrap().len(), 1);

    let reports = dispatcher.deliver(&ctx, tenant_id, "order.created", &payload()).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.is_delivered()));
    assert_eq!(specific.received_requests().await.unwrap().len(), 1);
    assert_eq!(wildcard.received_requests().await.unwrap().len(), 2);

    assert!(inactive.received_requests().await.unwrap().is_empty());
    assert_eq!(store.deliveries().len(), 3);
}

#[tokio::test]
async fn test_retries_until_success_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let tenant_id = Uuid::new_v4();
    let settings = webhook_settings(json!([endpoint(&server.uri(), SECRET, json!(["*"]))]));
    let store = MemoryStore::new();
    let base = Duration::from_millis(10);
    let dispatcher = test_dispatcher(settings_reader(tenant_id, Some(settings)), &store, fast_config(base));

    let started = Instant::now();
    let reports = dispatcher
        .deliver(&CancellationToken::new(), tenant_id, "order.shipped", &payload())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(reports[0].outcome, DeliveryOutcome::Delivered { status: 200, attempts: 4 });
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
    // 1 + 4 + 16 units of backoff
    assert!(elapsed >= base * 21, "elapsed {:?}", elapsed);

    let deliveries = store.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, "success");
}

#[tokio::test]
async fn test_persistent_failure_records_once_after_last_attempt() {
    let server = target(500).await;
    let tenant_id = Uuid::new_v4();
    let settings = webhook_settings(json!([endpoint(&format!("{}/hook", server.uri()), SECRET, json!(["*"]))]));
    let store = MemoryStore::new();
    let dispatcher = test_dispatcher(settings_reader(tenant_id, Some(settings)), &store, fast_config(Duration::from_millis(2)));

    let reports = dispatcher
        .deliver(&CancellationToken::new(), tenant_id, "order.created", &payload())
        .await
        .unwrap();

    match &reports[0].outcome {
        DeliveryOutcome::Failed { response_code, attempts, .. } => {
            assert_eq!(*response_code, Some(500));
            assert_eq!(*attempts, 4);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 4);

    let deliveries = store.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, "failed");
    assert_eq!(deliveries[0].response_code, Some(500));
    assert!(deliveries[0].error.as_deref().unwrap().contains("500"));
}

#[tokio::test]
async fn test_private_addresses_never_reach_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let tenant_id = Uuid::new_v4();
    let settings = webhook_settings(json!([
        endpoint(&format!("{}/hook", server.uri()), SECRET, json!(["*"])),
        endpoint("http://10.0.0.1/hook", SECRET, json!(["*"])),
    ]));
    let store = MemoryStore::new();
    let config = DispatcherConfig {
        network: NetworkPolicy::strict(),
        ..fast_config(Duration::from_millis(1))
    };
    let dispatcher = test_dispatcher(settings_reader(tenant_id, Some(settings)), &store, config);

    let reports = dispatcher
        .deliver(&CancellationToken::new(), tenant_id, "order.created", &payload())
        .await
        .unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| !r.is_delivered()));

    let mut deliveries = store.deliveries();
    deliveries.sort_by(|a, b| a.url.cmp(&b.url));
    assert_eq!(deliveries.len(), 2);
    for delivery in &deliveries {
        assert_eq!(delivery.status, "failed");
        assert_eq!(delivery.response_code, None);
    }
    let errors: Vec<&str> = deliveries.iter().map(|d| d.error.as_deref().unwrap()).collect();
    assert!(errors.iter().any(|e| e.contains("10.0.0.1")));
    assert!(errors.iter().any(|e| e.contains("127.0.0.1")));
}

#[tokio::test]
async fn test_hostname_resolving_to_loopback_is_rejected_at_connect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let tenant_id = Uuid::new_v4();
    let url = format!("http://localhost:{}/hook", server.address().port());
    let settings = webhook_settings(json!([endpoint(&url, SECRET, json!(["order.created"]))]));
    let store = MemoryStore::new();
    let config = DispatcherConfig {
        network: NetworkPolicy::strict(),
        ..fast_config(Duration::from_millis(1))
    };
    let dispatcher = test_dispatcher(settings_reader(tenant_id, Some(settings)), &store, config);

    let reports = dispatcher
        .deliver(&CancellationToken::new(), tenant_id, "order.created", &payload())
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
    match &reports[0].outcome {
        DeliveryOutcome::Failed { response_code, error, attempts } => {
            assert_eq!(*response_code, None);
            assert_eq!(*attempts, 4);
            assert!(error.contains("127.0.0.1"), "unexpected error: {error}");
        }
        other => panic!("expected a failed delivery, got {other:?}"),
    }
    assert!(server.received_requests().await.unwrap().is_empty());

    let deliveries = store.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, "failed");
    assert_eq!(deliveries[0].url, url);
    assert!(deliveries[0].error.as_deref().unwrap().contains("127.0.0.1"));
}

#[tokio::test]
async fn test_cancellation_during_backoff_persists_nothing() {
    let server = target(503).await;
    let tenant_id = Uuid::new_v4();
    let settings = webhook_settings(json!([endpoint(&format!("{}/hook", server.uri()), SECRET, json!(["*"]))]));
    let store = MemoryStore::new();
    let dispatcher = test_dispatcher(settings_reader(tenant_id, Some(settings)), &store, fast_config(Duration::from_secs(30)));

    let ctx = CancellationToken::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let reports = dispatcher
        .deliver(&ctx, tenant_id, "order.created", &payload())
        .await
        .unwrap();
    assert_eq!(reports[0].outcome, DeliveryOutcome::Cancelled { attempts: 1 });
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert!(store.deliveries().is_empty());
}

#[tokio::test]
async fn test_broadcast_happens_before_delivery_even_without_endpoints() {
    let tenant_id = Uuid::new_v4();
    let hub = RealtimeHub::new(16);
    let mut subscription = hub.subscribe_tenant(tenant_id);
    let store = MemoryStore::new();
    let dispatcher = test_dispatcher(settings_reader(tenant_id, None), &store, fast_config(Duration::from_millis(1)))
        .with_broadcaster(Arc::new(hub.clone()));

    let reports = dispatcher
        .deliver(&CancellationToken::new(), tenant_id, "return.created", &payload())
        .await
        .unwrap();
    assert!(reports.is_empty());

    let message = subscription.recv().await.unwrap();
    assert_eq!(message.event_type, "return.created");
    assert_eq!(message.payload, payload());
    assert!(store.deliveries().is_empty());
}

#[tokio::test]
async fn test_malformed_settings_are_skipped() {
    let tenant_id = Uuid::new_v4();
    let settings = json!({"webhooks": {"endpoints": {"url": "https://hooks.example.com"}}});
    let store = MemoryStore::new();
    let dispatcher = test_dispatcher(settings_reader(tenant_id, Some(settings)), &store, fast_config(Duration::from_millis(1)));

    let reports = dispatcher
        .deliver(&CancellationToken::new(), tenant_id, "order.created", &payload())
        .await
        .unwrap();
    assert!(reports.is_empty());
    assert!(store.deliveries().is_empty());
}

#[tokio::test]
async fn test_settings_failure_is_reported() {
    let mut reader = MockTenantSettingsReader::new();
    reader
        .expect_tenant_settings()
        .returning(|_| Err(RepositoryError::Unavailable("tenants table locked".to_string())));
    let store = MemoryStore::new();
    let dispatcher = test_dispatcher(reader, &store, fast_config(Duration::from_millis(1)));

    let err = dispatcher
        .deliver(&CancellationToken::new(), Uuid::new_v4(), "order.created", &payload())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Settings(_)));
}

#[tokio::test]
async fn test_dispatch_runs_detached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_exists(SIGNATURE_HEADER))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let tenant_id = Uuid::new_v4();
    let settings = webhook_settings(json!([endpoint(&server.uri(), SECRET, json!("*"))]));
    let store = MemoryStore::new();
    let dispatcher = test_dispatcher(settings_reader(tenant_id, Some(settings)), &store, fast_config(Duration::from_millis(1)));

    dispatcher.dispatch(tenant_id, "invoice.created", &payload());
    dispatcher.drain().await;

    let deliveries = store.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].response_code, Some(204));
}
