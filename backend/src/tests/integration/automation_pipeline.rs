use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::automation::{event_types, ActionOutcome, Event, EventSummary};
use crate::tests::fixtures::{never_matching_rule, rule, webhook_rule, MemoryStore};
use crate::tests::helpers::test_engine;

fn order_event(tenant_id: Uuid) -> Event {
    Event::order_created(tenant_id, Uuid::new_v4(), "SO-1001", "new", 249.9, "shopify")
}

fn outcomes(value: &Value) -> Vec<ActionOutcome> {
    serde_json::from_value(value.clone()).unwrap()
}

#[tokio::test]
async fn test_matching_rule_posts_webhook_and_logs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/automation"))
        .and(header("user-agent", "OpenOMS-Automation/1.0"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let tenant_id = Uuid::new_v4();
    let r = webhook_rule(tenant_id, event_types::ORDER_CREATED, &format!("{}/automation", server.uri()));
    let rule_id = r.id;
    let store = MemoryStore::with_rules(vec![r]);
    let engine = test_engine(&store);

    let event = order_event(tenant_id);
    engine.process_event(event.clone());
    engine.drain().await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["event"], "order.created");
    assert_eq!(body["tenant_id"], json!(tenant_id));
    assert_eq!(body["entity_type"], "order");
    assert_eq!(body["entity_id"], json!(event.entity_id));
    assert_eq!(body["data"]["order_number"], "SO-1001");
    let fired_at = body["fired_at"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(fired_at).is_ok());
    assert!(fired_at.ends_with('Z'));

    let logs = store.logs_for(rule_id);
    assert_eq!(logs.len(), 1);
    assert!(logs[0].conditions_met);
    assert!(logs[0].error_message.is_none());
    assert_eq!(logs[0].entity_id, event.entity_id);
    let executed = outcomes(&logs[0].actions_executed);
    assert_eq!(executed.len(), 1);
    assert!(executed[0].success);
    assert_eq!(executed[0].action_type, "webhook");

    let stored = store.rule(rule_id);
    assert_eq!(stored.fire_count, 1);
    assert!(stored.last_fired_at.is_some());
}

#[tokio::test]
async fn test_unmatched_rule_still_logs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let tenant_id = Uuid::new_v4();
    let r = never_matching_rule(tenant_id, event_types::ORDER_CREATED, &server.uri());
    let rule_id = r.id;
    let store = MemoryStore::with_rules(vec![r]);
    let engine = test_engine(&store);

    let summary = engine
        .run_event(&CancellationToken::new(), &order_event(tenant_id))
        .await
        .unwrap();
    assert_eq!(
        summary,
        EventSummary {
            rules_evaluated: 1,
            rules_fired: 0,
            actions_failed: 0
        }
    );

    let logs = store.logs_for(rule_id);
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].conditions_met);
    assert_eq!(logs[0].actions_executed, json!([]));
    assert_eq!(store.rule(rule_id).fire_count, 0);
}

#[tokio::test]
async fn test_action_failures_do_not_short_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let tenant_id = Uuid::new_v4();
    let r = rule(
        tenant_id,
        event_types::ORDER_CREATED,
        json!([{"field": "total_amount", "operator": "gt", "value": 100}]),
        json!([
            {"type": "send_fax", "params": {"to": "+49 30 1234"}},
            {"type": "add_tag", "params": {"tag": "vip"}},
            {"type": "webhook", "params": {"url": server.uri()}}
        ]),
    );
    let rule_id = r.id;
    let store = MemoryStore::with_rules(vec![r]);
    let engine = test_engine(&store);

    let summary = engine
        .run_event(&CancellationToken::new(), &order_event(tenant_id))
        .await
        .unwrap();
    assert_eq!(summary.rules_fired, 1);
    assert_eq!(summary.actions_failed, 2);

    let logs = store.logs_for(rule_id);
    assert_eq!(logs.len(), 1);
    let executed = outcomes(&logs[0].actions_executed);
    let types: Vec<&str> = executed.iter().map(|o| o.action_type.as_str()).collect();
    assert_eq!(types, ["send_fax", "add_tag", "webhook"]);
    assert!(!executed[0].success);
    assert!(executed[0].error.as_deref().unwrap().contains("send_fax"));
    assert!(executed[1].success);
    assert!(!executed[2].success);

    // Top-level message carries the last failure only.
    let message = logs[0].error_message.as_deref().unwrap();
    assert!(message.contains("500"));
    assert_eq!(store.rule(rule_id).fire_count, 1);
}

#[tokio::test]
async fn test_only_rules_for_event_and_tenant_are_evaluated() {
    let tenant_id = Uuid::new_v4();
    let other_tenant = Uuid::new_v4();

    let tagging = rule(
        tenant_id,
        event_types::ORDER_CREATED,
        json!([{"field": "channel", "operator": "in", "value": ["shopify", "amazon"]}]),
        json!([{"type": "add_tag", "params": {"tag": "marketplace"}}]),
    );
    let shipped = rule(tenant_id, event_types::ORDER_SHIPPED, json!([]), json!([]));
    let foreign = rule(other_tenant, event_types::ORDER_CREATED, json!([]), json!([]));
    let mut disabled = rule(tenant_id, event_types::ORDER_CREATED, json!([]), json!([]));
    disabled.enabled = false;

    let ids = [tagging.id, shipped.id, foreign.id, disabled.id];
    let store = MemoryStore::with_rules(vec![tagging, shipped, foreign, disabled]);
    let engine = test_engine(&store);

    let summary = engine
        .run_event(&CancellationToken::new(), &order_event(tenant_id))
        .await
        .unwrap();
    assert_eq!(summary.rules_evaluated, 1);
    assert_eq!(summary.rules_fired, 1);

    assert_eq!(store.logs_for(ids[0]).len(), 1);
    for id in &ids[1..] {
        assert!(store.logs_for(*id).is_empty());
        assert_eq!(store.rule(*id).fire_count, 0);
    }
}

#[tokio::test]
async fn test_malformed_rule_is_logged_and_skipped() {
    let tenant_id = Uuid::new_v4();
    let broken = rule(
        tenant_id,
        event_types::ORDER_CREATED,
        json!({"field": "status", "operator": "eq"}),
        json!([]),
    );
    let healthy = rule(
        tenant_id,
        event_types::ORDER_CREATED,
        json!([{"field": "status", "operator": "eq", "value": "new"}]),
        json!([{"type": "set_status", "params": {"status": "confirmed"}}]),
    );
    let (broken_id, healthy_id) = (broken.id, healthy.id);
    let store = MemoryStore::with_rules(vec![broken, healthy]);
    let engine = test_engine(&store);

    let summary = engine
        .run_event(&CancellationToken::new(), &order_event(tenant_id))
        .await
        .unwrap();
    assert_eq!(summary.rules_evaluated, 2);
    assert_eq!(summary.rules_fired, 1);

    let broken_logs = store.logs_for(broken_id);
    assert_eq!(broken_logs.len(), 1);
    assert!(!broken_logs[0].conditions_met);
    assert!(broken_logs[0].error_message.as_deref().unwrap().contains("invalid conditions"));
    assert_eq!(store.rule(broken_id).fire_count, 0);

    assert_eq!(store.rule(healthy_id).fire_count, 1);
}

#[tokio::test]
async fn test_repository_failure_rolls_back_batch() {
    let tenant_id = Uuid::new_v4();
    let r = rule(tenant_id, event_types::ORDER_CREATED, json!([]), json!([]));
    let rule_id = r.id;
    let store = MemoryStore::with_rules(vec![r]);
    store.fail_log_writes();
    let engine = test_engine(&store);

    let result = engine
        .run_event(&CancellationToken::new(), &order_event(tenant_id))
        .await;
    assert!(result.is_err());
    assert_eq!(store.rollbacks(), 1);
    assert_eq!(store.commits(), 0);
    assert!(store.logs().is_empty());
    assert_eq!(store.rule(rule_id).fire_count, 0);
}

#[tokio::test]
async fn test_process_event_swallows_errors() {
    let tenant_id = Uuid::new_v4();
    let store = MemoryStore::with_rules(vec![rule(tenant_id, event_types::ORDER_CREATED, json!([]), json!([]))]);
    store.fail_log_writes();
    let engine = test_engine(&store);

    engine.process_event(order_event(tenant_id));
    engine.drain().await;

    assert_eq!(store.rollbacks(), 1);
}

#[tokio::test]
async fn test_higher_priority_rules_are_logged_first() {
    let tenant_id = Uuid::new_v4();
    let low = rule(tenant_id, event_types::ORDER_CREATED, json!([]), json!([]));
    let mut high = rule(tenant_id, event_types::ORDER_CREATED, json!([]), json!([]));
    high.priority = 10;
    let (low_id, high_id) = (low.id, high.id);
    let store = MemoryStore::with_rules(vec![low, high]);
    let engine = test_engine(&store);

    engine
        .run_event(&CancellationToken::new(), &order_event(tenant_id))
        .await
        .unwrap();

    let order: Vec<Uuid> = store.logs().iter().map(|l| l.rule_id).collect();
    assert_eq!(order, vec![high_id, low_id]);
}
