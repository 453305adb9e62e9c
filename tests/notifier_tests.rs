/// Notification relay tests against a mocked webhook
use rust_organizer_api::models::AdminNotification;
use rust_organizer_api::notifier::{relay_circuit_breaker, NotificationRelay, NotificationSink};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn notification() -> AdminNotification {
    AdminNotification::new(
        "ORG1",
        "verification_requested",
        "Himalayan Treks (ORG1) submitted their profile for verification",
    )
}

#[tokio::test]
async fn test_deliver_posts_notification_json() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/admin"))
        .and(body_partial_json(serde_json::json!({
            "organizerId": "ORG1",
            "kind": "verification_requested"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let relay = NotificationRelay::new(
        format!("{}/hooks/admin", mock_server.uri()),
        relay_circuit_breaker(),
    )
    .unwrap();

    relay.deliver(&notification()).await.unwrap();
}

#[tokio::test]
async fn test_deliver_reports_webhook_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/admin"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let relay = NotificationRelay::new(
        format!("{}/hooks/admin", mock_server.uri()),
        relay_circuit_breaker(),
    )
    .unwrap();

    let err = relay.deliver(&notification()).await.unwrap_err();
    assert_eq!(err.code(), "external_api_error");
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_dispatch_sends_in_background() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/admin"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;

    let relay = NotificationRelay::new(
        format!("{}/hooks/admin", mock_server.uri()),
        relay_circuit_breaker(),
    )
    .unwrap();

    relay.dispatch(notification());
    relay.dispatch(notification());

    // Wait for the spawned deliveries
    for _ in 0..50 {
        if mock_server.received_requests().await.map_or(0, |r| r.len()) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_open_circuit_drops_notifications() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let relay = NotificationRelay::new(
        format!("{}/hooks/admin", mock_server.uri()),
        relay_circuit_breaker(),
    )
    .unwrap();

    // Five consecutive failures open the breaker
    for _ in 0..5 {
        relay.dispatch(notification());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    for _ in 0..50 {
        if mock_server.received_requests().await.map_or(0, |r| r.len()) >= 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    relay.dispatch(notification());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 5);
}
