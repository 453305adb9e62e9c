/// HTTP-level tests driving the router with `oneshot`
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use rust_organizer_api::config::Config;
use rust_organizer_api::handlers::{router, AppState};
use rust_organizer_api::memory_store::MemoryStore;
use rust_organizer_api::repository::Repository;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app_with(config: Config) -> Router {
    let store: Arc<dyn Repository> = Arc::new(MemoryStore::new());
    router(Arc::new(AppState::new(store, config, None)))
}

fn app() -> Router {
    app_with(Config::default())
}

fn request(method: &str, uri: &str, actor: Option<(&str, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = actor {
        builder = builder.header("x-actor-id", id).header("x-actor-role", role);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

const ORG1: Option<(&str, &str)> = Some(("ORG1", "ORGANIZER"));
const ADMIN: Option<(&str, &str)> = Some(("ADMIN1", "ADMIN"));

async fn register(app: &Router) {
    let (status, body) = send(
        app,
        request(
            "POST",
            "/api/v1/organizers",
            ORG1,
            Some(json!({"businessName": "Himalayan Treks", "contactEmail": "ops@himalayan.example"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send(&app(), request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_missing_actor_is_unauthorized() {
    let (status, body) = send(&app(), request("GET", "/api/v1/organizers/ORG1", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn test_unknown_role_is_unauthorized() {
    let (status, _) = send(
        &app(),
        request("GET", "/api/v1/organizers/ORG1", Some(("ORG1", "ROOT")), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_gateway_token_enforced() {
    let config = Config {
        gateway_token: Some("s3cret".to_string()),
        ..Config::default()
    };
    let app = app_with(config);

    let (status, _) = send(&app, request("GET", "/api/v1/organizers/ORG1", ADMIN, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/api/v1/organizers/ORG1")
        .header("x-gateway-token", "s3cret")
        .header("x-actor-id", "ADMIN1")
        .header("x-actor-role", "ADMIN")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_register_and_read_organizer() {
    let app = app();
    register(&app).await;

    let (status, body) = send(&app, request("GET", "/api/v1/organizers/ORG1", ORG1, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kycStatus"], "Pending");
    assert_eq!(body["leadCredits"]["available"], 0);

    let (status, _) = send(
        &app,
        request("GET", "/api/v1/organizers/ORG1", Some(("ORG2", "ORGANIZER")), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/organizers",
            ORG1,
            Some(json!({"businessName": "Again"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn test_admin_status_change() {
    let app = app();
    register(&app).await;

    let (status, _) = send(
        &app,
        request(
            "PATCH",
            "/api/v1/admin/organizers/status",
            ORG1,
            Some(json!({"organizerId": "ORG1", "newStatus": "Verified"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        request(
            "PATCH",
            "/api/v1/admin/organizers/status",
            ADMIN,
            Some(json!({"organizerId": "ORG1", "newStatus": "Bogus"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_status");

    let (status, body) = send(
        &app,
        request(
            "PATCH",
            "/api/v1/admin/organizers/status",
            ADMIN,
            Some(json!({"organizerId": "ORG1", "newStatus": "Verified"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kycStatus"], "Verified");

    let (status, body) = send(&app, request("GET", "/api/v1/admin/audit-logs?limit=10", ADMIN, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, request("GET", "/api/v1/admin/audit-logs", ORG1, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_submit_incomplete_profile() {
    let app = app();
    register(&app).await;

    let (status, body) = send(
        &app,
        request("POST", "/api/v1/organizers/ORG1/submit-verification", ORG1, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "incomplete_profile");

    let (status, body) = send(
        &app,
        request(
            "PUT",
            "/api/v1/organizers/ORG1/documents/passport",
            ORG1,
            Some(json!({"fileRef": "s3://kyc/passport.pdf"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "document_not_found");
}

#[tokio::test]
async fn test_purchase_trip_lead_and_unlock() {
    let app = app();
    register(&app).await;

    let (status, body) = send(&app, request("GET", "/api/v1/lead-packages", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (status, body) = send(
        &app,
        request("POST", "/api/v1/trips", ORG1, Some(json!({"title": "Hampta Pass", "destination": "Manali"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let trip_id = body["id"].as_str().unwrap().to_string();

    // Anonymous lead capture
    let (status, _) = send(
        &app,
        request(
            "POST",
            &format!("/api/v1/trips/{}/leads", trip_id),
            None,
            Some(json!({"name": "Asha Verma", "email": "asha.verma@example.com", "phone": "+91 98765 43210"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        request(
            "POST",
            &format!("/api/v1/trips/{}/leads", trip_id),
            None,
            Some(json!({"name": "Ravi", "email": "ravi-at-nowhere"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = send(&app, request("GET", "/api/v1/organizers/ORG1/leads", ORG1, None)).await;
    assert_eq!(status, StatusCode::OK);
    let lead = &body.as_array().unwrap()[0];
    assert_eq!(lead["email"], "a***@example.com");
    let lead_id = lead["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        request("POST", "/api/v1/leads/unlock", ORG1, Some(json!({"leadId": lead_id}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "insufficient_credits");

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/organizers/ORG1/credits/purchases",
            ORG1,
            Some(json!({"packageId": "starter"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["leadCredits"]["available"], 10);

    let (status, body) = send(
        &app,
        request("POST", "/api/v1/leads/unlock", ORG1, Some(json!({"leadId": lead_id}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["organizer"]["leadCredits"]["available"], 9);
    assert_eq!(body["leads"][0]["email"], "asha.verma@example.com");
    assert_eq!(body["leads"][0]["phone"], "+919876543210");

    let (status, body) = send(
        &app,
        request("POST", "/api/v1/leads/unlock", ORG1, Some(json!({"leadId": lead_id}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "already_unlocked");

    let (status, body) = send(&app, request("GET", "/api/v1/organizers/ORG1/credits", ORG1, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], 9);
}

#[tokio::test]
async fn test_capture_lead_unknown_trip() {
    let (status, body) = send(
        &app(),
        request(
            "POST",
            "/api/v1/trips/TRIP404/leads",
            None,
            Some(json!({"name": "Asha", "email": "asha@example.com"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}
