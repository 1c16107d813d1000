use std::sync::Arc;

use axum::{body::Body, http::{Request, StatusCode}, Router};
use serde_json::Value;
use tower::ServiceExt;

use refbook::api::{create_router, AppState};
use refbook::config::{ApiKeyEntry, AuthConfig};
use refbook::fixtures::Fixtures;
use refbook::query::QueryService;
use refbook::storage::InMemoryStorage;

const MEDICAL: &str = r#"
    [[refbooks]]
    code = "RB1"
    name = "Medical Specialties"

    [[refbooks.versions]]
    version = "1.0"
    start_date = "2022-01-01"
    elements = [
        { code = "1", value = "Therapist" },
        { code = "2", value = "Orthopedist" },
    ]

    [[refbooks.versions]]
    version = "2.0"
    start_date = "2023-01-01"
    elements = [
        { code = "2", value = "Orthopedist V2" },
        { code = "1", value = "Therapist V2" },
    ]

    [[refbooks]]
    code = "RB9"
    name = "Not yet effective"

    [[refbooks.versions]]
    version = "1.0"
    start_date = "2999-01-01"
    elements = [{ code = "A", value = "Alpha" }]
"#;

fn setup_with_auth(auth: AuthConfig) -> Router {
    let storage = Arc::new(InMemoryStorage::new());
    Fixtures::parse(MEDICAL)
        .expect("Failed to parse fixtures")
        .load_into(storage.as_ref())
        .expect("Failed to load fixtures");
    let service = Arc::new(QueryService::new(storage));
    create_router(AppState::new(service), auth)
}

fn setup() -> Router {
    setup_with_auth(AuthConfig::default())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("Request failed");
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.expect("Failed to read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn refbook_id(app: &Router, code: &str) -> i64 {
    let (_, body) = get(app, "/refbooks").await;
    body["refbooks"].as_array().unwrap()
        .iter()
        .find(|r| r["code"] == code)
        .and_then(|r| r["id"].as_i64())
        .expect("refbook not listed")
}

#[tokio::test]
async fn test_get_refbooks_by_date() {
    let app = setup();
    let (status, body) = get(&app, "/refbooks?date=2022-10-01").await;
    assert_eq!(status, StatusCode::OK);
    let refbooks = body["refbooks"].as_array().unwrap();
    assert_eq!(refbooks.len(), 1);
    assert_eq!(refbooks[0]["code"], "RB1");
    assert_eq!(refbooks[0]["name"], "Medical Specialties");
    assert!(refbooks[0]["id"].is_i64());
}

#[tokio::test]
async fn test_get_refbooks_without_date() {
    let app = setup();
    let (status, body) = get(&app, "/refbooks").await;
    assert_eq!(status, StatusCode::OK);
    let codes: Vec<&str> = body["refbooks"].as_array().unwrap()
        .iter()
        .map(|r| r["code"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["RB1", "RB9"]);

    // an empty value is the same as no filter
    let (_, body) = get(&app, "/refbooks?date=").await;
    assert_eq!(body["refbooks"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_get_refbooks_malformed_date() {
    let app = setup();
    let (status, body) = get(&app, "/refbooks?date=01.10.2022").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("01.10.2022"));
}

#[tokio::test]
async fn test_get_elements_with_version() {
    let app = setup();
    let id = refbook_id(&app, "RB1").await;
    let (status, body) = get(&app, &format!("/refbooks/{}/elements?version=1.0", id)).await;
    assert_eq!(status, StatusCode::OK);
    let elements = body["elements"].as_array().unwrap();
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0]["code"], "1");
    assert_eq!(elements[0]["value"], "Therapist");
    assert_eq!(elements[1]["code"], "2");
    assert_eq!(elements[1]["value"], "Orthopedist");
}

#[tokio::test]
async fn test_get_elements_without_version() {
    let app = setup();
    let id = refbook_id(&app, "RB1").await;
    let (status, body) = get(&app, &format!("/refbooks/{}/elements", id)).await;
    assert_eq!(status, StatusCode::OK);
    let elements = body["elements"].as_array().unwrap();
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0]["code"], "1");
    assert_eq!(elements[0]["value"], "Therapist V2");
    assert_eq!(elements[1]["code"], "2");
    assert_eq!(elements[1]["value"], "Orthopedist V2");
}

#[tokio::test]
async fn test_get_elements_before_first_version_is_empty() {
    let app = setup();
    let id = refbook_id(&app, "RB9").await;
    let (status, body) = get(&app, &format!("/refbooks/{}/elements", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["elements"], serde_json::json!([]));

    // naming the future version still works
    let (status, body) = get(&app, &format!("/refbooks/{}/elements?version=1.0", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["elements"][0]["value"], "Alpha");
}

#[tokio::test]
async fn test_get_elements_not_found() {
    let app = setup();
    let id = refbook_id(&app, "RB1").await;

    let (status, body) = get(&app, "/refbooks/999/elements").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, _) = get(&app, &format!("/refbooks/{}/elements?version=7.0", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, "/refbooks/abc/elements").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_check_element_with_version() {
    let app = setup();
    let id = refbook_id(&app, "RB1").await;

    let (status, body) = get(&app, &format!("/refbooks/{}/check_element?code=1&value=Therapist&version=1.0", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    let (status, body) = get(&app, &format!("/refbooks/{}/check_element?code=1&value=Unknown&version=1.0", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn test_check_element_without_version() {
    let app = setup();
    let id = refbook_id(&app, "RB1").await;

    let (status, body) = get(&app, &format!("/refbooks/{}/check_element?code=1&value=Therapist%20V2", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    let (_, body) = get(&app, &format!("/refbooks/{}/check_element?code=1&value=Unknown", id)).await;
    assert_eq!(body["valid"], false);

    // the old value is no longer current
    let (_, body) = get(&app, &format!("/refbooks/{}/check_element?code=1&value=Therapist", id)).await;
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn test_check_element_errors() {
    let app = setup();
    let id = refbook_id(&app, "RB1").await;

    let (status, _) = get(&app, "/refbooks/999/check_element?code=1&value=Therapist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, &format!("/refbooks/{}/check_element?code=1&value=Therapist&version=0.1", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get(&app, &format!("/refbooks/{}/check_element?code=1", id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("value"));
}

#[tokio::test]
async fn test_health_and_metrics_are_public() {
    let app = setup_with_auth(AuthConfig {
        enabled: true,
        api_keys: vec![],
    });
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = get(&app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_api_key_auth() {
    let app = setup_with_auth(AuthConfig {
        enabled: true,
        api_keys: vec![ApiKeyEntry {
            name: "portal".to_string(),
            key: "s3cret".to_string(),
        }],
    });

    let (status, body) = get(&app, "/refbooks").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let request = Request::builder()
        .uri("/refbooks")
        .header("X-API-Key", "wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/refbooks?date=2022-10-01")
        .header("X-API-Key", "s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refbooks"][0]["code"], "RB1");

    let request = Request::builder()
        .uri("/refbooks")
        .header("Authorization", "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}
