use std::sync::Arc;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt;
use serde_json::{json, Value};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wiremock::matchers::{body_partial_json, method, path, query_param, query_param_is_missing};
use uuid::Uuid;

use scheduling_cell::router::time_slot_routes;
use scheduling_cell::models::{BookSlotRequest, GenerateSlotsRequest, ReleaseSlotRequest};
use shared_config::AppConfig;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn create_test_app(config: AppConfig) -> Router {
    time_slot_routes(Arc::new(config))
}

fn mock_config(mock_server: &MockServer) -> AppConfig {
    let mut config = TestConfig::default().to_app_config();
    config.supabase_url = mock_server.uri();
    config
}

fn slot_row(slot_id: &str, date: &str, start: &str, end: &str, status: &str) -> Value {
    MockSupabaseResponses::time_slot_response(slot_id, date, start, end, status)
}

fn booked_slot_row(slot_id: &str, appointment_id: &str) -> Value {
    let mut row = slot_row(slot_id, "2024-06-10", "09:00", "09:30", "booked");
    row["appointment_id"] = json!(appointment_id);
    row
}

fn get_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn post_request<T: serde::Serialize>(uri: &str, token: &str, body: &T) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

fn put_request<T: serde::Serialize>(uri: &str, token: &str, body: &T) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

// ==============================================================================
// AUTHENTICATION
// ==============================================================================

#[tokio::test]
async fn available_slots_require_a_token() {
    let mock_server = MockServer::start().await;
    let app = create_test_app(mock_config(&mock_server));

    let request = Request::builder()
        .method("GET")
        .uri("/available?date=2024-06-10")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_tokens_are_rejected() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let user = TestUser::client("client@example.com");
    let token = JwtTestUtils::create_expired_token(&user, &config.supabase_jwt_secret);

    let response = app
        .oneshot(get_request("/available?date=2024-06-10", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ==============================================================================
// AVAILABILITY LISTING
// ==============================================================================

#[tokio::test]
async fn lists_available_slots_for_a_day() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let user = TestUser::client("client@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.supabase_jwt_secret, Some(24));

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("slot_date", "eq.2024-06-10"))
        .and(query_param("status", "eq.available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&Uuid::new_v4().to_string(), "2024-06-10", "09:00", "09:30", "available"),
            slot_row(&Uuid::new_v4().to_string(), "2024-06-10", "09:30", "10:00", "available"),
        ])))
        .mount(&mock_server)
        .await;

    let response = app
        .oneshot(get_request("/available?date=2024-06-10", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["count"], json!(2));
    assert_eq!(body["slots"][0]["start_time"], json!("09:00"));
    assert_eq!(body["slots"][1]["start_time"], json!("09:30"));
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[tokio::test]
async fn books_an_available_slot_and_confirms_the_appointment() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let user = TestUser::client("client@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&slot_id, "2024-06-10", "09:00", "09:30", "available"),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(&appointment_id, &user.id, "pending"),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("status", "eq.available"))
        .and(body_partial_json(json!({"status": "booked"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            booked_slot_row(&slot_id, &appointment_id),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut confirmed = MockSupabaseResponses::appointment_response(&appointment_id, &user.id, "confirmed");
    confirmed["appointment_date"] = json!("2024-06-10");
    confirmed["start_time"] = json!("09:00");
    confirmed["end_time"] = json!("09:30");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({"status": "confirmed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([confirmed])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request_body = BookSlotRequest {
        time_slot_id: Uuid::parse_str(&slot_id).unwrap(),
        appointment_id: Uuid::parse_str(&appointment_id).unwrap(),
    };

    let response = app
        .oneshot(post_request("/book", &token, &request_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["time_slot"]["status"], json!("booked"));
    assert_eq!(body["appointment"]["status"], json!("confirmed"));
    assert_eq!(body["appointment"]["start_time"], json!("09:00"));
}

#[tokio::test]
async fn booking_a_booked_slot_conflicts() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let user = TestUser::client("client@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            booked_slot_row(&slot_id, &Uuid::new_v4().to_string()),
        ])))
        .mount(&mock_server)
        .await;

    let request_body = BookSlotRequest {
        time_slot_id: Uuid::parse_str(&slot_id).unwrap(),
        appointment_id: Uuid::new_v4(),
    };

    let response = app
        .oneshot(post_request("/book", &token, &request_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = response_json(response).await;
    assert_eq!(body["error"], json!("This time slot is already booked"));
}

#[tokio::test]
async fn concurrent_bookings_produce_exactly_one_winner() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let user = TestUser::client("client@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();

    // Every caller sees the slot as still available...
    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&slot_id, "2024-06-10", "09:00", "09:30", "available"),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(&appointment_id, &user.id, "pending"),
        ])))
        .mount(&mock_server)
        .await;

    // ...but the conditional claim hands a row to the first caller only.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("status", "eq.available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            booked_slot_row(&slot_id, &appointment_id),
        ])))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("status", "eq.available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(&appointment_id, &user.id, "confirmed"),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let app = app.clone();
        let token = token.clone();
        let slot_id = slot_id.clone();
        let appointment_id = appointment_id.clone();

        handles.push(tokio::spawn(async move {
            let request_body = BookSlotRequest {
                time_slot_id: Uuid::parse_str(&slot_id).unwrap(),
                appointment_id: Uuid::parse_str(&appointment_id).unwrap(),
            };
            let response = app
                .oneshot(post_request("/book", &token, &request_body))
                .await
                .unwrap();
            response.status()
        }));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => winners += 1,
            StatusCode::CONFLICT => conflicts += 1,
            other => panic!("unexpected status {}", other),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(conflicts, 4);
}

// ==============================================================================
// RELEASE
// ==============================================================================

#[tokio::test]
async fn releasing_a_booked_slot_frees_it_and_cancels_the_appointment() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();
    let client_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            booked_slot_row(&slot_id, &appointment_id),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("status", "eq.booked"))
        .and(body_partial_json(json!({"status": "available"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&slot_id, "2024-06-10", "09:00", "09:30", "available"),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(&appointment_id, &client_id, "confirmed"),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({"status": "cancelled"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request_body = ReleaseSlotRequest {
        time_slot_id: Uuid::parse_str(&slot_id).unwrap(),
    };

    let response = app
        .oneshot(post_request("/release", &token, &request_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["time_slot"]["status"], json!("available"));
    assert_eq!(body["time_slot"]["appointment_id"], Value::Null);
}

#[tokio::test]
async fn releasing_an_available_slot_is_a_bad_request() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&slot_id, "2024-06-10", "09:00", "09:30", "available"),
        ])))
        .mount(&mock_server)
        .await;

    let request_body = ReleaseSlotRequest {
        time_slot_id: Uuid::parse_str(&slot_id).unwrap(),
    };

    let response = app
        .oneshot(post_request("/release", &token, &request_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn release_requires_the_admin_role() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let user = TestUser::client("client@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.supabase_jwt_secret, Some(24));

    let request_body = ReleaseSlotRequest { time_slot_id: Uuid::new_v4() };

    let response = app
        .oneshot(post_request("/release", &token, &request_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ==============================================================================
// GENERATION
// ==============================================================================

fn generated_day(service_id: &str) -> Vec<Value> {
    let windows = [
        ("09:00", "10:00"), ("10:00", "11:00"), ("11:00", "12:00"), ("12:00", "13:00"),
        ("13:00", "14:00"), ("14:00", "15:00"), ("15:00", "16:00"), ("16:00", "17:00"),
    ];

    windows
        .iter()
        .map(|(start, end)| {
            let mut row = slot_row(&Uuid::new_v4().to_string(), "2024-07-01", start, end, "available");
            row["service_id"] = json!(service_id);
            row
        })
        .collect()
}

#[tokio::test]
async fn generation_is_idempotent_across_reruns() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let service_id = Uuid::new_v4().to_string();
    let day = generated_day(&service_id);

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .and(query_param("id", format!("eq.{}", service_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::service_response(&service_id, 60),
        ])))
        .mount(&mock_server)
        .await;

    // First run sees an empty calendar, the rerun sees its own output.
    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("slot_date", "eq.2024-07-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("slot_date", "eq.2024-07-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(day.clone())))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!(day)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request_body = GenerateSlotsRequest {
        service_id: Uuid::parse_str(&service_id).unwrap(),
        date: chrono::NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
        start_time: None,
        end_time: None,
    };

    let first = app
        .clone()
        .oneshot(post_request("/generate", &token, &request_body))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first_body = response_json(first).await;
    assert_eq!(first_body["created"], json!(8));
    assert_eq!(first_body["skipped"], json!(0));

    let second = app
        .oneshot(post_request("/generate", &token, &request_body))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second_body = response_json(second).await;
    assert_eq!(second_body["created"], json!(0));
    assert_eq!(second_body["skipped"], json!(8));
}

#[tokio::test]
async fn generating_for_an_unknown_service_is_not_found() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let service_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let request_body = GenerateSlotsRequest {
        service_id,
        date: chrono::NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
        start_time: None,
        end_time: None,
    };

    let response = app
        .oneshot(post_request("/generate", &token, &request_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn generation_skips_candidates_overlapping_other_services() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let first_service = Uuid::new_v4().to_string();
    let second_service = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .and(query_param("id", format!("eq.{}", second_service)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::service_response(&second_service, 45),
        ])))
        .mount(&mock_server)
        .await;

    // The standing 09:00-09:30 slot belongs to a different service;
    // the existing-slot scan must see the whole day, unscoped.
    let mut standing = slot_row(&Uuid::new_v4().to_string(), "2024-07-01", "09:00", "09:30", "available");
    standing["service_id"] = json!(first_service);
    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("slot_date", "eq.2024-07-01"))
        .and(query_param_is_missing("or"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([standing])))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Of the 45-minute grid 09:00-09:45 / 09:45-10:30, only the
    // second window clears the standing slot.
    let mut inserted = slot_row(&Uuid::new_v4().to_string(), "2024-07-01", "09:45", "10:30", "available");
    inserted["service_id"] = json!(second_service.clone());
    Mock::given(method("POST"))
        .and(path("/rest/v1/time_slots"))
        .and(body_partial_json(json!([{"start_time": "09:45", "end_time": "10:30"}])))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([inserted])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request_body = GenerateSlotsRequest {
        service_id: Uuid::parse_str(&second_service).unwrap(),
        date: chrono::NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
        start_time: Some(chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
        end_time: Some(chrono::NaiveTime::from_hms_opt(10, 30, 0).unwrap()),
    };

    let response = app
        .oneshot(post_request("/generate", &token, &request_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["created"], json!(1));
    assert_eq!(body["skipped"], json!(1));
}

#[tokio::test]
async fn a_window_too_small_for_the_service_generates_nothing() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let service_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .and(query_param("id", format!("eq.{}", service_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::service_response(&service_id, 90),
        ])))
        .mount(&mock_server)
        .await;

    let request_body = GenerateSlotsRequest {
        service_id: Uuid::parse_str(&service_id).unwrap(),
        date: chrono::NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
        start_time: Some(chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
        end_time: Some(chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap()),
    };

    let response = app
        .oneshot(post_request("/generate", &token, &request_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["created"], json!(0));
    assert_eq!(body["skipped"], json!(0));
}

#[tokio::test]
async fn range_generation_carries_on_past_services_that_do_not_fit() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let short_service = Uuid::new_v4().to_string();
    let long_service = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .and(query_param("is_active", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::service_response(&short_service, 30),
            MockSupabaseResponses::service_response(&long_service, 90),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .and(query_param("id", format!("eq.{}", short_service)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::service_response(&short_service, 30),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/services"))
        .and(query_param("id", format!("eq.{}", long_service)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::service_response(&long_service, 90),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("slot_date", "eq.2024-07-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let mut first = slot_row(&Uuid::new_v4().to_string(), "2024-07-01", "09:00", "09:30", "available");
    first["service_id"] = json!(short_service.clone());
    let mut second = slot_row(&Uuid::new_v4().to_string(), "2024-07-01", "09:30", "10:00", "available");
    second["service_id"] = json!(short_service.clone());

    // Only the 30-minute service fits the one-hour window; the
    // 90-minute service contributes nothing and must not abort the run.
    Mock::given(method("POST"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([first, second])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = app
        .oneshot(post_request(
            "/generate-all",
            &token,
            &json!({
                "start_date": "2024-07-01",
                "end_date": "2024-07-01",
                "start_time": "09:00",
                "end_time": "10:00",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["created"], json!(2));
    assert_eq!(body["skipped"], json!(0));
}

// ==============================================================================
// AD-HOC SLOT MANAGEMENT
// ==============================================================================

#[tokio::test]
async fn creating_a_duplicate_slot_conflicts() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("slot_date", "eq.2024-06-10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&Uuid::new_v4().to_string(), "2024-06-10", "09:00", "09:30", "available"),
        ])))
        .mount(&mock_server)
        .await;

    let response = app
        .oneshot(post_request(
            "/",
            &token,
            &json!({
                "slot_date": "2024-06-10",
                "start_time": "09:00",
                "end_time": "09:30",
                "service_id": null,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = response_json(response).await;
    assert_eq!(body["error"], json!("An identical time slot already exists"));
}

#[tokio::test]
async fn creating_a_slot_overlapping_another_service_is_rejected() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    // Another service already holds 09:00-09:30 that day.
    let mut standing = slot_row(&Uuid::new_v4().to_string(), "2024-06-10", "09:00", "09:30", "available");
    standing["service_id"] = json!(Uuid::new_v4().to_string());

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("slot_date", "eq.2024-06-10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([standing])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let response = app
        .oneshot(post_request(
            "/",
            &token,
            &json!({
                "slot_date": "2024-06-10",
                "start_time": "09:15",
                "end_time": "09:45",
                "service_id": Uuid::new_v4().to_string(),
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = response_json(response).await;
    assert_eq!(body["error"], json!("Time slot overlaps an existing slot"));
}

#[tokio::test]
async fn slot_management_requires_the_admin_role() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let user = TestUser::client("client@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.supabase_jwt_secret, Some(24));

    let response = app
        .oneshot(post_request(
            "/",
            &token,
            &json!({
                "slot_date": "2024-06-10",
                "start_time": "09:00",
                "end_time": "09:30",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn deleting_a_booked_slot_is_rejected() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            booked_slot_row(&slot_id, &Uuid::new_v4().to_string()),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&mock_server)
        .await;

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/{}", slot_id))
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rescheduling_a_booked_slot_is_rejected() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            booked_slot_row(&slot_id, &Uuid::new_v4().to_string()),
        ])))
        .mount(&mock_server)
        .await;

    let request = Request::builder()
        .method("PUT")
        .uri(format!("/{}", slot_id))
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_string(&json!({"start_time": "11:00", "end_time": "11:30"})).unwrap(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reschedules_an_available_slot() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&slot_id, "2024-06-10", "09:00", "09:30", "available"),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("slot_date", "eq.2024-06-10"))
        .and(query_param("id", format!("neq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    // The write only lands while the slot is still available.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("status", "eq.available"))
        .and(body_partial_json(json!({"start_time": "11:00"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&slot_id, "2024-06-10", "11:00", "11:30", "available"),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = app
        .oneshot(put_request(
            &format!("/{}", slot_id),
            &token,
            &json!({"start_time": "11:00", "end_time": "11:30"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["time_slot"]["start_time"], json!("11:00"));
}

#[tokio::test]
async fn rescheduling_loses_to_a_concurrent_booking() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&slot_id, "2024-06-10", "09:00", "09:30", "available"),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("slot_date", "eq.2024-06-10"))
        .and(query_param("id", format!("neq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    // A booking slipped in after the read; the filtered PATCH matches
    // no rows.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("status", "eq.available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = app
        .oneshot(put_request(
            &format!("/{}", slot_id),
            &token,
            &json!({"start_time": "11:00", "end_time": "11:30"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response_json(response).await;
    assert_eq!(body["error"], json!("Cannot reschedule a booked time slot"));
}

#[tokio::test]
async fn rescheduling_into_an_occupied_window_is_rejected() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&slot_id, "2024-06-10", "11:00", "11:30", "available"),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("slot_date", "eq.2024-06-10"))
        .and(query_param("id", format!("neq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&Uuid::new_v4().to_string(), "2024-06-10", "09:00", "09:30", "available"),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let response = app
        .oneshot(put_request(
            &format!("/{}", slot_id),
            &token,
            &json!({"start_time": "09:15", "end_time": "09:45"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = response_json(response).await;
    assert_eq!(body["error"], json!("Time slot overlaps an existing slot"));
}

#[tokio::test]
async fn marking_a_booked_slot_available_releases_it() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();
    let client_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            booked_slot_row(&slot_id, &appointment_id),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("status", "eq.booked"))
        .and(body_partial_json(json!({"status": "available"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&slot_id, "2024-06-10", "09:00", "09:30", "available"),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(&appointment_id, &client_id, "confirmed"),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({"status": "cancelled"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = app
        .oneshot(put_request(
            &format!("/{}", slot_id),
            &token,
            &json!({"status": "available"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["time_slot"]["status"], json!("available"));
    assert_eq!(body["time_slot"]["appointment_id"], Value::Null);
}

#[tokio::test]
async fn a_slot_cannot_be_booked_through_update() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&slot_id, "2024-06-10", "09:00", "09:30", "available"),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let response = app
        .oneshot(put_request(
            &format!("/{}", slot_id),
            &token,
            &json!({"status": "booked"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response_json(response).await;
    assert_eq!(
        body["error"],
        json!("slots become booked through the booking flow")
    );
}

#[tokio::test]
async fn deletes_an_available_slot() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&slot_id, "2024-06-10", "09:00", "09:30", "available"),
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("status", "eq.available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&slot_id, "2024-06-10", "09:00", "09:30", "available"),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/{}", slot_id))
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["message"], json!("Time slot deleted"));
}

#[tokio::test]
async fn deleting_races_a_concurrent_booking() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone());

    let admin = TestUser::admin("admin@example.com");
    let token = JwtTestUtils::create_test_token(&admin, &config.supabase_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            slot_row(&slot_id, "2024-06-10", "09:00", "09:30", "available"),
        ])))
        .mount(&mock_server)
        .await;

    // Booked between the read and the delete; the filtered DELETE
    // removes nothing.
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("status", "eq.available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/{}", slot_id))
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response_json(response).await;
    assert_eq!(body["error"], json!("Cannot delete a booked time slot"));
}
