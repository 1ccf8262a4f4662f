use actix_web::http::{header, StatusCode};
use actix_web::test::TestRequest;
use actix_web::{test, web, App};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use alx_travel_app::api;
use alx_travel_app::gateway::{sign_hmac_sha256_hex, GatewayStatus};
use alx_travel_app::models::User;

mod support;

macro_rules! service {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .configure(api::configure),
        )
        .await
    };
}

fn bearer(app: &support::TestApp, user: &User) -> (header::HeaderName, String) {
    let token = app.state.jwt.issue(user.id).expect("token");
    (header::AUTHORIZATION, format!("Bearer {token}"))
}

#[actix_web::test]
async fn health_is_public() {
    let app = support::TestApp::new();
    let svc = service!(app.state.clone());

    let resp = test::call_service(&svc, TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
}

#[actix_web::test]
async fn register_then_login() {
    let app = support::TestApp::new();
    let svc = service!(app.state.clone());

    let req = TestRequest::post()
        .uri("/auth/register")
        .set_json(json!({"email": "Abebe@Example.com", "password": "correct-horse", "first_name": "Abebe"}))
        .to_request();
    let resp = test::call_service(&svc, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(body["user"]["email"], "abebe@example.com");
    assert_eq!(body["user"]["username"], "abebe");
    assert!(body["user"].get("password_hash").is_none());

    let dup = TestRequest::post()
        .uri("/auth/register")
        .set_json(json!({"email": "abebe@example.com", "password": "another-pass"}))
        .to_request();
    let resp = test::call_service(&svc, dup).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["field"], "email");

    let login = TestRequest::post()
        .uri("/auth/login")
        .set_json(json!({"email": "abebe@example.com", "password": "correct-horse"}))
        .to_request();
    let resp = test::call_service(&svc, login).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let token = body["token"].as_str().expect("token").to_string();

    let me = TestRequest::get()
        .uri("/api/bookings/my_bookings")
        .insert_header((header::AUTHORIZATION, format!("Bearer {token}")))
        .to_request();
    assert_eq!(test::call_service(&svc, me).await.status(), StatusCode::OK);

    let wrong = TestRequest::post()
        .uri("/auth/login")
        .set_json(json!({"email": "abebe@example.com", "password": "wrong-password"}))
        .to_request();
    assert_eq!(
        test::call_service(&svc, wrong).await.status(),
        StatusCode::UNAUTHORIZED
    );
}

#[actix_web::test]
async fn short_password_is_a_field_error() {
    let app = support::TestApp::new();
    let svc = service!(app.state.clone());

    let req = TestRequest::post()
        .uri("/auth/register")
        .set_json(json!({"email": "guest@example.com", "password": "short"}))
        .to_request();
    let resp = test::call_service(&svc, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["field"], "password");
}

#[actix_web::test]
async fn protected_routes_require_a_valid_token() {
    let app = support::TestApp::new();
    let svc = service!(app.state.clone());

    let resp = test::call_service(&svc, TestRequest::get().uri("/api/bookings").to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "unauthorized");

    let req = TestRequest::get()
        .uri("/api/bookings")
        .insert_header((header::AUTHORIZATION, "Bearer not-a-jwt"))
        .to_request();
    let err = test::try_call_service(&svc, req)
        .await
        .err()
        .expect("invalid token is rejected");
    assert_eq!(
        err.as_response_error().status_code(),
        StatusCode::UNAUTHORIZED
    );
}

#[actix_web::test]
async fn listings_are_public_but_owned() {
    let app = support::TestApp::new();
    let host = app.user("host").await;
    let other = app.user("other").await;
    let svc = service!(app.state.clone());

    let create = TestRequest::post()
        .uri("/api/listings")
        .insert_header(bearer(&app, &host))
        .set_json(json!({
            "title": "Lakeside Cabin",
            "description": "Quiet cabin",
            "location": "Bishoftu",
            "price_per_night": "120.00",
            "amenities": ["wifi", "fireplace"]
        }))
        .to_request();
    let resp = test::call_service(&svc, create).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let listing: Value = test::read_body_json(resp).await;
    let id = listing["id"].as_str().expect("id").to_string();
    assert_eq!(listing["is_available"], true);

    let resp = test::call_service(&svc, TestRequest::get().uri("/api/listings").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let all: Value = test::read_body_json(resp).await;
    assert_eq!(all.as_array().map(Vec::len), Some(1));

    let resp = test::call_service(
        &svc,
        TestRequest::get().uri(&format!("/api/listings/{id}")).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let patch = TestRequest::patch()
        .uri(&format!("/api/listings/{id}"))
        .insert_header(bearer(&app, &other))
        .set_json(json!({"price_per_night": "1.00"}))
        .to_request();
    let resp = test::call_service(&svc, patch).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "permission_denied");

    let patch = TestRequest::patch()
        .uri(&format!("/api/listings/{id}"))
        .insert_header(bearer(&app, &host))
        .set_json(json!({"price_per_night": "150.00"}))
        .to_request();
    let resp = test::call_service(&svc, patch).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = test::read_body_json(resp).await;
    assert_eq!(updated["price_per_night"], "150.00");
    assert_eq!(updated["title"], "Lakeside Cabin");

    let mine = TestRequest::get()
        .uri("/api/listings/my_listings")
        .insert_header(bearer(&app, &other))
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&svc, mine).await).await;
    assert_eq!(body.as_array().map(Vec::len), Some(0));
}

#[actix_web::test]
async fn malformed_json_is_a_validation_error() {
    let app = support::TestApp::new();
    let guest = app.user("guest").await;
    let svc = service!(app.state.clone());

    let req = TestRequest::post()
        .uri("/api/bookings")
        .insert_header(bearer(&app, &guest))
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload("{\"listing_id\": ")
        .to_request();
    let resp = test::call_service(&svc, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation_error");
}

#[actix_web::test]
async fn booking_checkout_and_callback_flow() {
    let mut app = support::TestApp::new();
    let host = app.user("host").await;
    let guest = app.user("guest").await;
    let listing = app.listing(&host, Decimal::new(150, 0)).await;
    let svc = service!(app.state.clone());

    let create = TestRequest::post()
        .uri("/api/bookings")
        .insert_header(bearer(&app, &guest))
        .set_json(json!({
            "listing_id": listing.id,
            "check_in_date": "2025-11-01",
            "check_out_date": "2025-11-05"
        }))
        .to_request();
    let resp = test::call_service(&svc, create).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let booking: Value = test::read_body_json(resp).await;
    assert_eq!(booking["status"], "pending");
    assert_eq!(booking["total_price"], "600.00");
    assert_eq!(booking["payment"]["status"], "pending");
    let booking_id = booking["id"].as_str().expect("id").to_string();

    let initiate = TestRequest::post()
        .uri(&format!("/api/bookings/{booking_id}/initiate_payment"))
        .insert_header(bearer(&app, &guest))
        .to_request();
    let resp = test::call_service(&svc, initiate).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let started: Value = test::read_body_json(resp).await;
    let tx_ref = started["tx_ref"].as_str().expect("tx_ref").to_string();
    assert!(started["checkout_url"]
        .as_str()
        .is_some_and(|u| u.ends_with(&tx_ref)));

    app.gateway.set_verify_status(GatewayStatus::Success);
    let callback = TestRequest::post()
        .uri("/api/payments/verify")
        .set_json(json!({"tx_ref": tx_ref, "status": "success"}))
        .to_request();
    let resp = test::call_service(&svc, callback).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["booking_status"], "confirmed");
    assert_eq!(body["changed"], true);

    // Chapa also redirects the browser to the callback URL with a GET.
    let redirect = TestRequest::get()
        .uri(&format!("/api/payments/verify?trx_ref={tx_ref}&status=success"))
        .to_request();
    let resp = test::call_service(&svc, redirect).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["changed"], false);

    assert_eq!(support::kinds(&app.drain_jobs()), vec!["payment_confirmation"]);

    let view = TestRequest::get()
        .uri(&format!("/api/bookings/{booking_id}"))
        .insert_header(bearer(&app, &host))
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&svc, view).await).await;
    assert_eq!(body["status"], "confirmed");
    assert_eq!(body["payment"]["status"], "completed");

    let delete = TestRequest::delete()
        .uri(&format!("/api/listings/{}", listing.id))
        .insert_header(bearer(&app, &host))
        .to_request();
    let resp = test::call_service(&svc, delete).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "conflict");
}

#[actix_web::test]
async fn oversized_stay_is_a_bad_request() {
    let app = support::TestApp::new();
    let host = app.user("host").await;
    let guest = app.user("guest").await;
    let listing = app.listing(&host, Decimal::new(150, 0)).await;
    let svc = service!(app.state.clone());

    let create = TestRequest::post()
        .uri("/api/bookings")
        .insert_header(bearer(&app, &guest))
        .set_json(json!({
            "listing_id": listing.id,
            "check_in_date": "2025-01-01",
            "check_out_date": "4025-01-01"
        }))
        .to_request();
    let resp = test::call_service(&svc, create).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["field"], "total_price");

    let huge = TestRequest::post()
        .uri("/api/listings")
        .insert_header(bearer(&app, &host))
        .set_json(json!({
            "title": "Palace",
            "location": "Addis Ababa",
            "price_per_night": "100000000.00"
        }))
        .to_request();
    let resp = test::call_service(&svc, huge).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn callback_without_reference_is_rejected() {
    let app = support::TestApp::new();
    let svc = service!(app.state.clone());

    let resp = test::call_service(
        &svc,
        TestRequest::post()
            .uri("/api/payments/verify")
            .set_json(json!({"status": "success"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["field"], "tx_ref");

    let resp = test::call_service(
        &svc,
        TestRequest::get()
            .uri("/api/payments/verify?tx_ref=unknown-ref")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn signed_callbacks_when_secret_is_configured() {
    let app = support::TestApp::with_config(support::test_config(&[(
        "CHAPA_WEBHOOK_SECRET",
        "whsec_test",
    )]));
    let host = app.user("host").await;
    let guest = app.user("guest").await;
    let listing = app.listing(&host, Decimal::new(100, 0)).await;
    let detail = app
        .state
        .bookings
        .create(
            guest.id,
            alx_travel_app::models::BookingRequest {
                listing_id: listing.id,
                check_in_date: chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                check_out_date: chrono::NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
                total_price: None,
            },
        )
        .await
        .unwrap();
    let started = app
        .state
        .payments
        .initiate(detail.booking.id, guest.id)
        .await
        .unwrap();
    app.gateway.set_verify_status(GatewayStatus::Success);
    let svc = service!(app.state.clone());

    let body = format!(r#"{{"tx_ref":"{}","status":"success"}}"#, started.tx_ref);

    let unsigned = TestRequest::post()
        .uri("/api/payments/verify")
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload(body.clone())
        .to_request();
    assert_eq!(
        test::call_service(&svc, unsigned).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let forged = TestRequest::post()
        .uri("/api/payments/verify")
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .insert_header(("x-chapa-signature", sign_hmac_sha256_hex("wrong", body.as_bytes())))
        .set_payload(body.clone())
        .to_request();
    assert_eq!(
        test::call_service(&svc, forged).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(app.gateway.verify_calls(), 0);

    let signed = TestRequest::post()
        .uri("/api/payments/verify")
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .insert_header((
            "chapa-signature",
            sign_hmac_sha256_hex("whsec_test", body.as_bytes()),
        ))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&svc, signed).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: Value = test::read_body_json(resp).await;
    assert_eq!(json["status"], "completed");
}

#[actix_web::test]
async fn form_encoded_callback_is_accepted() {
    let app = support::TestApp::new();
    let host = app.user("host").await;
    let guest = app.user("guest").await;
    let listing = app.listing(&host, Decimal::new(100, 0)).await;
    let detail = app
        .state
        .bookings
        .create(
            guest.id,
            alx_travel_app::models::BookingRequest {
                listing_id: listing.id,
                check_in_date: chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                check_out_date: chrono::NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
                total_price: None,
            },
        )
        .await
        .unwrap();
    let started = app
        .state
        .payments
        .initiate(detail.booking.id, guest.id)
        .await
        .unwrap();
    app.gateway.set_verify_status(GatewayStatus::Failed);
    let svc = service!(app.state.clone());

    let req = TestRequest::post()
        .uri("/api/payments/verify")
        .insert_header((header::CONTENT_TYPE, "application/x-www-form-urlencoded"))
        .set_payload(format!("trx_ref={}&status=failed", started.tx_ref))
        .to_request();
    let resp = test::call_service(&svc, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["booking_status"], "pending");
}

#[actix_web::test]
async fn reviews_are_editable_by_their_author_only() {
    let app = support::TestApp::new();
    let host = app.user("host").await;
    let guest = app.user("guest").await;
    let listing = app.listing(&host, Decimal::new(100, 0)).await;
    let svc = service!(app.state.clone());

    let bad = TestRequest::post()
        .uri("/api/reviews")
        .insert_header(bearer(&app, &guest))
        .set_json(json!({"listing_id": listing.id, "rating": 6, "comment": "too good"}))
        .to_request();
    let resp = test::call_service(&svc, bad).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["field"], "rating");

    let create = TestRequest::post()
        .uri("/api/reviews")
        .insert_header(bearer(&app, &guest))
        .set_json(json!({"listing_id": listing.id, "rating": 5, "comment": "Lovely stay"}))
        .to_request();
    let resp = test::call_service(&svc, create).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let review: Value = test::read_body_json(resp).await;
    let id = review["id"].as_str().expect("id").to_string();

    let listed = test::call_service(
        &svc,
        TestRequest::get()
            .uri(&format!("/api/listings/{}/reviews", listing.id))
            .to_request(),
    )
    .await;
    let body: Value = test::read_body_json(listed).await;
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let hijack = TestRequest::put()
        .uri(&format!("/api/reviews/{id}"))
        .insert_header(bearer(&app, &host))
        .set_json(json!({"rating": 1, "comment": "edited"}))
        .to_request();
    assert_eq!(
        test::call_service(&svc, hijack).await.status(),
        StatusCode::FORBIDDEN
    );

    let delete = TestRequest::delete()
        .uri(&format!("/api/reviews/{id}"))
        .insert_header(bearer(&app, &guest))
        .to_request();
    assert_eq!(
        test::call_service(&svc, delete).await.status(),
        StatusCode::NO_CONTENT
    );
}
