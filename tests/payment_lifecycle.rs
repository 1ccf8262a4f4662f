use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;

use alx_travel_app::db::Store;
use alx_travel_app::error::AppError;
use alx_travel_app::gateway::GatewayStatus;
use alx_travel_app::models::{Booking, BookingRequest, BookingStatus, PaymentStatus, User};
use alx_travel_app::notifications::NotificationJob;

mod support;

struct Fixture {
    app: support::TestApp,
    host: User,
    guest: User,
    booking: Booking,
}

async fn fixture() -> Fixture {
    let app = support::TestApp::new();
    let host = app.user("host").await;
    let guest = app.user("guest").await;
    let listing = app.listing(&host, Decimal::new(150, 0)).await;
    let booking = app
        .state
        .bookings
        .create(
            guest.id,
            BookingRequest {
                listing_id: listing.id,
                check_in_date: NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
                check_out_date: NaiveDate::from_ymd_opt(2025, 11, 5).unwrap(),
                total_price: None,
            },
        )
        .await
        .unwrap()
        .booking;
    Fixture {
        app,
        host,
        guest,
        booking,
    }
}

#[actix_web::test]
async fn initiate_returns_checkout_url_and_reuses_it() {
    let f = fixture().await;

    let started = f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap();
    assert!(started.checkout_url.starts_with("https://checkout.chapa.co/"));
    assert_eq!(started.amount, Decimal::new(600, 0));
    assert_eq!(started.currency, "ETB");
    assert_eq!(started.tx_ref, started.payment_id.to_string());

    let sent = f.app.gateway.last_checkout().unwrap();
    assert_eq!(sent.email, "guest@example.com");
    assert_eq!(sent.callback_url, "http://localhost:8000/api/payments/verify");

    let payment = f.app.store.get_payment(started.payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.checkout_url.as_deref(), Some(started.checkout_url.as_str()));

    let again = f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap();
    assert_eq!(again.checkout_url, started.checkout_url);
    assert_eq!(f.app.gateway.checkout_calls(), 1);

    let by_payment = f
        .app
        .state
        .payments
        .initiate_for_payment(started.payment_id, f.guest.id)
        .await
        .unwrap();
    assert_eq!(by_payment.checkout_url, started.checkout_url);
}

#[actix_web::test]
async fn only_guest_can_initiate() {
    let f = fixture().await;
    let err = f.app.state.payments.initiate(f.booking.id, f.host.id).await.unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));
    assert_eq!(f.app.gateway.checkout_calls(), 0);
}

#[actix_web::test]
async fn cancelled_booking_cannot_be_paid() {
    let f = fixture().await;
    f.app.state.bookings.cancel(f.booking.id, f.guest.id).await.unwrap();
    let err = f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[actix_web::test]
async fn gateway_failure_leaves_payment_untouched() {
    let f = fixture().await;
    f.app.gateway.fail_checkout();

    let err = f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap_err();
    assert!(matches!(err, AppError::Gateway(_)));

    let payment = f
        .app
        .store
        .get_payment_for_booking(f.booking.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.checkout_url.is_none());
    assert!(payment.tx_ref.is_none());
}

#[actix_web::test]
async fn successful_verification_completes_payment_and_confirms_booking() {
    let mut f = fixture().await;
    let started = f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap();
    f.app.gateway.set_verify_status(GatewayStatus::Success);

    let outcome = f.app.state.payments.verify(&started.tx_ref).await.unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.payment.status, PaymentStatus::Completed);
    assert_eq!(outcome.booking_status, BookingStatus::Confirmed);
    assert_eq!(
        outcome.payment.transaction_id.as_deref(),
        Some(format!("CH-{}", started.tx_ref).as_str())
    );
    assert_eq!(outcome.payment.payment_method.as_deref(), Some("telebirr"));

    let booking = f.app.store.get_booking(f.booking.id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);

    let jobs = f.app.drain_jobs();
    assert_eq!(support::kinds(&jobs), vec!["payment_confirmation"]);
    match &jobs[0].job {
        NotificationJob::PaymentConfirmation(mail) => {
            assert_eq!(mail.amount, Decimal::new(600, 0));
            assert_eq!(mail.currency, "ETB");
            assert_eq!(mail.guest_email, "guest@example.com");
        }
        other => panic!("unexpected job: {other:?}"),
    }
}

#[actix_web::test]
async fn verifying_twice_sends_one_email() {
    let mut f = fixture().await;
    let started = f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap();
    f.app.gateway.set_verify_status(GatewayStatus::Success);

    f.app.state.payments.verify(&started.tx_ref).await.unwrap();
    let second = f
        .app
        .state
        .payments
        .verify(&started.payment_id.to_string())
        .await
        .unwrap();

    assert!(!second.changed);
    assert_eq!(second.payment.status, PaymentStatus::Completed);
    assert_eq!(second.booking_status, BookingStatus::Confirmed);
    assert_eq!(f.app.gateway.verify_calls(), 1);

    let jobs = f.app.drain_jobs();
    assert_eq!(jobs.iter().filter(|j| support::is_payment_confirmation(j)).count(), 1);
}

#[actix_web::test]
async fn concurrent_verifications_transition_once() {
    let mut f = fixture().await;
    let started = f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap();
    f.app.gateway.set_verify_status(GatewayStatus::Success);

    let payments = Arc::new(f.app.state.payments.clone());
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let payments = payments.clone();
            let tx_ref = started.tx_ref.clone();
            tokio::spawn(async move { payments.verify(&tx_ref).await.unwrap() })
        })
        .collect();

    let mut changed = 0;
    for task in tasks {
        if task.await.unwrap().changed {
            changed += 1;
        }
    }
    assert_eq!(changed, 1);
    assert_eq!(f.app.drain_jobs().len(), 1);
}

#[actix_web::test]
async fn failed_verification_marks_payment_failed_and_keeps_booking_pending() {
    let mut f = fixture().await;
    let started = f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap();
    f.app.gateway.set_verify_status(GatewayStatus::Failed);

    let outcome = f.app.state.payments.verify(&started.tx_ref).await.unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.payment.status, PaymentStatus::Failed);
    assert!(outcome.payment.error_message.is_some());
    assert_eq!(outcome.booking_status, BookingStatus::Pending);

    let jobs = f.app.drain_jobs();
    assert_eq!(support::kinds(&jobs), vec!["payment_failure"]);

    // A failed payment is terminal.
    f.app.gateway.set_verify_status(GatewayStatus::Success);
    let again = f.app.state.payments.verify(&started.tx_ref).await.unwrap();
    assert_eq!(again.payment.status, PaymentStatus::Failed);
    assert!(f.app.drain_jobs().is_empty());

    let err = f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[actix_web::test]
async fn pending_verification_changes_nothing() {
    let mut f = fixture().await;
    let started = f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap();

    let outcome = f.app.state.payments.verify(&started.tx_ref).await.unwrap();
    assert!(!outcome.changed);
    assert_eq!(outcome.payment.status, PaymentStatus::Pending);
    assert_eq!(outcome.booking_status, BookingStatus::Pending);
    assert!(f.app.drain_jobs().is_empty());
}

#[actix_web::test]
async fn amount_mismatch_fails_the_payment() {
    let mut f = fixture().await;
    let started = f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap();
    f.app.gateway.set_verify_status(GatewayStatus::Success);
    f.app.gateway.set_verify_amount(Decimal::new(1, 0));

    let outcome = f.app.state.payments.verify(&started.tx_ref).await.unwrap();
    assert_eq!(outcome.payment.status, PaymentStatus::Failed);
    assert_eq!(outcome.booking_status, BookingStatus::Pending);
    assert_eq!(support::kinds(&f.app.drain_jobs()), vec!["payment_failure"]);
}

#[actix_web::test]
async fn currency_mismatch_fails_the_payment() {
    let mut f = fixture().await;
    let started = f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap();
    f.app.gateway.set_verify_status(GatewayStatus::Success);
    f.app.gateway.set_verify_currency("USD");

    let outcome = f.app.state.payments.verify(&started.tx_ref).await.unwrap();
    assert_eq!(outcome.payment.status, PaymentStatus::Failed);
    assert!(outcome
        .payment
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("currency mismatch"));
    assert_eq!(outcome.booking_status, BookingStatus::Pending);
    assert_eq!(support::kinds(&f.app.drain_jobs()), vec!["payment_failure"]);
}

#[actix_web::test]
async fn lowercase_currency_from_gateway_still_completes() {
    let mut f = fixture().await;
    let started = f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap();
    f.app.gateway.set_verify_status(GatewayStatus::Success);
    f.app.gateway.set_verify_currency("etb");

    let outcome = f.app.state.payments.verify(&started.tx_ref).await.unwrap();
    assert_eq!(outcome.payment.status, PaymentStatus::Completed);
    assert_eq!(outcome.booking_status, BookingStatus::Confirmed);
    assert_eq!(support::kinds(&f.app.drain_jobs()), vec!["payment_confirmation"]);
}

#[actix_web::test]
async fn verify_status_checks_access_and_initiation() {
    let f = fixture().await;
    let stranger = f.app.user("stranger").await;
    let payment = f
        .app
        .store
        .get_payment_for_booking(f.booking.id)
        .await
        .unwrap()
        .unwrap();

    let err = f
        .app
        .state
        .payments
        .verify_status(payment.id, f.guest.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    f.app.state.payments.initiate(f.booking.id, f.guest.id).await.unwrap();

    let err = f
        .app
        .state
        .payments
        .verify_status(payment.id, stranger.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));

    f.app.gateway.set_verify_status(GatewayStatus::Success);
    let outcome = f
        .app
        .state
        .payments
        .verify_status(payment.id, f.host.id)
        .await
        .unwrap();
    assert_eq!(outcome.payment.status, PaymentStatus::Completed);
}

#[actix_web::test]
async fn unknown_reference_is_not_found() {
    let f = fixture().await;
    let err = f.app.state.payments.verify("no-such-ref").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound("payment")));
}

#[actix_web::test]
async fn payments_are_visible_to_participants_only() {
    let f = fixture().await;
    let stranger = f.app.user("stranger").await;

    assert_eq!(f.app.state.payments.list(f.guest.id, Default::default()).await.unwrap().len(), 1);
    assert_eq!(f.app.state.payments.list(f.host.id, Default::default()).await.unwrap().len(), 1);
    assert!(f
        .app
        .state
        .payments
        .list(stranger.id, Default::default())
        .await
        .unwrap()
        .is_empty());

    let payment = f
        .app
        .store
        .get_payment_for_booking(f.booking.id)
        .await
        .unwrap()
        .unwrap();
    assert!(f.app.state.payments.get(payment.id, f.host.id).await.is_ok());
    assert!(matches!(
        f.app.state.payments.get(payment.id, stranger.id).await.unwrap_err(),
        AppError::NotFound(_)
    ));
}
