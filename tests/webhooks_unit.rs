use actix_web::test::TestRequest;

use alx_travel_app::api::webhooks::{extract_signature, parse_callback_body};

#[test]
fn parses_json_callback() {
    let body = br#"{"tx_ref":"5b2a4f0e-1111","status":"success","ref_id":"APfxN7mqB8Lz"}"#;
    let parsed = parse_callback_body("application/json", body).unwrap();
    assert_eq!(parsed.reference(), Some("5b2a4f0e-1111"));
    assert_eq!(parsed.status.as_deref(), Some("success"));
}

#[test]
fn parses_form_callback_with_trx_ref() {
    let body = b"trx_ref=5b2a4f0e-2222&status=failed";
    let parsed = parse_callback_body("application/x-www-form-urlencoded", body).unwrap();
    assert_eq!(parsed.reference(), Some("5b2a4f0e-2222"));
    assert_eq!(parsed.status.as_deref(), Some("failed"));
}

#[test]
fn falls_back_to_form_when_content_type_is_missing() {
    let parsed = parse_callback_body("", b"tx_ref=abc").unwrap();
    assert_eq!(parsed.reference(), Some("abc"));
}

#[test]
fn tx_ref_wins_over_trx_ref_and_blank_is_ignored() {
    let parsed =
        parse_callback_body("application/json", br#"{"tx_ref":"first","trx_ref":"second"}"#).unwrap();
    assert_eq!(parsed.reference(), Some("first"));

    let blank = parse_callback_body("application/json", br#"{"tx_ref":"  "}"#).unwrap();
    assert_eq!(blank.reference(), None);
}

#[test]
fn empty_body_has_no_reference() {
    let parsed = parse_callback_body("application/json", b"  \n").unwrap();
    assert!(parsed.reference().is_none());
}

#[test]
fn invalid_json_is_an_error() {
    assert!(parse_callback_body("application/json", b"{\"tx_ref\": [1, 2").is_err());
}

#[test]
fn extracts_signature_from_either_header() {
    let req = TestRequest::default()
        .insert_header(("x-chapa-signature", " abc123 "))
        .to_http_request();
    assert_eq!(extract_signature(&req).as_deref(), Some("abc123"));

    let req = TestRequest::default()
        .insert_header(("Chapa-Signature", "def456"))
        .to_http_request();
    assert_eq!(extract_signature(&req).as_deref(), Some("def456"));

    let req = TestRequest::default().to_http_request();
    assert!(extract_signature(&req).is_none());
}
