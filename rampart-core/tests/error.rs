use http::StatusCode;
use rampart_core::AppError;

#[test]
fn status_classification() {
    let cases = [
        (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
        (AppError::PermissionDenied("x".into()), StatusCode::FORBIDDEN),
        (AppError::DuplicateIdentifier("x".into()), StatusCode::CONFLICT),
        (AppError::VersionConflict("x".into()), StatusCode::CONFLICT),
        (AppError::Validation("x".into()), StatusCode::BAD_REQUEST),
        (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (err, status) in cases {
        assert_eq!(err.status(), status, "{err}");
    }
}

#[test]
fn json_body_carries_message_and_status() {
    let body = AppError::VersionConflict("stale version 3".into()).to_json();
    assert_eq!(body["error"], "stale version 3");
    assert_eq!(body["status"], 409);
}

#[test]
fn display_prefixes_variant() {
    assert_eq!(
        AppError::Validation("range needs two arguments".into()).to_string(),
        "Validation Error: range needs two arguments"
    );
}
