use super::*;
use axum::http::StatusCode;

// =============================================================================
// safe_relative_path
// =============================================================================

#[test]
fn plain_relative_paths_are_safe() {
    assert!(safe_relative_path("dataset"));
    assert!(safe_relative_path("data/chunk-000/file.parquet"));
    assert!(safe_relative_path("./videos/clip.mp4"));
}

#[test]
fn traversal_and_absolute_paths_are_rejected() {
    assert!(!safe_relative_path("../escape"));
    assert!(!safe_relative_path("data/../../etc/passwd"));
    assert!(!safe_relative_path("/etc/passwd"));
    assert!(!safe_relative_path(""));
}

// =============================================================================
// map_upload_error
// =============================================================================

fn rid() -> RequestId {
    RequestId("req-1".into())
}

#[test]
fn bad_extension_maps_to_400() {
    let err = map_upload_error(VideoUploadError::BadExtension("x.exe".into()), &rid());
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
}

#[test]
fn missing_session_maps_to_404() {
    let err = map_upload_error(VideoUploadError::SessionNotFound(9), &rid());
    assert_eq!(err.status, StatusCode::NOT_FOUND);
}

#[test]
fn oversize_maps_to_413() {
    let err = map_upload_error(VideoUploadError::TooLarge { size: 2, max: 1 }, &rid());
    assert_eq!(err.status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[test]
fn storage_failure_maps_to_500() {
    let err = map_upload_error(VideoUploadError::Storage("adapter down".into()), &rid());
    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn database_failure_maps_to_500() {
    let err = map_upload_error(VideoUploadError::Database(sqlx::Error::PoolClosed), &rid());
    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
}
