use super::*;

// =============================================================================
// parse_extensions
// =============================================================================

#[test]
fn parse_extensions_default_list() {
    let exts = parse_extensions("mp4,avi,mov,webm");
    assert_eq!(exts, vec!["mp4", "avi", "mov", "webm"]);
}

#[test]
fn parse_extensions_trims_and_lowercases() {
    let exts = parse_extensions(" MP4 , .Mov ");
    assert_eq!(exts, vec!["mp4", "mov"]);
}

#[test]
fn parse_extensions_drops_empty_entries() {
    let exts = parse_extensions("mp4,,webm,");
    assert_eq!(exts, vec!["mp4", "webm"]);
}

// =============================================================================
// env_parse
// =============================================================================

#[test]
fn env_parse_unset_returns_default() {
    assert_eq!(env_parse("TELEOPD_TEST_UNSET_VAR", 42_usize), 42);
}

#[test]
fn env_parse_garbage_returns_default() {
    // SAFETY: test-only env mutation, no concurrent readers of this key.
    unsafe { std::env::set_var("TELEOPD_TEST_GARBAGE_VAR", "not-a-number") };
    assert_eq!(env_parse("TELEOPD_TEST_GARBAGE_VAR", 7_u64), 7);
    unsafe { std::env::remove_var("TELEOPD_TEST_GARBAGE_VAR") };
}

// =============================================================================
// Config
// =============================================================================

#[test]
fn test_config_defaults() {
    let config = Config::for_tests();
    assert_eq!(config.ws_buffer_size, 60);
    assert_eq!(config.session_fps, 60);
    assert_eq!(config.multipart_threshold, 8 * 1024 * 1024);
    assert_eq!(config.video_max_size_bytes, 500 * 1024 * 1024);
    assert!(config.api_key.is_none());
}

#[test]
fn s3_configured_requires_all_three() {
    let mut config = Config::for_tests();
    assert!(!config.s3_configured());

    config.aws_access_key_id = Some("key".into());
    config.aws_secret_access_key = Some("secret".into());
    assert!(!config.s3_configured());

    config.s3_bucket = Some("bucket".into());
    assert!(config.s3_configured());
}
