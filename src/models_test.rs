use super::*;

#[test]
fn now_epoch_secs_is_recent() {
    let now = now_epoch_secs();
    // After 2020, before 2100.
    assert!(now > 1_577_836_800.0);
    assert!(now < 4_102_444_800.0);
}

#[test]
fn robot_state_as_str() {
    assert_eq!(RobotState::Online.as_str(), "online");
    assert_eq!(RobotState::Offline.as_str(), "offline");
    assert_eq!(RobotState::Error.as_str(), "error");
}

#[test]
fn robot_state_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&RobotState::Online).unwrap(), "\"online\"");
}

#[test]
fn frame_record_preserves_opaque_payload() {
    let data = serde_json::json!({
        "frame_index": 3,
        "timestamp": 1700000000.5,
        "observation": {"shoulder": 0.1, "elbow": -0.2},
        "action": {"shoulder": 0.11, "elbow": -0.19},
    });
    let frame = FrameRecord {
        session_id: 1,
        robot_id: "robot-001".into(),
        frame_index: 3,
        timestamp: 1_700_000_000.5,
        data: data.clone(),
    };
    assert_eq!(frame.data, data);

    let json = serde_json::to_value(&frame).unwrap();
    assert_eq!(json["data"]["observation"]["elbow"], -0.2);
}

#[test]
fn session_row_meta_defaults_to_none() {
    let session = SessionRow {
        id: 1,
        robot_id: "r".into(),
        start_time: 0.0,
        end_time: None,
        fps: 60,
        frame_count: 0,
        meta: None,
    };
    let json = serde_json::to_value(&session).unwrap();
    assert!(json["meta"].is_null());
    assert!(json["end_time"].is_null());
}
