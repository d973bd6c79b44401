use super::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// Records every committed batch; optionally fails the next commit.
#[derive(Default)]
struct RecordingSink {
    batches: StdMutex<Vec<Vec<FrameRecord>>>,
    fail_next: AtomicBool,
}

impl RecordingSink {
    fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(std::vec::Vec::len).collect()
    }

    fn committed_indexes(&self) -> Vec<i64> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|f| f.frame_index)
            .collect()
    }
}

#[async_trait::async_trait]
impl FrameSink for RecordingSink {
    async fn insert_frames(&self, frames: &[FrameRecord]) -> Result<(), sqlx::Error> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(sqlx::Error::PoolClosed);
        }
        self.batches.lock().unwrap().push(frames.to_vec());
        Ok(())
    }
}

fn frame(session_id: i64, index: i64) -> FrameRecord {
    FrameRecord {
        session_id,
        robot_id: "robot-001".into(),
        frame_index: index,
        timestamp: index as f64 / 60.0,
        data: serde_json::json!({"frame_index": index}),
    }
}

// =============================================================================
// percentile_ms
// =============================================================================

#[test]
fn percentile_empty_is_zero() {
    assert_eq!(percentile_ms(&[], 0.95), 0.0);
}

#[test]
fn percentile_single_sample() {
    assert!((percentile_ms(&[0.002], 0.95) - 2.0).abs() < 1e-9);
}

#[test]
fn percentile_p50_and_p95() {
    let sorted: Vec<f64> = (1..=100).map(|i| f64::from(i) / 1000.0).collect();
    assert!((percentile_ms(&sorted, 0.50) - 51.0).abs() < 1e-9);
    assert!((percentile_ms(&sorted, 0.95) - 96.0).abs() < 1e-9);
}

// =============================================================================
// FrameBuffer
// =============================================================================

#[tokio::test]
async fn add_below_threshold_does_not_flush() {
    let buffer = FrameBuffer::new(1, "robot-001", 60);
    let sink = RecordingSink::default();
    for i in 0..59 {
        assert!(!buffer.add(frame(1, i), &sink).await);
    }
    assert!(sink.batch_sizes().is_empty());
    assert_eq!(buffer.metrics().await.pending_frames, 59);
}

#[tokio::test]
async fn threshold_crossing_triggers_flush() {
    let buffer = FrameBuffer::new(1, "robot-001", 60);
    let sink = RecordingSink::default();
    for i in 0..60 {
        let flushed = buffer.add(frame(1, i), &sink).await;
        assert_eq!(flushed, i == 59);
    }
    assert_eq!(sink.batch_sizes(), vec![60]);
    let metrics = buffer.metrics().await;
    assert_eq!(metrics.total_frames, 60);
    assert_eq!(metrics.pending_frames, 0);
    assert_eq!(metrics.flush_count, 1);
}

#[tokio::test]
async fn round_trips_equal_ceil_n_over_b() {
    // 180 frames, batch 60: exactly 3 store round trips, nothing residual.
    let buffer = FrameBuffer::new(1, "robot-001", 60);
    let sink = RecordingSink::default();
    for i in 0..180 {
        buffer.add(frame(1, i), &sink).await;
    }
    assert_eq!(buffer.flush_all(&sink).await, 0);
    assert_eq!(sink.batch_sizes(), vec![60, 60, 60]);
}

#[tokio::test]
async fn residual_flush_on_close() {
    // 61 frames, batch 60: one threshold flush plus one residual frame.
    let buffer = FrameBuffer::new(1, "robot-001", 60);
    let sink = RecordingSink::default();
    for i in 0..61 {
        buffer.add(frame(1, i), &sink).await;
    }
    assert_eq!(buffer.flush_all(&sink).await, 1);
    assert_eq!(sink.batch_sizes(), vec![60, 1]);
    assert_eq!(buffer.metrics().await.total_frames, 61);
}

#[tokio::test]
async fn committed_order_matches_receive_order() {
    let buffer = FrameBuffer::new(1, "robot-001", 4);
    let sink = RecordingSink::default();
    for i in 0..10 {
        buffer.add(frame(1, i), &sink).await;
    }
    buffer.flush_all(&sink).await;
    assert_eq!(sink.committed_indexes(), (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn flush_failure_drops_batch_and_continues() {
    let buffer = FrameBuffer::new(1, "robot-001", 2);
    let sink = RecordingSink::default();

    sink.fail_next.store(true, Ordering::SeqCst);
    buffer.add(frame(1, 0), &sink).await;
    buffer.add(frame(1, 1), &sink).await; // this flush fails, batch lost

    buffer.add(frame(1, 2), &sink).await;
    buffer.add(frame(1, 3), &sink).await; // this flush succeeds

    assert_eq!(sink.committed_indexes(), vec![2, 3]);
    let metrics = buffer.metrics().await;
    assert_eq!(metrics.total_frames, 2);
    assert_eq!(metrics.flush_count, 1);
    assert_eq!(metrics.pending_frames, 0);
}

#[tokio::test]
async fn flush_all_empty_buffer_makes_no_round_trip() {
    let buffer = FrameBuffer::new(1, "robot-001", 60);
    let sink = RecordingSink::default();
    assert_eq!(buffer.flush_all(&sink).await, 0);
    assert!(sink.batch_sizes().is_empty());
}

#[tokio::test]
async fn metrics_report_processing_percentiles() {
    let buffer = FrameBuffer::new(7, "robot-001", 100);
    let sink = RecordingSink::default();
    for i in 0..10 {
        buffer.add(frame(7, i), &sink).await;
    }
    let metrics = buffer.metrics().await;
    assert_eq!(metrics.session_id, 7);
    assert_eq!(metrics.robot_id, "robot-001");
    // Ten samples recorded; in-memory appends are fast but non-negative.
    assert!(metrics.p95_processing_time_ms >= 0.0);
    assert!(metrics.p50_processing_time_ms <= metrics.p95_processing_time_ms + f64::EPSILON);
    assert!(metrics.avg_processing_time_ms >= 0.0);
}

// =============================================================================
// end-to-end against the real store
// =============================================================================

#[tokio::test]
async fn stream_of_180_frames_persists_in_order_with_three_commits() {
    let pool = crate::db::init_pool("sqlite::memory:", 1).await.unwrap();
    let session_id = crate::db::repo::create_session(&pool, "robot-A", 60, 0.0, None).await.unwrap();

    let buffer = FrameBuffer::new(session_id, "robot-A", 60);
    for i in 0..180 {
        let mut record = frame(session_id, i);
        record.robot_id = "robot-A".into();
        buffer.add(record, &pool).await;
    }
    buffer.flush_all(&pool).await;

    let metrics = buffer.metrics().await;
    assert_eq!(metrics.total_frames, 180);
    assert_eq!(metrics.flush_count, 3);

    let stored = crate::db::repo::frames_for_session(&pool, session_id).await.unwrap();
    assert_eq!(stored.len(), 180);
    assert_eq!(stored.iter().map(|f| f.frame_index).collect::<Vec<_>>(), (0..180).collect::<Vec<_>>());
}

// =============================================================================
// TelemetryManager
// =============================================================================

#[tokio::test]
async fn get_or_create_returns_same_buffer() {
    let manager = TelemetryManager::new(60);
    let a = manager.get_or_create(1, "robot-001").await;
    let b = manager.get_or_create(1, "robot-001").await;
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(manager.active_buffer_count().await, 1);
}

#[tokio::test]
async fn distinct_sessions_get_distinct_buffers() {
    let manager = TelemetryManager::new(60);
    let a = manager.get_or_create(1, "robot-001").await;
    let b = manager.get_or_create(2, "robot-001").await;
    let c = manager.get_or_create(1, "robot-002").await;
    assert!(!Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(manager.active_buffer_count().await, 3);
}

#[tokio::test]
async fn remove_drops_the_buffer() {
    let manager = TelemetryManager::new(60);
    manager.get_or_create(1, "robot-001").await;
    manager.remove(1, "robot-001").await;
    assert_eq!(manager.active_buffer_count().await, 0);
}

#[tokio::test]
async fn all_metrics_covers_every_buffer() {
    let manager = TelemetryManager::new(60);
    manager.get_or_create(1, "robot-a").await;
    manager.get_or_create(2, "robot-b").await;
    let metrics = manager.all_metrics().await;
    assert_eq!(metrics.len(), 2);
}
