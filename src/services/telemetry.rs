//! Telemetry buffering and batch persistence — the ingestion hot path.
//!
//! DESIGN
//! ======
//! Each live stream owns one `FrameBuffer`. Appends are O(1); when the
//! buffer crosses `batch_size` the batch is flushed synchronously in the
//! appending path as a single bulk insert. An unresponsive store therefore
//! slows ingestion instead of growing memory; that back-pressure is the
//! point of flushing inline rather than on a timer.
//!
//! A flush failure drops the drained batch and ingestion resumes; one bad
//! commit must not tear the stream down.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::repo::FrameSink;
use crate::models::FrameRecord;

/// How many recent per-append durations feed the percentile metrics.
const MAX_PROCESSING_SAMPLES: usize = 1000;

// =============================================================================
// METRICS
// =============================================================================

/// Point-in-time counters for one buffer.
#[derive(Debug, Clone, Serialize)]
pub struct BufferMetrics {
    pub session_id: i64,
    pub robot_id: String,
    pub total_frames: u64,
    pub pending_frames: usize,
    pub flush_count: u64,
    pub avg_processing_time_ms: f64,
    pub p50_processing_time_ms: f64,
    pub p95_processing_time_ms: f64,
}

/// Index-based percentile over a sorted sample window.
pub(crate) fn percentile_ms(sorted_secs: &[f64], q: f64) -> f64 {
    if sorted_secs.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let idx = ((sorted_secs.len() as f64 * q) as usize).min(sorted_secs.len() - 1);
    sorted_secs[idx] * 1000.0
}

// =============================================================================
// FRAME BUFFER
// =============================================================================

struct BufferInner {
    buffer: Vec<FrameRecord>,
    total_frames: u64,
    flush_count: u64,
}

/// Per-stream frame buffer with threshold flushing.
///
/// Append and flush are serialized by the buffer's own mutex; the store is
/// cooperative (async sqlx), so holding the lock across the commit is what
/// gives the stream its ordering and back-pressure guarantees.
pub struct FrameBuffer {
    session_id: i64,
    robot_id: String,
    batch_size: usize,
    inner: Mutex<BufferInner>,
    // Recorded outside the async lock; never held across an await.
    processing_secs: StdMutex<VecDeque<f64>>,
}

impl FrameBuffer {
    #[must_use]
    pub fn new(session_id: i64, robot_id: impl Into<String>, batch_size: usize) -> Self {
        Self {
            session_id,
            robot_id: robot_id.into(),
            batch_size: batch_size.max(1),
            inner: Mutex::new(BufferInner { buffer: Vec::new(), total_frames: 0, flush_count: 0 }),
            processing_secs: StdMutex::new(VecDeque::with_capacity(MAX_PROCESSING_SAMPLES)),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    #[must_use]
    pub fn robot_id(&self) -> &str {
        &self.robot_id
    }

    /// Append one frame, flushing when the batch threshold is reached.
    /// Returns `true` if a flush happened.
    pub async fn add(&self, frame: FrameRecord, sink: &dyn FrameSink) -> bool {
        let started = Instant::now();
        let flushed = {
            let mut inner = self.inner.lock().await;
            inner.buffer.push(frame);
            if inner.buffer.len() >= self.batch_size {
                Self::flush_locked(&mut inner, sink, self.session_id, &self.robot_id).await;
                true
            } else {
                false
            }
        };
        self.record_processing_time(started.elapsed().as_secs_f64());
        flushed
    }

    /// Flush any residual frames. Called on stream close.
    /// Returns the number of frames persisted by this call.
    pub async fn flush_all(&self, sink: &dyn FrameSink) -> usize {
        let mut inner = self.inner.lock().await;
        if inner.buffer.is_empty() {
            return 0;
        }
        Self::flush_locked(&mut inner, sink, self.session_id, &self.robot_id).await
    }

    /// Drain and commit the buffered slice. On failure the batch is dropped
    /// with a warning and the stream keeps going.
    async fn flush_locked(inner: &mut BufferInner, sink: &dyn FrameSink, session_id: i64, robot_id: &str) -> usize {
        let batch = std::mem::take(&mut inner.buffer);
        let count = batch.len();
        let flush_started = Instant::now();

        match sink.insert_frames(&batch).await {
            Ok(()) => {
                inner.total_frames += count as u64;
                inner.flush_count += 1;
                debug!(
                    session_id,
                    robot_id,
                    batch_count = count,
                    total_frames = inner.total_frames,
                    flush_time_ms = flush_started.elapsed().as_secs_f64() * 1000.0,
                    "frame batch committed"
                );
                count
            }
            Err(e) => {
                warn!(session_id, robot_id, batch_count = count, error = %e, "frame batch commit failed; batch dropped");
                0
            }
        }
    }

    fn record_processing_time(&self, elapsed_secs: f64) {
        let Ok(mut samples) = self.processing_secs.lock() else {
            return;
        };
        if samples.len() == MAX_PROCESSING_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(elapsed_secs);
    }

    pub async fn metrics(&self) -> BufferMetrics {
        let (total_frames, pending_frames, flush_count) = {
            let inner = self.inner.lock().await;
            (inner.total_frames, inner.buffer.len(), inner.flush_count)
        };

        let mut sorted: Vec<f64> = self
            .processing_secs
            .lock()
            .map(|samples| samples.iter().copied().collect())
            .unwrap_or_default();
        sorted.sort_by(f64::total_cmp);

        let avg_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64 * 1000.0
        };

        BufferMetrics {
            session_id: self.session_id,
            robot_id: self.robot_id.clone(),
            total_frames,
            pending_frames,
            flush_count,
            avg_processing_time_ms: avg_ms,
            p50_processing_time_ms: percentile_ms(&sorted, 0.50),
            p95_processing_time_ms: percentile_ms(&sorted, 0.95),
        }
    }
}

// =============================================================================
// TELEMETRY MANAGER
// =============================================================================

/// Owns every live buffer, keyed by `(robot_id, session_id)`.
pub struct TelemetryManager {
    batch_size: usize,
    buffers: Mutex<HashMap<(String, i64), Arc<FrameBuffer>>>,
}

impl TelemetryManager {
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size, buffers: Mutex::new(HashMap::new()) }
    }

    pub async fn get_or_create(&self, session_id: i64, robot_id: &str) -> Arc<FrameBuffer> {
        let mut buffers = self.buffers.lock().await;
        buffers
            .entry((robot_id.to_owned(), session_id))
            .or_insert_with(|| Arc::new(FrameBuffer::new(session_id, robot_id, self.batch_size)))
            .clone()
    }

    pub async fn remove(&self, session_id: i64, robot_id: &str) {
        let mut buffers = self.buffers.lock().await;
        buffers.remove(&(robot_id.to_owned(), session_id));
    }

    pub async fn active_buffer_count(&self) -> usize {
        self.buffers.lock().await.len()
    }

    pub async fn all_metrics(&self) -> Vec<BufferMetrics> {
        let buffers: Vec<Arc<FrameBuffer>> = {
            let map = self.buffers.lock().await;
            map.values().cloned().collect()
        };
        let mut metrics = Vec::with_capacity(buffers.len());
        for buffer in buffers {
            metrics.push(buffer.metrics().await);
        }
        metrics
    }
}

#[cfg(test)]
#[path = "telemetry_test.rs"]
mod tests;
