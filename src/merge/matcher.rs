//! Closest-timestamp matching against a sorted index.
//!
//! The main merge path seeks directly into the video by relative time; this
//! helper exists for merge strategies that align against a separately
//! indexed timestamp list (e.g. an external frame index).

/// Binary-search matcher with a maximum allowed distance.
#[derive(Debug, Clone, Copy)]
pub struct TimestampMatcher {
    max_diff_ms: f64,
}

impl TimestampMatcher {
    #[must_use]
    pub fn new(max_diff_ms: f64) -> Self {
        Self { max_diff_ms }
    }

    /// Find the index of the element closest to `target` in a sorted slice
    /// of epoch-second timestamps. Returns `(index, diff_ms)`, or `None`
    /// when the list is empty or the closest element is farther away than
    /// the configured cutoff.
    #[must_use]
    pub fn find_closest(&self, target: f64, timestamps: &[f64]) -> Option<(usize, f64)> {
        if timestamps.is_empty() {
            return None;
        }

        let mut left = 0_usize;
        let mut right = timestamps.len() - 1;
        let mut closest_idx = 0_usize;
        let mut min_diff = (timestamps[0] - target).abs();

        while left <= right {
            let mid = left + (right - left) / 2;
            let diff = (timestamps[mid] - target).abs();
            if diff < min_diff {
                min_diff = diff;
                closest_idx = mid;
            }

            if timestamps[mid] < target {
                left = mid + 1;
            } else if timestamps[mid] > target {
                if mid == 0 {
                    break;
                }
                right = mid - 1;
            } else {
                return Some((mid, 0.0));
            }
        }

        let diff_ms = min_diff * 1000.0;
        if diff_ms > self.max_diff_ms {
            return None;
        }
        Some((closest_idx, diff_ms))
    }
}

#[cfg(test)]
#[path = "matcher_test.rs"]
mod tests;
