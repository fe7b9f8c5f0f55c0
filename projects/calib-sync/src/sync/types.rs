use serde::Serialize;

/// Metadata of one opened video that the range computations read
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Position of this stream's entry in the time offsets
    pub index: usize,
    pub name: String,
    pub frame_count: usize,
    pub fps: f64,
}

/// Frame interval in one stream's own index space, end exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameRange {
    pub start: i64,
    pub end: i64,
}

impl FrameRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> i64 {
        (self.end - self.start).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Same interval expressed in seconds at the given frame rate.
    pub fn to_time_range(self, fps: f64) -> TimeRange {
        TimeRange {
            start: self.start as f64 / fps,
            end: self.end as f64 / fps,
        }
    }
}

impl From<(i64, i64)> for FrameRange {
    fn from((start, end): (i64, i64)) -> Self {
        Self { start, end }
    }
}

/// Interval in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

/// The window shared by every stream, in offset-free frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PostOffsetBounds {
    pub lo: i64,
    pub hi: i64,
}

/// Synchronized ranges, one entry per stream in input order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    pub bounds: PostOffsetBounds,
    pub frame_ranges: Vec<FrameRange>,
    pub time_ranges: Vec<TimeRange>,
}

/// Number of whole frames covered by `seconds` at `fps`.
///
/// Truncates toward zero (`as` cast), so a negative duration yields a
/// negative count rounded up, not down.
pub fn frames_for_duration(fps: f64, seconds: f64) -> i64 {
    (fps * seconds) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_for_duration_truncates() {
        assert_eq!(frames_for_duration(29.97, 1.0), 29);
        assert_eq!(frames_for_duration(30.0, 2.0), 60);
        assert_eq!(frames_for_duration(30.0, 0.999), 29);
        // Toward zero, not floor
        assert_eq!(frames_for_duration(30.0, -0.05), -1);
        assert_eq!(frames_for_duration(30.0, -0.02), 0);
    }

    #[test]
    fn test_frame_range_to_time_range() {
        let range = FrameRange::new(15, 95);
        let time = range.to_time_range(30.0);
        assert_eq!(time.start, 0.5);
        assert_eq!(time.end, 95.0 / 30.0);
        assert_eq!(range.len(), 80);
        assert!(FrameRange::new(10, 10).is_empty());
    }
}
