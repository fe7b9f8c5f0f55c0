// Offset range finder: trims each video to [offset, end - cutoff] and
// synchronizes the results. Reads metadata only; no frames are decoded.

use crate::error::SyncError;
use crate::sources::VideoSource;
use crate::sync::synchronizer::synchronize;
use crate::sync::types::{frames_for_duration, FrameRange, SyncResult};
use crate::sync::{check_duration, frame_offset, open_stream};
use crate::video::VideoOpener;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetRangeOptions {
    /// Seconds cut from the end of every video
    pub end_cutoff_seconds: f64,
}

impl Default for OffsetRangeOptions {
    fn default() -> Self {
        Self {
            end_cutoff_seconds: 2.0,
        }
    }
}

/// Finds frame and time ranges at which to clip `sources` so that, after
/// removing each video's time offset, all clips cover the same moments.
pub fn find_offset_range<O>(
    sources: &[VideoSource],
    time_offsets: &[f64],
    opener: &O,
    options: &OffsetRangeOptions,
) -> Result<SyncResult, SyncError>
where
    O: VideoOpener + ?Sized,
{
    check_duration("end cutoff", options.end_cutoff_seconds)?;

    let mut frame_counts = Vec::with_capacity(sources.len());
    let mut frame_rates = Vec::with_capacity(sources.len());
    let mut frame_offsets = Vec::with_capacity(sources.len());
    let mut ranges = Vec::with_capacity(sources.len());

    for source in sources {
        let (reader, info) = open_stream(opener, source)?;
        // Only metadata is needed; release the video right away
        drop(reader);

        let offset = frame_offset(&info, time_offsets)?;
        let trim_frames = frames_for_duration(info.fps, options.end_cutoff_seconds);
        let range = FrameRange::new(offset, info.frame_count as i64 - trim_frames);

        tracing::info!(
            "{}: {} frames at {:.3} fps, offset {} frames, candidate range ({}, {})",
            info.name,
            info.frame_count,
            info.fps,
            offset,
            range.start,
            range.end
        );

        frame_counts.push(info.frame_count);
        frame_rates.push(info.fps);
        frame_offsets.push(offset);
        ranges.push(range);
    }

    synchronize(&frame_counts, &frame_rates, &ranges, &frame_offsets)
}
