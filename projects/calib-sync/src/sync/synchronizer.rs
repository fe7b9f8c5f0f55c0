// Range synchronizer: intersects per-stream candidate ranges once each
// stream's frame offset is removed, then maps the shared window back.

use crate::error::SyncError;
use crate::sync::types::{FrameRange, PostOffsetBounds, SyncResult, TimeRange};

/// Computes the largest post-offset window common to all streams and
/// re-expresses it in every stream's own frame and time coordinates.
///
/// All slices are indexed by stream and must have the same, non-zero length.
/// After subtracting `frame_offsets[i]`, every returned frame range equals
/// the same `(lo, hi)` pair.
pub fn synchronize(
    frame_counts: &[usize],
    frame_rates: &[f64],
    candidate_ranges: &[FrameRange],
    frame_offsets: &[i64],
) -> Result<SyncResult, SyncError> {
    validate(frame_counts, frame_rates, candidate_ranges, frame_offsets)?;

    let shortest = frame_counts.iter().copied().min().unwrap_or(0) as i64;
    let mut bounds = PostOffsetBounds { lo: 0, hi: shortest };

    for (range, &offset) in candidate_ranges.iter().zip(frame_offsets) {
        bounds.lo = bounds.lo.max(shift(range.start, offset)?);
        bounds.hi = bounds.hi.min(shift(range.end, offset)?);
    }

    if bounds.lo > bounds.hi {
        return Err(SyncError::DegenerateRange {
            lo: bounds.lo,
            hi: bounds.hi,
        });
    }

    let frame_ranges = frame_offsets
        .iter()
        .map(|&offset| {
            let start = bounds.lo.checked_add(offset);
            let end = bounds.hi.checked_add(offset);
            match (start, end) {
                (Some(start), Some(end)) => Ok(FrameRange::new(start, end)),
                _ => Err(out_of_range(offset)),
            }
        })
        .collect::<Result<Vec<FrameRange>, SyncError>>()?;

    let time_ranges: Vec<TimeRange> = frame_ranges
        .iter()
        .zip(frame_rates)
        .map(|(range, &fps)| range.to_time_range(fps))
        .collect();

    tracing::debug!(
        "Synchronized {} streams: post-offset bounds ({}, {})",
        frame_ranges.len(),
        bounds.lo,
        bounds.hi
    );

    Ok(SyncResult {
        bounds,
        frame_ranges,
        time_ranges,
    })
}

/// Moves a native frame index into post-offset space.
fn shift(frame: i64, offset: i64) -> Result<i64, SyncError> {
    frame.checked_sub(offset).ok_or_else(|| out_of_range(offset))
}

fn out_of_range(offset: i64) -> SyncError {
    SyncError::InvalidInput(format!("frame offset {} is out of range", offset))
}

fn validate(
    frame_counts: &[usize],
    frame_rates: &[f64],
    candidate_ranges: &[FrameRange],
    frame_offsets: &[i64],
) -> Result<(), SyncError> {
    let n = frame_counts.len();
    if n == 0 {
        return Err(SyncError::InvalidInput(
            "at least one stream is required".to_string(),
        ));
    }
    if frame_rates.len() != n || candidate_ranges.len() != n || frame_offsets.len() != n {
        return Err(SyncError::InvalidInput(format!(
            "mismatched lengths: {} frame counts, {} frame rates, {} ranges, {} offsets",
            n,
            frame_rates.len(),
            candidate_ranges.len(),
            frame_offsets.len()
        )));
    }
    if let Some(i) = frame_counts.iter().position(|&count| count == 0) {
        return Err(SyncError::InvalidInput(format!(
            "stream {} has no frames",
            i
        )));
    }
    if let Some(i) = frame_rates
        .iter()
        .position(|&fps| !fps.is_finite() || fps <= 0.0)
    {
        return Err(SyncError::InvalidInput(format!(
            "stream {} has invalid frame rate {}",
            i, frame_rates[i]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(pairs: &[(i64, i64)]) -> Vec<FrameRange> {
        pairs.iter().copied().map(FrameRange::from).collect()
    }

    #[test]
    fn test_two_stream_scenario() {
        let result = synchronize(
            &[100, 120],
            &[30.0, 30.0],
            &ranges(&[(10, 90), (5, 95)]),
            &[0, 5],
        )
        .unwrap();

        assert_eq!(result.bounds, PostOffsetBounds { lo: 10, hi: 90 });
        assert_eq!(result.frame_ranges, ranges(&[(10, 90), (15, 95)]));
        assert_eq!(result.time_ranges[1].start, 15.0 / 30.0);
        assert_eq!(result.time_ranges[1].end, 95.0 / 30.0);
    }

    #[test]
    fn test_ranges_coincide_after_removing_offsets() {
        let offsets = [0, 17, 42];
        let rates = [30.0, 29.97, 60.0];
        let result = synchronize(
            &[900, 1000, 1800],
            &rates,
            &ranges(&[(3, 850), (20, 990), (40, 1700)]),
            &offsets,
        )
        .unwrap();

        for (i, range) in result.frame_ranges.iter().enumerate() {
            assert_eq!(range.start - offsets[i], result.bounds.lo);
            assert_eq!(range.end - offsets[i], result.bounds.hi);
            assert_eq!(result.time_ranges[i].start, range.start as f64 / rates[i]);
            assert_eq!(result.time_ranges[i].end, range.end as f64 / rates[i]);
        }
    }

    #[test]
    fn test_hi_clamped_to_shortest_stream() {
        // Candidate ends exceed the shortest stream once offsets are removed
        let result = synchronize(&[50, 200], &[25.0, 25.0], &ranges(&[(0, 50), (0, 200)]), &[0, 0])
            .unwrap();
        assert_eq!(result.bounds, PostOffsetBounds { lo: 0, hi: 50 });
    }

    #[test]
    fn test_lo_clamped_at_zero() {
        // Start before the offset would put lo below zero
        let result =
            synchronize(&[100, 100], &[30.0, 30.0], &ranges(&[(0, 90), (2, 90)]), &[0, 10])
                .unwrap();
        assert_eq!(result.bounds.lo, 0);
        assert_eq!(result.frame_ranges, ranges(&[(0, 80), (10, 90)]));
    }

    #[test]
    fn test_identical_streams_keep_candidate_intersection() {
        let candidates = ranges(&[(12, 80), (12, 80), (12, 80)]);
        let result = synchronize(&[100; 3], &[30.0; 3], &candidates, &[0; 3]).unwrap();
        assert_eq!(result.frame_ranges, candidates);

        let result = synchronize(
            &[100; 2],
            &[30.0; 2],
            &ranges(&[(12, 80), (20, 70)]),
            &[0; 2],
        )
        .unwrap();
        assert_eq!(result.bounds, PostOffsetBounds { lo: 20, hi: 70 });
    }

    #[test]
    fn test_is_pure() {
        let args = (
            [300usize, 310],
            [30.0, 24.0],
            ranges(&[(30, 240), (0, 250)]),
            [30i64, 0],
        );
        let first = synchronize(&args.0, &args.1, &args.2, &args.3).unwrap();
        let second = synchronize(&args.0, &args.1, &args.2, &args.3).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_non_overlapping_ranges_are_degenerate() {
        let err = synchronize(
            &[100, 100],
            &[30.0, 30.0],
            &ranges(&[(10, 30), (50, 90)]),
            &[0, 0],
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::DegenerateRange { lo: 50, hi: 30 }));
    }

    #[test]
    fn test_touching_ranges_yield_empty_window() {
        let result =
            synchronize(&[100, 100], &[30.0, 30.0], &ranges(&[(10, 40), (40, 90)]), &[0, 0])
                .unwrap();
        assert!(result.frame_ranges.iter().all(FrameRange::is_empty));
    }

    #[test]
    fn test_rejects_invalid_input() {
        let one = ranges(&[(0, 10)]);
        assert!(matches!(
            synchronize(&[], &[], &[], &[]),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            synchronize(&[10, 10], &[30.0], &one, &[0]),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            synchronize(&[0], &[30.0], &one, &[0]),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            synchronize(&[10], &[0.0], &one, &[0]),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            synchronize(&[10], &[f64::NAN], &one, &[0]),
            Err(SyncError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_saturated_offsets_are_rejected() {
        let offset = crate::sync::types::frames_for_duration(30.0, -4.0e17);
        assert_eq!(offset, i64::MIN);
        let result = synchronize(&[300], &[30.0], &[FrameRange::new(offset, 240)], &[offset]);
        assert!(matches!(result, Err(SyncError::InvalidInput(_))));

        let result = synchronize(&[300], &[30.0], &ranges(&[(0, 240)]), &[i64::MAX]);
        assert!(matches!(result, Err(SyncError::InvalidInput(_))));
    }
}
