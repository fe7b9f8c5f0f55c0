use super::{BoardDims, PatternDetector};
use anyhow::Result;
use opencv::{
    calib3d,
    core::{Mat, Point2f, Size, Vector},
    imgproc,
    prelude::*,
};

/// Chessboard detector built on OpenCV's `find_chessboard_corners`.
///
/// Only reports whether the full inner-corner grid was found; corner
/// refinement is left to the calibration step that consumes the frames.
#[derive(Debug, Clone, Copy)]
pub struct ChessboardDetector {
    flags: i32,
}

impl Default for ChessboardDetector {
    fn default() -> Self {
        Self {
            flags: calib3d::CALIB_CB_ADAPTIVE_THRESH
                | calib3d::CALIB_CB_NORMALIZE_IMAGE
                | calib3d::CALIB_CB_FAST_CHECK,
        }
    }
}

impl PatternDetector for ChessboardDetector {
    fn detect(&self, frame: &Mat, board: BoardDims) -> Result<bool> {
        if frame.empty() {
            return Ok(false);
        }

        let gray = if frame.channels() == 1 {
            frame.clone()
        } else {
            let mut gray = Mat::default();
            imgproc::cvt_color_def(frame, &mut gray, imgproc::COLOR_BGR2GRAY)?;
            gray
        };

        let mut corners = Vector::<Point2f>::new();
        let found = calib3d::find_chessboard_corners(
            &gray,
            Size::new(board.width, board.height),
            &mut corners,
            self.flags,
        )?;

        Ok(found)
    }
}
