use super::VideoReader;
use anyhow::{anyhow, Context, Result};
use opencv::{core, prelude::*};
use std::path::Path;

use ffmpeg_next::ffi;

/// Video reader backed by FFmpeg via ffmpeg-next, decoding on the CPU.
///
/// Seeking lands on the keyframe at or before the requested frame; the next
/// `read_frame` then decodes forward and discards frames until it reaches
/// the requested index, so the returned frame is exact.
pub struct FfmpegReader {
    input_ctx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::codec::decoder::Video,
    video_stream_index: usize,
    /// Lazily created on first frame (source format is only known then).
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    width: u32,
    height: u32,
    source_fps: f64,
    /// Seconds per stream timestamp tick.
    time_base: f64,
    start_pts: i64,
    total_frames: usize,
    /// Index of the next frame `read_frame` returns.
    position: usize,
    /// Set after a seek until the requested frame has been decoded.
    seek_target: Option<usize>,
    packet: ffmpeg_next::codec::packet::Packet,
    /// Whether we've sent EOF to the decoder.
    eof_sent: bool,
}

// SAFETY: a FfmpegReader is owned by exactly one search at a time and
// the raw pointers inside ffmpeg-next types are never shared across threads.
unsafe impl Send for FfmpegReader {}

impl FfmpegReader {
    pub fn new(path: &str) -> Result<Self> {
        ffmpeg_next::init().context("Failed to initialize FFmpeg")?;

        let source = Path::new(path);
        if !source.exists() {
            return Err(anyhow!("Video file not found: {}", path));
        }

        let input_ctx = ffmpeg_next::format::input(&source).context("Failed to open video file")?;

        let video_stream = input_ctx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| anyhow!("No video stream found in {}", path))?;

        let video_stream_index = video_stream.index();

        // --- Determine FPS, time base & frame count before we move decoder_ctx ---
        let rational_fps = video_stream.avg_frame_rate();
        if rational_fps.denominator() <= 0 || rational_fps.numerator() <= 0 {
            return Err(anyhow!("Could not determine frame rate of {}", path));
        }
        let source_fps = rational_fps.numerator() as f64 / rational_fps.denominator() as f64;

        let tb = video_stream.time_base();
        let time_base = tb.numerator() as f64 / tb.denominator().max(1) as f64;
        let start_pts = match video_stream.start_time() {
            ffi::AV_NOPTS_VALUE => 0,
            pts => pts,
        };

        let stream_frames = video_stream.frames().max(0) as usize;
        let duration_secs = input_ctx.duration() as f64 / ffi::AV_TIME_BASE as f64;

        let total_frames = if stream_frames == 0 {
            (duration_secs * source_fps).round() as usize
        } else {
            stream_frames
        };
        if total_frames == 0 {
            return Err(anyhow!("Could not determine frame count of {}", path));
        }

        tracing::info!(
            "FfmpegReader: opened {}, duration={:.2}s, fps={:.2}, stream_frames={}, estimated_total={}",
            path,
            duration_secs,
            source_fps,
            stream_frames,
            total_frames
        );

        let decoder_ctx =
            ffmpeg_next::codec::context::Context::from_parameters(video_stream.parameters())
                .context("Failed to create decoder context")?;

        let decoder = decoder_ctx
            .decoder()
            .video()
            .context("Failed to open video decoder")?;

        let width = decoder.width();
        let height = decoder.height();
        tracing::debug!("FfmpegReader: using CPU software decoding ({}x{})", width, height);

        Ok(Self {
            input_ctx,
            decoder,
            video_stream_index,
            scaler: None,
            width,
            height,
            source_fps,
            time_base,
            start_pts,
            total_frames,
            position: 0,
            seek_target: None,
            packet: ffmpeg_next::codec::packet::Packet::empty(),
            eof_sent: false,
        })
    }

    /// Retrieve the next decoded frame from the stream, feeding packets as needed.
    fn decode_next(&mut self, target_frame: &mut ffmpeg_next::util::frame::Video) -> Result<()> {
        loop {
            match self.decoder.receive_frame(target_frame) {
                Ok(()) => return Ok(()),
                Err(ffmpeg_next::Error::Other { errno: ffi::EAGAIN }) => {
                    if self.eof_sent {
                        return Err(anyhow!("End of stream"));
                    }
                }
                Err(ffmpeg_next::Error::Eof) => {
                    return Err(anyhow!("End of stream"));
                }
                Err(e) => return Err(anyhow!("Decoder error: {}", e)),
            }

            // Feed packets until we find a video packet OR reach EOF
            let mut found_packet = false;
            while self.packet.read(&mut self.input_ctx).is_ok() {
                if self.packet.stream() == self.video_stream_index {
                    self.decoder
                        .send_packet(&self.packet)
                        .context("Failed to send packet to decoder")?;
                    found_packet = true;
                    break;
                }
            }

            if !found_packet {
                self.decoder
                    .send_eof()
                    .context("Failed to send EOF to decoder")?;
                self.eof_sent = true;
            }
        }
    }

    /// Frame index of a decoded frame, derived from its presentation timestamp.
    fn frame_index(&self, frame: &ffmpeg_next::util::frame::Video) -> Option<usize> {
        let pts = frame.timestamp().or_else(|| frame.pts())?;
        Some(pts_to_frame(pts, self.start_pts, self.time_base, self.source_fps))
    }

    fn get_or_create_scaler(
        &mut self,
        src_format: ffmpeg_next::format::Pixel,
    ) -> Result<&mut ffmpeg_next::software::scaling::Context> {
        if self.scaler.is_none() {
            let scaler = ffmpeg_next::software::scaling::Context::get(
                src_format,
                self.width,
                self.height,
                ffmpeg_next::format::Pixel::BGR24,
                self.width,
                self.height,
                ffmpeg_next::software::scaling::Flags::BILINEAR,
            )
            .context("Failed to create scaler")?;
            self.scaler = Some(scaler);
        }
        self.scaler
            .as_mut()
            .ok_or_else(|| anyhow!("Scaler unavailable"))
    }

    fn to_bgr(
        &mut self,
        frame: &ffmpeg_next::util::frame::Video,
    ) -> Result<ffmpeg_next::util::frame::Video> {
        let scaler = self.get_or_create_scaler(frame.format())?;
        let mut bgr = ffmpeg_next::util::frame::Video::empty();
        scaler.run(frame, &mut bgr).context("Scaler failed")?;
        Ok(bgr)
    }
}

/// Frame index at a stream timestamp.
fn pts_to_frame(pts: i64, start_pts: i64, time_base: f64, fps: f64) -> usize {
    let seconds = (pts - start_pts) as f64 * time_base;
    (seconds * fps).round().max(0.0) as usize
}

/// Seek target in `AV_TIME_BASE` units for a frame of a stream starting at
/// `start_secs`.
fn seek_timestamp(frame_num: usize, fps: f64, start_secs: f64) -> i64 {
    let time_secs = start_secs + frame_num as f64 / fps;
    (time_secs * ffi::AV_TIME_BASE as f64) as i64
}

/// Convert a BGR24 ffmpeg frame to an OpenCV Mat.
/// Deep-copies the pixel rows so the Mat owns its data.
fn bgr_frame_to_mat(frame: &ffmpeg_next::util::frame::Video) -> Result<core::Mat> {
    let width = frame.width() as i32;
    let height = frame.height() as i32;
    let data = frame.data(0);
    let stride = frame.stride(0);
    let row_bytes = width as usize * 3;

    let mut mat = unsafe { core::Mat::new_rows_cols(height, width, core::CV_8UC3)? };

    for y in 0..height as usize {
        let src_offset = y * stride;
        let src_row = &data[src_offset..src_offset + row_bytes];
        let dst_ptr = mat.ptr_mut(y as i32)?;
        unsafe {
            std::ptr::copy_nonoverlapping(src_row.as_ptr(), dst_ptr, row_bytes);
        }
    }

    Ok(mat)
}

impl VideoReader for FfmpegReader {
    fn frame_count(&self) -> Result<usize> {
        Ok(self.total_frames)
    }

    fn source_fps(&self) -> Result<f64> {
        Ok(self.source_fps)
    }

    fn seek_to_frame(&mut self, frame_num: usize) -> Result<()> {
        if frame_num >= self.total_frames {
            return Err(anyhow!(
                "Frame {} is past the end of the video ({} frames)",
                frame_num,
                self.total_frames
            ));
        }
        let start_secs = self.start_pts as f64 * self.time_base;
        let timestamp = seek_timestamp(frame_num, self.source_fps, start_secs);
        self.input_ctx
            .seek(timestamp, ..timestamp)
            .context("Failed to seek")?;
        self.decoder.flush();
        self.eof_sent = false;
        self.scaler = None; // format might change after a seek
        self.seek_target = Some(frame_num);
        self.position = frame_num;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<core::Mat> {
        let mut raw = ffmpeg_next::util::frame::Video::empty();
        if let Some(target) = self.seek_target {
            // Frames without a timestamp follow the last one that had one
            let mut last_index: Option<usize> = None;
            loop {
                self.decode_next(&mut raw)?;
                let index = self
                    .frame_index(&raw)
                    .or_else(|| last_index.map(|i| i + 1))
                    .ok_or_else(|| {
                        anyhow!(
                            "Frame decoded after seeking to frame {} has no timestamp",
                            target
                        )
                    })?;
                if index >= target {
                    break;
                }
                last_index = Some(index);
            }
            self.seek_target = None;
        } else {
            self.decode_next(&mut raw)?;
        }

        let bgr = self.to_bgr(&raw)?;
        let mat = bgr_frame_to_mat(&bgr)?;
        self.position += 1;
        tracing::trace!("FfmpegReader: decoded frame, next position {}", self.position);

        Ok(mat)
    }
}
