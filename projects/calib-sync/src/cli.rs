use crate::report::{OutputFormat, RangeReport};
use crate::sources::{resolve_sources, VideoSource};
use crate::sync::audio_offset::{
    find_time_offsets, AudioExtractor, FfmpegAudioExtractor, FingerprintOptions,
};
use crate::sync::calibration::{find_calibration_range, CalibrationOptions};
use crate::sync::observer::ProgressObserver;
use crate::sync::offset::{find_offset_range, OffsetRangeOptions};
use crate::video::chessboard::ChessboardDetector;
use crate::video::{Backend, BoardDims};
use anyhow::{bail, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Folder containing the videos
    #[arg(long, env = "CALIB_SYNC_VIDEO_ROOT", default_value = ".")]
    pub folder: PathBuf,

    /// Decoding backend
    #[arg(long, value_enum, env = "CALIB_SYNC_BACKEND", default_value_t = Backend::Opencv)]
    pub backend: Backend,

    /// How to print the resulting ranges
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clip ranges from time offsets and a fixed end cutoff
    Offset {
        #[command(flatten)]
        streams: StreamArgs,

        /// Seconds to cut off the end of every video
        #[arg(long, default_value_t = 2.0)]
        end_cutoff: f64,
    },
    /// Clip ranges bounded by the first and last frames showing the calibration board
    Calibration {
        #[command(flatten)]
        streams: StreamArgs,

        /// Inner corners of the board as COLSxROWS, e.g. 9x6
        #[arg(long, value_parser = parse_board)]
        board: BoardDims,

        /// Seconds between sampled frames
        #[arg(long, default_value_t = 1.0)]
        seek_interval: f64,

        /// Minimum seconds to cut off the end of every video
        #[arg(long, default_value_t = 20.0)]
        end_cutoff: f64,

        /// Scan videos concurrently
        #[arg(long)]
        parallel: bool,

        /// Do not draw scan progress
        #[arg(long)]
        quiet: bool,
    },
}

#[derive(ClapArgs, Debug)]
pub struct StreamArgs {
    /// Video file names inside the folder; all .mp4 files when omitted
    pub videos: Vec<String>,

    /// Comma-separated time offsets in seconds, one per video, or `auto` to
    /// estimate them from the audio tracks (default: all zero)
    #[arg(long, value_parser = parse_offsets, allow_hyphen_values = true)]
    pub offsets: Option<Offsets>,
}

/// Where the per-video time offsets come from
#[derive(Debug, Clone, PartialEq)]
pub enum Offsets {
    /// Estimated by matching the videos' audio
    Auto,
    Seconds(Vec<f64>),
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

fn parse_board(value: &str) -> Result<BoardDims, String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected COLSxROWS, got '{}'", value))?;
    let width: i32 = w
        .trim()
        .parse()
        .map_err(|_| format!("invalid column count '{}'", w))?;
    let height: i32 = h
        .trim()
        .parse()
        .map_err(|_| format!("invalid row count '{}'", h))?;
    Ok(BoardDims::new(width, height))
}

fn parse_offsets(value: &str) -> Result<Offsets, String> {
    if value.trim().eq_ignore_ascii_case("auto") {
        return Ok(Offsets::Auto);
    }
    value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| format!("invalid offset '{}'", part))
        })
        .collect::<Result<Vec<f64>, String>>()
        .map(Offsets::Seconds)
}

/// Time offsets for `sources`: all zero when none were given, estimated from
/// audio with `auto`.
fn offsets_for<E>(
    offsets: Option<&Offsets>,
    sources: &[VideoSource],
    extractor: &E,
) -> Result<Vec<f64>>
where
    E: AudioExtractor + ?Sized,
{
    match offsets {
        None => resolve_offsets(&[], sources.len()),
        Some(Offsets::Seconds(seconds)) => resolve_offsets(seconds, sources.len()),
        Some(Offsets::Auto) => {
            tracing::info!("Estimating time offsets of {} videos from audio", sources.len());
            let offsets = find_time_offsets(sources, extractor, &FingerprintOptions::default())?;
            for (source, offset) in sources.iter().zip(&offsets) {
                tracing::info!("{}: time offset {:.4} s", source.name, offset);
            }
            Ok(offsets)
        }
    }
}

/// Time offsets for `count` videos: all zero when none were given.
fn resolve_offsets(offsets: &[f64], count: usize) -> Result<Vec<f64>> {
    if offsets.is_empty() {
        return Ok(vec![0.0; count]);
    }
    if offsets.len() != count {
        bail!("{} offsets given for {} videos", offsets.len(), count);
    }
    Ok(offsets.to_vec())
}

/// Runs the selected command and returns the rendered report.
pub fn run(args: &Args) -> Result<String> {
    let (streams, result) = match &args.command {
        Command::Offset {
            streams,
            end_cutoff,
        } => {
            let sources = resolve_sources(&args.folder, &streams.videos)?;
            let offsets = offsets_for(streams.offsets.as_ref(), &sources, &FfmpegAudioExtractor)?;
            let options = OffsetRangeOptions {
                end_cutoff_seconds: *end_cutoff,
            };
            tracing::info!(
                "Computing offset ranges for {} videos in {}",
                sources.len(),
                args.folder.display()
            );
            let result = find_offset_range(&sources, &offsets, &args.backend, &options)?;
            (sources, result)
        }
        Command::Calibration {
            streams,
            board,
            seek_interval,
            end_cutoff,
            parallel,
            quiet,
        } => {
            let sources = resolve_sources(&args.folder, &streams.videos)?;
            let offsets = offsets_for(streams.offsets.as_ref(), &sources, &FfmpegAudioExtractor)?;
            let options = CalibrationOptions {
                board: *board,
                seek_interval_seconds: *seek_interval,
                end_cutoff_seconds: *end_cutoff,
                parallel: *parallel,
            };
            tracing::info!(
                "Scanning {} videos in {} for a {}x{} board",
                sources.len(),
                args.folder.display(),
                board.width,
                board.height
            );
            let detector = ChessboardDetector::default();
            let result = if *quiet {
                find_calibration_range(&sources, &offsets, &args.backend, &detector, &options, &())?
            } else {
                let observer = ProgressObserver::new();
                find_calibration_range(
                    &sources,
                    &offsets,
                    &args.backend,
                    &detector,
                    &options,
                    &observer,
                )?
            };
            (sources, result)
        }
    };

    RangeReport::new(&streams, &result)?.render(args.format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_board() {
        assert_eq!(parse_board("9x6").unwrap(), BoardDims::new(9, 6));
        assert_eq!(parse_board("8X5").unwrap(), BoardDims::new(8, 5));
        assert!(parse_board("9").is_err());
        assert!(parse_board("ax6").is_err());
    }

    #[test]
    fn test_resolve_offsets() {
        assert_eq!(resolve_offsets(&[], 3).unwrap(), vec![0.0; 3]);
        assert_eq!(resolve_offsets(&[0.0, 1.25], 2).unwrap(), vec![0.0, 1.25]);
        assert!(resolve_offsets(&[0.5], 2).is_err());
    }

    #[test]
    fn test_parse_calibration_command() {
        let args = Args::try_parse_from([
            "calib-sync",
            "--folder",
            "/data/session",
            "--format",
            "json",
            "calibration",
            "left.mp4",
            "right.mp4",
            "--offsets",
            "0,-0.35",
            "--board",
            "9x6",
            "--parallel",
        ])
        .unwrap();

        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.backend, Backend::Opencv);
        match args.command {
            Command::Calibration {
                streams,
                board,
                seek_interval,
                end_cutoff,
                parallel,
                quiet,
            } => {
                assert_eq!(streams.videos, vec!["left.mp4", "right.mp4"]);
                assert_eq!(streams.offsets, Some(Offsets::Seconds(vec![0.0, -0.35])));
                assert_eq!(board, BoardDims::new(9, 6));
                assert_eq!(seek_interval, 1.0);
                assert_eq!(end_cutoff, 20.0);
                assert!(parallel);
                assert!(!quiet);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_offset_command_defaults() {
        let args =
            Args::try_parse_from(["calib-sync", "--backend", "ffmpeg", "offset"]).unwrap();
        assert_eq!(args.backend, Backend::Ffmpeg);
        match args.command {
            Command::Offset {
                streams,
                end_cutoff,
            } => {
                assert!(streams.videos.is_empty());
                assert_eq!(streams.offsets, None);
                assert_eq!(end_cutoff, 2.0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_offsets() {
        assert_eq!(parse_offsets("auto").unwrap(), Offsets::Auto);
        assert_eq!(parse_offsets("AUTO").unwrap(), Offsets::Auto);
        assert_eq!(
            parse_offsets("-1.5, 0,2").unwrap(),
            Offsets::Seconds(vec![-1.5, 0.0, 2.0])
        );
        assert!(parse_offsets("1,x").is_err());
    }

    #[test]
    fn test_parse_auto_offsets_flag() {
        let args = Args::try_parse_from([
            "calib-sync",
            "offset",
            "a.mp4",
            "b.mp4",
            "--offsets",
            "auto",
        ])
        .unwrap();
        match args.command {
            Command::Offset { streams, .. } => assert_eq!(streams.offsets, Some(Offsets::Auto)),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_auto_offsets_come_from_audio() {
        use crate::sync::audio_offset::AudioTrack;

        let sources = vec![
            VideoSource::new(0, "/videos/a.mp4"),
            VideoSource::new(1, "/videos/b.mp4"),
        ];
        // Identical soundtracks line up with no shift beyond the fixed correction
        let extractor = |_: &VideoSource, _: f64| -> Result<AudioTrack> {
            let samples = (0..8000 * 5)
                .map(|i: i32| ((i * 7919) % 20_000 - 10_000) as i16)
                .collect();
            Ok(AudioTrack {
                sample_rate: 8000,
                samples,
            })
        };

        let offsets = offsets_for(Some(&Offsets::Auto), &sources, &extractor).unwrap();
        assert_eq!(offsets, vec![0.0, 0.0083]);

        let fixed =
            offsets_for(Some(&Offsets::Seconds(vec![0.0, 1.0])), &sources, &extractor).unwrap();
        assert_eq!(fixed, vec![0.0, 1.0]);
        assert_eq!(offsets_for(None, &sources, &extractor).unwrap(), vec![0.0, 0.0]);
    }
}
