// Audio-based time offset estimation: fingerprints the opening minutes of
// each video's soundtrack with FFT peak constellations and takes the most
// common peak delay against the first video.

use crate::error::SyncError;
use crate::sources::VideoSource;
use anyhow::{anyhow, Context, Result};
use ffmpeg_next::ffi;
use ffmpeg_next::software::resampling;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::{Sample, Type};
use rustfft::{num_complex::Complex, FftPlanner};
use std::collections::{BTreeMap, HashMap};

/// Seconds of the reference (first) video that are fingerprinted.
pub const REFERENCE_SECONDS: f64 = 120.0;
/// Seconds of every other video that are fingerprinted.
pub const SAMPLE_SECONDS: f64 = 60.0;

/// Peaks must be stronger than this to count.
const PEAK_FLOOR: f64 = 1.0;

/// Mono 16-bit PCM taken from the start of a video's audio stream
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

/// Fingerprint shape. Windows of `fft_bin_size` samples advance by
/// `fft_bin_size - overlap`; peaks are picked per box of `box_width` windows
/// by `box_height` frequency bins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FingerprintOptions {
    pub fft_bin_size: usize,
    pub overlap: usize,
    pub box_height: usize,
    pub box_width: usize,
    pub peaks_per_box: usize,
    /// Constant added to every measured delay
    pub correction_seconds: f64,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self {
            fft_bin_size: 1024,
            overlap: 0,
            box_height: 512,
            box_width: 43,
            peaks_per_box: 7,
            correction_seconds: 0.0083,
        }
    }
}

impl FingerprintOptions {
    fn hop(&self) -> usize {
        self.fft_bin_size - self.overlap
    }

    /// Fingerprint windows per second of audio.
    fn windows_per_second(&self, sample_rate: u32) -> f64 {
        sample_rate as f64 / (self.fft_bin_size as f64 - self.overlap as f64 / 2.0)
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.fft_bin_size < 2 || self.overlap >= self.fft_bin_size {
            return Err(SyncError::InvalidInput(format!(
                "FFT window of {} samples with overlap {} does not advance",
                self.fft_bin_size, self.overlap
            )));
        }
        if self.box_height == 0 || self.box_width == 0 || self.peaks_per_box == 0 {
            return Err(SyncError::InvalidInput(
                "fingerprint boxes must be non-empty".to_string(),
            ));
        }
        if !self.correction_seconds.is_finite() {
            return Err(SyncError::InvalidInput(
                "delay correction must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pulls the opening audio of a video as mono PCM.
pub trait AudioExtractor: Sync {
    /// Returns at most `max_seconds` of audio from the start of `source`.
    fn extract(&self, source: &VideoSource, max_seconds: f64) -> Result<AudioTrack>;
}

impl<F> AudioExtractor for F
where
    F: Fn(&VideoSource, f64) -> Result<AudioTrack> + Sync,
{
    fn extract(&self, source: &VideoSource, max_seconds: f64) -> Result<AudioTrack> {
        self(source, max_seconds)
    }
}

#[derive(Debug, Clone, Copy)]
struct Peak {
    intensity: f64,
    window: usize,
    bin: usize,
}

/// Strongest spectral peaks of a track: frequency bin -> windows it peaks in
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fingerprint {
    peaks: BTreeMap<usize, Vec<usize>>,
}

impl Fingerprint {
    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn peak_count(&self) -> usize {
        self.peaks.values().map(Vec::len).sum()
    }
}

/// Builds the peak constellation of `samples`. A trailing partial window is
/// ignored.
pub fn fingerprint(
    samples: &[i16],
    options: &FingerprintOptions,
) -> Result<Fingerprint, SyncError> {
    options.validate()?;
    let size = options.fft_bin_size;
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(size);
    let mut buffer = vec![Complex::new(0.0, 0.0); size];
    let mut boxes: HashMap<(usize, usize), Vec<Peak>> = HashMap::new();

    for (window, start) in (0..samples.len()).step_by(options.hop()).enumerate() {
        let Some(chunk) = samples.get(start..start + size) else {
            break;
        };
        for (slot, &sample) in buffer.iter_mut().zip(chunk) {
            *slot = Complex::new(sample as f64, 0.0);
        }
        fft.process(&mut buffer);

        for (bin, value) in buffer[..size / 2].iter().enumerate() {
            let intensity = (value.norm() * 100.0).round() / 100.0;
            if intensity <= PEAK_FLOOR {
                continue;
            }
            let key = (window / options.box_width, bin / options.box_height);
            keep_strongest(
                boxes.entry(key).or_default(),
                Peak {
                    intensity,
                    window,
                    bin,
                },
                options.peaks_per_box,
            );
        }
    }

    let mut peaks: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for peak in boxes.into_values().flatten() {
        peaks.entry(peak.bin).or_default().push(peak.window);
    }
    for windows in peaks.values_mut() {
        windows.sort_unstable();
    }
    Ok(Fingerprint { peaks })
}

fn keep_strongest(best: &mut Vec<Peak>, peak: Peak, limit: usize) {
    if best.len() < limit {
        best.push(peak);
        return;
    }
    let weakest = best
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.intensity.total_cmp(&b.1.intensity))
        .map(|(i, p)| (i, p.intensity));
    if let Some((i, intensity)) = weakest {
        if peak.intensity > intensity {
            best[i] = peak;
        }
    }
}

/// Most common window delay `other - reference` over all peaks the two
/// fingerprints share a frequency bin for. Ties go to the smaller delay
/// magnitude, then to the positive one. `None` when no bin is shared.
pub fn most_common_delay(reference: &Fingerprint, other: &Fingerprint) -> Option<i64> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for (bin, other_windows) in &other.peaks {
        let Some(reference_windows) = reference.peaks.get(bin) else {
            continue;
        };
        for &o in other_windows {
            for &r in reference_windows {
                *counts.entry(o as i64 - r as i64).or_default() += 1;
            }
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| {
            a.1.cmp(&b.1)
                .then(b.0.abs().cmp(&a.0.abs()))
                .then(a.0.cmp(&b.0))
        })
        .map(|(delay, _)| delay)
}

/// Seconds by which the same sound occurs later in `other` than in
/// `reference`, rounded to 0.1 ms.
pub fn delay_seconds(
    reference: &Fingerprint,
    other: &Fingerprint,
    sample_rate: u32,
    options: &FingerprintOptions,
) -> Option<f64> {
    let windows = most_common_delay(reference, other)?;
    let seconds =
        windows as f64 / options.windows_per_second(sample_rate) + options.correction_seconds;
    Some((seconds * 10_000.0).round() / 10_000.0)
}

/// Estimates a time offset per source from its soundtrack, relative to the
/// first source. Offsets are shifted so the smallest is zero: the video that
/// started recording last gets 0 and every other one the seconds to skip to
/// line up with it. All tracks must share a sample rate.
pub fn find_time_offsets<E>(
    sources: &[VideoSource],
    extractor: &E,
    options: &FingerprintOptions,
) -> Result<Vec<f64>, SyncError>
where
    E: AudioExtractor + ?Sized,
{
    options.validate()?;
    let Some((reference_source, others)) = sources.split_first() else {
        return Err(SyncError::InvalidInput(
            "at least one video is required".to_string(),
        ));
    };

    let reference_track = load_track(extractor, reference_source, REFERENCE_SECONDS)?;
    let sample_rate = reference_track.sample_rate;
    let reference = fingerprint(&reference_track.samples, options)?;
    tracing::info!(
        "{}: {} audio peaks from {:.1} s at {} Hz",
        reference_source.name,
        reference.peak_count(),
        reference_track.samples.len() as f64 / sample_rate as f64,
        sample_rate
    );

    let mut delays = Vec::with_capacity(sources.len());
    delays.push(0.0);
    for source in others {
        let track = load_track(extractor, source, SAMPLE_SECONDS)?;
        if track.sample_rate != sample_rate {
            return Err(SyncError::InvalidInput(format!(
                "audio of {} is sampled at {} Hz but {} uses {} Hz",
                source.name, track.sample_rate, reference_source.name, sample_rate
            )));
        }
        let print = fingerprint(&track.samples, options)?;
        let delay = delay_seconds(&reference, &print, sample_rate, options).ok_or_else(|| {
            SyncError::AudioMismatch {
                reference: reference_source.name.clone(),
                stream: source.name.clone(),
            }
        })?;
        tracing::info!(
            "{}: audio runs {:.4} s behind {}",
            source.name,
            delay,
            reference_source.name
        );
        delays.push(delay);
    }

    let earliest = delays.iter().copied().fold(f64::INFINITY, f64::min);
    Ok(delays
        .into_iter()
        .map(|delay| ((delay - earliest) * 10_000.0).round() / 10_000.0)
        .collect())
}

fn load_track<E>(extractor: &E, source: &VideoSource, seconds: f64) -> Result<AudioTrack, SyncError>
where
    E: AudioExtractor + ?Sized,
{
    let mut track = extractor
        .extract(source, seconds)
        .with_context(|| format!("Failed to extract audio from {}", source.path.display()))?;
    if track.sample_rate == 0 {
        return Err(SyncError::InvalidInput(format!(
            "audio of {} has no sample rate",
            source.name
        )));
    }
    track
        .samples
        .truncate((seconds * track.sample_rate as f64) as usize);
    Ok(track)
}

/// Decodes audio with FFmpeg and downmixes it to mono 16-bit PCM at the
/// stream's own sample rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegAudioExtractor;

impl AudioExtractor for FfmpegAudioExtractor {
    fn extract(&self, source: &VideoSource, max_seconds: f64) -> Result<AudioTrack> {
        ffmpeg_next::init().context("Failed to initialize FFmpeg")?;
        if !source.path.exists() {
            return Err(anyhow!("Video file not found: {}", source.path.display()));
        }

        let mut input_ctx =
            ffmpeg_next::format::input(&source.path).context("Failed to open video file")?;
        let audio_stream = input_ctx
            .streams()
            .best(ffmpeg_next::media::Type::Audio)
            .ok_or_else(|| anyhow!("No audio stream found in {}", source.path.display()))?;
        let stream_index = audio_stream.index();
        let decoder_ctx =
            ffmpeg_next::codec::context::Context::from_parameters(audio_stream.parameters())
                .context("Failed to create decoder context")?;
        let mut decoder = decoder_ctx
            .decoder()
            .audio()
            .context("Failed to open audio decoder")?;

        let sample_rate = decoder.rate();
        let limit = (max_seconds * sample_rate as f64) as usize;
        let mut downmix = Downmix::default();
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();

        while downmix.samples.len() < limit && packet.read(&mut input_ctx).is_ok() {
            if packet.stream() != stream_index {
                continue;
            }
            decoder
                .send_packet(&packet)
                .context("Failed to send packet to decoder")?;
            downmix.drain(&mut decoder)?;
        }
        if downmix.samples.len() < limit {
            decoder.send_eof().context("Failed to send EOF to decoder")?;
            downmix.drain(&mut decoder)?;
        }

        let mut samples = downmix.samples;
        samples.truncate(limit);
        tracing::debug!(
            "Extracted {} audio samples at {} Hz from {}",
            samples.len(),
            sample_rate,
            source.name
        );
        Ok(AudioTrack {
            sample_rate,
            samples,
        })
    }
}

/// Collects decoded frames as mono packed `i16`
#[derive(Default)]
struct Downmix {
    /// Created on the first frame, when the source layout is known
    resampler: Option<resampling::Context>,
    samples: Vec<i16>,
}

impl Downmix {
    fn drain(&mut self, decoder: &mut ffmpeg_next::decoder::Audio) -> Result<()> {
        let mut decoded = ffmpeg_next::util::frame::Audio::empty();
        loop {
            match decoder.receive_frame(&mut decoded) {
                Ok(()) => self.push(&decoded)?,
                Err(ffmpeg_next::Error::Other { errno: ffi::EAGAIN })
                | Err(ffmpeg_next::Error::Eof) => return Ok(()),
                Err(e) => return Err(anyhow!("Decoder error: {}", e)),
            }
        }
    }

    fn push(&mut self, frame: &ffmpeg_next::util::frame::Audio) -> Result<()> {
        if self.resampler.is_none() {
            let layout = if frame.channel_layout().bits() == 0 {
                match frame.channels() {
                    1 => ChannelLayout::MONO,
                    _ => ChannelLayout::STEREO,
                }
            } else {
                frame.channel_layout()
            };
            let resampler = resampling::Context::get(
                frame.format(),
                layout,
                frame.rate(),
                Sample::I16(Type::Packed),
                ChannelLayout::MONO,
                frame.rate(),
            )
            .context("Failed to create resampling context")?;
            self.resampler = Some(resampler);
        }
        let resampler = self
            .resampler
            .as_mut()
            .ok_or_else(|| anyhow!("Resampler unavailable"))?;

        let mut mono = ffmpeg_next::util::frame::Audio::empty();
        resampler.run(frame, &mut mono).context("Resampling failed")?;
        let bytes = mono
            .data(0)
            .get(..mono.samples() * 2)
            .ok_or_else(|| anyhow!("Resampled frame is shorter than its sample count"))?;
        self.samples.extend(
            bytes
                .chunks_exact(2)
                .map(|pair| i16::from_ne_bytes([pair[0], pair[1]])),
        );
        Ok(())
    }
}
