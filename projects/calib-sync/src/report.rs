// Rendering of synchronized ranges for the command line

use crate::sources::VideoSource;
use crate::sync::types::{PostOffsetBounds, SyncResult};
use anyhow::{anyhow, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

/// Clip range of one video
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StreamRange {
    pub name: String,
    pub path: String,
    pub start_frame: i64,
    pub end_frame: i64,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RangeReport {
    pub bounds: PostOffsetBounds,
    pub streams: Vec<StreamRange>,
}

impl RangeReport {
    pub fn new(sources: &[VideoSource], result: &SyncResult) -> Result<Self> {
        if sources.len() != result.frame_ranges.len() {
            return Err(anyhow!(
                "{} sources but {} synchronized ranges",
                sources.len(),
                result.frame_ranges.len()
            ));
        }

        let streams = sources
            .iter()
            .zip(result.frame_ranges.iter().zip(&result.time_ranges))
            .map(|(source, (frames, times))| StreamRange {
                name: source.name.clone(),
                path: source.path.to_string_lossy().to_string(),
                start_frame: frames.start,
                end_frame: frames.end,
                start_seconds: times.start,
                end_seconds: times.end,
            })
            .collect();

        Ok(Self {
            bounds: result.bounds,
            streams,
        })
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Csv => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                for stream in &self.streams {
                    writer.serialize(stream)?;
                }
                let bytes = writer.into_inner().map_err(|e| anyhow!("{}", e))?;
                Ok(String::from_utf8(bytes)?)
            }
            OutputFormat::Text => {
                let mut out = format!(
                    "Common window (post-offset frames): [{}, {})\n",
                    self.bounds.lo, self.bounds.hi
                );
                for stream in &self.streams {
                    out.push_str(&format!(
                        "{}: frames [{}, {}), time [{:.3} s, {:.3} s)\n",
                        stream.name,
                        stream.start_frame,
                        stream.end_frame,
                        stream.start_seconds,
                        stream.end_seconds
                    ));
                }
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::synchronizer::synchronize;
    use crate::sync::types::FrameRange;

    fn sample_report() -> RangeReport {
        let sources = vec![
            VideoSource::new(0, "/v/left.mp4"),
            VideoSource::new(1, "/v/right.mp4"),
        ];
        let result = synchronize(
            &[100, 120],
            &[30.0, 30.0],
            &[FrameRange::new(10, 90), FrameRange::new(5, 95)],
            &[0, 5],
        )
        .unwrap();
        RangeReport::new(&sources, &result).unwrap()
    }

    #[test]
    fn test_text_report() {
        let text = sample_report().render(OutputFormat::Text).unwrap();
        assert!(text.starts_with("Common window (post-offset frames): [10, 90)"));
        assert!(text.contains("right.mp4: frames [15, 95), time [0.500 s, 3.167 s)"));
    }

    #[test]
    fn test_json_report() {
        let json = sample_report().render(OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["bounds"]["lo"], 10);
        assert_eq!(value["streams"][1]["start_frame"], 15);
        assert_eq!(value["streams"][0]["name"], "left.mp4");
    }

    #[test]
    fn test_csv_report() {
        let csv = sample_report().render(OutputFormat::Csv).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("name,path,start_frame,end_frame,start_seconds,end_seconds")
        );
        assert!(lines.next().unwrap().starts_with("left.mp4,/v/left.mp4,10,90,"));
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn test_mismatched_sources_rejected() {
        let result = synchronize(&[10], &[30.0], &[FrameRange::new(0, 10)], &[0]).unwrap();
        assert!(RangeReport::new(&[], &result).is_err());
    }
}
