// Progress reporting for calibration scans.

use crate::error::ScanDirection;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Points in a calibration scan at which observers are notified
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchEvent<'a> {
    ScanStarted {
        stream: &'a str,
        direction: ScanDirection,
        from_frame: i64,
    },
    FrameSampled {
        stream: &'a str,
        direction: ScanDirection,
        frame: i64,
        found: bool,
    },
    ScanFinished {
        stream: &'a str,
        direction: ScanDirection,
        frame: i64,
        seconds: f64,
    },
    /// The scan ended without a result, either because no sampled frame
    /// showed the board or because a collaborator failed.
    ScanFailed {
        stream: &'a str,
        direction: ScanDirection,
        reason: &'a str,
    },
}

/// Receives scan progress. Must be shareable because streams may be
/// scanned on parallel workers.
pub trait SearchObserver: Sync {
    fn on_event(&self, event: SearchEvent<'_>);
}

/// No-op observer
impl SearchObserver for () {
    fn on_event(&self, _event: SearchEvent<'_>) {}
}

impl<F> SearchObserver for F
where
    F: Fn(SearchEvent<'_>) + Sync,
{
    fn on_event(&self, event: SearchEvent<'_>) {
        self(event)
    }
}

/// Renders one spinner per running scan on stderr.
pub struct ProgressObserver {
    multi: MultiProgress,
    bars: Mutex<HashMap<(String, ScanDirection), ProgressBar>>,
}

impl ProgressObserver {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {prefix} {msg} ({pos} samples)")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchObserver for ProgressObserver {
    fn on_event(&self, event: SearchEvent<'_>) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };

        match event {
            SearchEvent::ScanStarted {
                stream,
                direction,
                from_frame,
            } => {
                let pb = self.multi.add(ProgressBar::new_spinner());
                pb.set_style(Self::style());
                pb.enable_steady_tick(Duration::from_millis(120));
                let prefix = match direction {
                    ScanDirection::Forward => {
                        format!("Seeking first frame of {} usable for calibration", stream)
                    }
                    ScanDirection::Backward => format!("Seeking last usable frame of {}", stream),
                };
                pb.set_prefix(prefix);
                pb.set_message(format!("from frame {}", from_frame));
                bars.insert((stream.to_string(), direction), pb);
            }
            SearchEvent::FrameSampled {
                stream,
                direction,
                frame,
                ..
            } => {
                if let Some(pb) = bars.get(&(stream.to_string(), direction)) {
                    pb.inc(1);
                    pb.set_message(format!("at frame {}", frame));
                }
            }
            SearchEvent::ScanFinished {
                stream,
                direction,
                frame,
                seconds,
            } => {
                if let Some(pb) = bars.remove(&(stream.to_string(), direction)) {
                    pb.finish_with_message(format!("found at frame {} ({:.3} s)", frame, seconds));
                }
            }
            SearchEvent::ScanFailed {
                stream,
                direction,
                reason,
            } => {
                if let Some(pb) = bars.remove(&(stream.to_string(), direction)) {
                    pb.abandon_with_message(format!("failed: {}", reason));
                }
            }
        }
    }
}
