use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::debug;

pub const TICK_INTERVAL: Duration = Duration::from_millis(80);
pub const PROGRESS_STEP: f32 = 2.5;
pub const RESET_DELAY: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanPhase {
    Idle,
    Scanning,
    Complete { at: Instant },
}

/// Progress animation for a selected skin photo. No analysis takes place.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanProgress {
    image: Option<PathBuf>,
    phase: ScanPhase,
    progress: f32,
}

impl Default for ScanProgress {
    fn default() -> Self {
        ScanProgress {
            image: None,
            phase: ScanPhase::Idle,
            progress: 0.0,
        }
    }
}

impl ScanProgress {
    pub fn image(&self) -> Option<&Path> {
        self.image.as_deref()
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Percentage in `[0, 100]`.
    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn is_busy(&self) -> bool {
        self.phase != ScanPhase::Idle
    }

    /// Starts scanning `image`. Ignored while a scan is running or just
    /// finished.
    pub fn select(&mut self, image: PathBuf) -> bool {
        if self.is_busy() {
            return false;
        }
        debug!("Scanning {}", image.display());
        self.image = Some(image);
        self.phase = ScanPhase::Scanning;
        self.progress = 0.0;
        true
    }

    /// Advances the animation by one [`TICK_INTERVAL`] step, and clears the
    /// screen once [`RESET_DELAY`] has passed since completion.
    pub fn tick(&mut self, now: Instant) {
        match self.phase {
            ScanPhase::Idle => {}
            ScanPhase::Scanning => {
                self.progress = (self.progress + PROGRESS_STEP).min(100.0);
                if self.progress >= 100.0 {
                    self.phase = ScanPhase::Complete { at: now };
                }
            }
            ScanPhase::Complete { at } => {
                if now.saturating_duration_since(at) >= RESET_DELAY {
                    self.remove();
                }
            }
        }
    }

    pub fn remove(&mut self) {
        *self = ScanProgress::default();
    }

    pub fn status_text(&self) -> &'static str {
        match self.phase {
            ScanPhase::Scanning => "Processing image...",
            _ => "Ready for analysis",
        }
    }

    pub fn button_label(&self) -> &'static str {
        if self.is_busy() {
            "Processing..."
        } else {
            "Upload Skin Photo"
        }
    }
}
