//! Vibration feedback for radio matches.
//!
//! Each match dispatches one pattern synchronously; nothing is queued or
//! debounced.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::signal::SignalLabel;

/// A vibration pattern: alternating on/off segments, starting with "on".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HapticPattern {
    segments: Vec<Duration>,
}

impl HapticPattern {
    /// No vibration.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Pattern for a signal band. Stronger signal vibrates longer; a very
    /// weak signal does not vibrate at all.
    #[must_use]
    pub fn for_label(label: SignalLabel) -> Self {
        let ms = |v: &[u64]| Self {
            segments: v.iter().copied().map(Duration::from_millis).collect(),
        };
        match label {
            SignalLabel::Excellent => ms(&[400, 150, 400]),
            SignalLabel::Good => ms(&[400]),
            SignalLabel::Fair | SignalLabel::Weak => ms(&[150]),
            SignalLabel::VeryWeak => Self::none(),
        }
    }

    /// Whether this pattern vibrates at all.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of "on" pulses.
    #[must_use]
    pub fn pulses(&self) -> usize {
        self.segments.len().div_ceil(2)
    }

    /// Alternating on/off segment durations.
    #[must_use]
    pub fn segments(&self) -> &[Duration] {
        &self.segments
    }
}

/// A device that can vibrate.
pub trait Haptics: Send + Sync {
    /// Play `pattern`. Must return promptly.
    fn vibrate(&self, pattern: &HapticPattern);
}

/// Haptics for hosts without a vibration motor: logs the pattern.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHaptics;

impl Haptics for LogHaptics {
    fn vibrate(&self, pattern: &HapticPattern) {
        if !pattern.is_silent() {
            debug!(pulses = pattern.pulses(), segments = ?pattern.segments(), "vibrate");
        }
    }
}

/// Haptics that remembers every pattern it was asked to play.
#[derive(Debug, Default, Clone)]
pub struct RecordingHaptics {
    played: Arc<Mutex<Vec<HapticPattern>>>,
}

impl RecordingHaptics {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Patterns played so far, silent ones included.
    #[must_use]
    pub fn played(&self) -> Vec<HapticPattern> {
        self.played
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Haptics for RecordingHaptics {
    fn vibrate(&self, pattern: &HapticPattern) {
        if let Ok(mut played) = self.played.lock() {
            played.push(pattern.clone());
        }
    }
}
