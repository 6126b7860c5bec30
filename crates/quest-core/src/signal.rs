//! Signal strength normalization and labelling.
//!
//! RSSI readings are only used for feedback intensity, never for deciding
//! which beacon is nearest.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::SignalConfig;

/// Qualitative signal label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalLabel {
    /// Above 80%.
    Excellent,
    /// Above 60%.
    Good,
    /// Above 40%.
    Fair,
    /// Above 20%.
    Weak,
    /// 20% or below.
    VeryWeak,
}

impl SignalLabel {
    /// Display colour used by the map overlay, as a hex string.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::Excellent => "#2ecc71",
            Self::Good => "#a3d977",
            Self::Fair => "#f1c40f",
            Self::Weak => "#e67e22",
            Self::VeryWeak => "#e74c3c",
        }
    }
}

impl fmt::Display for SignalLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Weak => "Weak",
            Self::VeryWeak => "Very weak",
        };
        f.write_str(s)
    }
}

/// One radio reading, normalized and labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalReading {
    /// Raw strength in dBm, if the platform reported one.
    pub raw_strength: Option<i16>,
    /// Strength mapped onto 0..=100.
    pub normalized_percent: u8,
    /// Band for `normalized_percent`.
    pub label: SignalLabel,
}

/// Maps raw dBm readings onto a percentage between a floor and a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalModel {
    floor_dbm: i16,
    ceiling_dbm: i16,
}

impl Default for SignalModel {
    fn default() -> Self {
        Self::new(&SignalConfig::default())
    }
}

impl SignalModel {
    /// Create a model from configuration.
    #[must_use]
    pub const fn new(config: &SignalConfig) -> Self {
        Self {
            floor_dbm: config.floor_dbm,
            ceiling_dbm: config.ceiling_dbm,
        }
    }

    /// Linear map of `raw` from `[floor, ceiling]` to `[0, 100]`, clamped.
    ///
    /// A missing reading is 0.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn normalize(&self, raw: Option<i16>) -> u8 {
        let Some(raw) = raw else {
            return 0;
        };
        let span = f64::from(self.ceiling_dbm) - f64::from(self.floor_dbm);
        if span <= 0.0 {
            return 0;
        }
        let percent = (f64::from(raw) - f64::from(self.floor_dbm)) / span * 100.0;
        // Clamped to 0..=100 so the cast cannot truncate.
        percent.round().clamp(0.0, 100.0) as u8
    }

    /// Normalize and classify one reading.
    #[must_use]
    pub fn read(&self, raw: Option<i16>) -> SignalReading {
        let normalized_percent = self.normalize(raw);
        SignalReading {
            raw_strength: raw,
            normalized_percent,
            label: classify(normalized_percent),
        }
    }
}

/// Band a percentage. Cut points are strict: 80 is `Good`, 81 is `Excellent`.
#[must_use]
pub const fn classify(percent: u8) -> SignalLabel {
    if percent > 80 {
        SignalLabel::Excellent
    } else if percent > 60 {
        SignalLabel::Good
    } else if percent > 40 {
        SignalLabel::Fair
    } else if percent > 20 {
        SignalLabel::Weak
    } else {
        SignalLabel::VeryWeak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_reference_points() {
        let model = SignalModel::default();
        assert_eq!(model.normalize(None), 0);
        assert_eq!(model.normalize(Some(-50)), 100);
        assert_eq!(model.normalize(Some(-100)), 0);
        assert_eq!(model.normalize(Some(-75)), 50);
    }

    #[test]
    fn test_normalize_clamps() {
        let model = SignalModel::default();
        assert_eq!(model.normalize(Some(-30)), 100);
        assert_eq!(model.normalize(Some(-120)), 0);
    }

    #[test]
    fn test_normalize_custom_bounds() {
        let model = SignalModel::new(&SignalConfig {
            floor_dbm: -90,
            ceiling_dbm: -40,
        });
        assert_eq!(model.normalize(Some(-65)), 50);
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(81), SignalLabel::Excellent);
        assert_eq!(classify(80), SignalLabel::Good);
        assert_eq!(classify(61), SignalLabel::Good);
        assert_eq!(classify(60), SignalLabel::Fair);
        assert_eq!(classify(41), SignalLabel::Fair);
        assert_eq!(classify(40), SignalLabel::Weak);
        assert_eq!(classify(21), SignalLabel::Weak);
        assert_eq!(classify(20), SignalLabel::VeryWeak);
        assert_eq!(classify(0), SignalLabel::VeryWeak);
        assert_eq!(classify(100), SignalLabel::Excellent);
    }

    #[test]
    fn test_read_combines_both() {
        let reading = SignalModel::default().read(Some(-55));
        assert_eq!(reading.raw_strength, Some(-55));
        assert_eq!(reading.normalized_percent, 90);
        assert_eq!(reading.label, SignalLabel::Excellent);
    }
}
