//! Volume to gain mapping
//!
//! The UI exposes a linear 0-100 volume slider. Loudness perception is
//! logarithmic, so the slider maps linearly onto decibels between
//! `min_volume_db` (at 1%) and 0 dB (at 100%), then to linear amplitude.
//! 0% is a hard mute rather than a very quiet level.

use crate::config::MixConfig;

/// Convert decibels to linear amplitude.
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Map a UI volume percentage onto the decibel scale.
///
/// Returns `None` for mute (0%).
pub fn volume_to_db(percent: f32, min_volume_db: f32) -> Option<f32> {
    let percent = percent.clamp(0.0, 100.0);
    if percent <= 0.0 {
        return None;
    }
    Some(min_volume_db * (1.0 - percent / 100.0))
}

/// Map a UI volume percentage onto linear amplitude.
///
/// Monotonic non-decreasing in `percent`; 0% yields exactly 0.0.
pub fn volume_to_gain(percent: f32, min_volume_db: f32) -> f32 {
    volume_to_db(percent, min_volume_db).map_or(0.0, db_to_gain)
}

/// Per-layer linear gains derived from one volume setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainStages {
    pub kick: f32,
    pub click: f32,
    pub ambient: f32,
}

impl GainStages {
    pub const SILENT: GainStages = GainStages {
        kick: 0.0,
        click: 0.0,
        ambient: 0.0,
    };

    /// Derive gains for every layer from the UI volume and mix offsets.
    pub fn from_volume(percent: f32, mix: &MixConfig) -> Self {
        let kick = volume_to_gain(percent, mix.min_volume_db);
        Self {
            kick,
            click: kick * db_to_gain(mix.click_offset_db),
            ambient: if mix.ambient_enabled {
                kick * db_to_gain(mix.ambient_offset_db)
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mute_is_exact_zero() {
        assert_eq!(volume_to_gain(0.0, -40.0), 0.0);
        assert_eq!(volume_to_gain(-12.0, -40.0), 0.0);
        assert_eq!(GainStages::from_volume(0.0, &MixConfig::default()).click, 0.0);
    }

    #[test]
    fn test_full_volume_is_unity() {
        assert!((volume_to_gain(100.0, -40.0) - 1.0).abs() < 1e-6);
        assert!((volume_to_gain(250.0, -40.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_midpoint_is_half_of_db_range() {
        // 50% sits at -20 dB on a -40 dB range
        assert_eq!(volume_to_db(50.0, -40.0), Some(-20.0));
        assert!((volume_to_gain(50.0, -40.0) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_volume_mapping_is_monotonic() {
        let mut previous = volume_to_gain(0.0, -40.0);
        for step in 1..=1000 {
            let percent = step as f32 / 10.0;
            let gain = volume_to_gain(percent, -40.0);
            assert!(
                gain >= previous,
                "gain({}) = {} dropped below previous {}",
                percent,
                gain,
                previous
            );
            previous = gain;
        }
    }

    #[test]
    fn test_click_sits_five_db_below_kick() {
        let mix = MixConfig::default();
        for percent in [10.0, 50.0, 100.0] {
            let stages = GainStages::from_volume(percent, &mix);
            let relative_db = 20.0 * (stages.click / stages.kick).log10();
            assert!((relative_db - mix.click_offset_db).abs() < 1e-3);
        }
    }

    #[test]
    fn test_ambient_follows_flag() {
        let mut mix = MixConfig::default();
        assert_eq!(GainStages::from_volume(80.0, &mix).ambient, 0.0);

        mix.ambient_enabled = true;
        let stages = GainStages::from_volume(80.0, &mix);
        assert!(stages.ambient > 0.0);
        assert!(stages.ambient < stages.click);
    }
}
