//! Mirroring settings
//!
//! The user-facing knobs of a mirroring session and their persistence.
//! Presets mirror what the settings screen offers; a running session reads
//! them once at start, so edits only apply to the next session.

mod store;

pub use store::{KEYS, SettingsStore};

use crate::assets::{CAST_SERVICE_PORT, FRAME_RATE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output resolution presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    Uhd4k,
    Qhd,
    FullHd,
    Hd,
    Sd,
}

impl Resolution {
    pub const ALL: [Resolution; 5] = [
        Resolution::Uhd4k,
        Resolution::Qhd,
        Resolution::FullHd,
        Resolution::Hd,
        Resolution::Sd,
    ];

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::Uhd4k => (3840, 2160),
            Resolution::Qhd => (2560, 1440),
            Resolution::FullHd => (1920, 1080),
            Resolution::Hd => (1280, 720),
            Resolution::Sd => (854, 480),
        }
    }

    /// Stored form, e.g. `1920x1080`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Uhd4k => "3840x2160",
            Resolution::Qhd => "2560x1440",
            Resolution::FullHd => "1920x1080",
            Resolution::Hd => "1280x720",
            Resolution::Sd => "854x480",
        }
    }

    /// Display form with the preset name, e.g. `1920x1080 (Full HD)`.
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Uhd4k => "3840x2160 (4K)",
            Resolution::Qhd => "2560x1440 (QHD)",
            Resolution::FullHd => "1920x1080 (Full HD)",
            Resolution::Hd => "1280x720 (HD)",
            Resolution::Sd => "854x480 (SD)",
        }
    }

    /// Lowest bitrate the encoder accepts for this preset.
    pub fn min_bitrate(&self) -> Bitrate {
        match self {
            Resolution::Uhd4k => Bitrate::Mbps3,
            Resolution::Qhd => Bitrate::Mbps1_5,
            _ => Bitrate::Kbps800,
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::FullHd
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    /// Accepts both the stored form and the labelled form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = preset_key(s);
        Resolution::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(key))
            .ok_or_else(|| format!("unknown resolution {:?}", s))
    }
}

/// Target bitrate presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bitrate {
    Kbps800,
    Mbps1_5,
    Mbps3,
    Mbps5,
    Mbps10,
}

impl Bitrate {
    pub const ALL: [Bitrate; 5] = [
        Bitrate::Mbps10,
        Bitrate::Mbps5,
        Bitrate::Mbps3,
        Bitrate::Mbps1_5,
        Bitrate::Kbps800,
    ];

    pub fn bits_per_second(&self) -> u64 {
        match self {
            Bitrate::Kbps800 => 800_000,
            Bitrate::Mbps1_5 => 1_500_000,
            Bitrate::Mbps3 => 3_000_000,
            Bitrate::Mbps5 => 5_000_000,
            Bitrate::Mbps10 => 10_000_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Bitrate::Kbps800 => "0.8 Mbps",
            Bitrate::Mbps1_5 => "1.5 Mbps",
            Bitrate::Mbps3 => "3 Mbps",
            Bitrate::Mbps5 => "5 Mbps",
            Bitrate::Mbps10 => "10 Mbps",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Bitrate::Kbps800 => "0.8 Mbps (saver)",
            Bitrate::Mbps1_5 => "1.5 Mbps (low)",
            Bitrate::Mbps3 => "3 Mbps (medium)",
            Bitrate::Mbps5 => "5 Mbps (high)",
            Bitrate::Mbps10 => "10 Mbps (best)",
        }
    }
}

impl Default for Bitrate {
    fn default() -> Self {
        Bitrate::Mbps5
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bitrate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = preset_key(s);
        Bitrate::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(key))
            .ok_or_else(|| format!("unknown bitrate {:?}", s))
    }
}

/// Strips a trailing ` (label)` from a preset string.
fn preset_key(s: &str) -> &str {
    match s.find(" (") {
        Some(idx) => s[..idx].trim(),
        None => s.trim(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirroringSettings {
    pub resolution: Resolution,
    pub fps: u32,
    pub bitrate: Bitrate,
    pub port: u16,
    pub audio_enabled: bool,
}

impl Default for MirroringSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            fps: FRAME_RATE,
            bitrate: Bitrate::default(),
            port: CAST_SERVICE_PORT,
            audio_enabled: true,
        }
    }
}

impl fmt::Display for MirroringSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {}fps, {}, port {}, audio {}",
            self.resolution.label(),
            self.fps,
            self.bitrate,
            self.port,
            if self.audio_enabled { "on" } else { "off" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_settings_screen() {
        let settings = MirroringSettings::default();
        assert_eq!(settings.resolution.dimensions(), (1920, 1080));
        assert_eq!(settings.fps, 30);
        assert_eq!(settings.bitrate.bits_per_second(), 5_000_000);
        assert_eq!(settings.port, 8080);
        assert!(settings.audio_enabled);
    }

    #[test]
    fn test_parse_labelled_presets() {
        assert_eq!("1920x1080".parse::<Resolution>(), Ok(Resolution::FullHd));
        assert_eq!("854x480 (SD)".parse::<Resolution>(), Ok(Resolution::Sd));
        assert_eq!("3840X2160 (4K)".parse::<Resolution>(), Ok(Resolution::Uhd4k));
        assert_eq!("0.8 Mbps (saver)".parse::<Bitrate>(), Ok(Bitrate::Kbps800));
        assert_eq!("10 Mbps".parse::<Bitrate>(), Ok(Bitrate::Mbps10));

        assert!("1024x768".parse::<Resolution>().is_err());
        assert!("7 Mbps".parse::<Bitrate>().is_err());
    }

    #[test]
    fn test_minimum_bitrates() {
        assert_eq!(Resolution::Uhd4k.min_bitrate(), Bitrate::Mbps3);
        assert_eq!(Resolution::Qhd.min_bitrate(), Bitrate::Mbps1_5);
        assert!(Bitrate::Kbps800 < Resolution::Uhd4k.min_bitrate());
        for r in [Resolution::FullHd, Resolution::Hd, Resolution::Sd] {
            assert_eq!(r.min_bitrate(), Bitrate::Kbps800);
        }
    }
}
