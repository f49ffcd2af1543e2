//! Quality tiers and their encoder preset mapping.

use serde::{Deserialize, Serialize};

/// Ordinal output quality level selected by the user.
///
/// Higher tiers map to finer (slower) encoder presets and lower
/// constant-rate-factor values, i.e. less compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
    Ultra,
}

impl QualityTier {
    /// libx264 speed/quality preset for this tier.
    pub fn preset(self) -> &'static str {
        match self {
            Self::Low => "veryfast",
            Self::Medium => "medium",
            Self::High => "slow",
            Self::Ultra => "veryslow",
        }
    }

    /// Constant rate factor for this tier.
    pub fn crf(self) -> u32 {
        match self {
            Self::Low => 28,
            Self::Medium => 23,
            Self::High => 18,
            Self::Ultra => 15,
        }
    }

    /// Rough output density used only for the post-encode size sanity log.
    pub fn bits_per_pixel(self) -> f64 {
        match self {
            Self::Low => 0.04,
            Self::Medium => 0.08,
            Self::High => 0.12,
            Self::Ultra => 0.16,
        }
    }
}

impl std::str::FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "ultra" => Ok(Self::Ultra),
            other => Err(format!(
                "unknown quality tier '{other}' (expected low|medium|high|ultra)"
            )),
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Ultra => "ultra",
        };
        f.write_str(name)
    }
}
