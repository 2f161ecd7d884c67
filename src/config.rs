use std::str::FromStr;

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// The one input resolution with a prior geometry table.
pub const INPUT_SIZE: usize = 300;

/// Network phase. Test networks normalize confidences and run the
/// detection post-processor; train networks expose raw logits so the loss
/// controls normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Train,
    Test,
}

impl FromStr for Phase {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Phase::Train),
            "test" => Ok(Phase::Test),
            other => Err(BuildError::UnknownPhase(other.to_string())),
        }
    }
}

/// How to treat an input size other than 300.
///
/// The legacy loader only warned and then proceeded to build the 300
/// geometry anyway. `Strict` fails closed instead and is the default;
/// `LegacyWarn` reproduces the old behavior for callers that depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeValidation {
    Strict,
    LegacyWarn,
}

/// Constants for the test-phase detection post-processor.
///
/// These are configuration of the post-processor, not of the network
/// assembly; the defaults are the constants the legacy Torch detection
/// stage shipped with.
#[derive(Config, Debug)]
pub struct DetectConfig {
    /// Per-class candidate cap before suppression.
    #[config(default = 200)]
    pub top_k: usize,
    /// Confidence floor; detections below it are never considered.
    #[config(default = 0.01)]
    pub conf_thresh: f32,
    /// IoU above which the lower-confidence box is suppressed.
    #[config(default = 0.45)]
    pub nms_thresh: f32,
    /// Cap on detections per image, across all classes.
    #[config(default = 400)]
    pub max_detections: usize,
}

/// File locations for the legacy weight import.
///
/// Both paths are explicit and required; there is no default location for
/// the normalization weights.
#[derive(Config, Debug)]
pub struct ImportConfig {
    /// Legacy serialized module list (.t7).
    pub weights_file: String,
    /// Legacy serialized 1-D normalization scale tensor.
    pub norm_weights_file: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_parses_both_values() {
        assert_eq!("train".parse::<Phase>().unwrap(), Phase::Train);
        assert_eq!("test".parse::<Phase>().unwrap(), Phase::Test);
    }

    #[test]
    fn phase_rejects_anything_else() {
        let err = "eval".parse::<Phase>().unwrap_err();
        assert_eq!(err, BuildError::UnknownPhase("eval".to_string()));
    }

    #[test]
    fn detect_defaults_match_the_legacy_constants() {
        let config = DetectConfig::new();
        assert_eq!(config.top_k, 200);
        assert_eq!(config.conf_thresh, 0.01);
        assert_eq!(config.nms_thresh, 0.45);
        assert_eq!(config.max_detections, 400);
    }
}
