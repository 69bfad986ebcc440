use serde::{Deserialize, Serialize};

/// Engine configuration.
///
/// Capture and playback rates are independent, fixed per stream direction,
/// and never resampled by this engine; both are negotiated out of band with
/// the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate for microphone capture in Hz (16000 in the reference
    /// deployment)
    pub capture_sample_rate: u32,
    /// Sample rate for inbound playback in Hz (24000 in the reference
    /// deployment)
    pub playback_sample_rate: u32,
    /// Samples pulled from the input device per capture frame
    pub capture_frame_size: usize,
    /// Multiplier applied to frame RMS before clamping to [0, 1]
    pub loudness_gain: f32,
    /// Start the session with the microphone muted
    pub start_muted: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16000,
            playback_sample_rate: 24000,
            capture_frame_size: 4096,
            loudness_gain: 5.0,
            start_muted: false,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a JSON document. Missing fields fall back
    /// to the reference deployment defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = EngineConfig::default();
        assert_eq!(config.capture_sample_rate, 16000);
        assert_eq!(config.playback_sample_rate, 24000);
        assert_eq!(config.capture_frame_size, 4096);
        assert!(!config.start_muted);
    }

    #[test]
    fn test_from_json_partial_override() {
        let config = EngineConfig::from_json(r#"{"playback_sample_rate": 48000, "start_muted": true}"#)
            .unwrap();
        assert_eq!(config.playback_sample_rate, 48000);
        assert!(config.start_muted);
        assert_eq!(config.capture_sample_rate, 16000);
    }
}
