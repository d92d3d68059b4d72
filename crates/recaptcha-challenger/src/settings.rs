//! Tunable bounds, timeouts and locale for a challenge attempt.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ChallengeError, ChallengeResult};

/// Bounded waits, in whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Checkbox must become clickable within this window.
    pub activation: u64,
    /// How long the anchor gets to report an immediate pass.
    pub status_probe: u64,
    /// Wait for the audio modality button.
    pub modality_switch: u64,
    /// Each attempt at pressing the audio play button.
    pub play_button: u64,
    /// Header text read while looking for the lockout message.
    pub lockout_probe: u64,
    /// Reading the audio source attribute.
    pub audio_source: u64,
    /// Locating the answer field and the verify button.
    pub submit: u64,
    /// Wait for the audio error message after submitting.
    pub audio_verdict: u64,
    /// Wait for each visual error prompt after submitting.
    pub visual_verdict: u64,
    /// Reading the visual prompt and the tile grid.
    pub label: u64,
    /// Clicking a tile.
    pub tile_click: u64,
    /// A dynamic tile must finish its replacement fade within this window.
    pub tile_settle: u64,
    /// Pause after a reload so the new grid can render.
    pub reload_settle: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            activation: 10,
            status_probe: 2,
            modality_switch: 10,
            play_button: 1,
            lockout_probe: 1,
            audio_source: 5,
            submit: 5,
            audio_verdict: 2,
            visual_verdict: 1,
            label: 5,
            tile_click: 2,
            tile_settle: 15,
            reload_settle: 1,
        }
    }
}

impl Timeouts {
    pub fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }
}

/// Settings shared by both controllers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeSettings {
    /// Locale of the visual prompt; selects the label alias table.
    pub lang: String,
    /// Locale hint handed to the transcription backend.
    pub audio_locale: String,
    /// Save a screenshot of every classified tile.
    pub screenshot: bool,
    /// Outer rounds of the visual controller.
    pub max_rounds: usize,
    /// Reloads allowed while looking for a schedulable visual task.
    pub max_label_attempts: usize,
    /// Attempts at pressing the audio play button.
    pub max_play_attempts: usize,
    /// Stabilization passes allowed on a dynamic round.
    pub max_dynamic_passes: usize,
    /// OpenAI-compatible transcription endpoint.
    pub transcriber_url: Option<String>,
    /// Model name sent to the transcription endpoint.
    pub transcriber_model: String,
    /// Minimum detection confidence for a positive tile.
    pub confidence_threshold: f32,
    /// Extra `phrase -> canonical label` entries keyed by locale.
    pub label_aliases: HashMap<String, HashMap<String, String>>,
    pub timeouts: Timeouts,
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            lang: "en".to_string(),
            audio_locale: "en-US".to_string(),
            screenshot: false,
            max_rounds: 3,
            max_label_attempts: 10,
            max_play_attempts: 5,
            max_dynamic_passes: 10,
            transcriber_url: None,
            transcriber_model: "whisper-1".to_string(),
            confidence_threshold: 0.4,
            label_aliases: HashMap::new(),
            timeouts: Timeouts::default(),
        }
    }
}

impl ChallengeSettings {
    /// Load settings from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> ChallengeResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ChallengeError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> ChallengeResult<Self> {
        let settings: Self = serde_json::from_str(raw)
            .map_err(|e| ChallengeError::Config(format!("Invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject bounds that would turn a loop into a no-op.
    pub fn validate(&self) -> ChallengeResult<()> {
        let bounds = [
            ("max_rounds", self.max_rounds),
            ("max_label_attempts", self.max_label_attempts),
            ("max_play_attempts", self.max_play_attempts),
            ("max_dynamic_passes", self.max_dynamic_passes),
        ];
        for (name, value) in bounds {
            if value == 0 {
                return Err(ChallengeError::Config(format!("{name} must be at least 1")));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ChallengeError::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        Ok(())
    }
}
