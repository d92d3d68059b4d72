//! Core data types: challenge styles, round outcomes, task types and errors.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Presentation of the challenge being solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStyle {
    Audio,
    Visual,
}

impl ChallengeStyle {
    /// Lower-case name, also used for the style-scoped cache directory.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStyle::Audio => "audio",
            ChallengeStyle::Visual => "visual",
        }
    }

    /// Name used in logs and as the fallback screenshot suffix.
    pub fn action_name(&self) -> &'static str {
        match self {
            ChallengeStyle::Audio => "AudioChallenge",
            ChallengeStyle::Visual => "VisualChallenge",
        }
    }
}

impl fmt::Display for ChallengeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeStyle {
    type Err = ChallengeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" => Ok(ChallengeStyle::Audio),
            "visual" => Ok(ChallengeStyle::Visual),
            _ => Err(ChallengeError::UnsupportedStyle(s.to_string())),
        }
    }
}

/// Result of one challenge round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Challenge passed; the response token has been recorded.
    Success,
    /// Label is schedulable, keep going.
    Continue,
    /// Visual submission rejected as expected; the round is re-entered.
    Crash,
    /// Audio submission rejected; the caller restarts the attempt.
    Retry,
    /// Unsupported task type on screen; a reload was issued.
    Refresh,
    /// Unscheduled label; a reload was issued.
    Backcall,
    /// Every bounded retry was spent without a result.
    Unresolved,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Outcome::Success => "success",
            Outcome::Continue => "continue",
            Outcome::Crash => "crash",
            Outcome::Retry => "retry",
            Outcome::Refresh => "refresh",
            Outcome::Backcall => "backcall",
            Outcome::Unresolved => "unresolved",
        };
        f.write_str(name)
    }
}

/// Visual task type inferred from the number of tiles on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ObjectDetection,
    BinaryClassification,
}

impl TaskType {
    /// Largest grid that is still a classification task (3x3).
    pub const CLASSIFICATION_MAX_TILES: usize = 9;

    pub fn from_tile_count(count: usize) -> Self {
        if count > Self::CLASSIFICATION_MAX_TILES {
            TaskType::ObjectDetection
        } else {
            TaskType::BinaryClassification
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::ObjectDetection => f.write_str("ObjectDetection"),
            TaskType::BinaryClassification => f.write_str("BinaryClassification"),
        }
    }
}

/// Widget state after the shared activation preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkpoint {
    /// A challenge frame is up and ready for the selected modality.
    Presented,
    /// The widget passed on its own; nothing left to solve.
    Verified { status: String },
}

/// One candidate tile of a visual round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub index: usize,
    pub positive: bool,
}

/// Per-attempt state owned by a controller.
#[derive(Debug, Clone)]
pub struct ChallengeSession {
    pub style: ChallengeStyle,
    pub cache_dir: PathBuf,
    response: Option<String>,
}

impl ChallengeSession {
    pub fn new(style: ChallengeStyle, cache_dir: PathBuf) -> Self {
        Self {
            style,
            cache_dir,
            response: None,
        }
    }

    /// The opaque success credential, once the widget handed one out.
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Record the response token. Only the first token of an attempt is kept.
    pub fn record_response(&mut self, token: String) -> bool {
        if self.response.is_some() {
            tracing::warn!(style = %self.style, "Response token already recorded, ignoring");
            return false;
        }
        self.response = Some(token);
        true
    }
}

/// Errors that unwind a challenge attempt.
#[derive(thiserror::Error, Debug)]
pub enum ChallengeError {
    #[error("Challenge frame never offered the modality switch: {0}")]
    ModalitySwitchTimeout(String),

    #[error("Risk control detected: {0}")]
    RiskControlDetected(String),

    #[error("Challenge asset not found: {0}")]
    AssetNotFound(String),

    #[error("Challenge step timed out: {0}")]
    ChallengeTimeout(String),

    #[error("Label not found: {0}")]
    LabelNotFound(String),

    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Unsupported challenge style: {0} (expected audio or visual)")]
    UnsupportedStyle(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Transcode error: {0}")]
    Transcode(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Element not found in time: {0}")]
    ElementTimeout(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type.
pub type ChallengeResult<T> = Result<T, ChallengeError>;
