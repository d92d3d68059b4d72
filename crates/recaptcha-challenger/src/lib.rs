//! reCAPTCHA challenger: orchestration engine for the audio and visual challenges of the checkbox widget.

pub mod audio;
pub mod audio_challenge;
pub mod capture;
pub mod classifier;
pub mod factory;
pub mod fetch;
pub mod kernel;
pub mod labels;
pub mod page;
pub mod selectors;
pub mod settings;
pub mod types;
pub mod visual_challenge;

pub use audio::{HttpTranscriber, Transcoder, Transcriber, WavTranscoder};
pub use audio_challenge::AudioChallenger;
pub use classifier::{ImageClassifier, YoloClassifier, MODEL_FILENAME};
pub use factory::{ChallengeFactory, Challenger};
pub use fetch::{AssetFetcher, HttpAssetFetcher};
pub use kernel::ChallengeKernel;
pub use labels::{normalize_label, AliasTable, LabelAliases};
pub use page::{face_the_checkbox, ChallengePage, Frame, Locator};
pub use settings::{ChallengeSettings, Timeouts};
pub use types::*;
pub use visual_challenge::{TilePass, VisualChallenger};
