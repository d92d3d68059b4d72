//! Controller selection and construction.

use std::path::Path;

use crate::audio::{HttpTranscriber, Transcoder, Transcriber, WavTranscoder};
use crate::audio_challenge::AudioChallenger;
use crate::classifier::{ImageClassifier, YoloClassifier};
use crate::fetch::{AssetFetcher, HttpAssetFetcher};
use crate::kernel::ChallengeKernel;
use crate::labels::LabelAliases;
use crate::page::ChallengePage;
use crate::settings::ChallengeSettings;
use crate::types::{ChallengeError, ChallengeResult, ChallengeSession, ChallengeStyle, Outcome};
use crate::visual_challenge::VisualChallenger;

const TRANSCRIBER_ENV: &str = "RECAPTCHA_TRANSCRIBER_URL";
const TRANSCRIBER_KEY_ENV: &str = "RECAPTCHA_TRANSCRIBER_KEY";

/// A controller for one modality.
pub enum Challenger {
    Audio(AudioChallenger),
    Visual(VisualChallenger),
}

impl Challenger {
    pub async fn run(&mut self, page: &dyn ChallengePage) -> ChallengeResult<Outcome> {
        match self {
            Self::Audio(c) => c.run(page).await,
            Self::Visual(c) => c.run(page).await,
        }
    }

    pub fn style(&self) -> ChallengeStyle {
        match self {
            Self::Audio(c) => c.kernel().style(),
            Self::Visual(c) => c.kernel().style(),
        }
    }

    /// Response token, set only after `Success`.
    pub fn response(&self) -> Option<&str> {
        match self {
            Self::Audio(c) => c.response(),
            Self::Visual(c) => c.response(),
        }
    }

    pub fn kernel(&self) -> &ChallengeKernel {
        match self {
            Self::Audio(c) => c.kernel(),
            Self::Visual(c) => c.kernel(),
        }
    }
}

/// Builds a [`Challenger`] with either injected or default collaborators.
#[derive(Default)]
pub struct ChallengeFactory {
    settings: ChallengeSettings,
    aliases: Option<LabelAliases>,
    fetcher: Option<Box<dyn AssetFetcher>>,
    transcoder: Option<Box<dyn Transcoder>>,
    transcriber: Option<Box<dyn Transcriber>>,
    classifier: Option<Box<dyn ImageClassifier>>,
}

impl ChallengeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(mut self, settings: ChallengeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the built-in alias tables entirely.
    pub fn with_aliases(mut self, aliases: LabelAliases) -> Self {
        self.aliases = Some(aliases);
        self
    }

    pub fn with_fetcher(mut self, fetcher: impl AssetFetcher + 'static) -> Self {
        self.fetcher = Some(Box::new(fetcher));
        self
    }

    pub fn with_transcoder(mut self, transcoder: impl Transcoder + 'static) -> Self {
        self.transcoder = Some(Box::new(transcoder));
        self
    }

    pub fn with_transcriber(mut self, transcriber: impl Transcriber + 'static) -> Self {
        self.transcriber = Some(Box::new(transcriber));
        self
    }

    pub fn with_classifier(mut self, classifier: impl ImageClassifier + 'static) -> Self {
        self.classifier = Some(Box::new(classifier));
        self
    }

    /// Validate the cache root, scope a directory to the style and build its controller.
    pub fn create(
        self,
        style: &str,
        cache_root: &Path,
        model_dir: Option<&Path>,
    ) -> ChallengeResult<Challenger> {
        if !cache_root.is_dir() {
            return Err(ChallengeError::DirectoryNotFound(cache_root.to_path_buf()));
        }
        let style: ChallengeStyle = style.parse()?;
        self.settings.validate()?;

        let cache_dir = cache_root.join(style.as_str());
        std::fs::create_dir_all(&cache_dir)?;
        tracing::debug!(%style, cache_dir = %cache_dir.display(), "Create challenger");

        let session = ChallengeSession::new(style, cache_dir);
        match style {
            ChallengeStyle::Audio => self.build_audio(session),
            ChallengeStyle::Visual => self.build_visual(session, model_dir),
        }
    }

    fn build_audio(self, session: ChallengeSession) -> ChallengeResult<Challenger> {
        let transcriber: Box<dyn Transcriber> = match self.transcriber {
            Some(t) => t,
            None => {
                let endpoint = self
                    .settings
                    .transcriber_url
                    .clone()
                    .or_else(|| std::env::var(TRANSCRIBER_ENV).ok())
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| {
                        ChallengeError::Config(format!(
                            "Audio challenges need a transcriber: set transcriber_url or {TRANSCRIBER_ENV}"
                        ))
                    })?;
                let transcriber = HttpTranscriber::new(endpoint, self.settings.transcriber_model.clone())
                    .with_api_key(std::env::var(TRANSCRIBER_KEY_ENV).ok());
                Box::new(transcriber)
            }
        };
        let fetcher: Box<dyn AssetFetcher> = self
            .fetcher
            .unwrap_or_else(|| Box::new(HttpAssetFetcher::default()));
        let transcoder: Box<dyn Transcoder> =
            self.transcoder.unwrap_or_else(|| Box::new(WavTranscoder));

        let kernel = ChallengeKernel::new(session, self.settings);
        Ok(Challenger::Audio(AudioChallenger::new(
            kernel,
            fetcher,
            transcoder,
            transcriber,
        )))
    }

    fn build_visual(
        self,
        session: ChallengeSession,
        model_dir: Option<&Path>,
    ) -> ChallengeResult<Challenger> {
        let classifier: Box<dyn ImageClassifier> = match self.classifier {
            Some(c) => c,
            None => {
                let model_dir = model_dir.ok_or_else(|| {
                    ChallengeError::ModelNotAvailable(
                        "Visual challenges need a model directory or a classifier".to_string(),
                    )
                })?;
                Box::new(YoloClassifier::from_model_dir(
                    model_dir,
                    self.settings.confidence_threshold,
                )?)
            }
        };

        let mut aliases = self.aliases.unwrap_or_default();
        for (lang, entries) in &self.settings.label_aliases {
            aliases.extend(lang, entries.clone());
        }
        let table = aliases.for_locale(&self.settings.lang);

        let kernel = ChallengeKernel::new(session, self.settings);
        Ok(Challenger::Visual(VisualChallenger::new(
            kernel, classifier, table,
        )))
    }
}
