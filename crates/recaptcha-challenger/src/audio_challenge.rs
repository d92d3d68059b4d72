//! Audio modality: fetch the clip, transcribe it, type the answer.

use std::path::{Path, PathBuf};

use crate::audio::{Transcoder, Transcriber};
use crate::capture::timestamp_millis;
use crate::fetch::AssetFetcher;
use crate::kernel::ChallengeKernel;
use crate::page::{ChallengePage, Locator};
use crate::selectors;
use crate::types::{ChallengeError, ChallengeResult, Checkpoint, Outcome};

/// Drives the audio challenge from link discovery to verdict.
pub struct AudioChallenger {
    kernel: ChallengeKernel,
    fetcher: Box<dyn AssetFetcher>,
    transcoder: Box<dyn Transcoder>,
    transcriber: Box<dyn Transcriber>,
}

impl AudioChallenger {
    pub fn new(
        kernel: ChallengeKernel,
        fetcher: Box<dyn AssetFetcher>,
        transcoder: Box<dyn Transcoder>,
        transcriber: Box<dyn Transcriber>,
    ) -> Self {
        Self {
            kernel,
            fetcher,
            transcoder,
            transcriber,
        }
    }

    pub fn kernel(&self) -> &ChallengeKernel {
        &self.kernel
    }

    pub fn response(&self) -> Option<&str> {
        self.kernel.response()
    }

    /// Press play until the source URL is exposed.
    ///
    /// A lockout banner is fatal and never retried.
    pub async fn locate_download_link(&self, page: &dyn ChallengePage) -> ChallengeResult<String> {
        let play = Locator::challenge(selectors::PLAY_BUTTON);
        let header = Locator::challenge(selectors::LOCKOUT_HEADER);
        let attempts = self.kernel.settings().max_play_attempts;

        for attempt in 1..=attempts {
            tracing::debug!(attempt, "Play challenge audio");
            match page.click(&play, self.kernel.timeout(|t| t.play_button)).await {
                Ok(()) => break,
                Err(ChallengeError::ElementTimeout(_)) => {}
                Err(e) => return Err(e),
            }
            let header_text = page
                .text_of(&header, self.kernel.timeout(|t| t.lockout_probe))
                .await?;
            if let Some(text) = header_text.filter(|t| t.contains(selectors::LOCKOUT_MARKER)) {
                tracing::warn!(header = %text.trim(), "Automated queries detected");
                return Err(ChallengeError::RiskControlDetected(
                    "Your computer or network may be sending automated queries".to_string(),
                ));
            }
        }

        page.attribute_of(
            &Locator::challenge(selectors::AUDIO_SOURCE),
            "src",
            self.kernel.timeout(|t| t.audio_source),
        )
        .await?
        .filter(|src| !src.trim().is_empty())
        .ok_or_else(|| {
            ChallengeError::AssetNotFound(
                "Trapped in an inescapable risk control context".to_string(),
            )
        })
    }

    /// Download the clip into the session cache and normalize it to WAV.
    pub async fn fetch_and_transcode(&self, url: &str) -> ChallengeResult<PathBuf> {
        let cache = &self.kernel.session().cache_dir;
        let stamp = timestamp_millis();
        let path_mp3 = cache.join(format!("audio_{stamp}.mp3"));
        let path_wav = cache.join(format!("audio_{stamp}.wav"));

        tracing::debug!("Downloading challenge audio");
        self.fetcher.download(url, &path_mp3).await?;

        tracing::debug!("Audio transcoding MP3 --> WAV");
        self.transcoder.transcode(&path_mp3, &path_wav)?;
        tracing::debug!(path_audio_wav = %path_wav.display(), "Transcoding complete");
        Ok(path_wav)
    }

    /// Recognized text of the clip, with the configured locale hint.
    pub async fn transcribe(&self, path: &Path) -> ChallengeResult<String> {
        let locale = &self.kernel.settings().audio_locale;
        self.transcriber.transcribe(path, locale).await
    }

    /// Type the answer and submit it. `false` if any element was missing.
    pub async fn submit_text(&self, page: &dyn ChallengePage, text: &str) -> ChallengeResult<bool> {
        let field = Locator::challenge(selectors::AUDIO_RESPONSE);
        let timeout = self.kernel.timeout(|t| t.submit);
        let answer = text.to_lowercase();

        let steps = async {
            page.fill(&field, "", timeout).await?;
            page.fill(&field, &answer, timeout).await?;
            tracing::debug!("Submit the challenge");
            page.press(&field, "Enter", timeout).await
        };
        match steps.await {
            Ok(()) => Ok(true),
            Err(ChallengeError::ElementTimeout(what)) => {
                tracing::debug!(%what, "Answer field unavailable");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// `Retry` when the widget shows an error message, `Success` otherwise.
    pub async fn verify(&mut self, page: &dyn ChallengePage) -> ChallengeResult<Outcome> {
        let error = Locator::challenge(selectors::AUDIO_ERROR);
        let timeout = self.kernel.timeout(|t| t.audio_verdict);
        if page.wait_for(&error, timeout).await? {
            if let Some(msg) = page
                .text_of(&error, timeout)
                .await?
                .filter(|m| !m.trim().is_empty())
            {
                tracing::info!(err_message = %msg.trim(), "Challenge failed");
                return Ok(Outcome::Retry);
            }
        }
        tracing::info!("Challenge success");
        self.kernel.capture_response(page).await?;
        Ok(Outcome::Success)
    }

    /// Full audio flow: activate, switch, fetch, transcribe, submit, verify.
    pub async fn run(&mut self, page: &dyn ChallengePage) -> ChallengeResult<Outcome> {
        if let Checkpoint::Verified { .. } = self.kernel.anti_recaptcha(page).await? {
            self.kernel.capture_response(page).await?;
            return Ok(Outcome::Success);
        }

        let audio_url = self.locate_download_link(page).await?;
        let path_wav = self.fetch_and_transcode(&audio_url).await?;
        let audio_answer = self.transcribe(&path_wav).await?;

        if !self.submit_text(page, &audio_answer).await? {
            tracing::warn!("reCAPTCHA challenge submission failed");
            return Err(ChallengeError::ChallengeTimeout(
                "Answer field or confirmation was not available".to_string(),
            ));
        }
        self.verify(page).await
    }
}
