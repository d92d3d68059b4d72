//! Shared activation protocol for every challenge style.

use std::path::PathBuf;
use std::time::Duration;

use crate::capture::{save_screenshot, screenshot_dir, screenshot_name};
use crate::page::{poll_attribute, ChallengePage, Locator};
use crate::selectors;
use crate::settings::{ChallengeSettings, Timeouts};
use crate::types::{ChallengeError, ChallengeResult, ChallengeSession, ChallengeStyle, Checkpoint};

/// Widget activation, modality switch and screenshot bookkeeping.
///
/// Owned by exactly one controller, together with its [`ChallengeSession`].
pub struct ChallengeKernel {
    session: ChallengeSession,
    settings: ChallengeSettings,
    last_screenshot: Option<PathBuf>,
}

impl ChallengeKernel {
    pub fn new(session: ChallengeSession, settings: ChallengeSettings) -> Self {
        Self {
            session,
            settings,
            last_screenshot: None,
        }
    }

    pub fn style(&self) -> ChallengeStyle {
        self.session.style
    }

    pub fn session(&self) -> &ChallengeSession {
        &self.session
    }

    pub fn settings(&self) -> &ChallengeSettings {
        &self.settings
    }

    pub fn timeout(&self, pick: fn(&Timeouts) -> u64) -> Duration {
        Timeouts::secs(pick(&self.settings.timeouts))
    }

    pub fn response(&self) -> Option<&str> {
        self.session.response()
    }

    /// Path of the most recent screenshot that made it to disk.
    pub fn last_screenshot(&self) -> Option<&PathBuf> {
        self.last_screenshot.as_ref()
    }

    /// Click the checkbox. A widget that passes right away is not an error.
    pub async fn activate(&self, page: &dyn ChallengePage) -> ChallengeResult<Checkpoint> {
        page.click(
            &Locator::anchor(selectors::CHECKBOX),
            self.timeout(|t| t.activation),
        )
        .await?;
        tracing::debug!(style = %self.style(), "Active reCAPTCHA");

        if self.anchor_verified(page, self.timeout(|t| t.status_probe)).await? {
            let status = self.accessible_status(page).await?;
            tracing::info!(%status, "Checkbox passed without a challenge");
            return Ok(Checkpoint::Verified { status });
        }
        Ok(Checkpoint::Presented)
    }

    /// Bring up the surface of this kernel's style. Visual is the default one.
    pub async fn switch_modality(&self, page: &dyn ChallengePage) -> ChallengeResult<Checkpoint> {
        if self.style() == ChallengeStyle::Audio {
            let switcher = Locator::challenge(selectors::AUDIO_BUTTON);
            if !page
                .wait_for(&switcher, self.timeout(|t| t.modality_switch))
                .await?
            {
                if self.anchor_verified(page, Duration::ZERO).await? {
                    let status = self.accessible_status(page).await?;
                    return Ok(Checkpoint::Verified { status });
                }
                return Err(ChallengeError::ModalitySwitchTimeout(format!(
                    "{switcher} did not appear within {}s",
                    self.settings.timeouts.modality_switch
                )));
            }
            page.click(&switcher, self.timeout(|t| t.modality_switch))
                .await?;
        }
        tracing::debug!(style = %self.style(), "Accept the challenge");
        Ok(Checkpoint::Presented)
    }

    /// Activation followed by the modality switch.
    pub async fn anti_recaptcha(&self, page: &dyn ChallengePage) -> ChallengeResult<Checkpoint> {
        match self.activate(page).await? {
            Checkpoint::Presented => self.switch_modality(page).await,
            verified => Ok(verified),
        }
    }

    /// Read the widget's response token and record it on the session.
    pub async fn capture_response(&mut self, page: &dyn ChallengePage) -> ChallengeResult<()> {
        let value = page.evaluate(selectors::RESPONSE_SCRIPT).await?;
        let token = value.as_str().unwrap_or_default().to_string();
        if token.is_empty() {
            tracing::warn!("Widget reported success but returned an empty response token");
        }
        self.session.record_response(token);
        Ok(())
    }

    /// Save a diagnostic screenshot of `target` (or the viewport).
    ///
    /// Without an explicit `name`, the file is named after `label` or the style.
    /// Never fails: errors are logged and `None` is returned.
    pub async fn capture(
        &mut self,
        page: &dyn ChallengePage,
        target: Option<&Locator>,
        label: Option<&str>,
        name: Option<String>,
    ) -> Option<PathBuf> {
        let name = name.unwrap_or_else(|| {
            screenshot_name(&[label.unwrap_or(self.style().action_name())])
        });
        let bytes = match page.screenshot(target).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to capture screenshot {name}: {e}");
                return None;
            }
        };
        let dir = screenshot_dir(&self.session.cache_dir);
        match save_screenshot(&dir, &name, &bytes) {
            Ok(path) => {
                self.last_screenshot = Some(path.clone());
                Some(path)
            }
            Err(e) => {
                tracing::warn!("Failed to save screenshot {name}: {e}");
                None
            }
        }
    }

    async fn anchor_verified(
        &self,
        page: &dyn ChallengePage,
        timeout: Duration,
    ) -> ChallengeResult<bool> {
        poll_attribute(
            page,
            &Locator::anchor(selectors::ANCHOR),
            "aria-checked",
            timeout,
            |v| v == Some("true"),
        )
        .await
    }

    async fn accessible_status(&self, page: &dyn ChallengePage) -> ChallengeResult<String> {
        let status = page
            .text_of(
                &Locator::anchor(selectors::ACCESSIBLE_STATUS),
                self.timeout(|t| t.status_probe),
            )
            .await?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "You are verified".to_string());
        Ok(status)
    }
}
