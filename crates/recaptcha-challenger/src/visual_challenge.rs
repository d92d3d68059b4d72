//! Visual modality: label triage, tile classification and the dynamic refill loop.
//!
//! Classification grids come in two flavours. On a static round a clicked tile
//! keeps a selection marker. On a dynamic round the clicked tile fades into a
//! replacement image, and the higher the visitor's risk score the slower the
//! fade. Replacements must only be classified once the fade has settled, and a
//! round is only done when no positive tile is left on screen.
//!
//! A rejected submission keeps prompt and tiles in place, so the next round
//! starts over from the label without reloading.

use std::path::PathBuf;

use crate::capture::screenshot_name;
use crate::classifier::ImageClassifier;
use crate::kernel::ChallengeKernel;
use crate::labels::AliasTable;
use crate::page::{poll_attribute, ChallengePage, Locator};
use crate::selectors;
use crate::types::{ChallengeError, ChallengeResult, Checkpoint, Outcome, TaskType, Tile};

/// Result of the per-tile pass of one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TilePass {
    pub tiles: Vec<Tile>,
    /// `Some(true)` for a dynamic round, `None` if no tile revealed it.
    pub dynamic: Option<bool>,
}

impl TilePass {
    pub fn positives(&self) -> Vec<usize> {
        self.tiles
            .iter()
            .filter(|t| t.positive)
            .map(|t| t.index)
            .collect()
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic == Some(true)
    }
}

/// Drives the visual challenge through bounded rounds.
pub struct VisualChallenger {
    kernel: ChallengeKernel,
    classifier: Box<dyn ImageClassifier>,
    aliases: AliasTable,
    prompt: String,
    label: String,
    oncall_task: Option<TaskType>,
    history: Vec<Outcome>,
}

impl VisualChallenger {
    pub fn new(
        kernel: ChallengeKernel,
        classifier: Box<dyn ImageClassifier>,
        aliases: AliasTable,
    ) -> Self {
        Self {
            kernel,
            classifier,
            aliases,
            prompt: String::new(),
            label: String::new(),
            oncall_task: None,
            history: Vec::new(),
        }
    }

    pub fn kernel(&self) -> &ChallengeKernel {
        &self.kernel
    }

    pub fn response(&self) -> Option<&str> {
        self.kernel.response()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn oncall_task(&self) -> Option<TaskType> {
        self.oncall_task
    }

    /// Every intermediate outcome of this attempt, in order.
    pub fn history(&self) -> &[Outcome] {
        &self.history
    }

    /// Canonical category of the current label, if scheduled.
    pub fn canonical_label(&self) -> Option<&str> {
        self.aliases.canonical(&self.label)
    }

    /// Ask the widget for a fresh prompt and grid.
    pub async fn reload(&self, page: &dyn ChallengePage) -> ChallengeResult<()> {
        tracing::debug!("reload challenge");
        page.click(
            &Locator::challenge(selectors::RELOAD_BUTTON),
            self.kernel.timeout(|t| t.label),
        )
        .await?;
        page.pause(self.kernel.timeout(|t| t.reload_settle)).await;
        Ok(())
    }

    /// Detection grids (4x4) have more than nine tiles; classification grids are 3x3.
    pub async fn check_oncall_task(&mut self, page: &dyn ChallengePage) -> ChallengeResult<TaskType> {
        let count = page.count(&Locator::challenge(selectors::TILES)).await?;
        let task = TaskType::from_tile_count(count);
        self.oncall_task = Some(task);
        Ok(task)
    }

    /// Read prompt and label, and classify the task on screen.
    pub async fn get_label(&mut self, page: &dyn ChallengePage) -> ChallengeResult<TaskType> {
        let timeout = self.kernel.timeout(|t| t.label);
        let label = page
            .text_of(&Locator::challenge(selectors::LABEL), timeout)
            .await?
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| ChallengeError::LabelNotFound("Get the exception label object".to_string()))?;

        let prompt = page
            .text_of(&Locator::challenge(selectors::PROMPT), std::time::Duration::ZERO)
            .await?
            .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| label.clone());

        self.label = label;
        self.prompt = prompt;
        let task = self.check_oncall_task(page).await?;
        tracing::debug!(label = %self.label, %task, "Get label");
        Ok(task)
    }

    /// Skip policy: `Continue` for a scheduled label, `Backcall` otherwise.
    ///
    /// Unscheduled labels leave a screenshot behind for later triage.
    pub async fn tactical_retreat(&mut self, page: &dyn ChallengePage) -> ChallengeResult<Outcome> {
        if self.canonical_label().is_some() {
            return Ok(Outcome::Continue);
        }

        let body = Locator::challenge(selectors::CHALLENGE_BODY);
        let label = self.label.clone();
        let path_screenshot = self
            .kernel
            .capture(page, Some(&body), Some(label.as_str()), None)
            .await;
        tracing::warn!(
            label = %self.label,
            prompt = %self.prompt,
            path_screenshot = %path_screenshot
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            "Types of challenges not yet scheduled"
        );
        Ok(Outcome::Backcall)
    }

    /// Reload until a scheduled classification task is on screen.
    pub async fn acquire_label(&mut self, page: &dyn ChallengePage) -> ChallengeResult<Outcome> {
        let attempts = self.kernel.settings().max_label_attempts;
        for _ in 0..attempts {
            let outcome = match self.get_label(page).await? {
                TaskType::ObjectDetection => Outcome::Refresh,
                TaskType::BinaryClassification => self.tactical_retreat(page).await?,
            };
            self.history.push(outcome);
            if outcome == Outcome::Continue {
                return Ok(outcome);
            }
            self.reload(page).await?;
        }
        tracing::warn!(
            attempts,
            label = %self.label,
            "No schedulable classification task after reloading"
        );
        Ok(Outcome::Unresolved)
    }

    /// Classify one tile, clicking it when positive.
    pub async fn check_positive_element(
        &mut self,
        page: &dyn ChallengePage,
        sample: &Locator,
        canonical: &str,
    ) -> ChallengeResult<bool> {
        let image = page.screenshot(Some(sample)).await?;
        let positive = self.classifier.classify(&image, canonical)?;
        if positive {
            page.click(sample, self.kernel.timeout(|t| t.tile_click))
                .await?;
        }

        if self.kernel.settings().screenshot {
            let name = screenshot_name(&[self.classifier.flag(), canonical]);
            self.kernel.capture(page, Some(sample), None, Some(name)).await;
        }
        Ok(positive)
    }

    /// Classify every tile in document order and learn whether the round is dynamic.
    pub async fn classify_tiles(
        &mut self,
        page: &dyn ChallengePage,
        canonical: &str,
    ) -> ChallengeResult<TilePass> {
        let tiles = Locator::challenge(selectors::TILES);
        let count = page.count(&tiles).await?;
        let mut pass = TilePass::default();

        for index in 0..count {
            let status = Locator::challenge(selectors::tile_by_tabindex(index));
            let class = page
                .attribute_of(&status, "class", std::time::Duration::ZERO)
                .await?
                .unwrap_or_default();
            // Kept from a rejected submission; clicking again would unselect it.
            if class.contains(selectors::FEATURE_SELECTED) {
                tracing::debug!(index, "Tile already selected");
                pass.tiles.push(Tile { index, positive: true });
                pass.dynamic.get_or_insert(false);
                continue;
            }

            let positive = self
                .check_positive_element(page, &tiles.clone().nth(index), canonical)
                .await?;
            pass.tiles.push(Tile { index, positive });

            if pass.dynamic.is_none() {
                let motion_status = page
                    .attribute_of(&status, "class", std::time::Duration::ZERO)
                    .await?
                    .unwrap_or_default();
                if motion_status.contains(selectors::FEATURE_SELECTED) {
                    pass.dynamic = Some(false);
                } else if motion_status.contains(selectors::FEATURE_DYNAMIC) {
                    pass.dynamic = Some(true);
                }
            }
        }
        Ok(pass)
    }

    /// Drain the pending set of a dynamic round; returns the number of passes.
    ///
    /// Each pending tile waits for its replacement to settle, then is
    /// re-classified. Positives stay pending, negatives drop out. A tile that
    /// is still fading when the settle window closes is not classified and
    /// carries over to the next pass.
    pub async fn stabilize(
        &mut self,
        page: &dyn ChallengePage,
        mut pending: Vec<usize>,
        canonical: &str,
    ) -> ChallengeResult<usize> {
        let max_passes = self.kernel.settings().max_dynamic_passes;
        let settle = self.kernel.timeout(|t| t.tile_settle);
        let mut passes = 0;

        while !pending.is_empty() {
            if passes == max_passes {
                tracing::warn!(
                    passes,
                    pending = ?pending,
                    "Dynamic tiles keep refilling with positives, submitting as is"
                );
                break;
            }
            passes += 1;

            let mut next_pass = Vec::with_capacity(pending.len());
            for index in pending {
                let tile = Locator::challenge(selectors::tile_by_tabindex(index));
                let settled = poll_attribute(page, &tile, "class", settle, |class| {
                    !class.unwrap_or_default().contains(selectors::FEATURE_DYNAMIC)
                })
                .await?;
                if !settled {
                    tracing::debug!(index, "Tile still fading after the settle window");
                    next_pass.push(index);
                    continue;
                }
                if self.check_positive_element(page, &tile, canonical).await? {
                    next_pass.push(index);
                }
            }
            tracing::debug!(pass = passes, remaining = next_pass.len(), "Dynamic pass");
            pending = next_pass;
        }
        Ok(passes)
    }

    /// Select every positive tile, settle dynamic refills, then submit.
    pub async fn challenge(&mut self, page: &dyn ChallengePage) -> ChallengeResult<TilePass> {
        let canonical = self
            .canonical_label()
            .map(str::to_string)
            .ok_or_else(|| ChallengeError::LabelNotFound(self.label.clone()))?;

        let pass = self.classify_tiles(page, &canonical).await?;
        if pass.is_dynamic() {
            self.stabilize(page, pass.positives(), &canonical).await?;
        }

        page.click(
            &Locator::challenge(selectors::VERIFY_BUTTON),
            self.kernel.timeout(|t| t.submit),
        )
        .await?;
        Ok(pass)
    }

    /// `Success` when no error prompt shows up, `Crash` otherwise.
    pub async fn check_accessible_status(
        &mut self,
        page: &dyn ChallengePage,
    ) -> ChallengeResult<Outcome> {
        let timeout = self.kernel.timeout(|t| t.visual_verdict);
        for selector in [selectors::SELECT_MORE, selectors::INCORRECT] {
            let prompt_obj = Locator::challenge(selector);
            if page.wait_for(&prompt_obj, timeout).await? {
                let prompts = page.text_of(&prompt_obj, timeout).await?.unwrap_or_default();
                tracing::info!(prompt = %prompts.trim(), "Submission rejected");
                return Ok(Outcome::Crash);
            }
        }
        tracing::info!("Challenge success");
        self.kernel.capture_response(page).await?;
        Ok(Outcome::Success)
    }

    /// Full visual flow; `Unresolved` once every bounded round is spent.
    pub async fn run(&mut self, page: &dyn ChallengePage) -> ChallengeResult<Outcome> {
        if let Checkpoint::Verified { .. } = self.kernel.anti_recaptcha(page).await? {
            self.kernel.capture_response(page).await?;
            return Ok(Outcome::Success);
        }

        let rounds = self.kernel.settings().max_rounds;
        for round in 1..=rounds {
            let outcome = self.acquire_label(page).await?;
            if outcome != Outcome::Continue {
                return Ok(outcome);
            }

            let pass = self.challenge(page).await?;
            tracing::debug!(
                round,
                positives = pass.positives().len(),
                dynamic = pass.is_dynamic(),
                "Submitted"
            );
            if self.kernel.settings().screenshot {
                self.snapshot(page).await;
            }

            let outcome = self.check_accessible_status(page).await?;
            self.history.push(outcome);
            if outcome.is_success() {
                return Ok(outcome);
            }
        }

        tracing::warn!(rounds, label = %self.label, "Visual challenge unresolved");
        Ok(Outcome::Unresolved)
    }

    async fn snapshot(&mut self, page: &dyn ChallengePage) -> Option<PathBuf> {
        let label = self.canonical_label().map(str::to_string);
        self.kernel.capture(page, None, label.as_deref(), None).await
    }
}
