//! UI adapter boundary: frame-scoped locators and the page capability trait.
//!
//! The engine never talks to a browser directly. Everything it needs from the
//! live document goes through [`ChallengePage`], whose reads may come back
//! empty because the widget mutates underneath us. Every wait is bounded.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::ChallengeResult;

/// Interval between probes of a polled condition.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

const CHECKBOX_IFRAME: &str = "iframe[title='reCAPTCHA']";
const CHALLENGE_IFRAME: &str = "iframe[src*='bframe']";

/// Document the selector is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frame {
    /// The host page.
    Top,
    /// The checkbox ("anchor") iframe.
    Anchor,
    /// The challenge ("bframe") iframe.
    Challenge,
}

impl Frame {
    /// CSS selector of the iframe element hosting this frame, if any.
    pub fn iframe_selector(&self) -> Option<&'static str> {
        match self {
            Frame::Top => None,
            Frame::Anchor => Some(CHECKBOX_IFRAME),
            Frame::Challenge => Some(CHALLENGE_IFRAME),
        }
    }
}

/// Lazily resolved reference to an element: frame + CSS selector + optional index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub frame: Frame,
    pub selector: String,
    pub index: Option<usize>,
}

impl Locator {
    pub fn new(frame: Frame, selector: impl Into<String>) -> Self {
        Self {
            frame,
            selector: selector.into(),
            index: None,
        }
    }

    pub fn top(selector: impl Into<String>) -> Self {
        Self::new(Frame::Top, selector)
    }

    pub fn anchor(selector: impl Into<String>) -> Self {
        Self::new(Frame::Anchor, selector)
    }

    pub fn challenge(selector: impl Into<String>) -> Self {
        Self::new(Frame::Challenge, selector)
    }

    /// Select the n-th match (document order) instead of the first.
    pub fn nth(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn position(&self) -> usize {
        self.index.unwrap_or(0)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = match self.frame {
            Frame::Top => "top",
            Frame::Anchor => "anchor",
            Frame::Challenge => "challenge",
        };
        match self.index {
            Some(i) => write!(f, "{frame}>>{}[{i}]", self.selector),
            None => write!(f, "{frame}>>{}", self.selector),
        }
    }
}

/// Browser capabilities consumed by the engine.
#[async_trait]
pub trait ChallengePage: Send + Sync {
    /// Wait until the element is attached and visible. `false` on timeout.
    async fn wait_for(&self, target: &Locator, timeout: Duration) -> ChallengeResult<bool>;

    /// Number of elements currently matching the selector.
    async fn count(&self, target: &Locator) -> ChallengeResult<usize>;

    /// Click the element. Fails with `ElementTimeout` if it never shows up.
    async fn click(&self, target: &Locator, timeout: Duration) -> ChallengeResult<()>;

    /// Text content, or `None` if the element is absent within the timeout.
    async fn text_of(&self, target: &Locator, timeout: Duration) -> ChallengeResult<Option<String>>;

    /// Attribute value, or `None` if the element or attribute is absent.
    async fn attribute_of(
        &self,
        target: &Locator,
        name: &str,
        timeout: Duration,
    ) -> ChallengeResult<Option<String>>;

    /// Replace the value of an input. Fails with `ElementTimeout` if absent.
    async fn fill(&self, target: &Locator, text: &str, timeout: Duration) -> ChallengeResult<()>;

    /// Send a key press to an element. Fails with `ElementTimeout` if absent.
    async fn press(&self, target: &Locator, key: &str, timeout: Duration) -> ChallengeResult<()>;

    /// PNG screenshot of an element, or of the whole viewport for `None`.
    async fn screenshot(&self, target: Option<&Locator>) -> ChallengeResult<Vec<u8>>;

    /// Evaluate a script in the host page.
    async fn evaluate(&self, script: &str) -> ChallengeResult<serde_json::Value>;

    /// Let the page settle.
    async fn pause(&self, duration: Duration);
}

/// Poll an attribute until `accept` holds for its value, within `timeout`.
///
/// Absent attributes are passed to `accept` as `None`. Returns whether the
/// condition held before the deadline.
pub async fn poll_attribute<P, F>(
    page: &P,
    target: &Locator,
    name: &str,
    timeout: Duration,
    accept: F,
) -> ChallengeResult<bool>
where
    P: ChallengePage + ?Sized,
    F: Fn(Option<&str>) -> bool,
{
    let attempts = (timeout.as_millis() / POLL_INTERVAL.as_millis()).max(1);
    for attempt in 0..attempts {
        let value = page.attribute_of(target, name, Duration::ZERO).await?;
        if accept(value.as_deref()) {
            return Ok(true);
        }
        if attempt + 1 < attempts {
            page.pause(POLL_INTERVAL).await;
        }
    }
    Ok(false)
}

/// Whether the page carries the checkbox widget at all.
pub async fn face_the_checkbox<P>(page: &P, timeout: Duration) -> ChallengeResult<bool>
where
    P: ChallengePage + ?Sized,
{
    page.wait_for(&Locator::top(CHECKBOX_IFRAME), timeout).await
}
