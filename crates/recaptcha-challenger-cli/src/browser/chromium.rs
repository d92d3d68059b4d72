//! `ChallengePage` over a Chromium tab driven by chromiumoxide.
//!
//! Elements are resolved with scripts evaluated in the execution context of
//! the frame that owns them, so the widget works whatever origin hosts it.
//! Frame-local rectangles are shifted by the iframe box read from the host
//! page. Clicks, key presses and screenshots go through CDP so the widget
//! sees trusted input.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParams};
use serde::Deserialize;

use recaptcha_challenger::page::POLL_INTERVAL;
use recaptcha_challenger::{ChallengeError, ChallengePage, ChallengeResult, Frame, Locator};

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. RECAPTCHA_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("RECAPTCHA_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Playwright's browser cache
    if let Some(cache) = dirs::cache_dir() {
        let root = cache.join("ms-playwright");
        if let Ok(entries) = std::fs::read_dir(&root) {
            let mut builds: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("chromium-"))
                })
                .collect();
            builds.sort();
            for build in builds.iter().rev() {
                let candidate = if cfg!(target_os = "macos") {
                    build.join("chrome-mac/Chromium.app/Contents/MacOS/Chromium")
                } else {
                    build.join("chrome-linux/chrome")
                };
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS locations
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Element state reported by [`inspect_script`].
///
/// `x` and `y` are relative to the viewport of the frame that owns the element.
#[derive(Debug, Clone, Deserialize)]
pub struct ElementState {
    pub visible: bool,
    pub text: String,
    pub attr: Option<String>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ElementState {
    fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    fn shifted(mut self, dx: f64, dy: f64) -> Self {
        self.x += dx;
        self.y += dy;
        self
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Offset {
    x: f64,
    y: f64,
}

/// URL fragment identifying the document loaded into a widget frame.
pub fn frame_url_marker(frame: Frame) -> Option<&'static str> {
    match frame {
        Frame::Top => None,
        Frame::Anchor => Some("/recaptcha/api2/anchor"),
        Frame::Challenge => Some("/recaptcha/api2/bframe"),
    }
}

/// Whether a frame URL belongs to `frame`; enterprise widgets use their own path.
pub fn frame_url_matches(frame: Frame, url: &str) -> bool {
    frame_url_marker(frame).is_some_and(|marker| {
        url.contains(marker) || url.contains(&marker.replace("/api2/", "/enterprise/"))
    })
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Wrap `body` so it runs with `doc` and `el` bound in the frame's own document.
///
/// The script evaluates to a JSON string, `"null"` when the element is absent.
pub fn element_script(target: &Locator, body: &str) -> String {
    format!(
        r#"(() => {{
  const doc = document;
  const el = doc.querySelectorAll({selector})[{index}];
  if (!el) return "null";
  return JSON.stringify((() => {{ {body} }})());
}})()"#,
        selector = js_string(&target.selector),
        index = target.position(),
    )
}

/// Visibility, text, one attribute and frame-viewport rectangle of the element.
pub fn inspect_script(target: &Locator, attribute: Option<&str>) -> String {
    let attr = attribute.map(js_string).unwrap_or_else(|| "null".to_string());
    element_script(
        target,
        &format!(
            r#"const r = el.getBoundingClientRect();
  const style = doc.defaultView.getComputedStyle(el);
  const name = {attr};
  return {{
    visible: r.width > 0 && r.height > 0 && style.visibility !== "hidden" && style.display !== "none",
    text: el.textContent || "",
    attr: name === null ? null : el.getAttribute(name),
    x: r.left, y: r.top, width: r.width, height: r.height
  }};"#
        ),
    )
}

/// Number of matches in the frame's document, as a JSON string.
pub fn count_script(target: &Locator) -> String {
    format!(
        "JSON.stringify(document.querySelectorAll({}).length)",
        js_string(&target.selector)
    )
}

/// Viewport position of the iframe's content box, evaluated in the host page.
pub fn frame_offset_script(iframe_selector: &str) -> String {
    format!(
        r#"(() => {{
  const frame = document.querySelector({selector});
  if (!frame) return "null";
  const r = frame.getBoundingClientRect();
  return JSON.stringify({{ x: r.left + frame.clientLeft, y: r.top + frame.clientTop }});
}})()"#,
        selector = js_string(iframe_selector),
    )
}

/// Scroll position of the host page; screenshot clips are in document coordinates.
const SCROLL_SCRIPT: &str = "JSON.stringify({ x: window.scrollX, y: window.scrollY })";

fn fill_script(target: &Locator, text: &str) -> String {
    element_script(
        target,
        &format!(
            r#"el.focus();
  el.value = {value};
  el.dispatchEvent(new Event("input", {{ bubbles: true }}));
  el.dispatchEvent(new Event("change", {{ bubbles: true }}));
  return true;"#,
            value = js_string(text)
        ),
    )
}

fn focus_script(target: &Locator) -> String {
    element_script(target, "el.focus(); return true;")
}

/// A Chromium tab hosting the widget.
pub struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn inner(&self) -> &Page {
        &self.page
    }

    /// Navigate and wait for the load to finish.
    pub async fn goto(&self, url: &str, timeout: Duration) -> ChallengeResult<()> {
        let navigation = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(timeout, navigation).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ChallengeError::Browser(format!("navigation failed: {e}"))),
            Err(_) => Err(ChallengeError::Browser(format!(
                "navigation timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Execution context of the widget frame, `None` until it has loaded.
    async fn frame_context(&self, frame: Frame) -> ChallengeResult<Option<ExecutionContextId>> {
        let frames = self
            .page
            .frames()
            .await
            .map_err(|e| ChallengeError::Browser(format!("failed to list frames: {e}")))?;
        for frame_id in frames {
            let url = self
                .page
                .frame_url(frame_id.clone())
                .await
                .map_err(|e| ChallengeError::Browser(format!("failed to read frame url: {e}")))?;
            if url.is_some_and(|url| frame_url_matches(frame, &url)) {
                return self
                    .page
                    .frame_execution_context(frame_id)
                    .await
                    .map_err(|e| ChallengeError::Browser(format!("frame context lookup failed: {e}")));
            }
        }
        Ok(None)
    }

    /// Evaluate a JSON-returning script in `frame`; `null` if the frame is not there.
    async fn eval_json(&self, frame: Frame, script: String) -> ChallengeResult<serde_json::Value> {
        let raw: String = if frame == Frame::Top {
            self.page
                .evaluate(script)
                .await
                .map_err(|e| ChallengeError::Browser(format!("JS execution failed: {e}")))?
                .into_value()
                .map_err(|e| ChallengeError::Browser(format!("failed to convert JS result: {e:?}")))?
        } else {
            let Some(context) = self.frame_context(frame).await? else {
                return Ok(serde_json::Value::Null);
            };
            let params = EvaluateParams::builder()
                .expression(script)
                .context_id(context)
                .return_by_value(true)
                .build()
                .map_err(ChallengeError::Browser)?;
            self.page
                .evaluate_expression(params)
                .await
                .map_err(|e| ChallengeError::Browser(format!("JS execution failed: {e}")))?
                .into_value()
                .map_err(|e| ChallengeError::Browser(format!("failed to convert JS result: {e:?}")))?
        };
        Ok(serde_json::from_str(&raw)?)
    }

    /// Viewport offset of `frame`'s content relative to the host page.
    async fn frame_offset(&self, frame: Frame) -> ChallengeResult<Option<Offset>> {
        let Some(selector) = frame.iframe_selector() else {
            return Ok(Some(Offset { x: 0.0, y: 0.0 }));
        };
        let value = self
            .eval_json(Frame::Top, frame_offset_script(selector))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Element state with its rectangle in host-page viewport coordinates.
    async fn inspect(&self, target: &Locator, attribute: Option<&str>) -> ChallengeResult<Option<ElementState>> {
        let value = self
            .eval_json(target.frame, inspect_script(target, attribute))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let state: ElementState = serde_json::from_value(value)?;
        let Some(offset) = self.frame_offset(target.frame).await? else {
            return Ok(None);
        };
        Ok(Some(state.shifted(offset.x, offset.y)))
    }

    /// Poll until `accept` holds for the element state or the deadline passes.
    async fn poll<F>(
        &self,
        target: &Locator,
        attribute: Option<&str>,
        timeout: Duration,
        accept: F,
    ) -> ChallengeResult<Option<ElementState>>
    where
        F: Fn(&ElementState) -> bool + Send,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(state) = self.inspect(target, attribute).await? {
                if accept(&state) {
                    return Ok(Some(state));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn visible(&self, target: &Locator, timeout: Duration) -> ChallengeResult<ElementState> {
        self.poll(target, None, timeout, |s| s.visible)
            .await?
            .ok_or_else(|| ChallengeError::ElementTimeout(target.to_string()))
    }

    async fn key(
        &self,
        kind: DispatchKeyEventType,
        key: &str,
        text: Option<&str>,
    ) -> ChallengeResult<()> {
        let mut builder = DispatchKeyEventParams::builder().r#type(kind).key(key).code(key);
        if key == "Enter" {
            builder = builder.windows_virtual_key_code(13).native_virtual_key_code(13);
        }
        if let Some(text) = text {
            builder = builder.text(text);
        }
        let params = builder.build().map_err(ChallengeError::Browser)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| ChallengeError::Browser(format!("key event failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl ChallengePage for ChromiumPage {
    async fn wait_for(&self, target: &Locator, timeout: Duration) -> ChallengeResult<bool> {
        Ok(self.poll(target, None, timeout, |s| s.visible).await?.is_some())
    }

    async fn count(&self, target: &Locator) -> ChallengeResult<usize> {
        let value = self.eval_json(target.frame, count_script(target)).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn click(&self, target: &Locator, timeout: Duration) -> ChallengeResult<()> {
        let state = self.visible(target, timeout).await?;
        self.page
            .click(state.center())
            .await
            .map_err(|e| ChallengeError::Browser(format!("click on {target} failed: {e}")))?;
        Ok(())
    }

    async fn text_of(&self, target: &Locator, timeout: Duration) -> ChallengeResult<Option<String>> {
        Ok(self
            .poll(target, None, timeout, |_| true)
            .await?
            .map(|s| s.text))
    }

    async fn attribute_of(
        &self,
        target: &Locator,
        name: &str,
        timeout: Duration,
    ) -> ChallengeResult<Option<String>> {
        Ok(self
            .poll(target, Some(name), timeout, |_| true)
            .await?
            .and_then(|s| s.attr))
    }

    async fn fill(&self, target: &Locator, text: &str, timeout: Duration) -> ChallengeResult<()> {
        self.visible(target, timeout).await?;
        self.eval_json(target.frame, fill_script(target, text)).await?;
        Ok(())
    }

    async fn press(&self, target: &Locator, key: &str, timeout: Duration) -> ChallengeResult<()> {
        self.visible(target, timeout).await?;
        self.eval_json(target.frame, focus_script(target)).await?;
        let text = (key == "Enter").then_some("\r");
        self.key(DispatchKeyEventType::KeyDown, key, text).await?;
        self.key(DispatchKeyEventType::KeyUp, key, None).await
    }

    async fn screenshot(&self, target: Option<&Locator>) -> ChallengeResult<Vec<u8>> {
        let mut params = ScreenshotParams::builder().format(CaptureScreenshotFormat::Png);
        if let Some(target) = target {
            let state = self.visible(target, Duration::ZERO).await?;
            let scroll: Offset =
                serde_json::from_value(self.eval_json(Frame::Top, SCROLL_SCRIPT.to_string()).await?)?;
            let state = state.shifted(scroll.x, scroll.y);
            params = params.clip(Viewport {
                x: state.x,
                y: state.y,
                width: state.width,
                height: state.height,
                scale: 1.0,
            });
        }
        self.page
            .screenshot(params.build())
            .await
            .map_err(|e| ChallengeError::Browser(format!("screenshot failed: {e}")))
    }

    async fn evaluate(&self, script: &str) -> ChallengeResult<serde_json::Value> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| ChallengeError::Browser(format!("JS execution failed: {e}")))?
            .into_value()
            .map_err(|e| ChallengeError::Browser(format!("failed to convert JS result: {e:?}")))
    }

    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
