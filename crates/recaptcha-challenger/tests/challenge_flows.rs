//! End-to-end challenge flows against a scripted in-memory page.
//!
//! The page double answers every probe from per-locator scripts. A script
//! yields its values in order and then keeps repeating the last one.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use recaptcha_challenger::selectors;
use recaptcha_challenger::*;

// ─────────────────────── helpers ───────────────────────

const TOKEN: &str = "03AGdBq24PBCbwiDRaS_MJ7Z";

#[derive(Default)]
struct Script {
    visible: HashMap<String, VecDeque<bool>>,
    texts: HashMap<String, VecDeque<Option<String>>>,
    attrs: HashMap<(String, String), VecDeque<Option<String>>>,
    counts: HashMap<String, VecDeque<usize>>,
    missing: HashSet<String>,
    camera_broken: bool,
    log: Vec<String>,
}

fn next<T: Clone>(queue: Option<&mut VecDeque<T>>) -> Option<T> {
    let queue = queue?;
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

#[derive(Default)]
struct ScriptedPage {
    script: Mutex<Script>,
}

impl ScriptedPage {
    fn visible(self, target: Locator, values: &[bool]) -> Self {
        self.script
            .lock()
            .unwrap()
            .visible
            .insert(target.to_string(), values.iter().copied().collect());
        self
    }

    fn text(self, target: Locator, values: &[&str]) -> Self {
        self.script.lock().unwrap().texts.insert(
            target.to_string(),
            values.iter().map(|v| Some(v.to_string())).collect(),
        );
        self
    }

    fn attr(self, target: Locator, name: &str, values: &[&str]) -> Self {
        self.script.lock().unwrap().attrs.insert(
            (target.to_string(), name.to_string()),
            values.iter().map(|v| Some(v.to_string())).collect(),
        );
        self
    }

    fn count(self, target: Locator, values: &[usize]) -> Self {
        self.script
            .lock()
            .unwrap()
            .counts
            .insert(target.to_string(), values.iter().copied().collect());
        self
    }

    fn missing(self, target: Locator) -> Self {
        self.script
            .lock()
            .unwrap()
            .missing
            .insert(target.to_string());
        self
    }

    fn camera_broken(self) -> Self {
        self.script.lock().unwrap().camera_broken = true;
        self
    }

    fn log(&self) -> Vec<String> {
        self.script.lock().unwrap().log.clone()
    }

    fn clicks(&self, target: &Locator) -> usize {
        let entry = format!("click {target}");
        self.log().iter().filter(|l| **l == entry).count()
    }

    fn record(&self, entry: String) {
        self.script.lock().unwrap().log.push(entry);
    }

    fn act(&self, target: &Locator, entry: String) -> ChallengeResult<()> {
        let mut script = self.script.lock().unwrap();
        if script.missing.contains(&target.to_string()) {
            return Err(ChallengeError::ElementTimeout(target.to_string()));
        }
        script.log.push(entry);
        Ok(())
    }
}

#[async_trait]
impl ChallengePage for ScriptedPage {
    async fn wait_for(&self, target: &Locator, _timeout: Duration) -> ChallengeResult<bool> {
        let mut script = self.script.lock().unwrap();
        Ok(next(script.visible.get_mut(&target.to_string())).unwrap_or(false))
    }

    async fn count(&self, target: &Locator) -> ChallengeResult<usize> {
        let mut script = self.script.lock().unwrap();
        Ok(next(script.counts.get_mut(&target.to_string())).unwrap_or(0))
    }

    async fn click(&self, target: &Locator, _timeout: Duration) -> ChallengeResult<()> {
        self.act(target, format!("click {target}"))
    }

    async fn text_of(&self, target: &Locator, _timeout: Duration) -> ChallengeResult<Option<String>> {
        let mut script = self.script.lock().unwrap();
        Ok(next(script.texts.get_mut(&target.to_string())).flatten())
    }

    async fn attribute_of(
        &self,
        target: &Locator,
        name: &str,
        _timeout: Duration,
    ) -> ChallengeResult<Option<String>> {
        let mut script = self.script.lock().unwrap();
        let key = (target.to_string(), name.to_string());
        Ok(next(script.attrs.get_mut(&key)).flatten())
    }

    async fn fill(&self, target: &Locator, text: &str, _timeout: Duration) -> ChallengeResult<()> {
        self.act(target, format!("fill {target}={text}"))
    }

    async fn press(&self, target: &Locator, key: &str, _timeout: Duration) -> ChallengeResult<()> {
        self.act(target, format!("press {target}={key}"))
    }

    async fn screenshot(&self, target: Option<&Locator>) -> ChallengeResult<Vec<u8>> {
        let key = target.map(|t| t.to_string()).unwrap_or_else(|| "viewport".to_string());
        if self.script.lock().unwrap().camera_broken {
            return Err(ChallengeError::Browser("screenshot failed".to_string()));
        }
        self.record(format!("screenshot {key}"));
        Ok(key.into_bytes())
    }

    async fn evaluate(&self, script: &str) -> ChallengeResult<serde_json::Value> {
        self.record(format!("evaluate {script}"));
        Ok(serde_json::Value::String(TOKEN.to_string()))
    }

    async fn pause(&self, _duration: Duration) {}
}

/// Answers per screenshot key; unscripted tiles are negative.
#[derive(Clone, Default)]
struct ScriptedClassifier {
    answers: HashMap<String, VecDeque<bool>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedClassifier {
    fn answer(mut self, target: Locator, values: &[bool]) -> Self {
        self.answers
            .insert(target.to_string(), values.iter().copied().collect());
        self
    }

    fn calls_for(&self, target: &Locator) -> usize {
        let key = target.to_string();
        self.calls.lock().unwrap().iter().filter(|c| **c == key).count()
    }
}

impl ImageClassifier for ScriptedClassifier {
    fn flag(&self) -> &str {
        "scripted"
    }

    fn classify(&mut self, image: &[u8], _label: &str) -> ChallengeResult<bool> {
        let key = String::from_utf8_lossy(image).to_string();
        self.calls.lock().unwrap().push(key.clone());
        Ok(next(self.answers.get_mut(&key)).unwrap_or(false))
    }
}

#[derive(Clone, Default)]
struct StubFetcher {
    urls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl AssetFetcher for StubFetcher {
    async fn download(&self, url: &str, dest: &Path) -> ChallengeResult<u64> {
        self.urls.lock().unwrap().push(url.to_string());
        std::fs::write(dest, b"ID3")?;
        Ok(3)
    }
}

struct CopyTranscoder;

impl Transcoder for CopyTranscoder {
    fn transcode(&self, src: &Path, dest: &Path) -> ChallengeResult<()> {
        std::fs::copy(src, dest)?;
        Ok(())
    }
}

struct FailingTranscriber;

#[async_trait]
impl Transcriber for FailingTranscriber {
    async fn transcribe(&self, _wav: &Path, _locale: &str) -> ChallengeResult<String> {
        Err(ChallengeError::Transcription("503 Service Unavailable".to_string()))
    }
}

struct FixedTranscriber(&'static str);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, wav: &Path, locale: &str) -> ChallengeResult<String> {
        assert!(wav.extension().is_some_and(|e| e == "wav"));
        assert_eq!(locale, "en-US");
        Ok(self.0.to_string())
    }
}

fn audio_challenger(dir: &Path, fetcher: StubFetcher, answer: &'static str) -> Challenger {
    ChallengeFactory::new()
        .with_fetcher(fetcher)
        .with_transcoder(CopyTranscoder)
        .with_transcriber(FixedTranscriber(answer))
        .create("audio", dir, None)
        .unwrap()
}

fn visual_challenger(dir: &Path, classifier: ScriptedClassifier, settings: ChallengeSettings) -> Challenger {
    ChallengeFactory::new()
        .with_settings(settings)
        .with_classifier(classifier)
        .create("visual", dir, None)
        .unwrap()
}

fn visual(challenger: &mut Challenger) -> &mut VisualChallenger {
    match challenger {
        Challenger::Visual(c) => c,
        Challenger::Audio(_) => panic!("expected a visual challenger"),
    }
}

fn audio_button() -> Locator {
    Locator::challenge(selectors::AUDIO_BUTTON)
}

fn tile(index: usize) -> Locator {
    Locator::challenge(selectors::TILES).nth(index)
}

fn settled_tile(index: usize) -> Locator {
    Locator::challenge(selectors::tile_by_tabindex(index))
}

/// A 3x3 grid asking for `labels` in turn.
fn grid_page(labels: &[&str]) -> ScriptedPage {
    ScriptedPage::default()
        .text(Locator::challenge(selectors::LABEL), labels)
        .count(Locator::challenge(selectors::TILES), &[9])
}

// ─────────────────────── audio ───────────────────────

#[tokio::test]
async fn test_01_audio_success() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StubFetcher::default();
    let mut challenger = audio_challenger(dir.path(), fetcher.clone(), "Forest River Cloud");
    let page = ScriptedPage::default()
        .visible(audio_button(), &[true])
        .attr(
            Locator::challenge(selectors::AUDIO_SOURCE),
            "src",
            &["https://www.google.com/recaptcha/api2/payload/audio.mp3?p=1"],
        );

    let outcome = challenger.run(&page).await.unwrap();

    assert_eq!(outcome, Outcome::Success);
    assert_eq!(challenger.response(), Some(TOKEN));
    assert_eq!(fetcher.urls.lock().unwrap().len(), 1);

    let log = page.log();
    let field = Locator::challenge(selectors::AUDIO_RESPONSE);
    assert!(log.contains(&format!("fill {field}=forest river cloud")));
    assert!(log.contains(&format!("press {field}=Enter")));
    assert_eq!(page.clicks(&audio_button()), 1);

    let wavs: Vec<_> = std::fs::read_dir(dir.path().join("audio"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "wav"))
        .collect();
    assert_eq!(wavs.len(), 1);
}

#[tokio::test]
async fn test_02_audio_lockout_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StubFetcher::default();
    let mut challenger = audio_challenger(dir.path(), fetcher.clone(), "unused");
    let page = ScriptedPage::default()
        .visible(audio_button(), &[true])
        .missing(Locator::challenge(selectors::PLAY_BUTTON))
        .text(
            Locator::challenge(selectors::LOCKOUT_HEADER),
            &["Try again later"],
        );

    let err = challenger.run(&page).await.unwrap_err();

    assert!(matches!(err, ChallengeError::RiskControlDetected(_)));
    assert!(fetcher.urls.lock().unwrap().is_empty());
    assert!(!page.log().iter().any(|l| l.starts_with("fill")));
    assert_eq!(challenger.response(), None);
}

#[tokio::test]
async fn test_03_audio_source_never_exposed() {
    let dir = tempfile::tempdir().unwrap();
    let mut challenger = audio_challenger(dir.path(), StubFetcher::default(), "unused");
    let page = ScriptedPage::default()
        .visible(audio_button(), &[true])
        .missing(Locator::challenge(selectors::PLAY_BUTTON));

    let err = challenger.run(&page).await.unwrap_err();
    assert!(matches!(err, ChallengeError::AssetNotFound(_)));
}

#[tokio::test]
async fn test_04_submit_text_lowercases_once() {
    let dir = tempfile::tempdir().unwrap();
    let challenger = audio_challenger(dir.path(), StubFetcher::default(), "unused");
    let Challenger::Audio(audio) = &challenger else {
        panic!("expected an audio challenger");
    };
    let page = ScriptedPage::default();

    assert!(audio.submit_text(&page, "Bus Stop").await.unwrap());

    let field = Locator::challenge(selectors::AUDIO_RESPONSE);
    assert_eq!(
        page.log(),
        vec![
            format!("fill {field}="),
            format!("fill {field}=bus stop"),
            format!("press {field}=Enter"),
        ]
    );
}

#[tokio::test]
async fn test_05_missing_answer_field_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut challenger = audio_challenger(dir.path(), StubFetcher::default(), "forest");
    let page = ScriptedPage::default()
        .visible(audio_button(), &[true])
        .attr(Locator::challenge(selectors::AUDIO_SOURCE), "src", &["https://a/b.mp3"])
        .missing(Locator::challenge(selectors::AUDIO_RESPONSE));

    let err = challenger.run(&page).await.unwrap_err();
    assert!(matches!(err, ChallengeError::ChallengeTimeout(_)));
}

#[tokio::test]
async fn test_06_audio_error_message_asks_for_retry() {
    let dir = tempfile::tempdir().unwrap();
    let mut challenger = audio_challenger(dir.path(), StubFetcher::default(), "forest");
    let error = Locator::challenge(selectors::AUDIO_ERROR);
    let page = ScriptedPage::default()
        .visible(audio_button(), &[true])
        .attr(Locator::challenge(selectors::AUDIO_SOURCE), "src", &["https://a/b.mp3"])
        .visible(error.clone(), &[true])
        .text(error, &["Multiple correct solutions required"]);

    assert_eq!(challenger.run(&page).await.unwrap(), Outcome::Retry);
    assert_eq!(challenger.response(), None);
}

#[tokio::test]
async fn test_07_modality_switch_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let mut challenger = audio_challenger(dir.path(), StubFetcher::default(), "unused");
    let page = ScriptedPage::default();

    let err = challenger.run(&page).await.unwrap_err();
    assert!(matches!(err, ChallengeError::ModalitySwitchTimeout(_)));
}

#[tokio::test]
async fn test_08_checkbox_passes_without_challenge() {
    let dir = tempfile::tempdir().unwrap();
    let mut challenger = audio_challenger(dir.path(), StubFetcher::default(), "unused");
    let page = ScriptedPage::default()
        .attr(Locator::anchor(selectors::ANCHOR), "aria-checked", &["true"])
        .text(
            Locator::anchor(selectors::ACCESSIBLE_STATUS),
            &["You are verified"],
        );

    assert_eq!(challenger.run(&page).await.unwrap(), Outcome::Success);
    assert_eq!(challenger.response(), Some(TOKEN));
    assert_eq!(page.clicks(&audio_button()), 0);
}

// ─────────────────────── visual ───────────────────────

#[tokio::test]
async fn test_09_tactical_retreat() {
    let dir = tempfile::tempdir().unwrap();
    let mut challenger = visual_challenger(
        dir.path(),
        ScriptedClassifier::default(),
        ChallengeSettings::default(),
    );
    let page = grid_page(&["Fire Hydrants", "tractors"]);
    let controller = visual(&mut challenger);

    controller.get_label(&page).await.unwrap();
    assert_eq!(controller.canonical_label(), Some("fire hydrant"));
    assert_eq!(controller.tactical_retreat(&page).await.unwrap(), Outcome::Continue);
    assert!(controller.kernel().last_screenshot().is_none());

    controller.get_label(&page).await.unwrap();
    assert_eq!(controller.tactical_retreat(&page).await.unwrap(), Outcome::Backcall);
    let shot = controller.kernel().last_screenshot().unwrap();
    assert!(shot.exists());
    assert!(shot.to_string_lossy().contains("tractors"));
    assert_eq!(
        shot.parent().unwrap(),
        dir.path().join("captcha_screenshot")
    );
}

#[tokio::test]
async fn test_10_visual_skip_then_solve() {
    let dir = tempfile::tempdir().unwrap();
    let mut challenger = visual_challenger(
        dir.path(),
        ScriptedClassifier::default().answer(tile(4), &[true]),
        ChallengeSettings::default(),
    );
    let page = grid_page(&["tractors", "buses"])
        .text(
            Locator::challenge(selectors::PROMPT),
            &["Select all images with tractors", "Select all images with buses"],
        )
        .attr(
            settled_tile(4),
            "class",
            &[
                "rc-imageselect-tile",
                "rc-imageselect-tile rc-imageselect-tileselected",
            ],
        );

    let outcome = challenger.run(&page).await.unwrap();

    assert_eq!(outcome, Outcome::Success);
    assert_eq!(challenger.response(), Some(TOKEN));
    assert_eq!(page.clicks(&Locator::challenge(selectors::RELOAD_BUTTON)), 1);
    assert_eq!(page.clicks(&tile(4)), 1);
    assert_eq!(page.clicks(&Locator::challenge(selectors::VERIFY_BUTTON)), 1);

    let controller = visual(&mut challenger);
    assert_eq!(
        controller.history(),
        &[Outcome::Backcall, Outcome::Continue, Outcome::Success]
    );
    assert_eq!(controller.prompt(), "Select all images with buses");
}

#[tokio::test]
async fn test_11_dynamic_round_drains_in_two_passes() {
    let dir = tempfile::tempdir().unwrap();
    let classifier = ScriptedClassifier::default()
        .answer(tile(0), &[true])
        .answer(tile(1), &[true])
        .answer(tile(2), &[true])
        .answer(settled_tile(0), &[false])
        .answer(settled_tile(1), &[true, false])
        .answer(settled_tile(2), &[true, false]);
    let mut challenger = visual_challenger(dir.path(), classifier.clone(), ChallengeSettings::default());
    let page = grid_page(&["bus"]).attr(
        settled_tile(0),
        "class",
        &[
            "rc-imageselect-tile",
            "rc-imageselect-tile rc-imageselect-dynamic-selected",
            "rc-imageselect-tile",
        ],
    );
    let controller = visual(&mut challenger);

    controller.get_label(&page).await.unwrap();
    let pass = controller.classify_tiles(&page, "bus").await.unwrap();
    assert!(pass.is_dynamic());
    assert_eq!(pass.positives(), vec![0, 1, 2]);

    let passes = controller.stabilize(&page, pass.positives(), "bus").await.unwrap();
    assert_eq!(passes, 2);
    assert_eq!(classifier.calls_for(&settled_tile(0)), 1);
    assert_eq!(classifier.calls_for(&settled_tile(1)), 2);
    assert_eq!(classifier.calls_for(&settled_tile(2)), 2);
    assert_eq!(page.clicks(&settled_tile(1)), 1);
}

#[tokio::test]
async fn test_12_dynamic_round_submits_after_stabilization() {
    let dir = tempfile::tempdir().unwrap();
    let classifier = ScriptedClassifier::default()
        .answer(tile(0), &[true])
        .answer(settled_tile(0), &[true, false]);
    let mut challenger = visual_challenger(dir.path(), classifier.clone(), ChallengeSettings::default());
    let page = grid_page(&["buses"]).attr(
        settled_tile(0),
        "class",
        &[
            "rc-imageselect-tile",
            "rc-imageselect-dynamic-selected",
            "rc-imageselect-tile",
        ],
    );

    assert_eq!(challenger.run(&page).await.unwrap(), Outcome::Success);

    let log = page.log();
    let verify = format!("click {}", Locator::challenge(selectors::VERIFY_BUTTON));
    let refill = format!("click {}", settled_tile(0));
    let verify_at = log.iter().position(|l| *l == verify).unwrap();
    let refill_at = log.iter().position(|l| *l == refill).unwrap();
    assert!(refill_at < verify_at);
    assert_eq!(classifier.calls_for(&settled_tile(0)), 2);
}

#[tokio::test]
async fn test_13_empty_stabilization_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut challenger = visual_challenger(
        dir.path(),
        ScriptedClassifier::default(),
        ChallengeSettings::default(),
    );
    let page = ScriptedPage::default();

    let passes = visual(&mut challenger)
        .stabilize(&page, Vec::new(), "bus")
        .await
        .unwrap();

    assert_eq!(passes, 0);
    assert!(page.log().is_empty());
}

#[tokio::test]
async fn test_14_stabilization_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let settings = ChallengeSettings {
        max_dynamic_passes: 3,
        ..ChallengeSettings::default()
    };
    let classifier = ScriptedClassifier::default().answer(settled_tile(5), &[true]);
    let mut challenger = visual_challenger(dir.path(), classifier.clone(), settings);
    let page = ScriptedPage::default();

    let passes = visual(&mut challenger)
        .stabilize(&page, vec![5], "car")
        .await
        .unwrap();

    assert_eq!(passes, 3);
    assert_eq!(classifier.calls_for(&settled_tile(5)), 3);
}

#[tokio::test]
async fn test_15_detection_grid_is_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let mut challenger = visual_challenger(
        dir.path(),
        ScriptedClassifier::default(),
        ChallengeSettings::default(),
    );
    let page = ScriptedPage::default()
        .text(Locator::challenge(selectors::LABEL), &["cars"])
        .count(Locator::challenge(selectors::TILES), &[16, 9]);

    assert_eq!(challenger.run(&page).await.unwrap(), Outcome::Success);

    let controller = visual(&mut challenger);
    assert_eq!(
        controller.history(),
        &[Outcome::Refresh, Outcome::Continue, Outcome::Success]
    );
    assert_eq!(controller.oncall_task(), Some(TaskType::BinaryClassification));
}

#[tokio::test]
async fn test_16_rejected_submission_retries_without_reload() {
    let dir = tempfile::tempdir().unwrap();
    let mut challenger = visual_challenger(
        dir.path(),
        ScriptedClassifier::default(),
        ChallengeSettings::default(),
    );
    let select_more = Locator::challenge(selectors::SELECT_MORE);
    let page = grid_page(&["boats"])
        .visible(select_more.clone(), &[true, false])
        .text(select_more, &["Please select all matching images."]);

    assert_eq!(challenger.run(&page).await.unwrap(), Outcome::Success);
    assert_eq!(page.clicks(&Locator::challenge(selectors::RELOAD_BUTTON)), 0);
    assert_eq!(page.clicks(&Locator::challenge(selectors::VERIFY_BUTTON)), 2);
    assert_eq!(
        visual(&mut challenger).history(),
        &[
            Outcome::Continue,
            Outcome::Crash,
            Outcome::Continue,
            Outcome::Success
        ]
    );
}

#[tokio::test]
async fn test_17_unscheduled_forever_is_unresolved() {
    let dir = tempfile::tempdir().unwrap();
    let settings = ChallengeSettings {
        max_label_attempts: 2,
        ..ChallengeSettings::default()
    };
    let mut challenger = visual_challenger(dir.path(), ScriptedClassifier::default(), settings);
    let page = grid_page(&["tractors"]);

    assert_eq!(challenger.run(&page).await.unwrap(), Outcome::Unresolved);
    assert_eq!(page.clicks(&Locator::challenge(selectors::RELOAD_BUTTON)), 2);
    assert_eq!(challenger.response(), None);
}

#[tokio::test]
async fn test_18_rounds_exhausted_is_unresolved() {
    let dir = tempfile::tempdir().unwrap();
    let settings = ChallengeSettings {
        max_rounds: 2,
        ..ChallengeSettings::default()
    };
    let mut challenger = visual_challenger(dir.path(), ScriptedClassifier::default(), settings);
    let page = grid_page(&["bicycles"])
        .visible(Locator::challenge(selectors::INCORRECT), &[true]);

    assert_eq!(challenger.run(&page).await.unwrap(), Outcome::Unresolved);
    assert_eq!(page.clicks(&Locator::challenge(selectors::VERIFY_BUTTON)), 2);
}

#[tokio::test]
async fn test_19_missing_label_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut challenger = visual_challenger(
        dir.path(),
        ScriptedClassifier::default(),
        ChallengeSettings::default(),
    );
    let page = ScriptedPage::default().count(Locator::challenge(selectors::TILES), &[9]);

    let err = challenger.run(&page).await.unwrap_err();
    assert!(matches!(err, ChallengeError::LabelNotFound(_)));
}

#[tokio::test]
async fn test_20_per_tile_screenshots() {
    let dir = tempfile::tempdir().unwrap();
    let settings = ChallengeSettings {
        screenshot: true,
        ..ChallengeSettings::default()
    };
    let mut challenger = visual_challenger(dir.path(), ScriptedClassifier::default(), settings);
    let page = grid_page(&["traffic lights"]);

    assert_eq!(challenger.run(&page).await.unwrap(), Outcome::Success);

    let shots: Vec<String> = std::fs::read_dir(dir.path().join("captcha_screenshot"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    let tiles = shots
        .iter()
        .filter(|s| s.contains(".scripted.traffic_light"))
        .count();
    assert_eq!(tiles, 9);
    // one extra for the challenge frame after submit
    assert_eq!(shots.len(), 10);
}

// ─────────────────────── factory ───────────────────────

#[tokio::test]
async fn test_21_factory_scopes_cache_by_style() {
    let dir = tempfile::tempdir().unwrap();
    let challenger = audio_challenger(dir.path(), StubFetcher::default(), "unused");

    assert_eq!(challenger.style(), ChallengeStyle::Audio);
    assert_eq!(challenger.kernel().session().cache_dir, dir.path().join("audio"));
    assert!(dir.path().join("audio").is_dir());
    assert_eq!(challenger.response(), None);
}

#[tokio::test]
async fn test_22_factory_merges_configured_aliases() {
    let dir = tempfile::tempdir().unwrap();
    let settings = ChallengeSettings::from_json(
        r#"{"label_aliases": {"en": {"tractors": "truck"}}}"#,
    )
    .unwrap();
    let mut challenger = visual_challenger(dir.path(), ScriptedClassifier::default(), settings);
    let page = grid_page(&["Tractors"]);
    let controller = visual(&mut challenger);

    controller.get_label(&page).await.unwrap();
    assert_eq!(controller.canonical_label(), Some("truck"));
    assert_eq!(controller.tactical_retreat(&page).await.unwrap(), Outcome::Continue);
}

#[tokio::test]
async fn test_23_checkbox_presence() {
    let page = ScriptedPage::default().visible(Locator::top("iframe[title='reCAPTCHA']"), &[true]);
    assert!(face_the_checkbox(&page, Duration::from_secs(1)).await.unwrap());
    assert!(!face_the_checkbox(&ScriptedPage::default(), Duration::from_secs(1))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_24_fading_tile_is_never_classified() {
    let dir = tempfile::tempdir().unwrap();
    let settings = ChallengeSettings {
        max_dynamic_passes: 1,
        ..ChallengeSettings::default()
    };
    let classifier = ScriptedClassifier::default().answer(settled_tile(0), &[true]);
    let mut challenger = visual_challenger(dir.path(), classifier.clone(), settings);
    let page = ScriptedPage::default().attr(
        settled_tile(0),
        "class",
        &["rc-imageselect-tile rc-imageselect-dynamic-selected"],
    );

    let passes = visual(&mut challenger)
        .stabilize(&page, vec![0], "bus")
        .await
        .unwrap();

    assert_eq!(passes, 1);
    assert_eq!(classifier.calls_for(&settled_tile(0)), 0);
    assert_eq!(page.clicks(&settled_tile(0)), 0);
    assert!(!page.log().iter().any(|l| l.starts_with("screenshot")));
}

#[tokio::test]
async fn test_25_fading_tile_is_classified_once_settled() {
    let dir = tempfile::tempdir().unwrap();
    let settings = ChallengeSettings {
        timeouts: Timeouts {
            tile_settle: 0,
            ..Timeouts::default()
        },
        ..ChallengeSettings::default()
    };
    let classifier = ScriptedClassifier::default().answer(settled_tile(3), &[false]);
    let mut challenger = visual_challenger(dir.path(), classifier.clone(), settings);
    let page = ScriptedPage::default().attr(
        settled_tile(3),
        "class",
        &["rc-imageselect-dynamic-selected", "rc-imageselect-tile"],
    );

    let passes = visual(&mut challenger)
        .stabilize(&page, vec![3], "bus")
        .await
        .unwrap();

    assert_eq!(passes, 2);
    assert_eq!(classifier.calls_for(&settled_tile(3)), 1);
}

#[tokio::test]
async fn test_26_retry_keeps_selected_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let classifier = ScriptedClassifier::default().answer(tile(4), &[true]);
    let mut challenger = visual_challenger(dir.path(), classifier.clone(), ChallengeSettings::default());
    let select_more = Locator::challenge(selectors::SELECT_MORE);
    let page = grid_page(&["boats"])
        .attr(
            settled_tile(4),
            "class",
            &[
                "rc-imageselect-tile",
                "rc-imageselect-tile rc-imageselect-tileselected",
            ],
        )
        .visible(select_more.clone(), &[true, false])
        .text(select_more, &["Please select all matching images."]);

    assert_eq!(challenger.run(&page).await.unwrap(), Outcome::Success);
    assert_eq!(page.clicks(&tile(4)), 1);
    assert_eq!(classifier.calls_for(&tile(4)), 1);
    assert_eq!(page.clicks(&Locator::challenge(selectors::VERIFY_BUTTON)), 2);
    assert_eq!(page.clicks(&Locator::challenge(selectors::RELOAD_BUTTON)), 0);
}

#[tokio::test]
async fn test_27_failed_capture_does_not_abort_retreat() {
    let dir = tempfile::tempdir().unwrap();
    let mut challenger = visual_challenger(
        dir.path(),
        ScriptedClassifier::default(),
        ChallengeSettings::default(),
    );
    let page = grid_page(&["tractors"]).camera_broken();
    let controller = visual(&mut challenger);

    controller.get_label(&page).await.unwrap();
    assert_eq!(controller.tactical_retreat(&page).await.unwrap(), Outcome::Backcall);
    assert!(controller.kernel().last_screenshot().is_none());
    assert!(!dir.path().join("captcha_screenshot").exists());
}

#[tokio::test]
async fn test_28_transcriber_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut challenger = ChallengeFactory::new()
        .with_fetcher(StubFetcher::default())
        .with_transcoder(CopyTranscoder)
        .with_transcriber(FailingTranscriber)
        .create("audio", dir.path(), None)
        .unwrap();
    let page = ScriptedPage::default()
        .visible(audio_button(), &[true])
        .attr(Locator::challenge(selectors::AUDIO_SOURCE), "src", &["https://a/b.mp3"]);

    let err = challenger.run(&page).await.unwrap_err();

    assert!(matches!(err, ChallengeError::Transcription(_)));
    assert!(!page.log().iter().any(|l| l.starts_with("fill")));
    assert_eq!(challenger.response(), None);
}
