//! CSS selectors and class markers of the widget's DOM.

/// Checkbox inside the anchor frame.
pub const CHECKBOX: &str = ".recaptcha-checkbox-border";
pub const ANCHOR: &str = "#recaptcha-anchor";
pub const ACCESSIBLE_STATUS: &str = "#recaptcha-accessible-status";

pub const AUDIO_BUTTON: &str = "#recaptcha-audio-button";
pub const RELOAD_BUTTON: &str = "#recaptcha-reload-button";
pub const VERIFY_BUTTON: &str = "#recaptcha-verify-button";

pub const PLAY_BUTTON: &str = "button[aria-labelledby]";
pub const LOCKOUT_HEADER: &str = ".rc-doscaptcha-header-text";
pub const AUDIO_SOURCE: &str = "#audio-source";
pub const AUDIO_RESPONSE: &str = "#audio-response";
pub const AUDIO_ERROR: &str = ".rc-audiochallenge-error-message";

pub const PROMPT: &str = ".rc-imageselect-desc-wrapper";
pub const LABEL: &str = "strong";
pub const TILES: &str = "td[aria-label]";
pub const CHALLENGE_BODY: &str = "body.no-selection";
pub const SELECT_MORE: &str = ".rc-imageselect-error-select-more";
pub const INCORRECT: &str = ".rc-imageselect-incorrect-response";

/// Class of a tile whose replacement image is still fading in.
pub const FEATURE_DYNAMIC: &str = "rc-imageselect-dynamic-selected";
/// Class of a tile that keeps a fixed selection marker.
pub const FEATURE_SELECTED: &str = "rc-imageselect-tileselected";

/// Header text shown when the widget locks out automated traffic.
pub const LOCKOUT_MARKER: &str = "Try again later";

/// Script returning the response token of the widget.
pub const RESPONSE_SCRIPT: &str = "grecaptcha.getResponse()";

/// Tab order of the first tile; tiles follow in document order.
const TILE_TABINDEX_OFFSET: usize = 4;

/// Selector addressing one tile through its tab order.
pub fn tile_by_tabindex(index: usize) -> String {
    format!("td[tabindex=\"{}\"]", index + TILE_TABINDEX_OFFSET)
}
