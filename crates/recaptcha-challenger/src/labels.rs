//! Prompt label normalization and the locale-keyed alias mapping.

use std::collections::HashMap;

/// Built-in `phrase -> canonical label` tables.
const EN_ALIASES: &[(&str, &str)] = &[
    ("a fire hydrant", "fire hydrant"),
    ("fire hydrants", "fire hydrant"),
    ("bicycles", "bicycle"),
    ("buses", "bus"),
    ("bus", "bus"),
    ("boats", "boat"),
    ("car", "car"),
    ("cars", "car"),
    ("motorcycles", "motorcycle"),
    ("traffic lights", "traffic light"),
];

const ZH_ALIASES: &[(&str, &str)] = &[
    ("消防栓", "fire hydrant"),
    ("交通灯", "traffic light"),
    ("汽车", "car"),
    ("自行车", "bicycle"),
    ("摩托车", "motorcycle"),
    ("公交车", "bus"),
    ("船", "boat"),
];

/// Trim, collapse inner whitespace and lower-case a prompt phrase.
pub fn normalize_label(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Alias tables for every known locale.
#[derive(Debug, Clone)]
pub struct LabelAliases {
    locales: HashMap<String, HashMap<String, String>>,
}

impl Default for LabelAliases {
    fn default() -> Self {
        let mut aliases = Self::empty();
        aliases.extend("en", EN_ALIASES.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        aliases.extend("zh", ZH_ALIASES.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        aliases
    }
}

impl LabelAliases {
    pub fn empty() -> Self {
        Self {
            locales: HashMap::new(),
        }
    }

    /// Add or override entries for a locale. Keys are normalized on insert.
    pub fn extend<I>(&mut self, lang: &str, entries: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let table = self.locales.entry(lang.to_string()).or_default();
        for (phrase, canonical) in entries {
            table.insert(normalize_label(&phrase), canonical);
        }
    }

    /// Build the table for one locale. Unknown locales yield an empty table.
    pub fn for_locale(&self, lang: &str) -> AliasTable {
        let entries = self.locales.get(lang).cloned().unwrap_or_else(|| {
            tracing::warn!("No label aliases for locale {lang}, every label will be skipped");
            HashMap::new()
        });
        AliasTable {
            lang: lang.to_string(),
            entries,
        }
    }

    pub fn locales(&self) -> Vec<&str> {
        let mut langs: Vec<&str> = self.locales.keys().map(String::as_str).collect();
        langs.sort_unstable();
        langs
    }
}

/// Alias mapping of a single locale, owned by one visual controller.
#[derive(Debug, Clone)]
pub struct AliasTable {
    lang: String,
    entries: HashMap<String, String>,
}

impl AliasTable {
    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// Canonical category for a raw prompt phrase, if it is scheduled.
    pub fn canonical(&self, raw: &str) -> Option<&str> {
        self.entries.get(&normalize_label(raw)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
