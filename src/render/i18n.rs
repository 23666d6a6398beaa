//! Translation lookup.
//!
//! Translations are flat JSON objects, one file per language
//! (`locales/<lang>.json`). Lookups fall back key by key to the default
//! language and finally to the English strings compiled into the binary.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

const BUILTIN_EN: &str = include_str!("../../locales/en.json");

#[derive(Debug, Error)]
pub enum I18nError {
    #[error("failed to read locale directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Looks up localized strings.
pub trait Localizer: Send + Sync {
    /// Formats `key` for `lang`, or `None` when no language knows the key.
    fn try_localize(&self, lang: &str, key: &str, args: &[&str]) -> Option<String>;

    /// Like [`try_localize`](Self::try_localize) but never fails; a missing
    /// key yields a visible placeholder.
    fn localize(&self, lang: &str, key: &str, args: &[&str]) -> String {
        self.try_localize(lang, key, args)
            .unwrap_or_else(|| format!("[translation missing for key: {key}]"))
    }
}

/// [`Localizer`] backed by JSON files.
#[derive(Debug, Clone)]
pub struct JsonLocalizer {
    translations: HashMap<String, HashMap<String, String>>,
    builtin: HashMap<String, String>,
    default_language: String,
}

impl JsonLocalizer {
    /// Only the built-in English strings.
    pub fn builtin(default_language: &str) -> Self {
        Self {
            translations: HashMap::new(),
            builtin: serde_json::from_str(BUILTIN_EN).unwrap_or_default(),
            default_language: default_language.to_string(),
        }
    }

    /// Loads every `*.json` file in `dir`.
    ///
    /// A missing directory is not an error. Unreadable or malformed files are
    /// skipped with a warning.
    pub fn load(dir: &Path, default_language: &str) -> Result<Self, I18nError> {
        let mut localizer = Self::builtin(default_language);

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(dir = %dir.display(), "No locale directory, using built-in strings");
                return Ok(localizer);
            }
            Err(e) => {
                return Err(I18nError::Io {
                    path: dir.display().to_string(),
                    source: e,
                })
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(lang) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|data| {
                    serde_json::from_str::<HashMap<String, String>>(&data).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(map) => {
                    tracing::debug!(lang = %lang, keys = map.len(), "Loaded translations");
                    localizer.translations.insert(lang, map);
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping translation file");
                }
            }
        }

        Ok(localizer)
    }

    /// Adds or replaces one language in memory.
    pub fn with_language(mut self, lang: &str, entries: BTreeMap<&str, &str>) -> Self {
        self.translations.insert(
            lang.to_string(),
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    /// Sorted language codes that have a translation file.
    pub fn available_languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.translations.keys().cloned().collect();
        if !langs.iter().any(|l| l == "en") {
            langs.push("en".to_string());
        }
        langs.sort();
        langs
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    fn lookup(&self, lang: &str, key: &str) -> Option<&str> {
        [lang, self.default_language.as_str()]
            .into_iter()
            .find_map(|l| self.translations.get(l).and_then(|m| m.get(key)))
            .or_else(|| self.builtin.get(key))
            .map(String::as_str)
    }
}

impl Localizer for JsonLocalizer {
    fn try_localize(&self, lang: &str, key: &str, args: &[&str]) -> Option<String> {
        self.lookup(lang, key).map(|format| format_args_positional(format, args))
    }
}

/// Substitutes `%s`, `%d` and `%v` with `args` in order; `%%` is a literal
/// percent sign. Surplus placeholders are kept as written.
pub fn format_args_positional(format: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some(verb @ ('s' | 'd' | 'v')) => {
                chars.next();
                match args.next() {
                    Some(arg) => out.push_str(arg),
                    None => {
                        out.push('%');
                        out.push(verb);
                    }
                }
            }
            _ => out.push('%'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtin_strings_parse() {
        let l = JsonLocalizer::builtin("en");
        assert_eq!(
            l.try_localize("en", "feed_update_original_link_text", &[]),
            Some("Original".into())
        );
        assert_eq!(
            l.localize("en", "import_summary_format", &["12", "2"]),
            "Imported 12 feeds, 2 failed."
        );
    }

    #[test]
    fn test_key_wise_fallback() {
        let l = JsonLocalizer::builtin("en").with_language(
            "zh",
            BTreeMap::from([("feed_update_original_link_text", "原文")]),
        );
        assert_eq!(l.localize("zh", "feed_update_original_link_text", &[]), "原文");
        // missing in zh, falls back to English
        assert_eq!(l.localize("zh", "feed_update_telegraph_link_text", &[]), "Telegraph");
        // unknown language behaves like the default
        assert_eq!(l.localize("xx", "feed_update_original_link_text", &[]), "Original");
    }

    #[test]
    fn test_missing_key() {
        let l = JsonLocalizer::builtin("en");
        assert_eq!(l.try_localize("en", "no_such_key", &[]), None);
        assert_eq!(
            l.localize("en", "no_such_key", &[]),
            "[translation missing for key: no_such_key]"
        );
    }

    #[test]
    fn test_positional_formatting() {
        assert_eq!(
            format_args_positional("%s has %d items (100%%)", &["Feed", "3"]),
            "Feed has 3 items (100%)"
        );
        assert_eq!(format_args_positional("%s and %s", &["one"]), "one and %s");
    }

    #[test]
    fn test_load_directory() {
        let dir = std::env::temp_dir().join("feedrelay_i18n_test_load");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("de.json"), r#"{"feed_update_original_link_text": "Original (de)"}"#)
            .unwrap();
        std::fs::write(dir.join("broken.json"), "{not json").unwrap();

        let l = JsonLocalizer::load(&dir, "en").unwrap();
        assert_eq!(l.localize("de", "feed_update_original_link_text", &[]), "Original (de)");
        assert_eq!(l.available_languages(), vec!["de".to_string(), "en".to_string()]);
    }

    #[test]
    fn test_missing_directory_uses_builtin() {
        let l = JsonLocalizer::load(Path::new("/nonexistent/feedrelay/locales"), "en").unwrap();
        assert_eq!(l.localize("en", "feed_update_preview_header", &[]), "Preview:");
    }
}
