//! Locale negotiation.
//!
//! Picks the one locale the overlay renders in from an explicit override, the
//! browser's ordered language list and the experience's `available_locales`.
//! Every function here is total: malformed tags degrade to the default locale
//! instead of failing.

use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use unic_langid::LanguageIdentifier;

/// The locale that always has a complete baked dictionary.
pub const DEFAULT_LOCALE: &str = "en";

/// Primary language subtag: 2-3 letters followed by a separator or the end.
static PRIMARY_LANGUAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z]{2,3})(?:[-_]|\s*$)").expect("primary language regex is valid")
});

/// A language or language-region tag, kept exactly as the server or browser
/// spelled it (`"en"`, `"fr-CA"`, `"es-MX"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locale(String);

impl Locale {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase primary language subtag, e.g. `zh` for `zh-Hans-HK`.
    pub fn primary_language(&self) -> Option<String> {
        primary_language(&self.0)
    }

    /// Parsed identifier; `None` for tags `unic-langid` rejects.
    pub fn to_langid(&self) -> Option<LanguageIdentifier> {
        self.0.replace('_', "-").parse().ok()
    }

    /// Key used for the baked catalogs: the canonical tag when it parses,
    /// otherwise the normalized raw tag.
    pub fn catalog_key(&self) -> String {
        self.to_langid()
            .map(|id| id.to_string())
            .unwrap_or_else(|| normalize(&self.0))
    }

    /// Case- and separator-insensitive comparison.
    pub fn matches(&self, other: &str) -> bool {
        normalize(&self.0) == normalize(other)
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::new(DEFAULT_LOCALE)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locale {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for Locale {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl PartialEq<str> for Locale {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Locale {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

fn normalize(tag: &str) -> String {
    tag.trim().replace('_', "-").to_ascii_lowercase()
}

/// Extracts the lowercase primary language subtag of `tag`.
pub fn primary_language(tag: &str) -> Option<String> {
    PRIMARY_LANGUAGE
        .captures(tag)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Finds `requested` in `available`, first by exact tag, then by its primary
/// language (`fr-CA` matches an available `fr`, but `fr` does not match an
/// available `fr-CA`).
pub fn find_available_locale<'a>(requested: &str, available: &'a [Locale]) -> Option<&'a Locale> {
    if let Some(exact) = available.iter().find(|l| l.matches(requested)) {
        return Some(exact);
    }
    let language = primary_language(requested)?;
    available.iter().find(|l| l.matches(&language))
}

/// Matches one requested tag against the available locales, falling back to
/// `default_locale`. The result is always a member of `available` or the
/// default.
pub fn match_available_locales(requested: &str, available: &[Locale], default_locale: &str) -> Locale {
    find_available_locale(requested, available)
        .cloned()
        .unwrap_or_else(|| Locale::new(default_locale))
}

/// Negotiates the active locale.
///
/// 1. An explicit override wins if it matches an available locale.
/// 2. Otherwise the browser languages are walked in order; the first one that
///    matches (exact, then primary language) wins.
/// 3. Otherwise `default_locale`.
pub fn detect_user_locale(
    navigator_languages: &[String],
    override_locale: Option<&str>,
    available: &[Locale],
    default_locale: &str,
) -> Locale {
    if let Some(requested) = override_locale.filter(|l| !l.trim().is_empty()) {
        if let Some(found) = find_available_locale(requested, available) {
            debug!("Using override locale {found} (requested {requested})");
            return found.clone();
        }
        debug!("Override locale {requested} is not available, ignoring it");
    }

    for requested in navigator_languages {
        if let Some(found) = find_available_locale(requested, available) {
            debug!("Using browser locale {found} (requested {requested})");
            return found.clone();
        }
    }

    debug!("No browser locale available, using default {default_locale}");
    Locale::new(default_locale)
}
