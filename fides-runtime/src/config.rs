//! Runtime options.
//!
//! Options come from the host's `init` config (JSON) and may be overridden
//! per page by `fides_*` key/value pairs, typically from the URL query string.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    cookie::{CONSENT_COOKIE_NAME, CookieOptions},
    error::{FidesError, Result},
    overlay::OverlayOptions,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FidesOptions {
    /// Verbose logging of the decision flow
    pub debug: bool,

    /// Base URL of the Fides API, e.g. `https://fides.example.com/api/v1`
    pub fides_api_url: String,

    /// Locale override; wins over the browser languages when available
    pub fides_locale: Option<String>,

    /// Never open the banner automatically
    pub fides_disable_banner: bool,

    /// Keep consent local; skip `privacy-preferences`
    pub fides_disable_save_api: bool,

    /// Skip `notices-served`
    pub fides_disable_notices_served_api: bool,

    /// Render into `fides-embed-container` instead of a floating overlay
    pub fides_embed: bool,

    /// Fides string to apply on load, e.g. handed over from another domain
    pub fides_string: Option<String>,

    /// Delete the consent cookie before loading
    pub fides_clear_cookie: bool,

    /// Write the cookie as base64 JSON
    pub fides_base64_cookie: bool,

    pub fides_cookie_name: String,

    /// Maximum polls for the embed container
    pub fides_embed_max_attempts: u32,
}

impl Default for FidesOptions {
    fn default() -> Self {
        Self {
            debug: false,
            fides_api_url: String::new(),
            fides_locale: None,
            fides_disable_banner: false,
            fides_disable_save_api: false,
            fides_disable_notices_served_api: false,
            fides_embed: false,
            fides_string: None,
            fides_clear_cookie: false,
            fides_base64_cookie: false,
            fides_cookie_name: CONSENT_COOKIE_NAME.to_string(),
            fides_embed_max_attempts: OverlayOptions::default().max_attempts,
        }
    }
}

impl FidesOptions {
    /// Parses the host's JSON options.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| FidesError::Config(format!("Invalid options: {e}")))
    }

    /// Applies `fides_*` overrides. Unknown keys and unparsable values are
    /// ignored.
    pub fn apply_overrides<I, K, V>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in overrides {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            let applied = match key {
                "fides_locale" => set_string(&mut self.fides_locale, value),
                "fides_string" => set_string(&mut self.fides_string, value),
                "fides_disable_banner" => set_bool(&mut self.fides_disable_banner, value),
                "fides_disable_save_api" => set_bool(&mut self.fides_disable_save_api, value),
                "fides_disable_notices_served_api" => set_bool(&mut self.fides_disable_notices_served_api, value),
                "fides_embed" => set_bool(&mut self.fides_embed, value),
                "fides_clear_cookie" => set_bool(&mut self.fides_clear_cookie, value),
                "fides_base64_cookie" => set_bool(&mut self.fides_base64_cookie, value),
                "debug" => set_bool(&mut self.debug, value),
                _ => false,
            };
            if applied {
                debug!("Option override {key}={value}");
            }
        }
    }

    /// Applies overrides from a URL query string (`?a=b&c=d`).
    pub fn apply_query(&mut self, query: &str) {
        self.apply_overrides(parse_query(query));
    }

    pub fn cookie_options(&self) -> CookieOptions {
        CookieOptions {
            name: self.fides_cookie_name.clone(),
            base64: self.fides_base64_cookie,
            ..CookieOptions::default()
        }
    }

    pub fn overlay_options(&self) -> OverlayOptions {
        OverlayOptions {
            embed: self.fides_embed,
            max_attempts: self.fides_embed_max_attempts,
            ..OverlayOptions::default()
        }
    }
}

fn set_string(slot: &mut Option<String>, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    *slot = Some(value.to_string());
    true
}

fn set_bool(slot: &mut bool, value: &str) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "" => *slot = true,
        "false" | "0" => *slot = false,
        _ => return false,
    }
    true
}

/// Splits a query string into decoded key/value pairs.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .into_owned()
        .collect()
}
