//! Consent vocabulary shared by the cookie, the UI and the API payloads.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Per-notice consent as stored in the cookie: `notice_key -> consented`.
///
/// A notice missing from the map is "unset".
pub type NoticeConsent = BTreeMap<String, bool>;

/// How a privacy notice collects consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentMechanism {
    /// Off until the visitor opts in.
    OptIn,
    /// On until the visitor opts out.
    OptOut,
    /// Informational; the visitor can only acknowledge it.
    NoticeOnly,
}

impl ConsentMechanism {
    /// The decision a visitor starts with before any action.
    pub fn default_preference(self) -> UserConsentPreference {
        match self {
            Self::OptIn => UserConsentPreference::OptOut,
            Self::OptOut => UserConsentPreference::OptIn,
            Self::NoticeOnly => UserConsentPreference::Acknowledge,
        }
    }
}

/// An explicit decision for one notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserConsentPreference {
    OptIn,
    OptOut,
    Acknowledge,
}

impl UserConsentPreference {
    /// The boolean written to the cookie.
    pub fn as_consent_value(self) -> bool {
        !matches!(self, Self::OptOut)
    }

    /// Reads a cookie boolean back for a notice of the given mechanism.
    pub fn from_consent_value(value: bool, mechanism: ConsentMechanism) -> Self {
        match (mechanism, value) {
            (ConsentMechanism::NoticeOnly, _) => Self::Acknowledge,
            (_, true) => Self::OptIn,
            (_, false) => Self::OptOut,
        }
    }
}

impl fmt::Display for UserConsentPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OptIn => "opt_in",
            Self::OptOut => "opt_out",
            Self::Acknowledge => "acknowledge",
        })
    }
}

/// What produced a committed decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentMethod {
    Button,
    Accept,
    Reject,
    Save,
    Dismiss,
    Acknowledge,
    Gpc,
    /// Programmatic update through the host API.
    Script,
}

impl fmt::Display for ConsentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Button => "button",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Save => "save",
            Self::Dismiss => "dismiss",
            Self::Acknowledge => "acknowledge",
            Self::Gpc => "gpc",
            Self::Script => "script",
        })
    }
}
