//! The consent cookie and the store that owns it.
//!
//! [`ConsentStore`] is the only writer. Everybody else reads an
//! `Arc<FidesCookie>` snapshot and asks the commit pipeline for a new one.
//! A commit replaces the whole snapshot, and only after the cookie jar
//! accepted the write, so the snapshot always equals the last successfully
//! written cookie.

use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    consent::{ConsentMethod, NoticeConsent},
    error::StoreError,
    experience::{PrivacyExperience, PrivacyNotice},
    gpc::{ConsentContext, gpc_adjusted_default},
};

pub const CONSENT_COOKIE_NAME: &str = "fides_consent";
pub const CONSENT_COOKIE_VERSION: &str = "0.9.0";
pub const CONSENT_COOKIE_MAX_AGE_DAYS: u32 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieIdentity {
    pub fides_user_device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieMeta {
    pub version: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// `None` until the first commit.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_method: Option<ConsentMethod>,
    /// Region the deciding experience was served for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geography: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
}

/// Wire schema of the consent cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FidesCookie {
    #[serde(default)]
    pub consent: NoticeConsent,
    pub identity: CookieIdentity,
    pub fides_meta: CookieMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fides_string: Option<String>,
    /// Version hash of the TCF experience the fides string was saved against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcf_version_hash: Option<String>,
}

impl FidesCookie {
    /// A fresh cookie for a first-time visitor.
    pub fn new() -> Self {
        Self::new_at(Utc::now(), Uuid::new_v4())
    }

    pub fn new_at(now: DateTime<Utc>, device_id: Uuid) -> Self {
        Self {
            consent: NoticeConsent::new(),
            identity: CookieIdentity {
                fides_user_device_id: device_id.to_string(),
            },
            fides_meta: CookieMeta {
                version: CONSENT_COOKIE_VERSION.to_string(),
                created_at: Some(now),
                updated_at: None,
                consent_method: None,
                geography: None,
                property_id: None,
            },
            fides_string: None,
            tcf_version_hash: None,
        }
    }

    /// Never committed.
    pub fn is_new(&self) -> bool {
        self.fides_meta.updated_at.is_none()
    }

    /// Serializes to plain JSON, or base64 JSON.
    pub fn encode(&self, base64: bool) -> Result<String, StoreError> {
        let json = serde_json::to_string(self)?;
        Ok(if base64 { STANDARD.encode(json) } else { json })
    }

    /// Accepts either encoding.
    pub fn decode(raw: &str) -> Result<Self, StoreError> {
        let raw = raw.trim();
        if raw.starts_with('{') {
            return Ok(serde_json::from_str(raw)?);
        }
        let bytes = STANDARD
            .decode(raw)
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Whether the stored fides string was saved against this experience
    /// version.
    pub fn tcf_is_current(&self, experience: &PrivacyExperience) -> bool {
        self.fides_string.is_some() && self.tcf_version_hash.as_deref() == experience.version_hash()
    }
}

impl Default for FidesCookie {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieAttributes {
    pub domain: Option<String>,
    pub path: String,
    pub max_age_days: u32,
    pub same_site: String,
}

impl Default for CookieAttributes {
    fn default() -> Self {
        Self {
            domain: None,
            path: "/".to_string(),
            max_age_days: CONSENT_COOKIE_MAX_AGE_DAYS,
            same_site: "Lax".to_string(),
        }
    }
}

/// Host cookie storage.
pub trait CookieJar: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    fn set(&self, name: &str, value: &str, attributes: &CookieAttributes) -> Result<(), StoreError>;

    fn remove(&self, name: &str, attributes: &CookieAttributes);
}

/// In-process jar for non-browser hosts and tests.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<HashMap<String, String>>,
    reject_writes: Mutex<bool>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie(name: &str, value: &str) -> Self {
        let jar = Self::new();
        jar.cookies.lock().insert(name.to_string(), value.to_string());
        jar
    }

    /// Makes subsequent writes fail, as a full or blocked cookie store would.
    pub fn reject_writes(&self, reject: bool) {
        *self.reject_writes.lock() = reject;
    }

    pub fn raw(&self, name: &str) -> Option<String> {
        self.cookies.lock().get(name).cloned()
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        self.raw(name)
    }

    fn set(&self, name: &str, value: &str, _attributes: &CookieAttributes) -> Result<(), StoreError> {
        if *self.reject_writes.lock() {
            return Err(StoreError::Write(format!("cookie {name} was rejected by the jar")));
        }
        self.cookies.lock().insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, name: &str, _attributes: &CookieAttributes) {
        self.cookies.lock().remove(name);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub name: String,
    pub base64: bool,
    pub attributes: CookieAttributes,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            name: CONSENT_COOKIE_NAME.to_string(),
            base64: false,
            attributes: CookieAttributes::default(),
        }
    }
}

/// Owner of the consent cookie.
pub struct ConsentStore {
    jar: Arc<dyn CookieJar>,
    options: CookieOptions,
    current: ArcSwap<FidesCookie>,
}

impl ConsentStore {
    /// Reads the stored cookie; a missing or unreadable one yields a fresh
    /// cookie (not yet written).
    pub fn load(jar: Arc<dyn CookieJar>, options: CookieOptions) -> Self {
        let cookie = match jar.get(&options.name) {
            Some(raw) => FidesCookie::decode(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable consent cookie: {e}");
                FidesCookie::new()
            }),
            None => {
                debug!("No consent cookie found, starting a new one");
                FidesCookie::new()
            }
        };
        Self {
            jar,
            options,
            current: ArcSwap::from_pointee(cookie),
        }
    }

    pub fn snapshot(&self) -> Arc<FidesCookie> {
        self.current.load_full()
    }

    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    /// Writes `next` and makes it the current snapshot.
    ///
    /// # Errors
    ///
    /// When the jar rejects the write the snapshot is left unchanged.
    pub fn commit(&self, next: FidesCookie) -> Result<Arc<FidesCookie>, StoreError> {
        let encoded = next.encode(self.options.base64)?;
        self.jar.set(&self.options.name, &encoded, &self.options.attributes)?;
        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        debug!("Committed consent cookie {:?}", next.consent);
        Ok(next)
    }

    /// Deletes the stored cookie and starts over with a fresh identity.
    pub fn clear(&self) {
        self.jar.remove(&self.options.name, &self.options.attributes);
        self.current.store(Arc::new(FidesCookie::new()));
    }
}

/// Consent the visitor starts from: stored values where present, otherwise
/// GPC-adjusted experience defaults. Stored keys of notices the experience no
/// longer lists are kept.
pub fn resolve_consent(cookie: &FidesCookie, experience: &PrivacyExperience, context: &ConsentContext) -> NoticeConsent {
    let mut consent = cookie.consent.clone();
    for notice in experience.notices() {
        consent
            .entry(notice.notice_key.clone())
            .or_insert_with(|| gpc_adjusted_default(notice, context));
    }
    consent
}

/// Visible notices without a stored decision.
pub fn notices_needing_action<'a>(cookie: &FidesCookie, experience: &'a PrivacyExperience) -> Vec<&'a PrivacyNotice> {
    experience
        .notices()
        .filter(|n| !cookie.consent.contains_key(&n.notice_key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experience::fixtures::{banner_experience, tcf_experience};
    use chrono::TimeZone;

    fn fixed_cookie() -> FidesCookie {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let mut cookie = FidesCookie::new_at(now, Uuid::nil());
        cookie.consent.insert("marketing".into(), false);
        cookie.fides_meta.updated_at = Some(now);
        cookie.fides_meta.consent_method = Some(ConsentMethod::Reject);
        cookie
    }

    #[test]
    fn wire_schema_matches_expected_json() {
        let value: serde_json::Value = serde_json::from_str(&fixed_cookie().encode(false).unwrap()).unwrap();
        assert_eq!(value["consent"]["marketing"], false);
        assert_eq!(value["identity"]["fides_user_device_id"], Uuid::nil().to_string());
        assert_eq!(value["fides_meta"]["version"], CONSENT_COOKIE_VERSION);
        assert_eq!(value["fides_meta"]["consentMethod"], "reject");
        assert_eq!(value["fides_meta"]["createdAt"], "2024-01-02T03:04:05Z");
        assert!(value.get("fides_string").is_none());
    }

    #[test]
    fn decodes_both_encodings() {
        let cookie = fixed_cookie();
        assert_eq!(FidesCookie::decode(&cookie.encode(false).unwrap()).unwrap(), cookie);
        assert_eq!(FidesCookie::decode(&cookie.encode(true).unwrap()).unwrap(), cookie);
        assert!(matches!(FidesCookie::decode("%%%"), Err(StoreError::Decode(_))));
    }

    #[test]
    fn unreadable_cookie_starts_fresh() {
        let jar = Arc::new(MemoryCookieJar::with_cookie(CONSENT_COOKIE_NAME, "{not json"));
        let store = ConsentStore::load(jar, CookieOptions::default());
        assert!(store.snapshot().is_new());
        assert!(store.snapshot().consent.is_empty());
    }

    #[test]
    fn commit_round_trips_through_the_jar() {
        let jar = Arc::new(MemoryCookieJar::new());
        let store = ConsentStore::load(jar.clone(), CookieOptions::default());
        let committed = store.commit(fixed_cookie()).unwrap();
        assert_eq!(*store.snapshot(), *committed);

        let reloaded = ConsentStore::load(jar, CookieOptions::default());
        assert_eq!(*reloaded.snapshot(), fixed_cookie());
    }

    #[test]
    fn rejected_write_does_not_advance_the_snapshot() {
        let jar = Arc::new(MemoryCookieJar::new());
        let store = ConsentStore::load(jar.clone(), CookieOptions::default());
        let before = store.snapshot();
        jar.reject_writes(true);
        assert!(store.commit(fixed_cookie()).is_err());
        assert_eq!(store.snapshot(), before);
        assert!(jar.raw(CONSENT_COOKIE_NAME).is_none());
    }

    #[test]
    fn clear_removes_the_cookie_and_identity() {
        let jar = Arc::new(MemoryCookieJar::new());
        let store = ConsentStore::load(jar.clone(), CookieOptions::default());
        store.commit(fixed_cookie()).unwrap();
        store.clear();
        assert!(jar.raw(CONSENT_COOKIE_NAME).is_none());
        assert_ne!(store.snapshot().identity.fides_user_device_id, Uuid::nil().to_string());
    }

    #[test]
    fn resolve_consent_keeps_stored_decisions() {
        let exp = banner_experience();
        let mut cookie = FidesCookie::new();
        cookie.consent.insert("marketing".into(), true);
        cookie.consent.insert("retired_notice".into(), false);

        let consent = resolve_consent(&cookie, &exp, &ConsentContext::with_gpc(true));
        assert_eq!(consent["marketing"], true);
        assert_eq!(consent["analytics"], false);
        assert_eq!(consent["essential"], true);
        assert_eq!(consent["retired_notice"], false);
    }

    #[test]
    fn first_visit_defaults_follow_gpc() {
        let exp = banner_experience();
        let cookie = FidesCookie::new();
        assert_eq!(resolve_consent(&cookie, &exp, &ConsentContext::with_gpc(true))["marketing"], false);
        assert_eq!(resolve_consent(&cookie, &exp, &ConsentContext::default())["marketing"], true);
    }

    #[test]
    fn action_needed_for_undecided_notices() {
        let exp = banner_experience();
        let mut cookie = FidesCookie::new();
        assert_eq!(notices_needing_action(&cookie, &exp).len(), 3);
        for key in ["marketing", "analytics", "essential"] {
            cookie.consent.insert(key.into(), true);
        }
        assert!(notices_needing_action(&cookie, &exp).is_empty());
    }

    #[test]
    fn tcf_consent_expires_with_version_hash() {
        let exp = tcf_experience();
        let mut cookie = FidesCookie::new();
        assert!(!cookie.tcf_is_current(&exp));
        cookie.fides_string = Some("CP".into());
        cookie.tcf_version_hash = Some("9a3f2c".into());
        assert!(cookie.tcf_is_current(&exp));
        cookie.tcf_version_hash = Some("old".into());
        assert!(!cookie.tcf_is_current(&exp));
    }
}
