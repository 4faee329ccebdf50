//! Backend ports and their wire payloads.
//!
//! Every call here is best-effort from the runtime's point of view: callers
//! log failures and carry on with local state.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    consent::{ConsentMethod, UserConsentPreference},
    error::ApiError,
    locale::Locale,
    tcf::{GvlTranslation, GvlTranslationsByLocale},
};

pub const GVL_TRANSLATIONS_PATH: &str = "/gvl/translations";
pub const PRIVACY_PREFERENCES_PATH: &str = "/privacy-preferences";
pub const NOTICES_SERVED_PATH: &str = "/notices-served";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserIdentity {
    pub fides_user_device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticePreference {
    pub privacy_notice_history_id: String,
    pub preference: UserConsentPreference,
}

/// Body of `POST /privacy-preferences`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyPreferencesRequest {
    pub browser_identity: BrowserIdentity,
    pub preferences: Vec<NoticePreference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_experience_config_history_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_experience_id: Option<String>,
    pub user_geography: String,
    pub method: ConsentMethod,
    /// Correlates the decision with the notices-served record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_notice_history_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fides_string: Option<String>,
}

/// Body of `PATCH /notices-served`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticesServedRequest {
    pub browser_identity: BrowserIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_experience_config_history_id: Option<String>,
    pub privacy_experience_id: String,
    pub user_geography: String,
    pub acknowledge_mode: bool,
    pub privacy_notice_history_ids: Vec<String>,
    pub serving_component: String,
    pub served_notice_history_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
}

/// Source of GVL translations.
#[async_trait]
pub trait GvlTranslationSource: Send + Sync {
    async fn fetch_gvl_translations(
        &self,
        api_url: &str,
        locales: &[Locale],
    ) -> Result<GvlTranslationsByLocale, ApiError>;
}

/// Preference persistence.
#[async_trait]
pub trait PreferenceApi: Send + Sync {
    async fn save_preferences(&self, api_url: &str, request: &PrivacyPreferencesRequest) -> Result<(), ApiError>;

    async fn patch_notices_served(&self, api_url: &str, request: &NoticesServedRequest) -> Result<(), ApiError>;
}

/// In-process backend: serves canned translations and records what it was
/// sent. Each endpoint can be switched to fail.
#[derive(Debug, Default)]
pub struct MemoryFidesApi {
    translations: Mutex<BTreeMap<Locale, GvlTranslation>>,
    failing: Mutex<BTreeSet<&'static str>>,
    preferences: Mutex<Vec<PrivacyPreferencesRequest>>,
    notices_served: Mutex<Vec<NoticesServedRequest>>,
    translation_requests: Mutex<Vec<Vec<Locale>>>,
}

impl MemoryFidesApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_translation(self, locale: impl Into<Locale>, translation: GvlTranslation) -> Self {
        self.translations.lock().insert(locale.into(), translation);
        self
    }

    /// Makes the endpoint at `path` fail until switched back.
    pub fn fail(&self, path: &'static str, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(path);
        } else {
            set.remove(path);
        }
    }

    pub fn preferences(&self) -> Vec<PrivacyPreferencesRequest> {
        self.preferences.lock().clone()
    }

    pub fn notices_served(&self) -> Vec<NoticesServedRequest> {
        self.notices_served.lock().clone()
    }

    pub fn translation_requests(&self) -> Vec<Vec<Locale>> {
        self.translation_requests.lock().clone()
    }

    fn check(&self, api_url: &str, path: &'static str) -> Result<(), ApiError> {
        if self.failing.lock().contains(path) {
            return Err(ApiError::Request {
                url: format!("{api_url}{path}"),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl GvlTranslationSource for MemoryFidesApi {
    async fn fetch_gvl_translations(
        &self,
        api_url: &str,
        locales: &[Locale],
    ) -> Result<GvlTranslationsByLocale, ApiError> {
        self.translation_requests.lock().push(locales.to_vec());
        self.check(api_url, GVL_TRANSLATIONS_PATH)?;
        let translations = self.translations.lock();
        Ok(locales
            .iter()
            .filter_map(|l| translations.get(l).map(|t| (l.clone(), t.clone())))
            .collect())
    }
}

#[async_trait]
impl PreferenceApi for MemoryFidesApi {
    async fn save_preferences(&self, api_url: &str, request: &PrivacyPreferencesRequest) -> Result<(), ApiError> {
        self.check(api_url, PRIVACY_PREFERENCES_PATH)?;
        self.preferences.lock().push(request.clone());
        Ok(())
    }

    async fn patch_notices_served(&self, api_url: &str, request: &NoticesServedRequest) -> Result<(), ApiError> {
        self.check(api_url, NOTICES_SERVED_PATH)?;
        self.notices_served.lock().push(request.clone());
        Ok(())
    }
}

#[cfg(feature = "http")]
pub use http::HttpFidesApi;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::Serialize;

    use super::{
        GVL_TRANSLATIONS_PATH, GvlTranslationSource, NOTICES_SERVED_PATH, NoticesServedRequest,
        PRIVACY_PREFERENCES_PATH, PreferenceApi, PrivacyPreferencesRequest,
    };
    use crate::{error::ApiError, locale::Locale, tcf::GvlTranslationsByLocale};

    /// `reqwest` transport for the Fides API.
    #[derive(Debug, Clone)]
    pub struct HttpFidesApi {
        client: reqwest::Client,
    }

    impl HttpFidesApi {
        /// # Errors
        ///
        /// Fails if the TLS backend cannot be initialized.
        pub fn new() -> Result<Self, ApiError> {
            let client = reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .timeout(Duration::from_secs(15))
                .build()
                .map_err(|e| ApiError::Request {
                    url: String::new(),
                    message: e.to_string(),
                })?;
            Ok(Self { client })
        }

        async fn send_json<B: Serialize + Sync>(
            &self,
            method: reqwest::Method,
            url: String,
            body: &B,
        ) -> Result<(), ApiError> {
            let response = self
                .client
                .request(method, &url)
                .json(body)
                .send()
                .await
                .map_err(|e| ApiError::Request {
                    url: url.clone(),
                    message: e.to_string(),
                })?;
            check_status(&url, response.status())
        }
    }

    fn check_status(url: &str, status: reqwest::StatusCode) -> Result<(), ApiError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(ApiError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }

    #[async_trait]
    impl GvlTranslationSource for HttpFidesApi {
        async fn fetch_gvl_translations(
            &self,
            api_url: &str,
            locales: &[Locale],
        ) -> Result<GvlTranslationsByLocale, ApiError> {
            let url = format!("{api_url}{GVL_TRANSLATIONS_PATH}");
            let query: Vec<(&str, &str)> = locales.iter().map(|l| ("language", l.as_str())).collect();
            let response = self
                .client
                .get(&url)
                .query(&query)
                .send()
                .await
                .map_err(|e| ApiError::Request {
                    url: url.clone(),
                    message: e.to_string(),
                })?;
            check_status(&url, response.status())?;
            let body = response.bytes().await.map_err(|e| ApiError::Request {
                url: url.clone(),
                message: e.to_string(),
            })?;
            Ok(serde_json::from_slice(&body)?)
        }
    }

    #[async_trait]
    impl PreferenceApi for HttpFidesApi {
        async fn save_preferences(&self, api_url: &str, request: &PrivacyPreferencesRequest) -> Result<(), ApiError> {
            self.send_json(reqwest::Method::POST, format!("{api_url}{PRIVACY_PREFERENCES_PATH}"), request)
                .await
        }

        async fn patch_notices_served(&self, api_url: &str, request: &NoticesServedRequest) -> Result<(), ApiError> {
            self.send_json(reqwest::Method::PATCH, format!("{api_url}{NOTICES_SERVED_PATH}"), request)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preferences_request() -> PrivacyPreferencesRequest {
        PrivacyPreferencesRequest {
            browser_identity: BrowserIdentity {
                fides_user_device_id: "device".into(),
            },
            preferences: vec![NoticePreference {
                privacy_notice_history_id: "pri_hist_marketing_en".into(),
                preference: UserConsentPreference::OptOut,
            }],
            privacy_experience_config_history_id: Some("pri_cfg_hist_en".into()),
            privacy_experience_id: Some("pri_exp_1".into()),
            user_geography: "us_ca".into(),
            method: ConsentMethod::Reject,
            served_notice_history_id: None,
            property_id: None,
            fides_string: None,
        }
    }

    #[test]
    fn preferences_payload_shape() {
        let value = serde_json::to_value(preferences_request()).unwrap();
        assert_eq!(value["preferences"][0]["preference"], "opt_out");
        assert_eq!(value["method"], "reject");
        assert!(value.get("served_notice_history_id").is_none());
    }

    #[tokio::test]
    async fn memory_api_records_and_fails_on_demand() {
        let api = MemoryFidesApi::new();
        api.save_preferences("https://fides.test/api/v1", &preferences_request())
            .await
            .unwrap();
        assert_eq!(api.preferences().len(), 1);

        api.fail(PRIVACY_PREFERENCES_PATH, true);
        let err = api
            .save_preferences("https://fides.test/api/v1", &preferences_request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/privacy-preferences"));
        assert_eq!(api.preferences().len(), 1);
    }

    #[tokio::test]
    async fn memory_api_serves_requested_translations_only() {
        let api = MemoryFidesApi::new()
            .with_translation("fr", GvlTranslation::default())
            .with_translation("de", GvlTranslation::default());
        let got = api
            .fetch_gvl_translations("", &[Locale::new("fr")])
            .await
            .unwrap();
        assert_eq!(got.keys().collect::<Vec<_>>(), vec![&Locale::new("fr")]);
        assert_eq!(api.translation_requests(), vec![vec![Locale::new("fr")]]);
    }
}
