//! The preference commit pipeline.
//!
//! Every change to the consent cookie goes through
//! [`update_consent_preferences`]. The local cookie is written first and never
//! waits for the network; the backend call afterwards is best-effort.

use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    api::{BrowserIdentity, NoticePreference, NoticesServedRequest, PreferenceApi, PrivacyPreferencesRequest},
    consent::{ConsentMethod, NoticeConsent, UserConsentPreference},
    cookie::{ConsentStore, FidesCookie},
    error::Result,
    events::{EventBus, EventTrigger, FidesEventExtraDetails, FidesEventType, dispatch_fides_event},
    experience::PrivacyExperience,
    locale::Locale,
    tcf::TcfConsent,
    ui::ServingComponent,
};

/// The shared pieces a commit touches.
pub struct CommitContext<'a> {
    pub store: &'a ConsentStore,
    pub events: &'a dyn EventBus,
    pub api: &'a dyn PreferenceApi,
    pub api_url: &'a str,
    pub disable_save_api: bool,
    pub disable_notices_served_api: bool,
}

/// One decision to commit.
#[derive(Debug, Clone)]
pub struct CommitRequest<'a> {
    pub experience: &'a PrivacyExperience,
    pub consent: NoticeConsent,
    pub tcf: Option<TcfConsent>,
    pub method: ConsentMethod,
    pub locale: Locale,
    pub served_notice_history_id: Option<String>,
    pub serving_component: Option<ServingComponent>,
    pub trigger: Option<EventTrigger>,
}

impl<'a> CommitRequest<'a> {
    pub fn new(experience: &'a PrivacyExperience, consent: NoticeConsent, method: ConsentMethod, locale: Locale) -> Self {
        Self {
            experience,
            consent,
            tcf: None,
            method,
            locale,
            served_notice_history_id: None,
            serving_component: None,
            trigger: None,
        }
    }

    fn extra_details(&self) -> FidesEventExtraDetails {
        let extra = self
            .serving_component
            .map_or_else(FidesEventExtraDetails::default, |c| FidesEventExtraDetails::serving(c.as_str()))
            .with_consent_method(self.method);
        match &self.trigger {
            Some(trigger) => extra.with_trigger(trigger.clone()),
            None => extra,
        }
    }
}

/// Builds the `privacy-preferences` body. Notices without a history id for
/// the served translation are left out.
pub fn build_preferences_request(
    cookie: &FidesCookie,
    request: &CommitRequest<'_>,
    fides_string: Option<String>,
) -> PrivacyPreferencesRequest {
    let experience = request.experience;
    let default_locale = experience.default_locale();
    let preferences = experience
        .notices()
        .filter_map(|notice| {
            let value = *request.consent.get(&notice.notice_key)?;
            let Some(history_id) = notice.history_id(&request.locale, &default_locale) else {
                debug!("Notice {} has no history id, not reporting it", notice.notice_key);
                return None;
            };
            Some(NoticePreference {
                privacy_notice_history_id: history_id,
                preference: UserConsentPreference::from_consent_value(value, notice.consent_mechanism),
            })
        })
        .collect();

    PrivacyPreferencesRequest {
        browser_identity: BrowserIdentity {
            fides_user_device_id: cookie.identity.fides_user_device_id.clone(),
        },
        preferences,
        privacy_experience_config_history_id: experience
            .best_translation(&request.locale)
            .and_then(|t| t.privacy_experience_config_history_id.clone()),
        privacy_experience_id: Some(experience.id.clone()),
        user_geography: experience.region.clone(),
        method: request.method,
        served_notice_history_id: request.served_notice_history_id.clone(),
        property_id: experience.property_id.clone(),
        fides_string,
    }
}

/// Commits a decision.
///
/// 1. `FidesUpdating` is dispatched with the current cookie.
/// 2. The decision and `update_cookie` are applied to a copy of the cookie,
///    which then replaces the stored one.
/// 3. The decision is sent to the backend unless disabled; failures are only
///    logged.
/// 4. `FidesUpdated` is dispatched with the new cookie.
///
/// # Errors
///
/// Fails, without dispatching `FidesUpdated`, when the TCF decision cannot be
/// encoded or the cookie cannot be written. The stored cookie is unchanged in
/// both cases.
pub async fn update_consent_preferences<F>(
    ctx: &CommitContext<'_>,
    request: CommitRequest<'_>,
    update_cookie: F,
) -> Result<Arc<FidesCookie>>
where
    F: FnOnce(&mut FidesCookie),
{
    let current = ctx.store.snapshot();
    let extra = request.extra_details();
    dispatch_fides_event(ctx.events, FidesEventType::FidesUpdating, &current, Some(extra.clone()));

    let now = Utc::now();
    let fides_string = request
        .tcf
        .as_ref()
        .map(|tcf| tcf.to_fides_string(request.experience, &request.locale, now))
        .transpose()
        .inspect_err(|e| error!("Unable to encode TCF consent: {e}"))?;

    let mut next = FidesCookie::clone(&current);
    next.consent.extend(request.consent.iter().map(|(k, v)| (k.clone(), *v)));
    next.fides_meta.updated_at = Some(now);
    next.fides_meta.consent_method = Some(request.method);
    next.fides_meta.geography = Some(request.experience.region.clone()).filter(|r| !r.is_empty());
    next.fides_meta.property_id = request.experience.property_id.clone();
    if let Some(fides_string) = &fides_string {
        next.fides_string = Some(fides_string.clone());
        next.tcf_version_hash = request.experience.version_hash().map(str::to_string);
    }
    update_cookie(&mut next);

    let committed = ctx
        .store
        .commit(next)
        .inspect_err(|e| error!("Consent was not saved: {e}"))?;

    if ctx.disable_save_api {
        debug!("Save API disabled, consent kept locally only");
    } else {
        let payload = build_preferences_request(&committed, &request, fides_string);
        if let Err(e) = ctx.api.save_preferences(ctx.api_url, &payload).await {
            warn!("Unable to save consent preferences to the backend: {e}");
        }
    }

    dispatch_fides_event(ctx.events, FidesEventType::FidesUpdated, &committed, Some(extra));
    Ok(committed)
}

/// Remembers which (served id, notice history id) pairs were reported.
#[derive(Debug, Default)]
pub struct ServedNoticeTracker {
    reported: Mutex<HashSet<(String, String)>>,
}

impl ServedNoticeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the ids not yet reported for `served_id` and marks them reported.
    fn claim(&self, served_id: &str, history_ids: Vec<String>) -> Vec<String> {
        let mut reported = self.reported.lock();
        history_ids
            .into_iter()
            .filter(|id| reported.insert((served_id.to_string(), id.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.reported.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reported.lock().is_empty()
    }
}

/// What was shown, for `notices-served`.
#[derive(Debug, Clone)]
pub struct ServedNotices<'a> {
    pub experience: &'a PrivacyExperience,
    pub locale: Locale,
    pub served_notice_history_id: String,
    pub serving_component: ServingComponent,
}

/// Reports the notices of one display to the backend, at most once per
/// (served id, notice history id). Returns the newly reported history ids.
pub async fn report_notices_served(
    ctx: &CommitContext<'_>,
    tracker: &ServedNoticeTracker,
    cookie: &FidesCookie,
    served: ServedNotices<'_>,
) -> Vec<String> {
    if ctx.disable_notices_served_api {
        debug!("Notices served API disabled");
        return Vec::new();
    }
    let experience = served.experience;
    let default_locale = experience.default_locale();
    let history_ids: Vec<String> = experience
        .notices()
        .filter_map(|n| n.history_id(&served.locale, &default_locale))
        .collect();
    let fresh = tracker.claim(&served.served_notice_history_id, history_ids);
    if fresh.is_empty() {
        return fresh;
    }

    let request = NoticesServedRequest {
        browser_identity: BrowserIdentity {
            fides_user_device_id: cookie.identity.fides_user_device_id.clone(),
        },
        privacy_experience_config_history_id: experience
            .best_translation(&served.locale)
            .and_then(|t| t.privacy_experience_config_history_id.clone()),
        privacy_experience_id: experience.id.clone(),
        user_geography: experience.region.clone(),
        acknowledge_mode: experience.is_acknowledge_only(),
        privacy_notice_history_ids: fresh.clone(),
        serving_component: served.serving_component.as_str().to_string(),
        served_notice_history_id: served.served_notice_history_id,
        property_id: experience.property_id.clone(),
    };
    if let Err(e) = ctx.api.patch_notices_served(ctx.api_url, &request).await {
        warn!("Unable to report served notices: {e}");
    }
    fresh
}
