#![allow(dead_code)]

use std::sync::Arc;

use fides_runtime::{
    Fides, FidesOptions, FidesServices,
    api::MemoryFidesApi,
    cookie::MemoryCookieJar,
    events::RecordingEventBus,
    experience::PrivacyExperience,
    gpc::ConsentContext,
    overlay::{MemoryDocument, OVERLAY_ID, ReadyState},
    render::RenderNode,
};
use serde_json::json;

pub const API_URL: &str = "https://fides.test/api/v1";

/// The host side of one page: every port the runtime talks to, in memory.
pub struct Page {
    pub jar: Arc<MemoryCookieJar>,
    pub events: Arc<RecordingEventBus>,
    pub api: Arc<MemoryFidesApi>,
    pub document: Arc<MemoryDocument>,
}

impl Page {
    pub fn new() -> Self {
        Self::with_api(MemoryFidesApi::new())
    }

    pub fn with_api(api: MemoryFidesApi) -> Self {
        Self {
            jar: Arc::new(MemoryCookieJar::new()),
            events: Arc::new(RecordingEventBus::new()),
            api: Arc::new(api),
            document: Arc::new(MemoryDocument::new(ReadyState::Complete)),
        }
    }

    /// The same cookie jar and backend after a navigation.
    pub fn reload(&self) -> Self {
        Self {
            jar: Arc::clone(&self.jar),
            events: Arc::new(RecordingEventBus::new()),
            api: Arc::clone(&self.api),
            document: Arc::new(MemoryDocument::new(ReadyState::Complete)),
        }
    }

    pub fn services(&self) -> FidesServices {
        FidesServices {
            jar: self.jar.clone(),
            events: self.events.clone(),
            preferences: self.api.clone(),
            gvl: self.api.clone(),
            document: self.document.clone(),
        }
    }

    pub fn fides(&self, languages: &[&str]) -> Fides {
        self.fides_with(options(), languages, ConsentContext::default())
    }

    pub fn fides_with(&self, options: FidesOptions, languages: &[&str], context: ConsentContext) -> Fides {
        Fides::new(options, self.services())
            .with_navigator_languages(languages.iter().copied())
            .with_consent_context(context)
    }

    pub fn overlay(&self) -> RenderNode {
        self.document.tree(OVERLAY_ID).expect("overlay is rendered")
    }
}

pub fn options() -> FidesOptions {
    FidesOptions {
        fides_api_url: API_URL.to_string(),
        ..FidesOptions::default()
    }
}

/// First node whose class list contains `class`.
pub fn find_class<'a>(node: &'a RenderNode, class: &str) -> Option<&'a RenderNode> {
    if node
        .attr("class")
        .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    {
        return Some(node);
    }
    node.children.iter().find_map(|child| find_class(child, class))
}

pub fn text_of(node: &RenderNode, id: &str) -> String {
    node.find_by_id(id)
        .and_then(|n| n.text.clone())
        .unwrap_or_default()
}

/// A US banner with an opt-out notice covered by GPC, an opt-in notice and a
/// notice-only notice.
pub fn banner_experience() -> PrivacyExperience {
    serde_json::from_value(json!({
        "id": "pri_exp_us",
        "region": "us_ca",
        "property_id": "FDS-A1B2C3",
        "available_locales": ["en", "fr", "es-MX"],
        "experience_config": {
            "id": "pri_cfg_us",
            "component": "banner_and_modal",
            "dismissable": true,
            "allow_language_selection": true,
            "translations": [
                {
                    "language": "en",
                    "is_default": true,
                    "title": "Manage your consent preferences",
                    "description": "We use cookies and similar methods.",
                    "banner_title": "Your privacy",
                    "accept_button_label": "Opt in to all",
                    "reject_button_label": "Opt out of all",
                    "save_button_label": "Save",
                    "privacy_preferences_link_label": "Manage preferences",
                    "privacy_experience_config_history_id": "pri_cfg_hist_us_en"
                },
                {
                    "language": "fr",
                    "title": "Gérer vos préférences",
                    "description": "Nous utilisons des cookies.",
                    "banner_title": "Votre vie privée",
                    "accept_button_label": "Tout accepter",
                    "reject_button_label": "Tout refuser",
                    "save_button_label": "Enregistrer",
                    "privacy_experience_config_history_id": "pri_cfg_hist_us_fr"
                },
                {
                    "language": "es-MX",
                    "title": "Administre su consentimiento",
                    "description": "Usamos cookies.",
                    "privacy_experience_config_history_id": "pri_cfg_hist_us_es_mx"
                }
            ]
        },
        "privacy_notices": [
            {
                "id": "pri_notice_advertising",
                "notice_key": "advertising",
                "name": "Advertising",
                "consent_mechanism": "opt_out",
                "has_gpc_flag": true,
                "translations": [
                    { "language": "en", "title": "Advertising", "description": "Personalized ads", "privacy_notice_history_id": "pri_hist_ads_en" },
                    { "language": "fr", "title": "Publicité", "description": "Annonces", "privacy_notice_history_id": "pri_hist_ads_fr" }
                ]
            },
            {
                "id": "pri_notice_analytics",
                "notice_key": "analytics",
                "name": "Analytics",
                "consent_mechanism": "opt_in",
                "translations": [
                    { "language": "en", "title": "Analytics", "description": "Usage statistics", "privacy_notice_history_id": "pri_hist_analytics_en" }
                ]
            },
            {
                "id": "pri_notice_essential",
                "notice_key": "essential",
                "name": "Essential",
                "consent_mechanism": "notice_only",
                "has_gpc_flag": true,
                "translations": [
                    { "language": "en", "title": "Essential", "description": "Required to run the site", "privacy_notice_history_id": "pri_hist_essential_en" }
                ]
            }
        ]
    }))
    .expect("banner experience fixture is valid")
}

/// An EEA TCF overlay with an inline English vendor list.
pub fn tcf_experience() -> PrivacyExperience {
    serde_json::from_value(json!({
        "id": "pri_exp_eea",
        "region": "eea",
        "available_locales": ["en", "fr", "de"],
        "experience_config": {
            "id": "pri_cfg_eea",
            "component": "tcf_overlay",
            "allow_language_selection": true,
            "translations": [
                { "language": "en", "is_default": true, "title": "Vendors and purposes", "description": "We and our partners process data." },
                { "language": "fr", "title": "Partenaires et finalités", "description": "Nos partenaires et nous traitons des données." },
                { "language": "de", "title": "Anbieter und Zwecke", "description": "Wir und unsere Partner verarbeiten Daten." }
            ]
        },
        "gvl": {
            "vendorListVersion": 126,
            "tcfPolicyVersion": 4,
            "purposes": {
                "1": { "id": 1, "name": "Store and/or access information on a device", "description": "Cookies, device identifiers." },
                "2": { "id": 2, "name": "Use limited data to select advertising", "description": "Basic ads." }
            },
            "specialFeatures": {
                "1": { "id": 1, "name": "Use precise geolocation data", "description": "Location." }
            },
            "vendors": {
                "2": { "id": 2, "name": "Captify", "purposes": [1, 2] },
                "8": { "id": 8, "name": "Emerse", "purposes": [1], "legIntPurposes": [2] }
            }
        },
        "tcf_purpose_consents": [
            { "id": 1, "name": "Store and/or access information on a device" },
            { "id": 2, "name": "Use limited data to select advertising" }
        ],
        "tcf_purpose_legitimate_interests": [
            { "id": 2, "name": "Use limited data to select advertising" }
        ],
        "tcf_special_features": [
            { "id": 1, "name": "Use precise geolocation data" }
        ],
        "tcf_vendor_consents": [
            { "id": "gvl.2", "name": "Captify", "purpose_consents": [1, 2] },
            { "id": "gvl.8", "name": "Emerse", "purpose_consents": [1] },
            { "id": "gacp.42", "name": "Ad Tech Provider 42" }
        ],
        "tcf_vendor_legitimate_interests": [
            { "id": "gvl.8", "name": "Emerse", "purpose_legitimate_interests": [2] }
        ],
        "meta": { "version_hash": "b1c0d3" }
    }))
    .expect("TCF experience fixture is valid")
}
