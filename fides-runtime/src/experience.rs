//! Server-supplied privacy experience.
//!
//! Read-only from the runtime's point of view: one snapshot per page load. A
//! new snapshot is never patched into the old one; the controller negotiates
//! everything again.

use serde::{Deserialize, Serialize};

use crate::{
    consent::{ConsentMechanism, UserConsentPreference},
    i18n::Messages,
    locale::{DEFAULT_LOCALE, Locale, find_available_locale},
    tcf::Gvl,
};

/// Which consent UI an experience asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    BannerAndModal,
    Modal,
    TcfOverlay,
    PrivacyCenter,
    Headless,
}

impl ComponentType {
    /// Whether the overlay controller mounts anything for this component.
    pub fn is_renderable(self) -> bool {
        matches!(self, Self::BannerAndModal | Self::Modal | Self::TcfOverlay)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BannerAndModal => "banner_and_modal",
            Self::Modal => "modal",
            Self::TcfOverlay => "tcf_overlay",
            Self::PrivacyCenter => "privacy_center",
            Self::Headless => "headless",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceConfigTranslation {
    pub language: Locale,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub banner_title: Option<String>,
    #[serde(default)]
    pub banner_description: Option<String>,
    #[serde(default)]
    pub accept_button_label: Option<String>,
    #[serde(default)]
    pub reject_button_label: Option<String>,
    #[serde(default)]
    pub save_button_label: Option<String>,
    #[serde(default)]
    pub acknowledge_button_label: Option<String>,
    #[serde(default)]
    pub privacy_preferences_link_label: Option<String>,
    #[serde(default)]
    pub privacy_policy_link_label: Option<String>,
    #[serde(default)]
    pub privacy_policy_url: Option<String>,
    #[serde(default)]
    pub modal_link_label: Option<String>,
    #[serde(default)]
    pub privacy_experience_config_history_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceConfig {
    pub id: String,
    pub component: ComponentType,
    /// Explicit banner switch; when absent the component decides.
    #[serde(default)]
    pub show_banner: Option<bool>,
    #[serde(default)]
    pub dismissable: bool,
    #[serde(default)]
    pub allow_language_selection: bool,
    #[serde(default)]
    pub translations: Vec<ExperienceConfigTranslation>,
}

impl ExperienceConfig {
    pub fn shows_banner(&self) -> bool {
        let component_has_banner = matches!(
            self.component,
            ComponentType::BannerAndModal | ComponentType::TcfOverlay
        );
        component_has_banner && self.show_banner.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyNoticeTranslation {
    pub language: Locale,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub privacy_notice_history_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyNotice {
    pub id: String,
    pub notice_key: String,
    #[serde(default)]
    pub name: String,
    pub consent_mechanism: ConsentMechanism,
    #[serde(default)]
    pub has_gpc_flag: bool,
    #[serde(default)]
    pub default_preference: Option<UserConsentPreference>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub translations: Vec<PrivacyNoticeTranslation>,
}

impl PrivacyNotice {
    pub fn default_preference(&self) -> UserConsentPreference {
        self.default_preference
            .unwrap_or_else(|| self.consent_mechanism.default_preference())
    }

    pub fn is_notice_only(&self) -> bool {
        self.consent_mechanism == ConsentMechanism::NoticeOnly
    }

    /// GPC only governs notices the visitor could actually opt out of.
    pub fn is_gpc_applicable(&self) -> bool {
        self.has_gpc_flag && !self.is_notice_only()
    }

    /// Translation for `locale`, else the default locale's, else the first.
    pub fn best_translation(&self, locale: &Locale, default_locale: &Locale) -> Option<&PrivacyNoticeTranslation> {
        select_best_notice_translation(&self.translations, locale, default_locale)
    }

    /// History id of the translation served in `locale`, used to correlate
    /// the served record with the decision.
    pub fn history_id(&self, locale: &Locale, default_locale: &Locale) -> Option<String> {
        self.best_translation(locale, default_locale)
            .and_then(|t| t.privacy_notice_history_id.clone())
    }
}

/// A TCF purpose or special feature as listed by the experience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcfPurposeRecord {
    pub id: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A TCF vendor as listed by the experience. GVL vendors use ids of the form
/// `gvl.<id>`, Google AC vendors `gacp.<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcfVendorRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub purpose_consents: Vec<u16>,
    #[serde(default)]
    pub purpose_legitimate_interests: Vec<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceMeta {
    #[serde(default)]
    pub version_hash: Option<String>,
    #[serde(default)]
    pub accept_all_fides_string: Option<String>,
    #[serde(default)]
    pub reject_all_fides_string: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyExperience {
    pub id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default)]
    pub available_locales: Vec<Locale>,
    #[serde(default)]
    pub experience_config: Option<ExperienceConfig>,
    #[serde(default)]
    pub privacy_notices: Vec<PrivacyNotice>,
    /// Inline English vendor list; the fallback when translations fail.
    #[serde(default)]
    pub gvl: Option<Gvl>,
    #[serde(default)]
    pub tcf_purpose_consents: Vec<TcfPurposeRecord>,
    #[serde(default)]
    pub tcf_purpose_legitimate_interests: Vec<TcfPurposeRecord>,
    #[serde(default)]
    pub tcf_special_features: Vec<TcfPurposeRecord>,
    #[serde(default)]
    pub tcf_vendor_consents: Vec<TcfVendorRecord>,
    #[serde(default)]
    pub tcf_vendor_legitimate_interests: Vec<TcfVendorRecord>,
    #[serde(default)]
    pub meta: Option<ExperienceMeta>,
}

impl PrivacyExperience {
    pub fn component(&self) -> Option<ComponentType> {
        self.experience_config.as_ref().map(|c| c.component)
    }

    pub fn is_tcf(&self) -> bool {
        self.component() == Some(ComponentType::TcfOverlay)
    }

    /// Notices the visitor can see, in server order.
    pub fn notices(&self) -> impl Iterator<Item = &PrivacyNotice> {
        self.privacy_notices.iter().filter(|n| !n.disabled)
    }

    pub fn notice(&self, notice_key: &str) -> Option<&PrivacyNotice> {
        self.notices().find(|n| n.notice_key == notice_key)
    }

    /// Every visible notice is notice-only.
    pub fn is_acknowledge_only(&self) -> bool {
        let mut notices = self.notices().peekable();
        notices.peek().is_some() && notices.all(PrivacyNotice::is_notice_only)
    }

    /// The locale of the default translation, else the first, else `en`.
    pub fn default_locale(&self) -> Locale {
        let translations = self
            .experience_config
            .as_ref()
            .map(|c| c.translations.as_slice())
            .unwrap_or_default();
        translations
            .iter()
            .find(|t| t.is_default)
            .or_else(|| translations.first())
            .map(|t| t.language.clone())
            .unwrap_or_else(|| Locale::new(DEFAULT_LOCALE))
    }

    /// Declared locales; when the server omits them, the translated ones.
    pub fn available_locales(&self) -> Vec<Locale> {
        if !self.available_locales.is_empty() {
            return self.available_locales.clone();
        }
        let translated: Vec<Locale> = self
            .experience_config
            .iter()
            .flat_map(|c| c.translations.iter().map(|t| t.language.clone()))
            .collect();
        if translated.is_empty() {
            vec![Locale::new(DEFAULT_LOCALE)]
        } else {
            translated
        }
    }

    /// Translation for `locale`, else the default one, else the first.
    pub fn best_translation(&self, locale: &Locale) -> Option<&ExperienceConfigTranslation> {
        let config = self.experience_config.as_ref()?;
        select_best_experience_translation(&config.translations, locale)
    }

    pub fn version_hash(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.version_hash.as_deref())
    }

    /// Runtime dictionaries for every translated locale, keyed `exp.*`.
    pub fn messages(&self) -> Vec<(Locale, Messages)> {
        let Some(config) = &self.experience_config else {
            return Vec::new();
        };
        config
            .translations
            .iter()
            .map(|translation| {
                let mut messages = Messages::new();
                insert_experience_copy(&mut messages, translation);
                for notice in self.notices() {
                    if let Some(nt) = notice
                        .translations
                        .iter()
                        .find(|t| t.language.matches(translation.language.as_str()))
                    {
                        messages.insert(format!("exp.notices.{}.title", notice.notice_key), nt.title.clone());
                        messages.insert(
                            format!("exp.notices.{}.description", notice.notice_key),
                            nt.description.clone(),
                        );
                    }
                }
                (translation.language.clone(), messages)
            })
            .collect()
    }
}

/// Picks the experience copy for `locale`: an exact or primary-language
/// match, else the `is_default` translation, else the first.
pub fn select_best_experience_translation<'a>(
    translations: &'a [ExperienceConfigTranslation],
    locale: &Locale,
) -> Option<&'a ExperienceConfigTranslation> {
    let languages: Vec<Locale> = translations.iter().map(|t| t.language.clone()).collect();
    find_available_locale(locale.as_str(), &languages)
        .and_then(|found| translations.iter().find(|t| &t.language == found))
        .or_else(|| translations.iter().find(|t| t.is_default))
        .or_else(|| translations.first())
}

/// Notice copy for `locale`, else for the experience default locale, else the
/// first translation.
pub fn select_best_notice_translation<'a>(
    translations: &'a [PrivacyNoticeTranslation],
    locale: &Locale,
    default_locale: &Locale,
) -> Option<&'a PrivacyNoticeTranslation> {
    let languages: Vec<Locale> = translations.iter().map(|t| t.language.clone()).collect();
    let pick = |wanted: &Locale| {
        find_available_locale(wanted.as_str(), &languages)
            .and_then(|found| translations.iter().find(|t| &t.language == found))
    };
    pick(locale)
        .or_else(|| pick(default_locale))
        .or_else(|| translations.first())
}

fn insert_experience_copy(messages: &mut Messages, t: &ExperienceConfigTranslation) {
    messages.insert("exp.title".into(), t.title.clone());
    messages.insert("exp.description".into(), t.description.clone());
    messages.insert(
        "exp.banner_title".into(),
        t.banner_title.clone().unwrap_or_else(|| t.title.clone()),
    );
    messages.insert(
        "exp.banner_description".into(),
        t.banner_description.clone().unwrap_or_else(|| t.description.clone()),
    );
    let optional = [
        ("exp.accept_button_label", &t.accept_button_label),
        ("exp.reject_button_label", &t.reject_button_label),
        ("exp.save_button_label", &t.save_button_label),
        ("exp.acknowledge_button_label", &t.acknowledge_button_label),
        ("exp.privacy_preferences_link_label", &t.privacy_preferences_link_label),
        ("exp.privacy_policy_link_label", &t.privacy_policy_link_label),
        ("exp.privacy_policy_url", &t.privacy_policy_url),
        ("exp.modal_link_label", &t.modal_link_label),
    ];
    for (id, value) in optional {
        if let Some(value) = value {
            messages.insert(id.into(), value.clone());
        }
    }
}


#[cfg(test)]
mod tests {
    use super::{fixtures::*, *};

    #[test]
    fn defaults_follow_notice_mechanism() {
        let exp = banner_experience();
        let marketing = exp.notice("marketing").unwrap();
        assert_eq!(marketing.default_preference(), UserConsentPreference::OptIn);
        assert!(marketing.is_gpc_applicable());
        assert!(!exp.notice("essential").unwrap().is_gpc_applicable());
    }

    #[test]
    fn default_locale_comes_from_default_translation() {
        assert_eq!(banner_experience().default_locale(), "en");
    }

    #[test]
    fn best_translation_matches_language_then_default() {
        let exp = banner_experience();
        assert_eq!(exp.best_translation(&Locale::new("fr-CA")).unwrap().language, "fr");
        assert_eq!(exp.best_translation(&Locale::new("de")).unwrap().language, "en");

        let analytics = exp.notice("analytics").unwrap();
        let en = Locale::new("en");
        assert_eq!(
            analytics.history_id(&Locale::new("fr"), &en).as_deref(),
            Some("pri_hist_analytics_en")
        );
    }

    #[test]
    fn messages_fall_back_to_title_for_banner_copy() {
        let exp = banner_experience();
        let messages = exp.messages();
        let (_, fr) = messages.iter().find(|(l, _)| l == &"fr").unwrap();
        assert_eq!(fr["exp.banner_title"], "Gérer votre consentement");
        assert_eq!(fr["exp.notices.marketing.title"], "Marketing FR");
        assert!(!fr.contains_key("exp.notices.analytics.title"));
    }

    #[test]
    fn component_renderability() {
        assert!(ComponentType::TcfOverlay.is_renderable());
        assert!(!ComponentType::Headless.is_renderable());
        assert!(!ComponentType::PrivacyCenter.is_renderable());
    }

    #[test]
    fn acknowledge_only_needs_every_notice_to_be_notice_only() {
        let mut exp = banner_experience();
        assert!(!exp.is_acknowledge_only());
        exp.privacy_notices.retain(|n| n.notice_key == "essential");
        assert!(exp.is_acknowledge_only());
        exp.privacy_notices.clear();
        assert!(!exp.is_acknowledge_only());
    }
}
