//! GVL translation loading for TCF experiences.
//!
//! Only a TCF experience pulls vendor-list copy into the catalog. English
//! always comes from the GVL embedded in the experience; other languages are
//! fetched. When the fetch fails, the runtime narrows to English instead of
//! showing untranslated vendor text.

use tracing::{debug, info, warn};

use crate::{
    api::GvlTranslationSource,
    experience::PrivacyExperience,
    i18n::I18n,
    locale::{DEFAULT_LOCALE, Locale, detect_user_locale},
    tcf::GvlTranslationsByLocale,
};

/// Fetches translations for `locales`.
///
/// Returns `None` when the request fails or comes back empty; the failure is
/// logged and never propagated.
pub async fn fetch_gvl_translations(
    source: &dyn GvlTranslationSource,
    api_url: &str,
    locales: &[Locale],
    debug: bool,
) -> Option<GvlTranslationsByLocale> {
    match source.fetch_gvl_translations(api_url, locales).await {
        Ok(translations) if translations.is_empty() => {
            warn!("GVL translations response for {locales:?} was empty");
            None
        }
        Ok(translations) => {
            if debug {
                info!("Fetched GVL translations for {:?}", translations.keys().collect::<Vec<_>>());
            }
            Some(translations)
        }
        Err(e) => {
            warn!("Unable to fetch GVL translations: {e}");
            None
        }
    }
}

/// Result of [`GvlLoader::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GvlLoadOutcome {
    /// Locales the UI may offer from now on.
    pub available_locales: Vec<Locale>,
    /// The locale active after loading.
    pub locale: Locale,
    /// Whether translations were unavailable and the runtime fell back to
    /// English.
    pub fell_back: bool,
}

pub struct GvlLoader<'a> {
    pub source: &'a dyn GvlTranslationSource,
    pub api_url: &'a str,
    pub debug: bool,
}

impl GvlLoader<'_> {
    /// Loads vendor-list copy for the active locale.
    ///
    /// `available_locales` is the set the session currently offers; it is
    /// returned unchanged unless this load falls back to English. A late
    /// result, successful or not, is only applied if its locale is still
    /// active.
    pub async fn load(
        &self,
        i18n: &I18n,
        experience: &PrivacyExperience,
        available_locales: &[Locale],
        navigator_languages: &[String],
        override_locale: Option<&str>,
    ) -> GvlLoadOutcome {
        i18n.enable_tcf();
        let english = Locale::new(DEFAULT_LOCALE);
        if let Some(gvl) = &experience.gvl {
            i18n.load(&english, gvl.english_translation().messages());
        }

        let locale = i18n.active_locale();
        let unchanged = |locale: Locale| GvlLoadOutcome {
            available_locales: available_locales.to_vec(),
            locale,
            fell_back: false,
        };
        if locale.matches(DEFAULT_LOCALE) {
            return unchanged(locale);
        }

        let fetched = fetch_gvl_translations(self.source, self.api_url, std::slice::from_ref(&locale), self.debug).await;
        let translation = fetched.and_then(|mut t| {
            let key = t.keys().find(|k| k.matches(locale.as_str())).cloned()?;
            t.remove(&key)
        });

        if i18n.active_locale() != locale {
            debug!("GVL translations for {locale} settled after a locale change");
            return unchanged(i18n.active_locale());
        }
        match translation {
            Some(translation) => {
                if !i18n.load_if_active(&locale, translation.messages()) {
                    debug!("GVL translations for {locale} arrived after a locale change");
                }
                unchanged(locale)
            }
            None => {
                let narrowed = vec![english];
                let locale = detect_user_locale(navigator_languages, override_locale, &narrowed, DEFAULT_LOCALE);
                warn!("GVL translations unavailable, falling back to {locale} only");
                i18n.activate(&locale);
                GvlLoadOutcome {
                    available_locales: narrowed,
                    locale,
                    fell_back: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        api::{GVL_TRANSLATIONS_PATH, MemoryFidesApi},
        error::ApiError,
        experience::fixtures::tcf_experience,
        tcf::{GvlPurpose, GvlTranslation},
    };

    fn french() -> GvlTranslation {
        let mut purposes = BTreeMap::new();
        purposes.insert(
            "1".to_string(),
            GvlPurpose {
                id: 1,
                name: "Stocker et/ou accéder à des informations sur un appareil".into(),
                ..GvlPurpose::default()
            },
        );
        GvlTranslation {
            purposes,
            ..GvlTranslation::default()
        }
    }

    fn loader(api: &MemoryFidesApi) -> GvlLoader<'_> {
        GvlLoader {
            source: api,
            api_url: "https://fides.test/api/v1",
            debug: true,
        }
    }

    #[tokio::test]
    async fn loads_translation_for_active_locale() {
        let api = MemoryFidesApi::new().with_translation("fr", french());
        let i18n = I18n::new();
        i18n.activate(&Locale::new("fr"));
        let exp = tcf_experience();

        let outcome = loader(&api).load(&i18n, &exp, &exp.available_locales(), &["fr-FR".into()], None).await;
        assert!(!outcome.fell_back);
        assert_eq!(outcome.locale, "fr");
        assert_eq!(outcome.available_locales.len(), 3);
        assert_eq!(
            i18n.t("exp.tcf.purposes.1.name"),
            "Stocker et/ou accéder à des informations sur un appareil"
        );
        assert!(i18n.tcf_enabled());
    }

    #[tokio::test]
    async fn english_needs_no_request() {
        let api = MemoryFidesApi::new();
        let i18n = I18n::new();
        let exp = tcf_experience();
        let outcome = loader(&api).load(&i18n, &exp, &exp.available_locales(), &[], None).await;
        assert!(!outcome.fell_back);
        assert_eq!(outcome.available_locales.len(), 3);
        assert!(api.translation_requests().is_empty());
        assert_eq!(i18n.t("exp.tcf.purposes.2.name"), "Use limited data to select advertising");
    }

    #[tokio::test]
    async fn failure_narrows_to_english() {
        let api = MemoryFidesApi::new();
        api.fail(GVL_TRANSLATIONS_PATH, true);
        let i18n = I18n::new();
        i18n.activate(&Locale::new("fr"));

        let exp = tcf_experience();
        let outcome = loader(&api)
            .load(&i18n, &exp, &exp.available_locales(), &["fr-CA".into(), "en".into()], None)
            .await;
        assert!(outcome.fell_back);
        assert_eq!(outcome.available_locales, vec![Locale::new("en")]);
        assert_eq!(i18n.active_locale(), "en");
        assert_eq!(i18n.t("exp.tcf.purposes.1.name"), "Store and/or access information on a device");
    }

    #[tokio::test]
    async fn empty_response_counts_as_failure() {
        let api = MemoryFidesApi::new().with_translation("de", GvlTranslation::default());
        let i18n = I18n::new();
        i18n.activate(&Locale::new("fr"));
        let exp = tcf_experience();
        let outcome = loader(&api).load(&i18n, &exp, &exp.available_locales(), &[], None).await;
        assert!(outcome.fell_back);
    }

    #[tokio::test]
    async fn english_keeps_a_narrowed_set() {
        let api = MemoryFidesApi::new();
        let i18n = I18n::new();
        let exp = tcf_experience();
        let narrowed = [Locale::new("en")];
        let outcome = loader(&api).load(&i18n, &exp, &narrowed, &[], None).await;
        assert_eq!(outcome.available_locales, narrowed);
    }

    struct GatedSource {
        gate: Arc<Notify>,
        fail: bool,
    }

    #[async_trait]
    impl GvlTranslationSource for GatedSource {
        async fn fetch_gvl_translations(
            &self,
            _api_url: &str,
            locales: &[Locale],
        ) -> Result<GvlTranslationsByLocale, ApiError> {
            self.gate.notified().await;
            if self.fail {
                return Err(ApiError::Status {
                    url: GVL_TRANSLATIONS_PATH.to_string(),
                    status: 503,
                });
            }
            Ok(locales.iter().map(|l| (l.clone(), french())).collect())
        }
    }

    #[tokio::test]
    async fn stale_translation_is_discarded() {
        let gate = Arc::new(Notify::new());
        let source = GatedSource {
            gate: gate.clone(),
            fail: false,
        };
        let loader = GvlLoader {
            source: &source,
            api_url: "",
            debug: false,
        };
        let i18n = I18n::new();
        i18n.activate(&Locale::new("fr"));
        let exp = tcf_experience();

        let switch = async {
            i18n.activate(&Locale::new("de"));
            gate.notify_one();
        };
        let available = exp.available_locales();
        let (outcome, ()) = tokio::join!(loader.load(&i18n, &exp, &available, &[], None), switch);

        assert_eq!(outcome.locale, "de");
        assert_eq!(i18n.active_locale(), "de");
        i18n.activate(&Locale::new("fr"));
        assert_eq!(
            i18n.t("exp.tcf.purposes.1.name"),
            "Store and/or access information on a device"
        );
    }

    #[tokio::test]
    async fn stale_failure_does_not_narrow() {
        let gate = Arc::new(Notify::new());
        let source = GatedSource {
            gate: gate.clone(),
            fail: true,
        };
        let loader = GvlLoader {
            source: &source,
            api_url: "",
            debug: false,
        };
        let i18n = I18n::new();
        i18n.activate(&Locale::new("fr"));
        let exp = tcf_experience();

        let switch = async {
            i18n.activate(&Locale::new("de"));
            gate.notify_one();
        };
        let available = exp.available_locales();
        let (outcome, ()) = tokio::join!(loader.load(&i18n, &exp, &available, &[], None), switch);

        assert!(!outcome.fell_back);
        assert_eq!(outcome.available_locales, available);
        assert_eq!(i18n.active_locale(), "de");
    }
}
