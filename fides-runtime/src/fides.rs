//! The runtime controller.
//!
//! [`Fides`] is the one value a host integration holds. It owns the catalog,
//! the cookie store, the UI state machine and the overlay, and drives them
//! through [`Fides::init`] and the visitor actions. All mutation happens
//! through `&mut self`, so the host's event loop serializes actions the same
//! way a page's single thread does.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    api::{GvlTranslationSource, PreferenceApi},
    commit::{CommitContext, CommitRequest, ServedNoticeTracker, ServedNotices, report_notices_served, update_consent_preferences},
    config::FidesOptions,
    consent::{ConsentMethod, NoticeConsent},
    cookie::{ConsentStore, CookieJar, FidesCookie, resolve_consent},
    error::{FidesError, Result, UiError},
    events::{EventBus, EventTrigger, FidesEventExtraDetails, FidesEventType, dispatch_fides_event},
    experience::{ExperienceConfig, PrivacyExperience},
    gpc::{ConsentContext, gpc_adjusted_default},
    gvl::GvlLoader,
    i18n::{I18n, MessageDescriptor},
    locale::{Locale, detect_user_locale, match_available_locales},
    overlay::{HostDocument, OverlayController, OverlayState, announce},
    render::{LIVE_REGION_ID, RenderContext, RenderNode, render_overlay},
    tcf::TcfConsent,
    ui::{ConsentUi, ServingComponent, UiDecision, UiState, should_show_banner},
};

/// The host-provided ports.
#[derive(Clone)]
pub struct FidesServices {
    pub jar: Arc<dyn CookieJar>,
    pub events: Arc<dyn EventBus>,
    pub preferences: Arc<dyn PreferenceApi>,
    pub gvl: Arc<dyn GvlTranslationSource>,
    pub document: Arc<dyn HostDocument>,
}

/// One TCF toggle in the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcfToggle {
    PurposeConsent(u16),
    SpecialFeature(u16),
    VendorConsent(u16),
}

/// Everything that only exists once an experience was loaded.
struct Session {
    experience: PrivacyExperience,
    ui: ConsentUi,
    available_locales: Vec<Locale>,
}

pub struct Fides {
    options: FidesOptions,
    services: FidesServices,
    navigator_languages: Vec<String>,
    consent_context: ConsentContext,
    i18n: I18n,
    store: ConsentStore,
    overlay: OverlayController,
    served: ServedNoticeTracker,
    session: Option<Session>,
}

impl Fides {
    pub fn new(options: FidesOptions, services: FidesServices) -> Self {
        let store = ConsentStore::load(Arc::clone(&services.jar), options.cookie_options());
        let overlay = OverlayController::new(Arc::clone(&services.document), options.overlay_options());
        Self {
            options,
            services,
            navigator_languages: Vec::new(),
            consent_context: ConsentContext::default(),
            i18n: I18n::new(),
            store,
            overlay,
            served: ServedNoticeTracker::new(),
            session: None,
        }
    }

    /// `navigator.languages`, most preferred first.
    pub fn with_navigator_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.navigator_languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_consent_context(mut self, context: ConsentContext) -> Self {
        self.consent_context = context;
        self
    }

    pub fn options(&self) -> &FidesOptions {
        &self.options
    }

    pub fn i18n(&self) -> &I18n {
        &self.i18n
    }

    pub fn locale(&self) -> Locale {
        self.i18n.active_locale()
    }

    pub fn experience(&self) -> Option<&PrivacyExperience> {
        self.session.as_ref().map(|s| &s.experience)
    }

    /// Locales the language selector offers. Narrowed to English when a TCF
    /// experience could not load vendor-list translations.
    pub fn available_locales(&self) -> &[Locale] {
        self.session
            .as_ref()
            .map(|s| s.available_locales.as_slice())
            .unwrap_or_default()
    }

    pub fn ui_state(&self) -> UiState {
        self.session.as_ref().map_or(UiState::Hidden, |s| s.ui.state())
    }

    pub fn overlay_state(&self) -> &OverlayState {
        self.overlay.state()
    }

    pub fn cookie(&self) -> Arc<FidesCookie> {
        self.store.snapshot()
    }

    /// The committed consent, keyed by notice.
    pub fn consent(&self) -> NoticeConsent {
        self.store.snapshot().consent.clone()
    }

    /// Loads `experience` and shows whatever the visitor still has to decide.
    ///
    /// # Errors
    ///
    /// Fails with [`FidesError::Config`] when no experience was supplied, and
    /// with [`FidesError::Overlay`] when the overlay could not be mounted.
    /// `FidesInitialized` is dispatched in both cases so that host scripts
    /// waiting on it still run with the stored cookie.
    pub async fn init(&mut self, experience: Option<PrivacyExperience>) -> Result<()> {
        self.store = ConsentStore::load(Arc::clone(&self.services.jar), self.options.cookie_options());
        if self.options.fides_clear_cookie {
            debug!("Clearing the consent cookie before init");
            self.store.clear();
        }
        self.i18n = I18n::new();
        self.session = None;
        dispatch_fides_event(
            self.services.events.as_ref(),
            FidesEventType::FidesInitializing,
            &self.store.snapshot(),
            None,
        );

        let Some(experience) = experience else {
            error!("No privacy experience is available, the consent UI will not be shown");
            self.dispatch(FidesEventType::FidesInitialized, None);
            return Err(FidesError::Config("No privacy experience is available".to_string()));
        };

        let mut available_locales = experience.available_locales();
        for (locale, messages) in experience.messages() {
            self.i18n.load(&locale, messages);
        }
        let locale = detect_user_locale(
            &self.navigator_languages,
            self.options.fides_locale.as_deref(),
            &available_locales,
            experience.default_locale().as_str(),
        );
        self.i18n.activate(&locale);
        if self.options.debug {
            info!("Initializing experience {} in {locale}", experience.id);
        }

        if experience.is_tcf() {
            self.apply_fides_string_override(&experience);
            let outcome = GvlLoader {
                source: self.services.gvl.as_ref(),
                api_url: &self.options.fides_api_url,
                debug: self.options.debug,
            }
            .load(
                &self.i18n,
                &experience,
                &available_locales,
                &self.navigator_languages,
                self.options.fides_locale.as_deref(),
            )
            .await;
            available_locales = outcome.available_locales;
        } else if self.options.fides_string.is_some() {
            debug!("Ignoring fides_string override for a non-TCF experience");
        }

        self.apply_gpc(&experience).await;

        let cookie = self.store.snapshot();
        let tcf = stored_tcf(&cookie, &experience);
        let mut ui = ConsentUi::new(
            resolve_consent(&cookie, &experience, &self.consent_context),
            tcf,
            experience.is_tcf(),
        );
        if self.options.fides_disable_banner {
            debug!("Banner disabled by option");
        } else if should_show_banner(&experience, &cookie) {
            ui.open_banner()?;
        }
        self.session = Some(Session {
            experience,
            ui,
            available_locales,
        });

        let mounted = self.mount().await;
        if let Err(e) = mounted {
            self.dispatch(FidesEventType::FidesInitialized, None);
            return Err(e);
        }
        if let Some(component) = self.visible_component() {
            self.report_shown(component).await;
        }
        self.dispatch(FidesEventType::FidesInitialized, None);
        Ok(())
    }

    /// Runs [`Fides::init`] again with the current experience, replacing the
    /// mounted tree.
    pub async fn reinitialize(&mut self) -> Result<()> {
        let experience = self.session.take().map(|s| s.experience);
        self.overlay.unmount()?;
        self.init(experience).await
    }

    /// Opens the preferences modal, e.g. from a link on the host page.
    pub async fn show_modal(&mut self) -> Result<()> {
        let session = self.session_mut()?;
        session.ui.open_modal()?;
        if self.overlay.is_mounted() {
            self.rerender()?;
        } else {
            self.mount().await?;
        }
        if let Some(component) = self.visible_component() {
            self.report_shown(component).await;
        }
        Ok(())
    }

    pub async fn accept_all(&mut self) -> Result<Arc<FidesCookie>> {
        let trigger = EventTrigger::button(self.label("exp.accept_button_label", "Opt in to all"));
        let session = self.session_mut()?;
        let previous = session.ui.clone();
        let decision = session.ui.accept_all(&session.experience)?;
        self.commit_decision(previous, decision, trigger).await
    }

    pub async fn reject_all(&mut self) -> Result<Arc<FidesCookie>> {
        let trigger = EventTrigger::button(self.label("exp.reject_button_label", "Opt out of all"));
        let session = self.session_mut()?;
        let previous = session.ui.clone();
        let decision = session.ui.reject_all(&session.experience)?;
        self.commit_decision(previous, decision, trigger).await
    }

    pub async fn acknowledge(&mut self) -> Result<Arc<FidesCookie>> {
        let trigger = EventTrigger::button(self.label("exp.acknowledge_button_label", "OK"));
        let session = self.session_mut()?;
        let previous = session.ui.clone();
        let decision = session.ui.acknowledge(&session.experience)?;
        self.commit_decision(previous, decision, trigger).await
    }

    /// Commits the modal draft.
    pub async fn save(&mut self) -> Result<Arc<FidesCookie>> {
        let trigger = EventTrigger::button(self.label("exp.save_button_label", "Save"));
        let ui = &mut self.session_mut()?.ui;
        let previous = ui.clone();
        let decision = ui.save()?;
        self.commit_decision(previous, decision, trigger).await
    }

    /// Flips one notice in the modal draft.
    pub fn toggle(&mut self, notice_key: &str, value: bool) -> Result<()> {
        let session = self.session_mut()?;
        let notice = session
            .experience
            .notice(notice_key)
            .ok_or_else(|| UiError::UnknownNotice(notice_key.to_string()))?;
        session.ui.toggle(notice, value)?;
        self.changed(EventTrigger::toggle(notice_key, value))
    }

    pub fn toggle_tcf(&mut self, toggle: TcfToggle, value: bool) -> Result<()> {
        let ui = &mut self.session_mut()?.ui;
        let label = match toggle {
            TcfToggle::PurposeConsent(id) => {
                ui.toggle_purpose_consent(id, value)?;
                format!("purpose.{id}")
            }
            TcfToggle::SpecialFeature(id) => {
                ui.toggle_special_feature(id, value)?;
                format!("special_feature.{id}")
            }
            TcfToggle::VendorConsent(id) => {
                ui.toggle_vendor_consent(id, value)?;
                format!("gvl.{id}")
            }
        };
        self.changed(EventTrigger::toggle(label, value))
    }

    /// Closes the banner or the modal and drops the draft.
    ///
    /// Dismissing a dismissable banner records the current values with
    /// [`ConsentMethod::Dismiss`].
    pub async fn close(&mut self) -> Result<()> {
        let session = self.session_mut()?;
        let previous = session.ui.clone();
        let served_notice_history_id = session.ui.served_notice_history_id().map(str::to_string);
        let serving_component = session.ui.serving_component();
        let dismissable = session
            .experience
            .experience_config
            .as_ref()
            .is_some_and(|c| c.dismissable);

        match session.ui.close()? {
            UiState::Dismissed if dismissable => {
                let decision = UiDecision {
                    consent: session.ui.draft().clone(),
                    tcf: session.ui.tcf_draft().cloned(),
                    method: ConsentMethod::Dismiss,
                    served_notice_history_id,
                    serving_component,
                };
                let trigger = EventTrigger::button(self.i18n.t("static.close"));
                self.commit_decision(previous, decision, trigger).await?;
            }
            UiState::Hidden => {
                self.rerender()?;
                let extra = serving_component.map(|c| FidesEventExtraDetails::serving(c.as_str()));
                self.dispatch(FidesEventType::FidesModalClosed, extra);
            }
            _ => self.rerender()?,
        }
        Ok(())
    }

    /// Programmatic consent update from the host page.
    ///
    /// Keys the experience does not list are stored as given.
    pub async fn update_consent(&mut self, consent: NoticeConsent) -> Result<Arc<FidesCookie>> {
        let session = self.session()?;
        let mut request = CommitRequest::new(&session.experience, consent, ConsentMethod::Script, self.locale());
        request.trigger = Some(EventTrigger::external());
        let committed = update_consent_preferences(&self.commit_context(), request, |_| {}).await?;

        let consent_context = self.consent_context;
        let session = self.session_mut()?;
        let tcf = stored_tcf(&committed, &session.experience);
        session
            .ui
            .rebase(resolve_consent(&committed, &session.experience, &consent_context), tcf);
        self.rerender()?;
        Ok(committed)
    }

    /// Switches the UI language.
    ///
    /// The requested tag is matched against the available locales; the
    /// locale actually activated is returned.
    pub async fn change_locale(&mut self, requested: &str) -> Result<Locale> {
        let session = self.session()?;
        let locale = match_available_locales(
            requested,
            &session.available_locales,
            session.experience.default_locale().as_str(),
        );
        self.i18n.activate(&locale);

        if session.experience.is_tcf() {
            let outcome = GvlLoader {
                source: self.services.gvl.as_ref(),
                api_url: &self.options.fides_api_url,
                debug: self.options.debug,
            }
            .load(
                &self.i18n,
                &session.experience,
                &session.available_locales,
                &self.navigator_languages,
                Some(locale.as_str()),
            )
            .await;
            self.session_mut()?.available_locales = outcome.available_locales;
        }
        self.rerender()?;
        Ok(self.locale())
    }

    /// Shows `config` in place of the loaded experience config, for previews
    /// in the admin UI. The cookie and the backend are not touched.
    pub async fn preview(&mut self, config: ExperienceConfig) -> Result<()> {
        let stored = self.store.snapshot();
        let consent_context = self.consent_context;
        let session = self.session_mut()?;
        session.experience.experience_config = Some(config);
        let shows_banner = session.experience.experience_config.as_ref().is_some_and(ExperienceConfig::shows_banner);
        let mut ui = ConsentUi::new(
            resolve_consent(&stored, &session.experience, &consent_context),
            stored_tcf(&stored, &session.experience),
            session.experience.is_tcf(),
        );
        if shows_banner {
            ui.open_banner()?;
        } else {
            ui.open_modal()?;
        }
        session.ui = ui;
        for (locale, messages) in session.experience.messages() {
            self.i18n.load(&locale, messages);
        }

        if self.overlay.is_mounted() {
            self.rerender()?;
        } else {
            self.mount().await?;
        }
        Ok(())
    }

    /// The tree for the current state, or `None` before a successful init.
    pub fn render(&self) -> Option<RenderNode> {
        self.session.as_ref().map(|session| self.render_session(session))
    }

    fn render_session(&self, session: &Session) -> RenderNode {
        render_overlay(&RenderContext {
            i18n: &self.i18n,
            experience: &session.experience,
            ui: &session.ui,
            consent_context: &self.consent_context,
            available_locales: &session.available_locales,
        })
    }

    async fn mount(&mut self) -> Result<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        let Some(component) = session.experience.component() else {
            debug!("Experience {} has no config, nothing to mount", session.experience.id);
            return Ok(());
        };
        let tree = self.render_session(session);
        self.overlay.mount(component, tree).await?;
        Ok(())
    }

    fn rerender(&self) -> Result<()> {
        if !self.overlay.is_mounted() {
            return Ok(());
        }
        if let Some(tree) = self.render() {
            self.overlay.update(tree)?;
        }
        Ok(())
    }

    /// Runs `decision` through the commit pipeline. The UI moves to `Saved`
    /// only once the cookie is written; otherwise `previous` is restored.
    async fn commit_decision(
        &mut self,
        previous: ConsentUi,
        decision: UiDecision,
        trigger: EventTrigger,
    ) -> Result<Arc<FidesCookie>> {
        let session = self.session()?;
        let mut request = CommitRequest::new(&session.experience, decision.consent.clone(), decision.method, self.locale());
        request.tcf = decision.tcf.clone();
        request.served_notice_history_id = decision.served_notice_history_id.clone();
        request.serving_component = decision.serving_component;
        request.trigger = Some(trigger);
        let outcome = update_consent_preferences(&self.commit_context(), request, |_| {}).await;

        let ui = &mut self.session_mut()?.ui;
        let committed = match outcome {
            Ok(committed) => {
                ui.settle(&decision);
                committed
            }
            Err(e) => {
                *ui = previous;
                self.rerender()?;
                return Err(e);
            }
        };

        self.rerender()?;
        if self.overlay.is_mounted() {
            let message = self.i18n.t("static.consent_saved").into_owned();
            announce(self.overlay.document().as_ref(), LIVE_REGION_ID, &message).await;
        }
        Ok(committed)
    }

    /// Stores a `fides_string` handed to the page, as if the visitor had
    /// decided it here. Invalid strings are ignored.
    fn apply_fides_string_override(&self, experience: &PrivacyExperience) {
        let Some(fides_string) = &self.options.fides_string else {
            return;
        };
        if let Err(e) = TcfConsent::from_fides_string(fides_string) {
            warn!("Ignoring invalid fides_string override: {e}");
            return;
        }
        let mut next = FidesCookie::clone(&self.store.snapshot());
        next.fides_string = Some(fides_string.clone());
        next.tcf_version_hash = experience.version_hash().map(str::to_string);
        if let Err(e) = self.store.commit(next) {
            warn!("Unable to store the fides_string override: {e}");
        }
    }

    /// Records the GPC-mandated value for every applicable notice the
    /// visitor has not decided yet.
    async fn apply_gpc(&self, experience: &PrivacyExperience) {
        if !self.consent_context.global_privacy_control {
            return;
        }
        let cookie = self.store.snapshot();
        let consent: NoticeConsent = experience
            .notices()
            .filter(|n| n.is_gpc_applicable() && !cookie.consent.contains_key(&n.notice_key))
            .map(|n| (n.notice_key.clone(), gpc_adjusted_default(n, &self.consent_context)))
            .collect();
        if consent.is_empty() {
            return;
        }
        debug!("Applying GPC to {:?}", consent.keys().collect::<Vec<_>>());
        let request = CommitRequest::new(experience, consent, ConsentMethod::Gpc, self.locale());
        if let Err(e) = update_consent_preferences(&self.commit_context(), request, |_| {}).await {
            warn!("Unable to apply GPC preferences: {e}");
        }
    }

    fn changed(&self, trigger: EventTrigger) -> Result<()> {
        self.rerender()?;
        let extra = self
            .visible_component()
            .map_or_else(FidesEventExtraDetails::default, |c| FidesEventExtraDetails::serving(c.as_str()))
            .with_trigger(trigger);
        self.dispatch(FidesEventType::FidesUiChanged, Some(extra));
        Ok(())
    }

    async fn report_shown(&self, component: ServingComponent) {
        self.dispatch(
            FidesEventType::FidesUiShown,
            Some(FidesEventExtraDetails::serving(component.as_str())),
        );
        let Some(session) = &self.session else {
            return;
        };
        let Some(served_notice_history_id) = session.ui.served_notice_history_id() else {
            return;
        };
        let served = ServedNotices {
            experience: &session.experience,
            locale: self.locale(),
            served_notice_history_id: served_notice_history_id.to_string(),
            serving_component: component,
        };
        let cookie = self.store.snapshot();
        report_notices_served(&self.commit_context(), &self.served, &cookie, served).await;
    }

    fn visible_component(&self) -> Option<ServingComponent> {
        let ui = &self.session.as_ref()?.ui;
        ui.state().is_visible().then(|| ui.serving_component()).flatten()
    }

    fn commit_context(&self) -> CommitContext<'_> {
        CommitContext {
            store: &self.store,
            events: self.services.events.as_ref(),
            api: self.services.preferences.as_ref(),
            api_url: &self.options.fides_api_url,
            disable_save_api: self.options.fides_disable_save_api,
            disable_notices_served_api: self.options.fides_disable_notices_served_api,
        }
    }

    fn dispatch(&self, event_type: FidesEventType, extra: Option<FidesEventExtraDetails>) {
        dispatch_fides_event(self.services.events.as_ref(), event_type, &self.store.snapshot(), extra);
    }

    fn label(&self, message_id: &str, fallback: &str) -> String {
        self.i18n
            .t_descriptor(&MessageDescriptor::new(message_id).with_message(fallback))
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or_else(not_initialized)
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or_else(not_initialized)
    }
}

fn not_initialized() -> FidesError {
    FidesError::Config("Fides has not been initialized with an experience".to_string())
}

/// TCF consent from the cookie, if it was recorded for this vendor list.
fn stored_tcf(cookie: &FidesCookie, experience: &PrivacyExperience) -> Option<TcfConsent> {
    if !experience.is_tcf() || !cookie.tcf_is_current(experience) {
        return None;
    }
    let fides_string = cookie.fides_string.as_deref()?;
    TcfConsent::from_fides_string(fides_string)
        .inspect_err(|e| warn!("Ignoring unreadable stored fides_string: {e}"))
        .ok()
}
