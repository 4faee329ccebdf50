//! Banner and modal state machine.
//!
//! ```text
//! Hidden ──open_banner──► BannerOpen ──manage──► ModalOpen
//!   ▲                      │    │                  │   │
//!   │                close │    │ accept/reject    │   │ save/accept/reject
//!   │                      ▼    ▼                  │   ▼
//!   └───── close ───── Dismissed  Saved ◄──────────┘ Saved
//! ```
//!
//! Edits go to a draft. The draft becomes a decision only through
//! [`ConsentUi::accept_all`], [`ConsentUi::reject_all`],
//! [`ConsentUi::acknowledge`] or [`ConsentUi::save`]; closing drops it. A
//! decision moves the machine to `Saved` only once [`ConsentUi::settle`] is
//! called after the cookie was written.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    consent::{ConsentMethod, NoticeConsent},
    cookie::{FidesCookie, notices_needing_action},
    error::UiError,
    experience::{PrivacyExperience, PrivacyNotice},
    tcf::TcfConsent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiState {
    Hidden,
    BannerOpen,
    ModalOpen,
    Dismissed,
    Saved,
}

impl UiState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hidden => "hidden",
            Self::BannerOpen => "banner_open",
            Self::ModalOpen => "modal_open",
            Self::Dismissed => "dismissed",
            Self::Saved => "saved",
        }
    }

    pub fn is_visible(self) -> bool {
        matches!(self, Self::BannerOpen | Self::ModalOpen)
    }
}

/// Which UI surface served the notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingComponent {
    Banner,
    Modal,
    TcfBanner,
    TcfOverlay,
}

impl ServingComponent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Banner => "banner",
            Self::Modal => "modal",
            Self::TcfBanner => "tcf_banner",
            Self::TcfOverlay => "tcf_overlay",
        }
    }
}

/// A decision ready for the commit pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiDecision {
    pub consent: NoticeConsent,
    pub tcf: Option<TcfConsent>,
    pub method: ConsentMethod,
    pub served_notice_history_id: Option<String>,
    pub serving_component: Option<ServingComponent>,
}

#[derive(Debug, Clone)]
pub struct ConsentUi {
    state: UiState,
    committed: NoticeConsent,
    committed_tcf: Option<TcfConsent>,
    draft: NoticeConsent,
    tcf_draft: Option<TcfConsent>,
    is_tcf: bool,
    served_notice_history_id: Option<String>,
    serving_component: Option<ServingComponent>,
}

impl ConsentUi {
    /// Starts hidden with `consent` as both the committed state and the draft.
    pub fn new(consent: NoticeConsent, tcf: Option<TcfConsent>, is_tcf: bool) -> Self {
        Self {
            state: UiState::Hidden,
            draft: consent.clone(),
            committed: consent,
            tcf_draft: tcf.clone(),
            committed_tcf: tcf,
            is_tcf,
            served_notice_history_id: None,
            serving_component: None,
        }
    }

    pub fn state(&self) -> UiState {
        self.state
    }

    pub fn draft(&self) -> &NoticeConsent {
        &self.draft
    }

    pub fn tcf_draft(&self) -> Option<&TcfConsent> {
        self.tcf_draft.as_ref()
    }

    pub fn is_tcf(&self) -> bool {
        self.is_tcf
    }

    /// Id shared by the notices-served record and the decision of the
    /// current display.
    pub fn served_notice_history_id(&self) -> Option<&str> {
        self.served_notice_history_id.as_deref()
    }

    pub fn serving_component(&self) -> Option<ServingComponent> {
        self.serving_component
    }

    pub fn open_banner(&mut self) -> Result<ServingComponent, UiError> {
        if self.state != UiState::Hidden {
            return Err(self.invalid("open the banner"));
        }
        let component = if self.is_tcf {
            ServingComponent::TcfBanner
        } else {
            ServingComponent::Banner
        };
        self.show(UiState::BannerOpen, component);
        Ok(component)
    }

    /// Opens the modal, from the banner or from a link on the host page.
    pub fn open_modal(&mut self) -> Result<ServingComponent, UiError> {
        if self.state == UiState::ModalOpen {
            return Err(self.invalid("open the modal"));
        }
        if self.state != UiState::BannerOpen {
            self.reset_draft();
        }
        let component = if self.is_tcf {
            ServingComponent::TcfOverlay
        } else {
            ServingComponent::Modal
        };
        self.show(UiState::ModalOpen, component);
        Ok(component)
    }

    pub fn toggle(&mut self, notice: &PrivacyNotice, value: bool) -> Result<(), UiError> {
        if self.state != UiState::ModalOpen {
            return Err(self.invalid("toggle a notice"));
        }
        if notice.is_notice_only() {
            return Err(UiError::NoticeOnly(notice.notice_key.clone()));
        }
        self.draft.insert(notice.notice_key.clone(), value);
        Ok(())
    }

    pub fn toggle_purpose_consent(&mut self, purpose: u16, value: bool) -> Result<(), UiError> {
        let draft = self.tcf_draft_mut("toggle a purpose")?;
        set_membership(&mut draft.purpose_consents, purpose, value);
        Ok(())
    }

    pub fn toggle_special_feature(&mut self, feature: u16, value: bool) -> Result<(), UiError> {
        let draft = self.tcf_draft_mut("toggle a special feature")?;
        set_membership(&mut draft.special_feature_optins, feature, value);
        Ok(())
    }

    pub fn toggle_vendor_consent(&mut self, vendor: u16, value: bool) -> Result<(), UiError> {
        let draft = self.tcf_draft_mut("toggle a vendor")?;
        set_membership(&mut draft.vendor_consents, vendor, value);
        Ok(())
    }

    pub fn accept_all(&mut self, experience: &PrivacyExperience) -> Result<UiDecision, UiError> {
        self.ensure_visible("accept all")?;
        for notice in experience.notices() {
            self.draft.insert(notice.notice_key.clone(), true);
        }
        if self.is_tcf {
            self.tcf_draft = Some(TcfConsent::accept_all(experience));
        }
        Ok(self.decide(ConsentMethod::Accept))
    }

    /// Opts out of every notice; notice-only notices stay acknowledged.
    pub fn reject_all(&mut self, experience: &PrivacyExperience) -> Result<UiDecision, UiError> {
        self.ensure_visible("reject all")?;
        for notice in experience.notices() {
            self.draft.insert(notice.notice_key.clone(), notice.is_notice_only());
        }
        if self.is_tcf {
            self.tcf_draft = Some(TcfConsent::reject_all());
        }
        Ok(self.decide(ConsentMethod::Reject))
    }

    /// The single-button flow of an acknowledge-only experience.
    pub fn acknowledge(&mut self, experience: &PrivacyExperience) -> Result<UiDecision, UiError> {
        self.ensure_visible("acknowledge")?;
        if !experience.is_acknowledge_only() {
            return Err(self.invalid("acknowledge"));
        }
        for notice in experience.notices() {
            self.draft.insert(notice.notice_key.clone(), true);
        }
        Ok(self.decide(ConsentMethod::Acknowledge))
    }

    pub fn save(&mut self) -> Result<UiDecision, UiError> {
        if self.state != UiState::ModalOpen {
            return Err(self.invalid("save"));
        }
        Ok(self.decide(ConsentMethod::Save))
    }

    /// Closes whatever is open and discards the draft.
    pub fn close(&mut self) -> Result<UiState, UiError> {
        self.state = match self.state {
            UiState::BannerOpen => UiState::Dismissed,
            UiState::ModalOpen => UiState::Hidden,
            _ => return Err(self.invalid("close")),
        };
        self.reset_draft();
        Ok(self.state)
    }

    /// Adopts a newly committed state, e.g. after a programmatic update.
    pub fn rebase(&mut self, consent: NoticeConsent, tcf: Option<TcfConsent>) {
        self.committed = consent;
        self.committed_tcf = tcf;
        self.reset_draft();
    }

    fn show(&mut self, state: UiState, component: ServingComponent) {
        self.state = state;
        self.serving_component = Some(component);
        self.served_notice_history_id = Some(Uuid::new_v4().to_string());
    }

    /// Marks `decision` as stored. Until then the committed state and the UI
    /// state are untouched, so a failed commit leaves the surface as it was.
    pub fn settle(&mut self, decision: &UiDecision) {
        self.state = UiState::Saved;
        self.rebase(decision.consent.clone(), decision.tcf.clone());
    }

    fn decide(&self, method: ConsentMethod) -> UiDecision {
        UiDecision {
            consent: self.draft.clone(),
            tcf: self.tcf_draft.clone(),
            method,
            served_notice_history_id: self.served_notice_history_id.clone(),
            serving_component: self.serving_component,
        }
    }

    fn reset_draft(&mut self) {
        self.draft = self.committed.clone();
        self.tcf_draft = self.committed_tcf.clone();
    }

    fn ensure_visible(&self, action: &'static str) -> Result<(), UiError> {
        if self.state.is_visible() {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn tcf_draft_mut(&mut self, action: &'static str) -> Result<&mut TcfConsent, UiError> {
        if self.state != UiState::ModalOpen || !self.is_tcf {
            return Err(self.invalid(action));
        }
        Ok(self.tcf_draft.get_or_insert_with(TcfConsent::default))
    }

    fn invalid(&self, action: &'static str) -> UiError {
        UiError::InvalidTransition {
            action,
            state: self.state.as_str(),
        }
    }
}

fn set_membership<T: Ord>(set: &mut std::collections::BTreeSet<T>, item: T, present: bool) {
    if present {
        set.insert(item);
    } else {
        set.remove(&item);
    }
}

/// Whether the banner opens on load: the experience asks for one and the
/// visitor still has something to decide.
pub fn should_show_banner(experience: &PrivacyExperience, cookie: &FidesCookie) -> bool {
    let Some(config) = &experience.experience_config else {
        return false;
    };
    if !config.shows_banner() {
        return false;
    }
    if experience.is_tcf() {
        return !cookie.tcf_is_current(experience);
    }
    !notices_needing_action(cookie, experience).is_empty()
}
