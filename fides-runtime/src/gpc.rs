//! Global Privacy Control resolution.
//!
//! Statuses are derived on every render from the value about to be stored and
//! the current browser signal; nothing here is cached.

use serde::{Deserialize, Serialize};

use crate::{
    consent::NoticeConsent,
    experience::{PrivacyExperience, PrivacyNotice},
};

/// What the host environment tells us about the visitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentContext {
    /// `navigator.globalPrivacyControl`, or the host's equivalent.
    #[serde(default)]
    pub global_privacy_control: bool,
}

impl ConsentContext {
    pub fn with_gpc(global_privacy_control: bool) -> Self {
        Self { global_privacy_control }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpcStatus {
    /// GPC absent, or the notice is not governed by it.
    None,
    /// GPC present and the value is the protective one.
    Applied,
    /// GPC present but the visitor chose the less protective value.
    Overridden,
}

impl GpcStatus {
    /// Baked catalog id of the status label.
    pub fn message_id(self) -> &'static str {
        match self {
            Self::None => "static.gpc.status.none",
            Self::Applied => "static.gpc.status.applied",
            Self::Overridden => "static.gpc.status.overridden",
        }
    }
}

/// The value GPC mandates for an applicable notice: not consented.
pub const GPC_PROTECTIVE_VALUE: bool = false;

/// Status of one notice given the consent value about to be stored for it.
pub fn get_gpc_status_from_notice(value: bool, notice: &PrivacyNotice, context: &ConsentContext) -> GpcStatus {
    if !context.global_privacy_control || !notice.is_gpc_applicable() {
        return GpcStatus::None;
    }
    if value == GPC_PROTECTIVE_VALUE {
        GpcStatus::Applied
    } else {
        GpcStatus::Overridden
    }
}

/// Banner-level status over all visible notices.
///
/// `Overridden` if any applicable notice is overridden, `Applied` if at least
/// one is applicable and none is overridden, `None` otherwise. Notices
/// missing from `consent` count with their default value.
pub fn get_gpc_status_for_experience(
    consent: &NoticeConsent,
    experience: &PrivacyExperience,
    context: &ConsentContext,
) -> GpcStatus {
    let mut status = GpcStatus::None;
    for notice in experience.notices() {
        let value = consent
            .get(&notice.notice_key)
            .copied()
            .unwrap_or_else(|| notice.default_preference().as_consent_value());
        match get_gpc_status_from_notice(value, notice, context) {
            GpcStatus::Overridden => return GpcStatus::Overridden,
            GpcStatus::Applied => status = GpcStatus::Applied,
            GpcStatus::None => {}
        }
    }
    status
}

/// The first-visit value of a notice: the experience default, made
/// protective when GPC applies to it.
pub fn gpc_adjusted_default(notice: &PrivacyNotice, context: &ConsentContext) -> bool {
    let default = notice.default_preference().as_consent_value();
    if context.global_privacy_control && notice.is_gpc_applicable() {
        default && GPC_PROTECTIVE_VALUE
    } else {
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experience::fixtures::banner_experience;

    #[test]
    fn none_without_signal_or_applicability() {
        let exp = banner_experience();
        let marketing = exp.notice("marketing").unwrap();
        let analytics = exp.notice("analytics").unwrap();
        let essential = exp.notice("essential").unwrap();
        let off = ConsentContext::default();
        let on = ConsentContext::with_gpc(true);

        assert_eq!(get_gpc_status_from_notice(false, marketing, &off), GpcStatus::None);
        assert_eq!(get_gpc_status_from_notice(true, analytics, &on), GpcStatus::None);
        assert_eq!(get_gpc_status_from_notice(false, analytics, &on), GpcStatus::None);
        assert_eq!(get_gpc_status_from_notice(true, essential, &on), GpcStatus::None);
    }

    #[test]
    fn applied_or_overridden_under_signal() {
        let exp = banner_experience();
        let marketing = exp.notice("marketing").unwrap();
        let on = ConsentContext::with_gpc(true);
        assert_eq!(get_gpc_status_from_notice(false, marketing, &on), GpcStatus::Applied);
        assert_eq!(get_gpc_status_from_notice(true, marketing, &on), GpcStatus::Overridden);
    }

    #[test]
    fn aggregate_status() {
        let exp = banner_experience();
        let on = ConsentContext::with_gpc(true);
        let mut consent = NoticeConsent::new();
        consent.insert("marketing".into(), false);
        assert_eq!(get_gpc_status_for_experience(&consent, &exp, &on), GpcStatus::Applied);

        consent.insert("marketing".into(), true);
        assert_eq!(get_gpc_status_for_experience(&consent, &exp, &on), GpcStatus::Overridden);

        assert_eq!(
            get_gpc_status_for_experience(&consent, &exp, &ConsentContext::default()),
            GpcStatus::None
        );
    }

    #[test]
    fn adjusted_defaults_are_protective() {
        let exp = banner_experience();
        let on = ConsentContext::with_gpc(true);
        assert!(!gpc_adjusted_default(exp.notice("marketing").unwrap(), &on));
        assert!(gpc_adjusted_default(exp.notice("marketing").unwrap(), &ConsentContext::default()));
        assert!(!gpc_adjusted_default(exp.notice("analytics").unwrap(), &on));
        assert!(gpc_adjusted_default(exp.notice("essential").unwrap(), &on));
    }
}
