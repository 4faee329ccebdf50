//! Render trees for the banner and the modal.
//!
//! [`render_overlay`] is a pure function of the catalog, the experience, the
//! UI state and the GPC signal. The overlay controller hands its output to the
//! host document, which owns the actual widgets.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    experience::{PrivacyExperience, PrivacyNotice},
    gpc::{ConsentContext, GpcStatus, get_gpc_status_for_experience, get_gpc_status_from_notice},
    i18n::{I18n, MessageDescriptor},
    locale::Locale,
    t,
    tcf::TcfConsent,
    ui::{ConsentUi, UiState},
};

pub const BANNER_ID: &str = "fides-banner";
pub const MODAL_ID: &str = "fides-modal";
pub const LIVE_REGION_ID: &str = "fides-live-region";
pub const POWERED_BY: &str = "Fides";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderNode {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RenderNode>,
}

impl RenderNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_class(self, class: impl Into<String>) -> Self {
        self.with_attr("class", class)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: RenderNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = RenderNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Depth-first search by id.
    pub fn find_by_id(&self, id: &str) -> Option<&RenderNode> {
        if self.id.as_deref() == Some(id) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_id(id))
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut RenderNode> {
        if self.id.as_deref() == Some(id) {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_by_id_mut(id))
    }

    /// Number of nodes in this tree carrying `id`.
    pub fn count_id(&self, id: &str) -> usize {
        usize::from(self.id.as_deref() == Some(id)) + self.children.iter().map(|c| c.count_id(id)).sum::<usize>()
    }

    /// Concatenated text of the subtree.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        if let Some(text) = &self.text {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(text);
        }
        for child in &self.children {
            child.collect_text(out);
        }
    }
}

pub struct RenderContext<'a> {
    pub i18n: &'a I18n,
    pub experience: &'a PrivacyExperience,
    pub ui: &'a ConsentUi,
    pub consent_context: &'a ConsentContext,
    pub available_locales: &'a [Locale],
}

/// The overlay content for the current UI state.
pub fn render_overlay(ctx: &RenderContext<'_>) -> RenderNode {
    let root = RenderNode::new("div").with_class("fides-overlay-content");
    let root = match ctx.ui.state() {
        UiState::BannerOpen => root.with_child(render_banner(ctx)),
        UiState::ModalOpen => root.with_child(render_modal(ctx)),
        _ => root,
    };
    root.with_child(
        RenderNode::new("div")
            .with_id(LIVE_REGION_ID)
            .with_attr("role", "status")
            .with_attr("aria-live", "polite"),
    )
}

fn render_banner(ctx: &RenderContext<'_>) -> RenderNode {
    let i18n = ctx.i18n;
    let mut banner = RenderNode::new("div")
        .with_id(BANNER_ID)
        .with_attr("role", "region")
        .with_attr("aria-label", i18n.t("exp.banner_title"))
        .with_child(
            RenderNode::new("h2")
                .with_id("fides-banner-title")
                .with_text(i18n.t("exp.banner_title")),
        )
        .with_child(
            RenderNode::new("p")
                .with_id("fides-banner-description")
                .with_text(i18n.t("exp.banner_description")),
        );

    if let Some(gpc) = render_gpc_indicator(ctx) {
        banner = banner.with_child(gpc);
    }

    if ctx.experience.is_tcf() {
        let vendors = ctx.experience.tcf_vendor_consents.len();
        banner = banner.with_child(
            RenderNode::new("p")
                .with_class("fides-tcf-vendor-count")
                .with_text(t!(i18n, "static.tcf.vendor_count", { "count" => vendors })),
        );
    } else {
        let pending = ctx.experience.notices().count();
        banner = banner.with_child(
            RenderNode::new("p")
                .with_class("fides-notices-pending")
                .with_text(t!(i18n, "static.notices_pending", { "count" => pending })),
        );
    }

    let buttons = if ctx.experience.is_acknowledge_only() {
        vec![button(i18n, "fides-acknowledge-button", "exp.acknowledge_button_label", "OK")]
    } else {
        vec![
            button(i18n, "fides-manage-preferences-button", "exp.privacy_preferences_link_label", "Manage preferences"),
            button(i18n, "fides-reject-all-button", "exp.reject_button_label", "Opt out of all"),
            button(i18n, "fides-accept-all-button", "exp.accept_button_label", "Opt in to all"),
        ]
    };
    banner
        .with_child(RenderNode::new("div").with_class("fides-banner-buttons").with_children(buttons))
        .with_child(render_powered_by(i18n))
}

fn render_modal(ctx: &RenderContext<'_>) -> RenderNode {
    let i18n = ctx.i18n;
    let close_label = i18n.t("static.close").into_owned();
    let mut modal = RenderNode::new("div")
        .with_id(MODAL_ID)
        .with_attr("role", "dialog")
        .with_attr("aria-modal", "true")
        .with_child(
            RenderNode::new("button")
                .with_id("fides-modal-close")
                .with_attr("aria-label", close_label.clone())
                .with_text(close_label),
        )
        .with_child(RenderNode::new("h2").with_id("fides-modal-title").with_text(i18n.t("exp.title")))
        .with_child(
            RenderNode::new("p")
                .with_id("fides-modal-description")
                .with_text(i18n.t("exp.description")),
        );

    if let Some(select) = render_language_select(ctx) {
        modal = modal.with_child(select);
    }
    if let Some(gpc) = render_gpc_indicator(ctx) {
        modal = modal.with_child(gpc);
    }

    modal = if ctx.experience.is_tcf() {
        modal.with_children(render_tcf_sections(ctx))
    } else {
        modal.with_child(
            RenderNode::new("ul")
                .with_class("fides-notices")
                .with_children(ctx.experience.notices().map(|n| render_notice(ctx, n))),
        )
    };

    let mut buttons = Vec::new();
    if ctx.experience.is_acknowledge_only() {
        buttons.push(button(i18n, "fides-acknowledge-button", "exp.acknowledge_button_label", "OK"));
    } else {
        buttons.push(button(i18n, "fides-reject-all-button", "exp.reject_button_label", "Opt out of all"));
        buttons.push(button(i18n, "fides-accept-all-button", "exp.accept_button_label", "Opt in to all"));
        buttons.push(button(i18n, "fides-save-button", "exp.save_button_label", "Save"));
    }
    modal
        .with_child(RenderNode::new("div").with_class("fides-modal-buttons").with_children(buttons))
        .with_child(render_powered_by(i18n))
}

fn render_notice(ctx: &RenderContext<'_>, notice: &PrivacyNotice) -> RenderNode {
    let i18n = ctx.i18n;
    let key = &notice.notice_key;
    let title = i18n.t_descriptor(
        &MessageDescriptor::new(format!("exp.notices.{key}.title")).with_message(notice.name.clone()),
    );
    let description = i18n.t_descriptor(
        &MessageDescriptor::new(format!("exp.notices.{key}.description")).with_message(String::new()),
    );
    let value = ctx
        .ui
        .draft()
        .get(key)
        .copied()
        .unwrap_or_else(|| notice.default_preference().as_consent_value());

    let mut toggle = RenderNode::new("input")
        .with_id(format!("fides-toggle-{key}"))
        .with_attr("type", "checkbox")
        .with_attr("role", "switch")
        .with_attr("aria-label", title.clone())
        .with_attr("aria-checked", value.to_string())
        .with_text(if value { i18n.t("static.toggle.on") } else { i18n.t("static.toggle.off") });
    if notice.is_notice_only() {
        toggle = toggle.with_attr("disabled", "true");
    }

    let mut item = RenderNode::new("li")
        .with_id(format!("fides-notice-{key}"))
        .with_class("fides-notice-toggle")
        .with_child(RenderNode::new("span").with_class("fides-notice-title").with_text(title))
        .with_child(toggle);
    let status = get_gpc_status_from_notice(value, notice, ctx.consent_context);
    if status != GpcStatus::None {
        item = item.with_child(
            RenderNode::new("span")
                .with_class(format!("fides-gpc-label fides-gpc-{}", status_class(status)))
                .with_text(i18n.t(status.message_id())),
        );
    }
    if !description.is_empty() {
        item = item.with_child(RenderNode::new("p").with_class("fides-notice-description").with_text(description));
    }
    item
}

fn render_tcf_sections(ctx: &RenderContext<'_>) -> Vec<RenderNode> {
    let i18n = ctx.i18n;
    let exp = ctx.experience;
    let draft = ctx.ui.tcf_draft().cloned().unwrap_or_default();

    let purposes = exp.tcf_purpose_consents.iter().map(|p| {
        tcf_record(
            i18n,
            &format!("fides-purpose-{}", p.id),
            &format!("exp.tcf.purposes.{}.name", p.id),
            &p.name,
            draft.purpose_consents.contains(&p.id),
        )
    });
    let special_features = exp.tcf_special_features.iter().map(|f| {
        tcf_record(
            i18n,
            &format!("fides-special-feature-{}", f.id),
            &format!("exp.tcf.specialFeatures.{}.name", f.id),
            &f.name,
            draft.special_feature_optins.contains(&f.id),
        )
    });
    let vendors = exp.tcf_vendor_consents.iter().map(|v| render_vendor(ctx, &draft, &v.id, &v.name));

    vec![
        tcf_section(i18n, "fides-tcf-purposes", "static.tcf.purposes", purposes),
        tcf_section(i18n, "fides-tcf-special-features", "static.tcf.special_features", special_features),
        tcf_section(i18n, "fides-tcf-vendors", "static.tcf.vendors", vendors),
    ]
}

fn render_vendor(ctx: &RenderContext<'_>, draft: &TcfConsent, id: &str, name: &str) -> RenderNode {
    use crate::tcf::VendorId;
    let (checked, name) = match VendorId::parse(id) {
        Some(VendorId::Gvl(gvl_id)) => (
            draft.vendor_consents.contains(&gvl_id),
            ctx.experience
                .gvl
                .as_ref()
                .and_then(|g| g.vendor_name(gvl_id))
                .unwrap_or(name)
                .to_string(),
        ),
        Some(VendorId::Ac(ac_id)) => (draft.ac_vendor_consents.contains(&ac_id), name.to_string()),
        None => (false, name.to_string()),
    };
    RenderNode::new("li")
        .with_id(format!("fides-vendor-{id}"))
        .with_child(RenderNode::new("span").with_text(name.clone()))
        .with_child(
            RenderNode::new("input")
                .with_attr("type", "checkbox")
                .with_attr("aria-label", name)
                .with_attr("aria-checked", checked.to_string()),
        )
}

fn tcf_record(i18n: &I18n, node_id: &str, message_id: &str, fallback: &str, checked: bool) -> RenderNode {
    let name = i18n.t_descriptor(&MessageDescriptor::new(message_id).with_message(fallback));
    RenderNode::new("li")
        .with_id(node_id)
        .with_child(RenderNode::new("span").with_text(name.clone()))
        .with_child(
            RenderNode::new("input")
                .with_attr("type", "checkbox")
                .with_attr("aria-label", name)
                .with_attr("aria-checked", checked.to_string()),
        )
}

fn tcf_section(
    i18n: &I18n,
    id: &str,
    heading: &str,
    items: impl Iterator<Item = RenderNode>,
) -> RenderNode {
    RenderNode::new("section")
        .with_id(id)
        .with_child(RenderNode::new("h3").with_text(i18n.t(heading)))
        .with_child(RenderNode::new("ul").with_children(items))
}

fn render_gpc_indicator(ctx: &RenderContext<'_>) -> Option<RenderNode> {
    let consent = ctx.ui.draft();
    let status = get_gpc_status_for_experience(consent, ctx.experience, ctx.consent_context);
    if status == GpcStatus::None {
        return None;
    }
    Some(
        RenderNode::new("div")
            .with_class(format!("fides-gpc-banner fides-gpc-{}", status_class(status)))
            .with_child(
                RenderNode::new("p")
                    .with_class("fides-gpc-header")
                    .with_text(format!("{} {}", ctx.i18n.t("static.gpc"), ctx.i18n.t(status.message_id()))),
            )
            .with_child(RenderNode::new("p").with_text(ctx.i18n.t("static.gpc.description"))),
    )
}

fn render_language_select(ctx: &RenderContext<'_>) -> Option<RenderNode> {
    let allowed = ctx
        .experience
        .experience_config
        .as_ref()
        .is_some_and(|c| c.allow_language_selection);
    if !allowed || ctx.available_locales.len() < 2 {
        return None;
    }
    let active = ctx.i18n.active_locale();
    let options = ctx.available_locales.iter().map(|l| {
        let option = RenderNode::new("option").with_attr("value", l.as_str()).with_text(l.as_str());
        if *l == active {
            option.with_attr("selected", "true")
        } else {
            option
        }
    });
    Some(
        RenderNode::new("select")
            .with_id("fides-language-select")
            .with_attr("aria-label", ctx.i18n.t("static.language_label"))
            .with_children(options),
    )
}

fn render_powered_by(i18n: &I18n) -> RenderNode {
    RenderNode::new("p")
        .with_class("fides-powered-by")
        .with_text(t!(i18n, "static.powered_by", { "provider" => POWERED_BY }))
}

fn button(i18n: &I18n, id: &str, message_id: &str, fallback: &str) -> RenderNode {
    RenderNode::new("button")
        .with_id(id)
        .with_text(i18n.t_descriptor(&MessageDescriptor::new(message_id).with_message(fallback)))
}

fn status_class(status: GpcStatus) -> &'static str {
    match status {
        GpcStatus::None => "none",
        GpcStatus::Applied => "applied",
        GpcStatus::Overridden => "overridden",
    }
}
