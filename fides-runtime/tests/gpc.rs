mod common;

use common::{Page, banner_experience, find_class, options};
use fides_runtime::{
    consent::ConsentMethod,
    events::FidesEventType,
    gpc::{ConsentContext, GpcStatus, get_gpc_status_for_experience},
    ui::UiState,
};

#[tokio::test]
async fn gpc_is_applied_on_first_visit() {
    let page = Page::new();
    let mut fides = page.fides_with(options(), &["en"], ConsentContext::with_gpc(true));
    fides.init(Some(banner_experience())).await.unwrap();

    let cookie = fides.cookie();
    assert_eq!(cookie.consent.get("advertising"), Some(&false));
    assert!(!cookie.consent.contains_key("analytics"));
    assert!(!cookie.consent.contains_key("essential"));
    assert_eq!(cookie.fides_meta.consent_method, Some(ConsentMethod::Gpc));

    assert_eq!(page.api.preferences().len(), 1);
    assert_eq!(page.api.preferences()[0].method, ConsentMethod::Gpc);

    // analytics is still undecided
    assert_eq!(fides.ui_state(), UiState::BannerOpen);
    assert!(find_class(&page.overlay(), "fides-gpc-applied").is_some());
    assert_eq!(
        page.events.types(),
        vec![
            FidesEventType::FidesInitializing,
            FidesEventType::FidesUpdating,
            FidesEventType::FidesUpdated,
            FidesEventType::FidesUiShown,
            FidesEventType::FidesInitialized,
        ]
    );
}

#[tokio::test]
async fn gpc_does_not_replace_an_explicit_choice() {
    let page = Page::new();
    let mut fides = page.fides(&["en"]);
    fides.init(Some(banner_experience())).await.unwrap();
    fides.accept_all().await.unwrap();

    let next = page.reload();
    let mut fides = next.fides_with(options(), &["en"], ConsentContext::with_gpc(true));
    fides.init(Some(banner_experience())).await.unwrap();

    assert_eq!(fides.consent().get("advertising"), Some(&true));
    assert_eq!(fides.cookie().fides_meta.consent_method, Some(ConsentMethod::Accept));
    assert_eq!(next.events.count(FidesEventType::FidesUpdated), 0);
    assert_eq!(
        get_gpc_status_for_experience(
            &fides.consent(),
            fides.experience().unwrap(),
            &ConsentContext::with_gpc(true)
        ),
        GpcStatus::Overridden
    );
}

#[tokio::test]
async fn toggling_against_gpc_shows_overridden() {
    let page = Page::new();
    let mut fides = page.fides_with(options(), &["en"], ConsentContext::with_gpc(true));
    fides.init(Some(banner_experience())).await.unwrap();
    fides.show_modal().await.unwrap();

    let notice = |page: &Page| page.overlay().find_by_id("fides-notice-advertising").cloned().unwrap();
    assert!(find_class(&notice(&page), "fides-gpc-applied").is_some());

    fides.toggle("advertising", true).unwrap();
    assert!(find_class(&notice(&page), "fides-gpc-overridden").is_some());
    assert!(find_class(&page.overlay(), "fides-gpc-overridden").is_some());

    let committed = fides.save().await.unwrap();
    assert_eq!(committed.consent.get("advertising"), Some(&true));
}

#[tokio::test]
async fn no_signal_no_indicator() {
    let page = Page::new();
    let mut fides = page.fides(&["en"]);
    fides.init(Some(banner_experience())).await.unwrap();
    fides.show_modal().await.unwrap();

    let overlay = page.overlay();
    assert!(find_class(&overlay, "fides-gpc-banner").is_none());
    assert!(find_class(&overlay, "fides-gpc-label").is_none());
    assert!(fides.consent().is_empty());
}
