mod common;

use common::{Page, banner_experience, options, text_of};
use fides_runtime::{
    FidesError, FidesOptions,
    cookie::{CONSENT_COOKIE_NAME, FidesCookie, MemoryCookieJar},
    events::FidesEventType,
    gpc::ConsentContext,
    overlay::{HostDocument, OVERLAY_ID, OverlayState, ReadyState},
    render::{BANNER_ID, LIVE_REGION_ID},
    ui::UiState,
};

#[tokio::test]
async fn negotiates_language_from_browser_list() {
    let page = Page::new();
    let mut fides = page.fides(&["fr-CA", "en"]);
    fides.init(Some(banner_experience())).await.unwrap();

    assert_eq!(fides.locale(), "fr");
    assert_eq!(text_of(&page.overlay(), "fides-banner-title"), "Votre vie privée");
    assert_eq!(text_of(&page.overlay(), "fides-accept-all-button"), "Tout accepter");
}

#[tokio::test]
async fn override_locale_beats_browser() {
    let page = Page::new();
    let options = FidesOptions {
        fides_locale: Some("es-mx".into()),
        ..options()
    };
    let mut fides = page.fides_with(options, &["fr-CA", "en"], ConsentContext::default());
    fides.init(Some(banner_experience())).await.unwrap();
    assert_eq!(fides.locale(), "es-MX");
}

#[tokio::test]
async fn unsupported_browser_languages_use_the_experience_default() {
    let page = Page::new();
    let mut fides = page.fides(&["ja-JP", "ko"]);
    fides.init(Some(banner_experience())).await.unwrap();
    assert_eq!(fides.locale(), "en");
    assert_eq!(text_of(&page.overlay(), "fides-banner-title"), "Your privacy");
}

#[tokio::test]
async fn first_visit_shows_banner_and_reports_it() {
    let page = Page::new();
    let mut fides = page.fides(&["en-US"]);
    fides.init(Some(banner_experience())).await.unwrap();

    assert_eq!(fides.ui_state(), UiState::BannerOpen);
    assert_eq!(page.document.count_id(BANNER_ID), 1);
    assert_eq!(page.document.count_id(LIVE_REGION_ID), 1);
    assert_eq!(
        page.events.types(),
        vec![
            FidesEventType::FidesInitializing,
            FidesEventType::FidesUiShown,
            FidesEventType::FidesInitialized,
        ]
    );
    let shown = page.events.last(FidesEventType::FidesUiShown).unwrap();
    assert_eq!(shown.serving_component(), Some("banner"));

    let served = page.api.notices_served();
    assert_eq!(served.len(), 1);
    assert_eq!(served[0].serving_component, "banner");
    assert_eq!(served[0].privacy_notice_history_ids.len(), 3);
    assert_eq!(
        served[0].privacy_experience_config_history_id.as_deref(),
        Some("pri_cfg_hist_us_en")
    );
}

#[tokio::test]
async fn decided_visitor_sees_no_banner() {
    let mut cookie = FidesCookie::new();
    for key in ["advertising", "analytics", "essential"] {
        cookie.consent.insert(key.to_string(), true);
    }
    let page = Page::new();
    let page = Page {
        jar: std::sync::Arc::new(MemoryCookieJar::with_cookie(
            CONSENT_COOKIE_NAME,
            &cookie.encode(false).unwrap(),
        )),
        ..page
    };
    let mut fides = page.fides(&["en"]);
    fides.init(Some(banner_experience())).await.unwrap();

    assert_eq!(fides.ui_state(), UiState::Hidden);
    assert_eq!(page.document.count_id(BANNER_ID), 0);
    assert_eq!(page.events.count(FidesEventType::FidesUiShown), 0);
    assert!(page.api.notices_served().is_empty());
    assert_eq!(fides.consent(), cookie.consent);
}

#[tokio::test]
async fn disabled_banner_still_mounts_for_the_modal() {
    let page = Page::new();
    let options = FidesOptions {
        fides_disable_banner: true,
        ..options()
    };
    let mut fides = page.fides_with(options, &["en"], ConsentContext::default());
    fides.init(Some(banner_experience())).await.unwrap();

    assert_eq!(fides.ui_state(), UiState::Hidden);
    assert!(matches!(fides.overlay_state(), OverlayState::Mounted { .. }));
    fides.show_modal().await.unwrap();
    assert_eq!(fides.ui_state(), UiState::ModalOpen);
    assert_eq!(
        page.events.last(FidesEventType::FidesUiShown).unwrap().serving_component(),
        Some("modal")
    );
}

#[tokio::test]
async fn missing_experience_rejects_once() {
    let page = Page::new();
    let mut fides = page.fides(&["en"]);
    let err = fides.init(None).await.unwrap_err();

    assert!(matches!(err, FidesError::Config(_)));
    assert_eq!(
        page.events.types(),
        vec![FidesEventType::FidesInitializing, FidesEventType::FidesInitialized]
    );
    assert!(!page.document.has_element(OVERLAY_ID));
    assert!(matches!(fides.show_modal().await, Err(FidesError::Config(_))));
}

#[tokio::test]
async fn double_reinitialize_leaves_one_banner() {
    let page = Page::new();
    let mut fides = page.fides(&["en"]);
    fides.init(Some(banner_experience())).await.unwrap();
    fides.reinitialize().await.unwrap();
    fides.reinitialize().await.unwrap();

    assert_eq!(page.document.count_id(BANNER_ID), 1);
    assert_eq!(fides.ui_state(), UiState::BannerOpen);
    assert_eq!(page.events.count(FidesEventType::FidesInitialized), 3);
}

#[tokio::test]
async fn mount_waits_for_interactive_document() {
    let page = Page::new();
    page.document.set_ready_state(ReadyState::Loading);
    let mut fides = page.fides(&["en"]);

    let document = page.document.clone();
    let host = async move {
        tokio::task::yield_now().await;
        assert_eq!(document.count_id(BANNER_ID), 0);
        document.set_ready_state(ReadyState::Interactive);
    };
    let (result, ()) = tokio::join!(fides.init(Some(banner_experience())), host);
    result.unwrap();
    assert_eq!(page.document.count_id(BANNER_ID), 1);
}

#[tokio::test]
async fn clear_cookie_option_starts_over() {
    let page = Page::new();
    let mut fides = page.fides(&["en"]);
    fides.init(Some(banner_experience())).await.unwrap();
    fides.accept_all().await.unwrap();
    let first_device = fides.cookie().identity.fides_user_device_id.clone();

    let next = page.reload();
    let options = FidesOptions {
        fides_clear_cookie: true,
        ..options()
    };
    let mut fides = next.fides_with(options, &["en"], ConsentContext::default());
    fides.init(Some(banner_experience())).await.unwrap();
    assert_eq!(fides.ui_state(), UiState::BannerOpen);
    assert!(fides.consent().is_empty());
    assert_ne!(fides.cookie().identity.fides_user_device_id, first_device);
}
