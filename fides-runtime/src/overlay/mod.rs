//! Mounting the overlay into the host document.
//!
//! The controller owns the one render tree the runtime puts on the page. It
//! waits for the document to become interactive, finds (or in embed mode
//! waits for) its parent element, and on re-initialization tears the old tree
//! down before mounting a new one, so a page that initializes twice still
//! ends up with a single banner.

pub mod memory;

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tracing::{debug, error};

use crate::{error::OverlayError, experience::ComponentType, render::RenderNode};

pub use memory::MemoryDocument;

pub const OVERLAY_ID: &str = "fides-overlay";
pub const EMBED_CONTAINER_ID: &str = "fides-embed-container";

/// `document.readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

/// The page the runtime is embedded in.
pub trait HostDocument: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    fn subscribe_ready_state(&self) -> watch::Receiver<ReadyState>;

    fn has_element(&self, id: &str) -> bool;

    /// Appends an empty `<div id=..>` to the body.
    fn create_element(&self, id: &str);

    /// Replaces the content of `parent_id`; `None` empties it.
    fn render(&self, parent_id: &str, tree: Option<RenderNode>) -> Result<(), OverlayError>;

    /// Sets the text of the element with `id` inside a rendered tree.
    fn set_text(&self, id: &str, text: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayOptions {
    /// Render into the host's `fides-embed-container` instead of a floating
    /// overlay.
    pub embed: bool,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            embed: false,
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayState {
    Uninitialized,
    WaitingForDom,
    Mounted { parent: String },
    Unmounted,
}

pub struct OverlayController {
    document: Arc<dyn HostDocument>,
    options: OverlayOptions,
    state: OverlayState,
}

impl OverlayController {
    pub fn new(document: Arc<dyn HostDocument>, options: OverlayOptions) -> Self {
        Self {
            document,
            options,
            state: OverlayState::Uninitialized,
        }
    }

    pub fn state(&self) -> &OverlayState {
        &self.state
    }

    pub fn document(&self) -> &Arc<dyn HostDocument> {
        &self.document
    }

    pub fn is_mounted(&self) -> bool {
        matches!(self.state, OverlayState::Mounted { .. })
    }

    /// Mounts `tree` for `component`.
    ///
    /// Returns `false` without touching the page when the component has no
    /// UI. An existing mount is torn down first.
    ///
    /// # Errors
    ///
    /// Fails once, after logging, when the document closes while loading or
    /// the embed container never appears.
    pub async fn mount(&mut self, component: ComponentType, tree: RenderNode) -> Result<bool, OverlayError> {
        if !component.is_renderable() {
            debug!("Component {} has no overlay, skipping mount", component.as_str());
            return Ok(false);
        }
        if self.is_mounted() {
            self.unmount()?;
        }

        self.state = OverlayState::WaitingForDom;
        let mounted = match self.wait_and_locate().await {
            Ok(parent) => self.document.render(&parent, Some(tree)).map(|()| parent),
            Err(e) => Err(e),
        };
        let parent = match mounted {
            Ok(parent) => parent,
            Err(e) => {
                error!("Unable to mount the consent overlay: {e}");
                self.state = OverlayState::Uninitialized;
                return Err(e);
            }
        };
        debug!("Overlay mounted into #{parent}");
        self.state = OverlayState::Mounted { parent };
        Ok(true)
    }

    /// Re-renders into the current mount.
    pub fn update(&self, tree: RenderNode) -> Result<(), OverlayError> {
        match &self.state {
            OverlayState::Mounted { parent } => self.document.render(parent, Some(tree)),
            _ => Err(OverlayError::NotMounted),
        }
    }

    /// Renders an empty tree into the current parent. A no-op when nothing is
    /// mounted.
    pub fn unmount(&mut self) -> Result<(), OverlayError> {
        if let OverlayState::Mounted { parent } = &self.state {
            self.document.render(parent, None)?;
            debug!("Overlay unmounted from #{parent}");
            self.state = OverlayState::Unmounted;
        }
        Ok(())
    }

    async fn wait_and_locate(&self) -> Result<String, OverlayError> {
        wait_for_interactive(self.document.as_ref()).await?;
        if self.options.embed {
            wait_for_element(self.document.as_ref(), EMBED_CONTAINER_ID, &self.options).await?;
            return Ok(EMBED_CONTAINER_ID.to_string());
        }
        if !self.document.has_element(OVERLAY_ID) {
            self.document.create_element(OVERLAY_ID);
        }
        Ok(OVERLAY_ID.to_string())
    }
}

/// Resolves once the document has left `Loading`. Waits for `Interactive`,
/// not `Complete`.
pub async fn wait_for_interactive(document: &dyn HostDocument) -> Result<(), OverlayError> {
    if document.ready_state() != ReadyState::Loading {
        return Ok(());
    }
    debug!("Document is loading, waiting for it to become interactive");
    let mut rx = document.subscribe_ready_state();
    rx.wait_for(|state| *state != ReadyState::Loading)
        .await
        .map(|_| ())
        .map_err(|_| OverlayError::DocumentClosed)
}

/// Polls for an element the host may insert later, doubling the delay up to
/// `max_delay`.
pub async fn wait_for_element(
    document: &dyn HostDocument,
    id: &str,
    options: &OverlayOptions,
) -> Result<(), OverlayError> {
    let mut delay = options.initial_delay;
    for attempt in 1..=options.max_attempts {
        if document.has_element(id) {
            return Ok(());
        }
        debug!("#{id} not found (attempt {attempt}), retrying in {delay:?}");
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(options.max_delay);
    }
    if document.has_element(id) {
        return Ok(());
    }
    Err(OverlayError::ContainerNotFound {
        id: id.to_string(),
        attempts: options.max_attempts,
    })
}

/// Sets a status message so that screen readers announce it, even when it
/// equals the previous one.
pub async fn announce(document: &dyn HostDocument, id: &str, message: &str) {
    document.set_text(id, "");
    tokio::task::yield_now().await;
    document.set_text(id, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::BANNER_ID;

    fn banner_tree() -> RenderNode {
        RenderNode::new("div").with_child(RenderNode::new("div").with_id(BANNER_ID))
    }

    #[tokio::test]
    async fn mounts_into_created_overlay_root() {
        let doc = Arc::new(MemoryDocument::new(ReadyState::Complete));
        let mut overlay = OverlayController::new(doc.clone(), OverlayOptions::default());
        assert!(overlay.mount(ComponentType::BannerAndModal, banner_tree()).await.unwrap());
        assert!(doc.has_element(OVERLAY_ID));
        assert_eq!(doc.count_id(BANNER_ID), 1);
        assert_eq!(
            overlay.state(),
            &OverlayState::Mounted {
                parent: OVERLAY_ID.into()
            }
        );
    }

    struct RejectingDocument(MemoryDocument);

    impl HostDocument for RejectingDocument {
        fn ready_state(&self) -> ReadyState {
            self.0.ready_state()
        }

        fn subscribe_ready_state(&self) -> watch::Receiver<ReadyState> {
            self.0.subscribe_ready_state()
        }

        fn has_element(&self, id: &str) -> bool {
            self.0.has_element(id)
        }

        fn create_element(&self, id: &str) {
            self.0.create_element(id);
        }

        fn render(&self, _parent_id: &str, _tree: Option<RenderNode>) -> Result<(), OverlayError> {
            Err(OverlayError::DocumentClosed)
        }

        fn set_text(&self, id: &str, text: &str) {
            self.0.set_text(id, text);
        }
    }

    #[tokio::test]
    async fn failed_render_resets_the_state() {
        let doc = Arc::new(RejectingDocument(MemoryDocument::new(ReadyState::Complete)));
        let mut overlay = OverlayController::new(doc, OverlayOptions::default());
        assert_eq!(
            overlay.mount(ComponentType::BannerAndModal, banner_tree()).await,
            Err(OverlayError::DocumentClosed)
        );
        assert_eq!(overlay.state(), &OverlayState::Uninitialized);
        assert!(!overlay.is_mounted());
    }

    #[tokio::test]
    async fn headless_experiences_never_mount() {
        let doc = Arc::new(MemoryDocument::new(ReadyState::Complete));
        let mut overlay = OverlayController::new(doc.clone(), OverlayOptions::default());
        assert!(!overlay.mount(ComponentType::Headless, banner_tree()).await.unwrap());
        assert!(!doc.has_element(OVERLAY_ID));
        assert_eq!(overlay.state(), &OverlayState::Uninitialized);
    }

    #[tokio::test]
    async fn remount_leaves_a_single_tree() {
        let doc = Arc::new(MemoryDocument::new(ReadyState::Interactive));
        let mut overlay = OverlayController::new(doc.clone(), OverlayOptions::default());
        overlay.mount(ComponentType::BannerAndModal, banner_tree()).await.unwrap();
        overlay.mount(ComponentType::BannerAndModal, banner_tree()).await.unwrap();
        assert_eq!(doc.count_id(BANNER_ID), 1);
        assert_eq!(doc.render_calls(), vec![true, false, true]);
    }

    #[tokio::test]
    async fn waits_for_interactive_not_complete() {
        let doc = Arc::new(MemoryDocument::new(ReadyState::Loading));
        let mut overlay = OverlayController::new(doc.clone(), OverlayOptions::default());

        let becomes_interactive = async {
            tokio::task::yield_now().await;
            assert_eq!(doc.count_id(BANNER_ID), 0);
            doc.set_ready_state(ReadyState::Interactive);
        };
        let (mounted, ()) = tokio::join!(
            overlay.mount(ComponentType::BannerAndModal, banner_tree()),
            becomes_interactive
        );
        assert!(mounted.unwrap());
        assert_eq!(doc.count_id(BANNER_ID), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn embed_mode_polls_for_late_container() {
        let doc = Arc::new(MemoryDocument::new(ReadyState::Complete));
        let mut overlay = OverlayController::new(
            doc.clone(),
            OverlayOptions {
                embed: true,
                ..OverlayOptions::default()
            },
        );
        let host = doc.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            host.create_element(EMBED_CONTAINER_ID);
        });

        assert!(overlay.mount(ComponentType::Modal, banner_tree()).await.unwrap());
        assert!(!doc.has_element(OVERLAY_ID));
        assert_eq!(doc.count_id(BANNER_ID), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_embed_container_fails_once() {
        let doc = Arc::new(MemoryDocument::new(ReadyState::Complete));
        let options = OverlayOptions {
            embed: true,
            max_attempts: 4,
            ..OverlayOptions::default()
        };
        let mut overlay = OverlayController::new(doc.clone(), options);
        let started = tokio::time::Instant::now();
        let err = overlay
            .mount(ComponentType::BannerAndModal, banner_tree())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OverlayError::ContainerNotFound {
                id: EMBED_CONTAINER_ID.into(),
                attempts: 4
            }
        );
        // 100 + 200 + 400 + 800 ms
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1500) && elapsed < Duration::from_millis(1600));
        assert!(!overlay.is_mounted());
    }

    #[tokio::test]
    async fn closed_document_is_an_error() {
        let doc = Arc::new(MemoryDocument::new(ReadyState::Loading));
        doc.close();
        assert_eq!(
            wait_for_interactive(doc.as_ref()).await,
            Err(OverlayError::DocumentClosed)
        );
    }

    #[tokio::test]
    async fn announce_clears_before_setting() {
        let doc = Arc::new(MemoryDocument::new(ReadyState::Complete));
        let mut overlay = OverlayController::new(doc.clone(), OverlayOptions::default());
        let tree = RenderNode::new("div").with_child(RenderNode::new("div").with_id("live"));
        overlay.mount(ComponentType::Modal, tree).await.unwrap();

        announce(doc.as_ref(), "live", "Saved").await;
        announce(doc.as_ref(), "live", "Saved").await;
        assert_eq!(doc.text_history("live"), vec!["", "Saved", "", "Saved"]);
    }

    #[test]
    fn update_requires_a_mount() {
        let doc = Arc::new(MemoryDocument::new(ReadyState::Complete));
        let overlay = OverlayController::new(doc, OverlayOptions::default());
        assert_eq!(overlay.update(banner_tree()), Err(OverlayError::NotMounted));
    }
}
