use std::collections::BTreeMap;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::{HostDocument, ReadyState};
use crate::{error::OverlayError, render::RenderNode};

/// A host document kept in memory, for non-browser hosts and tests.
///
/// Elements are flat: each created element holds at most one rendered tree.
pub struct MemoryDocument {
    ready_tx: Mutex<Option<watch::Sender<ReadyState>>>,
    ready_rx: watch::Receiver<ReadyState>,
    elements: Mutex<BTreeMap<String, Option<RenderNode>>>,
    render_calls: Mutex<Vec<bool>>,
    text_history: Mutex<BTreeMap<String, Vec<String>>>,
}

impl MemoryDocument {
    pub fn new(state: ReadyState) -> Self {
        let (tx, rx) = watch::channel(state);
        Self {
            ready_tx: Mutex::new(Some(tx)),
            ready_rx: rx,
            elements: Mutex::new(BTreeMap::new()),
            render_calls: Mutex::new(Vec::new()),
            text_history: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_ready_state(&self, state: ReadyState) {
        if let Some(tx) = self.ready_tx.lock().as_ref() {
            tx.send_replace(state);
        }
    }

    /// Simulates the page going away before it finished loading.
    pub fn close(&self) {
        self.ready_tx.lock().take();
    }

    /// The tree currently rendered into `parent_id`.
    pub fn tree(&self, parent_id: &str) -> Option<RenderNode> {
        self.elements.lock().get(parent_id).cloned().flatten()
    }

    /// Occurrences of `id` across every rendered tree.
    pub fn count_id(&self, id: &str) -> usize {
        self.elements
            .lock()
            .values()
            .flatten()
            .map(|tree| tree.count_id(id))
            .sum()
    }

    /// One entry per `render` call: `true` for a tree, `false` for a teardown.
    pub fn render_calls(&self) -> Vec<bool> {
        self.render_calls.lock().clone()
    }

    pub fn text_history(&self, id: &str) -> Vec<String> {
        self.text_history.lock().get(id).cloned().unwrap_or_default()
    }
}

impl HostDocument for MemoryDocument {
    fn ready_state(&self) -> ReadyState {
        *self.ready_rx.borrow()
    }

    fn subscribe_ready_state(&self) -> watch::Receiver<ReadyState> {
        self.ready_rx.clone()
    }

    fn has_element(&self, id: &str) -> bool {
        self.elements.lock().contains_key(id)
    }

    fn create_element(&self, id: &str) {
        self.elements.lock().entry(id.to_string()).or_insert(None);
    }

    fn render(&self, parent_id: &str, tree: Option<RenderNode>) -> Result<(), OverlayError> {
        let mut elements = self.elements.lock();
        let slot = elements
            .get_mut(parent_id)
            .ok_or_else(|| OverlayError::ContainerNotFound {
                id: parent_id.to_string(),
                attempts: 0,
            })?;
        self.render_calls.lock().push(tree.is_some());
        *slot = tree;
        Ok(())
    }

    fn set_text(&self, id: &str, text: &str) {
        let mut elements = self.elements.lock();
        if let Some(node) = elements.values_mut().flatten().find_map(|tree| tree.find_by_id_mut(id)) {
            node.text = Some(text.to_string());
        }
        self.text_history
            .lock()
            .entry(id.to_string())
            .or_default()
            .push(text.to_string());
    }
}
