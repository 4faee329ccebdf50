//! Outbound events for the host page.
//!
//! The vocabulary is fixed by [`FidesEventType`]. Every event carries a copy
//! of the consent cookie as it is at dispatch time, plus optional details
//! about what triggered it. Hosts subscribe through an [`EventBus`]; in a
//! browser that is a `CustomEvent` on `window`, here it is a port.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{consent::ConsentMethod, cookie::FidesCookie};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FidesEventType {
    FidesInitializing,
    FidesInitialized,
    FidesUpdating,
    FidesUpdated,
    #[serde(rename = "FidesUIShown")]
    FidesUiShown,
    #[serde(rename = "FidesUIChanged")]
    FidesUiChanged,
    FidesModalClosed,
}

impl FidesEventType {
    /// The DOM event name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FidesInitializing => "FidesInitializing",
            Self::FidesInitialized => "FidesInitialized",
            Self::FidesUpdating => "FidesUpdating",
            Self::FidesUpdated => "FidesUpdated",
            Self::FidesUiShown => "FidesUIShown",
            Self::FidesUiChanged => "FidesUIChanged",
            Self::FidesModalClosed => "FidesModalClosed",
        }
    }
}

impl std::fmt::Display for FidesEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the visitor touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTrigger {
    /// `toggle` or `button`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    /// `fides` for runtime UI, `external` for host-driven calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl EventTrigger {
    pub fn button(label: impl Into<String>) -> Self {
        Self {
            kind: "button".to_string(),
            label: Some(label.into()),
            checked: None,
            origin: Some("fides".to_string()),
        }
    }

    pub fn toggle(label: impl Into<String>, checked: bool) -> Self {
        Self {
            kind: "toggle".to_string(),
            label: Some(label.into()),
            checked: Some(checked),
            origin: Some("fides".to_string()),
        }
    }

    pub fn external() -> Self {
        Self {
            kind: "script".to_string(),
            label: None,
            checked: None,
            origin: Some("external".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FidesEventExtraDetails {
    /// `banner`, `modal` or `tcf_overlay`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<EventTrigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_method: Option<ConsentMethod>,
}

impl FidesEventExtraDetails {
    pub fn serving(component: impl Into<String>) -> Self {
        Self {
            serving_component: Some(component.into()),
            ..Self::default()
        }
    }

    pub fn with_trigger(mut self, trigger: EventTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_consent_method(mut self, method: ConsentMethod) -> Self {
        self.consent_method = Some(method);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FidesEventDetail {
    #[serde(flatten)]
    pub cookie: FidesCookie,
    #[serde(rename = "extraDetails", default, skip_serializing_if = "Option::is_none")]
    pub extra_details: Option<FidesEventExtraDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FidesEvent {
    #[serde(rename = "type")]
    pub event_type: FidesEventType,
    pub detail: FidesEventDetail,
    pub timestamp: DateTime<Utc>,
}

impl FidesEvent {
    pub fn new(event_type: FidesEventType, cookie: &FidesCookie) -> Self {
        Self {
            event_type,
            detail: FidesEventDetail {
                cookie: cookie.clone(),
                extra_details: None,
            },
            timestamp: Utc::now(),
        }
    }

    pub fn with_extra_details(mut self, extra: FidesEventExtraDetails) -> Self {
        self.detail.extra_details = Some(extra);
        self
    }

    pub fn serving_component(&self) -> Option<&str> {
        self.detail
            .extra_details
            .as_ref()
            .and_then(|e| e.serving_component.as_deref())
    }
}

/// Where events go.
pub trait EventBus: Send + Sync {
    fn dispatch(&self, event: FidesEvent);
}

/// Fan-out to any number of async subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    tx: broadcast::Sender<FidesEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FidesEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus for BroadcastEventBus {
    fn dispatch(&self, event: FidesEvent) {
        let name = event.event_type;
        if self.tx.send(event).is_err() {
            debug!("No subscribers for {name}");
        }
    }
}

/// Keeps every event, in order.
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<FidesEvent>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FidesEvent> {
        self.events.lock().clone()
    }

    pub fn types(&self) -> Vec<FidesEventType> {
        self.events.lock().iter().map(|e| e.event_type).collect()
    }

    pub fn count(&self, event_type: FidesEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn last(&self, event_type: FidesEventType) -> Option<FidesEvent> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|e| e.event_type == event_type)
            .cloned()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventBus for RecordingEventBus {
    fn dispatch(&self, event: FidesEvent) {
        self.events.lock().push(event);
    }
}

/// Builds and dispatches one event.
pub fn dispatch_fides_event(
    bus: &dyn EventBus,
    event_type: FidesEventType,
    cookie: &FidesCookie,
    extra_details: Option<FidesEventExtraDetails>,
) {
    debug!("Dispatching event {event_type}");
    let mut event = FidesEvent::new(event_type, cookie);
    event.detail.extra_details = extra_details;
    bus.dispatch(event);
}
