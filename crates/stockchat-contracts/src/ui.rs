use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type UiPayload = Map<String, Value>;

/// One renderable fragment for the client, keyed by the capability that
/// produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiEvent {
    pub id: String,
    pub name: String,
    pub props: UiPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Frozen, ordered view of the payloads published during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UiSnapshot {
    events: Vec<UiEvent>,
}

impl UiSnapshot {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[UiEvent] {
        self.events.as_slice()
    }

    pub fn get(&self, name: &str) -> Option<&UiEvent> {
        self.events.iter().find(|event| event.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.events.iter().map(|event| event.name.as_str()).collect()
    }

    pub fn into_events(self) -> Vec<UiEvent> {
        self.events
    }
}

/// Per-cycle accumulator. A capability published twice keeps the slot of its
/// first publication and the payload of its last.
#[derive(Debug, Clone, Default)]
pub struct UiEventPublisher {
    message_id: Option<String>,
    entries: IndexMap<String, UiPayload>,
}

impl UiEventPublisher {
    pub fn new(message_id: Option<String>) -> Self {
        Self {
            message_id,
            entries: IndexMap::new(),
        }
    }

    pub fn publish(&mut self, name: &str, payload: UiPayload) -> Option<UiPayload> {
        self.entries.insert(name.to_string(), payload)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn snapshot(self) -> UiSnapshot {
        let message_id = self.message_id;
        let events = self
            .entries
            .into_iter()
            .map(|(name, props)| UiEvent {
                id: uuid::Uuid::new_v4().to_string(),
                name,
                props,
                message_id: message_id.clone(),
            })
            .collect();
        UiSnapshot { events }
    }
}
