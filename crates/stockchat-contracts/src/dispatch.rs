use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::Message;
use crate::ui::UiSnapshot;

/// Output of one dispatch cycle, ready to be folded into the caller's
/// conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub messages: Vec<Message>,
    pub ui: UiSnapshot,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl DispatchResult {
    pub fn assistant_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

pub fn merge_state(message: Message, ui: UiSnapshot) -> DispatchResult {
    merge_state_at(message, ui, Utc::now())
}

pub fn merge_state_at(message: Message, ui: UiSnapshot, timestamp: DateTime<Utc>) -> DispatchResult {
    DispatchResult {
        messages: vec![message],
        ui,
        timestamp,
    }
}
