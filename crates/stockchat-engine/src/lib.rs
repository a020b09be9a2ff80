pub mod agent;
pub mod completion;
pub mod config;
pub mod dispatcher;
pub mod imaging;
pub mod quotes;

use serde_json::{Map, Value};

pub use agent::fetch_agent_schema;
pub use completion::{
    CompletionRequest, CompletionResponse, CompletionService, DryrunCompletion,
    OpenAiChatCompletions,
};
pub use config::{EngineConfig, EnvSource};
pub use dispatcher::{Dispatcher, STOCKBROKER_INSTRUCTION};
pub use imaging::{prepare_image, ProcessedImage};
pub use quotes::{AlphaVantageQuotes, Quote, QuoteSource, StaticQuotes};

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return completion::truncate_text(&err.to_string(), max_chars);
    }
    completion::truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
