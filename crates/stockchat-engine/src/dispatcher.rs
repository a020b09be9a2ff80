use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use stockchat_contracts::capabilities::{plan_calls, CallPlan, CapabilityCall, CapabilityRegistry};
use stockchat_contracts::conversation::ConversationState;
use stockchat_contracts::dispatch::{merge_state, DispatchResult};
use stockchat_contracts::events::EventLog;
use stockchat_contracts::ui::{UiEventPublisher, UiPayload, UiSnapshot};

use crate::completion::{CompletionRequest, CompletionResponse, CompletionService};
use crate::quotes::{Quote, QuoteSource};
use crate::{error_chain_text, map_object};

pub const STOCKBROKER_INSTRUCTION: &str =
    "You are a stockbroker agent that uses tools to get the stock price of a company";

/// The tool-dispatch node: resolve intent, run capabilities, publish UI,
/// merge. Holds no per-cycle state, so one instance serves any number of
/// conversations.
pub struct Dispatcher {
    completion: Box<dyn CompletionService>,
    quotes: Box<dyn QuoteSource>,
    registry: CapabilityRegistry,
    instruction: String,
    events: EventLog,
}

impl Dispatcher {
    pub fn new(
        completion: Box<dyn CompletionService>,
        quotes: Box<dyn QuoteSource>,
        events: EventLog,
    ) -> Self {
        Self {
            completion,
            quotes,
            registry: CapabilityRegistry::default(),
            instruction: STOCKBROKER_INSTRUCTION.to_string(),
            events,
        }
    }

    pub fn with_registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn completion_name(&self) -> &str {
        self.completion.name()
    }

    pub fn quote_source_name(&self) -> &str {
        self.quotes.name()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Runs one cycle. Only the completion call can fail the cycle; dropped
    /// calls and unavailable market data are recorded and absorbed.
    pub fn dispatch(&self, state: &ConversationState) -> Result<DispatchResult> {
        let started = Instant::now();
        self.events.note(
            "dispatch_started",
            map_object(json!({
                "messages": state.messages.len(),
                "completion": self.completion.name(),
            })),
        );

        let response = match self.resolve(state) {
            Ok(response) => response,
            Err(err) => {
                self.events.note(
                    "dispatch_failed",
                    map_object(json!({
                        "error": error_chain_text(&err, 512),
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    })),
                );
                return Err(err);
            }
        };
        self.events.note(
            "intent_resolved",
            map_object(json!({
                "model": response.model,
                "tool_calls": response
                    .message
                    .tool_calls
                    .iter()
                    .map(|call| call.name.clone())
                    .collect::<Vec<String>>(),
            })),
        );

        let plan = plan_calls(&self.registry, &response.message.tool_calls);
        self.record_dropped(&plan);
        let ui = self.execute(&plan.calls, response.message.id.clone());
        let result = merge_state(response.message, ui);

        self.events.note(
            "dispatch_finished",
            map_object(json!({
                "ui": result.ui.names(),
                "elapsed_ms": started.elapsed().as_millis() as u64,
            })),
        );
        Ok(result)
    }

    fn resolve(&self, state: &ConversationState) -> Result<CompletionResponse> {
        let request = CompletionRequest {
            system: self.instruction.clone(),
            messages: state.messages.clone(),
            tools: self.registry.descriptors().cloned().collect(),
            temperature: 0.0,
        };
        self.completion
            .complete(&request)
            .with_context(|| format!("intent resolution via {} failed", self.completion.name()))
    }

    fn record_dropped(&self, plan: &CallPlan) {
        for dropped in &plan.dropped {
            self.events.note(
                "capability_call_dropped",
                map_object(json!({
                    "capability": dropped.call.name,
                    "call_id": dropped.call.id,
                    "reason": dropped.rejection.reason(),
                    "detail": dropped.rejection.to_string(),
                })),
            );
        }
    }

    /// Executes already validated calls in the order given and collects one
    /// payload per capability.
    pub fn execute(&self, calls: &[CapabilityCall], message_id: Option<String>) -> UiSnapshot {
        let mut publisher = UiEventPublisher::new(message_id);
        for call in calls {
            let payload = self.run_capability(call);
            publisher.publish(call.name(), payload);
        }
        publisher.snapshot()
    }

    fn run_capability(&self, call: &CapabilityCall) -> UiPayload {
        match call {
            CapabilityCall::StockPrice(args) => self.stock_price(&args.ticker),
            CapabilityCall::Portfolio(_) => {
                self.events.note(
                    "capability_executed",
                    map_object(json!({ "capability": call.name() })),
                );
                UiPayload::new()
            }
        }
    }

    fn stock_price(&self, ticker: &str) -> UiPayload {
        let display = ticker.to_ascii_uppercase();
        match self.quotes.quote(&display) {
            Ok(quote) => {
                self.events.note(
                    "capability_executed",
                    map_object(json!({
                        "capability": "stock-price",
                        "ticker": display,
                        "source": self.quotes.name(),
                    })),
                );
                stock_price_payload(&display, &quote)
            }
            Err(err) => {
                let reason = error_chain_text(&err, 240);
                self.events.note(
                    "capability_unavailable",
                    map_object(json!({
                        "capability": "stock-price",
                        "ticker": display,
                        "source": self.quotes.name(),
                        "error": reason,
                    })),
                );
                stock_price_unavailable_payload(&display, &reason)
            }
        }
    }
}

fn stock_price_payload(ticker: &str, quote: &Quote) -> UiPayload {
    let mut payload = map_object(json!({
        "instruction": format!("The stock price of {ticker} is {:.2}", quote.price),
        "display_hint": ticker.to_ascii_lowercase(),
        "ticker": ticker,
        "price": quote.price,
    }));
    if let Some(as_of) = quote.as_of.as_ref() {
        payload.insert("as_of".to_string(), Value::String(as_of.clone()));
    }
    payload
}

fn stock_price_unavailable_payload(ticker: &str, reason: &str) -> UiPayload {
    map_object(json!({
        "instruction": format!("The stock price of {ticker} is currently unavailable"),
        "display_hint": ticker.to_ascii_lowercase(),
        "ticker": ticker,
        "unavailable": true,
        "reason": reason,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::bail;
    use chrono::Utc;
    use serde_json::json;
    use stockchat_contracts::conversation::{Message, ResolvedCall};

    use super::*;
    use crate::config::EngineConfig;
    use crate::quotes::{AlphaVantageQuotes, StaticQuotes};

    struct ScriptedCompletion {
        calls: Vec<ResolvedCall>,
        seen: Arc<Mutex<Vec<CompletionRequest>>>,
    }

    impl CompletionService for ScriptedCompletion {
        fn name(&self) -> &str {
            "scripted"
        }

        fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
            self.seen
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .push(request.clone());
            Ok(CompletionResponse {
                message: Message::assistant("", self.calls.clone()),
                model: "scripted-1".to_string(),
            })
        }
    }

    struct FailingCompletion;

    impl CompletionService for FailingCompletion {
        fn name(&self) -> &str {
            "failing"
        }

        fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse> {
            bail!("operation timed out")
        }
    }

    /// Records every lookup; prices come from an inner static table.
    struct RecordingQuotes {
        inner: StaticQuotes,
        lookups: Arc<Mutex<Vec<String>>>,
    }

    impl QuoteSource for RecordingQuotes {
        fn name(&self) -> &str {
            "recording"
        }

        fn quote(&self, ticker: &str) -> Result<Quote> {
            self.lookups
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .push(ticker.to_string());
            self.inner.quote(ticker)
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        lookups: Arc<Mutex<Vec<String>>>,
        seen: Arc<Mutex<Vec<CompletionRequest>>>,
    }

    fn harness(calls: Vec<ResolvedCall>, events: EventLog) -> Harness {
        let lookups = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(
            Box::new(ScriptedCompletion {
                calls,
                seen: seen.clone(),
            }),
            Box::new(RecordingQuotes {
                inner: StaticQuotes::new([("AAPL", 189.5), ("MSFT", 410.0)]),
                lookups: lookups.clone(),
            }),
            events,
        );
        Harness {
            dispatcher,
            lookups,
            seen,
        }
    }

    fn lookups(harness: &Harness) -> Vec<String> {
        harness.lookups.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    fn stock(ticker: &str) -> ResolvedCall {
        ResolvedCall::new("stock-price", json!({ "ticker": ticker }))
    }

    fn portfolio() -> ResolvedCall {
        ResolvedCall::new("portfolio", json!({ "get_portfolio": true }))
    }

    fn state(text: &str) -> ConversationState {
        ConversationState::new(vec![Message::user(text)])
    }

    fn event_types(path: &std::path::Path) -> anyhow::Result<Vec<Value>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .collect())
    }

    #[test]
    fn stock_price_scenario_produces_one_payload() -> anyhow::Result<()> {
        let harness = harness(vec![stock("AAPL")], EventLog::disabled("t"));
        let started = Utc::now();
        let result = harness.dispatcher.dispatch(&state("What's AAPL trading at?"))?;

        assert_eq!(result.ui.names(), vec!["stock-price"]);
        let props = &result.ui.events()[0].props;
        let instruction = props["instruction"].as_str().unwrap_or_default();
        assert!(instruction.contains("AAPL"), "instruction: {instruction}");
        assert_eq!(instruction, "The stock price of AAPL is 189.50");
        assert_eq!(props["display_hint"], json!("aapl"));
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].tool_calls.len(), 1);
        assert!(result.timestamp >= started);
        assert_eq!(
            result.ui.events()[0].message_id,
            result.messages[0].id
        );
        assert_eq!(lookups(&harness), vec!["AAPL"]);
        Ok(())
    }

    #[test]
    fn portfolio_scenario_produces_empty_payload() -> anyhow::Result<()> {
        let harness = harness(vec![portfolio()], EventLog::disabled("t"));
        let result = harness.dispatcher.dispatch(&state("show me my portfolio"))?;
        assert_eq!(result.ui.names(), vec!["portfolio"]);
        assert!(result.ui.events()[0].props.is_empty());
        assert!(lookups(&harness).is_empty());
        Ok(())
    }

    #[test]
    fn payloads_follow_registry_order_not_model_order() -> anyhow::Result<()> {
        let harness = harness(vec![portfolio(), stock("MSFT")], EventLog::disabled("t"));
        let result = harness
            .dispatcher
            .dispatch(&state("show my portfolio and MSFT"))?;
        assert_eq!(result.ui.names(), vec!["stock-price", "portfolio"]);
        assert_eq!(result.ui.len(), 2);
        Ok(())
    }

    #[test]
    fn duplicate_references_execute_once() -> anyhow::Result<()> {
        let harness = harness(
            vec![stock("AAPL"), stock("MSFT"), portfolio(), portfolio()],
            EventLog::disabled("t"),
        );
        let result = harness.dispatcher.dispatch(&state("AAPL? MSFT?"))?;
        assert_eq!(lookups(&harness), vec!["AAPL"]);
        assert_eq!(result.ui.names(), vec!["stock-price", "portfolio"]);
        assert!(result.ui.events()[0].props["instruction"]
            .as_str()
            .unwrap_or_default()
            .contains("AAPL"));
        Ok(())
    }

    #[test]
    fn invalid_and_unknown_calls_are_dropped_and_logged() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let harness = harness(
            vec![
                ResolvedCall::new("stock-price", json!({"ticker": 7})),
                ResolvedCall::new("execute-trade", json!({"ticker": "AAPL"})),
            ],
            EventLog::new(&path, "thread-1"),
        );
        let result = harness.dispatcher.dispatch(&state("buy AAPL"))?;

        assert!(result.ui.is_empty());
        assert!(lookups(&harness).is_empty());

        let rows = event_types(&path)?;
        let dropped: Vec<&Value> = rows
            .iter()
            .filter(|row| row["type"] == json!("capability_call_dropped"))
            .collect();
        assert_eq!(dropped.len(), 2);
        assert_eq!(dropped[0]["reason"], json!("invalid_arguments"));
        assert_eq!(dropped[1]["reason"], json!("unknown_capability"));
        assert_eq!(dropped[1]["capability"], json!("execute-trade"));
        Ok(())
    }

    #[test]
    fn zero_calls_still_returns_message_and_timestamp() -> anyhow::Result<()> {
        let harness = harness(Vec::new(), EventLog::disabled("t"));
        let started = Utc::now();
        let result = harness.dispatcher.dispatch(&state("hello"))?;
        assert_eq!(result.messages.len(), 1);
        assert!(result.ui.is_empty());
        assert!(result.timestamp >= started);
        Ok(())
    }

    #[test]
    fn resolver_request_pins_temperature_and_prepends_instruction() -> anyhow::Result<()> {
        let harness = harness(Vec::new(), EventLog::disabled("t"));
        harness.dispatcher.dispatch(&state("hello"))?;
        let seen = harness.seen.lock().map(|rows| rows.clone()).unwrap_or_default();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].temperature, 0.0);
        assert_eq!(seen[0].system, STOCKBROKER_INSTRUCTION);
        assert_eq!(seen[0].messages.len(), 1);
        let tools: Vec<&str> = seen[0].tools.iter().map(|tool| tool.name()).collect();
        assert_eq!(tools, vec!["stock-price", "portfolio"]);
        Ok(())
    }

    #[test]
    fn completion_failure_is_terminal() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let lookups = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(
            Box::new(FailingCompletion),
            Box::new(RecordingQuotes {
                inner: StaticQuotes::default(),
                lookups: lookups.clone(),
            }),
            EventLog::new(&path, "thread-1"),
        );

        let err = dispatcher.dispatch(&state("AAPL")).unwrap_err();
        assert!(format!("{err:#}").contains("operation timed out"));
        assert!(err.to_string().contains("intent resolution via failing failed"));
        assert!(lookups.lock().map(|rows| rows.is_empty()).unwrap_or(false));

        let rows = event_types(&path)?;
        let kinds: Vec<&str> = rows.iter().filter_map(|row| row["type"].as_str()).collect();
        assert_eq!(kinds, vec!["dispatch_started", "dispatch_failed"]);
        Ok(())
    }

    #[test]
    fn unreachable_market_data_keeps_api_key_out_of_payload_and_log() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let config = EngineConfig {
            quotes_api_base: "http://127.0.0.1:9".to_string(),
            quotes_api_key: Some("SECRET-KEY-123".to_string()),
            request_timeout: std::time::Duration::from_millis(500),
            ..EngineConfig::default()
        };
        let dispatcher = Dispatcher::new(
            Box::new(ScriptedCompletion {
                calls: vec![stock("AAPL")],
                seen: Arc::new(Mutex::new(Vec::new())),
            }),
            Box::new(AlphaVantageQuotes::new(&config)?),
            EventLog::new(&path, "thread-1"),
        );

        let result = dispatcher.dispatch(&state("AAPL?"))?;
        let props = &result.ui.events()[0].props;
        assert_eq!(props["unavailable"], json!(true));
        let reason = props["reason"].as_str().unwrap_or_default();
        assert!(reason.starts_with("alphavantage request for AAPL failed"), "{reason}");
        assert!(!reason.contains("SECRET-KEY-123"), "{reason}");
        assert!(!serde_json::to_string(&result)?.contains("SECRET-KEY-123"));

        let raw = std::fs::read_to_string(&path)?;
        assert!(raw.contains("capability_unavailable"));
        assert!(!raw.contains("SECRET-KEY-123"));
        Ok(())
    }

    #[test]
    fn unavailable_quote_becomes_payload_without_aborting() -> anyhow::Result<()> {
        let harness = harness(vec![stock("ZZZZ"), portfolio()], EventLog::disabled("t"));
        let result = harness.dispatcher.dispatch(&state("ZZZZ and my portfolio"))?;
        assert_eq!(result.ui.names(), vec!["stock-price", "portfolio"]);
        let props = &result.ui.events()[0].props;
        assert_eq!(props["unavailable"], json!(true));
        assert_eq!(
            props["instruction"],
            json!("The stock price of ZZZZ is currently unavailable")
        );
        assert_eq!(props["reason"], json!("no quote available for ZZZZ"));
        Ok(())
    }

    #[test]
    fn lowercase_ticker_is_normalized_for_lookup() -> anyhow::Result<()> {
        let harness = harness(vec![stock("aapl")], EventLog::disabled("t"));
        let result = harness.dispatcher.dispatch(&state("aapl?"))?;
        assert_eq!(lookups(&harness), vec!["AAPL"]);
        assert_eq!(result.ui.events()[0].props["ticker"], json!("AAPL"));
        Ok(())
    }

    #[test]
    fn successful_cycle_logs_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let harness = harness(vec![stock("AAPL")], EventLog::new(&path, "thread-1"));
        harness.dispatcher.dispatch(&state("AAPL"))?;

        let rows = event_types(&path)?;
        let kinds: Vec<&str> = rows.iter().filter_map(|row| row["type"].as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "dispatch_started",
                "intent_resolved",
                "capability_executed",
                "dispatch_finished"
            ]
        );
        assert_eq!(rows[3]["ui"], json!(["stock-price"]));
        Ok(())
    }
}
