use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use stockchat_contracts::capabilities::{CapabilityDescriptor, PORTFOLIO, STOCK_PRICE};
use stockchat_contracts::conversation::{
    ContentPart, Message, MessageContent, ResolvedCall, Role,
};

use crate::config::EngineConfig;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<CapabilityDescriptor>,
    pub temperature: f64,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Assistant message; resolved calls ride along in `tool_calls`.
    pub message: Message,
    pub model: String,
}

pub trait CompletionService: Send + Sync {
    fn name(&self) -> &str;
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;
}

/// OpenAI-compatible `/chat/completions` client with function tools.
pub struct OpenAiChatCompletions {
    api_base: String,
    api_key: Option<String>,
    model: String,
    http: HttpClient,
}

impl OpenAiChatCompletions {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build completion HTTP client")?;
        Ok(Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl CompletionService for OpenAiChatCompletions {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("OPENAI_API_KEY (or OPENAI_API_KEY_BACKUP) is not set");
        };
        let endpoint = format!("{}/chat/completions", self.api_base);
        let payload = chat_completion_payload(&self.model, request);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .with_context(|| format!("openai request to {endpoint} failed"))?;
        let parsed = response_json_or_error("openai", response)?;
        let message = parse_chat_completion(&parsed)?;
        let model = parsed
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.model)
            .to_string();
        Ok(CompletionResponse { message, model })
    }
}

pub(crate) fn chat_completion_payload(model: &str, request: &CompletionRequest) -> Value {
    let mut messages = vec![json!({
        "role": "system",
        "content": request.system,
    })];
    messages.extend(request.messages.iter().filter_map(wire_message));

    let mut payload = json!({
        "model": model,
        "temperature": request.temperature,
        "messages": messages,
    });
    if !request.tools.is_empty() {
        payload["tools"] = Value::Array(
            request
                .tools
                .iter()
                .map(CapabilityDescriptor::tool_definition)
                .collect(),
        );
    }
    payload
}

/// Earlier assistant turns are replayed as text only: their calls were
/// already rendered and have no tool results to pair with.
fn wire_message(message: &Message) -> Option<Value> {
    let content = match (message.role, &message.content) {
        (Role::Tool, _) => return None,
        (Role::Assistant, content) => Value::String(content.content_string()),
        (_, MessageContent::Text(text)) => Value::String(text.clone()),
        (_, MessageContent::Parts(parts)) => Value::Array(parts.iter().map(wire_part).collect()),
    };
    Some(json!({
        "role": message.role.as_str(),
        "content": content,
    }))
}

fn wire_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"type": "text", "text": text}),
        ContentPart::ImageUrl { image_url } => json!({
            "type": "image_url",
            "image_url": {"url": image_url.url()},
        }),
    }
}

pub(crate) fn parse_chat_completion(response: &Value) -> Result<Message> {
    let Some(message) = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
    else {
        bail!("openai response has no choices[0].message");
    };

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|row| {
            let function = row.get("function")?;
            let name = function.get("name").and_then(Value::as_str)?.to_string();
            let raw_args = function
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");
            // Unparseable arguments are kept verbatim and fail validation later.
            let args = serde_json::from_str(raw_args)
                .unwrap_or_else(|_| Value::String(raw_args.to_string()));
            Some(ResolvedCall {
                id: row.get("id").and_then(Value::as_str).map(str::to_string),
                name,
                args,
            })
        })
        .collect();

    Ok(Message::assistant(text, tool_calls))
}

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(reqwest::Error::without_url)
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

/// Offline resolver for demos: mentions of a portfolio resolve to
/// `portfolio`, ticker-looking tokens (`AAPL`, `$msft`) to `stock-price`.
#[derive(Debug, Clone, Default)]
pub struct DryrunCompletion;

impl CompletionService for DryrunCompletion {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let text = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(Message::content_string)
            .unwrap_or_default();
        let offered = |name: &str| request.tools.iter().any(|tool| tool.name() == name);

        let mut calls = Vec::new();
        if offered(STOCK_PRICE) {
            if let Some(ticker) = find_ticker(&text) {
                calls.push(ResolvedCall::new(STOCK_PRICE, json!({ "ticker": ticker })));
            }
        }
        if offered(PORTFOLIO) && text.to_ascii_lowercase().contains("portfolio") {
            calls.push(ResolvedCall::new(PORTFOLIO, json!({ "get_portfolio": true })));
        }

        let reply = if calls.is_empty() {
            "I can look up a stock price or show your portfolio. Which would you like?"
        } else {
            ""
        };
        Ok(CompletionResponse {
            message: Message::assistant(reply, calls),
            model: "dryrun-dispatch-1".to_string(),
        })
    }
}

fn find_ticker(text: &str) -> Option<String> {
    text.split_whitespace().find_map(|token| {
        let (explicit, body) = match token.strip_prefix('$') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        let body = body
            .split(|ch: char| !ch.is_ascii_alphabetic())
            .next()
            .unwrap_or_default();
        let plausible = (1..=5).contains(&body.len())
            && (explicit || (body.len() >= 2 && body.chars().all(|ch| ch.is_ascii_uppercase())));
        plausible.then(|| body.to_ascii_uppercase())
    })
}
