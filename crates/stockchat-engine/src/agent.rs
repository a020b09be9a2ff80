use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::json;
use stockchat_contracts::agent_schema::AgentSchema;
use stockchat_contracts::events::EventLog;

use crate::completion::response_json_or_error;
use crate::{error_chain_text, map_object};

/// Fetches an assistant's declared schemas from a LangGraph server.
/// Any failure is recorded and reported as `None`; callers fall back to
/// "no image support".
pub fn fetch_agent_schema(
    api_url: &str,
    api_key: Option<&str>,
    assistant_id: &str,
    timeout: Duration,
    events: &EventLog,
) -> Option<AgentSchema> {
    match try_fetch_agent_schema(api_url, api_key, assistant_id, timeout) {
        Ok(schema) => Some(schema),
        Err(err) => {
            events.note(
                "agent_schema_fetch_failed",
                map_object(json!({
                    "assistant_id": assistant_id,
                    "error": error_chain_text(&err, 512),
                })),
            );
            None
        }
    }
}

fn try_fetch_agent_schema(
    api_url: &str,
    api_key: Option<&str>,
    assistant_id: &str,
    timeout: Duration,
) -> Result<AgentSchema> {
    if assistant_id.trim().is_empty() {
        bail!("assistant id is empty");
    }
    let endpoint = schema_endpoint(api_url, assistant_id);
    let http = HttpClient::builder()
        .timeout(timeout)
        .build()
        .context("failed to build agent schema HTTP client")?;
    let mut request = http.get(&endpoint);
    if let Some(key) = api_key {
        request = request.header("x-api-key", key);
    }
    let response = request
        .send()
        .with_context(|| format!("agent schema request to {endpoint} failed"))?;
    let parsed = response_json_or_error("langgraph", response)?;
    AgentSchema::from_value(&parsed)
        .with_context(|| format!("unexpected agent schema payload from {endpoint}"))
}

fn schema_endpoint(api_url: &str, assistant_id: &str) -> String {
    format!(
        "{}/assistants/{}/schemas",
        api_url.trim().trim_end_matches('/'),
        assistant_id.trim()
    )
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[test]
    fn schema_endpoint_trims_slashes() {
        assert_eq!(
            schema_endpoint("http://localhost:2024/", " agent "),
            "http://localhost:2024/assistants/agent/schemas"
        );
    }

    #[test]
    fn fetch_failure_is_recorded_and_returns_none() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let events = EventLog::new(&path, "thread-1");

        let schema = fetch_agent_schema(
            "http://127.0.0.1:9",
            None,
            "",
            Duration::from_millis(200),
            &events,
        );
        assert!(schema.is_none());

        let raw = std::fs::read_to_string(&path)?;
        let row: Value = serde_json::from_str(raw.lines().next().unwrap_or("{}"))?;
        assert_eq!(row["type"], Value::String("agent_schema_fetch_failed".to_string()));
        assert_eq!(row["error"], Value::String("assistant id is empty".to_string()));
        Ok(())
    }
}
