use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Diagnostics for dispatch cycles, appended to `events.jsonl` one compact
/// object per line. Every line is stamped with the conversation thread it
/// belongs to; the caller payload is merged last.
///
/// A disabled log still builds and returns the event but writes nothing.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: Option<PathBuf>,
    thread_id: String,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, thread_id: impl Into<String>) -> Self {
        Self::build(Some(path.into()), thread_id.into())
    }

    pub fn disabled(thread_id: impl Into<String>) -> Self {
        Self::build(None, thread_id.into())
    }

    fn build(path: Option<PathBuf>, thread_id: String) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                path,
                thread_id,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn thread_id(&self) -> &str {
        &self.inner.thread_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "thread_id".to_string(),
            Value::String(self.inner.thread_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        let Some(path) = self.inner.path.as_ref() else {
            return Ok(Value::Object(event));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    /// Like [`EventLog::emit`] but never fails; diagnostics must not break the
    /// operation they describe.
    pub fn note(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.emit(event_type, payload) {
            eprintln!("stockchat: failed to record {event_type} event: {err:#}");
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    fn payload(value: Value) -> EventPayload {
        value.as_object().cloned().unwrap_or_default()
    }

    fn read_rows(path: &Path) -> anyhow::Result<Vec<Value>> {
        let mut rows = Vec::new();
        for line in fs::read_to_string(path)?.lines() {
            rows.push(serde_json::from_str::<Value>(line)?);
        }
        Ok(rows)
    }

    #[test]
    fn cycle_events_are_stamped_with_thread_and_time() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::new(&path, "thread-aapl");

        let emitted = log.emit(
            "intent_resolved",
            payload(json!({"model": "gpt-4o-mini", "tool_calls": ["stock-price"]})),
        )?;

        let rows = read_rows(&path)?;
        assert_eq!(rows, vec![emitted]);
        assert_eq!(rows[0]["type"], json!("intent_resolved"));
        assert_eq!(rows[0]["thread_id"], json!("thread-aapl"));
        assert_eq!(rows[0]["tool_calls"], json!(["stock-price"]));
        DateTime::parse_from_rfc3339(rows[0]["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn clones_share_one_file_in_emit_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let log = EventLog::new(&path, "thread-1");
        let dispatcher_side = log.clone();

        log.note("dispatch_started", payload(json!({"messages": 1})));
        dispatcher_side.note(
            "capability_call_dropped",
            payload(json!({"capability": "execute-trade", "reason": "unknown_capability"})),
        );
        log.note("dispatch_finished", payload(json!({"ui": []})));

        let kinds: Vec<String> = read_rows(&path)?
            .iter()
            .filter_map(|row| row["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(
            kinds,
            vec!["dispatch_started", "capability_call_dropped", "dispatch_finished"]
        );
        Ok(())
    }

    #[test]
    fn caller_payload_wins_over_defaults() -> anyhow::Result<()> {
        let log = EventLog::disabled("thread-1");
        let emitted = log.emit(
            "agent_schema_fetch_failed",
            payload(json!({"thread_id": "schema-check"})),
        )?;
        assert_eq!(emitted["type"], json!("agent_schema_fetch_failed"));
        assert_eq!(emitted["thread_id"], json!("schema-check"));
        Ok(())
    }

    #[test]
    fn disabled_log_writes_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = EventLog::disabled("thread-1");
        log.note("dispatch_started", EventPayload::new());
        assert!(log.path().is_none());
        assert_eq!(log.thread_id(), "thread-1");
        assert_eq!(fs::read_dir(temp.path())?.count(), 0);
        Ok(())
    }
}
