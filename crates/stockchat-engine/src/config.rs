use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_ALPHAVANTAGE_API_BASE: &str = "https://www.alphavantage.co";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Key/value lookup over the process environment, falling back to values
/// loaded from a `.env` file. Process variables always win.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    dotenv: HashMap<String, String>,
    use_process: bool,
}

impl EnvSource {
    pub fn process() -> Self {
        Self {
            dotenv: HashMap::new(),
            use_process: true,
        }
    }

    pub fn with_dotenv(path: &Path) -> Self {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        Self {
            dotenv: parse_dotenv(&content),
            use_process: true,
        }
    }

    /// Isolated source that ignores the process environment.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            dotenv: pairs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            use_process: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let from_process = if self.use_process {
            env::var(key).ok()
        } else {
            None
        };
        from_process
            .or_else(|| self.dotenv.get(key).cloned())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn first_non_empty(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.get(key))
    }
}

pub fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim().to_string();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
            {
                value = value[1..value.len() - 1].to_string();
            }
        }
        vars.insert(key.to_string(), value);
    }
    vars
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub quotes_api_base: String,
    pub quotes_api_key: Option<String>,
    pub langgraph_api_key: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            quotes_api_base: DEFAULT_ALPHAVANTAGE_API_BASE.to_string(),
            quotes_api_key: None,
            langgraph_api_key: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_source(&EnvSource::process())
    }

    pub fn from_source(source: &EnvSource) -> Self {
        let defaults = Self::default();
        let request_timeout = source
            .get("STOCKCHAT_REQUEST_TIMEOUT_SECS")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(defaults.request_timeout);
        Self {
            model: source
                .get("STOCKCHAT_MODEL")
                .unwrap_or(defaults.model),
            api_base: normalize_api_base(
                &source
                    .first_non_empty(&["OPENAI_API_BASE", "OPENAI_BASE_URL"])
                    .unwrap_or(defaults.api_base),
            ),
            api_key: source.first_non_empty(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"]),
            request_timeout,
            quotes_api_base: source
                .get("ALPHAVANTAGE_API_BASE")
                .map(|raw| raw.trim_end_matches('/').to_string())
                .unwrap_or(defaults.quotes_api_base),
            quotes_api_key: source.get("ALPHAVANTAGE_API_KEY"),
            langgraph_api_key: source.get("LANGGRAPH_API_KEY"),
        }
    }
}

/// Trims trailing slashes and appends `/v1` when the base URL has no path.
pub fn normalize_api_base(raw: &str) -> String {
    let mut base = raw.trim().trim_end_matches('/').to_string();
    if let Ok(parsed) = reqwest::Url::parse(&base) {
        if parsed.path().trim().is_empty() || parsed.path() == "/" {
            base = format!("{base}/v1");
        }
    }
    base.trim_end_matches('/').to_string()
}
