use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaObject {
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Declared input/output shape of a hosted agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSchema {
    #[serde(default)]
    pub input_schema: Option<SchemaObject>,
    #[serde(default)]
    pub output_schema: Option<SchemaObject>,
}

impl AgentSchema {
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Whether the agent's declared input accepts an image, judged by property
/// names and by image-flavored type/format/encoding markers.
pub fn supports_image_input(schema: Option<&AgentSchema>) -> bool {
    let Some(input) = schema.and_then(|schema| schema.input_schema.as_ref()) else {
        return false;
    };
    input
        .properties
        .iter()
        .any(|(name, property)| is_image_property(name, property))
}

fn is_image_property(name: &str, property: &Value) -> bool {
    if name.contains("image") {
        return true;
    }
    let field = |key: &str| property.get(key).and_then(Value::as_str);
    if field("format") == Some("image") || field("type") == Some("image") {
        return true;
    }
    if field("type") != Some("string") {
        return false;
    }
    field("format") == Some("base64")
        || field("contentEncoding") == Some("base64")
        || field("contentMediaType")
            .map(|value| value.starts_with("image/"))
            .unwrap_or(false)
}
