use indexmap::IndexMap;
use serde_json::{json, Value};

use super::args::{CallRejection, CapabilityCall, CapabilityKind};
use crate::conversation::ResolvedCall;

#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityDescriptor {
    pub kind: CapabilityKind,
    pub description: String,
    /// JSON Schema of the arguments, as advertised to the completion service.
    pub parameters: Value,
}

impl CapabilityDescriptor {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn validate(&self, args: &Value) -> Result<CapabilityCall, CallRejection> {
        self.kind.validate(args)
    }

    pub fn tool_definition(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Ordered, unique-by-name set of capabilities. Order is significant: it is
/// the execution and UI publication order of every cycle.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    capabilities: IndexMap<String, CapabilityDescriptor>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CapabilityRegistry {
    pub fn new(descriptors: Option<Vec<CapabilityDescriptor>>) -> Self {
        let descriptors = descriptors.unwrap_or_else(default_capabilities);
        let mut capabilities = IndexMap::new();
        for descriptor in descriptors {
            capabilities.insert(descriptor.name().to_string(), descriptor);
        }
        Self { capabilities }
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.capabilities.get(name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.capabilities.get_index_of(name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.capabilities.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.capabilities.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn validate(&self, call: &ResolvedCall) -> Result<CapabilityCall, CallRejection> {
        let Some(descriptor) = self.get(&call.name) else {
            return Err(CallRejection::UnknownCapability {
                name: call.name.clone(),
            });
        };
        descriptor.validate(&call.args)
    }

    pub fn tool_definitions(&self) -> Vec<Value> {
        self.descriptors()
            .map(CapabilityDescriptor::tool_definition)
            .collect()
    }
}

fn default_capabilities() -> Vec<CapabilityDescriptor> {
    let mut list = Vec::new();

    let mut insert = |kind: CapabilityKind, description: &str, parameters: Value| {
        list.push(CapabilityDescriptor {
            kind,
            description: description.to_string(),
            parameters,
        });
    };

    insert(
        CapabilityKind::StockPrice,
        "A tool to get the stock price of a company",
        json!({
            "type": "object",
            "properties": {
                "ticker": {
                    "type": "string",
                    "description": "The ticker symbol of the company",
                }
            },
            "required": ["ticker"],
            "additionalProperties": false,
        }),
    );
    insert(
        CapabilityKind::Portfolio,
        "A tool to get the user's portfolio details. Only call this tool if the user requests their portfolio details.",
        json!({
            "type": "object",
            "properties": {
                "get_portfolio": {
                    "type": "boolean",
                    "description": "Should be true.",
                }
            },
            "required": ["get_portfolio"],
            "additionalProperties": false,
        }),
    );

    list
}
