use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STOCK_PRICE: &str = "stock-price";
pub const PORTFOLIO: &str = "portfolio";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    StockPrice,
    Portfolio,
}

impl CapabilityKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::StockPrice => STOCK_PRICE,
            Self::Portfolio => PORTFOLIO,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            STOCK_PRICE => Some(Self::StockPrice),
            PORTFOLIO => Some(Self::Portfolio),
            _ => None,
        }
    }

    pub fn validate(self, args: &Value) -> Result<CapabilityCall, CallRejection> {
        match self {
            Self::StockPrice => {
                let parsed: StockPriceArgs = decode_args(self, args)?;
                let ticker = parsed.ticker.trim();
                if ticker.is_empty() {
                    return Err(CallRejection::invalid(self, "ticker must not be empty"));
                }
                Ok(CapabilityCall::StockPrice(StockPriceArgs {
                    ticker: ticker.to_string(),
                }))
            }
            Self::Portfolio => Ok(CapabilityCall::Portfolio(decode_args(self, args)?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StockPriceArgs {
    pub ticker: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortfolioArgs {
    pub get_portfolio: bool,
}

/// A capability reference whose arguments have passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityCall {
    StockPrice(StockPriceArgs),
    Portfolio(PortfolioArgs),
}

impl CapabilityCall {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::StockPrice(_) => CapabilityKind::StockPrice,
            Self::Portfolio(_) => CapabilityKind::Portfolio,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// Why a resolved call was not executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRejection {
    UnknownCapability { name: String },
    InvalidArguments { capability: &'static str, message: String },
    DuplicateReference { capability: &'static str },
}

impl CallRejection {
    fn invalid(kind: CapabilityKind, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            capability: kind.name(),
            message: message.into(),
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnknownCapability { .. } => "unknown_capability",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::DuplicateReference { .. } => "duplicate_reference",
        }
    }
}

impl fmt::Display for CallRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCapability { name } => write!(f, "unknown capability '{name}'"),
            Self::InvalidArguments {
                capability,
                message,
            } => write!(f, "invalid arguments for '{capability}': {message}"),
            Self::DuplicateReference { capability } => {
                write!(f, "'{capability}' already resolved earlier in this turn")
            }
        }
    }
}

impl std::error::Error for CallRejection {}

fn decode_args<T: serde::de::DeserializeOwned>(
    kind: CapabilityKind,
    args: &Value,
) -> Result<T, CallRejection> {
    if !args.is_object() {
        return Err(CallRejection::invalid(kind, "arguments must be a JSON object"));
    }
    serde_json::from_value(args.clone()).map_err(|err| CallRejection::invalid(kind, err.to_string()))
}
