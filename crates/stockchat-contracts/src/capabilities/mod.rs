mod args;
mod plan;
mod registry;

pub use args::{
    CallRejection, CapabilityCall, CapabilityKind, PortfolioArgs, StockPriceArgs, PORTFOLIO,
    STOCK_PRICE,
};
pub use plan::{plan_calls, CallPlan, DroppedCall};
pub use registry::{CapabilityDescriptor, CapabilityRegistry};
