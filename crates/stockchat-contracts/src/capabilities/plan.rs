use super::args::{CallRejection, CapabilityCall};
use super::registry::CapabilityRegistry;
use crate::conversation::ResolvedCall;

#[derive(Debug, Clone, PartialEq)]
pub struct DroppedCall {
    pub call: ResolvedCall,
    pub rejection: CallRejection,
}

/// Validated calls in registry order, plus everything that was left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallPlan {
    pub calls: Vec<CapabilityCall>,
    pub dropped: Vec<DroppedCall>,
}

impl CallPlan {
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Validates the resolver's calls and keeps, per capability, the first one
/// that validates in service order. Survivors are reordered by registry
/// position so execution order never depends on the model.
pub fn plan_calls(registry: &CapabilityRegistry, resolved: &[ResolvedCall]) -> CallPlan {
    let mut slots: Vec<Option<CapabilityCall>> = vec![None; registry.len()];
    let mut dropped = Vec::new();

    for call in resolved {
        let validated = match registry.validate(call) {
            Ok(validated) => validated,
            Err(rejection) => {
                dropped.push(DroppedCall {
                    call: call.clone(),
                    rejection,
                });
                continue;
            }
        };
        let Some(index) = registry.position(validated.name()) else {
            dropped.push(DroppedCall {
                call: call.clone(),
                rejection: CallRejection::UnknownCapability {
                    name: call.name.clone(),
                },
            });
            continue;
        };
        if slots[index].is_some() {
            dropped.push(DroppedCall {
                call: call.clone(),
                rejection: CallRejection::DuplicateReference {
                    capability: validated.name(),
                },
            });
            continue;
        }
        slots[index] = Some(validated);
    }

    CallPlan {
        calls: slots.into_iter().flatten().collect(),
        dropped,
    }
}
