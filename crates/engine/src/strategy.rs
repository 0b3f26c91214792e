//! Strategy selection

use selfheal_common::{FailureType, HealingRequest, HealingStrategy};

/// Inputs to strategy selection that come from the service, not the request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrategyFlags {
    /// Visual healing enabled *and* a visual backend is available
    pub visual_healing: bool,
}

/// Pick the strategy for a classified failure.
///
/// Pure: depends only on the failure type, the flags and whether the
/// request carries a selector and a baseline frame.
pub fn choose(
    request: &HealingRequest,
    failure_type: FailureType,
    flags: StrategyFlags,
) -> HealingStrategy {
    let has_selector = request.selector().is_some();

    match failure_type {
        FailureType::Selector => {
            if flags.visual_healing && request.baseline().is_some() {
                HealingStrategy::VisualLocator
            } else {
                HealingStrategy::SelectorRepair
            }
        }
        FailureType::Timeout => HealingStrategy::WaitAdjustment,
        FailureType::Navigation | FailureType::Network => HealingStrategy::Retry,
        FailureType::Visual => {
            if flags.visual_healing {
                HealingStrategy::VisualLocator
            } else {
                HealingStrategy::Skip
            }
        }
        FailureType::Assertion | FailureType::Unknown => {
            if has_selector {
                HealingStrategy::SelectorRepair
            } else {
                HealingStrategy::Skip
            }
        }
    }
}
