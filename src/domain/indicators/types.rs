use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of indicator kinds. The stable id references indicator rows
/// in persistence; `requires_mitigation` marks the kinds the mitigation
/// engine reconciles against recent price action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorType {
    OrderBlock,
    Fvg,
    StructureBreak,
    DojiCandle,
    HiddenOrderBlock,
}

impl IndicatorType {
    pub fn name(&self) -> &'static str {
        match self {
            IndicatorType::OrderBlock => "order_block",
            IndicatorType::Fvg => "fvg",
            IndicatorType::StructureBreak => "structure_break",
            IndicatorType::DojiCandle => "doji_candle",
            IndicatorType::HiddenOrderBlock => "hidden_order_block",
        }
    }

    pub fn stable_id(&self) -> i64 {
        match self {
            IndicatorType::OrderBlock => 1,
            IndicatorType::Fvg => 2,
            IndicatorType::StructureBreak => 3,
            IndicatorType::DojiCandle => 4,
            IndicatorType::HiddenOrderBlock => 5,
        }
    }

    pub fn requires_mitigation(&self) -> bool {
        matches!(
            self,
            IndicatorType::OrderBlock | IndicatorType::HiddenOrderBlock
        )
    }

    pub fn from_stable_id(id: i64) -> Option<IndicatorType> {
        Self::all().into_iter().find(|t| t.stable_id() == id)
    }

    pub fn all() -> Vec<IndicatorType> {
        vec![
            IndicatorType::OrderBlock,
            IndicatorType::Fvg,
            IndicatorType::StructureBreak,
            IndicatorType::DojiCandle,
            IndicatorType::HiddenOrderBlock,
        ]
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Lifecycle of a persisted indicator instance. Transitions are monotonic:
/// `Active` may become `Mitigated` or `Invalidated`, never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorStatus {
    Active,
    Mitigated,
    Invalidated,
}

impl IndicatorStatus {
    pub fn can_transition_to(&self, next: IndicatorStatus) -> bool {
        matches!(
            (self, next),
            (
                IndicatorStatus::Active,
                IndicatorStatus::Mitigated | IndicatorStatus::Invalidated
            )
        )
    }
}

impl fmt::Display for IndicatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndicatorStatus::Active => "active",
            IndicatorStatus::Mitigated => "mitigated",
            IndicatorStatus::Invalidated => "invalidated",
        };
        write!(f, "{}", s)
    }
}
