// Workflow Conditions - predicate evaluation for condition steps
//
// Operands come from the run's variable map, so both sides are strings;
// the ordering operators coerce to numbers before comparing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

/// Evaluate `field_value <operator> expected`.
///
/// `greater_than`/`less_than` parse both sides as f64 and are false when
/// either side is not numeric. `contains` is case-insensitive containment.
pub fn evaluate(field_value: &str, operator: ConditionOperator, expected: &str) -> bool {
    match operator {
        ConditionOperator::Equals => field_value == expected,
        ConditionOperator::NotEquals => field_value != expected,
        ConditionOperator::Contains => field_value
            .to_lowercase()
            .contains(&expected.to_lowercase()),
        ConditionOperator::GreaterThan => match (field_value.parse::<f64>(), expected.parse::<f64>()) {
            (Ok(lhs), Ok(rhs)) => lhs > rhs,
            _ => false,
        },
        ConditionOperator::LessThan => match (field_value.parse::<f64>(), expected.parse::<f64>()) {
            (Ok(lhs), Ok(rhs)) => lhs < rhs,
            _ => false,
        },
    }
}
