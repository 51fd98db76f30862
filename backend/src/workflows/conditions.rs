// Workflow Conditions - Predicates deciding which steps an instance includes

use approvals_shared::{Condition, ConditionOperator, Context, ContextValue};
use std::cmp::Ordering;

/// Evaluate a single condition against the request context.
///
/// A field the context does not carry never matches, except when the
/// condition compares against `ContextValue::Absent`.
pub fn evaluate(condition: &Condition, context: &Context) -> bool {
    let field_value = context.get(&condition.field);

    if condition.value == ContextValue::Absent {
        return match condition.operator {
            ConditionOperator::Equals => field_value.is_none(),
            ConditionOperator::NotEquals => field_value.is_some(),
            _ => false,
        };
    }

    let Some(value) = field_value else {
        return false;
    };

    match condition.operator {
        ConditionOperator::Equals => value == &condition.value,
        ConditionOperator::NotEquals => value != &condition.value,
        ConditionOperator::GreaterThan => compare(value, &condition.value) == Some(Ordering::Greater),
        ConditionOperator::LessThan => compare(value, &condition.value) == Some(Ordering::Less),
        ConditionOperator::Contains => match (value, &condition.value) {
            (ContextValue::String(s), ContextValue::String(pattern)) => s.contains(pattern.as_str()),
            (ContextValue::List(items), needle) => items.contains(needle),
            _ => false,
        },
        ConditionOperator::In => match &condition.value {
            ContextValue::List(options) => options.contains(value),
            _ => false,
        },
    }
}

/// AND of all conditions; an empty list always applies
pub fn all_match(conditions: &[Condition], context: &Context) -> bool {
    conditions.iter().all(|c| evaluate(c, context))
}

// Only numbers against numbers and dates against dates are ordered
fn compare(lhs: &ContextValue, rhs: &ContextValue) -> Option<Ordering> {
    match (lhs, rhs) {
        (ContextValue::Number(a), ContextValue::Number(b)) => Some(a.cmp(b)),
        (ContextValue::Date(a), ContextValue::Date(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Common condition presets for approval routing
pub mod presets {
    use super::*;
    use rust_decimal::Decimal;

    /// Requests above a monetary threshold
    pub fn amount_above(amount: Decimal) -> Condition {
        Condition::greater_than("amount", amount)
    }

    pub fn amount_below(amount: Decimal) -> Condition {
        Condition::less_than("amount", amount)
    }

    pub fn department(name: &str) -> Condition {
        Condition::equals("department", name)
    }

    pub fn department_in(names: &[&str]) -> Condition {
        Condition::in_list("department", names.iter().map(|n| ContextValue::from(*n)).collect())
    }

    /// Requests explicitly flagged as urgent
    pub fn urgent() -> Condition {
        Condition::equals("urgent", true)
    }

    pub fn tagged(tag: &str) -> Condition {
        Condition::contains("tags", tag)
    }

    /// Requests with no cost center assigned
    pub fn missing_cost_center() -> Condition {
        Condition::is_absent("cost_center")
    }
}
