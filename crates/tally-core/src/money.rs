//! Money arithmetic
//!
//! Every ledger value is a `Decimal` kept strictly inside the representable
//! range: the ceiling is `Decimal::MAX - 1` and the floor `Decimal::MIN + 1`.
//! All arithmetic saturates to those bounds instead of overflowing, and any
//! value arriving from a lower-precision transport type is clamped first.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Largest value a ledger will ever hold
#[inline]
pub fn money_max() -> Decimal {
    Decimal::MAX - Decimal::ONE
}

/// Smallest value a ledger will ever hold
#[inline]
pub fn money_min() -> Decimal {
    Decimal::MIN + Decimal::ONE
}

/// Normalize any decimal into the ledger range
pub fn clamp(value: Decimal) -> Decimal {
    if value >= Decimal::MAX {
        money_max()
    } else if value <= Decimal::MIN {
        money_min()
    } else {
        value
    }
}

/// The bound an overflowing operation saturates to
#[inline]
fn saturate(positive: bool) -> Decimal {
    if positive {
        money_max()
    } else {
        money_min()
    }
}

pub fn safe_add(left: Decimal, right: Decimal) -> Decimal {
    match left.checked_add(right) {
        Some(v) => clamp(v),
        None => saturate(right.is_sign_positive()),
    }
}

pub fn safe_sub(left: Decimal, right: Decimal) -> Decimal {
    match left.checked_sub(right) {
        Some(v) => clamp(v),
        None => saturate(right.is_sign_negative()),
    }
}

pub fn safe_mul(left: Decimal, right: Decimal) -> Decimal {
    if left.is_zero() || right.is_zero() {
        return Decimal::ZERO;
    }
    match left.checked_mul(right) {
        Some(v) => clamp(v),
        None => saturate(left.is_sign_negative() == right.is_sign_negative()),
    }
}

/// Saturating division. Dividing by zero yields `left / 1`, never an error.
pub fn safe_div(left: Decimal, right: Decimal) -> Decimal {
    if right.is_zero() {
        return clamp(left / Decimal::ONE);
    }
    match left.checked_div(right) {
        Some(v) => clamp(v),
        None => saturate(left.is_sign_negative() == right.is_sign_negative()),
    }
}

/// Convert a transport-precision value into money
///
/// Values at or beyond the decimal range land on the ceiling/floor.
/// NaN has no money equivalent and maps to zero.
pub fn from_f64(amount: f64) -> Decimal {
    if amount.is_nan() {
        return Decimal::ZERO;
    }
    let max = Decimal::MAX.to_f64().unwrap_or(f64::MAX);
    let min = Decimal::MIN.to_f64().unwrap_or(f64::MIN);
    if amount >= max {
        return money_max();
    }
    if amount <= min {
        return money_min();
    }
    match Decimal::from_f64(amount) {
        Some(v) => clamp(v),
        None => saturate(amount > 0.0),
    }
}

pub fn from_f32(amount: f32) -> Decimal {
    if amount.is_nan() {
        return Decimal::ZERO;
    }
    from_f64(amount as f64)
}

/// Convert money to transport precision
#[inline]
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[inline]
pub fn to_f32(value: Decimal) -> f32 {
    value.to_f32().unwrap_or(0.0)
}

/// Mutation applied to a ledger
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoneyAction {
    Add,
    Subtract,
    Multiply,
    Divide,
    Set,
}

impl MoneyAction {
    /// Apply this action to `current`. The amount is clamped before use.
    /// `Divide` by zero leaves the value unchanged.
    pub fn apply(self, current: Decimal, amount: Decimal) -> Decimal {
        let amount = clamp(amount);
        match self {
            MoneyAction::Add => safe_add(current, amount),
            MoneyAction::Subtract => safe_sub(current, amount),
            MoneyAction::Multiply => safe_mul(current, amount),
            MoneyAction::Divide if amount.is_zero() => current,
            MoneyAction::Divide => safe_div(current, amount),
            MoneyAction::Set => amount,
        }
    }
}

/// Precision of a value read from another peer's slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Precision {
    /// Full-precision value decoded from the raw decimal array
    #[default]
    Raw,
    /// Transport-precision value re-expanded to money
    Display,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_add_saturates_at_ceiling() {
        assert_eq!(safe_add(money_max(), dec("10")), money_max());
        assert_eq!(safe_add(Decimal::MAX, Decimal::ONE), money_max());
        assert_eq!(safe_add(dec("1.5"), dec("2.25")), dec("3.75"));
    }

    #[test]
    fn test_sub_saturates_at_floor() {
        assert_eq!(safe_sub(money_min(), dec("10")), money_min());
        assert_eq!(safe_sub(dec("-5"), money_max()), money_min());
        assert_eq!(safe_sub(dec("0"), money_min()), money_max());
    }

    #[test]
    fn test_mul_sign_of_overflow() {
        let big = dec("100000000000000000000");
        assert_eq!(safe_mul(big, big), money_max());
        assert_eq!(safe_mul(-big, big), money_min());
        assert_eq!(safe_mul(-big, -big), money_max());
        assert_eq!(safe_mul(Decimal::ZERO, big), Decimal::ZERO);
    }

    #[test]
    fn test_div_by_zero_is_identity() {
        assert_eq!(safe_div(dec("42.5"), Decimal::ZERO), dec("42.5"));
        assert_eq!(safe_div(dec("10"), dec("4")), dec("2.5"));
    }

    #[test]
    fn test_divide_action_by_zero_is_noop() {
        let v = dec("150");
        assert_eq!(MoneyAction::Divide.apply(v, Decimal::ZERO), v);
    }

    #[test]
    fn test_set_clamps_amount() {
        assert_eq!(MoneyAction::Set.apply(Decimal::ZERO, Decimal::MAX), money_max());
        assert_eq!(MoneyAction::Set.apply(Decimal::ZERO, Decimal::MIN), money_min());
    }

    #[test]
    fn test_from_f64_edges() {
        assert_eq!(from_f64(f64::NAN), Decimal::ZERO);
        assert_eq!(from_f64(f64::INFINITY), money_max());
        assert_eq!(from_f64(f64::NEG_INFINITY), money_min());
        assert_eq!(from_f64(1e300), money_max());
        assert_eq!(from_f64(150.0), dec("150"));
        assert_eq!(from_f32(0.5), dec("0.5"));
    }

    #[test]
    fn test_to_f64() {
        assert_eq!(to_f64(dec("100.25")), 100.25);
        assert_eq!(to_f32(dec("-2.5")), -2.5);
    }

    fn any_decimal() -> impl Strategy<Value = Decimal> {
        (any::<u32>(), any::<u32>(), any::<u32>(), any::<bool>(), 0u32..=28)
            .prop_map(|(lo, mid, hi, neg, scale)| Decimal::from_parts(lo, mid, hi, neg, scale))
    }

    fn any_action() -> impl Strategy<Value = MoneyAction> {
        prop_oneof![
            Just(MoneyAction::Add),
            Just(MoneyAction::Subtract),
            Just(MoneyAction::Multiply),
            Just(MoneyAction::Divide),
            Just(MoneyAction::Set),
        ]
    }

    proptest! {
        #[test]
        fn prop_actions_stay_in_range(
            start in any_decimal(),
            steps in proptest::collection::vec((any_action(), any_decimal()), 1..32),
        ) {
            let mut value = clamp(start);
            for (action, amount) in steps {
                value = action.apply(value, amount);
                prop_assert!(value <= money_max());
                prop_assert!(value >= money_min());
            }
        }
    }
}
