//! Monetary normalization.
//!
//! Every amount that enters an aggregate passes through [`normalize`]: the input is
//! round-tripped through its decimal string form into a [`Decimal`], rounded to two
//! places half away from zero, and handed back as `f64`.

use crate::schema::Amount;
use rust_decimal::prelude::*;
use std::str::FromStr;

const DECIMAL_PLACES: u32 = 2;

fn parse_decimal(text: &str) -> Option<Decimal> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

/// Finite floats past the `Decimal` range saturate at `Decimal::MAX` / `Decimal::MIN`;
/// ones too small to represent become zero.
fn float_to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    let saturated = || {
        if value.abs() < 1.0 {
            Decimal::ZERO
        } else if value.is_sign_negative() {
            Decimal::MIN
        } else {
            Decimal::MAX
        }
    };
    // `to_string` yields the shortest repr that round-trips, so 0.1 stays "0.1".
    Some(
        parse_decimal(&value.to_string())
            .or_else(|| Decimal::from_f64(value))
            .unwrap_or_else(saturated),
    )
}

#[inline]
fn to_f64(value: Decimal) -> f64 {
    value
        .round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or_default()
}

/// Canonical 2-dp monetary value of a raw input. Never fails: missing or
/// unparseable input is `0.0`.
pub fn normalize(raw: Option<&Amount>) -> f64 {
    let decimal = match raw {
        None => None,
        Some(Amount::Float(value)) => float_to_decimal(*value),
        Some(Amount::Fixed(value)) => Some(*value),
        Some(Amount::Text(text)) => parse_decimal(text),
    };
    decimal.map(to_f64).unwrap_or(0.0)
}

/// Applies the monetary rounding to an already computed float.
pub fn round_money(value: f64) -> f64 {
    float_to_decimal(value).map(to_f64).unwrap_or(0.0)
}

/// Nearest integer percent, half away from zero.
pub fn round_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.round()
    } else {
        0.0
    }
}

/// `round(x * 10) / 10`, used where a report asks for one-decimal precision.
pub fn round_one_decimal(value: f64) -> f64 {
    if value.is_finite() {
        (value * 10.0).round() / 10.0
    } else {
        0.0
    }
}

/// Sums already-normalized values and rounds the total once.
pub fn sum_money<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    round_money(values.into_iter().sum())
}
