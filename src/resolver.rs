//! Per-offer fallback resolution.
//!
//! Period and value are resolved independently of each other: an offer can take its
//! value from the PO while its period still comes from the offer month.

use crate::normalize::normalize;
use crate::schema::{Offer, UserId};

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// PO-received month, else offer month.
pub fn effective_period(offer: &Offer) -> Option<&str> {
    non_empty(offer.po_received_month.as_ref()).or_else(|| non_empty(offer.offer_month.as_ref()))
}

/// Normalized PO value, else normalized offer value.
pub fn effective_value(offer: &Offer) -> f64 {
    match &offer.po_value {
        Some(po_value) => normalize(Some(po_value)),
        None => normalize(offer.offer_value.as_ref()),
    }
}

/// Normalized proposed value.
pub fn offer_value(offer: &Offer) -> f64 {
    normalize(offer.offer_value.as_ref())
}

/// Assigned user, else the creator.
pub fn effective_owner(offer: &Offer) -> Option<UserId> {
    offer.assigned_to_id.or(offer.created_by_id)
}

/// PO-expected month, else offer month.
pub fn forecast_period(offer: &Offer) -> Option<&str> {
    non_empty(offer.po_expected_month.as_ref()).or_else(|| non_empty(offer.offer_month.as_ref()))
}

/// Missing probability counts as 0.
pub fn probability(offer: &Offer) -> u8 {
    offer.probability_percentage.unwrap_or(0)
}


#[cfg(test)]
mod tests {
    use super::fixtures::offer;
    use super::*;
    use crate::schema::Amount;

    #[test]
    fn test_period_prefers_po_received_month() {
        let mut o = offer(1, 1, 1000.0, "2024-01");
        o.po_received_month = Some("2024-03".to_string());
        assert_eq!(effective_period(&o), Some("2024-03"));
    }

    #[test]
    fn test_period_falls_back_to_offer_month() {
        let mut o = offer(1, 1, 1000.0, "2024-01");
        o.po_received_month = Some("  ".to_string());
        assert_eq!(effective_period(&o), Some("2024-01"));
    }

    #[test]
    fn test_period_absent_when_both_missing() {
        let mut o = offer(1, 1, 1000.0, "2024-01");
        o.offer_month = None;
        assert_eq!(effective_period(&o), None);
    }

    #[test]
    fn test_value_prefers_po_value() {
        let mut o = offer(1, 1, 1000.0, "2024-01");
        o.po_value = Some(Amount::Text("1200.004".to_string()));
        assert_eq!(effective_value(&o), 1200.0);
    }

    #[test]
    fn test_value_falls_back_to_offer_value() {
        let o = offer(1, 1, 999.999, "2024-01");
        assert_eq!(effective_value(&o), 1000.0);
    }

    #[test]
    fn test_value_and_period_resolve_independently() {
        let mut o = offer(1, 1, 1000.0, "2024-05");
        o.po_value = Some(Amount::Float(1500.0));
        o.po_received_month = None;
        assert_eq!(effective_value(&o), 1500.0);
        assert_eq!(effective_period(&o), Some("2024-05"));
    }

    #[test]
    fn test_owner_falls_back_to_creator() {
        let mut o = offer(1, 1, 1000.0, "2024-01");
        o.created_by_id = Some(9);
        assert_eq!(effective_owner(&o), Some(9));
        o.assigned_to_id = Some(4);
        assert_eq!(effective_owner(&o), Some(4));
    }

    #[test]
    fn test_forecast_period_prefers_expected_month() {
        let mut o = offer(1, 1, 1000.0, "2024-01");
        assert_eq!(forecast_period(&o), Some("2024-01"));
        o.po_expected_month = Some("2024-06".to_string());
        assert_eq!(forecast_period(&o), Some("2024-06"));
    }
}
