use crate::normalize::{normalize, round_money};
use crate::period::{month_key, parse_period_year, parse_year_month, MONTHS_PER_YEAR};
use crate::schema::{PeriodType, ProductType, Target, TargetScope};
use log::debug;
use std::collections::HashMap;

/// Offer benchmark per product: a rolling quarter's worth of offers is expected to be
/// four months of target.
pub const OFFER_BU_MULTIPLIER: f64 = 4.0;

#[derive(Debug, Default)]
struct ScopeYearTargets {
    overall: Option<f64>,
    by_product: HashMap<ProductType, f64>,
}

/// Index over every target fetched for a request.
///
/// Built once from a single multi-scope fetch so that resolving many zones, users and
/// products never goes back to the store.
#[derive(Debug, Default)]
pub struct TargetBook {
    yearly: HashMap<(TargetScope, i32), ScopeYearTargets>,
    monthly_overall: HashMap<(TargetScope, String), f64>,
}

impl TargetBook {
    pub fn new(targets: &[Target]) -> Self {
        let mut book = TargetBook::default();

        for target in targets {
            let value = normalize(Some(&target.target_value));

            match target.period_type {
                PeriodType::Yearly => {
                    let Some(year) = parse_period_year(&target.target_period) else {
                        debug!(
                            "Skipping yearly target with malformed period '{}'",
                            target.target_period
                        );
                        continue;
                    };
                    let entry = book.yearly.entry((target.scope, year)).or_default();
                    match target.product_type {
                        None => {
                            if entry.overall.is_some() {
                                debug!(
                                    "Duplicate overall target for {:?} in {}; keeping the first",
                                    target.scope, year
                                );
                            } else {
                                entry.overall = Some(value);
                            }
                        }
                        Some(product) => {
                            *entry.by_product.entry(product).or_insert(0.0) += value;
                        }
                    }
                }
                PeriodType::Monthly => {
                    if target.product_type.is_some() {
                        continue;
                    }
                    let Some((year, month)) = parse_year_month(&target.target_period) else {
                        debug!(
                            "Skipping monthly target with malformed period '{}'",
                            target.target_period
                        );
                        continue;
                    };
                    book.monthly_overall
                        .entry((target.scope, month_key(year, month)))
                        .or_insert(value);
                }
            }
        }

        book
    }

    /// Overall yearly target if one exists, otherwise the sum of product targets,
    /// otherwise 0. The two are never added together.
    pub fn yearly_target(&self, scope: TargetScope, year: i32) -> f64 {
        match self.yearly.get(&(scope, year)) {
            Some(ScopeYearTargets {
                overall: Some(value),
                ..
            }) => *value,
            Some(entry) => round_money(entry.by_product.values().sum()),
            None => 0.0,
        }
    }

    /// Explicit monthly overall target, otherwise `yearly_target / 12`.
    pub fn monthly_target(&self, scope: TargetScope, year: i32, month: u32) -> f64 {
        match self.monthly_overall.get(&(scope, month_key(year, month))) {
            Some(value) => *value,
            None => self.yearly_target(scope, year) / MONTHS_PER_YEAR as f64,
        }
    }

    pub fn product_yearly_target(
        &self,
        scope: TargetScope,
        year: i32,
        product: ProductType,
    ) -> f64 {
        self.yearly
            .get(&(scope, year))
            .and_then(|entry| entry.by_product.get(&product))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn product_offer_bu(&self, scope: TargetScope, year: i32, product: ProductType) -> f64 {
        round_money(
            self.product_yearly_target(scope, year, product) / MONTHS_PER_YEAR as f64
                * OFFER_BU_MULTIPLIER,
        )
    }
}
