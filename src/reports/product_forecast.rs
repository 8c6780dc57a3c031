use super::{base_criteria, run_report, user_directory, ForecastReports, ZoneSnapshot};
use crate::aggregation::{
    add_grids, deviation, grid_from, grid_total, group_by_owner, group_by_product, zone_users,
    MonthGrid,
};
use crate::config::ReportQuery;
use crate::error::{ReportKind, Result};
use crate::normalize::{round_money, sum_money};
use crate::period::{financial_month_index, financial_year_labels, MONTHS_PER_YEAR};
use crate::resolver::{forecast_period, offer_value};
use crate::schema::{Offer, OfferStage, ProductType, TargetScope, UserId, ZoneId};
use crate::store::{ForecastStore, OfferCriteria};
use crate::targets::TargetBook;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductForecastRow {
    pub product_type: ProductType,
    /// Financial-year order, starting with the configured first month.
    pub months: Vec<f64>,
    pub total: f64,
    pub yearly_target: f64,
    pub offer_bu: f64,
    pub deviation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProductForecast {
    pub user_id: UserId,
    pub user_name: String,
    pub is_member: bool,
    pub products: Vec<ProductForecastRow>,
    pub months: Vec<f64>,
    pub total: f64,
    pub yearly_target: f64,
    pub deviation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneProductForecast {
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub users: Vec<UserProductForecast>,
    pub months: Vec<f64>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductForecastTotals {
    pub months: Vec<f64>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductForecastReport {
    pub year: i32,
    pub filters: ReportQuery,
    pub zones: Vec<ZoneProductForecast>,
    pub overall_totals: ProductForecastTotals,
    /// Labels such as `Mar-2024` through `Feb-2025`.
    pub months: Vec<String>,
}

/// Grid layout shared by every row of one report.
struct FinancialYear {
    year: i32,
    start_month: u32,
}

impl FinancialYear {
    fn grid(&self, offers: &[&Offer]) -> MonthGrid {
        let mut grid = [0.0; MONTHS_PER_YEAR];
        for offer in offers {
            let idx = forecast_period(offer)
                .and_then(|p| financial_month_index(p, self.year, self.start_month));
            if let Some(idx) = idx {
                grid[idx] += offer_value(offer);
            }
        }
        grid.map(round_money)
    }
}

impl<'a, S: ForecastStore + ?Sized> ForecastReports<'a, S> {
    /// Per zone, user and product, offer value over the financial year by the month the
    /// PO is expected (or the offer month), set against product targets.
    pub async fn product_wise_forecast(
        &self,
        query: &ReportQuery,
    ) -> Result<ProductForecastReport> {
        run_report(
            ReportKind::ProductWiseForecast,
            self.build_product_wise_forecast(query),
        )
        .await
    }

    async fn build_product_wise_forecast(
        &self,
        query: &ReportQuery,
    ) -> Result<ProductForecastReport> {
        let start_month = self.settings.financial_year_start_month;
        info!(
            "Building product-wise forecast for financial year {} (starting month {})",
            query.year, start_month
        );
        let zones = self.zones(query).await?;
        let snapshots = self
            .zone_snapshots(&zones, query, |zone| OfferCriteria {
                exclude_stages: vec![OfferStage::Lost],
                ..base_criteria(zone, query)
            })
            .await?;

        let directory = user_directory(&snapshots);
        let mut user_ids: BTreeSet<UserId> = BTreeSet::new();
        for snapshot in &snapshots {
            user_ids.extend(
                zone_users(&snapshot.members, &snapshot.offers, &directory)
                    .iter()
                    .map(|u| u.id),
            );
        }
        let scopes = user_ids.into_iter().map(TargetScope::User).collect();
        let book = self.target_book(scopes, query.year).await?;

        let fy = FinancialYear {
            year: query.year,
            start_month,
        };
        let rows: Vec<ZoneProductForecast> = snapshots
            .iter()
            .map(|snapshot| zone_forecast(snapshot, &book, &fy, &directory, query))
            .collect();

        let mut months = [0.0; MONTHS_PER_YEAR];
        for row in &rows {
            add_grids(&mut months, &grid_from(&row.months));
        }

        Ok(ProductForecastReport {
            year: query.year,
            filters: query.clone(),
            zones: rows,
            overall_totals: ProductForecastTotals {
                months: months.to_vec(),
                total: grid_total(&months),
            },
            months: financial_year_labels(query.year, start_month),
        })
    }
}

fn zone_forecast(
    snapshot: &ZoneSnapshot,
    book: &TargetBook,
    fy: &FinancialYear,
    directory: &HashMap<UserId, String>,
    query: &ReportQuery,
) -> ZoneProductForecast {
    let by_owner = group_by_owner(&snapshot.offers);
    let products: Vec<ProductType> = match query.product_type.as_option() {
        Some(product) => vec![product],
        None => ProductType::ALL.to_vec(),
    };

    let mut zone_grid = [0.0; MONTHS_PER_YEAR];
    let members = zone_users(&snapshot.members, &snapshot.offers, directory);
    let users: Vec<UserProductForecast> = members
        .into_iter()
        .filter(|user| query.user_id.map_or(true, |id| id == user.id))
        .map(|user| {
            let scope = TargetScope::User(user.id);
            let offers = by_owner.get(&user.id).map(Vec::as_slice).unwrap_or_default();
            let by_product = group_by_product(offers.iter().copied());

            let rows: Vec<ProductForecastRow> = products
                .iter()
                .filter_map(|product| {
                    let product_offers =
                        by_product.get(product).map(Vec::as_slice).unwrap_or_default();
                    let grid = fy.grid(product_offers);
                    let total = grid_total(&grid);
                    let yearly_target = book.product_yearly_target(scope, fy.year, *product);
                    if total == 0.0 && yearly_target <= 0.0 {
                        return None;
                    }
                    Some(ProductForecastRow {
                        product_type: *product,
                        months: grid.to_vec(),
                        total,
                        yearly_target,
                        offer_bu: book.product_offer_bu(scope, fy.year, *product),
                        deviation: deviation(total, yearly_target),
                    })
                })
                .collect();

            let mut grid = [0.0; MONTHS_PER_YEAR];
            for row in &rows {
                add_grids(&mut grid, &grid_from(&row.months));
            }
            add_grids(&mut zone_grid, &grid);

            let total = sum_money(rows.iter().map(|r| r.total));
            let yearly_target = book.yearly_target(scope, fy.year);
            UserProductForecast {
                user_id: user.id,
                user_name: user.name,
                is_member: user.is_member,
                products: rows,
                months: grid.to_vec(),
                total,
                yearly_target,
                deviation: deviation(total, yearly_target),
            }
        })
        .collect();

    ZoneProductForecast {
        zone_id: snapshot.zone.id,
        zone_name: snapshot.zone.name.clone(),
        users,
        months: zone_grid.to_vec(),
        total: grid_total(&zone_grid),
    }
}
