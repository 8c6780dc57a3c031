use super::{base_criteria, run_report, user_directory, ForecastReports, ZoneSnapshot};
use crate::aggregation::{
    add_grids, grid_from, grid_total, group_by_owner, zone_users, MonthGrid,
};
use crate::config::ReportQuery;
use crate::error::{ReportKind, Result};
use crate::normalize::round_money;
use crate::period::{calendar_month_index, calendar_month_labels, MONTHS_PER_YEAR};
use crate::resolver::offer_value;
use crate::schema::{Offer, OfferStage, UserId, ZoneId};
use crate::store::{ForecastStore, OfferCriteria};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Offer values of one user spread over the month the PO is expected in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPoExpectedRow {
    pub user_id: UserId,
    pub user_name: String,
    pub is_member: bool,
    pub months: Vec<f64>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonePoExpected {
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub users: Vec<UserPoExpectedRow>,
    pub monthly_totals: Vec<f64>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoExpectedTotals {
    pub months: Vec<f64>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoExpectedReport {
    pub year: i32,
    pub filters: ReportQuery,
    pub zones: Vec<ZonePoExpected>,
    pub overall_totals: PoExpectedTotals,
    pub months: Vec<String>,
}

/// Offer values keyed by PO-expected month. Offers without one are not placed.
fn po_expected_grid(offers: &[&Offer], year: i32) -> MonthGrid {
    let mut grid = [0.0; MONTHS_PER_YEAR];
    for offer in offers {
        let idx = offer
            .po_expected_month
            .as_deref()
            .and_then(|m| calendar_month_index(m, year));
        if let Some(idx) = idx {
            grid[idx] += offer_value(offer);
        }
    }
    grid.map(round_money)
}

impl<'a, S: ForecastStore + ?Sized> ForecastReports<'a, S> {
    /// Per zone and user, the value of open and won business by the month its PO is
    /// expected. Lost offers are left out.
    pub async fn po_expected_month_breakdown(
        &self,
        query: &ReportQuery,
    ) -> Result<PoExpectedReport> {
        run_report(
            ReportKind::PoExpectedMonthBreakdown,
            self.build_po_expected_month_breakdown(query),
        )
        .await
    }

    async fn build_po_expected_month_breakdown(
        &self,
        query: &ReportQuery,
    ) -> Result<PoExpectedReport> {
        info!("Building PO expected month breakdown for {}", query.year);
        let zones = self.zones(query).await?;
        let snapshots = self
            .zone_snapshots(&zones, query, |zone| OfferCriteria {
                exclude_stages: vec![OfferStage::Lost],
                ..base_criteria(zone, query)
            })
            .await?;

        let directory = user_directory(&snapshots);
        let rows: Vec<ZonePoExpected> = snapshots
            .iter()
            .map(|snapshot| zone_po_expected(snapshot, &directory, query))
            .collect();

        let mut months = [0.0; MONTHS_PER_YEAR];
        for row in &rows {
            add_grids(&mut months, &grid_from(&row.monthly_totals));
        }

        Ok(PoExpectedReport {
            year: query.year,
            filters: query.clone(),
            zones: rows,
            overall_totals: PoExpectedTotals {
                months: months.to_vec(),
                total: grid_total(&months),
            },
            months: calendar_month_labels(),
        })
    }
}

fn zone_po_expected(
    snapshot: &ZoneSnapshot,
    directory: &HashMap<UserId, String>,
    query: &ReportQuery,
) -> ZonePoExpected {
    let by_owner = group_by_owner(&snapshot.offers);
    let unplaced = snapshot
        .offers
        .iter()
        .filter(|o| o.po_expected_month.is_none())
        .count();
    if unplaced > 0 {
        debug!(
            "Zone '{}': {} offer(s) without a PO expected month",
            snapshot.zone.name, unplaced
        );
    }

    let mut zone_grid = [0.0; MONTHS_PER_YEAR];
    let users: Vec<UserPoExpectedRow> = zone_users(&snapshot.members, &snapshot.offers, directory)
        .into_iter()
        .filter(|user| query.user_id.map_or(true, |id| id == user.id))
        .map(|user| {
            let offers = by_owner.get(&user.id).map(Vec::as_slice).unwrap_or_default();
            let grid = po_expected_grid(offers, query.year);
            add_grids(&mut zone_grid, &grid);
            UserPoExpectedRow {
                user_id: user.id,
                user_name: user.name,
                is_member: user.is_member,
                months: grid.to_vec(),
                total: grid_total(&grid),
            }
        })
        .collect();

    ZonePoExpected {
        zone_id: snapshot.zone.id,
        zone_name: snapshot.zone.name.clone(),
        users,
        monthly_totals: zone_grid.to_vec(),
        total: grid_total(&zone_grid),
    }
}
