use super::{base_criteria, run_report, ForecastReports};
use crate::aggregation::{
    add_grids, apply_probability, apply_product_filter, balance_bu, count_and_sum, grid_from,
    hit_rate, monthly_forecast_values, monthly_orders_received, open_funnel_by_subtraction,
    orders_received, quarterly_rollup, MonthGrid, OrderStageRule, QuarterRollup,
};
use crate::config::ReportQuery;
use crate::error::{ReportKind, Result};
use crate::normalize::sum_money;
use crate::period::{calendar_month_labels, year_start_utc, MONTHS_PER_YEAR};
use crate::schema::{Offer, OfferStage, ServiceZone, TargetScope, ZoneId};
use crate::store::{ForecastStore, OfferCriteria};
use crate::targets::TargetBook;
use futures::future::try_join_all;
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryFigures {
    pub no_of_offers: usize,
    pub offers_value: f64,
    pub orders_received: f64,
    /// Offers value minus orders received.
    pub open_funnel: f64,
    pub yearly_target: f64,
    pub balance_bu: f64,
    pub hit_rate: i64,
    /// Offer value by effective period, January first.
    pub monthly_forecast: Vec<f64>,
    pub monthly_orders: Vec<f64>,
    pub quarters: Vec<QuarterRollup>,
}

impl SummaryFigures {
    fn compute(
        no_of_offers: usize,
        offers_value: f64,
        orders_received: f64,
        yearly_target: f64,
        forecast: &MonthGrid,
        orders: &MonthGrid,
    ) -> Self {
        Self {
            no_of_offers,
            offers_value,
            orders_received,
            // NOTE: subtraction-based open funnel; the monthly breakdowns use the
            // open-funnel flag instead. See `aggregation::monthly_open_funnel`.
            open_funnel: open_funnel_by_subtraction(offers_value, orders_received),
            yearly_target,
            balance_bu: balance_bu(yearly_target, orders_received),
            hit_rate: hit_rate(orders_received, offers_value),
            monthly_forecast: forecast.to_vec(),
            monthly_orders: orders.to_vec(),
            quarters: quarterly_rollup(forecast, orders, yearly_target),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSummaryRow {
    pub zone_id: ZoneId,
    pub zone_name: String,
    #[serde(flatten)]
    pub figures: SummaryFigures,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSummaryReport {
    pub year: i32,
    pub filters: ReportQuery,
    pub zones: Vec<ZoneSummaryRow>,
    pub overall_totals: SummaryFigures,
    pub months: Vec<String>,
}

struct ZoneSummaryInputs {
    zone: ServiceZone,
    created: Vec<Offer>,
    won: Vec<Offer>,
}

impl<'a, S: ForecastStore + ?Sized> ForecastReports<'a, S> {
    /// One row per zone with counts, values, hit rate, balance and quarterly rollup.
    pub async fn zone_summary(&self, query: &ReportQuery) -> Result<ZoneSummaryReport> {
        run_report(ReportKind::ZoneSummary, self.build_zone_summary(query)).await
    }

    async fn build_zone_summary(&self, query: &ReportQuery) -> Result<ZoneSummaryReport> {
        info!("Building zone summary for {}", query.year);
        let zones = self.zones(query).await?;

        let scopes = zones.iter().map(|z| TargetScope::Zone(z.id)).collect();
        let (book, inputs) = futures::try_join!(
            self.target_book(scopes, query.year),
            try_join_all(zones.iter().map(|zone| self.zone_summary_inputs(zone, query))),
        )?;

        let rows: Vec<ZoneSummaryRow> = inputs
            .iter()
            .map(|input| zone_summary_row(input, &book, query.year))
            .collect();

        let overall_totals = overall_summary(&rows);

        Ok(ZoneSummaryReport {
            year: query.year,
            filters: query.clone(),
            zones: rows,
            overall_totals,
            months: calendar_month_labels(),
        })
    }

    /// Offers created in the year and won offers, fetched concurrently. Won offers are
    /// not limited by creation date; their effective period decides the year.
    async fn zone_summary_inputs(
        &self,
        zone: &ServiceZone,
        query: &ReportQuery,
    ) -> Result<ZoneSummaryInputs> {
        let created_criteria = OfferCriteria {
            created_from: year_start_utc(query.year),
            created_before: query.year.checked_add(1).and_then(year_start_utc),
            ..base_criteria(zone, query)
        };
        let won_criteria = OfferCriteria {
            stages: vec![OfferStage::Won],
            ..base_criteria(zone, query)
        };

        let (created, won) = futures::try_join!(
            self.store.list_offers(&created_criteria),
            self.store.list_offers(&won_criteria),
        )?;

        let range = query.probability_range();
        Ok(ZoneSummaryInputs {
            zone: zone.clone(),
            created: apply_product_filter(apply_probability(created, range), query.product_type),
            won: apply_product_filter(apply_probability(won, range), query.product_type),
        })
    }
}

fn zone_summary_row(input: &ZoneSummaryInputs, book: &TargetBook, year: i32) -> ZoneSummaryRow {
    let scope = TargetScope::Zone(input.zone.id);
    let totals = count_and_sum(&input.created);
    let orders = orders_received(&input.won, year, None, OrderStageRule::WonOnly);
    let yearly_target = book.yearly_target(scope, year);

    let forecast = monthly_forecast_values(&input.created, year);
    let monthly_orders = monthly_orders_received(&input.won, year, OrderStageRule::WonOnly);

    let figures = SummaryFigures::compute(
        totals.count,
        totals.value,
        orders,
        yearly_target,
        &forecast,
        &monthly_orders,
    );

    if yearly_target > 0.0 && orders == 0.0 && totals.value > 0.0 {
        debug!(
            "Zone '{}' has a target of {} and {} offered but no orders received; balance {}",
            input.zone.name, yearly_target, totals.value, figures.balance_bu
        );
    }

    ZoneSummaryRow {
        zone_id: input.zone.id,
        zone_name: input.zone.name.clone(),
        figures,
    }
}

fn overall_summary(rows: &[ZoneSummaryRow]) -> SummaryFigures {
    let mut forecast = [0.0; MONTHS_PER_YEAR];
    let mut orders = [0.0; MONTHS_PER_YEAR];
    for row in rows {
        add_grids(&mut forecast, &grid_from(&row.figures.monthly_forecast));
        add_grids(&mut orders, &grid_from(&row.figures.monthly_orders));
    }

    SummaryFigures::compute(
        rows.iter().map(|r| r.figures.no_of_offers).sum(),
        sum_money(rows.iter().map(|r| r.figures.offers_value)),
        sum_money(rows.iter().map(|r| r.figures.orders_received)),
        sum_money(rows.iter().map(|r| r.figures.yearly_target)),
        &forecast,
        &orders,
    )
}
