use super::{base_criteria, run_report, user_directory, ForecastReports, ZoneSnapshot};
use crate::aggregation::{
    achievement, count_and_sum, grid_total, group_by_owner, group_by_product,
    hit_rate_one_decimal, monthly_offer_values, monthly_open_funnel, monthly_orders_received,
    orders_received, user_display_name, OrderStageRule,
};
use crate::config::ReportQuery;
use crate::error::{ReportKind, Result};
use crate::normalize::{round_one_decimal, sum_money};
use crate::period::{
    calendar_month_index, calendar_month_labels, is_in_year, month_key, month_label,
    MONTHS_PER_YEAR,
};
use crate::resolver::{effective_period, effective_value};
use crate::schema::{Offer, OfferStage, ProductType, TargetScope, UserId, ZoneId};
use crate::store::ForecastStore;
use crate::targets::TargetBook;
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsOverview {
    pub total_offers: usize,
    pub offers_value: f64,
    pub won_offers: usize,
    pub won_value: f64,
    pub lost_offers: usize,
    pub open_funnel: f64,
    /// One decimal place.
    pub hit_rate: f64,
    pub target: f64,
    pub achievement: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub month: String,
    pub label: String,
    pub offers: usize,
    pub offers_value: f64,
    pub won_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductShare {
    pub product_type: ProductType,
    pub offers: usize,
    pub offers_value: f64,
    pub won_value: f64,
    pub hit_rate: f64,
    /// Percentage of the year's offer value, one decimal place.
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performer {
    pub user_id: UserId,
    pub user_name: String,
    pub won_offers: usize,
    pub won_value: f64,
    pub offers_value: f64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonePerformance {
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub offers_value: f64,
    pub won_value: f64,
    pub target: f64,
    pub achievement: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub year: i32,
    pub filters: ReportQuery,
    pub overview: AnalyticsOverview,
    pub trend: Vec<TrendPoint>,
    pub product_distribution: Vec<ProductShare>,
    pub top_performers: Vec<Performer>,
    pub zone_performance: Vec<ZonePerformance>,
    /// Highest achievement among zones that have a target.
    pub best_zone: Option<ZonePerformance>,
    pub worst_zone: Option<ZonePerformance>,
    pub months: Vec<String>,
}

fn offered_in_year(offer: &Offer, year: i32) -> bool {
    offer
        .offer_month
        .as_deref()
        .and_then(|m| calendar_month_index(m, year))
        .is_some()
}

fn won_in_year<'o, I>(offers: I, year: i32) -> Vec<&'o Offer>
where
    I: IntoIterator<Item = &'o Offer>,
{
    offers
        .into_iter()
        .filter(|o| o.stage == OfferStage::Won)
        .filter(|o| effective_period(o).is_some_and(|p| is_in_year(p, year)))
        .collect()
}

impl<'a, S: ForecastStore + ?Sized> ForecastReports<'a, S> {
    /// Cross-zone dashboard: headline totals, monthly trend, product mix, top performers
    /// and zone ranking by achievement.
    pub async fn analytics_dashboard(&self, query: &ReportQuery) -> Result<AnalyticsReport> {
        run_report(ReportKind::AnalyticsDashboard, self.build_analytics_dashboard(query)).await
    }

    async fn build_analytics_dashboard(&self, query: &ReportQuery) -> Result<AnalyticsReport> {
        info!("Building analytics dashboard for {}", query.year);
        let zones = self.zones(query).await?;
        let scopes = zones.iter().map(|z| TargetScope::Zone(z.id)).collect();

        let (book, snapshots) = futures::try_join!(
            self.target_book(scopes, query.year),
            self.zone_snapshots(&zones, query, |zone| base_criteria(zone, query)),
        )?;

        let year = query.year;
        let all: Vec<&Offer> = snapshots.iter().flat_map(|s| s.offers.iter()).collect();
        let offered: Vec<&Offer> = all
            .iter()
            .copied()
            .filter(|o| offered_in_year(o, year))
            .collect();
        let won = won_in_year(all.iter().copied(), year);

        let zone_performance: Vec<ZonePerformance> = snapshots
            .iter()
            .map(|snapshot| zone_performance(snapshot, &book, year))
            .collect();

        let overview = overview(&offered, &won, &zone_performance, year);
        let trend = trend(&offered, &won, year);
        let product_distribution = product_distribution(&offered, &won, overview.offers_value);
        let top_performers = self.top_performers(&snapshots, &offered, &won);
        let (best_zone, worst_zone) = best_and_worst(&zone_performance);

        Ok(AnalyticsReport {
            year,
            filters: query.clone(),
            overview,
            trend,
            product_distribution,
            top_performers,
            zone_performance,
            best_zone,
            worst_zone,
            months: calendar_month_labels(),
        })
    }

    fn top_performers(
        &self,
        snapshots: &[ZoneSnapshot],
        offered: &[&Offer],
        won: &[&Offer],
    ) -> Vec<Performer> {
        let directory = user_directory(snapshots);
        let offered_by_owner = group_by_owner(offered.iter().copied());

        let mut performers: Vec<Performer> = group_by_owner(won.iter().copied())
            .into_iter()
            .map(|(user_id, offers)| {
                let won_value = sum_money(offers.iter().map(|o| effective_value(o)));
                let offers_value = offered_by_owner
                    .get(&user_id)
                    .map(|o| count_and_sum(o.iter().copied()).value)
                    .unwrap_or(0.0);
                Performer {
                    user_id,
                    user_name: user_display_name(user_id, &directory),
                    won_offers: offers.len(),
                    won_value,
                    offers_value,
                    hit_rate: hit_rate_one_decimal(won_value, offers_value),
                }
            })
            .filter(|p| p.won_value > 0.0)
            .collect();

        performers.sort_by(|a, b| {
            b.won_value
                .total_cmp(&a.won_value)
                .then_with(|| a.user_name.cmp(&b.user_name))
        });
        performers.truncate(self.settings.top_performers);
        performers
    }
}

fn overview(
    offered: &[&Offer],
    won: &[&Offer],
    zones: &[ZonePerformance],
    year: i32,
) -> AnalyticsOverview {
    let totals = count_and_sum(offered.iter().copied());
    let won_value = orders_received(won.iter().copied(), year, None, OrderStageRule::WonOnly);
    let target = sum_money(zones.iter().map(|z| z.target));

    AnalyticsOverview {
        total_offers: totals.count,
        offers_value: totals.value,
        won_offers: won.len(),
        won_value,
        lost_offers: offered.iter().filter(|o| o.stage == OfferStage::Lost).count(),
        // NOTE: open-funnel flag definition, as in the monthly breakdowns.
        open_funnel: grid_total(&monthly_open_funnel(offered.iter().copied(), year)),
        hit_rate: hit_rate_one_decimal(won_value, totals.value),
        target,
        achievement: achievement(won_value, target),
    }
}

fn trend(offered: &[&Offer], won: &[&Offer], year: i32) -> Vec<TrendPoint> {
    let values = monthly_offer_values(offered.iter().copied(), year);
    let won_values = monthly_orders_received(won.iter().copied(), year, OrderStageRule::WonOnly);
    let mut counts = [0usize; MONTHS_PER_YEAR];
    for offer in offered {
        if let Some(idx) = offer
            .offer_month
            .as_deref()
            .and_then(|m| calendar_month_index(m, year))
        {
            counts[idx] += 1;
        }
    }

    (0..MONTHS_PER_YEAR)
        .map(|i| {
            let month = i as u32 + 1;
            TrendPoint {
                month: month_key(year, month),
                label: month_label(month).to_string(),
                offers: counts[i],
                offers_value: values[i],
                won_value: won_values[i],
            }
        })
        .collect()
}

fn product_distribution(
    offered: &[&Offer],
    won: &[&Offer],
    offers_value: f64,
) -> Vec<ProductShare> {
    let won_by_product = group_by_product(won.iter().copied());

    group_by_product(offered.iter().copied())
        .into_iter()
        .map(|(product, offers)| {
            let totals = count_and_sum(offers.iter().copied());
            let won_value = won_by_product
                .get(&product)
                .map(|w| sum_money(w.iter().map(|o| effective_value(o))))
                .unwrap_or(0.0);
            let share = if offers_value > 0.0 {
                round_one_decimal(totals.value / offers_value * 100.0)
            } else {
                0.0
            };
            ProductShare {
                product_type: product,
                offers: totals.count,
                offers_value: totals.value,
                won_value,
                hit_rate: hit_rate_one_decimal(won_value, totals.value),
                share,
            }
        })
        .collect()
}

fn zone_performance(snapshot: &ZoneSnapshot, book: &TargetBook, year: i32) -> ZonePerformance {
    let offers_value = count_and_sum(
        snapshot
            .offers
            .iter()
            .filter(|o| offered_in_year(o, year)),
    )
    .value;
    let won_value = orders_received(&snapshot.offers, year, None, OrderStageRule::WonOnly);
    let target = book.yearly_target(TargetScope::Zone(snapshot.zone.id), year);
    ZonePerformance {
        zone_id: snapshot.zone.id,
        zone_name: snapshot.zone.name.clone(),
        offers_value,
        won_value,
        target,
        achievement: achievement(won_value, target),
    }
}

/// Best and worst zone by achievement. Zones without a target are not ranked; ties keep
/// the zone that sorts first by name.
fn best_and_worst(
    zones: &[ZonePerformance],
) -> (Option<ZonePerformance>, Option<ZonePerformance>) {
    let ranked: Vec<(&ZonePerformance, f64)> = zones
        .iter()
        .filter_map(|z| z.achievement.map(|a| (z, a)))
        .collect();
    if ranked.is_empty() {
        debug!("No zone has a target; best and worst zone left empty");
    }

    let mut best: Option<(&ZonePerformance, f64)> = None;
    let mut worst: Option<(&ZonePerformance, f64)> = None;
    for (zone, value) in ranked {
        if best.map_or(true, |(_, b)| value > b) {
            best = Some((zone, value));
        }
        if worst.map_or(true, |(_, w)| value < w) {
            worst = Some((zone, value));
        }
    }
    (best.map(|(z, _)| z.clone()), worst.map(|(z, _)| z.clone()))
}
