use super::{base_criteria, run_report, user_directory, ForecastReports, ZoneSnapshot};
use crate::aggregation::{
    deviation, group_by_owner, group_by_product, hit_rate, merge_buckets, monthly_buckets,
    zone_users, MonthGrid, MonthlyBucket, OrderStageRule, UserRef,
};
use crate::config::ReportQuery;
use crate::error::{ReportKind, Result};
use crate::normalize::{round_money, sum_money};
use crate::period::{calendar_month_labels, MONTHS_PER_YEAR};
use crate::schema::{Offer, ProductType, TargetScope, UserId, ZoneId};
use crate::store::ForecastStore;
use crate::targets::TargetBook;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownTotals {
    pub offers_value: f64,
    pub orders_received: f64,
    pub open_funnel: f64,
    pub budget: f64,
    pub deviation: Option<f64>,
    pub hit_rate: i64,
}

impl BreakdownTotals {
    pub fn from_buckets(buckets: &[MonthlyBucket]) -> Self {
        let offers_value = sum_money(buckets.iter().map(|b| b.offers_value));
        let orders_received = sum_money(buckets.iter().map(|b| b.orders_received));
        let budget = sum_money(buckets.iter().map(|b| b.budget));
        Self {
            offers_value,
            orders_received,
            open_funnel: sum_money(buckets.iter().map(|b| b.open_funnel)),
            budget,
            deviation: deviation(orders_received, budget),
            hit_rate: hit_rate(orders_received, offers_value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMonthlyBreakdown {
    pub product_type: ProductType,
    pub yearly_target: f64,
    pub offer_bu: f64,
    pub months: Vec<MonthlyBucket>,
    pub totals: BreakdownTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneMonthlyBreakdown {
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub yearly_target: f64,
    pub months: Vec<MonthlyBucket>,
    pub totals: BreakdownTotals,
    /// Present when the query asks for it; only products with activity are listed.
    pub products: Option<Vec<ProductMonthlyBreakdown>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallMonthlyTotals {
    pub months: Vec<MonthlyBucket>,
    pub totals: BreakdownTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyBreakdownReport {
    pub year: i32,
    pub filters: ReportQuery,
    pub zones: Vec<ZoneMonthlyBreakdown>,
    pub overall_totals: OverallMonthlyTotals,
    pub months: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMonthlyBreakdown {
    pub user_id: UserId,
    pub user_name: String,
    pub is_member: bool,
    pub zone_ids: Vec<ZoneId>,
    pub yearly_target: f64,
    pub months: Vec<MonthlyBucket>,
    pub totals: BreakdownTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMonthlyBreakdownReport {
    pub year: i32,
    pub filters: ReportQuery,
    pub users: Vec<UserMonthlyBreakdown>,
    pub overall_totals: OverallMonthlyTotals,
    pub months: Vec<String>,
}

fn monthly_budgets(book: &TargetBook, scope: TargetScope, year: i32) -> MonthGrid {
    let mut budgets = [0.0; MONTHS_PER_YEAR];
    for (i, slot) in budgets.iter_mut().enumerate() {
        *slot = book.monthly_target(scope, year, i as u32 + 1);
    }
    budgets
}

fn overall(lists: &[&Vec<MonthlyBucket>], year: i32) -> OverallMonthlyTotals {
    let months = merge_buckets(lists.iter().copied(), year);
    let totals = BreakdownTotals::from_buckets(&months);
    OverallMonthlyTotals { months, totals }
}

impl<'a, S: ForecastStore + ?Sized> ForecastReports<'a, S> {
    /// Per zone, twelve months of offers, orders, orders in hand, open funnel, budget
    /// and deviation.
    pub async fn monthly_breakdown(&self, query: &ReportQuery) -> Result<MonthlyBreakdownReport> {
        run_report(ReportKind::MonthlyBreakdown, self.build_monthly_breakdown(query)).await
    }

    async fn build_monthly_breakdown(&self, query: &ReportQuery) -> Result<MonthlyBreakdownReport> {
        info!("Building monthly breakdown for {}", query.year);
        let zones = self.zones(query).await?;
        let scopes = zones.iter().map(|z| TargetScope::Zone(z.id)).collect();

        let (book, snapshots) = futures::try_join!(
            self.target_book(scopes, query.year),
            self.zone_snapshots(&zones, query, |zone| base_criteria(zone, query)),
        )?;

        let rows: Vec<ZoneMonthlyBreakdown> = snapshots
            .iter()
            .map(|snapshot| zone_monthly(snapshot, &book, query))
            .collect();

        let lists: Vec<&Vec<MonthlyBucket>> = rows.iter().map(|r| &r.months).collect();
        let overall_totals = overall(&lists, query.year);

        Ok(MonthlyBreakdownReport {
            year: query.year,
            filters: query.clone(),
            zones: rows,
            overall_totals,
            months: calendar_month_labels(),
        })
    }

    /// The monthly breakdown grouped by user instead of zone, with user targets. PO
    /// received offers count as orders here. Sorted by orders received, highest first.
    pub async fn user_monthly_breakdown(
        &self,
        query: &ReportQuery,
    ) -> Result<UserMonthlyBreakdownReport> {
        run_report(
            ReportKind::UserMonthlyBreakdown,
            self.build_user_monthly_breakdown(query),
        )
        .await
    }

    async fn build_user_monthly_breakdown(
        &self,
        query: &ReportQuery,
    ) -> Result<UserMonthlyBreakdownReport> {
        info!("Building user monthly breakdown for {}", query.year);
        let zones = self.zones(query).await?;
        let snapshots = self
            .zone_snapshots(&zones, query, |zone| base_criteria(zone, query))
            .await?;

        let directory = user_directory(&snapshots);
        let mut users: BTreeMap<UserId, (UserRef, BTreeSet<ZoneId>)> = BTreeMap::new();
        let mut offers_by_user: BTreeMap<UserId, Vec<&Offer>> = BTreeMap::new();

        for snapshot in &snapshots {
            for user in zone_users(&snapshot.members, &snapshot.offers, &directory) {
                let entry = users
                    .entry(user.id)
                    .or_insert_with(|| (user.clone(), BTreeSet::new()));
                entry.0.is_member |= user.is_member;
                entry.1.insert(snapshot.zone.id);
            }
            for (owner, offers) in group_by_owner(&snapshot.offers) {
                offers_by_user.entry(owner).or_default().extend(offers);
            }
        }
        if let Some(user_id) = query.user_id {
            users.retain(|id, _| *id == user_id);
        }

        let scopes = users.keys().map(|id| TargetScope::User(*id)).collect();
        let book = self.target_book(scopes, query.year).await?;

        let mut rows: Vec<UserMonthlyBreakdown> = users
            .into_values()
            .map(|(user, zone_ids)| {
                let scope = TargetScope::User(user.id);
                let offers = offers_by_user.get(&user.id).cloned().unwrap_or_default();
                let months = monthly_buckets(
                    &offers,
                    query.year,
                    &monthly_budgets(&book, scope, query.year),
                    OrderStageRule::WonOrPoReceived,
                );
                let totals = BreakdownTotals::from_buckets(&months);
                UserMonthlyBreakdown {
                    user_id: user.id,
                    user_name: user.name,
                    is_member: user.is_member,
                    zone_ids: zone_ids.into_iter().collect(),
                    yearly_target: book.yearly_target(scope, query.year),
                    months,
                    totals,
                }
            })
            .collect();

        rows.sort_by(|a, b| {
            b.totals
                .orders_received
                .total_cmp(&a.totals.orders_received)
                .then_with(|| a.user_name.cmp(&b.user_name))
        });

        let lists: Vec<&Vec<MonthlyBucket>> = rows.iter().map(|r| &r.months).collect();
        let overall_totals = overall(&lists, query.year);

        Ok(UserMonthlyBreakdownReport {
            year: query.year,
            filters: query.clone(),
            users: rows,
            overall_totals,
            months: calendar_month_labels(),
        })
    }
}

fn zone_monthly(
    snapshot: &ZoneSnapshot,
    book: &TargetBook,
    query: &ReportQuery,
) -> ZoneMonthlyBreakdown {
    let scope = TargetScope::Zone(snapshot.zone.id);
    let offers: Vec<&Offer> = snapshot.offers.iter().collect();
    let months = monthly_buckets(
        &offers,
        query.year,
        &monthly_budgets(book, scope, query.year),
        OrderStageRule::WonOnly,
    );
    let totals = BreakdownTotals::from_buckets(&months);

    let products = query
        .include_products
        .then(|| product_breakdown(&snapshot.offers, book, scope, query.year));

    ZoneMonthlyBreakdown {
        zone_id: snapshot.zone.id,
        zone_name: snapshot.zone.name.clone(),
        yearly_target: book.yearly_target(scope, query.year),
        months,
        totals,
        products,
    }
}

fn product_breakdown(
    offers: &[Offer],
    book: &TargetBook,
    scope: TargetScope,
    year: i32,
) -> Vec<ProductMonthlyBreakdown> {
    group_by_product(offers)
        .into_iter()
        .filter_map(|(product, product_offers)| {
            let yearly_target = book.product_yearly_target(scope, year, product);
            let budgets = [round_money(yearly_target / MONTHS_PER_YEAR as f64); MONTHS_PER_YEAR];
            let months = monthly_buckets(&product_offers, year, &budgets, OrderStageRule::WonOnly);
            let totals = BreakdownTotals::from_buckets(&months);

            let active = totals.offers_value != 0.0 || totals.orders_received != 0.0;
            active.then(|| ProductMonthlyBreakdown {
                product_type: product,
                yearly_target,
                offer_bu: book.product_offer_bu(scope, year, product),
                months,
                totals,
            })
        })
        .collect()
}
