//! Grouping, summation and the statistics derived from them.
//!
//! Everything here is synchronous and works on offers already fetched for a request.
//! Month grids are `[f64; 12]` indexed by calendar month (January = 0) unless a
//! function says otherwise.

use crate::config::ProductFilter;
use crate::normalize::{round_money, round_one_decimal, round_percent};
use crate::period::{
    calendar_month_index, is_in_year, month_key, month_label, quarter_of_month_index,
    MONTHS_PER_YEAR, QUARTERS_PER_YEAR,
};
use crate::resolver::{effective_owner, effective_period, effective_value, offer_value, probability};
use crate::schema::{Offer, OfferStage, ProductType, User, UserId};
use crate::store::ProbabilityRange;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

pub type MonthGrid = [f64; MONTHS_PER_YEAR];

/// A quarter's budget is the yearly target divided by this, not by four.
pub const QUARTER_BUDGET_DIVISOR: f64 = 3.0;

/// Which stages count as an order received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStageRule {
    WonOnly,
    WonOrPoReceived,
}

impl OrderStageRule {
    pub fn counts(&self, stage: OfferStage) -> bool {
        match self {
            OrderStageRule::WonOnly => stage == OfferStage::Won,
            OrderStageRule::WonOrPoReceived => {
                matches!(stage, OfferStage::Won | OfferStage::PoReceived)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferTotals {
    pub count: usize,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Keeps offers whose probability is inside `range`. Included offers keep their full
/// value; nothing is weighted by probability.
pub fn apply_probability(offers: Vec<Offer>, range: ProbabilityRange) -> Vec<Offer> {
    if range.is_full() {
        return offers;
    }
    offers
        .into_iter()
        .filter(|o| range.contains(probability(o)))
        .collect()
}

pub fn apply_product_filter(offers: Vec<Offer>, filter: ProductFilter) -> Vec<Offer> {
    match filter {
        ProductFilter::All => offers,
        ProductFilter::Only(product) => offers
            .into_iter()
            .filter(|o| o.product_type == Some(product))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Sums
// ---------------------------------------------------------------------------

pub fn count_and_sum<'a, I>(offers: I) -> OfferTotals
where
    I: IntoIterator<Item = &'a Offer>,
{
    let mut count = 0;
    let mut value = 0.0;
    for offer in offers {
        count += 1;
        value += offer_value(offer);
    }
    OfferTotals {
        count,
        value: round_money(value),
    }
}

/// Sum of effective values for offers whose stage counts under `rule` and whose
/// effective period lies in `year` (and in `month`, when given).
pub fn orders_received<'a, I>(offers: I, year: i32, month: Option<u32>, rule: OrderStageRule) -> f64
where
    I: IntoIterator<Item = &'a Offer>,
{
    let total: f64 = offers
        .into_iter()
        .filter(|o| rule.counts(o.stage))
        .filter(|o| match (effective_period(o), month) {
            (Some(period), Some(m)) => period == month_key(year, m),
            (Some(period), None) => is_in_year(period, year),
            (None, _) => false,
        })
        .map(effective_value)
        .sum();
    round_money(total)
}

/// Offer values by offer month.
pub fn monthly_offer_values<'a, I>(offers: I, year: i32) -> MonthGrid
where
    I: IntoIterator<Item = &'a Offer>,
{
    let mut grid = [0.0; MONTHS_PER_YEAR];
    for offer in offers {
        if let Some(idx) = offer
            .offer_month
            .as_deref()
            .and_then(|m| calendar_month_index(m, year))
        {
            grid[idx] += offer_value(offer);
        }
    }
    round_grid(grid)
}

/// Offer values by effective period. Offers with no period at all are skipped.
pub fn monthly_forecast_values<'a, I>(offers: I, year: i32) -> MonthGrid
where
    I: IntoIterator<Item = &'a Offer>,
{
    let mut grid = [0.0; MONTHS_PER_YEAR];
    for offer in offers {
        if let Some(idx) = effective_period(offer).and_then(|p| calendar_month_index(p, year)) {
            grid[idx] += offer_value(offer);
        }
    }
    round_grid(grid)
}

/// Orders received by effective period.
pub fn monthly_orders_received<'a, I>(offers: I, year: i32, rule: OrderStageRule) -> MonthGrid
where
    I: IntoIterator<Item = &'a Offer>,
{
    let mut grid = [0.0; MONTHS_PER_YEAR];
    for offer in offers.into_iter().filter(|o| rule.counts(o.stage)) {
        if let Some(idx) = effective_period(offer).and_then(|p| calendar_month_index(p, year)) {
            grid[idx] += effective_value(offer);
        }
    }
    round_grid(grid)
}

/// Open funnel for month-level breakdowns: offers flagged open-funnel and not WON or
/// LOST, by offer month.
///
/// NOTE: the zone summary uses [`open_funnel_by_subtraction`] instead. The two
/// definitions disagree and are kept apart until the business owner confirms which
/// one is authoritative.
pub fn monthly_open_funnel<'a, I>(offers: I, year: i32) -> MonthGrid
where
    I: IntoIterator<Item = &'a Offer>,
{
    monthly_offer_values(
        offers
            .into_iter()
            .filter(|o| o.open_funnel && !o.stage.is_terminal()),
        year,
    )
}

/// Open funnel for the zone summary: offered value not yet received as orders.
///
/// NOTE: see [`monthly_open_funnel`] for the other, non-equivalent definition.
pub fn open_funnel_by_subtraction(offers_value: f64, orders_received: f64) -> f64 {
    round_money(offers_value - orders_received)
}

/// Running total through each month.
pub fn cumulative(grid: &MonthGrid) -> MonthGrid {
    let mut out = [0.0; MONTHS_PER_YEAR];
    let mut running = 0.0;
    for (i, value) in grid.iter().enumerate() {
        running += value;
        out[i] = round_money(running);
    }
    out
}

pub fn grid_total(grid: &MonthGrid) -> f64 {
    round_money(grid.iter().sum())
}

/// Copies up to twelve values into a grid; missing months stay 0.
pub fn grid_from(values: &[f64]) -> MonthGrid {
    let mut grid = [0.0; MONTHS_PER_YEAR];
    for (slot, value) in grid.iter_mut().zip(values) {
        *slot = *value;
    }
    grid
}

pub fn add_grids(into: &mut MonthGrid, other: &MonthGrid) {
    for (a, b) in into.iter_mut().zip(other.iter()) {
        *a = round_money(*a + b);
    }
}

fn round_grid(grid: MonthGrid) -> MonthGrid {
    grid.map(round_money)
}

// ---------------------------------------------------------------------------
// Ratios
// ---------------------------------------------------------------------------

/// `round(orders / offers * 100)`, or 0 when nothing was offered.
pub fn hit_rate(orders_received: f64, offers_value: f64) -> i64 {
    if offers_value > 0.0 {
        round_percent(orders_received / offers_value * 100.0) as i64
    } else {
        0
    }
}

/// Hit rate to one decimal, as the analytics dashboard shows it.
pub fn hit_rate_one_decimal(orders_received: f64, offers_value: f64) -> f64 {
    if offers_value > 0.0 {
        round_one_decimal(orders_received / offers_value * 100.0)
    } else {
        0.0
    }
}

pub fn balance_bu(yearly_target: f64, orders_received: f64) -> f64 {
    round_money(yearly_target - orders_received)
}

/// `(actual - target) / target * 100`. `None` when there is no positive target or no
/// actual to compare; a zero actual is "no data", not a deviation of -100%.
pub fn deviation(actual: f64, target: f64) -> Option<f64> {
    if target <= 0.0 || actual == 0.0 {
        return None;
    }
    Some(round_money((actual - target) / target * 100.0))
}

/// `actual / target * 100` to one decimal, `None` without a positive target.
pub fn achievement(actual: f64, target: f64) -> Option<f64> {
    if target > 0.0 {
        Some(round_one_decimal(actual / target * 100.0))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Quarters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarterRollup {
    pub quarter: String,
    pub forecast: f64,
    pub orders_received: f64,
    pub budget: f64,
    pub deviation: Option<f64>,
}

/// Sums each quarter's three months as they are, without re-rounding, so a quarter
/// always equals the sum of its months.
pub fn quarterly_rollup(
    forecast: &MonthGrid,
    orders: &MonthGrid,
    yearly_target: f64,
) -> Vec<QuarterRollup> {
    let budget = round_money(yearly_target / QUARTER_BUDGET_DIVISOR);
    let mut forecast_q = [0.0; QUARTERS_PER_YEAR];
    let mut orders_q = [0.0; QUARTERS_PER_YEAR];
    for month in 0..MONTHS_PER_YEAR {
        let q = quarter_of_month_index(month);
        forecast_q[q] += forecast[month];
        orders_q[q] += orders[month];
    }

    (0..QUARTERS_PER_YEAR)
        .map(|q| QuarterRollup {
            quarter: format!("Q{}", q + 1),
            forecast: forecast_q[q],
            orders_received: orders_q[q],
            budget,
            deviation: deviation(forecast_q[q], budget),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Monthly buckets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyBucket {
    pub month: String,
    pub label: String,
    pub offers_value: f64,
    pub orders_received: f64,
    /// Orders received from January through this month.
    pub orders_in_hand: f64,
    pub open_funnel: f64,
    pub budget: f64,
    pub deviation: Option<f64>,
}

/// Twelve calendar-month buckets for `offers`, compared against `budgets`.
pub fn monthly_buckets(
    offers: &[&Offer],
    year: i32,
    budgets: &MonthGrid,
    rule: OrderStageRule,
) -> Vec<MonthlyBucket> {
    let offered = monthly_offer_values(offers.iter().copied(), year);
    let orders = monthly_orders_received(offers.iter().copied(), year, rule);
    let in_hand = cumulative(&orders);
    let funnel = monthly_open_funnel(offers.iter().copied(), year);

    (0..MONTHS_PER_YEAR)
        .map(|i| {
            let month = i as u32 + 1;
            let budget = round_money(budgets[i]);
            MonthlyBucket {
                month: month_key(year, month),
                label: month_label(month).to_string(),
                offers_value: offered[i],
                orders_received: orders[i],
                orders_in_hand: in_hand[i],
                open_funnel: funnel[i],
                budget,
                deviation: deviation(orders[i], budget),
            }
        })
        .collect()
}

/// Sums the numeric columns of several bucket lists month by month and recomputes
/// deviation on the summed figures.
pub fn merge_buckets<'a, I>(lists: I, year: i32) -> Vec<MonthlyBucket>
where
    I: IntoIterator<Item = &'a Vec<MonthlyBucket>>,
{
    let mut offered = [0.0; MONTHS_PER_YEAR];
    let mut orders = [0.0; MONTHS_PER_YEAR];
    let mut funnel = [0.0; MONTHS_PER_YEAR];
    let mut budgets = [0.0; MONTHS_PER_YEAR];
    for list in lists {
        for (i, bucket) in list.iter().enumerate().take(MONTHS_PER_YEAR) {
            offered[i] += bucket.offers_value;
            orders[i] += bucket.orders_received;
            funnel[i] += bucket.open_funnel;
            budgets[i] += bucket.budget;
        }
    }
    let orders = round_grid(orders);
    let in_hand = cumulative(&orders);

    (0..MONTHS_PER_YEAR)
        .map(|i| {
            let month = i as u32 + 1;
            let budget = round_money(budgets[i]);
            MonthlyBucket {
                month: month_key(year, month),
                label: month_label(month).to_string(),
                offers_value: round_money(offered[i]),
                orders_received: orders[i],
                orders_in_hand: in_hand[i],
                open_funnel: round_money(funnel[i]),
                budget,
                deviation: deviation(orders[i], budget),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Offers keyed by effective owner. Offers with neither assignee nor creator are left
/// out.
pub fn group_by_owner<'a, I>(offers: I) -> BTreeMap<UserId, Vec<&'a Offer>>
where
    I: IntoIterator<Item = &'a Offer>,
{
    let mut groups: BTreeMap<UserId, Vec<&Offer>> = BTreeMap::new();
    for offer in offers {
        if let Some(owner) = effective_owner(offer) {
            groups.entry(owner).or_default().push(offer);
        }
    }
    groups
}

/// Offers keyed by product type. Offers without a product type are left out.
pub fn group_by_product<'a, I>(offers: I) -> BTreeMap<ProductType, Vec<&'a Offer>>
where
    I: IntoIterator<Item = &'a Offer>,
{
    let mut groups: BTreeMap<ProductType, Vec<&Offer>> = BTreeMap::new();
    for offer in offers {
        if let Some(product) = offer.product_type {
            groups.entry(product).or_default().push(offer);
        }
    }
    groups
}

/// A user as they appear in a zone-level report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub name: String,
    /// False for users who own offers in the zone without being a member of it.
    pub is_member: bool,
}

/// Members of a zone plus a synthetic entry for every other owner of an offer in
/// `offers`, sorted by name (then id).
pub fn zone_users(
    members: &[User],
    offers: &[Offer],
    directory: &HashMap<UserId, String>,
) -> Vec<UserRef> {
    let mut seen: HashSet<UserId> = HashSet::new();
    let mut users: Vec<UserRef> = Vec::new();

    for member in members {
        if seen.insert(member.id) {
            users.push(UserRef {
                id: member.id,
                name: member.name.clone(),
                is_member: true,
            });
        }
    }

    for owner in offers.iter().filter_map(effective_owner) {
        if seen.insert(owner) {
            users.push(UserRef {
                id: owner,
                name: user_display_name(owner, directory),
                is_member: false,
            });
        }
    }

    sort_users(&mut users);
    users
}

pub fn user_display_name(id: UserId, directory: &HashMap<UserId, String>) -> String {
    directory
        .get(&id)
        .cloned()
        .unwrap_or_else(|| format!("User #{}", id))
}

pub fn sort_users(users: &mut [UserRef]) {
    users.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::fixtures::{offer, won};
    use crate::schema::UserRole;

    #[test]
    fn test_count_and_sum() {
        let offers = vec![offer(1, 1, 100.10, "2024-01"), offer(2, 1, 200.20, "2024-02")];
        let totals = count_and_sum(&offers);
        assert_eq!(totals.count, 2);
        assert_eq!(totals.value, 300.3);
    }

    #[test]
    fn test_orders_received_uses_effective_fields() {
        let offers = vec![
            won(1, 1, 1000.0, 1200.0, "2024-03"),
            won(2, 1, 500.0, 700.0, "2023-12"),
            offer(3, 1, 900.0, "2024-03"),
        ];
        assert_eq!(orders_received(&offers, 2024, None, OrderStageRule::WonOnly), 1200.0);
        assert_eq!(orders_received(&offers, 2024, Some(3), OrderStageRule::WonOnly), 1200.0);
        assert_eq!(orders_received(&offers, 2024, Some(4), OrderStageRule::WonOnly), 0.0);
    }

    #[test]
    fn test_order_stage_rule_variants() {
        let mut po = offer(1, 1, 800.0, "2024-02");
        po.stage = OfferStage::PoReceived;
        let offers = vec![po, won(2, 1, 100.0, 100.0, "2024-02")];
        assert_eq!(orders_received(&offers, 2024, None, OrderStageRule::WonOnly), 100.0);
        assert_eq!(
            orders_received(&offers, 2024, None, OrderStageRule::WonOrPoReceived),
            900.0
        );
    }

    #[test]
    fn test_offer_without_period_skips_month_grids_only() {
        let mut o = won(1, 1, 1000.0, 1000.0, "2024-03");
        o.offer_month = None;
        o.po_received_month = None;
        let offers = vec![o];
        let orders = monthly_orders_received(&offers, 2024, OrderStageRule::WonOnly);
        assert_eq!(grid_total(&orders), 0.0);
        assert_eq!(count_and_sum(&offers).value, 1000.0);
    }

    #[test]
    fn test_open_funnel_definitions_differ() {
        let mut lost = offer(1, 1, 300.0, "2024-01");
        lost.stage = OfferStage::Lost;
        let mut closed_flag = offer(2, 1, 200.0, "2024-01");
        closed_flag.open_funnel = false;
        let offers = vec![
            offer(3, 1, 500.0, "2024-01"),
            lost,
            closed_flag,
            won(4, 1, 1000.0, 1000.0, "2024-01"),
        ];

        let funnel = monthly_open_funnel(&offers, 2024);
        assert_eq!(funnel[0], 500.0);

        let totals = count_and_sum(&offers);
        let orders = orders_received(&offers, 2024, None, OrderStageRule::WonOnly);
        assert_eq!(open_funnel_by_subtraction(totals.value, orders), 1000.0);
    }

    #[test]
    fn test_hit_rate() {
        assert_eq!(hit_rate(1200.0, 0.0), 0);
        assert_eq!(hit_rate(1.0, 3.0), 33);
        assert_eq!(hit_rate(2.0, 3.0), 67);
        assert_eq!(hit_rate_one_decimal(2.0, 3.0), 66.7);
        assert_eq!(hit_rate_one_decimal(5.0, 0.0), 0.0);
    }

    #[test]
    fn test_deviation_null_safety() {
        assert_eq!(deviation(1200.0, 400.0), Some(200.0));
        assert_eq!(deviation(300.0, 400.0), Some(-25.0));
        assert_eq!(deviation(1200.0, 0.0), None);
        assert_eq!(deviation(1200.0, -5.0), None);
        assert_eq!(deviation(0.0, 400.0), None);
    }

    #[test]
    fn test_balance_and_achievement() {
        assert_eq!(balance_bu(4800.0, 1200.0), 3600.0);
        assert_eq!(achievement(1200.0, 4800.0), Some(25.0));
        assert_eq!(achievement(1200.0, 0.0), None);
    }

    #[test]
    fn test_quarterly_rollup_identity() {
        let forecast = [
            100.1, 200.2, 300.3, 1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 10.0, 20.0, 30.0,
        ];
        let orders = [0.0; 12];
        let quarters = quarterly_rollup(&forecast, &orders, 4800.0);
        assert_eq!(quarters.len(), 4);
        assert_eq!(quarters[0].forecast, forecast[0] + forecast[1] + forecast[2]);
        assert_eq!(quarters[0].budget, 1600.0);
        assert_eq!(quarters[2].deviation, None);
        assert_eq!(quarters[3].quarter, "Q4");
    }

    #[test]
    fn test_monthly_buckets() {
        let offers = vec![won(1, 1, 1000.0, 1200.0, "2024-03"), offer(2, 1, 250.0, "2024-05")];
        let refs: Vec<&Offer> = offers.iter().collect();
        let budgets = [400.0; 12];
        let buckets = monthly_buckets(&refs, 2024, &budgets, OrderStageRule::WonOnly);

        assert_eq!(buckets.len(), 12);
        assert_eq!(buckets[2].month, "2024-03");
        assert_eq!(buckets[2].label, "Mar");
        assert_eq!(buckets[2].orders_received, 1200.0);
        assert_eq!(buckets[2].deviation, Some(200.0));
        assert_eq!(buckets[1].deviation, None);
        assert_eq!(buckets[4].orders_in_hand, 1200.0);
        assert_eq!(buckets[4].open_funnel, 250.0);
        assert_eq!(buckets[11].orders_in_hand, 1200.0);
    }

    #[test]
    fn test_merge_buckets() {
        let a = vec![won(1, 1, 100.0, 100.0, "2024-01")];
        let b = vec![won(2, 2, 50.0, 60.0, "2024-01")];
        let a_refs: Vec<&Offer> = a.iter().collect();
        let b_refs: Vec<&Offer> = b.iter().collect();
        let lists = vec![
            monthly_buckets(&a_refs, 2024, &[100.0; 12], OrderStageRule::WonOnly),
            monthly_buckets(&b_refs, 2024, &[0.0; 12], OrderStageRule::WonOnly),
        ];
        let merged = merge_buckets(&lists, 2024);
        assert_eq!(merged[0].orders_received, 160.0);
        assert_eq!(merged[0].budget, 100.0);
        assert_eq!(merged[0].deviation, Some(60.0));
    }

    #[test]
    fn test_zone_users_adds_synthetic_owners() {
        let members = vec![User {
            id: 1,
            name: "Zara".to_string(),
            role: UserRole::ZoneUser,
            zone_ids: vec![1],
        }];
        let mut outsider = offer(1, 1, 100.0, "2024-01");
        outsider.created_by_id = Some(2);
        let mut unowned = offer(2, 1, 100.0, "2024-01");
        unowned.assigned_to_id = None;
        let offers = vec![outsider, unowned];
        let directory = HashMap::from([(2, "Bilal".to_string())]);

        let users = zone_users(&members, &offers, &directory);
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].name, "Bilal");
        assert!(!users[0].is_member);
        assert_eq!(users[1].name, "Zara");
        assert!(users[1].is_member);

        let groups = group_by_owner(&offers);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[&2].len(), 1);
    }

    #[test]
    fn test_probability_filter_keeps_full_value() {
        let mut low = offer(1, 1, 1000.0, "2024-01");
        low.probability_percentage = Some(40);
        let mut high = offer(2, 1, 1000.0, "2024-01");
        high.probability_percentage = Some(60);
        let kept = apply_probability(vec![low, high], ProbabilityRange { min: 50, max: 100 });
        assert_eq!(kept.len(), 1);
        assert_eq!(count_and_sum(&kept).value, 1000.0);
    }
}
