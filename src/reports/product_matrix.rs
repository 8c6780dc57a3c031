use super::{base_criteria, run_report, user_directory, ForecastReports, ZoneSnapshot};
use crate::aggregation::{group_by_owner, zone_users, UserRef};
use crate::config::{ProductFilter, ReportQuery};
use crate::error::{ReportKind, Result};
use crate::normalize::{round_money, sum_money};
use crate::period::{calendar_month_labels, year_key};
use crate::resolver::offer_value;
use crate::schema::{ProductType, UserId, ZoneId};
use crate::store::{ForecastStore, OfferCriteria};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One product type across the users of a zone. `values` lines up with
/// [`ZoneProductMatrix::users`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMatrixRow {
    pub product_type: ProductType,
    pub values: Vec<f64>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneProductMatrix {
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub users: Vec<UserRef>,
    pub products: Vec<ProductMatrixRow>,
    pub user_totals: Vec<f64>,
    pub zone_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMatrixTotals {
    pub by_product: BTreeMap<ProductType, f64>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMatrixReport {
    pub year: i32,
    pub filters: ReportQuery,
    pub zones: Vec<ZoneProductMatrix>,
    pub overall_totals: ProductMatrixTotals,
    /// Row order of every zone's `products`.
    pub product_types: Vec<ProductType>,
    pub months: Vec<String>,
}

fn matrix_products(filter: ProductFilter) -> Vec<ProductType> {
    match filter {
        ProductFilter::All => ProductType::ALL.to_vec(),
        ProductFilter::Only(product) => vec![product],
    }
}

impl<'a, S: ForecastStore + ?Sized> ForecastReports<'a, S> {
    /// Per zone, offer value summed by product type and user for offers made in the year.
    pub async fn product_user_zone_matrix(
        &self,
        query: &ReportQuery,
    ) -> Result<ProductMatrixReport> {
        run_report(
            ReportKind::ProductUserZoneMatrix,
            self.build_product_user_zone_matrix(query),
        )
        .await
    }

    async fn build_product_user_zone_matrix(
        &self,
        query: &ReportQuery,
    ) -> Result<ProductMatrixReport> {
        info!("Building product/user/zone matrix for {}", query.year);
        let zones = self.zones(query).await?;
        let snapshots = self
            .zone_snapshots(&zones, query, |zone| OfferCriteria {
                offer_month_prefix: Some(year_key(query.year)),
                ..base_criteria(zone, query)
            })
            .await?;

        let products = matrix_products(query.product_type);
        let directory = user_directory(&snapshots);
        let rows: Vec<ZoneProductMatrix> = snapshots
            .iter()
            .map(|snapshot| zone_matrix(snapshot, &products, &directory, query))
            .collect();

        let by_product: BTreeMap<ProductType, f64> = products
            .iter()
            .enumerate()
            .map(|(i, product)| {
                let total = sum_money(rows.iter().map(|r| r.products[i].total));
                (*product, total)
            })
            .collect();
        let total = sum_money(rows.iter().map(|r| r.zone_total));

        Ok(ProductMatrixReport {
            year: query.year,
            filters: query.clone(),
            zones: rows,
            overall_totals: ProductMatrixTotals { by_product, total },
            product_types: products,
            months: calendar_month_labels(),
        })
    }
}

fn zone_matrix(
    snapshot: &ZoneSnapshot,
    products: &[ProductType],
    directory: &HashMap<UserId, String>,
    query: &ReportQuery,
) -> ZoneProductMatrix {
    let users: Vec<UserRef> = zone_users(&snapshot.members, &snapshot.offers, directory)
        .into_iter()
        .filter(|user| query.user_id.map_or(true, |id| id == user.id))
        .collect();

    let mut cells: HashMap<(ProductType, UserId), f64> = HashMap::new();
    for (owner, offers) in group_by_owner(&snapshot.offers) {
        for offer in offers {
            if let Some(product) = offer.product_type {
                *cells.entry((product, owner)).or_insert(0.0) += offer_value(offer);
            }
        }
    }

    let product_rows: Vec<ProductMatrixRow> = products
        .iter()
        .map(|product| {
            let values: Vec<f64> = users
                .iter()
                .map(|user| round_money(cells.get(&(*product, user.id)).copied().unwrap_or(0.0)))
                .collect();
            ProductMatrixRow {
                product_type: *product,
                total: sum_money(values.iter().copied()),
                values,
            }
        })
        .collect();

    let user_totals: Vec<f64> = (0..users.len())
        .map(|col| sum_money(product_rows.iter().map(|row| row.values[col])))
        .collect();
    let zone_total = sum_money(product_rows.iter().map(|row| row.total));

    ZoneProductMatrix {
        zone_id: snapshot.zone.id,
        zone_name: snapshot.zone.name.clone(),
        users,
        products: product_rows,
        user_totals,
        zone_total,
    }
}
