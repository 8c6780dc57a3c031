//! # Sales Forecast Engine
//!
//! Read-side aggregation for a sales pipeline: offers, purchase orders and sales targets
//! are rolled up by service zone, user, product type and period into forecast reports.
//!
//! ## Core Concepts
//!
//! - **Offer**: a sales proposal with an offer value, a stage and optionally a PO
//! - **Effective value / period**: the PO value and PO-received month when present,
//!   otherwise the offer's own value and month, each resolved on its own
//! - **Orders received**: the effective value of won offers in a period
//! - **Targets**: yearly or monthly quotas per zone or user, overall or per product
//! - **Reports**: zone summary, monthly breakdowns, PO-expected months, product
//!   matrix, product-wise forecast and the analytics dashboard
//!
//! Data is read through the [`ForecastStore`] trait. [`InMemoryStore`] serves a
//! [`ForecastDataset`] loaded from JSON.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sales_forecast_engine::*;
//!
//! let store = InMemoryStore::from_json(&std::fs::read_to_string("pipeline.json")?)?;
//! let reports = ForecastReports::new(&store);
//!
//! let query = ReportQuery {
//!     min_probability: 50,
//!     ..ReportQuery::for_year(2024)
//! };
//!
//! let summary = reports.zone_summary(&query).await?;
//! for zone in &summary.zones {
//!     println!(
//!         "{}: {} received of {} target ({}% hit rate)",
//!         zone.zone_name,
//!         zone.figures.orders_received,
//!         zone.figures.yearly_target,
//!         zone.figures.hit_rate
//!     );
//! }
//! ```

pub mod aggregation;
pub mod config;
pub mod error;
pub mod normalize;
pub mod period;
pub mod reports;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod targets;

pub use aggregation::{MonthlyBucket, OrderStageRule, QuarterRollup, UserRef};
pub use config::{ForecastSettings, ProductFilter, ReportQuery};
pub use error::{ForecastError, ReportKind, Result};
pub use normalize::normalize;
pub use reports::*;
pub use resolver::{effective_owner, effective_period, effective_value, forecast_period};
pub use schema::*;
pub use store::{ForecastStore, InMemoryStore, OfferCriteria, ProbabilityRange, TargetCriteria};
pub use targets::{TargetBook, OFFER_BU_MULTIPLIER};

use log::info;
use serde::{Deserialize, Serialize};

/// Every report for one query, built concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastBundle {
    pub zone_summary: ZoneSummaryReport,
    pub monthly_breakdown: MonthlyBreakdownReport,
    pub user_monthly_breakdown: UserMonthlyBreakdownReport,
    pub po_expected_month_breakdown: PoExpectedReport,
    pub product_user_zone_matrix: ProductMatrixReport,
    pub product_wise_forecast: ProductForecastReport,
    pub analytics: AnalyticsReport,
}

impl<'a, S: ForecastStore + ?Sized> ForecastReports<'a, S> {
    /// Builds all reports at once. The first failing report fails the bundle with that
    /// report's error.
    pub async fn all_reports(&self, query: &ReportQuery) -> Result<ForecastBundle> {
        info!("Building all forecast reports for {}", query.year);
        let (
            zone_summary,
            monthly_breakdown,
            user_monthly_breakdown,
            po_expected_month_breakdown,
            product_user_zone_matrix,
            product_wise_forecast,
            analytics,
        ) = futures::try_join!(
            self.zone_summary(query),
            self.monthly_breakdown(query),
            self.user_monthly_breakdown(query),
            self.po_expected_month_breakdown(query),
            self.product_user_zone_matrix(query),
            self.product_wise_forecast(query),
            self.analytics_dashboard(query),
        )?;

        Ok(ForecastBundle {
            zone_summary,
            monthly_breakdown,
            user_monthly_breakdown,
            po_expected_month_breakdown,
            product_user_zone_matrix,
            product_wise_forecast,
            analytics,
        })
    }
}

/// Builds every report for `query` from a JSON dataset with default settings.
pub async fn build_reports_from_json(
    dataset_json: &str,
    query: &ReportQuery,
) -> Result<ForecastBundle> {
    let store = InMemoryStore::from_json(dataset_json)?;
    ForecastReports::new(&store).all_reports(query).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET: &str = r#"{
        "zones": [
            {"id": 1, "name": "North"},
            {"id": 2, "name": "South"},
            {"id": 3, "name": "Closed", "is_active": false}
        ],
        "users": [
            {"id": 10, "name": "Asha", "role": "ZONE_USER", "zone_ids": [1]},
            {"id": 20, "name": "Ravi", "role": "ZONE_MANAGER", "zone_ids": [2]}
        ],
        "offers": [
            {
                "id": 1, "offer_value": 1000, "po_value": "1200.00",
                "offer_month": "2024-02", "po_received_month": "2024-03",
                "stage": "WON", "probability_percentage": 100, "product_type": "SPP",
                "zone_id": 1, "assigned_to_id": 10, "created_at": "2024-02-01T00:00:00Z"
            },
            {
                "id": 2, "offer_value": 500, "offer_month": "2024-05",
                "po_expected_month": "2024-07", "stage": "NEGOTIATION",
                "probability_percentage": 60, "product_type": "CONTRACT", "open_funnel": true,
                "zone_id": 2, "assigned_to_id": 20, "created_at": "2024-05-03T00:00:00Z"
            }
        ],
        "targets": [
            {"scope": {"kind": "zone", "id": 1}, "target_period": "2024",
             "period_type": "YEARLY", "target_value": 4800}
        ]
    }"#;

    #[tokio::test]
    async fn test_build_reports_from_json() {
        let bundle = build_reports_from_json(DATASET, &ReportQuery::for_year(2024))
            .await
            .unwrap();

        let names: Vec<&str> = bundle
            .zone_summary
            .zones
            .iter()
            .map(|z| z.zone_name.as_str())
            .collect();
        assert_eq!(names, vec!["North", "South"]);
        assert_eq!(bundle.zone_summary.overall_totals.offers_value, 1500.0);
        assert_eq!(bundle.zone_summary.zones[0].figures.balance_bu, 3600.0);
        assert_eq!(bundle.analytics.overview.won_value, 1200.0);
        assert_eq!(bundle.po_expected_month_breakdown.overall_totals.months[6], 500.0);
    }

    #[tokio::test]
    async fn test_malformed_record_does_not_reject_dataset() {
        let dataset = r#"{
            "zones": [{"id": 1, "name": "North"}],
            "offers": [
                {
                    "id": 1, "offer_value": 300, "offer_month": "2024-04",
                    "stage": "NEGOTIATION", "probability_percentage": 55.5,
                    "zone_id": 1, "created_at": "2024-04-02T00:00:00Z"
                },
                {
                    "id": 2, "offer_value": 700, "offer_month": "2024-04",
                    "stage": "NEGOTIATION", "probability_percentage": 60,
                    "zone_id": 1, "created_at": "2024-04-03T00:00:00Z"
                },
                {
                    "id": 3, "offer_value": 50, "offer_month": "2024-04",
                    "stage": "NEGOTIATION", "probability_percentage": 180,
                    "zone_id": 1, "created_at": "2024-04-04T00:00:00Z"
                }
            ]
        }"#;
        let bundle = build_reports_from_json(dataset, &ReportQuery::for_year(2024))
            .await
            .unwrap();
        let north = &bundle.zone_summary.zones[0].figures;
        assert_eq!(north.no_of_offers, 3);
        assert_eq!(north.offers_value, 1050.0);

        let query = ReportQuery {
            min_probability: 57,
            ..ReportQuery::for_year(2024)
        };
        let bundle = build_reports_from_json(dataset, &query).await.unwrap();
        assert_eq!(bundle.zone_summary.zones[0].figures.offers_value, 750.0);
    }

    #[tokio::test]
    async fn test_bad_dataset_is_a_serialization_error() {
        let err = build_reports_from_json("{ not json", &ReportQuery::for_year(2024))
            .await
            .unwrap_err();
        assert!(matches!(err, ForecastError::SerializationError(_)));
    }
}
