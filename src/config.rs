use crate::error::{ForecastError, Result};
use crate::period::{validate_financial_year_start_month, FINANCIAL_YEAR_START_MONTH};
use crate::schema::{ProductType, UserId, UserRole, ZoneId};
use crate::store::ProbabilityRange;
use chrono::{Datelike, Utc};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;

/// Years a report can be asked for.
pub const REPORT_YEARS: RangeInclusive<i32> = 1900..=9999;

const ALL_PRODUCTS: &str = "ALL";

/// `productType` query value: either every product or just one. Serialized the way it
/// arrives in the query string, as `"ALL"` or a product code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ProductFilter {
    #[default]
    All,
    Only(ProductType),
}

impl ProductFilter {
    pub fn as_option(&self) -> Option<ProductType> {
        match self {
            ProductFilter::All => None,
            ProductFilter::Only(product) => Some(*product),
        }
    }
}

impl fmt::Display for ProductFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductFilter::All => f.write_str(ALL_PRODUCTS),
            ProductFilter::Only(product) => f.write_str(product.code()),
        }
    }
}

impl From<ProductFilter> for String {
    fn from(filter: ProductFilter) -> Self {
        filter.to_string()
    }
}

impl TryFrom<String> for ProductFilter {
    type Error = ForecastError;

    fn try_from(value: String) -> Result<Self> {
        if value.trim().eq_ignore_ascii_case(ALL_PRODUCTS) {
            return Ok(ProductFilter::All);
        }
        ProductType::from_code(&value)
            .map(ProductFilter::Only)
            .ok_or_else(|| {
                ForecastError::InvalidCriteria(format!("unknown product type '{}'", value))
            })
    }
}

/// Parameters shared by every report request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub year: i32,
    pub min_probability: u8,
    pub max_probability: u8,
    pub zone_id: Option<ZoneId>,
    pub user_id: Option<UserId>,
    pub product_type: ProductFilter,
    /// Adds the per-product breakdown to the monthly breakdown report.
    pub include_products: bool,
}

impl ReportQuery {
    pub fn for_year(year: i32) -> Self {
        Self {
            year,
            min_probability: 0,
            max_probability: 100,
            zone_id: None,
            user_id: None,
            product_type: ProductFilter::All,
            include_products: false,
        }
    }

    /// Builds a query from raw request parameters, falling back to defaults for anything
    /// missing or malformed.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        Self::from_params_at(params, Utc::now().year())
    }

    pub fn from_params_at(params: &HashMap<String, String>, current_year: i32) -> Self {
        let get = |key: &str| params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let year = get("year")
            .and_then(|v| v.parse::<i32>().ok())
            .filter(|y| REPORT_YEARS.contains(y))
            .unwrap_or(current_year);

        let mut min_probability = get("minProbability")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 100.0) as u8)
            .unwrap_or(0);
        let mut max_probability = get("maxProbability")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 100.0) as u8)
            .unwrap_or(100);
        if min_probability > max_probability {
            debug!(
                "Probability range {}..{} is inverted; using the full range",
                min_probability, max_probability
            );
            min_probability = 0;
            max_probability = 100;
        }

        let zone_id = get("zoneId").and_then(|v| v.parse::<ZoneId>().ok());
        let user_id = get("userId").and_then(|v| v.parse::<UserId>().ok());

        let product_type = get("productType")
            .and_then(|v| ProductFilter::try_from(v.to_string()).ok())
            .unwrap_or_default();

        let include_products = get("includeProducts")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        Self {
            year,
            min_probability,
            max_probability,
            zone_id,
            user_id,
            product_type,
            include_products,
        }
    }

    /// Rejects queries built by hand that `from_params` would never produce.
    pub fn validate(&self) -> Result<()> {
        if !REPORT_YEARS.contains(&self.year) {
            return Err(ForecastError::InvalidCriteria(format!(
                "year {} is outside {}..={}",
                self.year,
                REPORT_YEARS.start(),
                REPORT_YEARS.end()
            )));
        }
        self.probability_range().validate()
    }

    pub fn probability_range(&self) -> ProbabilityRange {
        ProbabilityRange {
            min: self.min_probability,
            max: self.max_probability,
        }
    }
}

/// Engine-wide settings. Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ForecastSettings {
    #[schemars(description = "First month (1-12) of the financial year used by the product-wise forecast")]
    pub financial_year_start_month: u32,

    #[schemars(description = "How many users the analytics dashboard lists as top performers")]
    pub top_performers: usize,

    #[schemars(description = "Roles listed as zone members in user-level reports")]
    pub member_roles: Vec<UserRole>,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            financial_year_start_month: FINANCIAL_YEAR_START_MONTH,
            top_performers: 10,
            member_roles: vec![UserRole::ZoneManager, UserRole::ZoneUser],
        }
    }
}

impl ForecastSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: ForecastSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        validate_financial_year_start_month(self.financial_year_start_month)?;
        if self.top_performers == 0 {
            return Err(ForecastError::InvalidSettings(
                "top_performers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_empty() {
        let query = ReportQuery::from_params_at(&HashMap::new(), 2025);
        assert_eq!(query, ReportQuery::for_year(2025));
    }

    #[test]
    fn test_parses_well_formed_params() {
        let query = ReportQuery::from_params_at(
            &params(&[
                ("year", "2024"),
                ("minProbability", "50"),
                ("maxProbability", "90"),
                ("zoneId", "3"),
                ("userId", "12"),
                ("productType", "spp"),
                ("includeProducts", "true"),
            ]),
            2025,
        );
        assert_eq!(query.year, 2024);
        assert_eq!(query.probability_range(), ProbabilityRange { min: 50, max: 90 });
        assert_eq!(query.zone_id, Some(3));
        assert_eq!(query.user_id, Some(12));
        assert_eq!(query.product_type, ProductFilter::Only(ProductType::Spp));
        assert!(query.include_products);
    }

    #[test]
    fn test_malformed_params_are_coerced() {
        let query = ReportQuery::from_params_at(
            &params(&[
                ("year", "twenty24"),
                ("minProbability", "-5"),
                ("maxProbability", "abc"),
                ("zoneId", "north"),
                ("productType", "WIDGETS"),
            ]),
            2025,
        );
        assert_eq!(query.year, 2025);
        assert_eq!(query.min_probability, 0);
        assert_eq!(query.max_probability, 100);
        assert_eq!(query.zone_id, None);
        assert_eq!(query.product_type, ProductFilter::All);
    }

    #[test]
    fn test_inverted_probability_range_resets() {
        let query = ReportQuery::from_params_at(
            &params(&[("minProbability", "80"), ("maxProbability", "20")]),
            2025,
        );
        assert_eq!(query.probability_range(), ProbabilityRange::FULL);
    }

    #[test]
    fn test_product_filter_echoes_query_value() {
        let query = ReportQuery {
            product_type: ProductFilter::Only(ProductType::BdSpare),
            ..ReportQuery::for_year(2024)
        };
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["productType"], "BD_SPARE");
        assert_eq!(json["includeProducts"], false);
        let back: ReportQuery = serde_json::from_value(json).unwrap();
        assert_eq!(back, query);

        let all = serde_json::to_value(ReportQuery::for_year(2024)).unwrap();
        assert_eq!(all["productType"], "ALL");
        assert!(serde_json::from_str::<ProductFilter>(r#""WIDGETS""#).is_err());
    }

    #[test]
    fn test_out_of_range_year_is_rejected() {
        assert!(ReportQuery::for_year(2024).validate().is_ok());
        assert!(ReportQuery::for_year(i32::MAX).validate().is_err());
        let inverted = ReportQuery {
            min_probability: 90,
            max_probability: 10,
            ..ReportQuery::for_year(2024)
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_settings_defaults_and_validation() {
        let settings = ForecastSettings::from_json("{}").unwrap();
        assert_eq!(settings, ForecastSettings::default());
        assert_eq!(settings.financial_year_start_month, 3);

        assert!(ForecastSettings::from_json(r#"{"financial_year_start_month": 13}"#).is_err());
        assert!(ForecastSettings::from_json(r#"{"top_performers": 0}"#).is_err());
    }
}
