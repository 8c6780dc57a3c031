use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

pub type ZoneId = i64;
pub type UserId = i64;

/// A numeric-like monetary input as it arrives from the data layer.
///
/// Deserialization tries a JSON number first, then a fixed-point decimal string,
/// and finally keeps any other string verbatim so it can be normalized to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Amount {
    Float(f64),
    Fixed(#[schemars(with = "String")] Decimal),
    Text(String),
}

impl From<f64> for Amount {
    fn from(value: f64) -> Self {
        Amount::Float(value)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount::Fixed(value)
    }
}

impl From<&str> for Amount {
    fn from(value: &str) -> Self {
        Amount::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferStage {
    #[default]
    Initial,
    ProposalSent,
    Negotiation,
    PoReceived,
    Won,
    Lost,
}

impl OfferStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OfferStage::Won | OfferStage::Lost)
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductType {
    Contract,
    BdSpare,
    Spp,
    Relocation,
    Software,
    BdCharges,
    RetrofitKit,
    UpgradeKit,
    MidlifeUpgrade,
    Training,
}

impl ProductType {
    pub const ALL: [ProductType; 10] = [
        ProductType::Contract,
        ProductType::BdSpare,
        ProductType::Spp,
        ProductType::Relocation,
        ProductType::Software,
        ProductType::BdCharges,
        ProductType::RetrofitKit,
        ProductType::UpgradeKit,
        ProductType::MidlifeUpgrade,
        ProductType::Training,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ProductType::Contract => "CONTRACT",
            ProductType::BdSpare => "BD_SPARE",
            ProductType::Spp => "SPP",
            ProductType::Relocation => "RELOCATION",
            ProductType::Software => "SOFTWARE",
            ProductType::BdCharges => "BD_CHARGES",
            ProductType::RetrofitKit => "RETROFIT_KIT",
            ProductType::UpgradeKit => "UPGRADE_KIT",
            ProductType::MidlifeUpgrade => "MIDLIFE_UPGRADE",
            ProductType::Training => "TRAINING",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.code().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    ZoneManager,
    ZoneUser,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodType {
    Yearly,
    Monthly,
}

/// Whose quota a target is.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema,
)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TargetScope {
    Zone(ZoneId),
    User(UserId),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Offer {
    pub id: i64,

    #[schemars(description = "Proposed value of the offer")]
    #[serde(default)]
    pub offer_value: Option<Amount>,

    #[schemars(description = "Actual purchase order value, usually null until the offer is won")]
    #[serde(default)]
    pub po_value: Option<Amount>,

    #[schemars(description = "Planned period in YYYY-MM format")]
    #[serde(default, deserialize_with = "lenient")]
    pub offer_month: Option<String>,

    #[schemars(description = "Period the purchase order was actually received, YYYY-MM")]
    #[serde(default, deserialize_with = "lenient")]
    pub po_received_month: Option<String>,

    #[schemars(description = "Period the purchase order is expected to close, YYYY-MM")]
    #[serde(default, deserialize_with = "lenient")]
    pub po_expected_month: Option<String>,

    #[schemars(description = "Pipeline stage; unknown or missing stages read as INITIAL")]
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub stage: OfferStage,

    #[schemars(description = "Win probability from 0 to 100; missing is treated as 0")]
    #[serde(default, deserialize_with = "lenient_probability")]
    pub probability_percentage: Option<u8>,

    #[serde(default, deserialize_with = "lenient")]
    pub product_type: Option<ProductType>,

    #[schemars(description = "True while the offer is still an active pipeline item")]
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub open_funnel: bool,

    pub zone_id: ZoneId,

    #[serde(default, deserialize_with = "lenient")]
    pub assigned_to_id: Option<UserId>,

    #[serde(default, deserialize_with = "lenient")]
    pub created_by_id: Option<UserId>,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Target {
    pub scope: TargetScope,

    #[schemars(description = "YYYY for yearly targets, YYYY-MM for monthly targets")]
    pub target_period: String,

    pub period_type: PeriodType,

    #[schemars(description = "Null for the overall target, otherwise a product-specific target")]
    #[serde(default)]
    pub product_type: Option<ProductType>,

    pub target_value: Amount,
}

impl Target {
    /// The calendar year this target belongs to, if the period is well formed.
    pub fn year(&self) -> Option<i32> {
        crate::period::parse_period_year(&self.target_period)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ServiceZone {
    pub id: ZoneId,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub role: UserRole,
    #[serde(default)]
    pub zone_ids: Vec<ZoneId>,
}

fn default_true() -> bool {
    true
}

/// A field that does not parse as `T` reads as absent instead of failing the record.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn lenient_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(lenient(deserializer)?.unwrap_or_default())
}

/// Numbers and numeric strings, rounded and clamped to 0..=100. Anything else is `None`.
fn lenient_probability<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(number
        .filter(|p| p.is_finite())
        .map(|p| p.round().clamp(0.0, 100.0) as u8))
}

/// Everything a report reads, bundled for the in-memory store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ForecastDataset {
    #[serde(default)]
    pub zones: Vec<ServiceZone>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub offers: Vec<Offer>,
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl ForecastDataset {
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ForecastDataset)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_generation() {
        let schema_json = ForecastDataset::schema_as_json().unwrap();
        assert!(schema_json.contains("offers"));
        assert!(schema_json.contains("po_received_month"));
        assert!(schema_json.contains("target_period"));
    }

    #[test]
    fn test_amount_deserialization_variants() {
        let amounts: Vec<Amount> = serde_json::from_str(r#"[1250.5, "99.99", "n/a"]"#).unwrap();
        assert_eq!(amounts[0], Amount::Float(1250.5));
        assert!(matches!(amounts[1], Amount::Fixed(_)));
        assert_eq!(amounts[2], Amount::Text("n/a".to_string()));
    }

    #[test]
    fn test_dataset_from_json() {
        let json = r#"{
            "zones": [{"id": 1, "name": "North"}],
            "users": [{"id": 7, "name": "Asha", "role": "ZONE_USER", "zone_ids": [1]}],
            "offers": [{
                "id": 10,
                "offer_value": "1000.00",
                "offer_month": "2024-02",
                "stage": "PO_RECEIVED",
                "zone_id": 1,
                "assigned_to_id": 7,
                "created_at": "2024-02-10T09:00:00Z"
            }],
            "targets": [{
                "scope": {"kind": "zone", "id": 1},
                "target_period": "2024",
                "period_type": "YEARLY",
                "target_value": 4800
            }]
        }"#;

        let dataset = ForecastDataset::from_json(json).unwrap();
        assert!(dataset.zones[0].is_active);
        assert_eq!(dataset.offers[0].stage, OfferStage::PoReceived);
        assert_eq!(dataset.offers[0].po_value, None);
        assert_eq!(dataset.targets[0].scope, TargetScope::Zone(1));
        assert_eq!(dataset.targets[0].year(), Some(2024));
    }

    #[test]
    fn test_malformed_offer_fields_degrade() {
        let offers: Vec<Offer> = serde_json::from_str(
            r#"[{
                "id": 1,
                "offer_value": 500,
                "offer_month": 202403,
                "po_expected_month": "2024-07",
                "stage": "ON_HOLD",
                "probability_percentage": 55.5,
                "product_type": "WIDGETS",
                "open_funnel": "yes",
                "zone_id": 1,
                "assigned_to_id": "seven",
                "created_at": "2024-03-01T00:00:00Z"
            }]"#,
        )
        .unwrap();

        let offer = &offers[0];
        assert_eq!(offer.offer_month, None);
        assert_eq!(offer.po_expected_month.as_deref(), Some("2024-07"));
        assert_eq!(offer.stage, OfferStage::Initial);
        assert_eq!(offer.probability_percentage, Some(56));
        assert_eq!(offer.product_type, None);
        assert!(!offer.open_funnel);
        assert_eq!(offer.assigned_to_id, None);
    }

    #[test]
    fn test_probability_is_clamped() {
        let read = |raw: &str| -> Option<u8> {
            let json = format!(
                r#"{{"id": 1, "zone_id": 1, "created_at": "2024-01-01T00:00:00Z",
                    "probability_percentage": {}}}"#,
                raw
            );
            serde_json::from_str::<Offer>(&json).unwrap().probability_percentage
        };
        assert_eq!(read("250"), Some(100));
        assert_eq!(read("-20"), Some(0));
        assert_eq!(read(r#""75""#), Some(75));
        assert_eq!(read(r#""high""#), None);
        assert_eq!(read("null"), None);
    }

    #[test]
    fn test_product_codes() {
        assert_eq!(ProductType::from_code("bd_spare"), Some(ProductType::BdSpare));
        assert_eq!(ProductType::from_code("ALL"), None);
        assert_eq!(ProductType::MidlifeUpgrade.to_string(), "MIDLIFE_UPGRADE");
    }
}
