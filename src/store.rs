//! Data access for report assembly.
//!
//! Reports never reach for a global client: a [`ForecastStore`] is passed in by the
//! caller and lives as long as the request does.

use crate::error::{ForecastError, Result};
use crate::period::{parse_period_year, parse_year_month};
use crate::resolver::probability;
use crate::schema::{
    ForecastDataset, Offer, OfferStage, PeriodType, ProductType, ServiceZone, Target,
    TargetScope, User, UserId, UserRole, ZoneId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive probability window. Offers inside it count at their full value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbabilityRange {
    pub min: u8,
    pub max: u8,
}

impl ProbabilityRange {
    pub const FULL: ProbabilityRange = ProbabilityRange { min: 0, max: 100 };

    pub fn contains(&self, probability: u8) -> bool {
        probability >= self.min && probability <= self.max
    }

    pub fn is_full(&self) -> bool {
        self.min == 0 && self.max >= 100
    }

    pub fn validate(&self) -> Result<()> {
        if self.min > self.max || self.max > 100 {
            return Err(ForecastError::InvalidCriteria(format!(
                "probability range {}..={} is not within 0..=100",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

impl Default for ProbabilityRange {
    fn default() -> Self {
        Self::FULL
    }
}

/// Typed filter for [`ForecastStore::list_offers`]. Every field is optional; an empty
/// criteria matches every offer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferCriteria {
    pub zone_id: Option<ZoneId>,
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub created_before: Option<DateTime<Utc>>,
    /// Matches the start of `offer_month`, e.g. "2024" or "2024-03".
    pub offer_month_prefix: Option<String>,
    pub stages: Vec<OfferStage>,
    pub exclude_stages: Vec<OfferStage>,
    pub probability: Option<ProbabilityRange>,
    pub product_type: Option<ProductType>,
    /// Matches the assigned user or the creator.
    pub owner_id: Option<UserId>,
}

impl OfferCriteria {
    pub fn for_zone(zone_id: ZoneId) -> Self {
        Self {
            zone_id: Some(zone_id),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(before)) = (self.created_from, self.created_before) {
            if before < from {
                return Err(ForecastError::InvalidCriteria(format!(
                    "creation range ends ({}) before it starts ({})",
                    before, from
                )));
            }
        }

        if let Some(prefix) = &self.offer_month_prefix {
            let well_formed =
                parse_period_year(prefix).is_some() || parse_year_month(prefix).is_some();
            if !well_formed {
                return Err(ForecastError::InvalidPeriod(prefix.clone()));
            }
        }

        if let Some(range) = self.probability {
            range.validate()?;
        }

        if self.stages.iter().any(|s| self.exclude_stages.contains(s)) {
            return Err(ForecastError::InvalidCriteria(
                "a stage is both required and excluded".to_string(),
            ));
        }

        Ok(())
    }

    pub fn matches(&self, offer: &Offer) -> bool {
        if self.zone_id.is_some_and(|zone_id| offer.zone_id != zone_id) {
            return false;
        }
        if self.created_from.is_some_and(|from| offer.created_at < from) {
            return false;
        }
        if self.created_before.is_some_and(|before| offer.created_at >= before) {
            return false;
        }
        if let Some(prefix) = &self.offer_month_prefix {
            let month = offer.offer_month.as_deref().unwrap_or("");
            if !month.trim().starts_with(prefix.as_str()) {
                return false;
            }
        }
        if !self.stages.is_empty() && !self.stages.contains(&offer.stage) {
            return false;
        }
        if self.exclude_stages.contains(&offer.stage) {
            return false;
        }
        if self
            .probability
            .is_some_and(|range| !range.contains(probability(offer)))
        {
            return false;
        }
        if self
            .product_type
            .is_some_and(|product| offer.product_type != Some(product))
        {
            return false;
        }
        if let Some(owner) = self.owner_id {
            if offer.assigned_to_id != Some(owner) && offer.created_by_id != Some(owner) {
                return false;
            }
        }
        true
    }
}

/// Typed filter for [`ForecastStore::list_targets`]. Several scopes are fetched in one
/// call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCriteria {
    pub scopes: Vec<TargetScope>,
    pub year: i32,
    pub period_type: Option<PeriodType>,
    pub product_type: Option<ProductType>,
}

impl TargetCriteria {
    pub fn new(scopes: Vec<TargetScope>, year: i32) -> Self {
        Self {
            scopes,
            year,
            period_type: None,
            product_type: None,
        }
    }

    pub fn matches(&self, target: &Target) -> bool {
        self.scopes.contains(&target.scope)
            && target.year() == Some(self.year)
            && self.period_type.map_or(true, |p| target.period_type == p)
            && self
                .product_type
                .map_or(true, |p| target.product_type == Some(p))
    }
}

/// The data collaborator behind every report.
#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// Zones ordered however the backend likes; reports sort by name themselves.
    async fn list_zones(&self, active_only: bool, zone_id: Option<ZoneId>)
        -> Result<Vec<ServiceZone>>;

    /// Members of `zone_id` whose role is in `roles`. An empty role list means all roles.
    async fn list_users_in_zone(&self, zone_id: ZoneId, roles: &[UserRole]) -> Result<Vec<User>>;

    async fn list_offers(&self, criteria: &OfferCriteria) -> Result<Vec<Offer>>;

    async fn list_targets(&self, criteria: &TargetCriteria) -> Result<Vec<Target>>;
}

/// A [`ForecastStore`] over a dataset held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    dataset: ForecastDataset,
}

impl InMemoryStore {
    pub fn new(dataset: ForecastDataset) -> Self {
        Self { dataset }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(ForecastDataset::from_json(json)?))
    }

    pub fn dataset(&self) -> &ForecastDataset {
        &self.dataset
    }
}

#[async_trait]
impl ForecastStore for InMemoryStore {
    async fn list_zones(
        &self,
        active_only: bool,
        zone_id: Option<ZoneId>,
    ) -> Result<Vec<ServiceZone>> {
        Ok(self
            .dataset
            .zones
            .iter()
            .filter(|z| !active_only || z.is_active)
            .filter(|z| zone_id.map_or(true, |id| z.id == id))
            .cloned()
            .collect())
    }

    async fn list_users_in_zone(&self, zone_id: ZoneId, roles: &[UserRole]) -> Result<Vec<User>> {
        Ok(self
            .dataset
            .users
            .iter()
            .filter(|u| u.zone_ids.contains(&zone_id))
            .filter(|u| roles.is_empty() || roles.contains(&u.role))
            .cloned()
            .collect())
    }

    async fn list_offers(&self, criteria: &OfferCriteria) -> Result<Vec<Offer>> {
        criteria.validate()?;
        Ok(self
            .dataset
            .offers
            .iter()
            .filter(|o| criteria.matches(o))
            .cloned()
            .collect())
    }

    async fn list_targets(&self, criteria: &TargetCriteria) -> Result<Vec<Target>> {
        Ok(self
            .dataset
            .targets
            .iter()
            .filter(|t| criteria.matches(t))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::fixtures::offer;
    use chrono::TimeZone;

    #[test]
    fn test_empty_criteria_matches_everything() {
        let criteria = OfferCriteria::default();
        assert!(criteria.validate().is_ok());
        assert!(criteria.matches(&offer(1, 3, 10.0, "2024-01")));
    }

    #[test]
    fn test_probability_range_is_inclusive() {
        let range = ProbabilityRange { min: 50, max: 80 };
        assert!(range.contains(50));
        assert!(range.contains(80));
        assert!(!range.contains(40));
        assert!(!range.contains(81));

        let criteria = OfferCriteria {
            probability: Some(ProbabilityRange { min: 50, max: 100 }),
            ..Default::default()
        };
        let mut o = offer(1, 1, 10.0, "2024-01");
        o.probability_percentage = Some(40);
        assert!(!criteria.matches(&o));
        o.probability_percentage = None;
        assert!(!criteria.matches(&o));
        o.probability_percentage = Some(50);
        assert!(criteria.matches(&o));
    }

    #[test]
    fn test_owner_matches_assignee_or_creator() {
        let criteria = OfferCriteria {
            owner_id: Some(5),
            ..Default::default()
        };
        let mut o = offer(1, 1, 10.0, "2024-01");
        assert!(!criteria.matches(&o));
        o.created_by_id = Some(5);
        assert!(criteria.matches(&o));
        o.created_by_id = None;
        o.assigned_to_id = Some(5);
        assert!(criteria.matches(&o));
    }

    #[test]
    fn test_stage_and_prefix_filters() {
        let criteria = OfferCriteria {
            offer_month_prefix: Some("2024".to_string()),
            exclude_stages: vec![OfferStage::Lost],
            ..Default::default()
        };
        let mut o = offer(1, 1, 10.0, "2024-07");
        assert!(criteria.matches(&o));
        o.stage = OfferStage::Lost;
        assert!(!criteria.matches(&o));
        let o = offer(2, 1, 10.0, "2023-07");
        assert!(!criteria.matches(&o));
    }

    #[test]
    fn test_creation_range() {
        let criteria = OfferCriteria {
            created_from: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            created_before: Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        // fixture offers are created 2024-01-15 10:00
        assert!(!criteria.matches(&offer(1, 1, 10.0, "2024-01")));
    }

    #[test]
    fn test_validate_rejects_inconsistent_criteria() {
        let bad_range = OfferCriteria {
            probability: Some(ProbabilityRange { min: 80, max: 20 }),
            ..Default::default()
        };
        assert!(bad_range.validate().is_err());

        let bad_prefix = OfferCriteria {
            offer_month_prefix: Some("24-1".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            bad_prefix.validate(),
            Err(ForecastError::InvalidPeriod(_))
        ));

        let contradictory = OfferCriteria {
            stages: vec![OfferStage::Won],
            exclude_stages: vec![OfferStage::Won],
            ..Default::default()
        };
        assert!(contradictory.validate().is_err());

        let bad_dates = OfferCriteria {
            created_from: Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
            created_before: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(bad_dates.validate().is_err());
    }

    #[tokio::test]
    async fn test_in_memory_store_filters() {
        let mut dataset = ForecastDataset::default();
        dataset.zones = vec![
            ServiceZone {
                id: 1,
                name: "North".to_string(),
                is_active: true,
            },
            ServiceZone {
                id: 2,
                name: "Closed".to_string(),
                is_active: false,
            },
        ];
        dataset.users = vec![
            User {
                id: 10,
                name: "Asha".to_string(),
                role: UserRole::ZoneUser,
                zone_ids: vec![1],
            },
            User {
                id: 11,
                name: "Admin".to_string(),
                role: UserRole::Admin,
                zone_ids: vec![1],
            },
        ];
        dataset.offers = vec![offer(1, 1, 100.0, "2024-01"), offer(2, 2, 50.0, "2024-01")];
        let store = InMemoryStore::new(dataset);
        assert_eq!(store.dataset().offers.len(), 2);

        assert_eq!(store.list_zones(true, None).await.unwrap().len(), 1);
        assert_eq!(store.list_zones(false, None).await.unwrap().len(), 2);
        assert_eq!(store.list_zones(false, Some(2)).await.unwrap()[0].name, "Closed");

        let members = store
            .list_users_in_zone(1, &[UserRole::ZoneUser, UserRole::ZoneManager])
            .await
            .unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(store.list_users_in_zone(1, &[]).await.unwrap().len(), 2);

        let offers = store.list_offers(&OfferCriteria::for_zone(1)).await.unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].id, 1);
    }
}
