//! Report assemblers.
//!
//! Each report is an independent async entry point on [`ForecastReports`]. An assembler
//! fetches what it needs from the injected [`ForecastStore`], fanning out per zone and
//! joining before any aggregation runs, and then shapes the result. A failed fetch
//! aborts the whole report with [`ForecastError::ReportFailed`]; the cause is logged.

pub mod analytics;
pub mod monthly;
pub mod po_expected;
pub mod product_forecast;
pub mod product_matrix;
pub mod zone_summary;

pub use analytics::*;
pub use monthly::*;
pub use po_expected::*;
pub use product_forecast::*;
pub use product_matrix::*;
pub use zone_summary::*;

use crate::aggregation::{apply_probability, apply_product_filter};
use crate::config::{ForecastSettings, ReportQuery};
use crate::error::{ForecastError, ReportKind, Result};
use crate::schema::{Offer, ServiceZone, TargetScope, User, UserId};
use crate::store::{ForecastStore, OfferCriteria, TargetCriteria};
use crate::targets::TargetBook;
use futures::future::try_join_all;
use log::{debug, error};
use std::collections::HashMap;
use std::future::Future;

/// Entry point for every report. Holds the request's store and the engine settings;
/// nothing is cached between calls.
pub struct ForecastReports<'a, S: ForecastStore + ?Sized> {
    store: &'a S,
    settings: ForecastSettings,
}

/// Members and offers of one zone, fetched together.
#[derive(Debug, Clone)]
pub(crate) struct ZoneSnapshot {
    pub zone: ServiceZone,
    pub members: Vec<User>,
    pub offers: Vec<Offer>,
}

impl<'a, S: ForecastStore + ?Sized> ForecastReports<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            settings: ForecastSettings::default(),
        }
    }

    pub fn with_settings(store: &'a S, settings: ForecastSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { store, settings })
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    /// Active zones in scope for `query`, ascending by name.
    pub(crate) async fn zones(&self, query: &ReportQuery) -> Result<Vec<ServiceZone>> {
        query.validate()?;
        let mut zones = self.store.list_zones(true, query.zone_id).await?;
        zones.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        debug!("{} zone(s) in scope for {}", zones.len(), query.year);
        Ok(zones)
    }

    /// One batched fetch for every scope a report needs.
    pub(crate) async fn target_book(
        &self,
        scopes: Vec<TargetScope>,
        year: i32,
    ) -> Result<TargetBook> {
        if scopes.is_empty() {
            return Ok(TargetBook::default());
        }
        let targets = self
            .store
            .list_targets(&TargetCriteria::new(scopes, year))
            .await?;
        Ok(TargetBook::new(&targets))
    }

    pub(crate) async fn zone_snapshot(
        &self,
        zone: &ServiceZone,
        criteria: OfferCriteria,
        query: &ReportQuery,
    ) -> Result<ZoneSnapshot> {
        let (members, offers) = futures::try_join!(
            self.store
                .list_users_in_zone(zone.id, &self.settings.member_roles),
            self.store.list_offers(&criteria),
        )?;
        let offers = apply_product_filter(
            apply_probability(offers, query.probability_range()),
            query.product_type,
        );
        debug!(
            "Zone '{}': {} member(s), {} offer(s)",
            zone.name,
            members.len(),
            offers.len()
        );
        Ok(ZoneSnapshot {
            zone: zone.clone(),
            members,
            offers,
        })
    }

    pub(crate) async fn zone_snapshots<F>(
        &self,
        zones: &[ServiceZone],
        query: &ReportQuery,
        criteria: F,
    ) -> Result<Vec<ZoneSnapshot>>
    where
        F: Fn(&ServiceZone) -> OfferCriteria,
    {
        try_join_all(
            zones
                .iter()
                .map(|zone| self.zone_snapshot(zone, criteria(zone), query)),
        )
        .await
    }
}

/// Offer criteria carrying the filters every report honours.
pub(crate) fn base_criteria(zone: &ServiceZone, query: &ReportQuery) -> OfferCriteria {
    OfferCriteria {
        zone_id: Some(zone.id),
        probability: Some(query.probability_range()),
        product_type: query.product_type.as_option(),
        owner_id: query.user_id,
        ..Default::default()
    }
}

pub(crate) fn user_directory(snapshots: &[ZoneSnapshot]) -> HashMap<UserId, String> {
    snapshots
        .iter()
        .flat_map(|s| s.members.iter())
        .map(|u| (u.id, u.name.clone()))
        .collect()
}

/// Awaits a report build, replacing any failure with the report's fixed message.
pub(crate) async fn run_report<T, F>(kind: ReportKind, build: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match build.await {
        Ok(report) => Ok(report),
        Err(e) => {
            error!("Failed to build {}: {}", kind, e);
            Err(ForecastError::ReportFailed(kind))
        }
    }
}
