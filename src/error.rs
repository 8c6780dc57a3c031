use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The report shapes produced by [`crate::reports::ForecastReports`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    ZoneSummary,
    MonthlyBreakdown,
    UserMonthlyBreakdown,
    PoExpectedMonthBreakdown,
    ProductUserZoneMatrix,
    ProductWiseForecast,
    AnalyticsDashboard,
}

impl ReportKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            ReportKind::ZoneSummary => "zone summary",
            ReportKind::MonthlyBreakdown => "monthly breakdown",
            ReportKind::UserMonthlyBreakdown => "user monthly breakdown",
            ReportKind::PoExpectedMonthBreakdown => "PO expected month breakdown",
            ReportKind::ProductUserZoneMatrix => "product user zone matrix",
            ReportKind::ProductWiseForecast => "product-wise forecast",
            ReportKind::AnalyticsDashboard => "analytics dashboard",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Data fetch failed: {0}")]
    DataFetch(String),

    #[error("Invalid query criteria: {0}")]
    InvalidCriteria(String),

    #[error("Invalid period '{0}': expected YYYY or YYYY-MM")]
    InvalidPeriod(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// The message is fixed per report; the cause is logged, never exposed.
    #[error("Failed to fetch {0}")]
    ReportFailed(ReportKind),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ForecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_failure_message_hides_cause() {
        let err = ForecastError::ReportFailed(ReportKind::ZoneSummary);
        assert_eq!(err.to_string(), "Failed to fetch zone summary");

        let err = ForecastError::ReportFailed(ReportKind::ProductWiseForecast);
        assert_eq!(err.to_string(), "Failed to fetch product-wise forecast");
    }
}
