use crate::error::{ForecastError, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};

pub const MONTHS_PER_YEAR: usize = 12;
pub const QUARTERS_PER_YEAR: usize = 4;

/// The financial year used by the product-wise forecast runs March through February.
pub const FINANCIAL_YEAR_START_MONTH: u32 = 3;

const MONTH_LABELS: [&str; MONTHS_PER_YEAR] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Parses a `YYYY-MM` period into `(year, month)`.
/// Returns `None` for anything else, including bare years.
pub fn parse_year_month(period: &str) -> Option<(i32, u32)> {
    let trimmed = period.trim();
    if trimmed.len() != 7 {
        return None;
    }
    let date = NaiveDate::parse_from_str(&format!("{}-01", trimmed), "%Y-%m-%d").ok()?;
    Some((date.year(), date.month()))
}

/// Year component of a `YYYY` or `YYYY-MM` period.
pub fn parse_period_year(period: &str) -> Option<i32> {
    let trimmed = period.trim();
    match trimmed.len() {
        4 if trimmed.bytes().all(|b| b.is_ascii_digit()) => trimmed.parse().ok(),
        7 => parse_year_month(trimmed).map(|(year, _)| year),
        _ => None,
    }
}

pub fn month_key(year: i32, month: u32) -> String {
    format!("{:04}-{:02}", year, month)
}

pub fn year_key(year: i32) -> String {
    format!("{:04}", year)
}

/// True when `period` is a well-formed `YYYY-MM` inside `year`.
pub fn is_in_year(period: &str, year: i32) -> bool {
    matches!(parse_year_month(period), Some((y, _)) if y == year)
}

/// 0-based index into a calendar-year grid, if `period` falls in `year`.
pub fn calendar_month_index(period: &str, year: i32) -> Option<usize> {
    match parse_year_month(period) {
        Some((y, m)) if y == year => Some((m - 1) as usize),
        _ => None,
    }
}

/// 0-based quarter (Jan-Mar = 0) of a 0-based calendar month index.
pub fn quarter_of_month_index(month_index: usize) -> usize {
    month_index / 3
}

pub fn month_label(month: u32) -> &'static str {
    MONTH_LABELS[((month + 11) % 12) as usize]
}

pub fn calendar_month_labels() -> Vec<String> {
    MONTH_LABELS.iter().map(|l| l.to_string()).collect()
}

/// Returns the 0-based index of the month within a financial year that starts in
/// `start_month`.
///
/// # Examples
/// - Start in Jan (1): Jan=0, Feb=1, ..., Dec=11
/// - Start in Mar (3): Mar=0, Apr=1, ..., Jan=10, Feb=11
pub fn get_financial_month_index(calendar_month: u32, start_month: u32) -> usize {
    if calendar_month >= start_month {
        (calendar_month - start_month) as usize
    } else {
        (calendar_month + 12 - start_month) as usize
    }
}

/// The twelve `(year, month)` pairs of financial year `year`, in financial order.
/// Months before `start_month` belong to the following calendar year.
pub fn financial_year_months(year: i32, start_month: u32) -> Vec<(i32, u32)> {
    (0..MONTHS_PER_YEAR as u32)
        .map(|offset| {
            let month0 = start_month - 1 + offset;
            (year.saturating_add((month0 / 12) as i32), month0 % 12 + 1)
        })
        .collect()
}

pub fn financial_year_labels(year: i32, start_month: u32) -> Vec<String> {
    financial_year_months(year, start_month)
        .into_iter()
        .map(|(y, m)| format!("{}-{}", month_label(m), y))
        .collect()
}

/// 0-based index into a financial-year grid, if `period` falls in financial year `year`.
pub fn financial_month_index(period: &str, year: i32, start_month: u32) -> Option<usize> {
    let (y, m) = parse_year_month(period)?;
    let financial_year = if m >= start_month { y } else { y - 1 };
    if financial_year == year {
        Some(get_financial_month_index(m, start_month))
    } else {
        None
    }
}

/// Midnight UTC on 1 January of `year`.
pub fn year_start_utc(year: i32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, 1, 1).map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

pub fn validate_financial_year_start_month(month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(ForecastError::InvalidSettings(format!(
            "financial year start month {} must be between 1 and 12",
            month
        )));
    }
    Ok(())
}
