/// Season calendar for daily blocking analysis.
///
/// A season is a run of consecutive months (December-January-February by
/// default). Feb 29 never belongs to a season, so every season has the same
/// number of days and day-of-season indices line up across years.
///
/// Seasons are labelled by the calendar year in which they end: the
/// December 2000 to February 2001 winter is season 2001.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

use crate::model::{BlockingError, Result};

/// Days per month with February fixed at 28.
const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// December-January-February.
pub const DJF: [u32; 3] = [12, 1, 2];

/// Where a date falls inside the season calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonPosition {
    /// Season label (year in which the season ends).
    pub label: i32,
    /// Zero-based day within the season.
    pub day: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeasonCalendar {
    months: Vec<u32>,
    start: NaiveDate,
    end: NaiveDate,
}

impl SeasonCalendar {
    /// Builds a calendar for the given months over `start..=end`.
    ///
    /// Months must be distinct, in 1..=12 and consecutive (wrapping from
    /// December to January).
    pub fn new(months: Vec<u32>, start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if months.is_empty() || months.len() > 12 {
            return Err(BlockingError::invalid(
                "SEASON_MONTHS",
                format!("expected 1 to 12 months, got {}", months.len()),
            ));
        }
        if let Some(bad) = months.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(BlockingError::invalid(
                "SEASON_MONTHS",
                format!("{} is not a month", bad),
            ));
        }
        for pair in months.windows(2) {
            if pair[1] != pair[0] % 12 + 1 {
                return Err(BlockingError::invalid(
                    "SEASON_MONTHS",
                    format!("months {} and {} are not consecutive", pair[0], pair[1]),
                ));
            }
        }
        if start > end {
            return Err(BlockingError::invalid(
                "VALID_END",
                format!("window end {} precedes start {}", end, start),
            ));
        }
        Ok(Self { months, start, end })
    }

    /// December-January-February calendar.
    pub fn djf(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        Self::new(DJF.to_vec(), start, end)
    }

    pub fn months(&self) -> &[u32] {
        &self.months
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Fixed number of days in one season.
    pub fn season_length(&self) -> usize {
        self.months
            .iter()
            .map(|m| DAYS_IN_MONTH[(*m - 1) as usize] as usize)
            .sum()
    }

    /// Season label and day-of-season for `date`, ignoring the window.
    ///
    /// `None` for Feb 29 and for months outside the season.
    pub fn position(&self, date: NaiveDate) -> Option<SeasonPosition> {
        if date.month() == 2 && date.day() == 29 {
            return None;
        }
        let slot = self.months.iter().position(|m| *m == date.month())?;
        let wraps_before = self.wraps_through(slot);
        let start_year = date.year() - wraps_before;
        let label = start_year + self.wraps_through(self.months.len() - 1);
        let day = self.months[..slot]
            .iter()
            .map(|m| DAYS_IN_MONTH[(*m - 1) as usize] as usize)
            .sum::<usize>()
            + (date.day() - 1) as usize;
        Some(SeasonPosition { label, day })
    }

    /// Year changes between the first month and `months[slot]`.
    fn wraps_through(&self, slot: usize) -> i32 {
        self.months[..=slot]
            .windows(2)
            .filter(|pair| pair[1] < pair[0])
            .count() as i32
    }

    /// Every in-season date of the window, in order.
    pub fn expected_dates(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|d| *d <= self.end)
            .filter(|d| self.position(*d).is_some())
            .collect()
    }

    /// Distinct season labels touched by the window, in order.
    pub fn season_labels(&self) -> Vec<i32> {
        let mut labels: Vec<i32> = Vec::new();
        for date in self.expected_dates() {
            if let Some(pos) = self.position(date) {
                if labels.last() != Some(&pos.label) {
                    labels.push(pos.label);
                }
            }
        }
        labels
    }
}

/// Parses a valid-time attribute into its calendar date.
///
/// Accepts MET (`20001201_000000`), METplus (`2000120100`), plain
/// `20001201` and RFC 3339 timestamps.
pub fn parse_valid_date(value: &str) -> Result<NaiveDate> {
    let trimmed = value.trim();
    let parse_error = || BlockingError::TimestampParse {
        value: value.to_string(),
    };

    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y%m%d_%H%M%S") {
        return Ok(dt.date());
    }
    if (trimmed.len() == 8 || trimmed.len() == 10) && trimmed.chars().all(|c| c.is_ascii_digit()) {
        let date_part = trimmed.get(..8).ok_or_else(parse_error)?;
        if trimmed.len() == 10 {
            let hour: u32 = trimmed[8..].parse().map_err(|_| parse_error())?;
            if hour > 23 {
                return Err(parse_error());
            }
        }
        return NaiveDate::parse_from_str(date_part, "%Y%m%d").map_err(|_| parse_error());
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.date_naive())
        .map_err(|_| parse_error())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn winter(start: NaiveDate, end: NaiveDate) -> SeasonCalendar {
        SeasonCalendar::djf(start, end).expect("DJF calendar should build")
    }

    #[test]
    fn test_djf_season_has_90_days() {
        let cal = winter(date(2000, 12, 1), date(2001, 2, 28));
        assert_eq!(cal.season_length(), 90);
        assert_eq!(cal.expected_dates().len(), 90);
    }

    #[test]
    fn test_december_belongs_to_following_year_label() {
        let cal = winter(date(2000, 12, 1), date(2001, 2, 28));
        assert_eq!(
            cal.position(date(2000, 12, 1)),
            Some(SeasonPosition { label: 2001, day: 0 })
        );
        assert_eq!(
            cal.position(date(2001, 1, 1)),
            Some(SeasonPosition { label: 2001, day: 31 })
        );
        assert_eq!(
            cal.position(date(2001, 2, 28)),
            Some(SeasonPosition { label: 2001, day: 89 })
        );
    }

    #[test]
    fn test_leap_day_is_excluded() {
        let cal = winter(date(2003, 12, 1), date(2004, 2, 29));
        assert_eq!(cal.position(date(2004, 2, 29)), None);
        assert_eq!(cal.expected_dates().len(), 90);
        assert_eq!(
            cal.position(date(2004, 2, 28)),
            Some(SeasonPosition { label: 2004, day: 89 })
        );
    }

    #[test]
    fn test_out_of_season_month_has_no_position() {
        let cal = winter(date(2000, 12, 1), date(2001, 2, 28));
        assert_eq!(cal.position(date(2001, 3, 1)), None);
    }

    #[test]
    fn test_multi_winter_window_labels() {
        let cal = winter(date(2000, 12, 1), date(2003, 2, 28));
        assert_eq!(cal.season_labels(), vec![2001, 2002, 2003]);
        assert_eq!(cal.expected_dates().len(), 270);
    }

    #[test]
    fn test_summer_season_without_year_wrap() {
        let cal = SeasonCalendar::new(vec![6, 7, 8], date(2005, 6, 1), date(2005, 8, 31)).unwrap();
        assert_eq!(cal.season_length(), 92);
        assert_eq!(
            cal.position(date(2005, 8, 31)),
            Some(SeasonPosition { label: 2005, day: 91 })
        );
    }

    #[test]
    fn test_non_consecutive_months_rejected() {
        let result = SeasonCalendar::new(vec![12, 2], date(2000, 12, 1), date(2001, 2, 28));
        assert!(result.is_err());
        let result = SeasonCalendar::new(vec![13], date(2000, 12, 1), date(2001, 2, 28));
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_valid_date_formats() {
        assert_eq!(parse_valid_date("20001201_120000").unwrap(), date(2000, 12, 1));
        assert_eq!(parse_valid_date("2000120118").unwrap(), date(2000, 12, 1));
        assert_eq!(parse_valid_date("20001201").unwrap(), date(2000, 12, 1));
        assert_eq!(
            parse_valid_date("2000-12-01T06:00:00+00:00").unwrap(),
            date(2000, 12, 1)
        );
    }

    #[test]
    fn test_parse_valid_date_rejects_garbage() {
        assert!(parse_valid_date("").is_err());
        assert!(parse_valid_date("not-a-date").is_err());
        assert!(parse_valid_date("2000123199").is_err());
        assert!(parse_valid_date("20001341").is_err());
    }
}
