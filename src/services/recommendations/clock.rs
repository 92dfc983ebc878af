use chrono::{Datelike, NaiveDate, Utc};

use crate::models::Season;

/// Source of "today" for season-relative categories
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;

    /// Year and season containing today
    fn current_season(&self) -> CurrentSeason {
        CurrentSeason::from_date(self.today())
    }
}

/// Wall clock in UTC
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Clock pinned to a date
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentSeason {
    pub year: i32,
    pub season: Season,
}

impl CurrentSeason {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            season: Season::from_month(date.month()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_season() {
        let clock = FixedClock(NaiveDate::from_ymd_opt(2024, 10, 16).unwrap());
        assert_eq!(
            clock.current_season(),
            CurrentSeason {
                year: 2024,
                season: Season::Fall
            }
        );
    }

    #[test]
    fn test_season_boundaries() {
        let march = CurrentSeason::from_date(NaiveDate::from_ymd_opt(2025, 3, 31).unwrap());
        let april = CurrentSeason::from_date(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap());
        assert_eq!(march.season, Season::Winter);
        assert_eq!(april.season, Season::Spring);
    }
}
