use chrono::NaiveDate;

use crate::error::AppError;

/// One monthly billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, AppError> {
        if !(1..=12).contains(&month) {
            return Err(AppError::UnprocessableEntity(format!(
                "Invalid month {month}: expected 1-12."
            )));
        }
        Ok(Self { year, month })
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

/// Inclusive list of periods between two bounds, oldest first.
pub fn periods_between(from: Period, to: Period) -> Result<Vec<Period>, AppError> {
    if to < from {
        return Err(AppError::UnprocessableEntity(
            "Period range end is before its start.".to_string(),
        ));
    }

    let mut periods = Vec::new();
    let mut current = from;
    loop {
        periods.push(current);
        if current == to {
            break;
        }
        current = current.next();
    }
    Ok(periods)
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid first of month");
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid first of next month");
    next_first.signed_duration_since(first).num_days() as u32
}

/// Calendar date for a billing period, with the configured day-of-month
/// clamped to the month's length (due day 31 in February lands on the 28th
/// or 29th).
pub fn clamped_due_date(period: Period, due_day: u32) -> NaiveDate {
    let day = due_day.clamp(1, days_in_month(period.year, period.month));
    NaiveDate::from_ymd_opt(period.year, period.month, day).expect("clamped day is valid")
}

/// Nights between check-in and check-out. Callers validate ordering first;
/// a stay never bills fewer than one night.
pub fn nights_between(check_in: NaiveDate, check_out: NaiveDate) -> i64 {
    check_out.signed_duration_since(check_in).num_days().max(1)
}

pub fn parse_date(value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("Invalid ISO date '{value}'.")))
}

/// Current calendar date in the service's reporting timezone. Falls back to
/// America/Asuncion on an unparseable timezone name.
pub fn today_in_timezone(timezone_name: &str) -> NaiveDate {
    let timezone = timezone_name
        .parse::<chrono_tz::Tz>()
        .unwrap_or(chrono_tz::America::Asuncion);
    chrono::Utc::now().with_timezone(&timezone).date_naive()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::{
        clamped_due_date, days_in_month, nights_between, parse_date, periods_between, Period,
    };
    use chrono::NaiveDate;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn month_lengths_respect_leap_years() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2025, 2), 28);
        assert_eq!(days_in_month(2024, 12), 31);
        assert_eq!(days_in_month(2025, 4), 30);
    }

    #[test]
    fn due_day_is_clamped_to_month_length() {
        let december = Period::new(2024, 12).unwrap();
        let february_leap = Period::new(2024, 2).unwrap();
        let february = Period::new(2025, 2).unwrap();
        assert_eq!(clamped_due_date(december, 31), date(2024, 12, 31));
        assert_eq!(clamped_due_date(february_leap, 31), date(2024, 2, 29));
        assert_eq!(clamped_due_date(february, 31), date(2025, 2, 28));
        assert_eq!(clamped_due_date(february, 15), date(2025, 2, 15));
    }

    #[test]
    fn nights_have_a_floor_of_one() {
        assert_eq!(
            nights_between(date(2024, 12, 1), date(2024, 12, 5)),
            4
        );
        assert_eq!(
            nights_between(date(2024, 12, 1), date(2024, 12, 2)),
            1
        );
        // Same-day stays still bill one night.
        assert_eq!(
            nights_between(date(2024, 12, 1), date(2024, 12, 1)),
            1
        );
    }

    #[test]
    fn period_ranges_are_inclusive_and_cross_year_boundaries() {
        let range = periods_between(
            Period::new(2024, 11).unwrap(),
            Period::new(2025, 2).unwrap(),
        )
        .unwrap();
        assert_eq!(
            range,
            vec![
                Period::new(2024, 11).unwrap(),
                Period::new(2024, 12).unwrap(),
                Period::new(2025, 1).unwrap(),
                Period::new(2025, 2).unwrap(),
            ]
        );

        let single = periods_between(
            Period::new(2025, 3).unwrap(),
            Period::new(2025, 3).unwrap(),
        )
        .unwrap();
        assert_eq!(single.len(), 1);

        assert!(periods_between(
            Period::new(2025, 3).unwrap(),
            Period::new(2025, 2).unwrap(),
        )
        .is_err());
    }

    #[test]
    fn rejects_invalid_months_and_dates() {
        assert!(Period::new(2025, 0).is_err());
        assert!(Period::new(2025, 13).is_err());
        assert!(parse_date("2025-02-30").is_err());
        assert!(parse_date("not-a-date").is_err());
        assert_eq!(parse_date(" 2025-02-28 ").unwrap(), date(2025, 2, 28));
    }
}
