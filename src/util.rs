use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Weekday};
use chrono_tz::Tz;
use std::collections::HashSet;

/// All U.S. trading days in `[start, end]`, inclusive: business days minus
/// NYSE full-closure holidays.
pub fn trading_dates(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    if start > end {
        return Vec::new();
    }

    let holidays: HashSet<NaiveDate> = (start.year()..=end.year())
        .flat_map(us_market_holidays)
        .collect();

    let mut dates = Vec::new();
    let mut day = start;
    while day <= end {
        match day.weekday() {
            Weekday::Sat | Weekday::Sun => {}
            _ => {
                if !holidays.contains(&day) {
                    dates.push(day);
                }
            }
        }
        day += Duration::days(1);
    }
    dates
}

/// NYSE full-closure holidays for one year, with observance shifts applied.
pub fn us_market_holidays(year: i32) -> Vec<NaiveDate> {
    let mut holidays = Vec::new();

    // New Year's Day: Sunday moves to Monday; a Saturday New Year's is not
    // observed by the exchange.
    let new_years = ymd(year, 1, 1);
    match new_years.weekday() {
        Weekday::Sun => holidays.push(ymd(year, 1, 2)),
        Weekday::Sat => {}
        _ => holidays.push(new_years),
    }

    // Martin Luther King Jr. Day: third Monday of January.
    holidays.push(nth_weekday(year, 1, Weekday::Mon, 3));
    // Washington's Birthday: third Monday of February.
    holidays.push(nth_weekday(year, 2, Weekday::Mon, 3));
    // Good Friday.
    holidays.push(easter_sunday(year) - Duration::days(2));
    // Memorial Day: last Monday of May.
    holidays.push(last_weekday(year, 5, Weekday::Mon));
    // Juneteenth, observed by the exchange since 2022.
    if year >= 2022 {
        holidays.push(observed(ymd(year, 6, 19)));
    }
    // Independence Day.
    holidays.push(observed(ymd(year, 7, 4)));
    // Labor Day: first Monday of September.
    holidays.push(nth_weekday(year, 9, Weekday::Mon, 1));
    // Thanksgiving: fourth Thursday of November.
    holidays.push(nth_weekday(year, 11, Weekday::Thu, 4));
    // Christmas Day.
    holidays.push(observed(ymd(year, 12, 25)));

    holidays
}

/// Easter Sunday for a Gregorian year (anonymous computus).
pub fn easter_sunday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    ymd(year, month as u32, day as u32)
}

/// Saturday holidays are observed the Friday before, Sunday holidays the
/// Monday after.
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> NaiveDate {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n).unwrap()
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, 5)
        .unwrap_or_else(|| nth_weekday(year, month, weekday, 4))
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Latest date with published Reg SHO files. FINRA publishes after 20:00
/// Eastern, so earlier in the day the previous date is the newest available.
pub fn latest_published_date(now: DateTime<Tz>) -> NaiveDate {
    if now.hour() < 20 {
        now.date_naive() - Duration::days(1)
    } else {
        now.date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::US::Eastern;

    #[test]
    fn easter_matches_known_years() {
        assert_eq!(easter_sunday(2021), ymd(2021, 4, 4));
        assert_eq!(easter_sunday(2024), ymd(2024, 3, 31));
        assert_eq!(easter_sunday(2011), ymd(2011, 4, 24));
    }

    #[test]
    fn holidays_2021() {
        let holidays = us_market_holidays(2021);
        assert!(holidays.contains(&ymd(2021, 1, 1)));
        assert!(holidays.contains(&ymd(2021, 4, 2))); // Good Friday
        assert!(holidays.contains(&ymd(2021, 5, 31))); // Memorial Day
        assert!(holidays.contains(&ymd(2021, 7, 5))); // July 4th observed Monday
        assert!(holidays.contains(&ymd(2021, 11, 25))); // Thanksgiving
        assert!(holidays.contains(&ymd(2021, 12, 24))); // Christmas observed Friday
        assert!(!holidays.contains(&ymd(2021, 6, 18))); // no Juneteenth before 2022
    }

    #[test]
    fn saturday_new_years_is_not_observed() {
        // Jan 1 2022 fell on a Saturday; the exchange stayed open Dec 31.
        let holidays = us_market_holidays(2022);
        assert!(!holidays.contains(&ymd(2022, 1, 1)));
        assert!(!holidays.iter().any(|d| d.year() == 2021));
        // Juneteenth 2022 fell on a Sunday, observed Monday June 20.
        assert!(holidays.contains(&ymd(2022, 6, 20)));
    }

    #[test]
    fn trading_dates_skip_weekends_and_holidays() {
        // Fri 2021-05-28 .. Wed 2021-06-02, with Memorial Day on Mon 05-31.
        let dates = trading_dates(ymd(2021, 5, 28), ymd(2021, 6, 2));
        assert_eq!(
            dates,
            vec![ymd(2021, 5, 28), ymd(2021, 6, 1), ymd(2021, 6, 2)]
        );
    }

    #[test]
    fn trading_dates_empty_for_inverted_range() {
        assert!(trading_dates(ymd(2021, 6, 2), ymd(2021, 6, 1)).is_empty());
    }

    #[test]
    fn publication_cutoff_is_8pm_eastern() {
        let before = Eastern.with_ymd_and_hms(2021, 6, 2, 19, 59, 0).unwrap();
        let after = Eastern.with_ymd_and_hms(2021, 6, 2, 20, 1, 0).unwrap();
        assert_eq!(latest_published_date(before), ymd(2021, 6, 1));
        assert_eq!(latest_published_date(after), ymd(2021, 6, 2));
    }
}
