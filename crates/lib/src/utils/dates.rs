//! Created-date parsing for survivor selection.
//!
//! CRM exports deliver timestamps as RFC 3339, bare dates, or spreadsheet
//! serials (days since 1899-12-30). Unparseable values sort last so they
//! never win an "earliest created" tie-break.

use time::format_description::well_known::Rfc3339;
use time::macros::{date, format_description};
use time::{Date, OffsetDateTime, PrimitiveDateTime};

const DATE_ONLY: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]");
const DATE_TIME: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Day zero of the spreadsheet serial epoch.
const SERIAL_EPOCH: Date = date!(1899 - 12 - 30);

/// Serials outside this window are treated as opaque numbers, not dates.
const SERIAL_MIN: f64 = 1.0;
const SERIAL_MAX: f64 = 80_000.0;

/// Maps a raw created-date value to a unix-seconds sort key. Unparseable or
/// empty values return `i64::MAX`.
pub fn created_date_sort_key(raw: &str) -> i64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return i64::MAX;
    }

    if let Ok(dt) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return dt.unix_timestamp();
    }
    if let Ok(dt) = PrimitiveDateTime::parse(trimmed, DATE_TIME) {
        return dt.assume_utc().unix_timestamp();
    }
    if let Ok(d) = Date::parse(trimmed, DATE_ONLY) {
        return d.midnight().assume_utc().unix_timestamp();
    }
    if let Ok(serial) = trimmed.parse::<f64>() {
        if (SERIAL_MIN..=SERIAL_MAX).contains(&serial) {
            let epoch = SERIAL_EPOCH.midnight().assume_utc().unix_timestamp();
            return epoch + (serial * 86_400.0) as i64;
        }
    }

    i64::MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_only_parses() {
        assert!(created_date_sort_key("2020-01-01") < created_date_sort_key("2021-01-01"));
    }

    #[test]
    fn rfc3339_and_date_only_agree_on_midnight() {
        assert_eq!(
            created_date_sort_key("2020-01-01T00:00:00Z"),
            created_date_sort_key("2020-01-01")
        );
    }

    #[test]
    fn spreadsheet_serial_lands_in_the_right_year() {
        // 43831 is 2020-01-01.
        let serial = created_date_sort_key("43831");
        let iso = created_date_sort_key("2020-01-01");
        assert_eq!(serial, iso);
    }

    #[test]
    fn garbage_sorts_last() {
        assert_eq!(created_date_sort_key(""), i64::MAX);
        assert_eq!(created_date_sort_key("not a date"), i64::MAX);
        assert_eq!(created_date_sort_key("999999999"), i64::MAX);
    }
}
