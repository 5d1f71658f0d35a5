use crate::ingest::types::SessionStamp;
use chrono::NaiveDate;
use chrono_tz::Tz;

pub const LEDGER_DATE_FORMAT: &str = "%d/%m/%Y";

/// Calendar date a session is logged under.
///
/// Zoned stamps are converted into `display_tz` first; naive dates are taken as-is, since
/// no timezone can be assumed for them.
pub fn trading_date(stamp: SessionStamp, display_tz: Tz) -> NaiveDate {
    match stamp {
        SessionStamp::Naive(date) => date,
        SessionStamp::Zoned(ts) => ts.with_timezone(&display_tz).date_naive(),
    }
}

pub fn format_ledger_date(date: NaiveDate) -> String {
    date.format(LEDGER_DATE_FORMAT).to_string()
}

/// Lenient parse for sorting: anything unparsable is the earliest possible date.
pub fn parse_ledger_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s.trim(), LEDGER_DATE_FORMAT).unwrap_or(NaiveDate::MIN)
}
