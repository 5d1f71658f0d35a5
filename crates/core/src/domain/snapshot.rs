use crate::domain::metrics::{
    format_percent, format_price, format_volume, percent_change, present, round2, trend_label,
};
use crate::ingest::provider::{lookup_name, NameResolver};
use crate::ingest::types::{BarPair, Lookup};
use crate::time::session::{format_ledger_date, trading_date};
use chrono::NaiveDate;
use chrono_tz::Tz;

/// Ledger header, in file order.
pub const LEDGER_COLUMNS: [&str; 12] = [
    "Date",
    "Ticker",
    "Company Name",
    "Open",
    "High",
    "Low",
    "Close",
    "Previous Close",
    "Volume",
    "% Change (Day)",
    "Trend Note",
    "trend",
];

pub const DATE_COLUMN: &str = "Date";
pub const TICKER_COLUMN: &str = "Ticker";

/// One derived row for one ticker on one trading date. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub date: NaiveDate,
    pub ticker: String,
    pub company_name: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub previous_close: Option<f64>,
    pub volume: String,
    pub percent_change_day: Option<f64>,
    pub trend_note: String,
    pub trend: String,
}

impl SnapshotRecord {
    /// Builds the record once the display name is known.
    pub fn from_bars(ticker: &str, company_name: &str, bars: &BarPair, display_tz: Tz) -> Self {
        let cur = &bars.current;
        let previous_close = bars.previous.as_ref().and_then(|p| present(p.close));
        let previous_volume = bars.previous.as_ref().and_then(|p| present(p.volume));

        let pct = percent_change(cur.close, previous_close);
        let trend_note = build_trend_note(&NoteInputs {
            open: cur.open,
            high: cur.high,
            low: cur.low,
            close: cur.close,
            previous_close,
            volume: cur.volume,
            previous_volume,
        });

        Self {
            date: trading_date(cur.session, display_tz),
            ticker: ticker.to_string(),
            company_name: company_name.to_string(),
            open: present(cur.open).map(round2),
            high: present(cur.high).map(round2),
            low: present(cur.low).map(round2),
            close: present(cur.close).map(round2),
            previous_close: previous_close.map(round2),
            volume: format_volume(cur.volume),
            percent_change_day: pct,
            trend_note,
            trend: trend_label(pct).to_string(),
        }
    }

    /// Cells in `LEDGER_COLUMNS` order.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            format_ledger_date(self.date),
            self.ticker.clone(),
            self.company_name.clone(),
            format_price(self.open),
            format_price(self.high),
            format_price(self.low),
            format_price(self.close),
            format_price(self.previous_close),
            self.volume.clone(),
            format_percent(self.percent_change_day),
            self.trend_note.clone(),
            self.trend.clone(),
        ]
    }
}

/// Computes the snapshot for one ticker.
///
/// A non-empty `name_hint` wins; otherwise the resolver is asked, and the ticker itself is
/// the last resort. The lookup is the only external call made here.
pub async fn compute_snapshot(
    ticker: &str,
    name_hint: Option<&str>,
    bars: &BarPair,
    names: &dyn NameResolver,
    display_tz: Tz,
) -> SnapshotRecord {
    let hint = name_hint.map(str::trim).filter(|s| !s.is_empty());
    let company_name = match hint {
        Some(name) => name.to_string(),
        None => match lookup_name(names, ticker).await {
            Lookup::Found(name) => name,
            Lookup::Empty => ticker.to_string(),
            Lookup::Failed(err) => {
                tracing::debug!(%ticker, error = %err, "name lookup failed; using ticker");
                ticker.to_string()
            }
        },
    };

    SnapshotRecord::from_bars(ticker, &company_name, bars, display_tz)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoteInputs {
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub previous_close: Option<f64>,
    pub volume: Option<f64>,
    pub previous_volume: Option<f64>,
}

/// Fixed rule-based commentary. Empty unless all of OHLC and the previous close are known.
pub fn build_trend_note(inputs: &NoteInputs) -> String {
    let (Some(_), Some(high), Some(low), Some(close), Some(prev_close)) = (
        present(inputs.open),
        present(inputs.high),
        present(inputs.low),
        present(inputs.close),
        present(inputs.previous_close),
    ) else {
        return String::new();
    };

    let day_range = if prev_close != 0.0 {
        (high - low) / prev_close * 100.0
    } else {
        0.0
    };
    // Undefined change (zero previous close) reads as flat and neutral.
    let chg = percent_change(Some(close), Some(prev_close));

    let volatility = if day_range >= 5.0 {
        "high"
    } else if day_range >= 2.0 {
        "moderate"
    } else {
        "low"
    };

    let direction = match chg {
        Some(c) if c > 0.0 => "rebounded",
        Some(c) if c < 0.0 => "sold off",
        _ => "closed flat",
    };

    let volume_phrase = volume_phrase(inputs.volume, inputs.previous_volume);

    let bias = match chg {
        Some(c) if c >= 2.0 => "bullish",
        Some(c) if c <= -2.0 => "bearish",
        _ => "neutral",
    };

    format!(
        "{direction}{volume_phrase} with {volatility} intraday volatility; short-term bias is {bias}."
    )
}

// Omitted entirely (not "steady") unless the previous volume is a usable baseline.
fn volume_phrase(volume: Option<f64>, previous_volume: Option<f64>) -> &'static str {
    let (Some(vol), Some(prev)) = (present(volume), present(previous_volume)) else {
        return "";
    };
    if prev <= 0.0 {
        return "";
    }

    if vol >= prev * 1.2 {
        " on higher volume"
    } else if vol <= prev * 0.8 {
        " on lighter volume"
    } else {
        " on steady volume"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{RawBar, SessionStamp};

    fn inputs(prev_close: f64, close: f64) -> NoteInputs {
        NoteInputs {
            open: Some(prev_close),
            high: Some(close.max(prev_close)),
            low: Some(close.min(prev_close)),
            close: Some(close),
            previous_close: Some(prev_close),
            volume: None,
            previous_volume: None,
        }
    }

    fn bar(day: u32, o: f64, h: f64, l: f64, c: f64, v: f64) -> RawBar {
        RawBar {
            session: SessionStamp::Naive(NaiveDate::from_ymd_opt(2026, 2, day).unwrap()),
            open: Some(o),
            high: Some(h),
            low: Some(l),
            close: Some(c),
            volume: Some(v),
        }
    }

    #[test]
    fn note_is_empty_when_any_price_is_missing() {
        let mut i = inputs(100.0, 101.0);
        i.previous_close = None;
        assert_eq!(build_trend_note(&i), "");

        let mut i = inputs(100.0, 101.0);
        i.high = Some(f64::NAN);
        assert_eq!(build_trend_note(&i), "");
    }

    #[test]
    fn note_volatility_and_bias_thresholds() {
        // range 5% exactly -> high; change -5% -> bearish
        let note = build_trend_note(&inputs(100.0, 95.0));
        assert_eq!(
            note,
            "sold off with high intraday volatility; short-term bias is bearish."
        );

        let note = build_trend_note(&inputs(100.0, 100.0));
        assert_eq!(
            note,
            "closed flat with low intraday volatility; short-term bias is neutral."
        );
    }

    #[test]
    fn zero_previous_close_reads_flat() {
        let note = build_trend_note(&NoteInputs {
            open: Some(1.0),
            high: Some(2.0),
            low: Some(0.5),
            close: Some(1.5),
            previous_close: Some(0.0),
            volume: Some(10.0),
            previous_volume: Some(10.0),
        });
        assert_eq!(
            note,
            "closed flat on steady volume with low intraday volatility; short-term bias is neutral."
        );
    }

    #[test]
    fn volume_phrase_guards() {
        assert_eq!(volume_phrase(Some(120.0), Some(100.0)), " on higher volume");
        assert_eq!(volume_phrase(Some(80.0), Some(100.0)), " on lighter volume");
        assert_eq!(volume_phrase(Some(100.0), Some(100.0)), " on steady volume");
        assert_eq!(volume_phrase(Some(100.0), Some(0.0)), "");
        assert_eq!(volume_phrase(Some(100.0), None), "");
        assert_eq!(volume_phrase(Some(f64::NAN), Some(100.0)), "");
        assert_eq!(volume_phrase(None, Some(100.0)), "");
    }

    #[test]
    fn record_from_two_bars() {
        let pair = BarPair {
            current: bar(3, 101.0, 103.0, 99.0, 102.0, 1300.0),
            previous: Some(bar(2, 99.0, 101.0, 98.0, 100.0, 1000.0)),
        };
        let rec = SnapshotRecord::from_bars("AAA", "Triple A", &pair, chrono_tz::Asia::Singapore);

        assert_eq!(
            rec.to_row(),
            vec![
                "03/02/2026",
                "AAA",
                "Triple A",
                "101.0",
                "103.0",
                "99.0",
                "102.0",
                "100.0",
                "1.30k",
                "2.00%",
                "rebounded on higher volume with moderate intraday volatility; short-term bias is bullish.",
                "increase",
            ]
        );
    }

    #[test]
    fn record_without_previous_bar() {
        let pair = BarPair {
            current: bar(3, 101.0, 103.0, 99.0, 102.0, 1300.0),
            previous: None,
        };
        let rec = SnapshotRecord::from_bars("AAA", "AAA", &pair, chrono_tz::Asia::Singapore);
        assert_eq!(rec.previous_close, None);
        assert_eq!(rec.percent_change_day, None);
        assert_eq!(rec.trend_note, "");
        assert_eq!(rec.trend, "");
        assert_eq!(rec.close, Some(102.0));
        assert_eq!(rec.volume, "1.30k");
    }
}
