use chrono::{DateTime, FixedOffset, NaiveDate};

/// When a session happened, as reported by the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStamp {
    /// Exchange-local calendar date with no timezone attached.
    Naive(NaiveDate),
    /// Timestamp that carries its own offset.
    Zoned(DateTime<FixedOffset>),
}

/// One trading session for one ticker. Every price/volume field may be absent.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBar {
    pub session: SessionStamp,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarPair {
    pub current: RawBar,
    pub previous: Option<RawBar>,
}

impl BarPair {
    /// Keeps bars that carry a close and pairs up the last two.
    ///
    /// `bars` must be in chronological order. Returns `None` when no bar has a close.
    pub fn from_recent(bars: Vec<RawBar>) -> Option<Self> {
        let mut with_close: Vec<RawBar> = bars
            .into_iter()
            .filter(|b| b.close.is_some_and(|c| !c.is_nan()))
            .collect();

        let current = with_close.pop()?;
        let previous = with_close.pop();
        Some(Self { current, previous })
    }
}

/// Outcome of a best-effort call to an external collaborator.
///
/// Failures are values here; the orchestrator decides whether to skip or fall back.
#[derive(Debug)]
pub enum Lookup<T> {
    Found(T),
    Empty,
    Failed(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchlistEntry {
    pub ticker: String,
    pub company_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: u32, close: Option<f64>) -> RawBar {
        RawBar {
            session: SessionStamp::Naive(NaiveDate::from_ymd_opt(2026, 1, day).unwrap()),
            open: None,
            high: None,
            low: None,
            close,
            volume: None,
        }
    }

    #[test]
    fn pairs_last_two_bars_with_close() {
        let pair = BarPair::from_recent(vec![
            bar(5, Some(1.0)),
            bar(6, Some(2.0)),
            bar(7, Some(3.0)),
            bar(8, None),
        ])
        .unwrap();
        assert_eq!(pair.current.close, Some(3.0));
        assert_eq!(pair.previous.unwrap().close, Some(2.0));
    }

    #[test]
    fn single_bar_has_no_previous() {
        let pair = BarPair::from_recent(vec![bar(5, Some(1.0))]).unwrap();
        assert!(pair.previous.is_none());
    }

    #[test]
    fn nan_close_is_dropped() {
        assert!(BarPair::from_recent(vec![bar(5, Some(f64::NAN)), bar(6, None)]).is_none());
        assert!(BarPair::from_recent(Vec::new()).is_none());
    }
}
