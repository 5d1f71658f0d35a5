use crate::error::MissingInputError;
use crate::ingest::types::WatchlistEntry;
use anyhow::Context;
use csv::ReaderBuilder;
use std::io::Read;
use std::path::Path;

const TICKER_COLUMN: &str = "Ticker";
const COMPANY_NAME_COLUMN: &str = "CompanyName";

pub fn load_watchlist(path: &Path) -> anyhow::Result<Vec<WatchlistEntry>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open watchlist {}", path.display()))?;
    read_watchlist(file, path)
}

/// Reads watchlist rows in file order. Blank tickers are skipped; `CompanyName` is optional.
pub fn read_watchlist<R: Read>(reader: R, path: &Path) -> anyhow::Result<Vec<WatchlistEntry>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .with_context(|| format!("failed to read watchlist header from {}", path.display()))?
        .clone();

    let ticker_idx = headers
        .iter()
        .position(|h| h == TICKER_COLUMN)
        .ok_or_else(|| MissingInputError {
            path: path.to_path_buf(),
            column: TICKER_COLUMN,
        })?;
    let name_idx = headers.iter().position(|h| h == COMPANY_NAME_COLUMN);

    let mut out = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| {
            format!("failed to read watchlist row {} in {}", line + 2, path.display())
        })?;

        let ticker = record.get(ticker_idx).unwrap_or("").trim();
        if ticker.is_empty() {
            continue;
        }

        let company_name = name_idx
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        out.push(WatchlistEntry {
            ticker: ticker.to_string(),
            company_name,
        });
    }

    Ok(out)
}
