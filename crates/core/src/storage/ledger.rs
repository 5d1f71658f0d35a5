use crate::domain::snapshot::{SnapshotRecord, DATE_COLUMN, LEDGER_COLUMNS, TICKER_COLUMN};
use crate::time::session::parse_ledger_date;
use anyhow::Context;
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Column name -> cell text. Cells are always text; absent columns read as empty.
pub type LedgerRow = BTreeMap<String, String>;

/// Persisted snapshot rows, unique on (Date, Ticker) and kept in canonical order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    columns: Vec<String>,
    rows: Vec<LedgerRow>,
}

/// Canonical order: parsed date, then ticker. Unparsable dates sort first; the raw date text
/// breaks ties between them so the order stays total.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    date: NaiveDate,
    ticker: String,
    raw_date: String,
}

impl Ledger {
    pub fn new(columns: Vec<String>, rows: Vec<LedgerRow>) -> Self {
        Self { columns, rows }
    }

    pub fn from_records(records: &[SnapshotRecord]) -> Self {
        let columns: Vec<String> = LEDGER_COLUMNS.iter().map(|c| c.to_string()).collect();
        let rows = records
            .iter()
            .map(|rec| columns.iter().cloned().zip(rec.to_row()).collect())
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[LedgerRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, date: &str, ticker: &str) -> Option<&LedgerRow> {
        self.rows
            .iter()
            .find(|r| cell(r, DATE_COLUMN) == date && cell(r, TICKER_COLUMN) == ticker)
    }

    /// Row cells in column order, missing columns as empty text.
    pub fn row_values(&self, row: &LedgerRow) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| cell(row, c).to_string())
            .collect()
    }

    fn require_key_columns(&self) -> anyhow::Result<()> {
        for key in [DATE_COLUMN, TICKER_COLUMN] {
            anyhow::ensure!(
                self.columns.iter().any(|c| c == key),
                "ledger is missing key column '{key}' (columns: {:?})",
                self.columns
            );
        }
        Ok(())
    }
}

fn cell<'a>(row: &'a LedgerRow, column: &str) -> &'a str {
    row.get(column).map(String::as_str).unwrap_or("")
}

fn sort_key(row: &LedgerRow) -> SortKey {
    let raw_date = cell(row, DATE_COLUMN).to_string();
    SortKey {
        date: parse_ledger_date(&raw_date),
        ticker: cell(row, TICKER_COLUMN).to_string(),
        raw_date,
    }
}

/// Merges a new batch into the existing ledger.
///
/// Batch rows replace existing rows with the same (Date, Ticker); within either side the
/// later row wins. Columns are the union of both sides, existing order first.
pub fn merge_ledger(existing: Option<Ledger>, batch: &[SnapshotRecord]) -> anyhow::Result<Ledger> {
    merge_rows(existing, Ledger::from_records(batch))
}

pub fn merge_rows(existing: Option<Ledger>, batch: Ledger) -> anyhow::Result<Ledger> {
    batch.require_key_columns()?;

    let Some(existing) = existing else {
        return Ok(canonicalize(batch.columns, batch.rows));
    };
    existing.require_key_columns()?;

    let mut columns = existing.columns;
    for c in batch.columns {
        if !columns.contains(&c) {
            columns.push(c);
        }
    }

    let rows = existing.rows.into_iter().chain(batch.rows).collect();
    Ok(canonicalize(columns, rows))
}

fn canonicalize(columns: Vec<String>, rows: Vec<LedgerRow>) -> Ledger {
    // The sort key embeds the (Date, Ticker) key, so inserting in order keeps the last row
    // per key and iterating yields canonical order.
    let mut by_key: BTreeMap<SortKey, LedgerRow> = BTreeMap::new();
    for row in rows {
        by_key.insert(sort_key(&row), row);
    }
    Ledger {
        columns,
        rows: by_key.into_values().collect(),
    }
}

/// `Ok(None)` when the ledger file does not exist yet.
pub fn read_ledger(path: &Path) -> anyhow::Result<Option<Ledger>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open ledger {}", path.display()))
        }
    };
    read_ledger_from(file)
        .with_context(|| format!("failed to read ledger {}", path.display()))
        .map(Some)
}

pub fn read_ledger_from<R: Read>(reader: R) -> anyhow::Result<Ledger> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let columns: Vec<String> = rdr
        .headers()
        .context("failed to read ledger header")?
        .iter()
        .map(str::to_string)
        .collect();

    for (i, c) in columns.iter().enumerate() {
        if columns[..i].contains(c) {
            anyhow::bail!("ledger header repeats column '{c}'; cannot rewrite it without losing data");
        }
    }

    let mut rows = Vec::new();
    for (n, record) in rdr.records().enumerate() {
        let record = record.context("failed to read ledger row")?;
        // Short rows are padded below; long rows have cells no column can hold.
        if record.len() > columns.len() {
            anyhow::bail!(
                "ledger row {} has {} cells, header has {}",
                n + 1,
                record.len(),
                columns.len()
            );
        }
        let row: LedgerRow = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), record.get(i).unwrap_or("").to_string()))
            .collect();
        rows.push(row);
    }

    Ok(Ledger { columns, rows })
}

pub fn write_ledger_to<W: Write>(writer: W, ledger: &Ledger) -> anyhow::Result<()> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    wtr.write_record(&ledger.columns)
        .context("failed to write ledger header")?;
    for row in &ledger.rows {
        wtr.write_record(ledger.row_values(row))
            .context("failed to write ledger row")?;
    }
    wtr.flush().context("failed to flush ledger")?;
    Ok(())
}

/// Rewrites the whole ledger. Writes a sibling temp file first and renames it into place.
pub fn write_ledger(path: &Path, ledger: &Ledger) -> anyhow::Result<()> {
    let tmp = temp_path(path);
    let file = std::fs::File::create(&tmp)
        .with_context(|| format!("failed to create {}", tmp.display()))?;

    if let Err(err) = write_ledger_to(std::io::BufWriter::new(file), ledger) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err).with_context(|| format!("failed to write {}", tmp.display()));
    }

    std::fs::rename(&tmp, path).with_context(|| {
        format!("failed to move {} to {}", tmp.display(), path.display())
    })?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "ledger.csv".into());
    name.push(".tmp");
    path.with_file_name(name)
}
