use crate::config::Settings;
use crate::domain::snapshot::{compute_snapshot, SnapshotRecord};
use crate::ingest::provider::{fetch_bar_pair, BarProvider, NameResolver};
use crate::ingest::types::Lookup;
use crate::ingest::watchlist::load_watchlist;
use crate::mirror::{mirror_batch, MirrorOutcome, MirrorSink};
use crate::storage::ledger::{merge_ledger, read_ledger, write_ledger, Ledger};
use std::time::Duration;

/// External collaborators for one run.
pub struct Collaborators<'a> {
    pub bars: &'a dyn BarProvider,
    pub names: &'a dyn NameResolver,
    pub mirror: Option<&'a dyn MirrorSink>,
    /// Pause between tickers to stay under provider rate limits.
    pub ticker_delay: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Compute the batch but leave the ledger and mirror untouched.
    pub dry_run: bool,
    pub skip_mirror: bool,
}

#[derive(Debug)]
pub struct RunSummary {
    pub watchlist_len: usize,
    pub skipped: Vec<String>,
    /// New snapshots in watchlist order.
    pub batch: Vec<SnapshotRecord>,
    /// Ledger size after the write; `None` when the ledger was not touched.
    pub ledger_rows: Option<usize>,
    pub mirror: MirrorOutcome,
}

/// One end-of-day run: watchlist -> bars -> snapshots -> ledger (+ mirror).
///
/// Only an unusable watchlist or a failed ledger read/write fails the run. Tickers without
/// data are skipped, and mirror problems are reported in the summary.
pub async fn run(
    settings: &Settings,
    collab: &Collaborators<'_>,
    opts: &RunOptions,
) -> anyhow::Result<RunSummary> {
    let watchlist = load_watchlist(&settings.watchlist_path)?;
    let watchlist_len = watchlist.len();
    tracing::info!(
        watchlist = %settings.watchlist_path.display(),
        tickers = watchlist_len,
        provider = collab.bars.provider_name(),
        "starting snapshot run"
    );

    let mut batch = Vec::with_capacity(watchlist_len);
    let mut skipped = Vec::new();

    for (idx, entry) in watchlist.iter().enumerate() {
        if idx != 0 && !collab.ticker_delay.is_zero() {
            tokio::time::sleep(collab.ticker_delay).await;
        }

        let ticker = entry.ticker.as_str();
        let bars = match fetch_bar_pair(collab.bars, ticker).await {
            Lookup::Found(bars) => bars,
            Lookup::Empty => {
                tracing::warn!(%ticker, "no data for ticker; skipping");
                skipped.push(entry.ticker.clone());
                continue;
            }
            Lookup::Failed(err) => {
                tracing::warn!(%ticker, error = %format!("{err:#}"), "bar retrieval failed; skipping");
                skipped.push(entry.ticker.clone());
                continue;
            }
        };

        let record = compute_snapshot(
            ticker,
            entry.company_name.as_deref(),
            &bars,
            collab.names,
            settings.display_tz,
        )
        .await;

        tracing::debug!(
            %ticker,
            date = %record.date,
            trend = %record.trend,
            "computed snapshot"
        );
        batch.push(record);
    }

    let mut summary = RunSummary {
        watchlist_len,
        skipped,
        batch,
        ledger_rows: None,
        mirror: MirrorOutcome::Skipped,
    };

    if summary.batch.is_empty() {
        tracing::info!("no rows generated; ledger untouched");
        return Ok(summary);
    }

    if opts.dry_run {
        tracing::info!(rows = summary.batch.len(), dry_run = true, "computed batch; ledger untouched");
        return Ok(summary);
    }

    let existing = read_ledger(&settings.out_csv)?;
    let merged = merge_ledger(existing, &summary.batch)?;
    write_ledger(&settings.out_csv, &merged)?;
    summary.ledger_rows = Some(merged.len());
    tracing::info!(
        out_csv = %settings.out_csv.display(),
        added = summary.batch.len(),
        ledger_rows = merged.len(),
        "updated ledger (de-duped by Date+Ticker)"
    );

    summary.mirror = if opts.skip_mirror {
        MirrorOutcome::Skipped
    } else {
        mirror_batch(collab.mirror, &Ledger::from_records(&summary.batch)).await
    };

    Ok(summary)
}
