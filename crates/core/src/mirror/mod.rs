pub mod sheets;

use crate::storage::ledger::Ledger;

/// Append-only secondary destination for each run's batch.
#[async_trait::async_trait]
pub trait MirrorSink: Send + Sync {
    fn sink_name(&self) -> &'static str;

    /// Appends `rows` under `columns`. The sink decides whether it needs a header.
    async fn append_rows(&self, columns: &[String], rows: &[Vec<String>]) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub enum MirrorOutcome {
    NotConfigured,
    Skipped,
    Appended { rows: usize },
    Failed(anyhow::Error),
}

/// Best-effort mirror of a batch. Never returns an error; failure is reported in the outcome.
pub async fn mirror_batch(sink: Option<&dyn MirrorSink>, batch: &Ledger) -> MirrorOutcome {
    let Some(sink) = sink else {
        tracing::info!("mirror sink not configured; skipping");
        return MirrorOutcome::NotConfigured;
    };

    let rows: Vec<Vec<String>> = batch.rows().iter().map(|r| batch.row_values(r)).collect();
    match sink.append_rows(batch.columns(), &rows).await {
        Ok(()) => {
            tracing::info!(sink = sink.sink_name(), rows = rows.len(), "mirrored batch");
            MirrorOutcome::Appended { rows: rows.len() }
        }
        Err(err) => {
            tracing::warn!(sink = sink.sink_name(), error = %format!("{err:#}"), "mirror append failed; ledger unaffected");
            MirrorOutcome::Failed(err)
        }
    }
}
