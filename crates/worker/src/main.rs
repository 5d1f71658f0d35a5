use clap::Parser;
use stocklog_core::error::MissingInputError;
use stocklog_core::ingest::provider::ChartApiProvider;
use stocklog_core::mirror::sheets::GoogleSheetsMirror;
use stocklog_core::mirror::{MirrorOutcome, MirrorSink};
use stocklog_core::pipeline::{Collaborators, RunOptions};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "stocklog_worker")]
struct Args {
    /// Watchlist CSV (overrides WATCHLIST).
    #[arg(long)]
    watchlist: Option<std::path::PathBuf>,

    /// Ledger CSV (overrides OUT_CSV).
    #[arg(long)]
    out_csv: Option<std::path::PathBuf>,

    /// Compute snapshots without writing the ledger or the mirror.
    #[arg(long)]
    dry_run: bool,

    /// Do not mirror this run's rows even if the mirror is configured.
    #[arg(long)]
    skip_mirror: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut settings = stocklog_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    if let Some(path) = args.watchlist {
        settings.watchlist_path = path;
    }
    if let Some(path) = args.out_csv {
        settings.out_csv = path;
    }

    let provider = ChartApiProvider::from_settings(&settings)?;

    // A broken mirror configuration must not stop the ledger update.
    let mirror = match GoogleSheetsMirror::from_settings(&settings) {
        Ok(mirror) => mirror,
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::warn!(error = %format!("{err:#}"), "mirror misconfigured; continuing without it");
            None
        }
    };

    let collab = Collaborators {
        bars: &provider,
        names: &provider,
        mirror: mirror.as_ref().map(|m| m as &dyn MirrorSink),
        ticker_delay: provider.req_delay(),
    };
    let opts = RunOptions {
        dry_run: args.dry_run,
        skip_mirror: args.skip_mirror,
    };

    let summary = match stocklog_core::pipeline::run(&settings, &collab, &opts).await {
        Ok(summary) => summary,
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            if let Some(missing) = err.downcast_ref::<MissingInputError>() {
                tracing::error!(path = %missing.path.display(), column = missing.column, "invalid watchlist");
            } else {
                tracing::error!(error = %format!("{err:#}"), "snapshot run failed");
            }
            return Err(err);
        }
    };

    if let MirrorOutcome::Failed(err) = &summary.mirror {
        sentry_anyhow::capture_anyhow(err);
    }

    tracing::info!(
        tickers = summary.watchlist_len,
        rows = summary.batch.len(),
        skipped = summary.skipped.len(),
        ledger_rows = ?summary.ledger_rows,
        mirror = ?summary.mirror,
        dry_run = opts.dry_run,
        "snapshot run finished"
    );

    Ok(())
}

fn init_sentry(settings: &stocklog_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
