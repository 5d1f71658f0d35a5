pub mod domain;
pub mod error;
pub mod ingest;
pub mod mirror;
pub mod pipeline;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;
    use chrono_tz::Tz;
    use std::path::PathBuf;

    const DEFAULT_WATCHLIST: &str = "watchlist.csv";
    const DEFAULT_OUT_CSV: &str = "stock_log.csv";
    const DEFAULT_DISPLAY_TZ: &str = "Asia/Singapore";
    const DEFAULT_SHEET_TAB: &str = "Sheet1";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub watchlist_path: PathBuf,
        pub out_csv: PathBuf,
        pub display_tz: Tz,
        pub sentry_dsn: Option<String>,
        pub market_data_base_url: Option<String>,
        pub google_service_account_json: Option<String>,
        pub sheet_id: Option<String>,
        pub sheet_tab: String,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let display_tz = non_blank_env("DISPLAY_TZ")
                .unwrap_or_else(|| DEFAULT_DISPLAY_TZ.to_string());
            let display_tz = display_tz
                .parse::<Tz>()
                .map_err(|err| anyhow::anyhow!("{err}"))
                .with_context(|| format!("DISPLAY_TZ is not a known time zone: {display_tz}"))?;

            Ok(Self {
                watchlist_path: non_blank_env("WATCHLIST")
                    .unwrap_or_else(|| DEFAULT_WATCHLIST.to_string())
                    .into(),
                out_csv: non_blank_env("OUT_CSV")
                    .unwrap_or_else(|| DEFAULT_OUT_CSV.to_string())
                    .into(),
                display_tz,
                sentry_dsn: non_blank_env("SENTRY_DSN"),
                market_data_base_url: non_blank_env("MARKET_DATA_BASE_URL"),
                google_service_account_json: non_blank_env("GOOGLE_SERVICE_ACCOUNT_JSON"),
                sheet_id: non_blank_env("SHEET_ID"),
                sheet_tab: non_blank_env("SHEET_TAB")
                    .unwrap_or_else(|| DEFAULT_SHEET_TAB.to_string()),
            })
        }

        /// Both the credentials blob and the sheet id must be present for the mirror to run.
        pub fn mirror_configured(&self) -> bool {
            self.google_service_account_json.is_some() && self.sheet_id.is_some()
        }

        pub fn require_sheet_id(&self) -> anyhow::Result<&str> {
            self.sheet_id.as_deref().context("SHEET_ID is required")
        }

        pub fn require_google_service_account_json(&self) -> anyhow::Result<&str> {
            self.google_service_account_json
                .as_deref()
                .context("GOOGLE_SERVICE_ACCOUNT_JSON is required")
        }
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                watchlist_path: DEFAULT_WATCHLIST.into(),
                out_csv: DEFAULT_OUT_CSV.into(),
                display_tz: chrono_tz::Asia::Singapore,
                sentry_dsn: None,
                market_data_base_url: None,
                google_service_account_json: None,
                sheet_id: None,
                sheet_tab: DEFAULT_SHEET_TAB.to_string(),
            }
        }
    }

    fn non_blank_env(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

}
