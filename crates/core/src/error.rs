use std::fmt;
use std::path::PathBuf;

/// The watchlist cannot drive a run (unreadable, or missing a required column).
///
/// This is the only error the pipeline surfaces as a run failure; it travels inside
/// `anyhow::Error` so callers can `downcast_ref` it.
#[derive(Debug, Clone)]
pub struct MissingInputError {
    pub path: PathBuf,
    pub column: &'static str,
}

impl fmt::Display for MissingInputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "watchlist {} must have a '{}' column",
            self.path.display(),
            self.column
        )
    }
}

impl std::error::Error for MissingInputError {}
