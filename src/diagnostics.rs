//! Failure record written next to the executable when an apply run fails.
//!
//! The file is overwritten on every failure, so it always describes the most
//! recent one.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::error::{Result, ThemeError};
use crate::logging;
use crate::outcome::ApplyOutcome;

pub const ERROR_LOG_FILE: &str = "theme_error.log";

#[derive(Debug, Clone)]
pub struct DiagnosticRecord {
    pub theme: String,
    pub path: PathBuf,
    pub error: String,
    /// Source chain of the error, outermost first
    pub causes: Vec<String>,
    pub timestamp: String,
}

impl DiagnosticRecord {
    /// Record for a failed outcome. `source` adds the error's cause chain.
    pub fn new(
        theme: impl Into<String>,
        path: &Path,
        outcome: &ApplyOutcome,
        source: Option<&ThemeError>,
    ) -> Self {
        let mut causes = Vec::new();
        if let Some(err) = source {
            let mut current: Option<&dyn std::error::Error> = Some(err);
            while let Some(cause) = current {
                causes.push(cause.to_string());
                current = cause.source();
            }
        }
        Self {
            theme: theme.into(),
            path: path.to_path_buf(),
            error: outcome.to_string(),
            causes,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn render(&self) -> String {
        let mut text = format!(
            "Time: {}\nTheme: {}\nPath: {}\nError: {}\nStack Trace:\n",
            self.timestamp,
            self.theme,
            self.path.display(),
            self.error
        );
        if self.causes.is_empty() {
            text.push_str("  (no further detail)\n");
        }
        for (i, cause) in self.causes.iter().enumerate() {
            text.push_str(&format!("  {}: {}\n", i, cause));
        }
        text.push_str(&format!("Full Log: {}\n", logging::log_path().display()));
        let recent = logging::get_recent_logs();
        if !recent.is_empty() {
            text.push_str("Recent Log:\n");
            for line in recent {
                text.push_str(&format!("  {}\n", line));
            }
        }
        text
    }

    /// Write the record into `dir`, returning the file path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(ERROR_LOG_FILE);
        fs::write(&path, self.render())
            .map_err(|e| ThemeError::io(format!("Writing {}", path.display()), e))?;
        info!(path = %path.display(), theme = %self.theme, "Diagnostic record written");
        Ok(path)
    }
}

/// Write a record, logging instead of failing when the directory is not writable
pub fn persist(dir: &Path, record: &DiagnosticRecord) -> Option<PathBuf> {
    match record.write_to(dir) {
        Ok(path) => Some(path),
        Err(e) => {
            error!(error = %e, "Could not write diagnostic record");
            None
        }
    }
}
