//! Daily snapshot store.
//!
//! One JSON document per trading date at `<dir>/<prefix><YYYYMMDD>.json`.
//! Documents are never deleted here; a new date means a new file.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info};

use krx_common::SnapshotConfig;

use crate::error::SnapshotError;

use super::pipeline::ScreeningRun;
use super::result::{AnalysisResults, RunStats};

const DATE_FORMAT: &str = "%Y%m%d";

/// Persisted outcome of one screening run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub trading_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub stats: RunStats,
    pub results: AnalysisResults,
}

impl From<ScreeningRun> for Snapshot {
    fn from(run: ScreeningRun) -> Self {
        Self {
            trading_date: run.trading_date,
            generated_at: Utc::now(),
            stats: run.stats,
            results: run.results,
        }
    }
}

/// File-backed store keyed by trading date.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    prefix: String,
}

impl SnapshotStore {
    pub fn new(config: &SnapshotConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            prefix: config.file_prefix.clone(),
        }
    }

    /// Document path for `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}{}.json", self.prefix, date.format(DATE_FORMAT)))
    }

    /// Write `snapshot`, replacing any document for the same date.
    ///
    /// The body goes to a temporary file in the same directory first and is
    /// renamed into place, so readers see either the old or the new document.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<PathBuf, SnapshotError> {
        let path = self.path_for(snapshot.trading_date);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SnapshotError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let body = serde_json::to_vec_pretty(snapshot).map_err(|source| SnapshotError::Corrupt {
            path: path.clone(),
            source,
        })?;

        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|source| SnapshotError::Io {
                path: tmp.clone(),
                source,
            })?;

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| SnapshotError::Io {
                path: path.clone(),
                source,
            })?;

        info!(path = %path.display(), trading_date = %snapshot.trading_date, "Snapshot saved");
        Ok(path)
    }

    /// Read the document for `date`.
    pub async fn load(&self, date: NaiveDate) -> Result<Snapshot, SnapshotError> {
        let path = self.path_for(date);

        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Snapshot not found");
                return Err(SnapshotError::NotFound { date });
            }
            Err(source) => return Err(SnapshotError::Io { path, source }),
        };

        serde_json::from_slice(&body).map_err(|source| SnapshotError::Corrupt { path, source })
    }

    /// Dates of all stored documents, ascending.
    pub async fn list_dates(&self) -> Result<Vec<NaiveDate>, SnapshotError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SnapshotError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut dates = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|source| SnapshotError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let Some(entry) = entry else { break };

            if let Some(date) = entry.file_name().to_str().and_then(|n| self.parse_file_name(n)) {
                dates.push(date);
            }
        }

        dates.sort();
        Ok(dates)
    }

    fn parse_file_name(&self, name: &str) -> Option<NaiveDate> {
        let stamp = name.strip_prefix(&self.prefix)?.strip_suffix(".json")?;
        NaiveDate::parse_from_str(stamp, DATE_FORMAT).ok()
    }
}
