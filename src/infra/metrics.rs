// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Appends every evaluation record to a CSV file next to the
// experiment's checkpoints: `{exp_id}.metrics.csv`.
//
// Columns are fixed when the file is created: step, epoch,
// timestamp, one column per tracked metric, improved, failure.
// A resumed run appends to the same file without rewriting the
// header, so the CSV mirrors the checkpointed history.
//
// Example:
//   step,epoch,timestamp,loss,ppl,bleu,improved,failure
//   500,1,2026-10-19T10:00:00Z,4.118200,61.447300,3.210000,true,
//   1000,1,2026-10-19T10:04:12Z,,,,false,evaluation diverged
//
// The file (and its directory) is created lazily on the first
// row, never before a device has been reserved.
//
// Reference: Rust Book §12 (I/O and File Handling)

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::domain::history::EvalRecord;

pub struct MetricsLogger {
    csv_path: PathBuf,
    columns:  Vec<String>,
}

impl MetricsLogger {
    pub fn new(csv_path: impl Into<PathBuf>, columns: &[String]) -> Self {
        Self { csv_path: csv_path.into(), columns: columns.to_vec() }
    }

    fn header(&self) -> String {
        let mut cols = vec!["step".to_string(), "epoch".into(), "timestamp".into()];
        cols.extend(self.columns.iter().cloned());
        cols.push("improved".into());
        cols.push("failure".into());
        cols.join(",")
    }

    fn row(&self, r: &EvalRecord) -> String {
        let mut cells = vec![r.step.to_string(), r.epoch.to_string(), r.timestamp.to_rfc3339()];
        cells.extend(
            self.columns
                .iter()
                .map(|c| r.metric(c).map(|v| format!("{v:.6}")).unwrap_or_default()),
        );
        cells.push(r.improved.to_string());
        // keep the failure text in a single cell
        cells.push(r.failure.as_deref().unwrap_or("").replace([',', '\n'], " "));
        cells.join(",")
    }

    /// Append one evaluation record as a new CSV row.
    pub fn log(&self, record: &EvalRecord) -> Result<()> {
        if let Some(dir) = self.csv_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;
        }
        let is_new = !self.csv_path.exists();
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open metrics log '{}'", self.csv_path.display()))?;

        if is_new {
            writeln!(f, "{}", self.header())?;
            tracing::debug!("Created metrics CSV: '{}'", self.csv_path.display());
        }
        writeln!(f, "{}", self.row(record))?;
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::history::Metrics;

    #[test]
    fn test_rows_follow_header_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exp").join("exp.metrics.csv");
        let logger = MetricsLogger::new(&path, &["loss".to_string(), "bleu".to_string()]);
        assert!(!path.exists());

        let mut m = Metrics::new();
        m.insert("loss".into(), 2.5);
        logger.log(&EvalRecord::succeeded(100, 1, m, true)).unwrap();
        logger.log(&EvalRecord::failed(200, 1, "nan, again")).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "step,epoch,timestamp,loss,bleu,improved,failure");
        assert!(lines[1].starts_with("100,1,"));
        assert!(lines[1].ends_with(",2.500000,,true,"));
        assert!(lines[2].ends_with(",,,false,nan  again"));
    }

    #[test]
    fn test_second_logger_appends_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.csv");
        let cols = ["loss".to_string()];
        MetricsLogger::new(&path, &cols).log(&EvalRecord::failed(1, 1, "x")).unwrap();
        MetricsLogger::new(&path, &cols).log(&EvalRecord::failed(2, 1, "y")).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("step,")).count(), 1);
        assert_eq!(text.lines().count(), 3);
    }
}
