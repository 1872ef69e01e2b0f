//! The ingestion driver: walks the input lines, turns qualifying ones into
//! points and applies the sequential or bulk write policy.

use std::path::Path;

use log::{debug, error, info, warn};

use crate::config::{ImportConfig, IterationOrder, MalformedPolicy, WriteMode};
use crate::dedup::DuplicateChecker;
use crate::error::IngestError;
use crate::record::{DataPoint, RawRecord, RecordTranslator};
use crate::store::PointStore;

/// Read the whole input file, one entry per line without terminators.
pub fn read_lines(path: impl AsRef<Path>) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().map(str::to_string).collect())
}

/// Reports bulk progress in steps of five percent.
///
/// The percentage is taken against every input line, not only the
/// qualifying ones, so a file with headers may never reach 100.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    counter: usize,
    last_shown: Option<usize>,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            counter: 0,
            last_shown: None,
        }
    }

    /// Count one more point. Returns the current five percent boundary if it
    /// has not been returned before.
    pub fn advance(&mut self) -> Option<usize> {
        self.counter += 1;
        if self.total == 0 {
            return None;
        }
        let boundary = 100 * self.counter / self.total / 5 * 5;
        if self.last_shown == Some(boundary) {
            return None;
        }
        self.last_shown = Some(boundary);
        Some(boundary)
    }

    pub fn count(&self) -> usize {
        self.counter
    }
}

/// Why a run ended. None of these are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    /// A sequential run met a point that already exists.
    Duplicate { timestamp: String },
    /// The store rejected a write; nothing after it was attempted.
    WriteFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub lines_total: usize,
    pub qualifying: usize,
    pub written: usize,
    pub skipped_malformed: usize,
    pub progress_marks: Vec<usize>,
    pub stop: StopReason,
}

impl IngestReport {
    fn new(lines_total: usize) -> Self {
        Self {
            lines_total,
            qualifying: 0,
            written: 0,
            skipped_malformed: 0,
            progress_marks: Vec::new(),
            stop: StopReason::Completed,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.stop == StopReason::Completed
    }
}

/// Runs one import against a store.
pub struct IngestDriver<'a, S: PointStore + ?Sized> {
    store: &'a S,
    config: &'a ImportConfig,
}

impl<'a, S: PointStore + ?Sized> IngestDriver<'a, S> {
    pub fn new(store: &'a S, config: &'a ImportConfig) -> Self {
        Self { store, config }
    }

    /// Process `lines` and write the resulting points.
    ///
    /// Configuration-class failures (bad timestamps, and bad field values
    /// unless skipping is enabled) and failed duplicate checks are returned
    /// as errors carrying the input line. Duplicates and rejected writes end
    /// the run early and are reported in [`IngestReport::stop`].
    pub async fn run<L: AsRef<str>>(&self, lines: &[L]) -> Result<IngestReport, IngestError> {
        let config = self.config;
        let translator = RecordTranslator::new(config);
        let checker = DuplicateChecker::new(self.store, &config.measurement, &config.tags);

        let mut report = IngestReport::new(lines.len());
        let mut progress = ProgressTracker::new(lines.len());
        let mut batch: Vec<DataPoint> = Vec::new();

        let order: Vec<usize> = match config.order {
            IterationOrder::Reverse => (0..lines.len()).rev().collect(),
            IterationOrder::Forward => (0..lines.len()).collect(),
        };

        for index in order {
            let line_no = index + 1;
            let record = match RawRecord::parse(lines[index].as_ref()) {
                Some(record) => record,
                None => continue,
            };
            report.qualifying += 1;

            let point = match translator.translate(&record) {
                Ok(point) => point,
                Err(e) if e.is_record_level() && config.malformed == MalformedPolicy::Skip => {
                    warn!("skipping line {}: {}", line_no, e);
                    report.skipped_malformed += 1;
                    continue;
                }
                Err(e) => return Err(e.at_line(line_no)),
            };
            debug!(
                "line {}: {}",
                line_no,
                serde_json::to_string(&point).unwrap_or_default()
            );

            match config.mode {
                WriteMode::Sequential => {
                    let timestamp = point.time_string();
                    let exists = checker
                        .exists(&timestamp)
                        .await
                        .map_err(|e| IngestError::Query(e).at_line(line_no))?;
                    if exists {
                        warn!(
                            "Entry with same tags and timestamp {} found in the database",
                            timestamp
                        );
                        report.stop = StopReason::Duplicate { timestamp };
                        break;
                    }
                    if let Err(e) = self.store.write(std::slice::from_ref(&point)).await {
                        error!("writing line {} failed: {}", line_no, e);
                        report.stop = StopReason::WriteFailed { error: e.to_string() };
                        break;
                    }
                    report.written += 1;
                }
                WriteMode::Bulk => {
                    if let Some(percent) = progress.advance() {
                        info!("read {} % of the values...", percent);
                        report.progress_marks.push(percent);
                    }
                    batch.push(point);
                }
            }
        }

        if config.mode == WriteMode::Bulk {
            if batch.is_empty() {
                info!("no values to add");
            } else {
                match self.store.write(&batch).await {
                    Ok(()) => {
                        report.written = batch.len();
                        info!("all {} values added to the database", batch.len());
                    }
                    Err(e) => {
                        error!("bulk write of {} values failed: {}", batch.len(), e);
                        report.stop = StopReason::WriteFailed { error: e.to_string() };
                    }
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_every_five_percent_once() {
        let mut tracker = ProgressTracker::new(20);
        let shown: Vec<usize> = (0..20).filter_map(|_| tracker.advance()).collect();
        assert_eq!(shown, (1..=20).map(|i| i * 5).collect::<Vec<_>>());
        assert_eq!(tracker.count(), 20);
    }

    #[test]
    fn progress_starts_at_zero_for_large_inputs() {
        let mut tracker = ProgressTracker::new(1000);
        let shown: Vec<usize> = (0..1000).filter_map(|_| tracker.advance()).collect();
        assert_eq!(shown.first(), Some(&0));
        assert_eq!(shown.last(), Some(&100));
        assert_eq!(shown.len(), 21);
        assert!(shown.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn progress_denominator_includes_all_lines() {
        // ten lines, two of them headers
        let mut tracker = ProgressTracker::new(10);
        let shown: Vec<usize> = (0..8).filter_map(|_| tracker.advance()).collect();
        assert_eq!(shown, vec![10, 20, 30, 40, 50, 60, 70, 80]);
    }

    #[test]
    fn progress_without_lines() {
        let mut tracker = ProgressTracker::new(0);
        assert_eq!(tracker.advance(), None);
    }

    #[test]
    fn read_lines_strips_terminators() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        let content = "date,time,temp\r\n01/17/2020,03:03,10.5\r\n\n01/17/2020,03:04,11";
        std::fs::write(&path, content).unwrap();

        let lines = read_lines(&path).unwrap();
        assert_eq!(
            lines,
            vec!["date,time,temp", "01/17/2020,03:03,10.5", "", "01/17/2020,03:04,11"]
        );
    }
}
