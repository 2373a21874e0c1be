// src/ingest.rs
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::sheets::SheetsError;

// Column names the pipeline recognizes. Source headers must match exactly.
pub const COL_DATE: &str = "Date";
pub const COL_NAME: &str = "Name";
pub const COL_TOTAL: &str = "Total Submissions";

// Summary marker some sheets carry in the date column. Skipped before parsing.
const TOTAL_MARKER: &str = "TOTAL";

// English month names, independent of process locale.
pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Month name for a 1-based month number.
pub fn month_name(month: u32) -> &'static str {
    MONTH_NAMES[((month + 11) % 12) as usize]
}

// Date formats accepted in the date-bearing column, tried in order.
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%b %d, %Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// One raw row as delivered by a source: column name to loosely-typed value.
pub type RawRecord = HashMap<String, Value>;

#[derive(Error, Debug)]
pub enum BatchFetchError {
    #[error("Sheets fetch failed: {0}")]
    Sheets(#[from] SheetsError),

    #[error("CSV read failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("batch '{0}' is not provided by this source")]
    UnknownBatch(String),
}

// A per-batch failure collected during ingestion. Never aborts the run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchWarning {
    pub batch: String,
    pub message: String,
}

/// A provider of named batches of raw records. One implementation per
/// ingestion strategy (worksheet tabs, local CSV files, ...).
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Human-readable identity of the source, used in warnings and logs.
    fn describe(&self) -> String;

    /// Batch names this source offers, in fetch order.
    fn batch_names(&self) -> Result<Vec<String>, BatchFetchError>;

    async fn fetch_batch(&self, name: &str) -> Result<Vec<RawRecord>, BatchFetchError>;
}

/// One normalized submission record. `year`/`month_name` are derived from
/// `date` and are present exactly when `date` parsed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SubmissionRow {
    pub name: String,
    pub date: Option<NaiveDate>,
    pub total_submissions: Option<i64>,
    pub source_batch: String,
    pub year: Option<i32>,
    pub month_name: Option<String>,
}

/// All ingested rows, batches concatenated in input order. Not deduplicated,
/// not sorted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Dataset {
    pub rows: Vec<SubmissionRow>,
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows that can participate in year/month filtering.
    pub fn usable_rows(&self) -> impl Iterator<Item = &SubmissionRow> {
        self.rows.iter().filter(|r| r.date.is_some())
    }

    /// Distinct years, most recent first.
    pub fn available_years(&self) -> Vec<i32> {
        let years: BTreeSet<i32> = self.usable_rows().filter_map(|r| r.year).collect();
        years.into_iter().rev().collect()
    }

    /// Distinct month names for a year, in calendar order.
    pub fn months_for_year(&self, year: i32) -> Vec<String> {
        let months: BTreeSet<u32> = self
            .usable_rows()
            .filter(|r| r.year == Some(year))
            .filter_map(|r| r.date.map(|d| d.month()))
            .collect();
        months.into_iter().map(|m| month_name(m).to_string()).collect()
    }

    /// Distinct employee names across all rows, ascending.
    pub fn employee_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .rows
            .iter()
            .filter(|r| !r.name.is_empty())
            .map(|r| r.name.clone())
            .collect();
        names.into_iter().collect()
    }
}

pub struct IngestReport {
    pub dataset: Dataset,
    pub warnings: Vec<BatchWarning>,
}

/// Fetches and normalizes every batch from every source. Per-batch failures
/// become warnings; only the complete absence of rows is surfaced (by the
/// caller) as a no-data condition.
pub async fn ingest(sources: &[Box<dyn BatchSource>]) -> IngestReport {
    let mut rows = Vec::new();
    let mut warnings = Vec::new();

    for source in sources {
        let names = match source.batch_names() {
            Ok(names) => names,
            Err(e) => {
                warn!("Failed to list batches for {}: {}", source.describe(), e);
                warnings.push(BatchWarning {
                    batch: source.describe(),
                    message: format!("Failed to list batches: {}", e),
                });
                continue;
            }
        };

        for name in names {
            match source.fetch_batch(&name).await {
                Ok(records) => {
                    let before = rows.len();
                    for record in &records {
                        if let Some(row) = normalize_record(record, &name) {
                            rows.push(row);
                        }
                    }
                    info!(
                        "Ingested batch '{}' from {}: {} rows kept of {} records",
                        name,
                        source.describe(),
                        rows.len() - before,
                        records.len()
                    );
                }
                Err(e) => {
                    warn!("Batch '{}' failed to fetch: {}", name, e);
                    warnings.push(BatchWarning {
                        batch: name,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    if rows.is_empty() {
        warn!("No data available: every batch failed or was empty.");
    }

    IngestReport {
        dataset: Dataset { rows },
        warnings,
    }
}

// Returns None only for non-data marker rows. A date that fails to parse
// yields a row with a null date, which later stages exclude from filtering.
fn normalize_record(record: &RawRecord, batch: &str) -> Option<SubmissionRow> {
    let date_cell = record.get(COL_DATE);
    if is_total_marker(date_cell) {
        debug!("Skipping summary marker row in batch '{}'", batch);
        return None;
    }

    let date = date_cell.and_then(parse_date_value);
    if date.is_none() {
        if let Some(cell) = date_cell {
            debug!("Unparseable date {:?} in batch '{}'", cell, batch);
        }
    }

    Some(SubmissionRow {
        name: string_value(record.get(COL_NAME)),
        date,
        total_submissions: record.get(COL_TOTAL).and_then(count_value),
        source_batch: batch.to_string(),
        year: date.map(|d| d.year()),
        month_name: date.map(|d| month_name(d.month()).to_string()),
    })
}

fn is_total_marker(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::String(s)) if s.trim().eq_ignore_ascii_case(TOTAL_MARKER))
}

fn string_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn parse_date_value(value: &Value) -> Option<NaiveDate> {
    let s = match value {
        Value::String(s) => s.trim(),
        _ => return None,
    };
    if s.is_empty() {
        return None;
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.date());
        }
    }
    None
}

fn count_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}

/// Local-file ingestion: every `*.csv` file in a directory is one batch,
/// named after the file stem.
pub struct CsvDirSource {
    dir: PathBuf,
}

impl CsvDirSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl BatchSource for CsvDirSource {
    fn describe(&self) -> String {
        format!("csv:{}", self.dir.display())
    }

    fn batch_names(&self) -> Result<Vec<String>, BatchFetchError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "csv") {
                if let Some(stem) = path.file_stem() {
                    names.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn fetch_batch(&self, name: &str) -> Result<Vec<RawRecord>, BatchFetchError> {
        let path = self.dir.join(format!("{}.csv", name));
        if !path.is_file() {
            return Err(BatchFetchError::UnknownBatch(name.to_string()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true) // Handle varying column counts
            .from_path(&path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

        let mut records = Vec::new();
        for result in reader.records() {
            let record = match result {
                Ok(r) => r,
                Err(e) => {
                    warn!("Skipping malformed row in '{}': {}", path.display(), e);
                    continue;
                }
            };
            let mut raw = RawRecord::new();
            for (i, cell) in record.iter().enumerate() {
                match headers.get(i) {
                    Some(header) if !header.is_empty() => {
                        raw.insert(header.clone(), Value::String(cell.to_string()));
                    }
                    _ => {}
                }
            }
            records.push(raw);
        }
        Ok(records)
    }
}
