// src/sheets.rs

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::ingest::{BatchFetchError, BatchSource, RawRecord};

// Constants
pub const SHEETS_API_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
pub const DEFAULT_CACHE_DIR: &str = "./sheets_cache";
pub const DEFAULT_CACHE_DURATION_SECS: u64 = 10 * 60; // 10 minutes
const HTTP_TIMEOUT_SECS: u64 = 30;

// Error type for the Sheets API client
#[derive(Error, Debug)]
pub enum SheetsError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Sheets API error: Status={status}, Message={message}")]
    ApiError { status: StatusCode, message: String },

    #[error("System time error: {0}")]
    TimeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// Configuration for the Sheets client
#[derive(Clone, Debug)]
pub struct SheetsConfig {
    pub api_key: String,
    pub spreadsheet_id: String,
    pub worksheets: Vec<String>,
    pub cache_dir: PathBuf,
    pub cache_duration_secs: u64,
}

// Cache metadata stored alongside fetched worksheet data
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMetadata {
    last_updated_unix_secs: u64,
    worksheet: String,
}

impl CacheMetadata {
    fn new(worksheet: String) -> Result<Self, SheetsError> {
        Ok(Self {
            last_updated_unix_secs: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| SheetsError::TimeError(e.to_string()))?
                .as_secs(),
            worksheet,
        })
    }

    fn is_stale(&self, max_age_secs: u64) -> Result<bool, SheetsError> {
        let now_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| SheetsError::TimeError(e.to_string()))?
            .as_secs();
        let cache_age = now_unix.saturating_sub(self.last_updated_unix_secs);
        Ok(cache_age > max_age_secs)
    }
}

// Cache container for one fetched worksheet
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedData {
    metadata: CacheMetadata,
    data: ValueRange,
}

/// Response body of the values endpoint: a grid of cells, first row header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    pub range: Option<String>,
    pub major_dimension: Option<String>,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

// Sheets API Client Implementation
pub struct SheetsClient {
    config: SheetsConfig,
    http_client: Client,
}

impl SheetsClient {
    pub fn new(config: SheetsConfig) -> Result<Self, SheetsError> {
        fs::create_dir_all(&config.cache_dir)?;
        let http_client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &SheetsConfig {
        &self.config
    }

    fn cache_path(&self, worksheet: &str) -> PathBuf {
        // Worksheet names are caller-supplied; keep the file name safe.
        let safe: String = worksheet
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        self.config
            .cache_dir
            .join(format!("{}_{}.json", self.config.spreadsheet_id, safe))
    }

    fn read_cache(&self, worksheet: &str) -> Option<ValueRange> {
        let path = self.cache_path(worksheet);
        let content = fs::read_to_string(&path).ok()?;
        let cached: CachedData = match serde_json::from_str(&content) {
            Ok(c) => c,
            Err(e) => {
                warn!("Discarding unreadable cache file {}: {}", path.display(), e);
                return None;
            }
        };
        match cached.metadata.is_stale(self.config.cache_duration_secs) {
            Ok(false) => {
                debug!("Cache hit for worksheet '{}'", worksheet);
                Some(cached.data)
            }
            Ok(true) => {
                debug!("Cache for worksheet '{}' is stale", worksheet);
                None
            }
            Err(e) => {
                warn!("Cache staleness check failed for '{}': {}", worksheet, e);
                None
            }
        }
    }

    // Best effort: a cache write failure only costs the next fetch.
    fn write_cache(&self, worksheet: &str, data: &ValueRange) {
        let cached = match CacheMetadata::new(worksheet.to_string()) {
            Ok(metadata) => CachedData {
                metadata,
                data: data.clone(),
            },
            Err(e) => {
                warn!("Skipping cache write for '{}': {}", worksheet, e);
                return;
            }
        };
        let path = self.cache_path(worksheet);
        match serde_json::to_string(&cached) {
            Ok(json) => {
                if let Err(e) = fs::write(&path, json) {
                    warn!("Failed to write cache file {}: {}", path.display(), e);
                }
            }
            Err(e) => warn!("Failed to serialize cache for '{}': {}", worksheet, e),
        }
    }

    fn values_url(&self, worksheet: &str) -> Result<Url, SheetsError> {
        let mut url = Url::parse(SHEETS_API_BASE_URL)?;
        url.path_segments_mut()
            .map_err(|_| SheetsError::ConfigError("Sheets base URL cannot be a base".to_string()))?
            .push(&self.config.spreadsheet_id)
            .push("values")
            .push(worksheet);
        url.query_pairs_mut().append_pair("key", &self.config.api_key);
        Ok(url)
    }

    /// Fetches one worksheet's cell grid, consulting the file cache first.
    pub async fn get_worksheet_values(&self, worksheet: &str) -> Result<ValueRange, SheetsError> {
        if let Some(hit) = self.read_cache(worksheet) {
            return Ok(hit);
        }

        let url = self.values_url(worksheet)?;
        info!(
            "Fetching worksheet '{}' of spreadsheet {}...",
            worksheet, self.config.spreadsheet_id
        );
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<no response body>".to_string());
            return Err(SheetsError::ApiError { status, message });
        }

        let range: ValueRange = response.json().await?;
        debug!(
            "Worksheet '{}' returned {} rows",
            worksheet,
            range.values.len()
        );
        self.write_cache(worksheet, &range);
        Ok(range)
    }
}

/// Turns a cell grid into records: the first row is the header, every later
/// row maps header cell to value. Short rows simply leave columns absent.
pub fn values_to_records(range: &ValueRange) -> Vec<RawRecord> {
    let mut rows = range.values.iter();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row.iter().map(cell_to_header).collect(),
        None => return Vec::new(),
    };

    let mut records = Vec::new();
    for row in rows {
        let mut record = RawRecord::new();
        for (i, cell) in row.iter().enumerate() {
            match headers.get(i) {
                Some(header) if !header.is_empty() => {
                    record.insert(header.clone(), cell.clone());
                }
                _ => {}
            }
        }
        records.push(record);
    }
    records
}

fn cell_to_header(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Spreadsheet ingestion: one batch per configured worksheet tab.
pub struct SheetsBatchSource {
    client: SheetsClient,
}

impl SheetsBatchSource {
    pub fn new(client: SheetsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BatchSource for SheetsBatchSource {
    fn describe(&self) -> String {
        format!("sheets:{}", self.client.config().spreadsheet_id)
    }

    fn batch_names(&self) -> Result<Vec<String>, BatchFetchError> {
        Ok(self.client.config().worksheets.clone())
    }

    async fn fetch_batch(&self, name: &str) -> Result<Vec<RawRecord>, BatchFetchError> {
        if !self.client.config().worksheets.iter().any(|w| w == name) {
            return Err(BatchFetchError::UnknownBatch(name.to_string()));
        }
        let range = self.client.get_worksheet_values(name).await?;
        Ok(values_to_records(&range))
    }
}
