// src/dashboard.rs
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::aggregate::{aggregate, AggregateResult};
use crate::filter::{apply, FilterError, FilterState};
use crate::ingest::{ingest, BatchSource, BatchWarning, Dataset, SubmissionRow};

/// The selection values the rendering layer may offer: years most recent
/// first, months of the selected year in calendar order, names ascending.
#[derive(Debug, Clone, Serialize)]
pub struct FilterOptions {
    pub years: Vec<i32>,
    pub months: Vec<String>,
    pub employees: Vec<String>,
}

/// Everything the rendering layer needs for one paint, recomputed in full on
/// every state change. `rows` is the filtered table, date ascending.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub rows: Vec<SubmissionRow>,
    pub aggregates: AggregateResult,
    pub options: FilterOptions,
    pub filters: FilterState,
    pub warnings: Vec<BatchWarning>,
    pub no_data: bool,
    pub last_refreshed: Option<String>,
}

/// Owns the dataset, the filter state and the batch sources. All mutation
/// goes through here; reads are served from a freshly computed snapshot.
pub struct DashboardService {
    sources: Vec<Box<dyn BatchSource>>,
    dataset: Dataset,
    warnings: Vec<BatchWarning>,
    filters: FilterState,
    last_refreshed: Option<DateTime<Local>>,
}

impl DashboardService {
    pub fn new(sources: Vec<Box<dyn BatchSource>>) -> Self {
        Self {
            sources,
            dataset: Dataset::default(),
            warnings: Vec::new(),
            filters: FilterState::default(),
            last_refreshed: None,
        }
    }

    /// Initial ingestion: fetch all batches and pick default selections.
    pub async fn load(&mut self) {
        let report = ingest(&self.sources).await;
        self.dataset = report.dataset;
        self.warnings = report.warnings;
        self.filters = FilterState::defaults_for(&self.dataset);
        self.last_refreshed = Some(Local::now());
        info!(
            "Loaded {} rows ({} batch warnings)",
            self.dataset.rows.len(),
            self.warnings.len()
        );
    }

    /// Re-ingests from all sources. Filters persist across the refresh and
    /// are only adjusted where the refreshed dataset made them invalid.
    pub async fn refresh(&mut self) {
        let was_all = self.selection_is_all();
        let report = ingest(&self.sources).await;
        self.dataset = report.dataset;
        self.warnings = report.warnings;
        self.filters.revalidate(&self.dataset, was_all);
        self.last_refreshed = Some(Local::now());
        info!(
            "Refreshed: {} rows ({} batch warnings)",
            self.dataset.rows.len(),
            self.warnings.len()
        );
    }

    fn selection_is_all(&self) -> bool {
        let all: BTreeSet<String> = self.dataset.employee_names().into_iter().collect();
        self.filters.selected_employees == all
    }

    pub fn set_year(&mut self, year: i32) -> Result<(), FilterError> {
        self.filters.set_year(&self.dataset, year)
    }

    pub fn set_month(&mut self, month: &str) -> Result<(), FilterError> {
        self.filters.set_month(&self.dataset, month)
    }

    pub fn set_employees(&mut self, employees: Vec<String>) -> Result<(), FilterError> {
        self.filters.set_employees(&self.dataset, employees)
    }

    pub fn set_date(&mut self, date: Option<chrono::NaiveDate>) {
        self.filters.set_date(date);
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear_filters();
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Computes the full render payload from the current dataset and state.
    pub fn snapshot(&self) -> DashboardSnapshot {
        let view = apply(&self.dataset, &self.filters);
        if view.is_empty() && !self.dataset.is_empty() {
            debug!("No rows match the current selection");
        }
        let aggregates = aggregate(&view);

        let mut rows = view.rows;
        // Table order: date ascending; rows without a date (only possible in
        // degenerate states) sort last.
        rows.sort_by_key(|r| (r.date.is_none(), r.date));

        let options = FilterOptions {
            years: self.dataset.available_years(),
            months: self
                .filters
                .selected_year
                .map(|y| self.dataset.months_for_year(y))
                .unwrap_or_default(),
            employees: self.dataset.employee_names(),
        };

        DashboardSnapshot {
            rows,
            aggregates,
            options,
            filters: self.filters.clone(),
            warnings: self.warnings.clone(),
            no_data: self.dataset.is_empty(),
            last_refreshed: self.last_refreshed.map(|t| t.to_rfc3339()),
        }
    }
}
