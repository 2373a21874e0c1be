// src/filter.rs
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

use crate::ingest::{Dataset, SubmissionRow};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("year {0} is not present in the dataset")]
    UnknownYear(i32),

    #[error("month '{month}' is not present for year {year}")]
    UnknownMonth { month: String, year: i32 },

    #[error("employee '{0}' is not present in the dataset")]
    UnknownEmployee(String),

    #[error("no data available")]
    NoData,
}

/// The active selections. Mutated only through the transition methods below;
/// every other component treats it as a value.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct FilterState {
    pub selected_year: Option<i32>,
    pub selected_month: Option<String>,
    pub selected_employees: BTreeSet<String>,
    pub selected_date: Option<NaiveDate>,
}

// Transition table for the cascading clear: the exact-date selection survives
// a (year, month) transition iff neither coordinate changed.
fn date_survives(
    prev_year: Option<i32>,
    prev_month: Option<&str>,
    new_year: Option<i32>,
    new_month: Option<&str>,
) -> bool {
    prev_year == new_year && prev_month == new_month
}

impl FilterState {
    /// Initial selection for a freshly ingested dataset: most recent year,
    /// its first month in calendar order, every employee, no exact date.
    pub fn defaults_for(dataset: &Dataset) -> Self {
        let selected_year = dataset.available_years().first().copied();
        let selected_month =
            selected_year.and_then(|y| dataset.months_for_year(y).into_iter().next());
        Self {
            selected_year,
            selected_month,
            selected_employees: dataset.employee_names().into_iter().collect(),
            selected_date: None,
        }
    }

    pub fn set_year(&mut self, dataset: &Dataset, year: i32) -> Result<(), FilterError> {
        let years = dataset.available_years();
        if years.is_empty() {
            return Err(FilterError::NoData);
        }
        if !years.contains(&year) {
            return Err(FilterError::UnknownYear(year));
        }

        let prev_year = self.selected_year;
        let prev_month = self.selected_month.clone();

        self.selected_year = Some(year);
        let months = dataset.months_for_year(year);
        let month_still_valid = self
            .selected_month
            .as_deref()
            .map_or(false, |m| months.iter().any(|x| x == m));
        if !month_still_valid {
            self.selected_month = months.into_iter().next();
        }

        self.apply_auto_clear(prev_year, prev_month.as_deref());
        Ok(())
    }

    pub fn set_month(&mut self, dataset: &Dataset, month: &str) -> Result<(), FilterError> {
        let year = self.selected_year.ok_or(FilterError::NoData)?;
        let months = dataset.months_for_year(year);
        if !months.iter().any(|m| m == month) {
            return Err(FilterError::UnknownMonth {
                month: month.to_string(),
                year,
            });
        }

        let prev_year = self.selected_year;
        let prev_month = self.selected_month.clone();
        self.selected_month = Some(month.to_string());
        self.apply_auto_clear(prev_year, prev_month.as_deref());
        Ok(())
    }

    /// An empty selection is accepted and means "match no rows".
    pub fn set_employees(
        &mut self,
        dataset: &Dataset,
        employees: Vec<String>,
    ) -> Result<(), FilterError> {
        let known = dataset.employee_names();
        for name in &employees {
            if !known.iter().any(|k| k == name) {
                return Err(FilterError::UnknownEmployee(name.clone()));
            }
        }
        self.selected_employees = employees.into_iter().collect();
        Ok(())
    }

    /// Accepted as-is; a date outside the selected year/month simply yields
    /// an empty view.
    pub fn set_date(&mut self, date: Option<NaiveDate>) {
        self.selected_date = date;
    }

    /// The explicit clear action resets the exact date only; year, month and
    /// employee selections are preserved.
    pub fn clear_filters(&mut self) {
        self.selected_date = None;
    }

    /// Re-checks the persisted selections against a refreshed dataset.
    /// Selections stay untouched where still valid; a year or month that
    /// disappeared falls back to the same defaults as initial selection.
    /// `was_all` carries whether the employee selection covered every name
    /// before the refresh, in which case it follows the new full name set.
    pub fn revalidate(&mut self, dataset: &Dataset, was_all: bool) {
        let prev_year = self.selected_year;
        let prev_month = self.selected_month.clone();

        let years = dataset.available_years();
        if years.is_empty() {
            self.selected_year = None;
            self.selected_month = None;
        } else {
            if !self
                .selected_year
                .map_or(false, |y| years.contains(&y))
            {
                self.selected_year = years.first().copied();
            }
            let months = self
                .selected_year
                .map(|y| dataset.months_for_year(y))
                .unwrap_or_default();
            let month_still_valid = self
                .selected_month
                .as_deref()
                .map_or(false, |m| months.iter().any(|x| x == m));
            if !month_still_valid {
                self.selected_month = months.into_iter().next();
            }
        }

        let names: BTreeSet<String> = dataset.employee_names().into_iter().collect();
        if was_all {
            self.selected_employees = names;
        } else {
            self.selected_employees.retain(|n| names.contains(n));
        }

        self.apply_auto_clear(prev_year, prev_month.as_deref());
    }

    fn apply_auto_clear(&mut self, prev_year: Option<i32>, prev_month: Option<&str>) {
        if self.selected_date.is_some()
            && !date_survives(
                prev_year,
                prev_month,
                self.selected_year,
                self.selected_month.as_deref(),
            )
        {
            debug!("Exact-date selection cleared by year/month change");
            self.selected_date = None;
        }
    }
}

/// The subsequence of dataset rows matching the current state, in dataset
/// order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilteredView {
    pub rows: Vec<SubmissionRow>,
}

impl FilteredView {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Pure conjunctive filter: a row is included iff every clause matches.
/// Rows without a parsed date can never match the year/month clauses.
pub fn apply(dataset: &Dataset, state: &FilterState) -> FilteredView {
    let rows = dataset
        .rows
        .iter()
        .filter(|row| row_matches(row, state))
        .cloned()
        .collect();
    FilteredView { rows }
}

fn row_matches(row: &SubmissionRow, state: &FilterState) -> bool {
    let year_ok = match (row.year, state.selected_year) {
        (Some(y), Some(selected)) => y == selected,
        _ => false,
    };
    let month_ok = match (&row.month_name, &state.selected_month) {
        (Some(m), Some(selected)) => m == selected,
        _ => false,
    };
    let employee_ok = state.selected_employees.contains(&row.name);
    let date_ok = match state.selected_date {
        None => true,
        Some(selected) => row.date == Some(selected),
    };
    year_ok && month_ok && employee_ok && date_ok
}
