// src/aggregate.rs
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::filter::FilteredView;

/// Derived views for charting: a date-by-employee grid of summed counts and
/// per-employee totals. Both maps are ordered for reproducible output.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AggregateResult {
    pub daily_pivot: BTreeMap<NaiveDate, BTreeMap<String, i64>>,
    pub employee_totals: BTreeMap<String, i64>,
}

/// Groups the filtered view by (date, name) and by name, summing counts.
/// A missing count contributes 0, never drops the row. The date axis is the
/// set of dates present in the view; every employee present anywhere in the
/// view gets a cell (zero where absent) on every date.
pub fn aggregate(view: &FilteredView) -> AggregateResult {
    let mut daily_pivot: BTreeMap<NaiveDate, BTreeMap<String, i64>> = BTreeMap::new();
    let mut employee_totals: BTreeMap<String, i64> = BTreeMap::new();
    let mut employees: BTreeSet<String> = BTreeSet::new();

    for row in &view.rows {
        // Filtering already excludes null-date rows from any non-empty view.
        let Some(date) = row.date else { continue };
        let count = row.total_submissions.unwrap_or(0);
        employees.insert(row.name.clone());
        *employee_totals.entry(row.name.clone()).or_insert(0) += count;
        *daily_pivot
            .entry(date)
            .or_default()
            .entry(row.name.clone())
            .or_insert(0) += count;
    }

    for cells in daily_pivot.values_mut() {
        for name in &employees {
            cells.entry(name.clone()).or_insert(0);
        }
    }

    AggregateResult {
        daily_pivot,
        employee_totals,
    }
}
