// src/filter_tests.rs

#[cfg(test)]
mod tests {
    use crate::filter::{apply, FilterError, FilterState};
    use crate::ingest::{month_name, Dataset, SubmissionRow};
    use chrono::{Datelike, NaiveDate};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid test date")
    }

    // Helper to build normalized rows directly, the way ingestion would.
    fn make_row(name: &str, day: Option<&str>, total: Option<i64>) -> SubmissionRow {
        let parsed = day.map(date);
        SubmissionRow {
            name: name.to_string(),
            date: parsed,
            total_submissions: total,
            source_batch: "TestBatch".to_string(),
            year: parsed.map(|d| d.year()),
            month_name: parsed.map(|d| month_name(d.month()).to_string()),
        }
    }

    fn mixed_dataset() -> Dataset {
        Dataset {
            rows: vec![
                make_row("Alice", Some("2024-03-10"), Some(4)),
                make_row("Bob", Some("2024-03-11"), Some(1)),
                make_row("Alice", Some("2024-11-02"), Some(7)),
                make_row("Alice", Some("2025-01-05"), Some(5)),
                make_row("Bob", Some("2025-01-05"), Some(3)),
                make_row("Alice", Some("2025-01-06"), Some(2)),
                make_row("Carol", Some("2025-02-14"), Some(9)),
                make_row("Dave", None, Some(6)),
            ],
        }
    }

    #[test]
    fn defaults_pick_latest_year_first_month_all_employees() {
        let dataset = mixed_dataset();
        let state = FilterState::defaults_for(&dataset);

        assert_eq!(state.selected_year, Some(2025));
        assert_eq!(state.selected_month.as_deref(), Some("January"));
        assert_eq!(state.selected_date, None);
        assert!(
            state.selected_employees.contains("Dave"),
            "names from rows without a parsed date are still selectable"
        );
        assert_eq!(state.selected_employees.len(), 4);
    }

    #[test]
    fn year_options_are_descending_and_months_in_calendar_order() {
        let dataset = mixed_dataset();
        assert_eq!(dataset.available_years(), vec![2025, 2024]);
        assert_eq!(dataset.months_for_year(2024), vec!["March", "November"]);
        assert_eq!(dataset.months_for_year(2025), vec!["January", "February"]);
    }

    #[test]
    fn apply_returns_only_rows_matching_every_clause() {
        let dataset = mixed_dataset();
        let state = FilterState::defaults_for(&dataset);
        let view = apply(&dataset, &state);

        assert_eq!(view.rows.len(), 3, "January 2025 has exactly three rows");
        for row in &view.rows {
            assert_eq!(row.year, Some(2025));
            assert_eq!(row.month_name.as_deref(), Some("January"));
            assert!(state.selected_employees.contains(&row.name));
        }
    }

    #[test]
    fn empty_employee_selection_yields_empty_view() {
        let dataset = mixed_dataset();
        let mut state = FilterState::defaults_for(&dataset);
        state
            .set_employees(&dataset, Vec::new())
            .expect("empty selection is a valid selection");

        let view = apply(&dataset, &state);
        assert!(
            view.is_empty(),
            "an explicitly empty employee selection must match no rows"
        );
    }

    #[test]
    fn date_outside_selected_month_yields_empty_view() {
        let dataset = mixed_dataset();
        let mut state = FilterState::defaults_for(&dataset);
        state.set_date(Some(date("2025-02-14")));

        let view = apply(&dataset, &state);
        assert!(
            view.is_empty(),
            "the date clause is not special-cased against year/month"
        );
    }

    #[test]
    fn changing_year_clears_exact_date_and_revalidates_month() {
        let dataset = mixed_dataset();
        let mut state = FilterState::defaults_for(&dataset);
        state.set_date(Some(date("2025-01-05")));

        state.set_year(&dataset, 2024).expect("2024 is present");

        assert_eq!(state.selected_year, Some(2024));
        assert_eq!(
            state.selected_month.as_deref(),
            Some("March"),
            "January is not available in 2024, the first 2024 month is chosen"
        );
        assert_eq!(state.selected_date, None, "year change clears the date");
    }

    #[test]
    fn setting_same_year_preserves_exact_date() {
        let dataset = mixed_dataset();
        let mut state = FilterState::defaults_for(&dataset);
        state.set_date(Some(date("2025-01-05")));

        state.set_year(&dataset, 2025).expect("2025 is present");
        assert_eq!(state.selected_date, Some(date("2025-01-05")));
    }

    #[test]
    fn changing_month_clears_exact_date() {
        let dataset = mixed_dataset();
        let mut state = FilterState::defaults_for(&dataset);
        state.set_date(Some(date("2025-01-05")));

        state
            .set_month(&dataset, "February")
            .expect("February is present in 2025");
        assert_eq!(state.selected_month.as_deref(), Some("February"));
        assert_eq!(state.selected_date, None, "month change clears the date");
    }

    #[test]
    fn setting_same_month_preserves_exact_date() {
        let dataset = mixed_dataset();
        let mut state = FilterState::defaults_for(&dataset);
        state.set_date(Some(date("2025-01-05")));

        state.set_month(&dataset, "January").expect("unchanged month");
        assert_eq!(state.selected_date, Some(date("2025-01-05")));
    }

    #[test]
    fn unknown_selections_are_rejected() {
        let dataset = mixed_dataset();
        let mut state = FilterState::defaults_for(&dataset);

        assert_eq!(
            state.set_year(&dataset, 1999),
            Err(FilterError::UnknownYear(1999))
        );
        assert_eq!(
            state.set_month(&dataset, "December"),
            Err(FilterError::UnknownMonth {
                month: "December".to_string(),
                year: 2025,
            })
        );
        assert_eq!(
            state.set_employees(&dataset, vec!["Mallory".to_string()]),
            Err(FilterError::UnknownEmployee("Mallory".to_string()))
        );
        // Rejected transitions leave the state untouched.
        assert_eq!(state, FilterState::defaults_for(&dataset));
    }

    #[test]
    fn rows_with_unparseable_dates_never_match() {
        let dataset = mixed_dataset();
        for year in dataset.available_years() {
            for month in dataset.months_for_year(year) {
                let mut state = FilterState::defaults_for(&dataset);
                state.set_year(&dataset, year).expect("known year");
                state.set_month(&dataset, &month).expect("known month");
                let view = apply(&dataset, &state);
                assert!(
                    view.rows.iter().all(|r| r.name != "Dave"),
                    "a null-date row appeared in the view for {} {}",
                    month,
                    year
                );
            }
        }
    }

    #[test]
    fn clear_filters_resets_date_only() {
        let dataset = mixed_dataset();
        let mut state = FilterState::defaults_for(&dataset);
        state
            .set_employees(&dataset, vec!["Alice".to_string()])
            .expect("Alice is present");
        state.set_date(Some(date("2025-01-06")));

        state.clear_filters();

        assert_eq!(state.selected_date, None);
        assert_eq!(state.selected_year, Some(2025));
        assert_eq!(state.selected_month.as_deref(), Some("January"));
        assert_eq!(state.selected_employees.len(), 1);
    }

    #[test]
    fn revalidate_keeps_valid_selections_and_date() {
        let dataset = mixed_dataset();
        let mut state = FilterState::defaults_for(&dataset);
        state.set_date(Some(date("2025-01-06")));

        state.revalidate(&dataset, false);

        assert_eq!(state.selected_year, Some(2025));
        assert_eq!(state.selected_month.as_deref(), Some("January"));
        assert_eq!(
            state.selected_date,
            Some(date("2025-01-06")),
            "a refresh that changes nothing must not clear the date"
        );
    }

    #[test]
    fn revalidate_falls_back_when_year_disappears() {
        let old = mixed_dataset();
        let mut state = FilterState::defaults_for(&old);
        state.set_year(&old, 2024).expect("2024 is present");
        state.set_date(Some(date("2024-03-10")));

        let refreshed = Dataset {
            rows: vec![
                make_row("Alice", Some("2025-01-05"), Some(5)),
                make_row("Bob", Some("2025-01-05"), Some(3)),
            ],
        };
        state.revalidate(&refreshed, false);

        assert_eq!(state.selected_year, Some(2025));
        assert_eq!(state.selected_month.as_deref(), Some("January"));
        assert_eq!(state.selected_date, None, "forced year change clears the date");
    }

    #[test]
    fn revalidate_follows_full_employee_set_when_all_were_selected() {
        let old = mixed_dataset();
        let mut state = FilterState::defaults_for(&old);

        let mut refreshed = mixed_dataset();
        refreshed.rows.push(make_row("Erin", Some("2025-01-07"), Some(1)));
        state.revalidate(&refreshed, true);

        assert!(
            state.selected_employees.contains("Erin"),
            "an all-employees selection tracks newly appearing names"
        );
    }

    #[test]
    fn revalidate_intersects_partial_employee_selection() {
        let old = mixed_dataset();
        let mut state = FilterState::defaults_for(&old);
        state
            .set_employees(&old, vec!["Alice".to_string(), "Bob".to_string()])
            .expect("both present");

        let refreshed = Dataset {
            rows: vec![make_row("Alice", Some("2025-01-05"), Some(5))],
        };
        state.revalidate(&refreshed, false);

        assert!(state.selected_employees.contains("Alice"));
        assert!(
            !state.selected_employees.contains("Bob"),
            "names gone from the dataset drop out of a partial selection"
        );
    }

    #[test]
    fn revalidate_empties_selection_for_empty_dataset() {
        let old = mixed_dataset();
        let mut state = FilterState::defaults_for(&old);
        state.set_date(Some(date("2025-01-05")));

        state.revalidate(&Dataset::default(), true);

        assert_eq!(state.selected_year, None);
        assert_eq!(state.selected_month, None);
        assert!(state.selected_employees.is_empty());
        assert_eq!(state.selected_date, None);

        let view = apply(&Dataset::default(), &state);
        assert!(view.is_empty(), "an empty dataset filters to an empty view");
    }

    #[test]
    fn mutations_on_empty_dataset_report_no_data() {
        let dataset = Dataset::default();
        let mut state = FilterState::defaults_for(&dataset);

        assert_eq!(state.set_year(&dataset, 2025), Err(FilterError::NoData));
        assert_eq!(
            state.set_month(&dataset, "January"),
            Err(FilterError::NoData)
        );
    }
}
