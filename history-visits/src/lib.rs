//! Rebuilds admission-anchored visits from a patient's flat event history.

mod time;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use history_core::{Category, HistoryError, PatientHistory, Record, Visit, VisitConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use time::{admission_time, event_time, millis_to_datetime, parse_timestamp, resolve_time};

/// Key of the synthetic visit used when a patient has no admission.
pub const NO_ADMISSION_KEY: &str = "no-admission";

/// Group visits from a JSON payload string.
pub fn group_visits_str(
    payload_json: &str,
    config: &VisitConfig,
) -> Result<Vec<Visit>, HistoryError> {
    let value: Value =
        serde_json::from_str(payload_json).map_err(|err| HistoryError::Parse(err.to_string()))?;
    group_visits_value(&value, config)
}

/// Group visits from a `serde_json::Value` payload.
pub fn group_visits_value(
    payload: &Value,
    config: &VisitConfig,
) -> Result<Vec<Visit>, HistoryError> {
    config.validate()?;
    let history = history_from_value(payload)?;
    Ok(group_visits(&history, config))
}

/// Read a `PatientHistory` out of a JSON payload.
///
/// Only a non-object root is rejected; malformed category fields read as empty.
pub fn history_from_value(payload: &Value) -> Result<PatientHistory, HistoryError> {
    if !payload.is_object() {
        return Err(HistoryError::MissingData);
    }
    PatientHistory::deserialize(payload).map_err(|err| HistoryError::Parse(err.to_string()))
}

/// Partition every record of `history` into visits, oldest first.
///
/// Every record lands in exactly one visit. Events outside all admission
/// windows (including those with no resolvable time) go to the earliest visit.
pub fn group_visits(history: &PatientHistory, config: &VisitConfig) -> Vec<Visit> {
    let span = tracing::debug_span!("group_visits", unified_number = %history.unified_number);
    let _enter = span.enter();

    if history.admissions.is_empty() {
        tracing::debug!(
            records = history.total_records(),
            "No admission recorded, collapsing history into one visit"
        );
        return vec![collapse_without_admission(history)];
    }

    let windows = build_windows(&history.admissions, config);
    let mut visits: Vec<Visit> = windows.iter().map(AdmissionWindow::to_visit).collect();

    for category in Category::EVENTS {
        for record in history.records(category) {
            let index = assign_window(&windows, event_time(record, config));
            visits[index].records_mut(category).push(record.clone());
        }
    }

    tracing::debug!(
        admissions = windows.len(),
        records = history.total_records(),
        "Visits rebuilt"
    );

    visits
}

fn collapse_without_admission(history: &PatientHistory) -> Visit {
    let mut visit = Visit::empty(NO_ADMISSION_KEY);
    for category in Category::EVENTS {
        visit
            .records_mut(category)
            .extend_from_slice(history.records(category));
    }
    visit
}

/// Half-open interval `[start, end)` owned by one admission.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionWindow<'a> {
    pub index: usize,
    pub start: i64,
    /// `None` for the most recent admission (open-ended).
    pub end: Option<i64>,
    pub admission: &'a Record,
}

impl AdmissionWindow<'_> {
    pub fn contains(&self, time: i64) -> bool {
        self.start <= time && self.end.map_or(true, |end| time < end)
    }

    /// `visit-<index>-<admission id>`, or the start millis when the id is missing.
    pub fn key(&self) -> String {
        let suffix = self
            .admission
            .id()
            .unwrap_or_else(|| self.start.to_string());
        format!("visit-{}-{suffix}", self.index)
    }

    fn to_visit(&self) -> Visit {
        Visit::anchored(
            self.key(),
            millis_to_datetime(self.start),
            self.admission.clone(),
        )
    }
}

/// Sort admissions by resolved start and cut the timeline between them.
///
/// The sort is stable, so admissions sharing a start keep payload order.
pub fn build_windows<'a>(
    admissions: &'a [Record],
    config: &VisitConfig,
) -> Vec<AdmissionWindow<'a>> {
    let mut starts: Vec<(i64, &Record)> = admissions
        .iter()
        .map(|admission| (admission_time(admission, config), admission))
        .collect();
    starts.sort_by_key(|(start, _)| *start);

    starts
        .iter()
        .enumerate()
        .map(|(index, &(start, admission))| AdmissionWindow {
            index,
            start,
            end: starts.get(index + 1).map(|(next, _)| *next),
            admission,
        })
        .collect()
}

/// Index of the latest window containing `time`, else `0`.
///
/// `windows` must be non-empty.
pub fn assign_window(windows: &[AdmissionWindow<'_>], time: i64) -> usize {
    windows
        .iter()
        .rposition(|window| window.contains(time))
        .unwrap_or_else(|| {
            tracing::trace!(time, "Event outside every window, placed in earliest visit");
            0
        })
}

/// One flattened line of a visit, for tabular export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisitRow {
    pub visit_key: String,
    pub visit_start: Option<DateTime<Utc>>,
    pub category: Category,
    pub record_id: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Flatten visits into rows: admission first, then each event category in
/// assignment order, keeping bucket order.
pub fn export_rows(visits: &[Visit], config: &VisitConfig) -> Vec<VisitRow> {
    let mut rows = Vec::new();

    for visit in visits {
        let mut push_row = |category: Category, record: &Record, millis: i64| {
            rows.push(VisitRow {
                visit_key: visit.key.clone(),
                visit_start: visit.start_at,
                category,
                record_id: record.id(),
                occurred_at: millis_to_datetime(millis),
            });
        };

        for admission in &visit.admissions {
            push_row(Category::Admission, admission, admission_time(admission, config));
        }
        for category in Category::EVENTS {
            for record in visit.records(category) {
                push_row(category, record, event_time(record, config));
            }
        }
    }

    rows
}

/// A discharge whose `admission_id` points at an admission anchoring a
/// different visit than the one it was grouped into by time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkageMismatch {
    pub discharge_id: Option<String>,
    pub admission_id: String,
    pub grouped_visit: String,
    pub linked_visit: String,
}

/// Report discharges whose foreign key disagrees with their time-based visit.
///
/// Discharges without `admission_id`, or linked to an admission absent from
/// the visits, are not reported.
pub fn linkage_mismatches(visits: &[Visit]) -> Vec<LinkageMismatch> {
    let anchors: HashMap<String, &str> = visits
        .iter()
        .filter_map(|visit| Some((visit.admission.as_ref()?.id()?, visit.key.as_str())))
        .collect();

    let mut mismatches = Vec::new();
    for visit in visits {
        for discharge in &visit.discharges {
            let Some(admission_id) = discharge.admission_id() else {
                continue;
            };
            let Some(linked_visit) = anchors.get(&admission_id) else {
                continue;
            };
            if *linked_visit == visit.key {
                continue;
            }

            let mismatch = LinkageMismatch {
                discharge_id: discharge.id(),
                admission_id,
                grouped_visit: visit.key.clone(),
                linked_visit: linked_visit.to_string(),
            };
            tracing::warn!(
                discharge_id = ?mismatch.discharge_id,
                admission_id = %mismatch.admission_id,
                grouped_visit = %mismatch.grouped_visit,
                linked_visit = %mismatch.linked_visit,
                "Discharge grouped away from its linked admission"
            );
            mismatches.push(mismatch);
        }
    }

    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn admissions(value: Value) -> Vec<Record> {
        serde_json::from_value(value).expect("admissions fixture")
    }

    #[test]
    fn windows_are_sorted_and_contiguous() {
        let records = admissions(json!([
            { "id": "b", "admission_date": "2024-03-01" },
            { "id": "a", "admission_date": "2024-01-01" },
        ]));
        let windows = build_windows(&records, &VisitConfig::default());

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].admission.id().as_deref(), Some("a"));
        assert_eq!(windows[0].end, Some(windows[1].start));
        assert_eq!(windows[1].end, None);
        assert_eq!(windows[0].key(), "visit-0-a");
    }

    #[test]
    fn equal_starts_keep_payload_order() {
        let records = admissions(json!([{ "id": "first" }, { "id": "second" }]));
        let windows = build_windows(&records, &VisitConfig::default());

        assert_eq!(windows[0].admission.id().as_deref(), Some("first"));
        assert_eq!(windows[1].admission.id().as_deref(), Some("second"));
        // The earlier window is empty, so an unresolved event goes to the later one.
        assert!(!windows[0].contains(0));
        assert_eq!(assign_window(&windows, 0), 1);
    }

    #[test]
    fn key_falls_back_to_start_millis() {
        let records = admissions(json!([{ "admission_date": "2024-01-01" }]));
        let windows = build_windows(&records, &VisitConfig::default());
        assert_eq!(windows[0].key(), "visit-0-1704067200000");
    }

    #[test]
    fn out_of_range_time_uses_earliest_window() {
        let records = admissions(json!([
            { "id": "a", "admission_date": "2024-01-01" },
            { "id": "b", "admission_date": "2024-03-01" },
        ]));
        let windows = build_windows(&records, &VisitConfig::default());
        assert_eq!(assign_window(&windows, 0), 0);
        assert_eq!(assign_window(&windows, windows[1].start), 1);
        assert_eq!(assign_window(&windows, windows[1].start - 1), 0);
    }
}
