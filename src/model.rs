use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::warn;

/// Canonical ledger columns. Uploads may carry extra columns; those are
/// preserved as-is by the store and ignored by the engine.
pub const COL_PROTOCOL_ID: &str = "protocol_id";
pub const COL_COMPLETED_BY: &str = "completed_by";
pub const COL_STATUS: &str = "status";
pub const COL_HANDLING_TIME: &str = "handling_time";
pub const COL_STARTED_AT: &str = "task_started_at";
pub const COL_TASK_TYPE: &str = "task_type";

pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// An untyped tabular sheet, as read from or written to a ledger file.
/// Every cell is text; typed values exist only inside the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    /// An empty sheet with the canonical column schema.
    pub fn empty() -> Sheet {
        Sheet {
            columns: vec![
                COL_PROTOCOL_ID.to_string(),
                COL_COMPLETED_BY.to_string(),
                COL_STATUS.to_string(),
                COL_HANDLING_TIME.to_string(),
                COL_STARTED_AT.to_string(),
            ],
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn cell<'a>(&self, row: &'a [String], column: Option<usize>) -> &'a str {
        column
            .and_then(|i| row.get(i))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    /// Column-union merge: `incoming` rows are appended after `existing`
    /// rows, unknown columns are kept, missing cells stay empty. No
    /// deduplication, no reordering.
    pub fn union(existing: &Sheet, incoming: &Sheet) -> Sheet {
        let mut columns = existing.columns.clone();
        for column in &incoming.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }

        let width = columns.len();
        let mut rows: Vec<Vec<String>> =
            Vec::with_capacity(existing.rows.len() + incoming.rows.len());
        for row in &existing.rows {
            let mut padded = row.clone();
            padded.resize(width, String::new());
            rows.push(padded);
        }

        // map incoming cells onto union positions by column name
        let positions: Vec<usize> = incoming
            .columns
            .iter()
            .map(|c| columns.iter().position(|u| u == c).unwrap_or(width))
            .collect();
        for row in &incoming.rows {
            let mut mapped = vec![String::new(); width];
            for (cell, &target) in row.iter().zip(&positions) {
                if target < width {
                    mapped[target] = cell.clone();
                }
            }
            rows.push(mapped);
        }

        Sheet { columns, rows }
    }
}

/// The status of a task record. Only `Finished` and `Cancelled` count as
/// concluded and enter the time and productivity aggregates; any other
/// value stays in the ledger but is excluded from those.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Finished,
    Cancelled,
    Other(String),
}

impl TaskStatus {
    pub fn from_text(text: &str) -> TaskStatus {
        match text.trim() {
            "Finished" => TaskStatus::Finished,
            "Cancelled" => TaskStatus::Cancelled,
            other => TaskStatus::Other(other.to_string()),
        }
    }

    pub fn is_concluded(&self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Cancelled)
    }
}

/// A single normalized task record. Fields that failed to parse carry no
/// value; they are excluded from sums and date grouping, but the record
/// itself stays visible to every aggregate that does not need them.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub protocol_id: String,
    pub completed_by: String,
    pub status: TaskStatus,
    pub handling_time: Option<Duration>,
    pub started_at: Option<NaiveDateTime>,
    pub task_type: Option<String>,
}

impl TaskRecord {
    pub fn started_date(&self) -> Option<NaiveDate> {
        self.started_at.map(|t| t.date())
    }
}

/// A normalized ledger: the typed view of a sheet, alive only for the
/// duration of a computation. Never persisted.
#[derive(Debug, Clone)]
pub struct Ledger {
    pub records: Vec<TaskRecord>,
    /// Whether the underlying sheet carried a task_type column at all.
    /// When it did not, the task-type breakdown is unavailable rather
    /// than empty.
    pub has_task_type: bool,
}

/// Normalize a raw sheet into typed records. Malformed duration or
/// timestamp cells become no-value fields; a bad cell never fails the
/// batch.
pub fn normalize(sheet: &Sheet) -> Ledger {
    let protocol_id = sheet.column_index(COL_PROTOCOL_ID);
    let completed_by = sheet.column_index(COL_COMPLETED_BY);
    let status = sheet.column_index(COL_STATUS);
    let handling_time = sheet.column_index(COL_HANDLING_TIME);
    let started_at = sheet.column_index(COL_STARTED_AT);
    let task_type = sheet.column_index(COL_TASK_TYPE);

    let mut degraded = 0usize;
    let records = sheet
        .rows
        .iter()
        .map(|row| {
            let duration_text = sheet.cell(row, handling_time);
            let duration = parse_handling_time(duration_text);
            if duration.is_none() && !duration_text.trim().is_empty() {
                degraded += 1;
            }

            let started_text = sheet.cell(row, started_at);
            let started = parse_started_at(started_text);
            if started.is_none() && !started_text.trim().is_empty() {
                degraded += 1;
            }

            TaskRecord {
                protocol_id: sheet.cell(row, protocol_id).to_string(),
                completed_by: sheet.cell(row, completed_by).to_string(),
                status: TaskStatus::from_text(sheet.cell(row, status)),
                handling_time: duration,
                started_at: started,
                task_type: match sheet.cell(row, task_type).trim() {
                    "" => None,
                    t => Some(t.to_string()),
                },
            }
        })
        .collect();

    if degraded > 0 {
        warn!(
            "{} field(s) could not be parsed and were dropped from aggregation",
            degraded
        );
    }

    Ledger {
        records,
        has_task_type: task_type.is_some(),
    }
}

/// Parse a stored handling time. Accepts `HH:MM:SS` (hours unbounded,
/// optional fractional seconds), the `"<n> days HH:MM:SS"` form some
/// exporters write, and humantime notation such as `15m 30s` as a
/// fallback. Anything else is no value.
pub fn parse_handling_time(text: &str) -> Option<Duration> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (days, clock) = match trimmed.find("day") {
        Some(idx) => {
            let days: i64 = trimmed[..idx].trim().parse().ok()?;
            let rest = trimmed[idx + 3..].trim_start_matches('s');
            (days, rest.trim_start_matches(',').trim())
        }
        None => (0, trimmed),
    };

    if days < 0 {
        return None;
    }

    match parse_clock(clock) {
        Some(clock_duration) => Some(Duration::days(days) + clock_duration),
        // the days form requires a clock part; plain text may still be humantime
        None if days == 0 => humantime::parse_duration(trimmed)
            .ok()
            .and_then(|d| Duration::from_std(d).ok()),
        None => None,
    }
}

fn parse_clock(text: &str) -> Option<Duration> {
    let mut parts = text.splitn(3, ':');
    let hours: i64 = parts.next()?.trim().parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if hours < 0 || minutes > 59 || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some(Duration::hours(hours) + Duration::minutes(minutes) + Duration::seconds(seconds as i64))
}

/// Canonical textual form of a handling time, as written back by the
/// store. Re-normalizing this text yields the same duration.
pub fn handling_time_to_text(duration: Duration) -> String {
    let total = duration.num_seconds();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

pub fn parse_started_at(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT).ok()
}

/// Human-readable rendering of an average handling time. A zero duration
/// is the literal `"0 min"`.
pub fn format_tmo(duration: Duration) -> String {
    let total = duration.num_seconds();
    if total == 0 {
        return "0 min".to_string();
    }
    format!("{} min {}s", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clock_durations() {
        assert_eq!(parse_handling_time("00:10:00"), Some(Duration::minutes(10)));
        assert_eq!(parse_handling_time("01:02:03"), Some(Duration::seconds(3723)));
        assert_eq!(
            parse_handling_time("0 days 00:10:00"),
            Some(Duration::minutes(10))
        );
        assert_eq!(
            parse_handling_time("2 days 01:00:00"),
            Some(Duration::hours(49))
        );
    }

    #[test]
    fn parses_humantime_fallback() {
        assert_eq!(parse_handling_time("15m 30s"), Some(Duration::seconds(930)));
    }

    #[test]
    fn bad_durations_are_no_value() {
        assert_eq!(parse_handling_time(""), None);
        assert_eq!(parse_handling_time("n/a"), None);
        assert_eq!(parse_handling_time("00:99:00"), None);
        assert_eq!(parse_handling_time("-1 days 00:10:00"), None);
    }

    #[test]
    fn duration_text_round_trip_is_idempotent() {
        let parsed = parse_handling_time("1 days 02:03:04").unwrap();
        let text = handling_time_to_text(parsed);
        assert_eq!(text, "26:03:04");
        assert_eq!(parse_handling_time(&text), Some(parsed));
    }

    #[test]
    fn parses_timestamps() {
        let parsed = parse_started_at("01/01/2024 09:00:00").unwrap();
        assert_eq!(parsed.date(), NaiveDate::from_ymd(2024, 1, 1));
        assert_eq!(parse_started_at("2024-01-01 09:00"), None);
        assert_eq!(parse_started_at(""), None);
    }

    #[test]
    fn formats_tmo() {
        assert_eq!(format_tmo(Duration::zero()), "0 min");
        assert_eq!(format_tmo(Duration::seconds(125)), "2 min 5s");
        assert_eq!(format_tmo(Duration::seconds(59)), "0 min 59s");
    }

    #[test]
    fn status_parsing() {
        assert_eq!(TaskStatus::from_text("Finished"), TaskStatus::Finished);
        assert_eq!(TaskStatus::from_text(" Cancelled "), TaskStatus::Cancelled);
        assert_eq!(
            TaskStatus::from_text("In Progress"),
            TaskStatus::Other("In Progress".to_string())
        );
        assert!(TaskStatus::Finished.is_concluded());
        assert!(!TaskStatus::Other(String::new()).is_concluded());
    }

    fn sheet_with(columns: &[&str], rows: &[&[&str]]) -> Sheet {
        Sheet {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn union_preserves_order_and_unknown_columns() {
        let existing = sheet_with(
            &["protocol_id", "status"],
            &[&["1", "Finished"], &["2", "Cancelled"]],
        );
        let incoming = sheet_with(
            &["status", "protocol_id", "extra"],
            &[&["Finished", "3", "x"]],
        );

        let merged = Sheet::union(&existing, &incoming);
        assert_eq!(merged.columns, vec!["protocol_id", "status", "extra"]);
        assert_eq!(merged.rows[0], vec!["1", "Finished", ""]);
        assert_eq!(merged.rows[1], vec!["2", "Cancelled", ""]);
        assert_eq!(merged.rows[2], vec!["3", "Finished", "x"]);
    }

    #[test]
    fn normalize_degrades_bad_fields_per_row() {
        let sheet = sheet_with(
            &[
                "protocol_id",
                "completed_by",
                "status",
                "handling_time",
                "task_started_at",
            ],
            &[
                &["1", "ana", "Finished", "00:10:00", "01/01/2024 09:00:00"],
                &["2", "bia", "Finished", "oops", "not a date"],
            ],
        );
        let ledger = normalize(&sheet);
        assert_eq!(ledger.records.len(), 2);
        assert!(ledger.records[0].handling_time.is_some());
        assert!(ledger.records[1].handling_time.is_none());
        assert!(ledger.records[1].started_at.is_none());
        // still a concluded record for counts that do not key on date
        assert!(ledger.records[1].status.is_concluded());
        assert!(!ledger.has_task_type);
    }

    #[test]
    fn normalize_without_task_type_column_marks_unavailable() {
        let sheet = Sheet::empty();
        assert!(!normalize(&sheet).has_task_type);

        let with_type = sheet_with(&["task_type"], &[&["triage"], &[""]]);
        let ledger = normalize(&with_type);
        assert!(ledger.has_task_type);
        assert_eq!(ledger.records[0].task_type.as_deref(), Some("triage"));
        assert_eq!(ledger.records[1].task_type, None);
    }
}
