//! The aggregation engine: pure functions from a normalized ledger (or a
//! date-filtered slice of one) to the derived tables behind every view.
//! No I/O, no hidden state.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{Serialize, Serializer};

use crate::model::{format_tmo, Ledger, TaskRecord, TaskStatus};

fn duration_as_seconds<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(d.num_seconds())
}

/// Average handling time for one calendar day.
#[derive(Debug, Clone, Serialize)]
pub struct DailyTmo {
    pub day: NaiveDate,
    #[serde(serialize_with = "duration_as_seconds")]
    pub average: Duration,
    pub formatted: String,
}

/// Finished/cancelled counts for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyProductivity {
    pub day: NaiveDate,
    pub finished: u64,
    pub cancelled: u64,
    pub total: u64,
}

/// Average handling time for one analyst.
#[derive(Debug, Clone, Serialize)]
pub struct AnalystTmo {
    pub analyst: String,
    #[serde(serialize_with = "duration_as_seconds")]
    pub average: Duration,
    pub formatted: String,
}

/// One row of the descending-by-total analyst ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub position: usize,
    pub analyst: String,
    pub finished: u64,
    pub cancelled: u64,
    pub total: u64,
}

/// Headline numbers for a slice of the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub finished: u64,
    pub cancelled: u64,
    pub total: u64,
    #[serde(serialize_with = "duration_as_seconds")]
    pub average: Duration,
    pub formatted: String,
}

/// Task-type count for one analyst.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeCount {
    pub task_type: String,
    pub count: u64,
}

/// Inclusive date filter on the calendar date of `task_started_at`.
/// Records with a no-value timestamp cannot be tested against the range
/// and are excluded.
pub fn filter_by_date(records: &[TaskRecord], start: NaiveDate, end: NaiveDate) -> Vec<TaskRecord> {
    records
        .iter()
        .filter(|r| match r.started_date() {
            Some(day) => day >= start && day <= end,
            None => false,
        })
        .cloned()
        .collect()
}

// Sum of parsed durations and count of concluded rows. The count
// includes concluded rows whose duration failed to parse; that is the
// historical denominator and views depend on it.
fn tmo_of_group(group: &[&TaskRecord]) -> Option<Duration> {
    let count = group.len() as i32;
    if count == 0 {
        return None;
    }
    let sum = group
        .iter()
        .filter_map(|r| r.handling_time)
        .fold(Duration::zero(), |acc, d| acc + d);
    Some(sum / count)
}

/// Daily average handling time over concluded rows, grouped by the
/// calendar date of `task_started_at`. Days with no concluded rows are
/// absent, not zero.
pub fn daily_average_handling_time(records: &[TaskRecord]) -> Vec<DailyTmo> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&TaskRecord>> = BTreeMap::new();
    for record in records {
        if !record.status.is_concluded() {
            continue;
        }
        if let Some(day) = record.started_date() {
            by_day.entry(day).or_default().push(record);
        }
    }

    by_day
        .into_iter()
        .filter_map(|(day, group)| {
            tmo_of_group(&group).map(|average| DailyTmo {
                day,
                average,
                formatted: format_tmo(average),
            })
        })
        .collect()
}

/// Charting variant of [`daily_average_handling_time`]: every date in the
/// inclusive range gets a point, zero-filled where no average is defined,
/// so a plotted line has no gaps.
pub fn daily_average_handling_time_chart(
    records: &[TaskRecord],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<DailyTmo> {
    let defined: BTreeMap<NaiveDate, Duration> = daily_average_handling_time(records)
        .into_iter()
        .map(|t| (t.day, t.average))
        .collect();

    let mut out = Vec::new();
    let mut day = start;
    while day <= end {
        let average = defined.get(&day).copied().unwrap_or_else(Duration::zero);
        out.push(DailyTmo {
            day,
            average,
            formatted: format_tmo(average),
        });
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    out
}

/// Finished/cancelled counts per calendar day. Rows with other statuses
/// are not counted, but a day that has only such rows still shows up
/// with zeros.
pub fn daily_productivity(records: &[TaskRecord]) -> Vec<DailyProductivity> {
    let mut by_day: BTreeMap<NaiveDate, (u64, u64)> = BTreeMap::new();
    for record in records {
        if let Some(day) = record.started_date() {
            let counts = by_day.entry(day).or_insert((0, 0));
            match record.status {
                TaskStatus::Finished => counts.0 += 1,
                TaskStatus::Cancelled => counts.1 += 1,
                TaskStatus::Other(_) => {}
            }
        }
    }

    by_day
        .into_iter()
        .map(|(day, (finished, cancelled))| DailyProductivity {
            day,
            finished,
            cancelled,
            total: finished + cancelled,
        })
        .collect()
}

// Group records by analyst, keeping first-appearance order.
fn group_by_analyst<'a>(records: impl Iterator<Item = &'a TaskRecord>) -> Vec<(String, Vec<&'a TaskRecord>)> {
    let mut groups: Vec<(String, Vec<&TaskRecord>)> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|(name, _)| *name == record.completed_by) {
            Some((_, group)) => group.push(record),
            None => groups.push((record.completed_by.clone(), vec![record])),
        }
    }
    groups
}

/// Average handling time per analyst, over concluded rows only.
/// Analysts with no concluded rows are simply absent.
pub fn analyst_average_handling_time(records: &[TaskRecord]) -> Vec<AnalystTmo> {
    group_by_analyst(records.iter().filter(|r| r.status.is_concluded()))
        .into_iter()
        .filter_map(|(analyst, group)| {
            tmo_of_group(&group).map(|average| AnalystTmo {
                analyst,
                average,
                formatted: format_tmo(average),
            })
        })
        .collect()
}

/// Analyst ranking over all rows: finished/cancelled counts, descending
/// by total. The sort is stable, so equal totals keep first-appearance
/// order; positions are contiguous from 1.
pub fn ranking(records: &[TaskRecord]) -> Vec<RankingEntry> {
    let mut entries: Vec<RankingEntry> = group_by_analyst(records.iter())
        .into_iter()
        .map(|(analyst, group)| {
            let finished = group
                .iter()
                .filter(|r| r.status == TaskStatus::Finished)
                .count() as u64;
            let cancelled = group
                .iter()
                .filter(|r| r.status == TaskStatus::Cancelled)
                .count() as u64;
            RankingEntry {
                position: 0,
                analyst,
                finished,
                cancelled,
                total: finished + cancelled,
            }
        })
        .collect();

    entries.sort_by(|a, b| b.total.cmp(&a.total));
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.position = index + 1;
    }
    entries
}

/// Headline aggregate over a slice: concluded counts and the combined
/// average handling time. With nothing concluded the average is a zero
/// duration, a division guard rather than a data signal.
pub fn summary(records: &[TaskRecord]) -> Summary {
    let finished = records
        .iter()
        .filter(|r| r.status == TaskStatus::Finished)
        .count() as u64;
    let cancelled = records
        .iter()
        .filter(|r| r.status == TaskStatus::Cancelled)
        .count() as u64;
    let total = finished + cancelled;

    let average = if total == 0 {
        Duration::zero()
    } else {
        let sum = records
            .iter()
            .filter(|r| r.status.is_concluded())
            .filter_map(|r| r.handling_time)
            .fold(Duration::zero(), |acc, d| acc + d);
        sum / total as i32
    };

    Summary {
        finished,
        cancelled,
        total,
        average,
        formatted: format_tmo(average),
    }
}

/// Task-type counts for one analyst, descending by count. `None` when the
/// ledger has no task_type column at all; the view reports the feature as
/// unavailable instead of showing an empty table.
pub fn task_type_breakdown(ledger: &Ledger, analyst: &str) -> Option<Vec<TypeCount>> {
    if !ledger.has_task_type {
        return None;
    }

    let mut counts: Vec<TypeCount> = Vec::new();
    for record in ledger.records.iter().filter(|r| r.completed_by == analyst) {
        if let Some(task_type) = &record.task_type {
            match counts.iter_mut().find(|c| c.task_type == *task_type) {
                Some(entry) => entry.count += 1,
                None => counts.push(TypeCount {
                    task_type: task_type.clone(),
                    count: 1,
                }),
            }
        }
    }

    counts.sort_by(|a, b| b.count.cmp(&a.count));
    Some(counts)
}
