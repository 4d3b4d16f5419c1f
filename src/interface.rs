use std::io::BufRead;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use log::info;
use prettytable::Table;
use serde::Serialize;

use crate::logbook::{self, Logbook, Timer};
use crate::metrics::{
    self, AnalystTmo, DailyProductivity, DailyTmo, RankingEntry, Summary, TypeCount,
};
use crate::model::{normalize, Ledger, TaskRecord};
use crate::store::{self, LedgerStore};

const DATE_FORMAT: &str = "%d/%m/%Y";
const NOTE_WRAP_WIDTH: usize = 76;

#[derive(Serialize)]
struct OverviewReport {
    start: NaiveDate,
    end: NaiveDate,
    summary: Summary,
    daily_productivity: Vec<DailyProductivity>,
    daily_tmo: Vec<DailyTmo>,
    analyst_tmo: Vec<AnalystTmo>,
    ranking: Vec<RankingEntry>,
}

#[derive(Serialize)]
struct AnalystReport {
    analyst: String,
    start: NaiveDate,
    end: NaiveDate,
    summary: Summary,
    team: Summary,
    task_types: Option<Vec<TypeCount>>,
    daily_tmo: Vec<DailyTmo>,
}

/// Pick the effective date range for a view: explicit bounds win, the
/// ledger's own span fills the gaps, today covers an empty ledger. A
/// start after the end is rejected before anything is computed.
fn resolve_range(
    records: &[TaskRecord],
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<(NaiveDate, NaiveDate)> {
    let today = Local::now().naive_local().date();
    let start = from
        .or_else(|| records.iter().filter_map(|r| r.started_date()).min())
        .unwrap_or(today);
    let end = to
        .or_else(|| records.iter().filter_map(|r| r.started_date()).max())
        .unwrap_or(today);
    if start > end {
        bail!("The start date cannot be after the end date.");
    }
    Ok((start, end))
}

fn load_slice(
    store: &LedgerStore,
    user: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<(Ledger, NaiveDate, NaiveDate)> {
    let sheet = store.load(user)?;
    let ledger = normalize(&sheet);
    let (start, end) = resolve_range(&ledger.records, from, to)?;
    let records = metrics::filter_by_date(&ledger.records, start, end);
    Ok((
        Ledger {
            records,
            has_task_type: ledger.has_task_type,
        },
        start,
        end,
    ))
}

/// The team-wide dashboard: headline numbers, daily productivity, the
/// zero-filled daily TMO series, per-analyst TMO and the ranking.
pub fn overview(
    store: &LedgerStore,
    user: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    json: bool,
) -> Result<()> {
    let (ledger, start, end) = load_slice(store, user, from, to)?;
    let records = &ledger.records;

    let report = OverviewReport {
        start,
        end,
        summary: metrics::summary(records),
        daily_productivity: metrics::daily_productivity(records),
        daily_tmo: metrics::daily_average_handling_time_chart(records, start, end),
        analyst_tmo: metrics::analyst_average_handling_time(records),
        ranking: metrics::ranking(records),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Overview for {} ({} - {})",
        user,
        start.format(DATE_FORMAT),
        end.format(DATE_FORMAT)
    );

    let mut table = Table::new();
    table.add_row(row!["total", "finished", "cancelled", "avg handling time"]);
    table.add_row(row![
        report.summary.total,
        report.summary.finished,
        report.summary.cancelled,
        report.summary.formatted
    ]);
    table.printstd();

    println!("Daily productivity");
    let mut table = Table::new();
    table.add_row(row!["day", "finished", "cancelled", "total"]);
    for day in &report.daily_productivity {
        table.add_row(row![
            day.day.format(DATE_FORMAT),
            day.finished,
            day.cancelled,
            day.total
        ]);
    }
    table.printstd();

    println!("Daily average handling time");
    let mut table = Table::new();
    table.add_row(row!["day", "TMO"]);
    for day in &report.daily_tmo {
        table.add_row(row![day.day.format(DATE_FORMAT), day.formatted]);
    }
    table.printstd();

    println!("Average handling time by analyst");
    let mut table = Table::new();
    table.add_row(row!["analyst", "TMO"]);
    for analyst in &report.analyst_tmo {
        table.add_row(row![analyst.analyst, analyst.formatted]);
    }
    table.printstd();

    println!("Ranking");
    let mut table = Table::new();
    table.add_row(row!["#", "analyst", "finished", "cancelled", "total"]);
    for entry in &report.ranking {
        table.add_row(row![
            entry.position,
            entry.analyst,
            entry.finished,
            entry.cancelled,
            entry.total
        ]);
    }
    table.printstd();

    Ok(())
}

/// The single-analyst view: the analyst's own numbers next to the team
/// average, the task-type breakdown when the column exists, and the
/// analyst's daily TMO.
pub fn analyst(
    store: &LedgerStore,
    user: &str,
    name: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    json: bool,
) -> Result<()> {
    let (ledger, start, end) = load_slice(store, user, from, to)?;

    let own: Vec<TaskRecord> = ledger
        .records
        .iter()
        .filter(|r| r.completed_by == name)
        .cloned()
        .collect();

    let report = AnalystReport {
        analyst: name.to_string(),
        start,
        end,
        summary: metrics::summary(&own),
        team: metrics::summary(&ledger.records),
        task_types: metrics::task_type_breakdown(&ledger, name),
        daily_tmo: metrics::daily_average_handling_time(&own),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Metrics for {} ({} - {})",
        name,
        start.format(DATE_FORMAT),
        end.format(DATE_FORMAT)
    );

    let mut table = Table::new();
    table.add_row(row!["", "total", "finished", "cancelled", "avg handling time"]);
    table.add_row(row![
        name,
        report.summary.total,
        report.summary.finished,
        report.summary.cancelled,
        report.summary.formatted
    ]);
    table.add_row(row![
        "team",
        report.team.total,
        report.team.finished,
        report.team.cancelled,
        report.team.formatted
    ]);
    table.printstd();

    if report.summary.total > 0 && report.summary.average > report.team.average {
        println!("Note: this analyst's average handling time is above the team average.");
    }

    println!("Task types");
    match &report.task_types {
        Some(task_types) => {
            let mut table = Table::new();
            table.add_row(row!["task type", "count"]);
            for entry in task_types {
                table.add_row(row![entry.task_type, entry.count]);
            }
            table.printstd();
        }
        None => println!("Unavailable for this data: the ledger has no task_type column."),
    }

    println!("Daily average handling time");
    let mut table = Table::new();
    table.add_row(row!["day", "TMO"]);
    for day in &report.daily_tmo {
        table.add_row(row![day.day.format(DATE_FORMAT), day.formatted]);
    }
    table.printstd();

    Ok(())
}

/// Merge an uploaded spreadsheet into the user's accumulated ledger. An
/// unparsable file is rejected before the store is touched.
pub fn upload(store: &LedgerStore, user: &str, file: &Path) -> Result<()> {
    let incoming = store::read_sheet_file(file)?;
    let existing = store.load(user)?;
    let merged = store.merge_and_persist(user, &existing, &incoming)?;
    info!("merged {} for {}", file.display(), user);
    println!(
        "Merged {} row(s) from {}; the ledger now has {} row(s).",
        incoming.rows.len(),
        file.display(),
        merged.rows.len()
    );
    Ok(())
}

pub fn add_note(logbook: &Logbook, user: &str, text: &str) -> Result<()> {
    logbook.append_note(user, text)?;
    println!("Note saved.");
    Ok(())
}

pub fn list_notes(logbook: &Logbook, user: &str) -> Result<()> {
    let notes = logbook.list_notes(user)?;
    if notes.is_empty() {
        println!("No notes found.");
    } else {
        for note in &notes {
            println!("{}", textwrap::fill(note, NOTE_WRAP_WIDTH));
        }
    }

    let outages = logbook.list_outages(user)?;
    if !outages.is_empty() {
        println!("Outages");
        for outage in &outages {
            println!("{}", outage);
        }
    }
    Ok(())
}

/// Interactive outage timer: starts on launch, stops on Enter, records
/// the interval. The start instant never leaves this process.
pub fn run_timer(logbook: &Logbook, user: &str) -> Result<()> {
    let mut timer = Timer::new();
    timer.start();
    println!("Timer running. Press Enter to stop.");

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;

    let elapsed = timer.stop(logbook, user)?;
    println!("Outage of {} recorded.", logbook::format_elapsed(elapsed));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{normalize, Sheet};

    fn records() -> Vec<TaskRecord> {
        let mut sheet = Sheet::empty();
        sheet.rows = vec![
            vec![
                "1".to_string(),
                "ana".to_string(),
                "Finished".to_string(),
                "00:10:00".to_string(),
                "05/01/2024 09:00:00".to_string(),
            ],
            vec![
                "2".to_string(),
                "ana".to_string(),
                "Finished".to_string(),
                "00:10:00".to_string(),
                "10/01/2024 09:00:00".to_string(),
            ],
        ];
        normalize(&sheet).records
    }

    #[test]
    fn range_defaults_to_the_ledger_span() {
        let (start, end) = resolve_range(&records(), None, None).unwrap();
        assert_eq!(start, NaiveDate::from_ymd(2024, 1, 5));
        assert_eq!(end, NaiveDate::from_ymd(2024, 1, 10));
    }

    #[test]
    fn explicit_bounds_win() {
        let from = Some(NaiveDate::from_ymd(2024, 1, 7));
        let (start, end) = resolve_range(&records(), from, None).unwrap();
        assert_eq!(start, NaiveDate::from_ymd(2024, 1, 7));
        assert_eq!(end, NaiveDate::from_ymd(2024, 1, 10));
    }

    #[test]
    fn empty_ledger_defaults_to_today() {
        let today = Local::now().naive_local().date();
        let (start, end) = resolve_range(&[], None, None).unwrap();
        assert_eq!((start, end), (today, today));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let from = Some(NaiveDate::from_ymd(2024, 2, 1));
        let to = Some(NaiveDate::from_ymd(2024, 1, 1));
        assert!(resolve_range(&records(), from, to).is_err());
    }
}
