use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Local};
use log::debug;

use crate::store::sanitize_user;

pub const NOTE_TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Per-user append-only journals: one for free-text notes, one for
/// outage intervals. Lines are immutable once written; there is no edit
/// or delete path.
pub struct Logbook {
    data_dir: PathBuf,
}

impl Logbook {
    pub fn new(data_dir: PathBuf) -> Result<Logbook> {
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        Ok(Logbook { data_dir })
    }

    fn notes_path(&self, user: &str) -> PathBuf {
        self.data_dir.join(format!("logbook_{}.txt", sanitize_user(user)))
    }

    fn outages_path(&self, user: &str) -> PathBuf {
        self.data_dir.join(format!("outages_{}.txt", sanitize_user(user)))
    }

    /// Append one timestamped note line. Empty or whitespace-only text is
    /// rejected before anything is written.
    pub fn append_note(&self, user: &str, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            bail!("A note cannot be empty.");
        }
        let line = format!("{} - {}", Local::now().format(NOTE_TIMESTAMP_FORMAT), text.trim());
        self.append_line(&self.notes_path(user), &line)
    }

    /// All note lines in append order; a user with no logbook has none.
    pub fn list_notes(&self, user: &str) -> Result<Vec<String>> {
        let path = self.notes_path(user);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read logbook {}", path.display()))?;
        Ok(content.lines().map(|l| l.to_string()).collect())
    }

    /// Append one outage interval line, unconditionally.
    pub fn append_outage(&self, user: &str, start: &str, end: &str, duration: &str) -> Result<()> {
        let line = format!("{} - {} | Duração: {}", start, end, duration);
        self.append_line(&self.outages_path(user), &line)
    }

    pub fn list_outages(&self, user: &str) -> Result<Vec<String>> {
        let path = self.outages_path(user);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read outage journal {}", path.display()))?;
        Ok(content.lines().map(|l| l.to_string()).collect())
    }

    fn append_line(&self, path: &PathBuf, line: &str) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for appending", path.display()))?;
        writeln!(file, "{}", line)
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        debug!("appended one line to {}", path.display());
        Ok(())
    }
}

/// Session-scoped elapsed timer for outage tracking. The start instant
/// lives only in this value; nothing survives the session.
pub struct Timer {
    started_at: Option<DateTime<Local>>,
}

impl Timer {
    pub fn new() -> Timer {
        Timer { started_at: None }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Local::now());
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Stop the timer: record the interval in the outage journal and
    /// clear the start instant. Fails if the timer was never started.
    pub fn stop(&mut self, logbook: &Logbook, user: &str) -> Result<Duration> {
        let started_at = match self.started_at.take() {
            Some(instant) => instant,
            None => bail!("The timer is not running."),
        };
        let now = Local::now();
        let elapsed = now - started_at;
        logbook.append_outage(
            user,
            &started_at.format("%H:%M").to_string(),
            &now.format("%H:%M").to_string(),
            &format_elapsed(elapsed),
        )?;
        Ok(elapsed)
    }
}

/// Render an elapsed duration for the outage journal, with seconds
/// precision.
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.num_seconds().max(0) as u64;
    humantime::format_duration(std::time::Duration::from_secs(seconds)).to_string()
}
