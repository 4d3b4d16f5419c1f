use std::path::PathBuf;

use chrono::NaiveDate;
use structopt::StructOpt;

/// Dates on the command line use the same day-first convention as the
/// ledger itself.
pub fn parse_date(text: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(text, "%d/%m/%Y")
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Show the team-wide dashboard for a date range.
    Overview {
        /// Start date (DD/MM/YYYY); defaults to the earliest task in the ledger.
        #[structopt(long, parse(try_from_str = parse_date))]
        from: Option<NaiveDate>,

        /// End date (DD/MM/YYYY); defaults to the latest task in the ledger.
        #[structopt(long, parse(try_from_str = parse_date))]
        to: Option<NaiveDate>,

        /// Print the report as JSON instead of tables.
        #[structopt(long)]
        json: bool,
    },
    /// Show the metrics of a single analyst.
    Analyst {
        /// The analyst identity, as recorded in the completed_by column.
        #[structopt()]
        name: String,

        /// Start date (DD/MM/YYYY); defaults to the earliest task in the ledger.
        #[structopt(long, parse(try_from_str = parse_date))]
        from: Option<NaiveDate>,

        /// End date (DD/MM/YYYY); defaults to the latest task in the ledger.
        #[structopt(long, parse(try_from_str = parse_date))]
        to: Option<NaiveDate>,

        /// Print the report as JSON instead of tables.
        #[structopt(long)]
        json: bool,
    },
    /// Merge a task spreadsheet (CSV) into the accumulated ledger.
    Upload {
        /// The spreadsheet to merge.
        #[structopt(parse(from_os_str))]
        file: PathBuf,
    },
    /// Append a note to the logbook.
    Note {
        /// The note text.
        #[structopt()]
        text: String,
    },
    /// List all logbook notes and recorded outages.
    Notes,
    /// Track an outage with an elapsed timer; press Enter to stop.
    Timer,
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "painel",
    about = "A per-analyst productivity metrics dashboard."
)]
pub struct CommandLineArgs {
    #[structopt(subcommand)]
    pub action: Command,

    /// The user identity that keys every per-user file.
    #[structopt(short, long)]
    pub user: String,

    /// Use a different data directory.
    #[structopt(parse(from_os_str), short, long)]
    pub data_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_first_dates() {
        assert_eq!(
            parse_date("05/01/2024").unwrap(),
            NaiveDate::from_ymd(2024, 1, 5)
        );
        assert!(parse_date("2024-01-05").is_err());
    }
}
