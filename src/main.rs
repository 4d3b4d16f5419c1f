#[macro_use]
extern crate prettytable;

use std::path::PathBuf;

use anyhow::anyhow;
use directories::ProjectDirs;
use structopt::StructOpt;

mod cli;
mod interface;
mod logbook;
mod metrics;
mod model;
mod store;

use cli::{Command::*, CommandLineArgs};
use logbook::Logbook;
use store::LedgerStore;

fn find_default_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "painel", "painel").map(|dirs| dirs.data_dir().to_path_buf())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Get the command-line arguments.
    let CommandLineArgs {
        action,
        user,
        data_dir,
    } = CommandLineArgs::from_args();

    let data_dir = data_dir
        .or_else(find_default_data_dir)
        .ok_or(anyhow!("Failed to find a data directory."))?;

    let store = LedgerStore::new(data_dir.clone())?;
    let logbook = Logbook::new(data_dir)?;

    // Perform the action.
    match action {
        Overview { from, to, json } => interface::overview(&store, &user, from, to, json),
        Analyst {
            name,
            from,
            to,
            json,
        } => interface::analyst(&store, &user, &name, from, to, json),
        Upload { file } => interface::upload(&store, &user, &file),
        Note { text } => interface::add_note(&logbook, &user, &text),
        Notes => interface::list_notes(&logbook, &user),
        Timer => interface::run_timer(&logbook, &user),
    }?;
    Ok(())
}
