//! cellbox tasks
//!
//! A small interactive task list kept in an in-memory cellbox store.
//!
//! # Commands
//!
//! - `new <text>` - Add a task
//! - `done <id>` - Mark a task as done
//! - `ls [-a]` - List open tasks, or all with `-a`
//! - `help` - Show the commands
//! - `exit` - Leave the program

mod commands;
mod task;

use std::io::{self, BufRead, Write};

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use commands::{Flow, Line, Session};

/// Interactive task list on top of cellbox.
#[derive(Parser)]
#[command(name = "cellbox-tasks")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

/// Errors surfaced to the user at the prompt.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Store(#[from] cellbox::Error),

    #[error("no task with id {0}")]
    NoSuchTask(u64),

    #[error("task {0} was queued but not written")]
    NotWritten(u64),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let store = cellbox::Store::in_memory(cellbox::Options::new(task::model()?))?;
    let session = Session::new(&store, cli.format)?;
    println!("Welcome to the cellbox tasks app. Type help for the commands.");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        let parsed = match Line::try_parse_from(words.iter().copied()) {
            Ok(parsed) => parsed,
            Err(err) => {
                // Covers `help` as well as usage errors.
                eprint!("{err}");
                continue;
            }
        };
        match session.run(parsed.command, &mut stdout) {
            Ok(Flow::Exit) => break,
            Ok(Flow::Continue) => {}
            Err(err) => eprintln!("error: {err}"),
        }
        stdout.flush()?;
    }

    store.close()?;
    Ok(())
}
