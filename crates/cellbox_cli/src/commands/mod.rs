//! REPL command implementations.

pub mod done;
pub mod ls;
pub mod new;

use std::io::Write;

use cellbox::{AsyncBox, EntityBox, Store};
use clap::{Parser, Subcommand};

use crate::task::Task;
use crate::{CliError, Format};

/// One input line.
#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_version_flag = true)]
#[command(help_template = "Commands:\n{subcommands}")]
pub struct Line {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a task
    New {
        /// Task text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Mark a task as done
    Done {
        /// Task id
        id: u64,
    },

    /// List open tasks
    Ls {
        /// Include finished tasks
        #[arg(short, long)]
        all: bool,
    },

    /// Leave the program
    #[command(alias = "quit")]
    Exit,
}

/// Whether the REPL keeps reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// State shared by all commands.
pub struct Session {
    pub tasks: EntityBox<Task>,
    pub queue: AsyncBox<Task>,
    pub format: Format,
}

impl Session {
    pub fn new(store: &Store, format: Format) -> Result<Self, CliError> {
        Ok(Self {
            tasks: store.entity_box(),
            queue: store.async_box()?,
            format,
        })
    }

    /// Runs `command`, writing its output to `out`.
    pub fn run(&self, command: Command, out: &mut dyn Write) -> Result<Flow, CliError> {
        match command {
            Command::New { text } => new::run(self, &text.join(" "), out)?,
            Command::Done { id } => done::run(self, id, out)?,
            Command::Ls { all } => ls::run(self, all, out)?,
            Command::Exit => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use cellbox::Options;

    pub(crate) fn session(format: Format) -> Session {
        let store = Store::in_memory(Options::new(crate::task::model().unwrap())).unwrap();
        Session::new(&store, format).unwrap()
    }

    pub(crate) fn exec(session: &Session, line: &str) -> String {
        let parsed = Line::try_parse_from(line.split_whitespace()).unwrap();
        let mut out = Vec::new();
        session.run(parsed.command, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn parses_lines() {
        let line = Line::try_parse_from("new buy milk".split_whitespace()).unwrap();
        assert!(matches!(line.command, Command::New { ref text } if text.join(" ") == "buy milk"));
        let line = Line::try_parse_from(["ls", "-a"]).unwrap();
        assert!(matches!(line.command, Command::Ls { all: true }));
        assert!(Line::try_parse_from(["done", "x"]).is_err());
        assert!(Line::try_parse_from(["new"]).is_err());
    }

    #[test]
    fn exit_stops() {
        let session = session(Format::Text);
        let mut out = Vec::new();
        assert_eq!(session.run(Command::Exit, &mut out).unwrap(), Flow::Exit);
    }
}
