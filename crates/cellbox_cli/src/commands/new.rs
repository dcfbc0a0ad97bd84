//! `new` command implementation.

use std::io::Write;

use super::Session;
use crate::task::Task;
use crate::{CliError, Format};

/// Queues a new task and prints its id once it is written.
pub fn run(session: &Session, text: &str, out: &mut dyn Write) -> Result<(), CliError> {
    let mut task = Task::new(text);
    let id = session.queue.put(&mut task)?;
    if !session.queue.await_completion() {
        return Err(CliError::NotWritten(id));
    }
    tracing::debug!(id, "task added");

    match session.format {
        Format::Text => writeln!(out, "New task: {id} - {}", task.text)?,
        Format::Json => writeln!(out, "{}", serde_json::to_string(&task)?)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::commands::tests::{exec, session};
    use crate::Format;

    #[test]
    fn adds_task() {
        let session = session(Format::Text);
        assert_eq!(exec(&session, "new buy milk"), "New task: 1 - buy milk\n");
        assert_eq!(session.tasks.count().unwrap(), 1);
    }

    #[test]
    fn json_output() {
        let session = session(Format::Json);
        let printed = exec(&session, "new walk");
        let value: serde_json::Value = serde_json::from_str(&printed).unwrap();
        assert_eq!(value["text"], "walk");
        assert_eq!(value["date_finished"], 0);
    }
}
