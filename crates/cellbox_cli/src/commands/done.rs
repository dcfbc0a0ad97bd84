//! `done` command implementation.

use std::io::Write;

use super::Session;
use crate::CliError;

/// Marks task `id` as finished. Finishing a finished task is a no-op.
pub fn run(session: &Session, id: u64, out: &mut dyn Write) -> Result<(), CliError> {
    let mut task = session.tasks.get(id)?.ok_or(CliError::NoSuchTask(id))?;
    if task.is_done() {
        writeln!(out, "Task {id} is already done")?;
        return Ok(());
    }
    task.finish();
    session.tasks.put(&mut task)?;
    tracing::debug!(id, "task finished");
    writeln!(out, "Task {id} done")?;
    Ok(())
}
