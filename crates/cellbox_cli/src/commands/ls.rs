//! `ls` command implementation.

use std::io::Write;

use super::Session;
use crate::task::Task;
use crate::{CliError, Format};

/// Lists open tasks, or all tasks with `all`, newest last.
pub fn run(session: &Session, all: bool, out: &mut dyn Write) -> Result<(), CliError> {
    let store = session.tasks.store();
    let mut builder = store.query::<Task>()?;
    if !all {
        builder.with(&Task::DATE_FINISHED.is_null())?;
    }
    builder.order(Task::DATE_CREATED, 0)?;
    let tasks = builder.build()?.find()?;

    match session.format {
        Format::Json => writeln!(out, "{}", serde_json::to_string_pretty(&tasks)?)?,
        Format::Text if tasks.is_empty() => writeln!(out, "No tasks")?,
        Format::Text => {
            writeln!(out, "{:<6} {:<6} TEXT", "ID", "DONE")?;
            for task in &tasks {
                let done = if task.is_done() { "x" } else { "" };
                writeln!(out, "{:<6} {:<6} {}", task.id, done, task.text)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::commands::tests::{exec, session};
    use crate::Format;

    #[test]
    fn hides_finished_unless_all() {
        let session = session(Format::Text);
        exec(&session, "new a");
        exec(&session, "new b");
        exec(&session, "done 1");

        let open = exec(&session, "ls");
        assert!(open.contains(" b"));
        assert!(!open.contains(" a\n"));

        let all = exec(&session, "ls -a");
        assert_eq!(all.lines().count(), 3);
    }

    #[test]
    fn empty_list() {
        let session = session(Format::Text);
        assert_eq!(exec(&session, "ls"), "No tasks\n");
    }

    #[test]
    fn json_list() {
        let session = session(Format::Json);
        exec(&session, "new a");
        let value: serde_json::Value = serde_json::from_str(&exec(&session, "ls")).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
    }
}
