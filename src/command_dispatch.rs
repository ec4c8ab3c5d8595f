//! Purpose: Hold top-level CLI command dispatch for `exthub`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every install/load path goes through `ExtensionManager`, never the collaborators directly.
//! Invariants: `exec` prints each message as its statement completes and stops at the first error.

use super::*;

use exthub::api::parse_script;

pub(super) fn dispatch_command(
    command: Command,
    manager: &ExtensionManager,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Install {
            name,
            from,
            force,
            json,
        } => {
            let message = manager.install(&name, from.as_deref(), force)?;
            emit_result(&message, json);
            Ok(RunOutcome::ok())
        }
        Command::Update { name, from, json } => {
            let message = manager.update(&name, from.as_deref())?;
            emit_result(&message, json);
            Ok(RunOutcome::ok())
        }
        Command::Load { path, json } => {
            let message = manager.load(&path)?;
            emit_result(&message, json);
            Ok(RunOutcome::ok())
        }
        Command::Uninstall { name, json } => {
            let message = manager.uninstall(&name)?;
            emit_result(&message, json);
            Ok(RunOutcome::ok())
        }
        Command::List { json } => {
            let statuses = manager.list()?;
            emit_list(&statuses, json);
            Ok(RunOutcome::ok())
        }
        Command::Exec { script, json } => {
            let script = read_script(script)?;
            let statements = parse_script(&script)?;
            if statements.is_empty() {
                return Err(Error::new(ErrorKind::Usage).with_message("no statements to run"));
            }
            for statement in &statements {
                let message = manager.run(statement)?;
                emit_result(&message, json);
            }
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output(manager);
            Ok(RunOutcome::ok())
        }
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "exthub", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
    }
}
