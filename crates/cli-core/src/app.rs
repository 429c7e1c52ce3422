//! The root `App`: owns the command tree and drives `Run`, including the
//! autocomplete shortcuts described in spec.md §4.1 and §6.

use crate::args::Args;
use crate::command::{Command, EnvLookup};
use crate::errors::{CliError, ExitCoder, Result};
use crate::help::{DefaultHelpPrinter, HelpPrinter};

/// Host-supplied installer for the two autocomplete shortcuts. The CLI
/// framework core only knows how to recognize and dispatch to these; it
/// does not implement shell-specific install logic itself (spec.md §1:
/// "Out of scope: ... help template rendering").
pub trait AutocompleteInstaller {
    fn install(&self) -> anyhow::Result<()>;
    fn uninstall(&self) -> anyhow::Result<()>;
    /// Emit candidate completion names for `COMP_LINE`-driven completion mode.
    fn complete(&self, line: &str, candidates: &[String]);
}

pub struct App {
    pub root: Command,
    pub program_name: String,
    pub autocomplete: Option<Box<dyn AutocompleteInstaller>>,
    pub help_printer: Box<dyn HelpPrinter>,
}

impl App {
    pub fn new(program_name: impl Into<String>, root: Command) -> Self {
        Self {
            root,
            program_name: program_name.into(),
            autocomplete: None,
            help_printer: Box::new(DefaultHelpPrinter),
        }
    }

    pub fn with_autocomplete(mut self, installer: Box<dyn AutocompleteInstaller>) -> Self {
        self.autocomplete = Some(installer);
        self
    }

    pub fn with_help_printer(mut self, printer: Box<dyn HelpPrinter>) -> Self {
        self.help_printer = printer;
        self
    }

    /// Runs the app against `argv_tail` (the process argv without the
    /// program name). Returns the process exit code; autocomplete
    /// install/uninstall shortcuts and `COMP_LINE` completion mode
    /// terminate early with exit 0 (spec.md §4.1).
    pub async fn run(&self, argv_tail: Vec<String>, lookup: &EnvLookup<'_>) -> i32 {
        if let Some(installer) = &self.autocomplete {
            if argv_tail.iter().any(|a| a == "--install-autocomplete") {
                return match installer.install() {
                    Ok(()) => 0,
                    Err(err) => {
                        tracing::error!(error = %err, "autocomplete install failed");
                        1
                    }
                };
            }
            if argv_tail.iter().any(|a| a == "--uninstall-autocomplete") {
                return match installer.uninstall() {
                    Ok(()) => 0,
                    Err(err) => {
                        tracing::error!(error = %err, "autocomplete uninstall failed");
                        1
                    }
                };
            }

            if let Some(comp_line) = lookup("COMP_LINE") {
                let stripped = comp_line
                    .strip_prefix(&self.program_name)
                    .map(str::trim_start)
                    .unwrap_or(&comp_line);
                let candidates: Vec<String> = self
                    .root
                    .subcommands
                    .iter()
                    .filter(|c| !c.hidden)
                    .map(|c| c.name.clone())
                    .collect();
                installer.complete(stripped, &candidates);
                return 0;
            }
        }

        let args = Args::new(argv_tail);

        if let Ok(resolved) = self.root.resolve(&args, lookup) {
            if resolved.remaining.as_slice().iter().any(|a| a == "-h" || a == "--help") {
                print!("{}", self.help_printer.render(&resolved.chain));
                return 0;
            }
        }

        match self.root.run(args, lookup).await {
            Ok(()) => 0,
            Err(err) => {
                tracing::error!(error = %err, "command failed");
                exit_code_for(&err)
            }
        }
    }
}

fn exit_code_for(err: &CliError) -> i32 {
    err.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::action_fn;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct StubInstaller {
        installed: Arc<AtomicBool>,
    }

    impl AutocompleteInstaller for StubInstaller {
        fn install(&self) -> anyhow::Result<()> {
            self.installed.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn uninstall(&self) -> anyhow::Result<()> {
            self.installed.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn complete(&self, _line: &str, _candidates: &[String]) {}
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[tokio::test]
    async fn install_autocomplete_short_circuits_with_exit_zero() {
        let installed = Arc::new(AtomicBool::new(false));
        let app = App::new(
            "unitctl",
            Command::new("root").action(action_fn(|_| async { panic!("must not run") })),
        )
        .with_autocomplete(Box::new(StubInstaller {
            installed: installed.clone(),
        }));

        let code = app
            .run(vec!["--install-autocomplete".to_string()], &no_env)
            .await;
        assert_eq!(code, 0);
        assert!(installed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn normal_invocation_dispatches_to_action() {
        let app = App::new(
            "unitctl",
            Command::new("root").action(action_fn(|_| async { Ok(()) })),
        );
        let code = app.run(vec![], &no_env).await;
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn action_error_maps_to_nonzero_exit() {
        let app = App::new(
            "unitctl",
            Command::new("root").action(action_fn(|_| async { anyhow::bail!("boom") })),
        );
        let code = app.run(vec![], &no_env).await;
        assert_ne!(code, 0);
    }

    #[tokio::test]
    async fn help_flag_short_circuits_without_running_action() {
        let app = App::new(
            "unitctl",
            Command::new("root")
                .usage("root command")
                .action(action_fn(|_| async { panic!("must not run") })),
        );
        let code = app.run(vec!["--help".to_string()], &no_env).await;
        assert_eq!(code, 0);
    }
}
