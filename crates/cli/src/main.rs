mod azure_env;
mod commands;
mod convert;
mod telemetry;

use std::path::PathBuf;

use unitctl_cli_core::{App, AutocompleteInstaller, Command, FlagKind};

/// Installs a bash completion script that lists `unitctl`'s direct
/// subcommands; uninstall removes it. `complete` drives `COMP_LINE` mode by
/// printing candidates whose name starts with the last word on the line.
struct BashAutocompleteInstaller {
    script_path: PathBuf,
    subcommand_names: Vec<String>,
}

impl BashAutocompleteInstaller {
    fn new(subcommand_names: Vec<String>) -> Self {
        let dir = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".local/share/bash-completion/completions");
        Self { script_path: dir.join("unitctl"), subcommand_names }
    }

    fn script(&self) -> String {
        format!(
            "_unitctl_complete() {{\n  COMPREPLY=($(compgen -W \"{}\" -- \"${{COMP_WORDS[COMP_CWORD]}}\"))\n}}\ncomplete -F _unitctl_complete unitctl\n",
            self.subcommand_names.join(" "),
        )
    }
}

impl AutocompleteInstaller for BashAutocompleteInstaller {
    fn install(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.script_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.script_path, self.script())?;
        Ok(())
    }

    fn uninstall(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.script_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn complete(&self, line: &str, candidates: &[String]) {
        let last_word = line.split_whitespace().last().unwrap_or("");
        for candidate in candidates {
            if candidate.starts_with(last_word) {
                println!("{candidate}");
            }
        }
    }
}

fn root_command() -> Command {
    Command::new("unitctl")
        .usage("Orchestrate IaC units: evaluate configuration, resolve dependencies, provision backends")
        .flag(
            unitctl_cli_core::Flag::new("log-level", FlagKind::String)
                .env("UNITCTL_LOG_LEVEL")
                .usage("tracing filter directive, e.g. `info` or `unitctl=debug`"),
        )
        .flag(
            unitctl_cli_core::Flag::new("log-format", FlagKind::String)
                .env("UNITCTL_LOG_FORMAT")
                .usage("`auto`, `text`, or `json`"),
        )
        .before(commands::root_before_hook())
        .skip_run(true)
        .subcommand(commands::render_command())
        .subcommand(commands::dependency_command())
        .subcommand(commands::backend_command())
        .subcommand(commands::version_command())
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[tokio::main]
async fn main() {
    let log_format = match std::env::var("UNITCTL_LOG_FORMAT").as_deref() {
        Ok("json") => telemetry::LogFormat::Json,
        Ok("text") => telemetry::LogFormat::Text,
        _ => telemetry::LogFormat::Auto,
    };
    let log_level = std::env::var("UNITCTL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    if let Err(err) = telemetry::init(&log_level, log_format) {
        eprintln!("failed to initialize logging: {err}");
    }

    let root = root_command();
    let subcommand_names: Vec<String> = root.subcommands.iter().map(|c| c.name.clone()).collect();
    let app = App::new("unitctl", root)
        .with_autocomplete(Box::new(BashAutocompleteInstaller::new(subcommand_names)));
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let code = app.run(argv, &env_lookup).await;
    std::process::exit(code);
}
