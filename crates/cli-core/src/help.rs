//! Minimal `--help` rendering. Not part of spec.md's explicit CLI framework
//! scope, but a usable CLI needs some help output, so the core defines the
//! trait shape and a default renderer; a host app may supply its own.

use crate::command::Command;

/// Renders help text for a resolved command chain (root-to-leaf). The
/// framework core only defines the contract — `App` calls whichever
/// printer it's given when `-h`/`--help` is the first leftover argument.
pub trait HelpPrinter {
    fn render(&self, chain: &[&Command]) -> String;
}

/// Usage line, the leaf's own flags, and its subcommand list, unless the
/// leaf overrides everything via `help_template`.
pub struct DefaultHelpPrinter;

impl HelpPrinter for DefaultHelpPrinter {
    fn render(&self, chain: &[&Command]) -> String {
        let leaf = *chain.last().expect("chain always has a root");
        if let Some(template) = &leaf.help_template {
            return template.clone();
        }

        let path: Vec<&str> = chain.iter().map(|c| c.name.as_str()).collect();
        let mut out = format!("Usage: {}", path.join(" "));
        if !leaf.subcommands.is_empty() {
            out.push_str(" <command>");
        }
        out.push('\n');
        if !leaf.usage.is_empty() {
            out.push_str(leaf.usage.as_str());
            out.push('\n');
        }

        if !leaf.flags.is_empty() {
            out.push_str("\nFlags:\n");
            for flag in &leaf.flags {
                if flag.hidden {
                    continue;
                }
                out.push_str(&format!("  --{:<20} {}\n", flag.name, flag.usage));
            }
        }

        if !leaf.subcommands.is_empty() {
            out.push_str("\nCommands:\n");
            for sub in &leaf.subcommands {
                if sub.hidden {
                    continue;
                }
                out.push_str(&format!("  {:<20} {}\n", sub.name, sub.usage));
            }
        }

        out
    }
}
