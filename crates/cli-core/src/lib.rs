//! Reusable CLI framework core: argument lexing, a typed flag registry,
//! and a hierarchical command tree with before/action/after hooks.
//!
//! This crate implements spec.md §4.1 in full. It has no knowledge of
//! `unitctl`'s configuration language or backend lifecycle — any host
//! binary can build a `Command` tree against it.

pub mod app;
pub mod args;
pub mod command;
pub mod errors;
pub mod flag;
pub mod help;

pub use app::{App, AutocompleteInstaller};
pub use args::{Args, DashStyle};
pub use command::{action_fn, Action, Command, CommandContext};
pub use errors::{CliError, ExitCoder, Result};
pub use flag::{Flag, FlagKind, FlagSet, FlagValue, TypedValue};
pub use help::{DefaultHelpPrinter, HelpPrinter};
