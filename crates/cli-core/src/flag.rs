//! Typed flag values, env-var precedence, and the FlagSet parse loop.
//! See spec.md §3 (Flag, FlagValue), §4.1 (parsing loop, flag types).

use std::collections::BTreeMap;
use std::fmt;

use crate::args::{looks_like_flag, Args};
use crate::errors::{CliError, Result};

/// A closed sum type over every flag shape the framework binds. Chosen over
/// runtime reflection per spec.md §9 ("Typed flag values with env
/// precedence").
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Bool(bool),
    String(String),
    Int(i64),
    Int64(i64),
    Uint(u64),
    StringSlice(Vec<String>),
    StringMap(BTreeMap<String, String>),
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Bool(v) => write!(f, "{v}"),
            TypedValue::String(v) => write!(f, "{v}"),
            TypedValue::Int(v) | TypedValue::Int64(v) => write!(f, "{v}"),
            TypedValue::Uint(v) => write!(f, "{v}"),
            TypedValue::StringSlice(v) => write!(f, "{}", v.join(",")),
            TypedValue::StringMap(v) => {
                let rendered: Vec<String> = v.iter().map(|(k, val)| format!("{k}={val}")).collect();
                write!(f, "{}", rendered.join(","))
            }
        }
    }
}

/// How a flag's raw textual form should be split into multiple `Set` calls
/// (slice/map flags) or bound directly (scalar/bool flags).
#[derive(Debug, Clone)]
pub enum FlagKind {
    Bool { negative: bool },
    String,
    Int,
    Int64,
    Uint,
    StringSlice { delimiter: char },
    StringMap { entry_delimiter: char, kv_separator: char },
}

impl FlagKind {
    /// Bool flags don't consume a following token when none is supplied inline.
    pub fn is_boolean(&self) -> bool {
        matches!(self, FlagKind::Bool { .. })
    }

    fn accumulates(&self) -> bool {
        matches!(self, FlagKind::StringSlice { .. } | FlagKind::StringMap { .. })
    }

    fn default_value(&self) -> TypedValue {
        match self {
            FlagKind::Bool { .. } => TypedValue::Bool(false),
            FlagKind::String => TypedValue::String(String::new()),
            FlagKind::Int | FlagKind::Int64 => TypedValue::Int64(0),
            FlagKind::Uint => TypedValue::Uint(0),
            FlagKind::StringSlice { .. } => TypedValue::StringSlice(Vec::new()),
            FlagKind::StringMap { .. } => TypedValue::StringMap(BTreeMap::new()),
        }
    }
}

/// Immutable descriptor for a declared flag. Lives for the command tree's
/// lifetime and is cloned into a fresh `FlagSet` per invocation (spec.md
/// §3: Flag lifecycle — "registered at command-tree construction; mutated
/// only when Apply binds it to a FlagSet").
#[derive(Debug, Clone)]
pub struct Flag {
    pub name: String,
    pub aliases: Vec<String>,
    pub usage: String,
    pub env_var: Option<String>,
    pub kind: FlagKind,
    pub hidden: bool,
    pub default_text: String,
}

impl Flag {
    pub fn new(name: impl Into<String>, kind: FlagKind) -> Self {
        let name = name.into();
        let default_text = kind.default_value().to_string();
        Self {
            name,
            aliases: Vec::new(),
            usage: String::new(),
            env_var: None,
            kind,
            hidden: false,
            default_text,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn env(mut self, var: impl Into<String>) -> Self {
        self.env_var = Some(var.into());
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Mutable binding created when a `Flag` is applied to a `FlagSet`.
/// Invariants from spec.md §3: (a) a second argv `Set` fails for scalar/bool
/// kinds; (b) env precedence is one-shot before argv parsing; (c) `is_set`
/// is true if either argv or env set occurred.
#[derive(Debug, Clone)]
pub struct FlagValue {
    value: TypedValue,
    default_text: String,
    env_set: bool,
    arg_set_count: u32,
}

impl FlagValue {
    fn new(kind: &FlagKind, default_text: String) -> Self {
        Self {
            value: kind.default_value(),
            default_text,
            env_set: false,
            arg_set_count: 0,
        }
    }

    pub fn is_set(&self) -> bool {
        self.env_set || self.arg_set_count > 0
    }

    pub fn is_set_by_env(&self) -> bool {
        self.env_set
    }

    pub fn get(&self) -> &TypedValue {
        &self.value
    }

    pub fn get_value(&self) -> String {
        self.value.to_string()
    }

    pub fn default_text(&self) -> &str {
        &self.default_text
    }

    fn set(&mut self, kind: &FlagKind, raw: &str, flag_name: &str, from_env: bool) -> Result<()> {
        if !from_env && !kind.accumulates() && self.arg_set_count > 0 {
            return Err(CliError::MultipleSet);
        }

        match kind {
            FlagKind::Bool { negative } => {
                let parsed = parse_bool(raw).map_err(|err| CliError::TypeParse {
                    flag: flag_name.to_string(),
                    source: Box::new(err),
                })?;
                self.value = TypedValue::Bool(if *negative { !parsed } else { parsed });
            }
            FlagKind::String => {
                self.value = TypedValue::String(raw.to_string());
            }
            FlagKind::Int | FlagKind::Int64 => {
                let parsed: i64 = raw.parse().map_err(|err| CliError::TypeParse {
                    flag: flag_name.to_string(),
                    source: Box::new(err),
                })?;
                self.value = TypedValue::Int64(parsed);
            }
            FlagKind::Uint => {
                let parsed: u64 = raw.parse().map_err(|err| CliError::TypeParse {
                    flag: flag_name.to_string(),
                    source: Box::new(err),
                })?;
                self.value = TypedValue::Uint(parsed);
            }
            FlagKind::StringSlice { delimiter } => {
                let mut current = match &self.value {
                    TypedValue::StringSlice(v) => v.clone(),
                    _ => Vec::new(),
                };
                if from_env {
                    current.extend(raw.split(*delimiter).map(str::to_string));
                } else {
                    current.push(raw.to_string());
                }
                self.value = TypedValue::StringSlice(current);
            }
            FlagKind::StringMap {
                entry_delimiter,
                kv_separator,
            } => {
                let mut current = match &self.value {
                    TypedValue::StringMap(v) => v.clone(),
                    _ => BTreeMap::new(),
                };
                let entries: Vec<&str> = if from_env {
                    raw.split(*entry_delimiter).collect()
                } else {
                    vec![raw]
                };
                for entry in entries {
                    let (k, v) = entry.split_once(*kv_separator).ok_or_else(|| {
                        CliError::InvalidKeyValue {
                            sep: *kv_separator,
                            value: entry.to_string(),
                        }
                    })?;
                    current.insert(k.to_string(), v.to_string());
                }
                self.value = TypedValue::StringMap(current);
            }
        }

        if from_env {
            self.env_set = true;
        } else {
            self.arg_set_count += 1;
        }

        Ok(())
    }
}

fn parse_bool(raw: &str) -> std::result::Result<bool, std::str::ParseBoolError> {
    raw.parse::<bool>()
}

/// A set of bound flags for one command level, plus the state machine that
/// drives the parse loop described in spec.md §4.1.
#[derive(Default)]
pub struct FlagSet {
    declared: Vec<Flag>,
    bindings: Vec<FlagValue>,
    disallow_undefined_flags: bool,
}

enum ParseState {
    ScanningArgs,
    Resolved,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disallow_undefined_flags(mut self, disallow: bool) -> Self {
        self.disallow_undefined_flags = disallow;
        self
    }

    pub fn register(&mut self, flag: Flag) {
        let binding = FlagValue::new(&flag.kind, flag.default_text.clone());
        self.declared.push(flag);
        self.bindings.push(binding);
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.declared
            .iter()
            .position(|flag| flag.names().any(|n| n == name))
    }

    pub fn value(&self, name: &str) -> Option<&FlagValue> {
        self.index_of(name).map(|idx| &self.bindings[idx])
    }

    /// Env-var precedence pass: applied once, before any argv parsing
    /// (spec.md §4.1 "Environment-variable precedence").
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for idx in 0..self.declared.len() {
            let (env_var, kind, name) = {
                let flag = &self.declared[idx];
                (flag.env_var.clone(), flag.kind.clone(), flag.name.clone())
            };
            let Some(env_var) = env_var else { continue };
            let Some(raw) = lookup(&env_var) else { continue };
            if raw.is_empty() {
                continue;
            }
            self.bindings[idx].set(&kind, &raw, &name, true)?;
        }
        Ok(())
    }

    /// Parses `args` against the declared flags. Returns the leftover
    /// positional/undefined tokens in their original lexical order
    /// (spec.md §4.1 "defining property").
    pub fn parse(&mut self, args: &Args) -> Result<Args> {
        let tokens = args.as_slice();
        let mut leftover: Vec<String> = Vec::new();
        let mut i = 0usize;
        let mut state = ParseState::ScanningArgs;
        let mut terminated = false;

        while i < tokens.len() {
            if matches!(state, ParseState::Resolved) {
                break;
            }

            let token = &tokens[i];

            if terminated || !looks_like_flag(token) {
                leftover.push(token.clone());
                i += 1;
                continue;
            }

            if token == "--" {
                terminated = true;
                i += 1;
                continue;
            }

            let stripped = token.trim_start_matches('-');
            let (name, inline_value) = match stripped.split_once('=') {
                Some((n, v)) => (n, Some(v.to_string())),
                None => (stripped, None),
            };

            match self.index_of(name) {
                None => {
                    if self.disallow_undefined_flags {
                        return Err(CliError::Undefined(name.to_string()));
                    }
                    // Undefined flag retains its lexical position among positionals.
                    leftover.push(token.clone());
                    i += 1;
                }
                Some(idx) => {
                    let is_bool = self.declared[idx].kind.is_boolean();
                    let value = if let Some(v) = inline_value {
                        i += 1;
                        v
                    } else if is_bool {
                        i += 1;
                        "true".to_string()
                    } else if let Some(next) = tokens.get(i + 1) {
                        i += 2;
                        next.clone()
                    } else {
                        i += 1;
                        String::new()
                    };

                    let kind = self.declared[idx].kind.clone();
                    let flag_name = self.declared[idx].name.clone();
                    self.bindings[idx].set(&kind, &value, &flag_name, false)?;
                }
            }

            if i >= tokens.len() {
                state = ParseState::Resolved;
            }
        }

        Ok(Args::new(leftover))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_lookup(map: &HashMap<String, String>) -> impl Fn(&str) -> Option<String> + '_ {
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_precedence_then_arg_wins() {
        let mut fs = FlagSet::new();
        fs.register(Flag::new("foo", FlagKind::String).env("FOO"));

        let mut env = HashMap::new();
        env.insert("FOO".to_string(), "env-val".to_string());
        fs.apply_env(env_lookup(&env)).unwrap();

        let args = Args::from_iter_strings(["--foo", "arg-val"]);
        let leftover = fs.parse(&args).unwrap();

        assert!(leftover.is_empty());
        let binding = fs.value("foo").unwrap();
        assert_eq!(binding.get_value(), "arg-val");
        assert!(binding.is_set());
    }

    #[test]
    fn undefined_flag_passes_through_in_position() {
        let mut fs = FlagSet::new();
        fs.register(Flag::new("known", FlagKind::String));

        let args = Args::from_iter_strings(["--unknown", "v", "one", "--known", "k"]);
        let leftover = fs.parse(&args).unwrap();

        assert_eq!(leftover.as_slice(), ["--unknown", "v", "one"]);
        assert_eq!(fs.value("known").unwrap().get_value(), "k");
    }

    #[test]
    fn disallow_undefined_flags_errors() {
        let mut fs = FlagSet::new().disallow_undefined_flags(true);
        fs.register(Flag::new("known", FlagKind::String));

        let args = Args::from_iter_strings(["--unknown"]);
        let err = fs.parse(&args).unwrap_err();
        assert!(matches!(err, CliError::Undefined(name) if name == "unknown"));
    }

    #[test]
    fn setting_scalar_flag_twice_via_args_fails() {
        let mut fs = FlagSet::new();
        fs.register(Flag::new("foo", FlagKind::String));

        let args = Args::from_iter_strings(["--foo", "one", "--foo", "two"]);
        let err = fs.parse(&args).unwrap_err();
        assert!(matches!(err, CliError::MultipleSet));
    }

    #[test]
    fn slice_flag_accumulates_across_cli_occurrences() {
        let mut fs = FlagSet::new();
        fs.register(Flag::new(
            "tag",
            FlagKind::StringSlice { delimiter: ',' },
        ));

        let args = Args::from_iter_strings(["--tag", "a", "--tag", "b"]);
        fs.parse(&args).unwrap();

        assert_eq!(
            fs.value("tag").unwrap().get(),
            &TypedValue::StringSlice(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn map_flag_rejects_missing_separator() {
        let mut fs = FlagSet::new();
        fs.register(Flag::new(
            "set",
            FlagKind::StringMap {
                entry_delimiter: ',',
                kv_separator: '=',
            },
        ));

        let args = Args::from_iter_strings(["--set", "not-a-pair"]);
        let err = fs.parse(&args).unwrap_err();
        assert!(matches!(err, CliError::InvalidKeyValue { sep: '=', .. }));
    }

    #[test]
    fn bool_negative_flag_inverts_output() {
        let mut fs = FlagSet::new();
        fs.register(Flag::new(
            "no-color",
            FlagKind::Bool { negative: true },
        ));

        let args = Args::from_iter_strings(["--no-color"]);
        fs.parse(&args).unwrap();

        assert_eq!(fs.value("no-color").unwrap().get(), &TypedValue::Bool(false));
    }

    #[test]
    fn double_dash_terminates_flag_scanning() {
        let mut fs = FlagSet::new();
        fs.register(Flag::new("known", FlagKind::String));

        let args = Args::from_iter_strings(["--", "--known", "literal"]);
        let leftover = fs.parse(&args).unwrap();
        assert_eq!(leftover.as_slice(), ["--known", "literal"]);
        assert!(!fs.value("known").unwrap().is_set());
    }
}
