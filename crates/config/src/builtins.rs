//! Built-in functions callable from HCL expressions. `try` and `can` are
//! special forms handled directly by the evaluator (they control which of
//! their arguments gets evaluated); everything else is dispatched here
//! after the evaluator has already evaluated its arguments. Spec.md §4.3,
//! §9 (supplemental `get_env` builtin).

use std::collections::BTreeMap;
use std::process::Command;

use crate::context::ParsingContext;
use crate::errors::{ConfigError, Result};

/// Declares how many arguments a function accepts, checked before its
/// arguments are evaluated so an unknown-function call never bothers
/// evaluating (and possibly side-effecting through) its arguments.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub min_args: usize,
    pub max_args: Option<usize>,
}

impl FunctionSpec {
    pub fn check_arity(&self, name: &str, got: usize) -> Result<()> {
        let too_few = got < self.min_args;
        let too_many = self.max_args.map(|max| got > max).unwrap_or(false);
        if too_few || too_many {
            return Err(ConfigError::Evaluation(format!(
                "{name}: expected {}{} argument(s), got {got}",
                self.min_args,
                self.max_args
                    .map(|m| if m == self.min_args { String::new() } else { format!("..{m}") })
                    .unwrap_or_else(|| "..".to_string()),
            )));
        }
        Ok(())
    }
}

/// Table of function names to their arity contract. `try`/`can` are listed
/// here too so an arity check can run for them, even though evaluation
/// itself is short-circuited in the evaluator rather than going through
/// [`call`].
pub struct FunctionRegistry {
    specs: BTreeMap<String, FunctionSpec>,
}

impl FunctionRegistry {
    pub fn with_builtins() -> Self {
        let mut specs = BTreeMap::new();
        specs.insert("get_env".to_string(), FunctionSpec { min_args: 1, max_args: Some(2) });
        specs.insert("run_cmd".to_string(), FunctionSpec { min_args: 1, max_args: None });
        specs.insert("try".to_string(), FunctionSpec { min_args: 1, max_args: None });
        specs.insert("can".to_string(), FunctionSpec { min_args: 1, max_args: Some(1) });
        Self { specs }
    }

    pub fn lookup(&self, name: &str) -> Option<&FunctionSpec> {
        self.specs.get(name)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Dispatches an already-arity-checked, already-evaluated call to one of
/// the non-special-form builtins. `try` and `can` never reach here.
pub fn call(name: &str, args: &[hcl::Value], ctx: &ParsingContext) -> Result<hcl::Value> {
    match name {
        "get_env" => get_env(args, ctx),
        "run_cmd" => run_cmd(args, ctx),
        other => Err(ConfigError::Evaluation(format!("undefined function `{other}`"))),
    }
}

/// `get_env(name)` / `get_env(name, default)`. Looks at the context's own
/// env overlay first (so tests and partial decodes can inject values
/// without touching the process), then the real process environment.
fn get_env(args: &[hcl::Value], ctx: &ParsingContext) -> Result<hcl::Value> {
    let name = args[0]
        .as_str()
        .ok_or_else(|| ConfigError::Evaluation("get_env: name must be a string".to_string()))?;

    if let Some(value) = ctx.env.get(name) {
        return Ok(hcl::Value::String(value.clone()));
    }
    if let Ok(value) = std::env::var(name) {
        return Ok(hcl::Value::String(value));
    }
    match args.get(1) {
        Some(default) => Ok(default.clone()),
        None => Err(ConfigError::Evaluation(format!("get_env: `{name}` is not set and no default was given"))),
    }
}

/// `run_cmd(arg0, arg1, ...)`. Shells out synchronously, relative to the
/// unit's working directory, and returns trimmed stdout. Non-zero exit
/// status is an evaluation error carrying stderr.
fn run_cmd(args: &[hcl::Value], ctx: &ParsingContext) -> Result<hcl::Value> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        let s = arg
            .as_str()
            .ok_or_else(|| ConfigError::Evaluation("run_cmd: arguments must be strings".to_string()))?;
        parts.push(s.to_string());
    }
    let Some((program, rest)) = parts.split_first() else {
        return Err(ConfigError::Evaluation("run_cmd: requires at least a command name".to_string()));
    };

    let output = Command::new(program)
        .args(rest)
        .current_dir(&ctx.working_dir)
        .output()
        .map_err(|err| ConfigError::Evaluation(format!("run_cmd: failed to spawn `{program}`: {err}")))?;

    if !output.status.success() {
        return Err(ConfigError::Evaluation(format!(
            "run_cmd: `{program}` exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim(),
        )));
    }

    Ok(hcl::Value::String(String::from_utf8_lossy(&output.stdout).trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_env_prefers_context_overlay_over_process_env() {
        let mut ctx = ParsingContext::new("/units/app/terragrunt.hcl").unwrap();
        ctx.env.insert("UNITCTL_TEST_VAR".to_string(), "from-context".to_string());

        let result = get_env(&[hcl::Value::String("UNITCTL_TEST_VAR".to_string())], &ctx).unwrap();
        assert_eq!(result, hcl::Value::String("from-context".to_string()));
    }

    #[test]
    fn get_env_falls_back_to_default_when_unset() {
        let ctx = ParsingContext::new("/units/app/terragrunt.hcl").unwrap();
        let args = [
            hcl::Value::String("UNITCTL_TEST_VAR_DEFINITELY_UNSET".to_string()),
            hcl::Value::String("fallback".to_string()),
        ];
        let result = get_env(&args, &ctx).unwrap();
        assert_eq!(result, hcl::Value::String("fallback".to_string()));
    }

    #[test]
    fn get_env_without_default_errors_when_unset() {
        let ctx = ParsingContext::new("/units/app/terragrunt.hcl").unwrap();
        let args = [hcl::Value::String("UNITCTL_TEST_VAR_DEFINITELY_UNSET".to_string())];
        assert!(get_env(&args, &ctx).is_err());
    }

    #[test]
    fn run_cmd_captures_trimmed_stdout() {
        let ctx = ParsingContext::new("/units/app/terragrunt.hcl").unwrap();
        let args = [hcl::Value::String("echo".to_string()), hcl::Value::String("hello".to_string())];
        let result = run_cmd(&args, &ctx).unwrap();
        assert_eq!(result, hcl::Value::String("hello".to_string()));
    }

    #[test]
    fn run_cmd_surfaces_non_zero_exit_as_error() {
        let ctx = ParsingContext::new("/units/app/terragrunt.hcl").unwrap();
        let args = [hcl::Value::String("false".to_string())];
        assert!(run_cmd(&args, &ctx).is_err());
    }

    #[test]
    fn registry_rejects_unknown_function_arity() {
        let registry = FunctionRegistry::with_builtins();
        let spec = registry.lookup("get_env").unwrap();
        assert!(spec.check_arity("get_env", 0).is_err());
        assert!(spec.check_arity("get_env", 3).is_err());
        assert!(spec.check_arity("get_env", 1).is_ok());
    }
}
