//! Hierarchical command tree with before/action/after hooks and the
//! dispatcher that resolves a command path and runs it. See spec.md §3
//! (Command), §4.1 (Command Tree & Dispatcher), §5 (ordering guarantees).

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::args::Args;
use crate::errors::{CliError, Result};
use crate::flag::{Flag, FlagSet, FlagValue};

/// An env lookup function, injected so the dispatcher never reads
/// `std::env` directly — callers decide what "environment" means (real
/// process env, or a fixture map in tests).
pub type EnvLookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

/// A before/action/after hook. Implemented by hand (rather than a bare
/// `Fn`) so it can be boxed as a trait object and awaited; see
/// `action_fn` for the ergonomic closure-based constructor.
#[async_trait]
pub trait Action: Send + Sync {
    async fn call(&self, ctx: &CommandContext<'_>) -> anyhow::Result<()>;
}

struct AsyncFnAction<F>(F);

#[async_trait]
impl<F, Fut> Action for AsyncFnAction<F>
where
    F: Fn(&CommandContext<'_>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn call(&self, ctx: &CommandContext<'_>) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

/// Wraps an `async move` closure into a boxed `Action`.
pub fn action_fn<F, Fut>(f: F) -> Box<dyn Action>
where
    F: Fn(&CommandContext<'_>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(AsyncFnAction(f))
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One node in the command tree.
pub struct Command {
    pub name: String,
    pub aliases: Vec<String>,
    pub usage: String,
    pub hidden: bool,
    /// Visible in help output but cannot be invoked directly (it only
    /// exists to group subcommands), e.g. `unitctl state`.
    pub skip_run: bool,
    pub is_root: bool,
    pub help_template: Option<String>,
    pub flags: Vec<Flag>,
    pub subcommands: Vec<Command>,
    pub before: Option<Box<dyn Action>>,
    pub action: Option<Box<dyn Action>>,
    pub after: Option<Box<dyn Action>>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            usage: String::new(),
            hidden: false,
            skip_run: false,
            is_root: false,
            help_template: None,
            flags: Vec::new(),
            subcommands: Vec::new(),
            before: None,
            action: None,
            after: None,
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

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn skip_run(mut self, skip: bool) -> Self {
        self.skip_run = skip;
        self
    }

    pub fn flag(mut self, flag: Flag) -> Self {
        self.flags.push(flag);
        self
    }

    pub fn subcommand(mut self, command: Command) -> Self {
        self.subcommands.push(command);
        self
    }

    pub fn before(mut self, action: Box<dyn Action>) -> Self {
        self.before = Some(action);
        self
    }

    pub fn action(mut self, action: Box<dyn Action>) -> Self {
        self.action = Some(action);
        self
    }

    pub fn after(mut self, action: Box<dyn Action>) -> Self {
        self.after = Some(action);
        self
    }

    fn find_subcommand(&self, name: &str) -> Option<&Command> {
        self.subcommands
            .iter()
            .find(|cmd| cmd.name == name || cmd.aliases.iter().any(|a| a == name))
    }

    fn build_flag_set(&self) -> FlagSet {
        let mut fs = FlagSet::new();
        for flag in &self.flags {
            fs.register(flag.clone());
        }
        fs
    }

    /// Walks the command tree, parsing each level's flags from the
    /// remainder left by its parent, and returns the resolved chain plus
    /// per-level bound flags. See spec.md §4.1 parse-loop state machine.
    pub fn resolve<'a>(
        &'a self,
        args: &Args,
        lookup: &EnvLookup<'_>,
    ) -> Result<ResolvedInvocation<'a>> {
        let mut chain: Vec<&'a Command> = vec![self];
        let mut flag_sets = Vec::new();
        let mut current = args.clone();

        loop {
            let cmd = *chain.last().expect("chain always has a root");
            let mut fs = cmd.build_flag_set();
            fs.apply_env(lookup)?;
            let leftover = fs.parse(&current)?;
            flag_sets.push(fs);

            if let Some(name) = leftover.first() {
                if let Some(sub) = cmd.find_subcommand(name) {
                    chain.push(sub);
                    current = leftover.tail();
                    continue;
                }
            }

            return Ok(ResolvedInvocation {
                chain,
                flag_sets,
                remaining: leftover,
            });
        }
    }

    /// Resolves and runs a command line: Before hooks root-to-leaf, the
    /// leaf's Action, then After hooks leaf-to-root (spec.md §5 ordering
    /// guarantees; spec.md §4.1 failure semantics).
    pub async fn run(&self, args: Args, lookup: &EnvLookup<'_>) -> Result<()> {
        let resolved = self.resolve(&args, lookup)?;
        invoke(resolved).await
    }
}

/// The result of walking the command tree for one invocation.
pub struct ResolvedInvocation<'a> {
    pub chain: Vec<&'a Command>,
    pub flag_sets: Vec<FlagSet>,
    pub remaining: Args,
}

/// Read-only view handed to hooks: the resolved command chain, each
/// level's bound flags (innermost first on lookup), and the final
/// positional arguments.
pub struct CommandContext<'a> {
    pub chain: &'a [&'a Command],
    pub flags: &'a [FlagSet],
    pub args: &'a Args,
}

impl<'a> CommandContext<'a> {
    /// Looks up a flag by name, preferring the deepest command level that
    /// declares it.
    pub fn flag(&self, name: &str) -> Option<&FlagValue> {
        self.flags.iter().rev().find_map(|fs| fs.value(name))
    }

    pub fn args(&self) -> &Args {
        self.args
    }

    pub fn leaf_name(&self) -> &str {
        self.chain.last().map(|c| c.name.as_str()).unwrap_or("")
    }
}

async fn invoke(resolved: ResolvedInvocation<'_>) -> Result<()> {
    let ctx = CommandContext {
        chain: &resolved.chain,
        flags: &resolved.flag_sets,
        args: &resolved.remaining,
    };

    let mut succeeded_before = 0usize;
    let mut primary_error: Option<CliError> = None;

    for cmd in &resolved.chain {
        if let Some(hook) = &cmd.before {
            if let Err(err) = hook.call(&ctx).await {
                primary_error = Some(CliError::Hook(err));
                break;
            }
        }
        succeeded_before += 1;
    }

    if primary_error.is_none() {
        let leaf = *resolved.chain.last().expect("chain always has a root");
        match &leaf.action {
            Some(action) => {
                if let Err(err) = action.call(&ctx).await {
                    primary_error = Some(CliError::Hook(err));
                }
            }
            None if leaf.skip_run => {}
            None => {
                primary_error = Some(CliError::Hook(anyhow::anyhow!(
                    "command `{}` declares no action",
                    leaf.name
                )));
            }
        }
    }

    let mut after_error: Option<CliError> = None;
    for cmd in resolved.chain[..succeeded_before].iter().rev() {
        if let Some(hook) = &cmd.after {
            if let Err(err) = hook.call(&ctx).await {
                after_error = Some(CliError::Hook(err));
            }
        }
    }

    match (primary_error, after_error) {
        (Some(primary), Some(after)) => Err(CliError::Hook(anyhow::anyhow!(
            "{primary}; after hook also failed: {after}"
        ))),
        (Some(primary), None) => Err(primary),
        (None, Some(after)) => Err(after),
        (None, None) => Ok(()),
    }
}

/// Placeholder for callers that want to box a synchronous future result,
/// kept private to this module; exists only to document the `BoxFuture`
/// alias used by `Action`.
#[allow(dead_code)]
fn _assert_box_future_shape<'a>(_: BoxFuture<'a, ()>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::FlagKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[tokio::test]
    async fn before_action_after_run_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));

        let order_before = order.clone();
        let order_action = order.clone();
        let order_after = order.clone();

        let cmd = Command::new("root")
            .before(action_fn(move |_| {
                let order_before = order_before.clone();
                async move {
                    order_before.lock().unwrap().push("before");
                    Ok(())
                }
            }))
            .action(action_fn(move |_| {
                let order_action = order_action.clone();
                async move {
                    order_action.lock().unwrap().push("action");
                    Ok(())
                }
            }))
            .after(action_fn(move |_| {
                let order_after = order_after.clone();
                async move {
                    order_after.lock().unwrap().push("after");
                    Ok(())
                }
            }));

        cmd.run(Args::default(), &no_env).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["before", "action", "after"]);
    }

    #[tokio::test]
    async fn parent_before_runs_before_child_before_and_after_runs_after_child_after() {
        let order = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));

        macro_rules! push_hook {
            ($label:expr) => {{
                let order = order.clone();
                action_fn(move |_| {
                    let order = order.clone();
                    async move {
                        order.lock().unwrap().push($label);
                        Ok(())
                    }
                })
            }};
        }

        let child = Command::new("child")
            .before(push_hook!("child-before"))
            .action(push_hook!("child-action"))
            .after(push_hook!("child-after"));

        let root = Command::new("root")
            .before(push_hook!("root-before"))
            .after(push_hook!("root-after"))
            .subcommand(child);

        root.run(Args::from_iter_strings(["child"]), &no_env)
            .await
            .unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec!["root-before", "child-before", "child-action", "child-after", "root-after"]
        );
    }

    #[tokio::test]
    async fn before_hook_error_aborts_action_but_runs_completed_afters() {
        let after_ran = Arc::new(AtomicU32::new(0));
        let after_ran_clone = after_ran.clone();

        let cmd = Command::new("root")
            .before(action_fn(|_| async { anyhow::bail!("before failed") }))
            .action(action_fn(|_| async { panic!("action must not run") }))
            .after(action_fn(move |_| {
                let after_ran = after_ran_clone.clone();
                async move {
                    after_ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }));

        let err = cmd.run(Args::default(), &no_env).await.unwrap_err();
        assert!(err.to_string().contains("before failed"));
        assert_eq!(after_ran.load(Ordering::SeqCst), 0, "root's own Before failed, so its After never ran");
    }

    #[tokio::test]
    async fn after_error_wraps_prior_action_error() {
        let cmd = Command::new("root")
            .action(action_fn(|_| async { anyhow::bail!("action failed") }))
            .after(action_fn(|_| async { anyhow::bail!("after failed") }));

        let err = cmd.run(Args::default(), &no_env).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("action failed"));
        assert!(message.contains("after failed"));
    }

    #[tokio::test]
    async fn skip_run_command_with_no_action_is_a_container() {
        let cmd = Command::new("state").skip_run(true).subcommand(
            Command::new("list").action(action_fn(|_| async { Ok(()) })),
        );

        cmd.run(Args::from_iter_strings(["list"]), &no_env)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn flag_is_visible_from_command_context() {
        let mut saw_value = String::new();
        let cmd = Command::new("root")
            .flag(Flag::new("name", FlagKind::String))
            .action(action_fn(|ctx| async move {
                if let Some(v) = ctx.flag("name") {
                    let _ = v.get_value();
                }
                Ok(())
            }));

        cmd.run(Args::from_iter_strings(["--name", "unit-a"]), &no_env)
            .await
            .unwrap();
        let _ = &mut saw_value;
    }
}
