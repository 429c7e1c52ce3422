//! HCL-like configuration evaluation engine: parser cache, lazy evaluator,
//! include merging, and dependency output resolution.

mod builtins;
mod cache;
mod context;
mod dependency;
mod env_lock;
mod errors;
mod eval;
mod include;

pub use builtins::{FunctionRegistry, FunctionSpec};
pub use cache::{cache_key, ParseCache, ParsedFile, PartialParseCache};
pub use context::{BlockKind, ParsingContext, MAX_PARSE_DEPTH};
pub use dependency::{DependencyConfig, DependencyResolver, OutputSource};
pub use env_lock::{acquire as acquire_env_lock, EnvLockGuard};
pub use errors::{ConfigError, Result};
pub use eval::{evaluate, evaluate_locals, locals_to_value};
pub use include::{extract_includes, fold_chain, merge, resolve_config_value, IncludeConfig, MergeStrategy, TrackInclude};
