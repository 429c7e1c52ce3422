//! `include` block extraction, recursive resolution and merge semantics.
//! See spec.md §3 (TrackInclude), §4.3 ("Include-merge semantics").

use std::path::PathBuf;

use crate::builtins::FunctionRegistry;
use crate::context::ParsingContext;
use crate::errors::{ConfigError, Result};
use crate::eval::{evaluate, evaluate_locals, locals_to_value};

/// How a child's configuration is folded with a parent it includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    NoMerge,
    ShallowMerge,
    DeepMerge,
    DeepMergeMapOnly,
}

/// One `include "name" { ... }` block.
#[derive(Debug, Clone)]
pub struct IncludeConfig {
    pub name: String,
    pub path: PathBuf,
    pub expose: bool,
    pub merge_strategy: MergeStrategy,
}

/// The set of includes a unit has declared, in declaration order — the
/// composite configuration folds parents into the child in this order
/// (spec.md §4.3).
#[derive(Debug, Clone, Default)]
pub struct TrackInclude {
    pub includes: Vec<IncludeConfig>,
}

impl TrackInclude {
    pub fn push(&mut self, include: IncludeConfig) {
        self.includes.push(include);
    }
}

/// Folds `child` on top of `parent` according to `strategy`.
///
/// - `NoMerge`: the child wins outright, `parent` is ignored.
/// - `ShallowMerge`: a single-level map union, child keys win.
/// - `DeepMerge`: recurses into maps; lists also merge element-wise with
///   the child's list taking precedence for overlapping indices, parent's
///   tail preserved beyond the child's length.
/// - `DeepMergeMapOnly`: recurses into maps only; any list is replaced
///   wholesale by the child's value (child wins, not concatenated).
pub fn merge(parent: &hcl::Value, child: &hcl::Value, strategy: MergeStrategy) -> hcl::Value {
    match strategy {
        MergeStrategy::NoMerge => child.clone(),
        MergeStrategy::ShallowMerge => shallow_merge(parent, child),
        MergeStrategy::DeepMerge => deep_merge(parent, child, true),
        MergeStrategy::DeepMergeMapOnly => deep_merge(parent, child, false),
    }
}

fn shallow_merge(parent: &hcl::Value, child: &hcl::Value) -> hcl::Value {
    match (parent, child) {
        (hcl::Value::Object(p), hcl::Value::Object(c)) => {
            let mut merged = p.clone();
            for (k, v) in c.iter() {
                merged.insert(k.clone(), v.clone());
            }
            hcl::Value::Object(merged)
        }
        _ => child.clone(),
    }
}

fn deep_merge(parent: &hcl::Value, child: &hcl::Value, merge_lists: bool) -> hcl::Value {
    match (parent, child) {
        (hcl::Value::Object(p), hcl::Value::Object(c)) => {
            let mut merged = p.clone();
            for (k, child_val) in c.iter() {
                let next = match p.get(k) {
                    Some(parent_val) => deep_merge(parent_val, child_val, merge_lists),
                    None => child_val.clone(),
                };
                merged.insert(k.clone(), next);
            }
            hcl::Value::Object(merged)
        }
        (hcl::Value::Array(p), hcl::Value::Array(c)) if merge_lists => {
            let mut merged = c.clone();
            if p.len() > c.len() {
                merged.extend(p[c.len()..].iter().cloned());
            }
            hcl::Value::Array(merged)
        }
        _ => child.clone(),
    }
}

/// Folds a full include chain (outermost parent first) into a single
/// composite value.
pub fn fold_chain(chain: &[(hcl::Value, MergeStrategy)], child: hcl::Value) -> hcl::Value {
    chain
        .iter()
        .fold(child, |acc, (parent, strategy)| merge(parent, &acc, *strategy))
}

fn parse_merge_strategy(value: &hcl::Value) -> Result<MergeStrategy> {
    let hcl::Value::String(s) = value else {
        return Err(ConfigError::Validation("include.merge_strategy must be a string".to_string()));
    };
    match s.as_str() {
        "no_merge" => Ok(MergeStrategy::NoMerge),
        "shallow" => Ok(MergeStrategy::ShallowMerge),
        "deep_merge" => Ok(MergeStrategy::DeepMerge),
        "deep_merge_map_only" => Ok(MergeStrategy::DeepMergeMapOnly),
        other => Err(ConfigError::Validation(format!("unknown include merge_strategy `{other}`"))),
    }
}

fn value_to_path(value: &hcl::Value) -> Result<PathBuf> {
    match value {
        hcl::Value::String(s) => Ok(PathBuf::from(s)),
        _ => Err(ConfigError::Validation("include.path must be a string".to_string())),
    }
}

/// Extracts every `include "name" { path, expose, merge_strategy }` block
/// from a parsed body. Attribute expressions are evaluated against `ctx`,
/// so an include path built from a local (`"${local.root}/common.hcl"`)
/// resolves the same way any other attribute would.
pub fn extract_includes(body: &hcl::Body, ctx: &ParsingContext, registry: &FunctionRegistry) -> Result<Vec<IncludeConfig>> {
    let mut includes = Vec::new();

    for block in body.blocks() {
        if block.identifier.as_str() != "include" {
            continue;
        }
        let name = block
            .labels
            .first()
            .map(|label| label.as_str().to_string())
            .unwrap_or_default();

        let mut path = None;
        let mut expose = false;
        let mut merge_strategy = MergeStrategy::NoMerge;

        for attr in block.body.attributes() {
            match attr.key.as_str() {
                "path" => path = Some(value_to_path(&evaluate(&attr.expr, ctx, registry)?)?),
                "expose" => expose = matches!(evaluate(&attr.expr, ctx, registry)?, hcl::Value::Bool(true)),
                "merge_strategy" => merge_strategy = parse_merge_strategy(&evaluate(&attr.expr, ctx, registry)?)?,
                _ => {}
            }
        }

        let path = path.ok_or_else(|| ConfigError::Validation(format!("include \"{name}\" has no path attribute")))?;
        includes.push(IncludeConfig { name, path, expose, merge_strategy });
    }

    Ok(includes)
}

/// Resolves a unit's full configuration value: its own locals, folded with
/// every include it declares, each of which is itself resolved
/// recursively (an included parent may have its own includes). Descends
/// through [`ParsingContext::descend`] so the `MAX_PARSE_DEPTH` guard
/// applies to include chains exactly as it does to dependency lookups.
pub fn resolve_config_value(ctx: &mut ParsingContext, registry: &FunctionRegistry) -> Result<hcl::Value> {
    let (_, parsed) = ctx.parse_cache.parse_file(&ctx.config_path)?;

    evaluate_locals(&parsed.body, ctx, registry)?;
    let own_value = locals_to_value(ctx);

    let includes = extract_includes(&parsed.body, ctx, registry)?;
    for include in &includes {
        ctx.track_include.push(include.clone());
    }
    if includes.is_empty() {
        return Ok(own_value);
    }

    let mut chain = Vec::with_capacity(includes.len());
    for include in &includes {
        let include_path = ctx.working_dir.join(&include.path);
        let mut parent_ctx = ctx.descend(include_path)?;
        let parent_value = resolve_config_value(&mut parent_ctx, registry)?;
        chain.push((parent_value, include.merge_strategy));
    }

    Ok(fold_chain(&chain, own_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcl::value;

    #[test]
    fn no_merge_keeps_only_child() {
        let parent = value!({ a = 1 });
        let child = value!({ b = 2 });
        assert_eq!(merge(&parent, &child, MergeStrategy::NoMerge), child);
    }

    #[test]
    fn shallow_merge_unions_one_level() {
        let parent = value!({ a = { x = 1 }, b = 1 });
        let child = value!({ a = { y = 2 }, c = 3 });
        let merged = merge(&parent, &child, MergeStrategy::ShallowMerge);
        // shallow merge: top-level keys unioned, but nested "a" is replaced wholesale by child's
        assert_eq!(merged, value!({ a = { y = 2 }, b = 1, c = 3 }));
    }

    #[test]
    fn deep_merge_recurses_into_nested_maps() {
        let parent = value!({ a = { x = 1, y = 1 } });
        let child = value!({ a = { y = 2 } });
        let merged = merge(&parent, &child, MergeStrategy::DeepMerge);
        assert_eq!(merged, value!({ a = { x = 1, y = 2 } }));
    }

    #[test]
    fn deep_merge_map_only_leaves_lists_as_child_wins() {
        let parent = value!({ tags = ["a", "b"] });
        let child = value!({ tags = ["c"] });
        let merged = merge(&parent, &child, MergeStrategy::DeepMergeMapOnly);
        assert_eq!(merged, value!({ tags = ["c"] }));
    }

    #[test]
    fn deep_merge_extends_lists_beyond_child_length() {
        let parent = value!({ tags = ["a", "b", "c"] });
        let child = value!({ tags = ["x"] });
        let merged = merge(&parent, &child, MergeStrategy::DeepMerge);
        assert_eq!(merged, value!({ tags = ["x", "b", "c"] }));
    }

    #[test]
    fn extract_includes_reads_path_expose_and_merge_strategy() {
        let ctx = ParsingContext::new("/units/app/terragrunt.hcl").unwrap();
        let registry = FunctionRegistry::with_builtins();
        let body: hcl::Body = hcl::from_str(
            r#"
            include "root" {
              path           = "../root.hcl"
              expose         = true
              merge_strategy = "deep_merge"
            }
            "#,
        )
        .unwrap();

        let includes = extract_includes(&body, &ctx, &registry).unwrap();
        assert_eq!(includes.len(), 1);
        assert_eq!(includes[0].name, "root");
        assert_eq!(includes[0].path, PathBuf::from("../root.hcl"));
        assert!(includes[0].expose);
        assert_eq!(includes[0].merge_strategy, MergeStrategy::DeepMerge);
    }

    #[test]
    fn resolve_config_value_folds_included_parent_with_deep_merge() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("root.hcl"),
            r#"
            locals {
              env  = "prod"
              tags = { team = "platform" }
            }
            "#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("unit.hcl"),
            r#"
            include "root" {
              path           = "root.hcl"
              merge_strategy = "deep_merge"
            }

            locals {
              tags = { service = "billing" }
            }
            "#,
        )
        .unwrap();

        let mut ctx = ParsingContext::new(dir.path().join("unit.hcl")).unwrap();
        let registry = FunctionRegistry::with_builtins();
        let resolved = resolve_config_value(&mut ctx, &registry).unwrap();

        assert_eq!(
            resolved,
            value!({
                env  = "prod",
                tags = { team = "platform", service = "billing" },
            })
        );
        assert_eq!(ctx.track_include.includes.len(), 1, "include should be recorded on the context");
    }
}
