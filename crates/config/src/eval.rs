//! The lazy expression evaluator. Deliberately hand-rolled on top of the
//! `hcl` crate's parsed AST rather than its own eager `Evaluate` trait, so
//! that short-circuiting (ternaries, `try`/`can`, unknown-function checks
//! preceding argument evaluation) matches spec.md §4.3 exactly.

use std::collections::BTreeMap;

use crate::builtins::{self, FunctionRegistry};
use crate::context::ParsingContext;
use crate::errors::{ConfigError, Result};

/// Evaluates a single HCL expression against a parsing context. This is
/// the entry point every attribute value and include-merge input goes
/// through.
pub fn evaluate(expr: &hcl::Expression, ctx: &ParsingContext, registry: &FunctionRegistry) -> Result<hcl::Value> {
    evaluate_scoped(expr, ctx, registry, &BTreeMap::new())
}

/// Evaluates a unit's `locals` blocks in declaration order, threading each
/// evaluated value back into `ctx.locals` before moving to the next
/// attribute — later locals may reference earlier ones (spec.md §4.3
/// supplement).
pub fn evaluate_locals(body: &hcl::Body, ctx: &mut ParsingContext, registry: &FunctionRegistry) -> Result<()> {
    for block in body.blocks() {
        if block.identifier.as_str() != "locals" {
            continue;
        }
        for attr in block.body.attributes() {
            let key = attr.key.as_str().to_string();
            let value = evaluate(&attr.expr, ctx, registry).map_err(|err| {
                ConfigError::Evaluation(format!("local `{key}`: {err}"))
            })?;
            ctx.locals.insert(key, value);
        }
    }
    Ok(())
}

/// Converts a context's evaluated locals into the `hcl::Value` a unit
/// renders as ("the config") — the same value include-merging folds
/// parents into.
pub fn locals_to_value(ctx: &ParsingContext) -> hcl::Value {
    let mut map = hcl::Map::new();
    for (k, v) in &ctx.locals {
        map.insert(k.clone(), v.clone());
    }
    hcl::Value::Object(map)
}

fn evaluate_scoped(
    expr: &hcl::Expression,
    ctx: &ParsingContext,
    registry: &FunctionRegistry,
    scope: &BTreeMap<String, hcl::Value>,
) -> Result<hcl::Value> {
    match expr {
        hcl::Expression::Null => Ok(hcl::Value::Null),
        hcl::Expression::Bool(b) => Ok(hcl::Value::Bool(*b)),
        hcl::Expression::Number(n) => Ok(hcl::Value::Number(n.clone())),
        hcl::Expression::String(s) => Ok(hcl::Value::String(s.clone())),

        hcl::Expression::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate_scoped(item, ctx, registry, scope)?);
            }
            Ok(hcl::Value::Array(out))
        }

        hcl::Expression::Object(obj) => {
            let mut out = hcl::Map::new();
            for (key, value_expr) in obj.iter() {
                let key_str = evaluate_object_key(key, ctx, registry, scope)?;
                let value = evaluate_scoped(value_expr, ctx, registry, scope)?;
                out.insert(key_str, value);
            }
            Ok(hcl::Value::Object(out))
        }

        hcl::Expression::TemplateExpr(template_expr) => evaluate_template(template_expr, ctx, registry, scope),

        hcl::Expression::Variable(ident) => resolve_identifier(ident.as_str(), ctx, scope),

        hcl::Expression::Traversal(traversal) => {
            let mut value = evaluate_scoped(&traversal.expr, ctx, registry, scope)?;
            for op in &traversal.operators {
                value = apply_traversal_operator(value, op, ctx, registry, scope)?;
            }
            Ok(value)
        }

        hcl::Expression::Parenthesis(inner) => evaluate_scoped(inner, ctx, registry, scope),

        hcl::Expression::Conditional(cond) => {
            // Ternary short-circuit: only the taken branch is evaluated, so
            // a failing expression on the untaken side is never an error.
            if value_to_bool(&evaluate_scoped(&cond.cond_expr, ctx, registry, scope)?)? {
                evaluate_scoped(&cond.true_expr, ctx, registry, scope)
            } else {
                evaluate_scoped(&cond.false_expr, ctx, registry, scope)
            }
        }

        hcl::Expression::Operation(op) => evaluate_operation(op, ctx, registry, scope),

        hcl::Expression::FuncCall(call) => evaluate_func_call(call, ctx, registry, scope),

        hcl::Expression::ForExpr(for_expr) => evaluate_for_expr(for_expr, ctx, registry, scope),

        hcl::Expression::Raw(raw) => Ok(hcl::Value::String(raw.to_string())),
    }
}

fn evaluate_object_key(
    key: &hcl::ObjectKey<hcl::Expression>,
    ctx: &ParsingContext,
    registry: &FunctionRegistry,
    scope: &BTreeMap<String, hcl::Value>,
) -> Result<String> {
    match key {
        hcl::ObjectKey::Identifier(ident) => Ok(ident.as_str().to_string()),
        hcl::ObjectKey::Expression(expr) => {
            let value = evaluate_scoped(expr, ctx, registry, scope)?;
            value_to_key_string(&value)
        }
    }
}

fn evaluate_func_call(
    call: &hcl::FuncCall,
    ctx: &ParsingContext,
    registry: &FunctionRegistry,
    scope: &BTreeMap<String, hcl::Value>,
) -> Result<hcl::Value> {
    let name = call.name.as_str();

    // `try`/`can` are special forms: each candidate expression is only
    // evaluated until one succeeds (or, for `can`, to test success at
    // all), so a side-effecting or erroring expression later in the list
    // never runs once an earlier one has already produced a value.
    if name == "try" {
        let mut last_err = None;
        for candidate in &call.args {
            match evaluate_scoped(candidate, ctx, registry, scope) {
                Ok(value) => return Ok(value),
                Err(err) => last_err = Some(err),
            }
        }
        return Err(last_err.unwrap_or_else(|| ConfigError::Evaluation("try: no arguments given".to_string())));
    }
    if name == "can" {
        if call.args.len() != 1 {
            return Err(ConfigError::Evaluation("can: expects exactly one argument".to_string()));
        }
        let ok = evaluate_scoped(&call.args[0], ctx, registry, scope).is_ok();
        return Ok(hcl::Value::Bool(ok));
    }

    // Every other function must be known, and its arity valid, before any
    // argument is evaluated — an undefined function call never runs its
    // (possibly side-effecting) arguments.
    let spec = registry
        .lookup(name)
        .ok_or_else(|| ConfigError::Evaluation(format!("undefined function `{name}`")))?;
    spec.check_arity(name, call.args.len())?;

    let mut values = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        values.push(evaluate_scoped(arg, ctx, registry, scope)?);
    }
    builtins::call(name, &values, ctx)
}

fn evaluate_for_expr(
    for_expr: &hcl::ForExpr,
    ctx: &ParsingContext,
    registry: &FunctionRegistry,
    scope: &BTreeMap<String, hcl::Value>,
) -> Result<hcl::Value> {
    let collection = evaluate_scoped(&for_expr.collection_expr, ctx, registry, scope)?;
    let items: Vec<(Option<hcl::Value>, hcl::Value)> = match collection {
        hcl::Value::Array(items) => items.into_iter().map(|v| (None, v)).collect(),
        hcl::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (Some(hcl::Value::String(k)), v))
            .collect(),
        other => {
            return Err(ConfigError::Evaluation(format!(
                "for-expression collection must be a list or map, got {other:?}"
            )))
        }
    };

    if let Some(key_expr) = &for_expr.key_expr {
        let mut result = hcl::Map::new();
        for (index_key, value) in items {
            let child_scope = bind_for_vars(scope, for_expr, index_key, &value);
            if let Some(cond) = &for_expr.cond_expr {
                if !value_to_bool(&evaluate_scoped(cond, ctx, registry, &child_scope)?)? {
                    continue;
                }
            }
            let key = value_to_key_string(&evaluate_scoped(key_expr, ctx, registry, &child_scope)?)?;
            let val = evaluate_scoped(&for_expr.value_expr, ctx, registry, &child_scope)?;
            result.insert(key, val);
        }
        Ok(hcl::Value::Object(result))
    } else {
        let mut result = Vec::new();
        for (index_key, value) in items {
            let child_scope = bind_for_vars(scope, for_expr, index_key, &value);
            if let Some(cond) = &for_expr.cond_expr {
                if !value_to_bool(&evaluate_scoped(cond, ctx, registry, &child_scope)?)? {
                    continue;
                }
            }
            result.push(evaluate_scoped(&for_expr.value_expr, ctx, registry, &child_scope)?);
        }
        Ok(hcl::Value::Array(result))
    }
}

fn bind_for_vars(
    outer: &BTreeMap<String, hcl::Value>,
    for_expr: &hcl::ForExpr,
    index_key: Option<hcl::Value>,
    value: &hcl::Value,
) -> BTreeMap<String, hcl::Value> {
    let mut scope = outer.clone();
    if let Some(key_var) = &for_expr.key_var {
        scope.insert(key_var.as_str().to_string(), index_key.unwrap_or(hcl::Value::Null));
    }
    scope.insert(for_expr.value_var.as_str().to_string(), value.clone());
    scope
}

fn resolve_identifier(
    name: &str,
    ctx: &ParsingContext,
    scope: &BTreeMap<String, hcl::Value>,
) -> Result<hcl::Value> {
    if let Some(value) = scope.get(name) {
        return Ok(value.clone());
    }
    match name {
        "local" => Ok(map_to_object(&ctx.locals)),
        "dependency" => Ok(map_to_object(&ctx.decoded_dependencies)),
        "feature_flag" => Ok(map_to_object(&ctx.feature_flags)),
        "true" => Ok(hcl::Value::Bool(true)),
        "false" => Ok(hcl::Value::Bool(false)),
        "null" => Ok(hcl::Value::Null),
        other => Err(ConfigError::Evaluation(format!("undefined variable `{other}`"))),
    }
}

fn map_to_object(map: &BTreeMap<String, hcl::Value>) -> hcl::Value {
    let mut obj = hcl::Map::new();
    for (k, v) in map {
        obj.insert(k.clone(), v.clone());
    }
    hcl::Value::Object(obj)
}

fn apply_traversal_operator(
    value: hcl::Value,
    op: &hcl::TraversalOperator,
    ctx: &ParsingContext,
    registry: &FunctionRegistry,
    scope: &BTreeMap<String, hcl::Value>,
) -> Result<hcl::Value> {
    match op {
        hcl::TraversalOperator::GetAttr(ident) => get_member(&value, ident.as_str()),
        hcl::TraversalOperator::Index(index_expr) => {
            let index = evaluate_scoped(index_expr, ctx, registry, scope)?;
            index_value(&value, &index)
        }
        hcl::TraversalOperator::LegacyIndex(i) => index_value(&value, &hcl::Value::Number((*i).into())),
        hcl::TraversalOperator::AttrSplat | hcl::TraversalOperator::FullSplat => {
            Err(ConfigError::Evaluation("splat traversals are not supported".to_string()))
        }
    }
}

fn get_member(value: &hcl::Value, name: &str) -> Result<hcl::Value> {
    match value {
        hcl::Value::Object(obj) => obj
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::Evaluation(format!("no such attribute `{name}`"))),
        other => Err(ConfigError::Evaluation(format!("cannot access attribute `{name}` on {other:?}"))),
    }
}

fn index_value(value: &hcl::Value, index: &hcl::Value) -> Result<hcl::Value> {
    match value {
        hcl::Value::Array(items) => {
            let idx = index
                .as_f64()
                .map(|f| f as usize)
                .ok_or_else(|| ConfigError::Evaluation("array index must be a number".to_string()))?;
            items
                .get(idx)
                .cloned()
                .ok_or_else(|| ConfigError::Evaluation(format!("index {idx} out of bounds")))
        }
        hcl::Value::Object(obj) => {
            let key = index
                .as_str()
                .ok_or_else(|| ConfigError::Evaluation("map index must be a string".to_string()))?;
            obj.get(key)
                .cloned()
                .ok_or_else(|| ConfigError::Evaluation(format!("no such key `{key}`")))
        }
        other => Err(ConfigError::Evaluation(format!("cannot index into {other:?}"))),
    }
}

fn evaluate_template(
    template_expr: &hcl::template::TemplateExpr,
    ctx: &ParsingContext,
    registry: &FunctionRegistry,
    scope: &BTreeMap<String, hcl::Value>,
) -> Result<hcl::Value> {
    let template = template_expr
        .to_template()
        .map_err(|err| ConfigError::Evaluation(format!("invalid template: {err}")))?;

    let mut out = String::new();
    for element in template.elements() {
        match element {
            hcl::template::Element::Literal(literal) => out.push_str(literal),
            hcl::template::Element::Interpolation(interp) => {
                let value = evaluate_scoped(&interp.expr, ctx, registry, scope)?;
                out.push_str(&value_to_display_string(&value));
            }
            hcl::template::Element::Directive(_) => {
                return Err(ConfigError::Evaluation(
                    "template if/for directives are not supported".to_string(),
                ))
            }
        }
    }
    Ok(hcl::Value::String(out))
}

fn evaluate_operation(
    op: &hcl::Operation,
    ctx: &ParsingContext,
    registry: &FunctionRegistry,
    scope: &BTreeMap<String, hcl::Value>,
) -> Result<hcl::Value> {
    match op {
        hcl::Operation::Unary(unary) => {
            let value = evaluate_scoped(&unary.expr, ctx, registry, scope)?;
            match unary.operator {
                hcl::UnaryOperator::Not => Ok(hcl::Value::Bool(!value_to_bool(&value)?)),
                hcl::UnaryOperator::Neg => Ok(hcl::Value::Number(negate_number(&value)?)),
            }
        }
        hcl::Operation::Binary(binary) => {
            use hcl::BinaryOperator::*;
            // `&&`/`||` short-circuit: the right-hand side is only
            // evaluated when the left-hand side doesn't already decide
            // the result.
            if matches!(binary.operator, And | Or) {
                let lhs = value_to_bool(&evaluate_scoped(&binary.lhs_expr, ctx, registry, scope)?)?;
                return match binary.operator {
                    And if !lhs => Ok(hcl::Value::Bool(false)),
                    Or if lhs => Ok(hcl::Value::Bool(true)),
                    _ => Ok(hcl::Value::Bool(value_to_bool(&evaluate_scoped(
                        &binary.rhs_expr,
                        ctx,
                        registry,
                        scope,
                    )?)?)),
                };
            }

            let lhs = evaluate_scoped(&binary.lhs_expr, ctx, registry, scope)?;
            let rhs = evaluate_scoped(&binary.rhs_expr, ctx, registry, scope)?;
            match binary.operator {
                Eq => Ok(hcl::Value::Bool(lhs == rhs)),
                NotEq => Ok(hcl::Value::Bool(lhs != rhs)),
                Less => Ok(hcl::Value::Bool(as_f64(&lhs)? < as_f64(&rhs)?)),
                LessEq => Ok(hcl::Value::Bool(as_f64(&lhs)? <= as_f64(&rhs)?)),
                Greater => Ok(hcl::Value::Bool(as_f64(&lhs)? > as_f64(&rhs)?)),
                GreaterEq => Ok(hcl::Value::Bool(as_f64(&lhs)? >= as_f64(&rhs)?)),
                Plus => numeric(as_f64(&lhs)? + as_f64(&rhs)?),
                Minus => numeric(as_f64(&lhs)? - as_f64(&rhs)?),
                Mul => numeric(as_f64(&lhs)? * as_f64(&rhs)?),
                Div => numeric(as_f64(&lhs)? / as_f64(&rhs)?),
                Mod => numeric(as_f64(&lhs)? % as_f64(&rhs)?),
                And | Or => unreachable!("handled above"),
            }
        }
    }
}

fn numeric(f: f64) -> Result<hcl::Value> {
    hcl::Number::from_f64(f)
        .map(hcl::Value::Number)
        .ok_or_else(|| ConfigError::Evaluation(format!("{f} is not a representable HCL number")))
}

fn negate_number(value: &hcl::Value) -> Result<hcl::Number> {
    let f = as_f64(value)?;
    hcl::Number::from_f64(-f).ok_or_else(|| ConfigError::Evaluation(format!("{f} is not a representable HCL number")))
}

fn as_f64(value: &hcl::Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| ConfigError::Evaluation(format!("expected a number, got {value:?}")))
}

pub(crate) fn value_to_bool(value: &hcl::Value) -> Result<bool> {
    match value {
        hcl::Value::Bool(b) => Ok(*b),
        other => Err(ConfigError::Evaluation(format!("expected a bool, got {other:?}"))),
    }
}

fn value_to_key_string(value: &hcl::Value) -> Result<String> {
    match value {
        hcl::Value::String(s) => Ok(s.clone()),
        hcl::Value::Number(n) => Ok(n.to_string()),
        other => Err(ConfigError::Evaluation(format!("expected a string key, got {other:?}"))),
    }
}

fn value_to_display_string(value: &hcl::Value) -> String {
    match value {
        hcl::Value::String(s) => s.clone(),
        hcl::Value::Number(n) => n.to_string(),
        hcl::Value::Bool(b) => b.to_string(),
        hcl::Value::Null => String::new(),
        other => other.to_string(),
    }
}
