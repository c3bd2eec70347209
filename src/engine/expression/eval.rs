//! Expression evaluator
//!
//! Evaluation is pure and total: any fault (unknown function, malformed
//! source, unknown question) collapses to null / false. Callers never see an
//! error from this module.

use std::collections::HashMap;

use serde_json::{json, Value};
use uuid::Uuid;

use super::ast::Expr;
use super::parser::parse;
use crate::models::AnswerValue;

/// Read-only evaluation context shared by the resolver, router, validator,
/// and quota matcher.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub answers: HashMap<Uuid, AnswerValue>,
    pub loop_context: HashMap<String, Value>,
    /// variableName -> questionId for the whole survey
    pub question_id_map: HashMap<String, Uuid>,
    pub additional: serde_json::Map<String, Value>,
}

impl EvalContext {
    fn answer_by_name(&self, name: &str) -> Option<&AnswerValue> {
        let id = self.question_id_map.get(name)?;
        self.answers.get(id)
    }
}

/// Evaluate a source string to a value. Faults yield `Value::Null`.
pub fn evaluate(source: &str, ctx: &EvalContext) -> Value {
    match parse(source) {
        Ok(expr) => eval(&expr, ctx),
        Err(_) => Value::Null,
    }
}

/// Evaluate a source string to a boolean via truthiness. Faults yield false.
pub fn evaluate_bool(source: &str, ctx: &EvalContext) -> bool {
    truthy(&evaluate(source, ctx))
}

fn eval(expr: &Expr, ctx: &EvalContext) -> Value {
    match expr {
        Expr::Str(s) => Value::String(s.clone()),
        Expr::Num(n) => json!(n),
        Expr::Bool(b) => Value::Bool(*b),
        Expr::Array(items) => Value::Array(items.iter().map(|e| eval(e, ctx)).collect()),
        Expr::Ref(name) => eval_reference(name, ctx),
        Expr::Call(name, args) => eval_call(name, args, ctx),
    }
}

/// Bare identifier resolution: question variable, then `loop.` path, then
/// additional context, then the string form of the identifier itself.
fn eval_reference(name: &str, ctx: &EvalContext) -> Value {
    if let Some(answer) = ctx.answer_by_name(name) {
        return answer_repr(answer);
    }
    if let Some(path) = name.strip_prefix("loop.") {
        return ctx.loop_context.get(path).cloned().unwrap_or(Value::Null);
    }
    if let Some(v) = ctx.additional.get(name) {
        return v.clone();
    }
    Value::String(name.to_string())
}

/// The value a question reference stands for: the choice list for choice
/// answers, the primary scalar otherwise.
fn answer_repr(answer: &AnswerValue) -> Value {
    let choices = answer.choices();
    if !choices.is_empty() {
        return Value::Array(choices.iter().map(|c| Value::String(c.clone())).collect());
    }
    answer.primary_scalar()
}

fn eval_call(name: &str, args: &[Expr], ctx: &EvalContext) -> Value {
    match name {
        "answer" => {
            let Some(ident) = args.first().and_then(|a| a.as_ident()) else {
                return Value::Null;
            };
            ctx.answer_by_name(ident)
                .map(|a| a.primary_scalar())
                .unwrap_or(Value::Null)
        }
        "anySelected" | "allSelected" | "noneSelected" => {
            let selected = question_choices(args.first(), ctx);
            let wanted = arg_string_list(args.get(1), ctx);
            let hit = wanted.iter().filter(|w| selected.contains(*w)).count();
            let result = match name {
                "anySelected" => hit > 0,
                "allSelected" => hit == wanted.len() && !wanted.is_empty(),
                _ => hit == 0,
            };
            Value::Bool(result)
        }
        "equals" | "notEquals" => {
            let a = eval_opt(args.first(), ctx);
            let b = eval_opt(args.get(1), ctx);
            let eq = values_equal(&a, &b);
            Value::Bool(if name == "equals" { eq } else { !eq })
        }
        "not" => Value::Bool(!truthy(&eval_opt(args.first(), ctx))),
        "and" => {
            // Short-circuits on the first false argument
            for arg in args {
                if !truthy(&eval(arg, ctx)) {
                    return Value::Bool(false);
                }
            }
            Value::Bool(!args.is_empty())
        }
        "or" => {
            for arg in args {
                if truthy(&eval(arg, ctx)) {
                    return Value::Bool(true);
                }
            }
            Value::Bool(false)
        }
        "greaterThan" | "lessThan" | "greaterThanOrEqual" | "lessThanOrEqual" => {
            let (Some(a), Some(b)) = (
                as_number(&eval_opt(args.first(), ctx)),
                as_number(&eval_opt(args.get(1), ctx)),
            ) else {
                return Value::Bool(false);
            };
            let result = match name {
                "greaterThan" => a > b,
                "lessThan" => a < b,
                "greaterThanOrEqual" => a >= b,
                _ => a <= b,
            };
            Value::Bool(result)
        }
        "contains" | "startsWith" | "endsWith" => {
            let hay = as_string(&eval_opt(args.first(), ctx));
            let needle = as_string(&eval_opt(args.get(1), ctx));
            let result = match name {
                "contains" => hay.contains(&needle),
                "startsWith" => hay.starts_with(&needle),
                _ => hay.ends_with(&needle),
            };
            Value::Bool(result)
        }
        "isEmpty" | "isNotEmpty" => {
            let empty = value_is_empty(&eval_opt(args.first(), ctx));
            Value::Bool(if name == "isEmpty" { empty } else { !empty })
        }
        "length" | "count" => {
            let v = eval_opt(args.first(), ctx);
            let n = match &v {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Null => 0,
                _ => return Value::Null,
            };
            json!(n as f64)
        }
        "in" | "notIn" => {
            let needle = eval_opt(args.first(), ctx);
            let list = match eval_opt(args.get(1), ctx) {
                Value::Array(a) => a,
                _ => return Value::Bool(name == "notIn"),
            };
            let found = list.iter().any(|v| values_equal(v, &needle));
            Value::Bool(if name == "in" { found } else { !found })
        }
        "regex" => {
            let text = as_string(&eval_opt(args.first(), ctx));
            let pattern = as_string(&eval_opt(args.get(1), ctx));
            // An invalid pattern tests false rather than erroring
            match regex_lite::Regex::new(&pattern) {
                Ok(re) => Value::Bool(re.is_match(&text)),
                Err(_) => Value::Bool(false),
            }
        }
        "between" => {
            let (Some(v), Some(min), Some(max)) = (
                as_number(&eval_opt(args.first(), ctx)),
                as_number(&eval_opt(args.get(1), ctx)),
                as_number(&eval_opt(args.get(2), ctx)),
            ) else {
                return Value::Bool(false);
            };
            Value::Bool(min <= v && v <= max)
        }
        "isNumber" => Value::Bool(as_number(&eval_opt(args.first(), ctx)).is_some()),
        "isString" => Value::Bool(matches!(eval_opt(args.first(), ctx), Value::String(_))),
        "isArray" => Value::Bool(matches!(eval_opt(args.first(), ctx), Value::Array(_))),
        "sum" | "average" | "min" | "max" => {
            let Value::Array(items) = eval_opt(args.first(), ctx) else {
                return Value::Null;
            };
            let nums: Vec<f64> = items.iter().filter_map(as_number).collect();
            if nums.is_empty() {
                return Value::Null;
            }
            let result = match name {
                "sum" => nums.iter().sum(),
                "average" => nums.iter().sum::<f64>() / nums.len() as f64,
                "min" => nums.iter().cloned().fold(f64::INFINITY, f64::min),
                _ => nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            };
            json!(result)
        }
        _ => Value::Null,
    }
}

fn eval_opt(arg: Option<&Expr>, ctx: &EvalContext) -> Value {
    arg.map(|a| eval(a, ctx)).unwrap_or(Value::Null)
}

/// Choices of the question named by the first argument, or the evaluated
/// value coerced to a string list.
fn question_choices(arg: Option<&Expr>, ctx: &EvalContext) -> Vec<String> {
    if let Some(ident) = arg.and_then(|a| a.as_ident()) {
        if let Some(answer) = ctx.answer_by_name(ident) {
            return answer.choices().to_vec();
        }
    }
    arg_string_list(arg, ctx)
}

fn arg_string_list(arg: Option<&Expr>, ctx: &EvalContext) -> Vec<String> {
    match eval_opt(arg, ctx) {
        Value::Array(items) => items.iter().map(as_string).collect(),
        Value::Null => vec![],
        other => vec![as_string(&other)],
    }
}

/// Deep equality on arrays, strict equality otherwise.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Number(_), Value::Number(_)) => as_number(a) == as_number(b),
        _ => a == b,
    }
}

pub(crate) fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn value_is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
