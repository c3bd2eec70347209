//! Piping: answer substitution inside template strings
//!
//! Tokens take the form `${pipe:question:<variableName>:<field>}` with
//! `field` one of response, text, choices, numeric, boolean. An unresolved
//! token is left literal, which makes interpolation a pure, idempotent
//! substitution.

use serde_json::Value;

use super::eval::EvalContext;
use crate::models::AnswerValue;

const TOKEN_PREFIX: &str = "${pipe:question:";

/// Interpolate every pipe token in `template` against the context.
pub fn interpolate(template: &str, ctx: &EvalContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(TOKEN_PREFIX) {
        out.push_str(&rest[..start]);
        let token_body = &rest[start + TOKEN_PREFIX.len()..];
        match token_body.find('}') {
            Some(end) => {
                let inner = &token_body[..end];
                match resolve_token(inner, ctx) {
                    Some(replacement) => out.push_str(&replacement),
                    None => {
                        // Leave the whole token literal
                        out.push_str(&rest[start..start + TOKEN_PREFIX.len() + end + 1]);
                    }
                }
                rest = &token_body[end + 1..];
            }
            None => {
                // No closing brace; emit the remainder untouched
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `inner` is `<variableName>:<field>`.
fn resolve_token(inner: &str, ctx: &EvalContext) -> Option<String> {
    let (variable, field) = inner.split_once(':')?;
    let question_id = ctx.question_id_map.get(variable)?;
    let answer = ctx.answers.get(question_id)?;
    render_field(answer, field)
}

fn render_field(answer: &AnswerValue, field: &str) -> Option<String> {
    match field {
        "response" | "text" => Some(scalar_to_string(&answer.primary_scalar())),
        "choices" => {
            let choices = answer.choices();
            if choices.is_empty() {
                Some(scalar_to_string(&answer.primary_scalar()))
            } else {
                Some(choices.join(", "))
            }
        }
        "numeric" => answer.as_number().map(|n| format_number(n)),
        "boolean" => match answer {
            AnswerValue::Boolean { boolean_value } => Some(boolean_value.to_string()),
            _ => None,
        },
        _ => None,
    }
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
