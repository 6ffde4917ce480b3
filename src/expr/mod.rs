//! Condition evaluator
//!
//! Evaluates boolean predicate expressions against a trigger context: the
//! changed-field set, old/new field values of the mutated object, and the
//! actor identity. Evaluation is a pure function with no access to engine
//! state; anything the expression can see arrives through [`TriggerContext`].
//!
//! Identifier roots: `old.<field>`, `new.<field>`, `actor.id`, `event.type`,
//! plus the `changed("field")` membership function. Missing object fields
//! resolve to null rather than failing, so `new.status == "published"` is
//! safe on objects that never had a status.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use thiserror::Error;

use crate::types::{EventType, TriggerInput};

#[derive(Parser)]
#[grammar = "expr/condition.pest"]
struct ConditionParser;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("expression must evaluate to a boolean, got {0}")]
    NotBoolean(&'static str),
    #[error("cannot order {lhs} and {rhs} with '{op}'")]
    InvalidComparison {
        lhs: &'static str,
        rhs: &'static str,
        op: String,
    },
    #[error("value at '{0}' is not a comparable scalar")]
    UnsupportedValue(String),
}

/// Read-only view of a trigger event, the only state expressions can see.
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext<'a> {
    pub event_type: EventType,
    pub changed_fields: &'a HashSet<String>,
    pub old: &'a JsonValue,
    pub new: &'a JsonValue,
    pub actor_id: Option<&'a str>,
}

impl<'a> TriggerContext<'a> {
    pub fn from_input(input: &'a TriggerInput) -> Self {
        Self {
            event_type: input.event_type,
            changed_fields: &input.changed_fields,
            old: &input.old,
            new: &input.new,
            actor_id: input.actor_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Num(_) => "number",
        Value::Str(_) => "string",
    }
}

/// Evaluate an expression against a trigger context.
pub fn evaluate(expression: &str, ctx: &TriggerContext) -> Result<bool, ExprError> {
    let mut pairs = ConditionParser::parse(Rule::expression, expression)
        .map_err(|e| ExprError::Parse(e.to_string()))?;
    let root = pairs
        .next()
        .ok_or_else(|| ExprError::Parse("empty expression".to_string()))?;
    let or_pair = root
        .into_inner()
        .next()
        .ok_or_else(|| ExprError::Parse("empty expression".to_string()))?;

    match eval_or(or_pair, ctx)? {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::NotBoolean(type_name(&other))),
    }
}

/// Syntax check without evaluation, for registration-time validation.
pub fn check(expression: &str) -> Result<(), ExprError> {
    ConditionParser::parse(Rule::expression, expression)
        .map(|_| ())
        .map_err(|e| ExprError::Parse(e.to_string()))
}

fn eval_or(pair: Pair<Rule>, ctx: &TriggerContext) -> Result<Value, ExprError> {
    let mut inner = pair.into_inner();
    let mut acc = eval_and(inner.next().expect("or_expr has an operand"), ctx)?;

    while inner.next().is_some() {
        let rhs_pair = inner.next().expect("operator is followed by an operand");
        if as_bool(&acc)? {
            acc = Value::Bool(true);
            continue;
        }
        acc = Value::Bool(as_bool(&eval_and(rhs_pair, ctx)?)?);
    }

    Ok(acc)
}

fn eval_and(pair: Pair<Rule>, ctx: &TriggerContext) -> Result<Value, ExprError> {
    let mut inner = pair.into_inner();
    let mut acc = eval_not(inner.next().expect("and_expr has an operand"), ctx)?;

    while inner.next().is_some() {
        let rhs_pair = inner.next().expect("operator is followed by an operand");
        if !as_bool(&acc)? {
            acc = Value::Bool(false);
            continue;
        }
        acc = Value::Bool(as_bool(&eval_not(rhs_pair, ctx)?)?);
    }

    Ok(acc)
}

fn eval_not(pair: Pair<Rule>, ctx: &TriggerContext) -> Result<Value, ExprError> {
    let mut negations = 0usize;
    let mut comparison = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::not_op => negations += 1,
            _ => comparison = Some(part),
        }
    }

    let value = eval_comparison(comparison.expect("not_expr has a comparison"), ctx)?;
    if negations == 0 {
        return Ok(value);
    }

    let mut result = as_bool(&value)?;
    if negations % 2 == 1 {
        result = !result;
    }
    Ok(Value::Bool(result))
}

fn eval_comparison(pair: Pair<Rule>, ctx: &TriggerContext) -> Result<Value, ExprError> {
    let mut inner = pair.into_inner();
    let lhs = eval_operand(inner.next().expect("comparison has an operand"), ctx)?;

    let Some(op_pair) = inner.next() else {
        return Ok(lhs);
    };
    let op = op_pair.as_str();
    let rhs = eval_operand(inner.next().expect("operator is followed by an operand"), ctx)?;

    let result = match op {
        "==" => values_equal(&lhs, &rhs),
        "!=" => !values_equal(&lhs, &rhs),
        _ => ordered(&lhs, &rhs, op)?,
    };

    Ok(Value::Bool(result))
}

fn eval_operand(pair: Pair<Rule>, ctx: &TriggerContext) -> Result<Value, ExprError> {
    let part = pair.into_inner().next().expect("operand has content");
    match part.as_rule() {
        Rule::literal => eval_literal(part),
        Rule::function_call => eval_function(part, ctx),
        Rule::path => eval_path(part, ctx),
        Rule::grouped => {
            let or_pair = part.into_inner().next().expect("grouped wraps or_expr");
            eval_or(or_pair, ctx)
        }
        rule => Err(ExprError::Parse(format!("unexpected rule {rule:?}"))),
    }
}

fn eval_literal(pair: Pair<Rule>) -> Result<Value, ExprError> {
    let part = pair.into_inner().next().expect("literal has content");
    match part.as_rule() {
        Rule::string => Ok(Value::Str(unquote(part.as_str()))),
        Rule::number => part
            .as_str()
            .parse::<f64>()
            .map(Value::Num)
            .map_err(|e| ExprError::Parse(e.to_string())),
        Rule::boolean => Ok(Value::Bool(part.as_str() == "true")),
        Rule::null => Ok(Value::Null),
        rule => Err(ExprError::Parse(format!("unexpected literal {rule:?}"))),
    }
}

fn eval_function(pair: Pair<Rule>, ctx: &TriggerContext) -> Result<Value, ExprError> {
    let mut inner = pair.into_inner();
    let name = inner.next().expect("function has a name").as_str();
    let arg = unquote(inner.next().expect("function has an argument").as_str());

    match name {
        "changed" => Ok(Value::Bool(ctx.changed_fields.contains(&arg))),
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}

fn eval_path(pair: Pair<Rule>, ctx: &TriggerContext) -> Result<Value, ExprError> {
    let full = pair.as_str().to_string();
    let mut segments = pair.into_inner().map(|p| p.as_str().to_string());
    let root = segments.next().expect("path has a root");
    let rest: Vec<String> = segments.collect();

    match root.as_str() {
        "old" => lookup(ctx.old, &rest, &full),
        "new" => lookup(ctx.new, &rest, &full),
        "actor" => match rest.as_slice() {
            [field] if field == "id" => Ok(ctx
                .actor_id
                .map(|id| Value::Str(id.to_string()))
                .unwrap_or(Value::Null)),
            _ => Err(ExprError::UnknownIdentifier(full)),
        },
        "event" => match rest.as_slice() {
            [field] if field == "type" => Ok(Value::Str(ctx.event_type.as_str().to_string())),
            _ => Err(ExprError::UnknownIdentifier(full)),
        },
        _ => Err(ExprError::UnknownIdentifier(root)),
    }
}

fn lookup(root: &JsonValue, segments: &[String], full: &str) -> Result<Value, ExprError> {
    if segments.is_empty() {
        return Err(ExprError::UnsupportedValue(full.to_string()));
    }

    let mut current = root;
    for segment in segments {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Ok(Value::Null),
        }
    }

    match current {
        JsonValue::Null => Ok(Value::Null),
        JsonValue::Bool(b) => Ok(Value::Bool(*b)),
        JsonValue::Number(n) => Ok(Value::Num(n.as_f64().unwrap_or(f64::NAN))),
        JsonValue::String(s) => Ok(Value::Str(s.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => {
            Err(ExprError::UnsupportedValue(full.to_string()))
        }
    }
}

fn as_bool(value: &Value) -> Result<bool, ExprError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(ExprError::NotBoolean(type_name(other))),
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Num(a), Value::Num(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        _ => false,
    }
}

fn ordered(lhs: &Value, rhs: &Value, op: &str) -> Result<bool, ExprError> {
    let ordering = match (lhs, rhs) {
        (Value::Num(a), Value::Num(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => {
            return Err(ExprError::InvalidComparison {
                lhs: type_name(lhs),
                rhs: type_name(rhs),
                op: op.to_string(),
            })
        }
    };

    let Some(ordering) = ordering else {
        return Ok(false);
    };

    Ok(match op {
        "<" => ordering.is_lt(),
        "<=" => ordering.is_le(),
        ">" => ordering.is_gt(),
        ">=" => ordering.is_ge(),
        _ => false,
    })
}

fn unquote(raw: &str) -> String {
    raw[1..raw.len() - 1].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashset;
    use serde_json::json;

    fn ctx<'a>(
        changed: &'a HashSet<String>,
        old: &'a JsonValue,
        new: &'a JsonValue,
    ) -> TriggerContext<'a> {
        TriggerContext {
            event_type: EventType::Update,
            changed_fields: changed,
            old,
            new,
            actor_id: Some("usr_1"),
        }
    }

    fn eval(expression: &str) -> Result<bool, ExprError> {
        let changed = hashset! {"status".to_string()};
        let old = json!({"status": "draft", "score": 3});
        let new = json!({"status": "published", "score": 5});
        evaluate(expression, &ctx(&changed, &old, &new))
    }

    #[test]
    fn test_literals_and_boolean_operators() {
        assert!(eval("true").unwrap());
        assert!(!eval("false").unwrap());
        assert!(eval("true && true").unwrap());
        assert!(!eval("true && false").unwrap());
        assert!(eval("false || true").unwrap());
        assert!(eval("!false").unwrap());
        assert!(eval("!!true").unwrap());
        assert!(eval("!(true && false)").unwrap());
    }

    #[test]
    fn test_comparisons() {
        assert!(eval("1 == 1").unwrap());
        assert!(eval("1 != 2").unwrap());
        assert!(eval("2 > 1").unwrap());
        assert!(eval("1 <= 1.5").unwrap());
        assert!(eval("\"a\" < \"b\"").unwrap());
        assert!(eval("'single' == 'single'").unwrap());
        // Cross-type equality is false, not an error
        assert!(!eval("1 == \"1\"").unwrap());
        assert!(eval("1 != \"1\"").unwrap());
    }

    #[test]
    fn test_changed_function() {
        assert!(eval("changed(\"status\")").unwrap());
        assert!(!eval("changed(\"owner\")").unwrap());
    }

    #[test]
    fn test_old_new_paths() {
        assert!(eval("old.status == \"draft\"").unwrap());
        assert!(eval("new.status == \"published\"").unwrap());
        assert!(eval("old.status != new.status").unwrap());
        assert!(eval("new.score > old.score").unwrap());
        // Missing fields resolve to null
        assert!(eval("new.missing == null").unwrap());
    }

    #[test]
    fn test_actor_and_event() {
        assert!(eval("actor.id == \"usr_1\"").unwrap());
        assert!(eval("event.type == \"UPDATE\"").unwrap());
        assert!(!eval("event.type == \"CREATE\"").unwrap());
    }

    #[test]
    fn test_missing_actor_is_null() {
        let changed = HashSet::new();
        let old = json!({});
        let new = json!({});
        let mut context = ctx(&changed, &old, &new);
        context.actor_id = None;

        assert!(evaluate("actor.id == null", &context).unwrap());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(eval("new.status =="), Err(ExprError::Parse(_))));
        assert!(matches!(eval("&&"), Err(ExprError::Parse(_))));
        assert!(matches!(eval(""), Err(ExprError::Parse(_))));
    }

    #[test]
    fn test_unknown_identifiers() {
        assert!(matches!(
            eval("mystery.field == 1"),
            Err(ExprError::UnknownIdentifier(_))
        ));
        assert!(matches!(
            eval("actor.name == \"x\""),
            Err(ExprError::UnknownIdentifier(_))
        ));
        assert!(matches!(
            eval("missing(\"status\")"),
            Err(ExprError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_non_boolean_results_fail() {
        assert!(matches!(eval("new.status"), Err(ExprError::NotBoolean(_))));
        assert!(matches!(eval("1"), Err(ExprError::NotBoolean(_))));
        assert!(matches!(
            eval("new.status && true"),
            Err(ExprError::NotBoolean(_))
        ));
    }

    #[test]
    fn test_invalid_orderings_fail() {
        assert!(matches!(
            eval("new.status > 1"),
            Err(ExprError::InvalidComparison { .. })
        ));
        assert!(matches!(
            eval("true < false"),
            Err(ExprError::InvalidComparison { .. })
        ));
    }
}
