//! Expression evaluation.
//!
//! Evaluation is synchronous and total over the scope: unknown names and
//! members produce [`Value::Undefined`]. Errors only arise from unknown
//! filters, failing filters, calls on values that are not functions, and
//! bad arguments to built-in functions.

use stencil_core::error::{StencilError, StencilResult};

use crate::context::{Scope, Value};
use crate::expr::{BinaryOp, Expr, Expression, ExpressionKind, FilterCall, TemplatePart, UnaryOp};
use crate::filters::FilterResolver;

/// Upper bound on the length of lists produced by `range()`.
const MAX_RANGE_LEN: i64 = 100_000;

impl Expression {
    /// Evaluates the expression and its filter chain.
    pub fn evaluate(&self, scope: &Scope, filters: &dyn FilterResolver) -> StencilResult<Value> {
        let value = self.evaluate_base(scope, filters)?;
        self.apply_filters(value, scope, filters)
    }

    /// Evaluates the expression without its filters.
    pub fn evaluate_base(&self, scope: &Scope, filters: &dyn FilterResolver) -> StencilResult<Value> {
        match &self.kind {
            ExpressionKind::Literal(value) => Ok(value.clone()),
            ExpressionKind::Path(path) => Ok(path.resolve(scope)),
            ExpressionKind::Dynamic(expr) => {
                evaluate(expr, scope, filters).map_err(|e| e.or_span(self.span))
            }
        }
    }

    /// Runs the filter chain over an already evaluated value.
    pub fn apply_filters(
        &self,
        value: Value,
        scope: &Scope,
        filters: &dyn FilterResolver,
    ) -> StencilResult<Value> {
        apply_chain(&self.filters, value, scope, filters)
    }
}

/// Applies `chain` left to right. `safe` marks the value safe.
pub fn apply_chain(
    chain: &[FilterCall],
    mut value: Value,
    scope: &Scope,
    filters: &dyn FilterResolver,
) -> StencilResult<Value> {
    for call in chain {
        if call.name == "safe" {
            value = value.mark_safe();
            continue;
        }
        let filter = filters.resolve_filter(&call.name).ok_or_else(|| {
            StencilError::render_at(format!("unknown filter `{}`", call.name), &call.name, call.span)
        })?;
        let args = call
            .args
            .iter()
            .map(|arg| evaluate(arg, scope, filters))
            .collect::<StencilResult<Vec<_>>>()?;
        value = filter.apply(&value, &args).map_err(|e| e.or_span(call.span))?;
    }
    Ok(value)
}

/// Evaluates an expression tree.
#[allow(clippy::cast_precision_loss)]
pub fn evaluate(expr: &Expr, scope: &Scope, filters: &dyn FilterResolver) -> StencilResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(path) => Ok(path.resolve(scope)),
        Expr::Member { object, property } => {
            Ok(evaluate(object, scope, filters)?.get_member(property))
        }
        Expr::Index { object, index } => {
            let object = evaluate(object, scope, filters)?;
            let index = evaluate(index, scope, filters)?;
            Ok(object.get_item(&index))
        }
        Expr::Call { callee, args, span } => {
            if callee.segments.is_empty() && callee.root == "range" && scope.resolve("range").is_none()
            {
                let args = evaluate_all(args, scope, filters)?;
                return range(&args).map_err(|e| e.or_span(*span));
            }
            if scope.resolve(&callee.root).is_none() {
                return Ok(Value::Undefined);
            }
            Err(StencilError::render_at(
                format!("`{callee}` is not a function"),
                callee.to_string(),
                *span,
            ))
        }
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, scope, filters)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!value.is_truthy()),
                UnaryOp::Neg => match value {
                    Value::Integer(i) => i.checked_neg().map_or(Value::Float(-(i as f64)), Value::Integer),
                    other => Value::Float(-other.to_number()),
                },
                UnaryOp::Plus => match value {
                    Value::Integer(i) => Value::Integer(i),
                    other => Value::Float(other.to_number()),
                },
            })
        }
        Expr::Binary { op, left, right } => {
            let left = evaluate(left, scope, filters)?;
            let right = evaluate(right, scope, filters)?;
            Ok(binary(*op, &left, &right))
        }
        Expr::And(left, right) => {
            let left = evaluate(left, scope, filters)?;
            if left.is_truthy() {
                evaluate(right, scope, filters)
            } else {
                Ok(left)
            }
        }
        Expr::Or(left, right) => {
            let left = evaluate(left, scope, filters)?;
            if left.is_truthy() {
                Ok(left)
            } else {
                evaluate(right, scope, filters)
            }
        }
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            if evaluate(condition, scope, filters)?.is_truthy() {
                evaluate(then, scope, filters)
            } else {
                evaluate(otherwise, scope, filters)
            }
        }
        Expr::List(items) => evaluate_all(items, scope, filters).map(Value::List),
        Expr::Map(entries) => entries
            .iter()
            .map(|(key, value)| -> StencilResult<(String, Value)> {
                Ok((key.clone(), evaluate(value, scope, filters)?))
            })
            .collect::<StencilResult<_>>()
            .map(Value::Map),
        Expr::Template(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    TemplatePart::Text(text) => out.push_str(text),
                    TemplatePart::Expr(expr) => {
                        out.push_str(&evaluate(expr, scope, filters)?.to_display_string());
                    }
                }
            }
            Ok(Value::String(out))
        }
        Expr::Filtered { input, filters: chain } => {
            let value = evaluate(input, scope, filters)?;
            apply_chain(chain, value, scope, filters)
        }
    }
}

fn evaluate_all(exprs: &[Expr], scope: &Scope, filters: &dyn FilterResolver) -> StencilResult<Vec<Value>> {
    exprs.iter().map(|e| evaluate(e, scope, filters)).collect()
}

#[allow(clippy::cast_precision_loss)]
fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            if left.is_string() || right.is_string() || is_collection(left) || is_collection(right) {
                let mut s = left.to_display_string();
                s.push_str(&right.to_display_string());
                return Value::String(s);
            }
            arithmetic(left, right, i64::checked_add, |a, b| a + b)
        }
        BinaryOp::Sub => arithmetic(left, right, i64::checked_sub, |a, b| a - b),
        BinaryOp::Mul => arithmetic(left, right, i64::checked_mul, |a, b| a * b),
        BinaryOp::Div => Value::Float(left.to_number() / right.to_number()),
        BinaryOp::Rem => match (left, right) {
            (Value::Integer(a), Value::Integer(b)) if *b != 0 => {
                a.checked_rem(*b).map_or(Value::Float(*a as f64 % *b as f64), Value::Integer)
            }
            _ => Value::Float(left.to_number() % right.to_number()),
        },
        BinaryOp::Eq => Value::Bool(left.loose_eq(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_eq(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_eq(right)),
        BinaryOp::Lt => Value::Bool(left.compare(right).is_some_and(|o| o.is_lt())),
        BinaryOp::Gt => Value::Bool(left.compare(right).is_some_and(|o| o.is_gt())),
        BinaryOp::Le => Value::Bool(left.compare(right).is_some_and(|o| o.is_le())),
        BinaryOp::Ge => Value::Bool(left.compare(right).is_some_and(|o| o.is_ge())),
        BinaryOp::In => Value::Bool(right.contains(left)),
    }
}

const fn is_collection(value: &Value) -> bool {
    matches!(value, Value::List(_) | Value::Map(_))
}

fn arithmetic(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        if let Some(result) = int_op(*a, *b) {
            return Value::Integer(result);
        }
    }
    Value::Float(float_op(left.to_number(), right.to_number()))
}

/// `range(end)`, `range(start, end)` or `range(start, end, step)`.
fn range(args: &[Value]) -> StencilResult<Value> {
    let ints = args
        .iter()
        .map(|arg| {
            arg.as_integer()
                .ok_or_else(|| StencilError::render("range() expects integers", arg.to_display_string()))
        })
        .collect::<StencilResult<Vec<_>>>()?;
    let (start, end, step) = match ints.as_slice() {
        [end] => (0, *end, 1),
        [start, end] => (*start, *end, 1),
        [start, end, step] => (*start, *end, *step),
        _ => return Err(StencilError::render("range() takes 1 to 3 arguments", "range")),
    };
    if step == 0 {
        return Err(StencilError::render("range() step must not be zero", "range"));
    }
    let len = if (step > 0 && start >= end) || (step < 0 && start <= end) {
        0
    } else {
        (end.abs_diff(start) - 1) / step.unsigned_abs() + 1
    };
    if len > MAX_RANGE_LEN.unsigned_abs() {
        return Err(StencilError::render("range() is too large", "range"));
    }
    let mut items = Vec::new();
    let mut current = start;
    for _ in 0..len {
        items.push(Value::Integer(current));
        current = current.saturating_add(step);
    }
    Ok(Value::List(items))
}
