//! # Expression Evaluator
//!
//! Lenient evaluation of expression ASTs against a context and a lineage.
//! Gaps never fail: member access through `undefined` yields `undefined`,
//! calling something that is not a function yields `undefined`.

use std::cmp::Ordering;

use crate::expression::{BinaryOp, Expr, LogicalOp, UnaryOp};
use crate::value::{Lineage, Value};

pub fn evaluate(expr: &Expr, context: &Value, lineage: &Lineage) -> Value {
    match expr {
        Expr::Literal { value } => value.to_value(),
        Expr::Identifier { name } => context.property(name).resolve(),
        Expr::This => lineage.current().cloned().unwrap_or_default(),
        Expr::CurrentLevel { name } => lineage
            .current()
            .map(|frame| frame.property(name).resolve())
            .unwrap_or_default(),
        Expr::ParentLevel { name } => lineage
            .parent()
            .map(|frame| frame.property(name).resolve())
            .unwrap_or_default(),
        Expr::Member {
            object,
            property,
            computed,
        } => {
            let target = evaluate(object, context, lineage);
            member(&target, property, *computed, context, lineage)
        }
        Expr::Unary { operator, argument } => {
            unary(*operator, &evaluate(argument, context, lineage))
        }
        Expr::Binary {
            operator,
            left,
            right,
        } => binary(
            *operator,
            &evaluate(left, context, lineage),
            &evaluate(right, context, lineage),
        ),
        Expr::Logical {
            operator,
            left,
            right,
        } => {
            let left = evaluate(left, context, lineage);
            match (operator, left.truthy()) {
                (LogicalOp::And, true) | (LogicalOp::Or, false) => {
                    evaluate(right, context, lineage)
                }
                _ => left,
            }
        }
        Expr::Call { callee, arguments } => call(callee, arguments, context, lineage),
        Expr::Compound { body } => body
            .first()
            .map(|first| evaluate(first, context, lineage))
            .unwrap_or_default(),
    }
}

fn member(target: &Value, property: &Expr, computed: bool, context: &Value, lineage: &Lineage) -> Value {
    if target.is_nullish() {
        return Value::Undefined;
    }
    let key = if computed {
        evaluate(property, context, lineage).to_js_string()
    } else if let Expr::Identifier { name } = property {
        name.clone()
    } else {
        return Value::Undefined;
    };
    target.clone().resolve().property(&key).resolve()
}

fn call(callee: &Expr, arguments: &[Expr], context: &Value, lineage: &Lineage) -> Value {
    let (receiver, function) = match callee {
        Expr::Member {
            object,
            property,
            computed,
        } => {
            let receiver = evaluate(object, context, lineage);
            let function = member(&receiver, property, *computed, context, lineage);
            (receiver, function)
        }
        other => (Value::Undefined, evaluate(other, context, lineage)),
    };
    match function {
        Value::Function(f) => {
            let arguments: Vec<Value> = arguments
                .iter()
                .map(|argument| evaluate(argument, context, lineage))
                .collect();
            f(&receiver, &arguments)
        }
        _ => Value::Undefined,
    }
}

fn unary(operator: UnaryOp, argument: &Value) -> Value {
    match operator {
        UnaryOp::Plus => Value::Number(argument.to_number()),
        UnaryOp::Minus => Value::Number(-argument.to_number()),
        UnaryOp::BitNot => Value::Number(f64::from(!argument.to_int32())),
        UnaryOp::Not => Value::Bool(!argument.truthy()),
    }
}

fn binary(operator: BinaryOp, left: &Value, right: &Value) -> Value {
    match operator {
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::Ne => Value::Bool(!left.loose_equals(right)),
        BinaryOp::Gt => Value::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::Ge => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Lt => Value::Bool(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::Le => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::BitXor => Value::Number(f64::from(left.to_int32() ^ right.to_int32())),
        BinaryOp::BitAnd => Value::Number(f64::from(left.to_int32() & right.to_int32())),
        BinaryOp::BitOr => Value::Number(f64::from(left.to_int32() | right.to_int32())),
        BinaryOp::Shl => Value::Number(f64::from(
            left.to_int32().wrapping_shl(right.to_uint32() & 31),
        )),
        BinaryOp::Shr => Value::Number(f64::from(left.to_int32() >> (right.to_uint32() & 31))),
        BinaryOp::UShr => {
            Value::Number(f64::from(left.to_uint32() >> (right.to_uint32() & 31)))
        }
    }
}

fn add(left: &Value, right: &Value) -> Value {
    let (left, right) = (left.to_primitive(), right.to_primitive());
    if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
        let mut joined = left.to_js_string();
        joined.push_str(&right.to_js_string());
        Value::from(joined)
    } else {
        Value::Number(left.to_number() + right.to_number())
    }
}

/// Abstract relational comparison; `None` when either side is `NaN`.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left.to_primitive(), right.to_primitive()) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(&b)),
        (a, b) => a.to_number().partial_cmp(&b.to_number()),
    }
}
