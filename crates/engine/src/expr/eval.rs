//! Tree-walking evaluator with JavaScript-flavoured coercions.
//!
//! `None` stands for `undefined`. Member access on `null`/`undefined` yields
//! `undefined` instead of failing.

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde_json::{Map, Number, Value};

use super::{
    ExprContext, ExprError, MAX_EXPRESSION_DEPTH,
    parser::{BinaryOp, Expr, UnaryOp},
};

/// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub(crate) fn evaluate(expr: &Expr, context: &dyn ExprContext) -> Result<Option<Value>, ExprError> {
    Evaluator { context, depth: 0 }.eval(expr)
}

/// Converts an f64 into a JSON number, preferring integers; non-finite values become `null`.
pub(crate) fn number_value(number: f64) -> Value {
    if !number.is_finite() {
        return Value::Null;
    }
    if number.fract() == 0.0 && number.abs() <= MAX_SAFE_INTEGER {
        return Value::from(number as i64);
    }
    Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
}

pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn to_number(value: Option<&Value>) -> f64 {
    match value {
        None => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(flag)) => f64::from(u8::from(*flag)),
        Some(Value::Number(number)) => number.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() { 0.0 } else { trimmed.parse().unwrap_or(f64::NAN) }
        }
        Some(Value::Array(_)) | Some(Value::Object(_)) => f64::NAN,
    }
}

fn to_text(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| if item.is_null() { String::new() } else { to_text(Some(item)) })
            .collect::<Vec<_>>()
            .join(","),
        Some(other) => other.to_string(),
    }
}

fn strict_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn loose_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    let nullish = |value: Option<&Value>| matches!(value, None | Some(Value::Null));
    if nullish(left) || nullish(right) {
        return nullish(left) && nullish(right);
    }
    match (left, right) {
        (Some(Value::Number(_)), Some(Value::String(_)) | Some(Value::Bool(_)))
        | (Some(Value::String(_)) | Some(Value::Bool(_)), Some(Value::Number(_)))
        | (Some(Value::Bool(_)), Some(Value::String(_)))
        | (Some(Value::String(_)), Some(Value::Bool(_))) => to_number(left) == to_number(right),
        _ => strict_equal(left, right),
    }
}

fn member(target: Option<&Value>, property: &str) -> Option<Value> {
    match target? {
        Value::Array(items) if property == "length" => Some(Value::from(items.len())),
        Value::String(text) if property == "length" => Some(Value::from(text.chars().count())),
        Value::Array(items) => property.parse::<usize>().ok().and_then(|index| items.get(index).cloned()),
        Value::Object(map) => map.get(property).cloned(),
        _ => None,
    }
}

fn index(target: Option<&Value>, key: Option<&Value>) -> Option<Value> {
    match (target?, key?) {
        (Value::Array(items), Value::Number(number)) => {
            let position = number.as_f64()?;
            if position < 0.0 || position.fract() != 0.0 {
                return None;
            }
            items.get(position as usize).cloned()
        }
        (Value::String(text), Value::Number(number)) => {
            let position = number.as_f64()?;
            if position < 0.0 || position.fract() != 0.0 {
                return None;
            }
            text.chars().nth(position as usize).map(|ch| Value::String(ch.to_string()))
        }
        (target, key) => member(Some(target), &to_text(Some(key))),
    }
}

fn builtin_constant(object: &Expr, property: &str) -> Option<Value> {
    match (object, property) {
        (Expr::Identifier(name), "PI") if name == "Math" => Some(number_value(std::f64::consts::PI)),
        (Expr::Identifier(name), "E") if name == "Math" => Some(number_value(std::f64::consts::E)),
        _ => None,
    }
}

struct Evaluator<'a> {
    context: &'a dyn ExprContext,
    depth: usize,
}

impl Evaluator<'_> {
    fn eval(&mut self, expr: &Expr) -> Result<Option<Value>, ExprError> {
        self.depth += 1;
        if self.depth > MAX_EXPRESSION_DEPTH * 4 {
            return Err(ExprError::TooDeep);
        }
        let result = self.eval_inner(expr);
        self.depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expr) -> Result<Option<Value>, ExprError> {
        match expr {
            Expr::Literal(value) => Ok(Some(value.clone())),
            Expr::Undefined => Ok(None),
            Expr::Identifier(name) => self
                .context
                .lookup(name)
                .map(Some)
                .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
            Expr::Array(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval(element)?.unwrap_or(Value::Null));
                }
                Ok(Some(Value::Array(items)))
            }
            Expr::Object(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    if let Some(value) = self.eval(value)? {
                        map.insert(key.clone(), value);
                    }
                }
                Ok(Some(Value::Object(map)))
            }
            Expr::Member { object, property } => {
                if let Some(constant) = builtin_constant(object, property) {
                    return Ok(Some(constant));
                }
                let target = self.eval(object)?;
                Ok(member(target.as_ref(), property))
            }
            Expr::Index { object, index: key } => {
                let target = self.eval(object)?;
                let key = self.eval(key)?;
                Ok(index(target.as_ref(), key.as_ref()))
            }
            Expr::Call { callee, args } => self.call(callee, args),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(Some(match op {
                    UnaryOp::Not => Value::Bool(!truthy(value.as_ref())),
                    UnaryOp::Negate => number_value(-to_number(value.as_ref())),
                    UnaryOp::Plus => number_value(to_number(value.as_ref())),
                }))
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if truthy(self.eval(test)?.as_ref()) {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Option<Value>, ExprError> {
        let lhs = self.eval(left)?;
        match op {
            BinaryOp::And => return if truthy(lhs.as_ref()) { self.eval(right) } else { Ok(lhs) },
            BinaryOp::Or => return if truthy(lhs.as_ref()) { Ok(lhs) } else { self.eval(right) },
            BinaryOp::Coalesce => {
                return match lhs {
                    None | Some(Value::Null) => self.eval(right),
                    present => Ok(present),
                };
            }
            _ => {}
        }

        let rhs = self.eval(right)?;
        let (a, b) = (lhs.as_ref(), rhs.as_ref());
        let value = match op {
            BinaryOp::Add => {
                let textual = |value: Option<&Value>| matches!(value, Some(Value::String(_) | Value::Array(_) | Value::Object(_)));
                if textual(a) || textual(b) {
                    Value::String(format!("{}{}", to_text(a), to_text(b)))
                } else {
                    number_value(to_number(a) + to_number(b))
                }
            }
            BinaryOp::Sub => number_value(to_number(a) - to_number(b)),
            BinaryOp::Mul => number_value(to_number(a) * to_number(b)),
            BinaryOp::Div => number_value(to_number(a) / to_number(b)),
            BinaryOp::Rem => number_value(to_number(a) % to_number(b)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => Value::Bool(compare(op, a, b)),
            BinaryOp::Eq => Value::Bool(loose_equal(a, b)),
            BinaryOp::Ne => Value::Bool(!loose_equal(a, b)),
            BinaryOp::StrictEq => Value::Bool(strict_equal(a, b)),
            BinaryOp::StrictNe => Value::Bool(!strict_equal(a, b)),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce => unreachable!("short-circuit operators return early"),
        };
        Ok(Some(value))
    }

    fn call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Option<Value>, ExprError> {
        let Expr::Member { object, property } = callee else {
            return Err(ExprError::UnsupportedCall(describe_callee(callee)));
        };
        let Expr::Identifier(namespace) = object.as_ref() else {
            return Err(ExprError::UnsupportedCall(describe_callee(callee)));
        };

        let mut numbers = Vec::with_capacity(args.len());
        for arg in args {
            numbers.push(to_number(self.eval(arg)?.as_ref()));
        }
        let first = numbers.first().copied().unwrap_or(f64::NAN);

        let result = match (namespace.as_str(), property.as_str()) {
            ("Math", "abs") => number_value(first.abs()),
            ("Math", "ceil") => number_value(first.ceil()),
            ("Math", "floor") => number_value(first.floor()),
            ("Math", "round") => number_value((first + 0.5).floor()),
            ("Math", "trunc") => number_value(first.trunc()),
            ("Math", "sign") => number_value(if first == 0.0 || first.is_nan() { first } else { first.signum() }),
            ("Math", "sqrt") => number_value(first.sqrt()),
            ("Math", "pow") => number_value(first.powf(numbers.get(1).copied().unwrap_or(f64::NAN))),
            ("Math", "min") => number_value(numbers.iter().copied().fold(f64::INFINITY, f64::min)),
            ("Math", "max") => number_value(numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            ("Math", "random") => number_value(rand::thread_rng().r#gen::<f64>()),
            ("Date", "now") => Value::from(Utc::now().timestamp_millis()),
            ("Date", "iso") => Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            _ => return Err(ExprError::UnsupportedCall(format!("{namespace}.{property}"))),
        };
        Ok(Some(result))
    }
}

fn compare(op: BinaryOp, a: Option<&Value>, b: Option<&Value>) -> bool {
    if let (Some(Value::String(left)), Some(Value::String(right))) = (a, b) {
        return match op {
            BinaryOp::Lt => left < right,
            BinaryOp::Le => left <= right,
            BinaryOp::Gt => left > right,
            _ => left >= right,
        };
    }
    let (left, right) = (to_number(a), to_number(b));
    match op {
        BinaryOp::Lt => left < right,
        BinaryOp::Le => left <= right,
        BinaryOp::Gt => left > right,
        _ => left >= right,
    }
}

fn describe_callee(callee: &Expr) -> String {
    match callee {
        Expr::Identifier(name) => name.clone(),
        Expr::Member { property, .. } => property.clone(),
        _ => "expression".to_string(),
    }
}
