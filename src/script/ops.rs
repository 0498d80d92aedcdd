//! Purpose: Operator semantics for lpy script values.
//! Exports: `binary`, `equals`, `compare`, `get_index`, `set_index`, `iterate`.
//! Role: Shared by the interpreter and builtins (`sum`, `sorted`, `min`, `max`).
//! Invariants: Integer arithmetic is checked; overflow is an error, never a wrap.
//! Invariants: Floor division and modulo round toward negative infinity.
use std::cmp::Ordering;

use super::ast::BinaryOp;
use super::runtime_error;
use crate::core::error::Error;
use crate::core::value::{Value, read_lock, write_lock};

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Int(n) => Some(Num::Int(*n)),
            Value::Bool(b) => Some(Num::Int(i64::from(*b))),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }
}

fn symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::FloorDiv => "//",
        BinaryOp::Mod => "%",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::Less => "<",
        BinaryOp::LessEqual => "<=",
        BinaryOp::Greater => ">",
        BinaryOp::GreaterEqual => ">=",
        BinaryOp::In => "in",
        BinaryOp::NotIn => "not in",
    }
}

fn unsupported(op: BinaryOp, left: &Value, right: &Value) -> Error {
    runtime_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        symbol(op),
        left.type_name(),
        right.type_name()
    ))
}

fn overflow() -> Error {
    runtime_error("integer overflow")
}

pub(crate) fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Error> {
    match op {
        BinaryOp::Equal => equals(left, right).map(Value::Bool),
        BinaryOp::NotEqual => equals(left, right).map(|equal| Value::Bool(!equal)),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            ordering(op, left, right).map(Value::Bool)
        }
        BinaryOp::In => contains(right, left).map(Value::Bool),
        BinaryOp::NotIn => contains(right, left).map(|found| Value::Bool(!found)),
        BinaryOp::Add => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (Value::List(a), Value::List(b)) => {
                let mut items = read_lock(a).clone();
                let tail = read_lock(b).clone();
                items.extend(tail);
                Ok(Value::list(items))
            }
            _ => arithmetic(op, left, right),
        },
        BinaryOp::Mul => match (left, right) {
            (Value::Str(s), count) | (count, Value::Str(s)) if count.as_int().is_some() => {
                Ok(Value::Str(s.repeat(repeat_count(count)?)))
            }
            (Value::List(items), count) | (count, Value::List(items))
                if count.as_int().is_some() =>
            {
                let items = read_lock(items).clone();
                let times = repeat_count(count)?;
                let mut out = Vec::with_capacity(items.len().saturating_mul(times));
                for _ in 0..times {
                    out.extend(items.iter().cloned());
                }
                Ok(Value::list(out))
            }
            _ => arithmetic(op, left, right),
        },
        BinaryOp::Sub | BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod => {
            arithmetic(op, left, right)
        }
    }
}

fn repeat_count(count: &Value) -> Result<usize, Error> {
    let count = count.as_int().unwrap_or(0).max(0);
    usize::try_from(count).map_err(|_| overflow())
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Error> {
    let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) else {
        return Err(unsupported(op, left, right));
    };
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => int_arithmetic(op, a, b),
        (a, b) => float_arithmetic(op, a.as_f64(), b.as_f64()),
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Result<Value, Error> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(runtime_error("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinaryOp::FloorDiv => {
            if b == 0 {
                return Err(runtime_error("integer division or modulo by zero"));
            }
            a.checked_div(b).map(|quotient| {
                if a % b != 0 && ((a < 0) != (b < 0)) {
                    quotient - 1
                } else {
                    quotient
                }
            })
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(runtime_error("integer division or modulo by zero"));
            }
            a.checked_rem(b).map(|rem| {
                if rem != 0 && ((rem < 0) != (b < 0)) {
                    rem + b
                } else {
                    rem
                }
            })
        }
        _ => None,
    };
    result.map(Value::Int).ok_or_else(overflow)
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> Result<Value, Error> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod if b == 0.0 => {
            return Err(runtime_error("float division by zero"));
        }
        BinaryOp::Div => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        BinaryOp::Mod => a - b * (a / b).floor(),
        _ => return Err(runtime_error(format!("unsupported float operator {}", symbol(op)))),
    };
    Ok(Value::Float(result))
}

/// `==` for script values; comparisons that nest too deeply are an error.
pub(crate) fn equals(left: &Value, right: &Value) -> Result<bool, Error> {
    left.equals(right)
        .ok_or_else(|| runtime_error("maximum recursion depth exceeded in comparison"))
}

/// Total order used by comparisons, `sorted`, `min` and `max`.
pub(crate) fn compare(left: &Value, right: &Value) -> Result<Ordering, Error> {
    if let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) {
        return Ok(match (a, b) {
            (Num::Int(a), Num::Int(b)) => a.cmp(&b),
            (a, b) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal),
        });
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        _ => Err(runtime_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn ordering(op: BinaryOp, left: &Value, right: &Value) -> Result<bool, Error> {
    // NaN compares false against everything.
    let is_nan = |value: &Value| matches!(value, Value::Float(f) if f.is_nan());
    if is_nan(left) || is_nan(right) {
        return Ok(false);
    }
    let order = compare(left, right).map_err(|_| {
        runtime_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            symbol(op),
            left.type_name(),
            right.type_name()
        ))
    })?;
    Ok(match op {
        BinaryOp::Less => order == Ordering::Less,
        BinaryOp::LessEqual => order != Ordering::Greater,
        BinaryOp::Greater => order == Ordering::Greater,
        _ => order != Ordering::Less,
    })
}

fn contains(container: &Value, item: &Value) -> Result<bool, Error> {
    match container {
        Value::List(items) => {
            let snapshot = read_lock(items).clone();
            for candidate in &snapshot {
                if equals(candidate, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Dict(entries) => Ok(match item {
            Value::Str(key) => read_lock(entries).contains_key(key),
            _ => false,
        }),
        Value::Str(text) => match item {
            Value::Str(needle) => Ok(text.contains(needle.as_str())),
            other => Err(runtime_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Module(namespace) => Ok(match item {
            Value::Str(key) => namespace.contains(key),
            _ => false,
        }),
        other => Err(runtime_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: &Value, len: usize, what: &str) -> Result<usize, Error> {
    let Some(raw) = index.as_int() else {
        return Err(runtime_error(format!(
            "{what} indices must be integers, not {}",
            index.type_name()
        )));
    };
    let len = i64::try_from(len).map_err(|_| overflow())?;
    let resolved = if raw < 0 { raw + len } else { raw };
    if resolved < 0 || resolved >= len {
        return Err(runtime_error(format!("{what} index out of range")));
    }
    usize::try_from(resolved).map_err(|_| overflow())
}

pub(crate) fn get_index(target: &Value, index: &Value) -> Result<Value, Error> {
    match target {
        Value::List(items) => {
            let items = read_lock(items);
            let position = normalize_index(index, items.len(), "list")?;
            Ok(items[position].clone())
        }
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            let position = normalize_index(index, chars.len(), "string")?;
            Ok(Value::Str(chars[position].to_string()))
        }
        Value::Dict(entries) => {
            let Value::Str(key) = index else {
                return Err(runtime_error(format!(
                    "dict keys must be str, not {}",
                    index.type_name()
                )));
            };
            read_lock(entries)
                .get(key)
                .cloned()
                .ok_or_else(|| runtime_error(format!("key not found: {key:?}")))
        }
        other => Err(runtime_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub(crate) fn set_index(target: &Value, index: &Value, value: Value) -> Result<(), Error> {
    match target {
        Value::List(items) => {
            let mut items = write_lock(items);
            let position = normalize_index(index, items.len(), "list assignment")?;
            items[position] = value;
            Ok(())
        }
        Value::Dict(entries) => {
            let Value::Str(key) = index else {
                return Err(runtime_error(format!(
                    "dict keys must be str, not {}",
                    index.type_name()
                )));
            };
            write_lock(entries).insert(key.clone(), value);
            Ok(())
        }
        other => Err(runtime_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// Snapshot of the items a `for` loop visits.
pub(crate) fn iterate(value: &Value) -> Result<Vec<Value>, Error> {
    match value {
        Value::List(items) => Ok(read_lock(items).clone()),
        Value::Dict(entries) => Ok(read_lock(entries).keys().cloned().map(Value::Str).collect()),
        Value::Str(text) => Ok(text.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => Err(runtime_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}
