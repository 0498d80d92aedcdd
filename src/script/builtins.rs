//! Purpose: Native functions and container methods available to lpy script.
//! Exports: `lookup`, `method`.
//! Role: Last scope consulted by name lookup; backs attribute access on lists, dicts and strings.
//! Invariants: `print`/`eprint` write only through the execution context's output capture.
//! Invariants: Arity is checked before a native body runs.
use std::collections::HashMap;
use std::sync::OnceLock;

use super::ops;
use super::runtime_error;
use crate::core::error::Error;
use crate::core::evaluator::ExecContext;
use crate::core::output::Stream;
use crate::core::value::{Callable, Value, read_lock, write_lock};

const MAX_RANGE_LEN: i64 = 10_000_000;

type NativeFn = fn(Vec<Value>, &mut ExecContext<'_>) -> Result<Value, Error>;

struct NativeFunction {
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    body: NativeFn,
}

impl Callable for NativeFunction {
    fn name(&self) -> &str {
        self.name
    }

    fn call(&self, args: Vec<Value>, ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
        check_arity(self.name, args.len(), self.min_args, self.max_args)?;
        (self.body)(args, ctx)
    }
}

fn check_arity(name: &str, given: usize, min: usize, max: Option<usize>) -> Result<(), Error> {
    let ok = given >= min && max.is_none_or(|max| given <= max);
    if ok {
        return Ok(());
    }
    let expected = match max {
        Some(max) if max == min => format!("exactly {min}"),
        Some(max) => format!("{min} to {max}"),
        None => format!("at least {min}"),
    };
    Err(runtime_error(format!(
        "{name}() takes {expected} argument(s) ({given} given)"
    )))
}

fn table() -> &'static HashMap<&'static str, Value> {
    static TABLE: OnceLock<HashMap<&'static str, Value>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let natives: [(&'static str, usize, Option<usize>, NativeFn); 21] = [
            ("print", 0, None, print),
            ("eprint", 0, None, eprint),
            ("len", 1, Some(1), len),
            ("str", 0, Some(1), to_str),
            ("repr", 1, Some(1), repr),
            ("int", 1, Some(1), to_int),
            ("float", 1, Some(1), to_float),
            ("bool", 0, Some(1), to_bool),
            ("type", 1, Some(1), type_of),
            ("range", 1, Some(3), range),
            ("abs", 1, Some(1), abs),
            ("min", 1, None, min),
            ("max", 1, None, max),
            ("sum", 1, Some(2), sum),
            ("sorted", 1, Some(1), sorted),
            ("keys", 1, Some(1), keys),
            ("values", 1, Some(1), values),
            ("dir", 1, Some(1), dir),
            ("getattr", 2, Some(3), getattr),
            ("import_module", 1, Some(1), import_module),
            ("register_module", 2, Some(3), register_module),
        ];
        natives
            .into_iter()
            .map(|(name, min_args, max_args, body)| {
                let native = NativeFunction {
                    name,
                    min_args,
                    max_args,
                    body,
                };
                (name, Value::function(native))
            })
            .collect()
    })
}

pub(crate) fn lookup(name: &str) -> Option<Value> {
    table().get(name).cloned()
}

fn write_joined(args: &[Value], stream: Stream, ctx: &ExecContext<'_>) {
    let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
    let mut line = rendered.join(" ");
    line.push('\n');
    ctx.write(stream, &line);
}

fn print(args: Vec<Value>, ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    write_joined(&args, Stream::Stdout, ctx);
    Ok(Value::None)
}

fn eprint(args: Vec<Value>, ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    write_joined(&args, Stream::Stderr, ctx);
    Ok(Value::None)
}

fn first(args: Vec<Value>) -> Value {
    args.into_iter().next().unwrap_or_default()
}

fn expect_str<'v>(value: &'v Value, what: &str) -> Result<&'v str, Error> {
    value.as_str().ok_or_else(|| {
        runtime_error(format!(
            "{what} must be str, not {}",
            value.type_name()
        ))
    })
}

fn expect_int(value: &Value, what: &str) -> Result<i64, Error> {
    value.as_int().ok_or_else(|| {
        runtime_error(format!(
            "{what} must be int, not {}",
            value.type_name()
        ))
    })
}

fn len(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    let value = first(args);
    let length = match &value {
        Value::Str(text) => text.chars().count(),
        Value::List(items) => read_lock(items).len(),
        Value::Dict(entries) => read_lock(entries).len(),
        other => {
            return Err(runtime_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )));
        }
    };
    i64::try_from(length)
        .map(Value::Int)
        .map_err(|_| runtime_error("length out of range"))
}

fn to_str(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    if args.is_empty() {
        return Ok(Value::Str(String::new()));
    }
    Ok(Value::Str(first(args).to_string()))
}

fn repr(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    Ok(Value::Str(first(args).repr()))
}

fn to_int(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    match first(args) {
        Value::Int(n) => Ok(Value::Int(n)),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) => {
            if !f.is_finite() || f.trunc() < i64::MIN as f64 || f.trunc() >= i64::MAX as f64 {
                return Err(runtime_error(format!("cannot convert float {f} to integer")));
            }
            Ok(Value::Int(f.trunc() as i64))
        }
        Value::Str(text) => text
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| runtime_error(format!("invalid literal for int(): {text:?}"))),
        other => Err(runtime_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    match first(args) {
        Value::Int(n) => Ok(Value::Float(n as f64)),
        Value::Bool(b) => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Str(text) => text
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| runtime_error(format!("could not convert string to float: {text:?}"))),
        other => Err(runtime_error(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_bool(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    Ok(Value::Bool(first(args).is_truthy()))
}

fn type_of(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    Ok(Value::str(first(args).type_name()))
}

fn range(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    let bounds = args
        .iter()
        .map(|arg| expect_int(arg, "range() argument"))
        .collect::<Result<Vec<i64>, Error>>()?;
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(runtime_error("range() takes 1 to 3 arguments")),
    };
    if step == 0 {
        return Err(runtime_error("range() step must not be zero"));
    }
    let span = if step > 0 {
        stop.saturating_sub(start)
    } else {
        start.saturating_sub(stop)
    };
    let count = if span <= 0 {
        0
    } else {
        let step_abs = step.saturating_abs();
        span / step_abs + i64::from(span % step_abs != 0)
    };
    if count > MAX_RANGE_LEN {
        return Err(runtime_error(format!(
            "range() of {count} items exceeds the limit of {MAX_RANGE_LEN}"
        )));
    }
    let items = (0..count)
        .map(|i| Value::Int(start + i * step))
        .collect();
    Ok(Value::list(items))
}

fn abs(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    match first(args) {
        Value::Int(n) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| runtime_error("integer overflow")),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(runtime_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

/// A single list argument is unpacked; otherwise the arguments themselves are the items.
fn candidates(args: Vec<Value>) -> Vec<Value> {
    if let [Value::List(items)] = args.as_slice() {
        return read_lock(items).clone();
    }
    args
}

fn extreme(name: &str, args: Vec<Value>, keep_right: std::cmp::Ordering) -> Result<Value, Error> {
    let mut items = candidates(args).into_iter();
    let Some(mut best) = items.next() else {
        return Err(runtime_error(format!("{name}() arg is an empty sequence")));
    };
    for item in items {
        if ops::compare(&item, &best)? == keep_right {
            best = item;
        }
    }
    Ok(best)
}

fn min(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    extreme("min", args, std::cmp::Ordering::Less)
}

fn max(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    extreme("max", args, std::cmp::Ordering::Greater)
}

fn sum(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    let mut args = args.into_iter();
    let iterable = args.next().unwrap_or_default();
    let mut total = args.next().unwrap_or(Value::Int(0));
    for item in ops::iterate(&iterable)? {
        total = ops::binary(super::ast::BinaryOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn sorted(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    let mut items = ops::iterate(&first(args))?;
    let mut failure = None;
    items.sort_by(|a, b| match ops::compare(a, b) {
        Ok(order) => order,
        Err(err) => {
            failure.get_or_insert(err);
            std::cmp::Ordering::Equal
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(Value::list(items)),
    }
}

fn keys(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    call_method(&first(args), "keys", Vec::new())
}

fn values(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    call_method(&first(args), "values", Vec::new())
}

fn dir(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    let mut names: Vec<String> = match first(args) {
        Value::Module(namespace) => namespace.keys(),
        Value::Dict(entries) => read_lock(&entries).keys().cloned().collect(),
        other => method_names(&other).iter().map(|name| name.to_string()).collect(),
    };
    names.sort();
    Ok(Value::list(names.into_iter().map(Value::Str).collect()))
}

fn getattr(args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    let mut args = args.into_iter();
    let target = args.next().unwrap_or_default();
    let name = args.next().unwrap_or_default();
    let fallback = args.next();
    let name = expect_str(&name, "attribute name")?;
    let found = match &target {
        Value::Module(namespace) => namespace.get(name),
        other => method(other, name),
    };
    match (found, fallback) {
        (Some(value), _) => Ok(value),
        (None, Some(fallback)) => Ok(fallback),
        (None, None) => Err(runtime_error(format!(
            "'{}' object has no attribute '{name}'",
            target.type_name()
        ))),
    }
}

fn import_module(args: Vec<Value>, ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    let name = first(args);
    let name = expect_str(&name, "module name")?;
    ctx.import(name).map(Value::Module)
}

/// `register_module(name, content, filepath="")`
fn register_module(args: Vec<Value>, ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
    let name = expect_str(&args[0], "module name")?;
    let content = expect_str(&args[1], "module content")?;
    let filepath = match args.get(2) {
        Some(value) => expect_str(value, "module filepath")?,
        None => "",
    };
    ctx.modules.registry().register(name, content, filepath);
    Ok(Value::None)
}

fn method_names(receiver: &Value) -> &'static [&'static str] {
    match receiver {
        Value::List(_) => &["append", "extend", "index", "pop"],
        Value::Dict(_) => &["get", "items", "keys", "pop", "values"],
        Value::Str(_) => &[
            "endswith",
            "join",
            "lower",
            "replace",
            "split",
            "startswith",
            "strip",
            "upper",
        ],
        _ => &[],
    }
}

struct BoundMethod {
    label: String,
    receiver: Value,
    method: &'static str,
}

impl Callable for BoundMethod {
    fn name(&self) -> &str {
        &self.label
    }

    fn call(&self, args: Vec<Value>, _ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
        call_method(&self.receiver, self.method, args)
    }
}

/// Binds `name` on a list, dict or string receiver.
pub(crate) fn method(receiver: &Value, name: &str) -> Option<Value> {
    let method = method_names(receiver)
        .iter()
        .copied()
        .find(|candidate| *candidate == name)?;
    Some(Value::function(BoundMethod {
        label: format!("{}.{method}", receiver.type_name()),
        receiver: receiver.clone(),
        method,
    }))
}

fn call_method(receiver: &Value, method: &'static str, args: Vec<Value>) -> Result<Value, Error> {
    let label = format!("{}.{method}", receiver.type_name());
    let arity = |min: usize, max: usize| check_arity(&label, args.len(), min, Some(max));
    match (receiver, method) {
        (Value::List(items), "append") => {
            arity(1, 1)?;
            write_lock(items).push(first(args));
            Ok(Value::None)
        }
        (Value::List(items), "extend") => {
            arity(1, 1)?;
            let extra = ops::iterate(&first(args))?;
            write_lock(items).extend(extra);
            Ok(Value::None)
        }
        (Value::List(items), "index") => {
            arity(1, 1)?;
            let needle = first(args);
            let snapshot = read_lock(items).clone();
            for (position, item) in snapshot.iter().enumerate() {
                if ops::equals(item, &needle)? {
                    return i64::try_from(position)
                        .map(Value::Int)
                        .map_err(|_| runtime_error("list index out of range"));
                }
            }
            Err(runtime_error(format!("{} is not in list", needle.repr())))
        }
        (Value::List(items), "pop") => {
            arity(0, 1)?;
            let mut items = write_lock(items);
            if items.is_empty() {
                return Err(runtime_error("pop from empty list"));
            }
            let raw = match args.first() {
                Some(index) => expect_int(index, "pop index")?,
                None => -1,
            };
            let len = i64::try_from(items.len()).map_err(|_| runtime_error("list too large"))?;
            let resolved = if raw < 0 { raw + len } else { raw };
            if resolved < 0 || resolved >= len {
                return Err(runtime_error("pop index out of range"));
            }
            let position =
                usize::try_from(resolved).map_err(|_| runtime_error("pop index out of range"))?;
            Ok(items.remove(position))
        }
        (Value::Dict(entries), "get") => {
            arity(1, 2)?;
            let mut args = args.into_iter();
            let key = args.next().unwrap_or_default();
            let fallback = args.next().unwrap_or_default();
            let key = expect_str(&key, "dict key")?;
            Ok(read_lock(entries).get(key).cloned().unwrap_or(fallback))
        }
        (Value::Dict(entries), "pop") => {
            arity(1, 2)?;
            let mut args = args.into_iter();
            let key = args.next().unwrap_or_default();
            let fallback = args.next();
            let key = expect_str(&key, "dict key")?;
            match (write_lock(entries).shift_remove(key), fallback) {
                (Some(value), _) => Ok(value),
                (None, Some(fallback)) => Ok(fallback),
                (None, None) => Err(runtime_error(format!("key not found: {key:?}"))),
            }
        }
        (Value::Dict(entries), "keys") => {
            arity(0, 0)?;
            Ok(Value::list(
                read_lock(entries).keys().cloned().map(Value::Str).collect(),
            ))
        }
        (Value::Dict(entries), "values") => {
            arity(0, 0)?;
            Ok(Value::list(read_lock(entries).values().cloned().collect()))
        }
        (Value::Dict(entries), "items") => {
            arity(0, 0)?;
            Ok(Value::list(
                read_lock(entries)
                    .iter()
                    .map(|(key, value)| Value::list(vec![Value::str(key.clone()), value.clone()]))
                    .collect(),
            ))
        }
        (Value::Str(text), _) => string_method(text, method, args, &label),
        (other, _) => Err(runtime_error(format!(
            "'{}' object has no attribute '{method}'",
            other.type_name()
        ))),
    }
}

fn string_method(
    text: &str,
    method: &str,
    args: Vec<Value>,
    label: &str,
) -> Result<Value, Error> {
    let arity = |min: usize, max: usize| check_arity(label, args.len(), min, Some(max));
    match method {
        "upper" => {
            arity(0, 0)?;
            Ok(Value::str(text.to_uppercase()))
        }
        "lower" => {
            arity(0, 0)?;
            Ok(Value::str(text.to_lowercase()))
        }
        "strip" => {
            arity(0, 0)?;
            Ok(Value::str(text.trim()))
        }
        "split" => {
            arity(0, 1)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => text.split_whitespace().map(Value::from).collect(),
                Some(separator) => {
                    let separator = expect_str(separator, "separator")?;
                    if separator.is_empty() {
                        return Err(runtime_error("empty separator"));
                    }
                    text.split(separator).map(Value::from).collect()
                }
            };
            Ok(Value::list(parts))
        }
        "join" => {
            arity(1, 1)?;
            let items = ops::iterate(&args[0])?;
            let mut parts = Vec::with_capacity(items.len());
            for item in &items {
                parts.push(expect_str(item, "join item")?.to_string());
            }
            Ok(Value::Str(parts.join(text)))
        }
        "startswith" | "endswith" => {
            arity(1, 1)?;
            let affix = expect_str(&args[0], "prefix")?;
            Ok(Value::Bool(if method == "startswith" {
                text.starts_with(affix)
            } else {
                text.ends_with(affix)
            }))
        }
        "replace" => {
            arity(2, 2)?;
            let from = expect_str(&args[0], "old")?;
            let to = expect_str(&args[1], "new")?;
            Ok(Value::Str(text.replace(from, to)))
        }
        _ => Err(runtime_error(format!(
            "'str' object has no attribute '{method}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{check_arity, lookup, method};
    use crate::core::value::Value;

    #[test]
    fn builtins_are_found_by_name() {
        assert!(lookup("print").is_some());
        assert!(lookup("register_module").is_some());
        assert!(lookup("no_such_builtin").is_none());
    }

    #[test]
    fn arity_errors_name_the_function() {
        let err = check_arity("len", 2, 1, Some(1)).expect_err("arity");
        assert_eq!(
            err.message(),
            Some("len() takes exactly 1 argument(s) (2 given)")
        );
        assert!(check_arity("print", 5, 0, None).is_ok());
    }

    #[test]
    fn methods_bind_only_on_matching_types() {
        assert!(method(&Value::list(vec![]), "append").is_some());
        assert!(method(&Value::str("x"), "append").is_none());
        assert!(method(&Value::Int(1), "upper").is_none());
    }
}
