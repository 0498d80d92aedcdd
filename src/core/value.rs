//! Purpose: Dynamic value model stored in namespaces and produced by evaluation.
//! Exports: `Value`, `Callable`, `ListRef`, `DictRef`, lock helpers.
//! Role: Shared vocabulary between the module system and any injected evaluator.
//! Invariants: Lists, dicts and modules are shared handles; cloning never deep-copies them.
//! Invariants: JSON conversion is total (non-JSON values render as descriptive strings).
//! Invariants: Container walks terminate; a container already on the path renders as `[...]`/`{...}`.
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use serde_json::{Map, Number, Value as Json};

use super::error::Error;
use super::evaluator::ExecContext;
use super::namespace::Namespace;

pub type ListRef = Arc<RwLock<Vec<Value>>>;
pub type DictRef = Arc<RwLock<IndexMap<String, Value>>>;

/// Container nesting followed by rendering, JSON conversion and equality.
const MAX_WALK_DEPTH: usize = 64;
/// Containers visited by one walk before the rest is elided.
const MAX_WALK_CONTAINERS: usize = 100_000;

/// Something that can be invoked with positional arguments.
pub trait Callable: Send + Sync {
    fn name(&self) -> &str;
    fn call(&self, args: Vec<Value>, ctx: &mut ExecContext<'_>) -> Result<Value, Error>;
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(ListRef),
    Dict(DictRef),
    Module(Namespace),
    Function(Arc<dyn Callable>),
}

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poison| poison.into_inner())
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poison| poison.into_inner())
}

fn container_id<T>(handle: &Arc<RwLock<T>>) -> usize {
    Arc::as_ptr(handle).cast::<()>() as usize
}

/// Traversal state shared by recursive walks over nested containers.
struct Walk {
    path: Vec<usize>,
    remaining: usize,
}

impl Walk {
    fn new() -> Self {
        Self {
            path: Vec::new(),
            remaining: MAX_WALK_CONTAINERS,
        }
    }

    /// False when the container is already on the current path, the walk is too
    /// deep, or its container budget is spent.
    fn enter(&mut self, id: usize) -> bool {
        if self.path.len() >= MAX_WALK_DEPTH || self.remaining == 0 || self.path.contains(&id) {
            return false;
        }
        self.remaining -= 1;
        self.path.push(id);
        true
    }

    fn leave(&mut self) {
        self.path.pop();
    }
}

impl Value {
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    pub fn list(values: Vec<Value>) -> Self {
        Self::List(Arc::new(RwLock::new(values)))
    }

    pub fn dict(entries: IndexMap<String, Value>) -> Self {
        Self::Dict(Arc::new(RwLock::new(entries)))
    }

    pub fn function(callable: impl Callable + 'static) -> Self {
        Self::Function(Arc::new(callable))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Module(_) => "module",
            Value::Function(_) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !read_lock(items).is_empty(),
            Value::Dict(entries) => !read_lock(entries).is_empty(),
            Value::Module(_) | Value::Function(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_module(&self) -> Option<&Namespace> {
        match self {
            Value::Module(namespace) => Some(namespace),
            _ => None,
        }
    }

    /// Identity for handle types, value equality for scalars.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            _ => self == other,
        }
    }

    /// Quoted rendering used inside containers and by `repr`.
    pub fn repr(&self) -> String {
        self.render(&mut Walk::new(), true)
    }

    fn render(&self, walk: &mut Walk, quoted: bool) -> String {
        match self {
            Value::None => "none".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(x) => {
                if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
                    format!("{x:.1}")
                } else {
                    x.to_string()
                }
            }
            Value::Str(s) if quoted => format!("{s:?}"),
            Value::Str(s) => s.clone(),
            Value::List(items) => {
                if !walk.enter(container_id(items)) {
                    return "[...]".to_string();
                }
                let snapshot = read_lock(items).clone();
                let rendered: Vec<String> = snapshot
                    .iter()
                    .map(|item| item.render(walk, true))
                    .collect();
                walk.leave();
                format!("[{}]", rendered.join(", "))
            }
            Value::Dict(entries) => {
                if !walk.enter(container_id(entries)) {
                    return "{...}".to_string();
                }
                let snapshot = read_lock(entries).clone();
                let rendered: Vec<String> = snapshot
                    .iter()
                    .map(|(key, value)| format!("{key:?}: {}", value.render(walk, true)))
                    .collect();
                walk.leave();
                format!("{{{}}}", rendered.join(", "))
            }
            Value::Module(namespace) => format!("<module '{}'>", namespace.name()),
            Value::Function(callable) => format!("<function {}>", callable.name()),
        }
    }

    pub fn to_json(&self) -> Json {
        self.to_json_in(&mut Walk::new())
    }

    fn to_json_in(&self, walk: &mut Walk) -> Json {
        match self {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::Number(Number::from(*n)),
            Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => {
                if !walk.enter(container_id(items)) {
                    return Json::String("...".to_string());
                }
                let snapshot = read_lock(items).clone();
                let out = snapshot.iter().map(|item| item.to_json_in(walk)).collect();
                walk.leave();
                Json::Array(out)
            }
            Value::Dict(entries) => {
                if !walk.enter(container_id(entries)) {
                    return Json::String("...".to_string());
                }
                let mut out = Map::new();
                let snapshot = read_lock(entries).clone();
                for (key, value) in snapshot.iter() {
                    out.insert(key.clone(), value.to_json_in(walk));
                }
                walk.leave();
                Json::Object(out)
            }
            Value::Module(_) | Value::Function(_) => Json::String(self.to_string()),
        }
    }

    /// Structural equality; `None` when the comparison nests past the walk limit,
    /// as two distinct self-referencing containers do.
    pub fn equals(&self, other: &Value) -> Option<bool> {
        self.equals_in(other, &mut Walk::new())
    }

    fn equals_in(&self, other: &Value, walk: &mut Walk) -> Option<bool> {
        match (self, other) {
            (Value::List(a), Value::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return Some(true);
                }
                let left = read_lock(a).clone();
                let right = read_lock(b).clone();
                if left.len() != right.len() {
                    return Some(false);
                }
                // Only depth and the container budget end a comparison.
                if walk.path.len() >= MAX_WALK_DEPTH || walk.remaining == 0 {
                    return None;
                }
                walk.remaining -= 1;
                walk.path.push(container_id(a));
                let mut equal = true;
                for (x, y) in left.iter().zip(right.iter()) {
                    if !x.equals_in(y, walk)? {
                        equal = false;
                        break;
                    }
                }
                walk.leave();
                Some(equal)
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Arc::ptr_eq(a, b) {
                    return Some(true);
                }
                let left = read_lock(a).clone();
                let right = read_lock(b).clone();
                if left.len() != right.len() {
                    return Some(false);
                }
                if walk.path.len() >= MAX_WALK_DEPTH || walk.remaining == 0 {
                    return None;
                }
                walk.remaining -= 1;
                walk.path.push(container_id(a));
                let mut equal = true;
                for (key, x) in left.iter() {
                    let matched = match right.get(key) {
                        Some(y) => x.equals_in(y, walk)?,
                        None => false,
                    };
                    if !matched {
                        equal = false;
                        break;
                    }
                }
                walk.leave();
                Some(equal)
            }
            (Value::None, Value::None) => Some(true),
            (Value::Bool(a), Value::Bool(b)) => Some(a == b),
            (Value::Int(a), Value::Int(b)) => Some(a == b),
            (Value::Float(a), Value::Float(b)) => Some(a == b),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                Some((*a as f64) == *b)
            }
            (Value::Str(a), Value::Str(b)) => Some(a == b),
            (Value::Module(a), Value::Module(b)) => Some(a.ptr_eq(b)),
            (Value::Function(a), Value::Function(b)) => Some(Arc::ptr_eq(a, b)),
            _ => Some(false),
        }
    }

    pub fn from_json(value: &Json) -> Self {
        match value {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            Json::Object(entries) => Value::dict(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::from_json(value)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Value {
    /// Comparisons too deep to finish count as unequal; see `Value::equals`.
    fn eq(&self, other: &Self) -> bool {
        self.equals(other).unwrap_or(false)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&mut Walk::new(), false))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::Value;
    use serde_json::json;

    #[test]
    fn json_conversion_covers_containers() {
        let value = Value::from_json(&json!({"a": [1, 2.5, "x", null, true]}));
        assert_eq!(value.to_json(), json!({"a": [1, 2.5, "x", null, true]}));
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(Value::Float(f64::NAN).to_json(), json!(null));
    }

    #[test]
    fn whole_floats_keep_a_decimal_point() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
    }

    #[test]
    fn container_rendering_quotes_strings() {
        let value = Value::list(vec![Value::Int(1), Value::str("a")]);
        assert_eq!(value.to_string(), "[1, \"a\"]");
    }

    fn self_referencing(copies: usize) -> Value {
        let list = Value::list(vec![]);
        if let Value::List(items) = &list {
            for _ in 0..copies {
                super::write_lock(items).push(list.clone());
            }
        }
        list
    }

    #[test]
    fn self_referencing_list_renders_finitely() {
        assert_eq!(self_referencing(1).to_string(), "[[...]]");
        assert_eq!(self_referencing(2).to_string(), "[[...], [...]]");
        assert_eq!(self_referencing(2).to_json(), json!(["...", "..."]));
    }

    #[test]
    fn self_referencing_dict_renders_finitely() {
        let dict = Value::dict(Default::default());
        if let Value::Dict(entries) = &dict {
            super::write_lock(entries).insert("me".into(), dict.clone());
        }
        assert_eq!(dict.repr(), "{\"me\": {...}}");
        assert_eq!(dict.to_json(), json!({"me": "..."}));
    }

    #[test]
    fn shared_but_acyclic_containers_render_in_full() {
        let inner = Value::list(vec![Value::Int(1)]);
        let outer = Value::list(vec![inner.clone(), inner]);
        assert_eq!(outer.to_string(), "[[1], [1]]");
    }

    #[test]
    fn distinct_cycles_do_not_compare() {
        let a = self_referencing(1);
        let b = self_referencing(1);
        assert_eq!(a.equals(&a), Some(true));
        assert_eq!(a.equals(&b), None);
        assert_ne!(a, b);

        let wide = self_referencing(2);
        assert_eq!(wide.equals(&self_referencing(2)), None);
    }

    #[test]
    fn nested_equality_is_structural() {
        let left = Value::from_json(&json!({"k": [1, {"x": 2}]}));
        let right = Value::from_json(&json!({"k": [1.0, {"x": 2}]}));
        assert_eq!(left.equals(&right), Some(true));
        let other = Value::from_json(&json!({"k": [1, {"x": 3}]}));
        assert_eq!(left.equals(&other), Some(false));
    }

    #[test]
    fn int_and_float_compare_numerically() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::str("2"));
    }

    #[test]
    fn lists_are_shared_handles() {
        let list = Value::list(vec![]);
        let alias = list.clone();
        if let Value::List(items) = &alias {
            super::write_lock(items).push(Value::Int(7));
        }
        assert!(list.is_same(&alias));
        assert_eq!(list.to_json(), json!([7]));
    }
}
