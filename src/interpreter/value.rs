use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::Arc;

use super::ast::FunctionDef;
use super::{ErrorKind, ProgramError, Result};

/// Shared, mutable list storage (Python lists have reference semantics).
pub type ListRef = Arc<Mutex<Vec<Value>>>;

/// Shared, mutable dict storage.
pub type DictRef = Arc<Mutex<Dict>>;

// Nesting past which containers print as `[...]` even without a cycle.
const MAX_DISPLAY_DEPTH: usize = 1000;

/// Container nesting past which `==` raises `RecursionError`.
pub const MAX_COMPARE_DEPTH: usize = 1000;

/// Runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    /// `None`.
    None,
    /// `True` / `False`.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// String.
    Str(String),
    /// List.
    List(ListRef),
    /// Tuple.
    Tuple(Arc<Vec<Value>>),
    /// Dict (insertion ordered).
    Dict(DictRef),
    /// Lazy `range(start, stop, step)`.
    Range {
        /// First value.
        start: i64,
        /// Exclusive bound.
        stop: i64,
        /// Increment (never zero).
        step: i64,
    },
    /// User-defined function.
    Function(Arc<Function>),
    /// Builtin function by name.
    Builtin(&'static str),
    /// Method bound to its receiver.
    Method {
        /// Receiver value.
        receiver: Box<Value>,
        /// Method name.
        name: String,
    },
    /// Class object returned by `type()` / named by builtins like `int`.
    Type(&'static str),
    /// Exception class such as `ValueError`.
    ExceptionClass(ErrorKind),
    /// Exception instance.
    Exception {
        /// Exception class.
        kind: ErrorKind,
        /// Message passed to the constructor.
        message: String,
    },
}

/// User-defined function with defaults captured at definition time.
#[derive(Debug)]
pub struct Function {
    /// Parsed definition.
    pub def: Arc<FunctionDef>,
    /// Default values, aligned with the trailing parameters that declare them.
    pub defaults: Vec<Value>,
}

/// Insertion-ordered mapping with Python equality on keys.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    /// Empty dict.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &Value) -> Result<Option<usize>> {
        for (idx, (existing, _)) in self.entries.iter().enumerate() {
            if existing.py_eq(key)? {
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }

    /// Look up a key.
    pub fn get(&self, key: &Value) -> Result<Option<Value>> {
        Ok(self.position(key)?.map(|idx| self.entries[idx].1.clone()))
    }

    /// Insert or overwrite a key, keeping the original insertion slot.
    pub fn insert(&mut self, key: Value, value: Value) -> Result<()> {
        if !key.is_hashable() {
            return Err(ProgramError::type_error(format!(
                "unhashable type: '{}'",
                key.type_name()
            )));
        }
        match self.position(&key)? {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &Value) -> Result<Option<Value>> {
        Ok(self.position(key)?.map(|idx| self.entries.remove(idx).1))
    }

    /// Whether the key is present.
    pub fn contains(&self, key: &Value) -> Result<bool> {
        Ok(self.position(key)?.is_some())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dict is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the keys.
    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Snapshot of the values.
    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Snapshot of the entries.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.entries.clone()
    }
}

impl Value {
    /// Build a list value.
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(Mutex::new(items)))
    }

    /// Build a tuple value.
    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Arc::new(items))
    }

    /// Build a dict value.
    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Arc::new(Mutex::new(dict)))
    }

    /// Build a string value.
    pub fn str(text: impl Into<String>) -> Value {
        Value::Str(text.into())
    }

    /// Python type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method { .. } => "method",
            Value::Type(_) | Value::ExceptionClass(_) => "type",
            Value::Exception { kind, .. } => kind.as_str(),
        }
    }

    /// Python truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(flag) => *flag,
            Value::Int(num) => *num != 0,
            Value::Float(num) => *num != 0.0,
            Value::Str(text) => !text.is_empty(),
            Value::List(items) => !items.lock().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.lock().is_empty(),
            Value::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
            _ => true,
        }
    }

    /// Integer view of ints and bools.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(num) => Some(*num),
            Value::Bool(flag) => Some(*flag as i64),
            _ => None,
        }
    }

    /// Float view of any number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(num) => Some(*num),
            other => other.as_int().map(|n| n as f64),
        }
    }

    /// Whether this value can be a dict key.
    pub fn is_hashable(&self) -> bool {
        match self {
            Value::List(_) | Value::Dict(_) => false,
            Value::Tuple(items) => items.iter().all(Value::is_hashable),
            _ => true,
        }
    }

    /// `str(value)`.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(text) => text.clone(),
            Value::Exception { message, .. } => message.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)`.
    pub fn repr(&self) -> String {
        self.repr_in(&mut Vec::new())
    }

    // `open` holds the containers currently being rendered, by address.
    fn repr_in(&self, open: &mut Vec<usize>) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(num) => num.to_string(),
            Value::Float(num) => format_float(*num),
            Value::Str(text) => quote_str(text),
            Value::List(items) => {
                let addr = Arc::as_ptr(items) as usize;
                if open.contains(&addr) || open.len() >= MAX_DISPLAY_DEPTH {
                    return "[...]".to_string();
                }
                let snapshot = items.lock().clone();
                open.push(addr);
                let rendered = format!("[{}]", join_repr(&snapshot, open));
                open.pop();
                rendered
            }
            Value::Tuple(items) => {
                if open.len() >= MAX_DISPLAY_DEPTH {
                    return "(...)".to_string();
                }
                if items.len() == 1 {
                    format!("({},)", items[0].repr_in(open))
                } else {
                    format!("({})", join_repr(items, open))
                }
            }
            Value::Dict(dict) => {
                let addr = Arc::as_ptr(dict) as usize;
                if open.contains(&addr) || open.len() >= MAX_DISPLAY_DEPTH {
                    return "{...}".to_string();
                }
                let entries = dict.lock().entries();
                open.push(addr);
                let rendered: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr_in(open), v.repr_in(open)))
                    .collect();
                open.pop();
                format!("{{{}}}", rendered.join(", "))
            }
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    format!("range({}, {})", start, stop)
                } else {
                    format!("range({}, {}, {})", start, stop, step)
                }
            }
            Value::Function(func) => format!("<function {}>", func.def.name),
            Value::Builtin(name) => format!("<built-in function {}>", name),
            Value::Method { receiver, name } => {
                format!("<built-in method {} of {} object>", name, receiver.type_name())
            }
            Value::Type(name) => format!("<class '{}'>", name),
            Value::ExceptionClass(kind) => format!("<class '{}'>", kind),
            Value::Exception { kind, message } => format!("{}({})", kind, quote_str(message)),
        }
    }

    /// Python `==`.
    ///
    /// Fails with `RecursionError` when containers nest deeper than
    /// [`MAX_COMPARE_DEPTH`], which is how two distinct self-referencing
    /// lists compare.
    pub fn py_eq(&self, other: &Value) -> Result<bool> {
        self.eq_at(other, 0)
    }

    fn eq_at(&self, other: &Value, depth: usize) -> Result<bool> {
        let nested = |a: &Value, b: &Value| -> Result<bool> {
            if depth >= MAX_COMPARE_DEPTH {
                return Err(ProgramError::new(
                    ErrorKind::RecursionError,
                    "maximum recursion depth exceeded in comparison",
                ));
            }
            a.eq_at(b, depth + 1)
        };
        Ok(match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            (Value::List(a), Value::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let left = a.lock().clone();
                let right = b.lock().clone();
                seq_eq(&left, &right, &nested)?
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b, &nested)?,
            (Value::Dict(a), Value::Dict(b)) => {
                if Arc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let left = a.lock().clone();
                let right = b.lock().clone();
                if left.len() != right.len() {
                    return Ok(false);
                }
                for (key, value) in left.entries() {
                    let Some(found) = right.get(&key)? else {
                        return Ok(false);
                    };
                    if !nested(&found, &value)? {
                        return Ok(false);
                    }
                }
                true
            }
            (
                Value::Range {
                    start: a,
                    stop: b,
                    step: c,
                },
                Value::Range {
                    start: x,
                    stop: y,
                    step: z,
                },
            ) => (a, b, c) == (x, y, z),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::ExceptionClass(a), Value::ExceptionClass(b)) => a == b,
            _ => match (self.as_int(), other.as_int()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        })
    }

    /// Python `is`: identity for containers, equality for immutable scalars.
    pub fn py_is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Arc::ptr_eq(a, b),
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::ExceptionClass(a), Value::ExceptionClass(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            _ => false,
        }
    }

    /// Ordering used by `<`, `sorted`, `min` and `max`.
    pub fn compare(&self, other: &Value, op: &str) -> Result<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                let left = a.lock().clone();
                let right = b.lock().clone();
                seq_cmp(&left, &right, op)
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_cmp(a, b, op),
            _ => match (self.as_int(), other.as_int()) {
                (Some(a), Some(b)) => Ok(a.cmp(&b)),
                _ => match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal)),
                    _ => Err(ProgramError::type_error(format!(
                        "'{}' not supported between instances of '{}' and '{}'",
                        op,
                        self.type_name(),
                        other.type_name()
                    ))),
                },
            },
        }
    }
}

fn join_repr(items: &[Value], open: &mut Vec<usize>) -> String {
    items
        .iter()
        .map(|item| item.repr_in(open))
        .collect::<Vec<_>>()
        .join(", ")
}

fn seq_eq(
    left: &[Value],
    right: &[Value],
    eq: impl Fn(&Value, &Value) -> Result<bool>,
) -> Result<bool> {
    if left.len() != right.len() {
        return Ok(false);
    }
    for (a, b) in left.iter().zip(right) {
        if !eq(a, b)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn seq_cmp(left: &[Value], right: &[Value], op: &str) -> Result<Ordering> {
    for (a, b) in left.iter().zip(right) {
        if !a.py_eq(b)? {
            return a.compare(b, op);
        }
    }
    Ok(left.len().cmp(&right.len()))
}

/// Number of items produced by `range(start, stop, step)`.
///
/// Computed in `i128`: `range(-2**63, 2**63 - 1)` has more items than an
/// `i64` can count.
pub fn range_len(start: i64, stop: i64, step: i64) -> i128 {
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    if step > 0 && start < stop {
        (stop - start - 1) / step + 1
    } else if step < 0 && start > stop {
        (start - stop - 1) / (-step) + 1
    } else {
        0
    }
}

/// Render a float the way Python's `repr` does.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let formatted = format!("{:e}", value);
        if let Some((mantissa, exponent)) = formatted.split_once('e') {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            return format!("{}e{}{:02}", mantissa, sign, exponent.abs());
        }
        return formatted;
    }
    if value == value.trunc() {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

/// Quote a string using Python's repr rules.
pub fn quote_str(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Build a `KeyError` for a missing key.
pub fn key_error(key: &Value) -> ProgramError {
    ProgramError::new(ErrorKind::KeyError, key.repr())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_render_like_python() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(1e-7), "1e-07");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn strings_quote_like_python() {
        assert_eq!(quote_str("hi"), "'hi'");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
    }

    #[test]
    fn containers_render_nested_reprs() {
        let inner = Value::tuple(vec![Value::Int(1)]);
        let list = Value::list(vec![Value::str("a"), inner, Value::Float(2.0), Value::None]);
        assert_eq!(list.to_str(), "['a', (1,), 2.0, None]");
    }

    fn self_referencing(times: usize) -> Value {
        let list = Value::list(Vec::new());
        if let Value::List(items) = &list {
            for _ in 0..times {
                items.lock().push(list.clone());
            }
        }
        list
    }

    #[test]
    fn self_referencing_list_does_not_recurse_forever() {
        let list = self_referencing(1);
        assert_eq!(list.repr(), "[[...]]");
        assert!(list.py_eq(&list.clone()).unwrap());
    }

    #[test]
    fn repeated_self_reference_renders_each_cycle_once() {
        let list = self_referencing(3);
        assert_eq!(list.repr(), "[[...], [...], [...]]");
        let dict = Value::dict(Dict::new());
        if let Value::Dict(inner) = &dict {
            inner.lock().insert(Value::str("me"), dict.clone()).unwrap();
        }
        assert_eq!(dict.repr(), "{'me': {...}}");
    }

    #[test]
    fn distinct_cyclic_lists_raise_recursion_error() {
        let err = self_referencing(1).py_eq(&self_referencing(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecursionError);
    }

    #[test]
    fn numeric_equality_crosses_types() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)).unwrap());
        assert!(Value::Bool(true).py_eq(&Value::Int(1)).unwrap());
        assert!(!Value::Int(1).py_eq(&Value::str("1")).unwrap());
    }

    #[test]
    fn dict_preserves_insertion_order_and_rejects_unhashable_keys() {
        let mut dict = Dict::new();
        dict.insert(Value::str("b"), Value::Int(1)).unwrap();
        dict.insert(Value::str("a"), Value::Int(2)).unwrap();
        dict.insert(Value::str("b"), Value::Int(3)).unwrap();
        assert_eq!(Value::dict(dict.clone()).repr(), "{'b': 3, 'a': 2}");
        let err = dict.insert(Value::list(vec![]), Value::None).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: unhashable type: 'list'");
    }

    #[test]
    fn range_len_handles_negative_steps() {
        assert_eq!(range_len(0, 10, 3), 4);
        assert_eq!(range_len(10, 0, -2), 5);
        assert_eq!(range_len(5, 5, 1), 0);
    }

    #[test]
    fn range_len_spans_the_whole_i64_domain() {
        assert_eq!(range_len(i64::MIN, i64::MAX, 1), u64::MAX as i128);
        assert_eq!(range_len(i64::MAX, i64::MIN, i64::MIN), 2);
    }
}
