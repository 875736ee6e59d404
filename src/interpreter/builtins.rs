use std::cmp::Ordering;

use super::ast::BinOp;
use super::eval::{Evaluator, MAX_REPEAT_LEN, binary_op, iterate};
use super::value::{Dict, Value, format_float, key_error, range_len};
use super::{ErrorKind, PrintWriter, ProgramError, Result};

const FUNCTIONS: &[&str] = &[
    "print",
    "len",
    "abs",
    "min",
    "max",
    "sum",
    "round",
    "type",
    "sorted",
    "reversed",
    "enumerate",
    "zip",
    "repr",
    "isinstance",
    "input",
];

const TYPES: &[&str] = &["int", "float", "str", "bool", "list", "tuple", "dict", "range"];

const STR_METHODS: &[&str] = &[
    "upper",
    "lower",
    "strip",
    "lstrip",
    "rstrip",
    "split",
    "join",
    "replace",
    "startswith",
    "endswith",
    "find",
    "count",
    "title",
    "capitalize",
    "isdigit",
    "isalpha",
    "isalnum",
    "isspace",
    "isupper",
    "islower",
    "format",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "copy",
    "clear",
];

const DICT_METHODS: &[&str] = &[
    "get",
    "keys",
    "values",
    "items",
    "pop",
    "update",
    "setdefault",
    "copy",
    "clear",
];

/// Resolve a builtin name.
pub fn lookup(name: &str) -> Option<Value> {
    if let Some(found) = FUNCTIONS.iter().copied().find(|candidate| *candidate == name) {
        return Some(Value::Builtin(found));
    }
    if let Some(found) = TYPES.iter().copied().find(|candidate| *candidate == name) {
        return Some(Value::Type(found));
    }
    ErrorKind::from_name(name).map(Value::ExceptionClass)
}

/// Whether `value.name` resolves to a method.
pub fn has_method(value: &Value, name: &str) -> bool {
    let table = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        _ => return false,
    };
    table.iter().any(|method| *method == name)
}

/// `AttributeError` for a missing attribute.
pub fn no_attribute(value: &Value, name: &str) -> ProgramError {
    ProgramError::new(
        ErrorKind::AttributeError,
        format!("'{}' object has no attribute '{}'", value.type_name(), name),
    )
}

fn take_kwarg(kwargs: &mut Vec<(String, Value)>, name: &str) -> Option<Value> {
    let idx = kwargs.iter().position(|(key, _)| key == name)?;
    Some(kwargs.remove(idx).1)
}

fn reject_kwargs(func: &str, kwargs: &[(String, Value)]) -> Result<()> {
    match kwargs.first() {
        None => Ok(()),
        Some((name, _)) => Err(ProgramError::type_error(format!(
            "'{}' is an invalid keyword argument for {}()",
            name, func
        ))),
    }
}

fn arity(func: &str, args: &[Value], min: usize, max: usize) -> Result<()> {
    if args.len() >= min && args.len() <= max {
        return Ok(());
    }
    let message = if min == max {
        format!(
            "{}() takes exactly {} argument{} ({} given)",
            func,
            min,
            if min == 1 { "" } else { "s" },
            args.len()
        )
    } else if args.len() < min {
        format!(
            "{}() expected at least {} argument{}, got {}",
            func,
            min,
            if min == 1 { "" } else { "s" },
            args.len()
        )
    } else {
        format!(
            "{}() expected at most {} argument{}, got {}",
            func,
            max,
            if max == 1 { "" } else { "s" },
            args.len()
        )
    };
    Err(ProgramError::type_error(message))
}

fn expect_int(value: &Value) -> Result<i64> {
    value.as_int().ok_or_else(|| {
        ProgramError::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn expect_str<'a>(value: &'a Value, context: &str) -> Result<&'a str> {
    match value {
        Value::Str(text) => Ok(text.as_str()),
        other => Err(ProgramError::type_error(format!(
            "{} must be str, not {}",
            context,
            other.type_name()
        ))),
    }
}

/// Call a builtin function or type constructor.
pub fn call_builtin(
    ev: &mut Evaluator,
    name: &str,
    mut args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
    out: &mut dyn PrintWriter,
) -> Result<Value> {
    match name {
        "print" => {
            let sep = separator(take_kwarg(&mut kwargs, "sep"), " ", "sep")?;
            let end = separator(take_kwarg(&mut kwargs, "end"), "\n", "end")?;
            reject_kwargs(name, &kwargs)?;
            let rendered: Vec<String> = args.iter().map(Value::to_str).collect();
            let mut line = rendered.join(&sep);
            line.push_str(&end);
            out.write_str(&line);
            return Ok(Value::None);
        }
        "sorted" => {
            let key = take_kwarg(&mut kwargs, "key");
            let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|flag| flag.truthy());
            reject_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 1)?;
            let items = ev.collect(&args[0])?;
            return Ok(Value::list(sort_values(ev, items, key, reverse, out)?));
        }
        "min" | "max" => {
            let key = take_kwarg(&mut kwargs, "key");
            reject_kwargs(name, &kwargs)?;
            return extremum(ev, name, args, key, out);
        }
        "dict" => {
            arity(name, &args, 0, 1)?;
            let mut dict = match args.pop() {
                None => Dict::new(),
                Some(Value::Dict(source)) => source.lock().clone(),
                Some(source) => {
                    let mut dict = Dict::new();
                    for pair in ev.collect(&source)? {
                        let items = ev.collect(&pair)?;
                        let [key, value]: [Value; 2] = items.try_into().map_err(|_| {
                            ProgramError::value_error(
                                "dictionary update sequence element has wrong length; 2 is required",
                            )
                        })?;
                        dict.insert(key, value)?;
                    }
                    dict
                }
            };
            for (key, value) in kwargs {
                dict.insert(Value::Str(key), value)?;
            }
            return Ok(Value::dict(dict));
        }
        _ => reject_kwargs(name, &kwargs)?,
    }

    match name {
        "len" => {
            arity(name, &args, 1, 1)?;
            let len = match &args[0] {
                Value::Str(text) => text.chars().count(),
                Value::List(items) => items.lock().len(),
                Value::Tuple(items) => items.len(),
                Value::Dict(dict) => dict.lock().len(),
                Value::Range { start, stop, step } => {
                    usize::try_from(range_len(*start, *stop, *step))
                        .ok()
                        .filter(|&len| i64::try_from(len).is_ok())
                        .ok_or_else(|| {
                            ProgramError::new(
                                ErrorKind::OverflowError,
                                "Python int too large to convert to C ssize_t",
                            )
                        })?
                }
                other => {
                    return Err(ProgramError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Int(len as i64))
        }
        "range" => {
            arity(name, &args, 1, 3)?;
            let nums = args.iter().map(expect_int).collect::<Result<Vec<_>>>()?;
            let (start, stop, step) = match nums[..] {
                [] => (0, 0, 1),
                [stop] => (0, stop, 1),
                [start, stop] => (start, stop, 1),
                [start, stop, step, ..] => (start, stop, step),
            };
            if step == 0 {
                return Err(ProgramError::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range { start, stop, step })
        }
        "str" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Str(args.first().map(Value::to_str).unwrap_or_default()))
        }
        "repr" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Str(args[0].repr()))
        }
        "int" => {
            arity(name, &args, 0, 1)?;
            to_int(args.first().unwrap_or(&Value::Int(0)))
        }
        "float" => {
            arity(name, &args, 0, 1)?;
            to_float(args.first().unwrap_or(&Value::Float(0.0)))
        }
        "bool" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        "list" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                Some(source) => Ok(Value::list(ev.collect(source)?)),
                None => Ok(Value::list(Vec::new())),
            }
        }
        "tuple" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                Some(source) => Ok(Value::tuple(ev.collect(source)?)),
                None => Ok(Value::tuple(Vec::new())),
            }
        }
        "abs" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Float(num) => Ok(Value::Float(num.abs())),
                other => match other.as_int() {
                    Some(num) => num.checked_abs().map(Value::Int).ok_or_else(|| {
                        ProgramError::new(ErrorKind::OverflowError, "integer result too large")
                    }),
                    None => Err(ProgramError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))),
                },
            }
        }
        "sum" => {
            arity(name, &args, 1, 2)?;
            let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
            if let Value::Str(_) = total {
                return Err(ProgramError::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            for item in ev.collect(&args[0])? {
                total = binary_op(BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        "round" => {
            arity(name, &args, 1, 2)?;
            round(&args[0], args.get(1))
        }
        "type" => {
            arity(name, &args, 1, 1)?;
            Ok(match &args[0] {
                Value::Exception { kind, .. } => Value::ExceptionClass(*kind),
                other => Value::Type(other.type_name()),
            })
        }
        "reversed" => {
            arity(name, &args, 1, 1)?;
            if let Value::Dict(_) = args[0] {
                return Err(ProgramError::type_error("'dict' object is not reversible"));
            }
            let mut items = ev.collect(&args[0])?;
            items.reverse();
            Ok(Value::list(items))
        }
        "enumerate" => {
            arity(name, &args, 1, 2)?;
            let start = args.get(1).map(expect_int).transpose()?.unwrap_or(0);
            let items = ev.collect(&args[0])?;
            let mut numbered = Vec::with_capacity(items.len());
            let mut idx = Some(start);
            for item in items {
                let current = idx.ok_or_else(|| {
                    ProgramError::new(ErrorKind::OverflowError, "integer result too large")
                })?;
                numbered.push(Value::tuple(vec![Value::Int(current), item]));
                idx = current.checked_add(1);
            }
            Ok(Value::list(numbered))
        }
        "zip" => {
            let columns = args
                .iter()
                .map(|arg| ev.collect(arg))
                .collect::<Result<Vec<_>>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..rows)
                    .map(|row| Value::tuple(columns.iter().map(|col| col[row].clone()).collect()))
                    .collect(),
            ))
        }
        "isinstance" => {
            arity(name, &args, 2, 2)?;
            Ok(Value::Bool(is_instance(&args[0], &args[1])?))
        }
        "input" => {
            arity(name, &args, 0, 1)?;
            if let Some(prompt) = args.first() {
                out.write_str(&prompt.to_str());
            }
            Err(ProgramError::new(ErrorKind::EOFError, "EOF when reading a line"))
        }
        other => Err(ProgramError::new(
            ErrorKind::NameError,
            format!("name '{}' is not defined", other),
        )),
    }
}

fn separator(value: Option<Value>, default: &str, which: &str) -> Result<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(text)) => Ok(text),
        Some(other) => Err(ProgramError::type_error(format!(
            "{} must be None or a string, not {}",
            which,
            other.type_name()
        ))),
    }
}

fn to_int(value: &Value) -> Result<Value> {
    match value {
        Value::Float(num) => {
            if num.is_nan() {
                Err(ProgramError::value_error("cannot convert float NaN to integer"))
            } else if num.is_infinite() || num.abs() >= 9.2e18 {
                Err(ProgramError::new(
                    ErrorKind::OverflowError,
                    "cannot convert float infinity to integer",
                ))
            } else {
                Ok(Value::Int(num.trunc() as i64))
            }
        }
        Value::Str(text) => {
            let cleaned = text.trim().replace('_', "");
            cleaned.parse::<i64>().map(Value::Int).map_err(|_| {
                ProgramError::value_error(format!(
                    "invalid literal for int() with base 10: {}",
                    Value::Str(text.clone()).repr()
                ))
            })
        }
        other => other.as_int().map(Value::Int).ok_or_else(|| {
            ProgramError::type_error(format!(
                "int() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn to_float(value: &Value) -> Result<Value> {
    match value {
        Value::Str(text) => {
            let cleaned = text.trim().to_ascii_lowercase();
            let parsed = match cleaned.as_str() {
                "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                "nan" => Some(f64::NAN),
                digits => digits.replace('_', "").parse::<f64>().ok(),
            };
            parsed.map(Value::Float).ok_or_else(|| {
                ProgramError::value_error(format!(
                    "could not convert string to float: {}",
                    Value::Str(text.clone()).repr()
                ))
            })
        }
        other => other.as_f64().map(Value::Float).ok_or_else(|| {
            ProgramError::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn round(value: &Value, digits: Option<&Value>) -> Result<Value> {
    let digits = match digits {
        None | Some(Value::None) => None,
        Some(other) => Some(expect_int(other)?),
    };
    match (value, digits) {
        (Value::Float(num), None) => to_int(&Value::Float(num.round_ties_even())),
        (Value::Float(num), Some(places)) => Ok(Value::Float(round_float(*num, places))),
        (other, places) => {
            let num = other.as_int().ok_or_else(|| {
                ProgramError::type_error(format!(
                    "type {} doesn't define __round__ method",
                    other.type_name()
                ))
            })?;
            match places {
                Some(places) if places < 0 => round_int(num, places),
                _ => Ok(Value::Int(num)),
            }
        }
    }
}

/// Round to `places` decimals through the shortest decimal expansion, so
/// `2.675` (stored just below) goes down like it does in CPython.
fn round_float(num: f64, places: i64) -> f64 {
    if !num.is_finite() || num == 0.0 || places > 323 {
        return num;
    }
    if places >= 0 {
        return format!("{:.*}", places as usize, num).parse().unwrap_or(num);
    }
    if places < -308 {
        return 0.0f64.copysign(num);
    }
    let factor = 10f64.powi(-places as i32);
    let rounded = (num / factor).round_ties_even() * factor;
    if rounded.is_finite() { rounded } else { num }
}

/// Round an int to a negative number of places, halves to even.
fn round_int(num: i64, places: i64) -> Result<Value> {
    // |i64| < 10**19 / 2, so anything coarser rounds to zero.
    if places < -19 {
        return Ok(Value::Int(0));
    }
    let factor = 10i128.pow((-places) as u32);
    let wide = i128::from(num);
    let (quotient, rest) = (wide.div_euclid(factor), wide.rem_euclid(factor));
    let quotient = match (2 * rest).cmp(&factor) {
        Ordering::Greater => quotient + 1,
        Ordering::Equal if quotient % 2 != 0 => quotient + 1,
        _ => quotient,
    };
    i64::try_from(quotient * factor)
        .map(Value::Int)
        .map_err(|_| ProgramError::new(ErrorKind::OverflowError, "integer result too large"))
}

fn is_instance(value: &Value, class: &Value) -> Result<bool> {
    match class {
        Value::Type(name) => Ok(value.type_name() == *name
            || (*name == "int" && matches!(value, Value::Bool(_)))),
        Value::ExceptionClass(kind) => Ok(match value {
            Value::Exception { kind: actual, .. } => actual.is_caught_by(kind.as_str()),
            _ => false,
        }),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if is_instance(value, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(ProgramError::type_error(
            "isinstance() arg 2 must be a type, a tuple of types, or a union",
        )),
    }
}

fn extremum(
    ev: &mut Evaluator,
    name: &str,
    args: Vec<Value>,
    key: Option<Value>,
    out: &mut dyn PrintWriter,
) -> Result<Value> {
    let items = match args.len() {
        0 => {
            return Err(ProgramError::type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            )));
        }
        1 => ev.collect(&args[0])?,
        _ => args,
    };
    let want = if name == "min" {
        Ordering::Less
    } else {
        Ordering::Greater
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let rank = match &key {
            Some(func) => ev.call_value(func, vec![item.clone()], Vec::new(), out)?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => rank.compare(best_rank, if name == "min" { "<" } else { ">" })? == want,
        };
        if replace {
            best = Some((rank, item));
        }
    }
    best.map(|(_, item)| item).ok_or_else(|| {
        ProgramError::value_error(format!("{}() arg is an empty sequence", name))
    })
}

/// Stable sort with optional key function, mirroring `sorted`.
fn sort_values(
    ev: &mut Evaluator,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
    out: &mut dyn PrintWriter,
) -> Result<Vec<Value>> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let rank = match &key {
            Some(Value::None) | None => item.clone(),
            Some(func) => ev.call_value(func, vec![item.clone()], Vec::new(), out)?,
        };
        keyed.push((rank, item));
    }
    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        let ordering = if reverse {
            b.compare(a, "<")
        } else {
            a.compare(b, "<")
        };
        ordering.unwrap_or_else(|err| {
            failure.get_or_insert(err);
            Ordering::Equal
        })
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(keyed.into_iter().map(|(_, item)| item).collect()),
    }
}

/// Call a method on a builtin receiver.
pub fn call_method(
    ev: &mut Evaluator,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    out: &mut dyn PrintWriter,
) -> Result<Value> {
    if !has_method(receiver, name) {
        return Err(no_attribute(receiver, name));
    }
    match receiver {
        Value::Str(text) => str_method(text, name, args, kwargs),
        Value::List(_) => list_method(ev, receiver, name, args, kwargs, out),
        Value::Dict(_) => dict_method(receiver, name, args, kwargs),
        _ => Err(no_attribute(receiver, name)),
    }
}

fn str_method(
    text: &str,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value> {
    let qualified = format!("str.{}", name);
    if name == "format" {
        return Ok(Value::Str(format_str(text, &args, &kwargs)?));
    }
    reject_kwargs(&qualified, &kwargs)?;
    let predicate = |check: fn(char) -> bool| -> Result<Value> {
        Ok(Value::Bool(!text.is_empty() && text.chars().all(check)))
    };
    match name {
        "upper" => Ok(Value::Str(text.to_uppercase())),
        "lower" => Ok(Value::Str(text.to_lowercase())),
        "strip" | "lstrip" | "rstrip" => {
            arity(&qualified, &args, 0, 1)?;
            let chars: Option<Vec<char>> = match args.first() {
                None | Some(Value::None) => None,
                Some(value) => Some(expect_str(value, "strip arg")?.chars().collect()),
            };
            let matches = |ch: char| match &chars {
                Some(set) => set.contains(&ch),
                None => ch.is_whitespace(),
            };
            let stripped = match name {
                "strip" => text.trim_matches(matches),
                "lstrip" => text.trim_start_matches(matches),
                _ => text.trim_end_matches(matches),
            };
            Ok(Value::Str(stripped.to_string()))
        }
        "split" => {
            arity(&qualified, &args, 0, 2)?;
            let limit = args.get(1).map(expect_int).transpose()?.filter(|n| *n >= 0);
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => {
                    let mut parts: Vec<String> = Vec::new();
                    let mut rest = text.trim_start();
                    while !rest.is_empty() {
                        if limit.is_some_and(|max| parts.len() as i64 >= max) {
                            parts.push(rest.trim_end().to_string());
                            break;
                        }
                        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                        parts.push(rest[..end].to_string());
                        rest = rest[end..].trim_start();
                    }
                    parts.into_iter().map(Value::Str).collect()
                }
                Some(sep) => {
                    let sep = expect_str(sep, "separator")?;
                    if sep.is_empty() {
                        return Err(ProgramError::value_error("empty separator"));
                    }
                    match limit {
                        Some(max) => text
                            .splitn(
                                usize::try_from(max)
                                    .ok()
                                    .and_then(|max| max.checked_add(1))
                                    .unwrap_or(usize::MAX),
                                sep,
                            )
                            .map(Value::str)
                            .collect(),
                        None => text.split(sep).map(Value::str).collect(),
                    }
                }
            };
            Ok(Value::list(parts))
        }
        "join" => {
            arity(&qualified, &args, 1, 1)?;
            let items: Vec<Value> = iterate(&args[0])?.collect();
            let mut pieces = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                match item {
                    Value::Str(piece) => pieces.push(piece.as_str()),
                    other => {
                        return Err(ProgramError::type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            idx,
                            other.type_name()
                        )));
                    }
                }
            }
            Ok(Value::Str(pieces.join(text)))
        }
        "replace" => {
            arity(&qualified, &args, 2, 2)?;
            let old = expect_str(&args[0], "replace() argument 1")?;
            let new = expect_str(&args[1], "replace() argument 2")?;
            Ok(Value::Str(text.replace(old, new)))
        }
        "startswith" | "endswith" => {
            arity(&qualified, &args, 1, 1)?;
            let candidates: Vec<Value> = match &args[0] {
                Value::Tuple(items) => items.as_ref().clone(),
                other => vec![other.clone()],
            };
            for candidate in &candidates {
                let affix = expect_str(candidate, &format!("{} arg", name))?;
                let hit = if name == "startswith" {
                    text.starts_with(affix)
                } else {
                    text.ends_with(affix)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "find" => {
            arity(&qualified, &args, 1, 1)?;
            let needle = expect_str(&args[0], "find() argument")?;
            Ok(Value::Int(match text.find(needle) {
                Some(byte) => text[..byte].chars().count() as i64,
                None => -1,
            }))
        }
        "count" => {
            arity(&qualified, &args, 1, 1)?;
            let needle = expect_str(&args[0], "count() argument")?;
            let count = if needle.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(needle).count()
            };
            Ok(Value::Int(count as i64))
        }
        "title" => {
            let mut result = String::with_capacity(text.len());
            let mut boundary = true;
            for ch in text.chars() {
                if ch.is_alphabetic() {
                    if boundary {
                        result.extend(ch.to_uppercase());
                    } else {
                        result.extend(ch.to_lowercase());
                    }
                    boundary = false;
                } else {
                    result.push(ch);
                    boundary = true;
                }
            }
            Ok(Value::Str(result))
        }
        "capitalize" => {
            let mut chars = text.chars();
            Ok(Value::Str(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }))
        }
        "isdigit" => predicate(|ch| ch.is_ascii_digit()),
        "isalpha" => predicate(char::is_alphabetic),
        "isalnum" => predicate(char::is_alphanumeric),
        "isspace" => predicate(char::is_whitespace),
        "isupper" => Ok(Value::Bool(
            text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_lowercase),
        )),
        "islower" => Ok(Value::Bool(
            text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_uppercase),
        )),
        _ => Err(no_attribute(&Value::Str(text.to_string()), name)),
    }
}

fn list_method(
    ev: &mut Evaluator,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
    out: &mut dyn PrintWriter,
) -> Result<Value> {
    let Value::List(items) = receiver else {
        return Err(no_attribute(receiver, name));
    };
    let qualified = format!("list.{}", name);
    if name == "sort" {
        let key = take_kwarg(&mut kwargs, "key");
        let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|flag| flag.truthy());
        reject_kwargs(&qualified, &kwargs)?;
        arity(&qualified, &args, 0, 0)?;
        let snapshot = items.lock().clone();
        let sorted = sort_values(ev, snapshot, key, reverse, out)?;
        *items.lock() = sorted;
        return Ok(Value::None);
    }
    reject_kwargs(&qualified, &kwargs)?;
    match name {
        "append" => {
            arity(&qualified, &args, 1, 1)?;
            items.lock().extend(args);
            Ok(Value::None)
        }
        "extend" => {
            arity(&qualified, &args, 1, 1)?;
            let extra = ev.collect(&args[0])?;
            items.lock().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            arity(&qualified, &args, 2, 2)?;
            let idx = expect_int(&args[0])?;
            let mut items = items.lock();
            let len = items.len() as i64;
            let slot = if idx < 0 { (idx + len).max(0) } else { idx.min(len) };
            items.insert(slot as usize, args[1].clone());
            Ok(Value::None)
        }
        "pop" => {
            arity(&qualified, &args, 0, 1)?;
            let idx = args.first().map(expect_int).transpose()?.unwrap_or(-1);
            let mut items = items.lock();
            if items.is_empty() {
                return Err(ProgramError::new(ErrorKind::IndexError, "pop from empty list"));
            }
            let len = items.len() as i64;
            let resolved = if idx < 0 { idx + len } else { idx };
            if !(0..len).contains(&resolved) {
                return Err(ProgramError::new(ErrorKind::IndexError, "pop index out of range"));
            }
            Ok(items.remove(resolved as usize))
        }
        "remove" => {
            arity(&qualified, &args, 1, 1)?;
            let snapshot = items.lock().clone();
            match position_of(&snapshot, &args[0])? {
                Some(idx) => {
                    let mut items = items.lock();
                    if idx < items.len() {
                        items.remove(idx);
                    }
                    Ok(Value::None)
                }
                None => Err(ProgramError::value_error("list.remove(x): x not in list")),
            }
        }
        "index" => {
            arity(&qualified, &args, 1, 1)?;
            let items = items.lock().clone();
            position_of(&items, &args[0])?
                .map(|idx| Value::Int(idx as i64))
                .ok_or_else(|| {
                    ProgramError::value_error(format!("{} is not in list", args[0].repr()))
                })
        }
        "count" => {
            arity(&qualified, &args, 1, 1)?;
            let items = items.lock().clone();
            let mut count = 0;
            for item in &items {
                if item.py_eq(&args[0])? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        "reverse" => {
            arity(&qualified, &args, 0, 0)?;
            items.lock().reverse();
            Ok(Value::None)
        }
        "copy" => {
            arity(&qualified, &args, 0, 0)?;
            Ok(Value::list(items.lock().clone()))
        }
        "clear" => {
            arity(&qualified, &args, 0, 0)?;
            items.lock().clear();
            Ok(Value::None)
        }
        _ => Err(no_attribute(receiver, name)),
    }
}

fn position_of(items: &[Value], wanted: &Value) -> Result<Option<usize>> {
    for (idx, item) in items.iter().enumerate() {
        if item.py_eq(wanted)? {
            return Ok(Some(idx));
        }
    }
    Ok(None)
}

fn dict_method(
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value> {
    let Value::Dict(dict) = receiver else {
        return Err(no_attribute(receiver, name));
    };
    let qualified = format!("dict.{}", name);
    if name != "update" {
        reject_kwargs(&qualified, &kwargs)?;
    }
    match name {
        "get" => {
            arity(&qualified, &args, 1, 2)?;
            let found = dict.lock().get(&args[0])?;
            Ok(found
                .or_else(|| args.get(1).cloned())
                .unwrap_or(Value::None))
        }
        "keys" => Ok(Value::list(dict.lock().keys())),
        "values" => Ok(Value::list(dict.lock().values())),
        "items" => Ok(Value::list(
            dict.lock()
                .entries()
                .into_iter()
                .map(|(key, value)| Value::tuple(vec![key, value]))
                .collect(),
        )),
        "pop" => {
            arity(&qualified, &args, 1, 2)?;
            let removed = dict.lock().remove(&args[0])?;
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(key_error(&args[0])),
            }
        }
        "setdefault" => {
            arity(&qualified, &args, 1, 2)?;
            let mut dict = dict.lock();
            if let Some(existing) = dict.get(&args[0])? {
                return Ok(existing);
            }
            let default = args.get(1).cloned().unwrap_or(Value::None);
            dict.insert(args[0].clone(), default.clone())?;
            Ok(default)
        }
        "update" => {
            arity(&qualified, &args, 0, 1)?;
            let mut incoming = match args.first() {
                Some(Value::Dict(other)) => other.lock().entries(),
                Some(other) => {
                    return Err(ProgramError::type_error(format!(
                        "'{}' object is not a mapping",
                        other.type_name()
                    )));
                }
                None => Vec::new(),
            };
            incoming.extend(kwargs.into_iter().map(|(key, value)| (Value::Str(key), value)));
            let mut dict = dict.lock();
            for (key, value) in incoming {
                dict.insert(key, value)?;
            }
            Ok(Value::None)
        }
        "copy" => Ok(Value::dict(dict.lock().clone())),
        "clear" => {
            *dict.lock() = Dict::new();
            Ok(Value::None)
        }
        _ => Err(no_attribute(receiver, name)),
    }
}

/// `str.format` with `{}`, `{0}`, `{name}` and `{...:spec}` fields.
fn format_str(template: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<String> {
    let mut result = String::new();
    let mut chars = template.chars().peekable();
    let mut auto_index = 0;
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                result.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                result.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => {
                            return Err(ProgramError::value_error(
                                "expected '}' before end of string",
                            ));
                        }
                    }
                }
                let (reference, spec) = match field.split_once(':') {
                    Some((reference, spec)) => (reference, Some(spec)),
                    None => (field.as_str(), None),
                };
                let value = if reference.is_empty() {
                    let value = args.get(auto_index);
                    auto_index += 1;
                    value.ok_or_else(|| {
                        ProgramError::new(
                            ErrorKind::IndexError,
                            format!("Replacement index {} out of range for positional args tuple", auto_index - 1),
                        )
                    })?
                } else if let Ok(position) = reference.parse::<usize>() {
                    args.get(position).ok_or_else(|| {
                        ProgramError::new(
                            ErrorKind::IndexError,
                            format!("Replacement index {} out of range for positional args tuple", position),
                        )
                    })?
                } else {
                    kwargs
                        .iter()
                        .find(|(key, _)| key == reference)
                        .map(|(_, value)| value)
                        .ok_or_else(|| key_error(&Value::str(reference)))?
                };
                match spec {
                    Some(spec) => result.push_str(&apply_format_spec(value, spec)?),
                    None => result.push_str(&value.to_str()),
                }
            }
            '}' => {
                return Err(ProgramError::value_error(
                    "Single '}' encountered in format string",
                ));
            }
            other => result.push(other),
        }
    }
    Ok(result)
}

struct FormatSpec {
    fill: char,
    align: Option<char>,
    zero: bool,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> Option<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut pos = 0;
    let mut parsed = FormatSpec {
        fill: ' ',
        align: None,
        zero: false,
        width: 0,
        grouping: false,
        precision: None,
        kind: None,
    };
    let is_align = |ch: char| matches!(ch, '<' | '>' | '^');
    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = chars[0];
        parsed.align = Some(chars[1]);
        pos = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        parsed.align = chars.first().copied();
        pos = 1;
    }
    if chars.get(pos) == Some(&'0') {
        parsed.zero = true;
        pos += 1;
    }
    let digits = |pos: &mut usize| {
        let start = *pos;
        while chars.get(*pos).is_some_and(char::is_ascii_digit) {
            *pos += 1;
        }
        chars[start..*pos].iter().collect::<String>()
    };
    let width = digits(&mut pos);
    if !width.is_empty() {
        parsed.width = width.parse().ok()?;
    }
    if chars.get(pos) == Some(&',') {
        parsed.grouping = true;
        pos += 1;
    }
    if chars.get(pos) == Some(&'.') {
        pos += 1;
        let precision = digits(&mut pos);
        parsed.precision = Some(precision.parse().ok()?);
    }
    if let Some(kind) = chars.get(pos) {
        if !matches!(kind, 'd' | 'f' | 's' | '%') {
            return None;
        }
        parsed.kind = Some(*kind);
        pos += 1;
    }
    (pos == chars.len()).then_some(parsed)
}

fn group_thousands(digits: &str) -> String {
    let (sign, body) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };
    let (int_part, frac_part) = match body.split_once('.') {
        Some((int_part, frac)) => (int_part, Some(frac)),
        None => (body, None),
    };
    let mut grouped = String::new();
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    match frac_part {
        Some(frac) => format!("{}{}.{}", sign, grouped, frac),
        None => format!("{}{}", sign, grouped),
    }
}

fn format_general(value: f64, precision: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return format_float(value);
    }
    let precision = precision.max(1);
    let exponent = value.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= precision as i32 {
        let formatted = format!("{:.*e}", precision - 1, value);
        let (mantissa, exp) = formatted
            .split_once('e')
            .unwrap_or((formatted.as_str(), "0"));
        let mantissa = trim_fraction(mantissa);
        let exp: i32 = exp.parse().unwrap_or(0);
        format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// Apply a format spec `[[fill]align][0][width][,][.precision][type]`.
pub fn apply_format_spec(value: &Value, spec: &str) -> Result<String> {
    let invalid = || ProgramError::value_error(format!("Invalid format specifier '{}'", spec));
    let spec_parts = parse_spec(spec).ok_or_else(invalid)?;
    if spec_parts.width > MAX_REPEAT_LEN || spec_parts.precision.unwrap_or(0) > MAX_REPEAT_LEN {
        return Err(ProgramError::value_error("Too many decimal digits in format string"));
    }
    let unknown = |code: char| {
        ProgramError::value_error(format!(
            "Unknown format code '{}' for object of type '{}'",
            code,
            value.type_name()
        ))
    };
    let numeric = matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_));
    let body = match (spec_parts.kind, value) {
        (Some('d'), _) => {
            let num = match value {
                Value::Int(_) | Value::Bool(_) => value.as_int().unwrap_or(0),
                _ => return Err(unknown('d')),
            };
            let text = num.to_string();
            if spec_parts.grouping { group_thousands(&text) } else { text }
        }
        (Some('f'), _) | (Some('%'), _) => {
            let code = spec_parts.kind.unwrap_or('f');
            let mut num = value.as_f64().ok_or_else(|| unknown(code))?;
            if code == '%' {
                num *= 100.0;
            }
            let text = format!("{:.*}", spec_parts.precision.unwrap_or(6), num);
            let text = if spec_parts.grouping { group_thousands(&text) } else { text };
            if code == '%' { format!("{}%", text) } else { text }
        }
        (Some('s'), Value::Str(text)) | (None, Value::Str(text)) => match spec_parts.precision {
            Some(limit) => text.chars().take(limit).collect(),
            None => text.clone(),
        },
        (Some(code), _) => return Err(unknown(code)),
        (None, Value::Float(num)) => {
            let text = match spec_parts.precision {
                Some(precision) => format_general(*num, precision),
                None => format_float(*num),
            };
            if spec_parts.grouping { group_thousands(&text) } else { text }
        }
        (None, Value::Int(num)) => {
            let text = num.to_string();
            if spec_parts.grouping { group_thousands(&text) } else { text }
        }
        (None, other) => other.to_str(),
    };

    let len = body.chars().count();
    if len >= spec_parts.width {
        return Ok(body);
    }
    let pad = spec_parts.width - len;
    if spec_parts.zero && spec_parts.align.is_none() && numeric {
        let (sign, digits) = match body.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", body.as_str()),
        };
        return Ok(format!("{}{}{}", sign, "0".repeat(pad), digits));
    }
    let fill = if spec_parts.zero && spec_parts.align.is_none() {
        '0'
    } else {
        spec_parts.fill
    };
    let align = spec_parts
        .align
        .unwrap_or(if numeric { '>' } else { '<' });
    let filler = |count: usize| std::iter::repeat_n(fill, count).collect::<String>();
    Ok(match align {
        '>' => format!("{}{}", filler(pad), body),
        '^' => format!("{}{}{}", filler(pad / 2), body, filler(pad - pad / 2)),
        _ => format!("{}{}", body, filler(pad)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(value: Value, spec: &str) -> String {
        apply_format_spec(&value, spec).expect("valid spec")
    }

    #[test]
    fn applies_precision_width_and_alignment() {
        assert_eq!(spec(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(spec(Value::Int(42), "5d"), "   42");
        assert_eq!(spec(Value::str("ab"), "<4"), "ab  ");
        assert_eq!(spec(Value::str("ab"), "*^6"), "**ab**");
        assert_eq!(spec(Value::Int(7), "03d"), "007");
    }

    #[test]
    fn groups_thousands_and_renders_percent() {
        assert_eq!(spec(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(spec(Value::Float(1234.5), ",.2f"), "1,234.50");
        assert_eq!(spec(Value::Float(0.256), ".1%"), "25.6%");
    }

    #[test]
    fn rejects_mismatched_codes() {
        let err = apply_format_spec(&Value::Float(1.5), "d").unwrap_err();
        assert_eq!(
            err.to_string(),
            "ValueError: Unknown format code 'd' for object of type 'float'"
        );
        assert!(apply_format_spec(&Value::Int(1), "q").is_err());
    }

    #[test]
    fn oversized_width_is_a_catchable_error() {
        let err = apply_format_spec(&Value::Int(1), ">99999999999").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
        assert_eq!(err.message, "Too many decimal digits in format string");
        assert!(apply_format_spec(&Value::Float(1.0), ".99999999999f").is_err());
    }

    #[test]
    fn rounds_floats_through_decimal_text() {
        assert_eq!(round_float(2.675, 2), 2.67);
        assert_eq!(round_float(3.14159, 3), 3.142);
        assert_eq!(round_float(1234.5, -2), 1200.0);
        assert_eq!(round_float(f64::INFINITY, 2), f64::INFINITY);
        assert_eq!(round_float(1e-5, 400), 1e-5);
    }

    #[test]
    fn rounds_ints_to_negative_places() {
        let rounded = |num: i64, places: i64| {
            round(&Value::Int(num), Some(&Value::Int(places))).map(|value| value.repr())
        };
        assert_eq!(rounded(1234, -2).unwrap(), "1200");
        assert_eq!(rounded(1250, -2).unwrap(), "1200");
        assert_eq!(rounded(1350, -2).unwrap(), "1400");
        assert_eq!(rounded(-1251, -2).unwrap(), "-1300");
        assert_eq!(rounded(7, 2).unwrap(), "7");
        assert_eq!(rounded(i64::MAX, -30).unwrap(), "0");
        assert_eq!(rounded(i64::MAX, -18).unwrap_err().kind, ErrorKind::OverflowError);
    }

    #[test]
    fn general_format_uses_significant_digits() {
        assert_eq!(spec(Value::Float(3.14159), ".3"), "3.14");
        assert_eq!(spec(Value::Float(1234.5), ".2"), "1.2e+03");
    }

    #[test]
    fn str_format_resolves_fields() {
        let args = vec![Value::str("Ada"), Value::Int(36)];
        let kwargs = vec![("unit".to_string(), Value::str("years"))];
        let text = format_str("{} is {1} {unit} {{ok}} {0:>5}", &args, &kwargs).unwrap();
        assert_eq!(text, "Ada is 36 years {ok}   Ada");
    }
}
