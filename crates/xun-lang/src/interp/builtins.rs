//! Builtin functions available to procedures.

use xun_core::Value;

use crate::error::LangError;
use crate::interp::operators::{py_cmp, py_eq};

/// Outcome of a builtin dispatch attempt.
pub enum BuiltinResult {
    Handled(Result<Value, LangError>),
    NotBuiltin,
}

fn arity_error(name: &str, expected: &str) -> LangError {
    LangError::runtime(format!("{}() takes {} argument(s)", name, expected))
}

fn type_error(expected: &str, got: &Value) -> LangError {
    LangError::Type {
        expected: expected.to_string(),
        got: got.type_name().to_string(),
    }
}

/// Elements of an iterable value. Strings iterate per character, dicts
/// over their keys.
pub fn iter_items(value: &Value) -> Result<Vec<Value>, LangError> {
    match value {
        Value::Tuple(items) | Value::List(items) | Value::Set(items) => Ok(items.clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Map(pairs) => Ok(pairs.iter().map(|(k, _)| k.clone()).collect()),
        other => Err(type_error("iterable", other)),
    }
}

/// The unquoted string form used by `print` and `str`.
pub fn display_string(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => format!("{}", other),
    }
}

/// True for names the builtin table covers.
pub fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "len"
            | "range"
            | "sorted"
            | "sum"
            | "min"
            | "max"
            | "abs"
            | "list"
            | "tuple"
            | "set"
            | "dict"
            | "str"
            | "int"
            | "float"
            | "bool"
            | "enumerate"
            | "zip"
            | "reversed"
            | "print"
    )
}

/// Dispatches a builtin call. Returns `NotBuiltin` for unknown names so
/// the caller can try module helpers.
pub fn call_builtin(
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> BuiltinResult {
    if !is_builtin(name) {
        return BuiltinResult::NotBuiltin;
    }
    BuiltinResult::Handled(dispatch(name, args, kwargs))
}

fn dispatch(
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, LangError> {
    if !kwargs.is_empty() && !matches!(name, "sorted" | "enumerate") {
        return Err(LangError::runtime(format!(
            "{}() takes no keyword arguments",
            name
        )));
    }
    match name {
        "len" => {
            let [value] = one(&args, "len")?;
            let len = match value {
                Value::Tuple(items) | Value::List(items) | Value::Set(items) => items.len(),
                Value::Map(pairs) => pairs.len(),
                Value::Str(s) => s.chars().count(),
                other => return Err(type_error("sized value", other)),
            };
            Ok(Value::Int(len as i64))
        }
        "range" => builtin_range(&args),
        "sorted" => builtin_sorted(args, kwargs),
        "sum" => {
            if args.is_empty() || args.len() > 2 {
                return Err(arity_error("sum", "1 or 2"));
            }
            let items = iter_items(&args[0])?;
            let mut acc = args.get(1).cloned().unwrap_or(Value::Int(0));
            for item in items {
                acc = super::operators::apply_binop(crate::ast::BinOp::Add, &acc, &item)?;
            }
            Ok(acc)
        }
        "min" => builtin_extreme(&args, "min", std::cmp::Ordering::Less),
        "max" => builtin_extreme(&args, "max", std::cmp::Ordering::Greater),
        "abs" => {
            let [value] = one(&args, "abs")?;
            match value {
                Value::Int(i) => Ok(Value::Int(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(type_error("number", other)),
            }
        }
        "list" => Ok(Value::List(optional_iterable(&args, "list")?)),
        "tuple" => Ok(Value::Tuple(optional_iterable(&args, "tuple")?)),
        "set" => Ok(Value::set_of(optional_iterable(&args, "set")?)),
        "dict" => {
            if args.is_empty() {
                return Ok(Value::Map(vec![]));
            }
            let [value] = one(&args, "dict")?;
            match value {
                Value::Map(pairs) => Ok(Value::map_of(pairs.clone())),
                other => {
                    let mut pairs = Vec::new();
                    for item in iter_items(other)? {
                        match item {
                            Value::Tuple(kv) | Value::List(kv) if kv.len() == 2 => {
                                pairs.push((kv[0].clone(), kv[1].clone()))
                            }
                            other => return Err(type_error("key-value pair", &other)),
                        }
                    }
                    Ok(Value::map_of(pairs))
                }
            }
        }
        "str" => {
            let [value] = one(&args, "str")?;
            Ok(Value::Str(display_string(value)))
        }
        "int" => {
            let [value] = one(&args, "int")?;
            match value {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Bool(b) => Ok(Value::Int(*b as i64)),
                Value::Float(f) => Ok(Value::Int(*f as i64)),
                Value::Str(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| LangError::runtime(format!("invalid int literal: {:?}", s))),
                other => Err(type_error("number or str", other)),
            }
        }
        "float" => {
            let [value] = one(&args, "float")?;
            match value {
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Bool(b) => Ok(Value::Float(*b as i64 as f64)),
                Value::Float(f) => Ok(Value::Float(*f)),
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| LangError::runtime(format!("invalid float literal: {:?}", s))),
                other => Err(type_error("number or str", other)),
            }
        }
        "bool" => {
            let [value] = one(&args, "bool")?;
            Ok(Value::Bool(value.is_truthy()))
        }
        "enumerate" => {
            if args.is_empty() || args.len() > 2 {
                return Err(arity_error("enumerate", "1 or 2"));
            }
            let mut start = match args.get(1) {
                Some(Value::Int(i)) => *i,
                Some(other) => return Err(type_error("int", other)),
                None => 0,
            };
            for (name, value) in &kwargs {
                if name == "start" {
                    match value {
                        Value::Int(i) => start = *i,
                        other => return Err(type_error("int", other)),
                    }
                } else {
                    return Err(LangError::runtime(format!(
                        "enumerate() got an unexpected keyword argument '{}'",
                        name
                    )));
                }
            }
            let items = iter_items(&args[0])?;
            Ok(Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| Value::Tuple(vec![Value::Int(start + i as i64), item]))
                    .collect(),
            ))
        }
        "zip" => {
            let columns: Vec<Vec<Value>> = args
                .iter()
                .map(iter_items)
                .collect::<Result<_, _>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::List(
                (0..len)
                    .map(|i| Value::Tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        "reversed" => {
            let [value] = one(&args, "reversed")?;
            let mut items = iter_items(value)?;
            items.reverse();
            Ok(Value::List(items))
        }
        "print" => {
            let line = args
                .iter()
                .map(display_string)
                .collect::<Vec<_>>()
                .join(" ");
            println!("{}", line);
            Ok(Value::None)
        }
        _ => unreachable!("dispatch is only called for known builtins"),
    }
}

fn one<'a>(args: &'a [Value], name: &str) -> Result<[&'a Value; 1], LangError> {
    match args {
        [value] => Ok([value]),
        _ => Err(arity_error(name, "exactly 1")),
    }
}

fn optional_iterable(args: &[Value], name: &str) -> Result<Vec<Value>, LangError> {
    match args {
        [] => Ok(Vec::new()),
        [value] => iter_items(value),
        _ => Err(arity_error(name, "at most 1")),
    }
}

fn builtin_range(args: &[Value]) -> Result<Value, LangError> {
    let as_int = |value: &Value| match value {
        Value::Int(i) => Ok(*i),
        other => Err(type_error("int", other)),
    };
    let (start, stop, step) = match args {
        [stop] => (0, as_int(stop)?, 1),
        [start, stop] => (as_int(start)?, as_int(stop)?, 1),
        [start, stop, step] => (as_int(start)?, as_int(stop)?, as_int(step)?),
        _ => return Err(arity_error("range", "1 to 3")),
    };
    if step == 0 {
        return Err(LangError::runtime("range() step must not be zero"));
    }
    let mut out = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        out.push(Value::Int(current));
        current += step;
    }
    Ok(Value::List(out))
}

fn builtin_sorted(args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Value, LangError> {
    if args.len() != 1 {
        return Err(arity_error("sorted", "exactly 1 positional"));
    }
    let mut reverse = false;
    for (name, value) in &kwargs {
        match name.as_str() {
            "reverse" => reverse = value.is_truthy(),
            "key" if matches!(value, Value::None) => {}
            other => {
                return Err(LangError::runtime(format!(
                    "sorted() does not support the '{}' argument",
                    other
                )))
            }
        }
    }
    let items = iter_items(&args[0])?;
    sort_values(items, reverse).map(Value::List)
}

/// Sorts with Python ordering; mixed incomparable element kinds fail.
pub fn sort_values(mut items: Vec<Value>, reverse: bool) -> Result<Vec<Value>, LangError> {
    for window in items.windows(2) {
        if py_cmp(&window[0], &window[1]).is_none() {
            return Err(LangError::Type {
                expected: "mutually comparable elements".to_string(),
                got: format!(
                    "{} and {}",
                    window[0].type_name(),
                    window[1].type_name()
                ),
            });
        }
    }
    items.sort_by(|a, b| py_cmp(a, b).unwrap_or_else(|| a.cmp(b)));
    if reverse {
        items.reverse();
    }
    Ok(items)
}

fn builtin_extreme(
    args: &[Value],
    name: &str,
    keep: std::cmp::Ordering,
) -> Result<Value, LangError> {
    let items = match args {
        [] => return Err(arity_error(name, "at least 1")),
        [single] => iter_items(single)?,
        many => many.to_vec(),
    };
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| LangError::runtime(format!("{}() of an empty sequence", name)))?;
    for item in iter {
        let ordering = py_cmp(&item, &best).ok_or_else(|| LangError::Type {
            expected: "mutually comparable elements".to_string(),
            got: format!("{} and {}", item.type_name(), best.type_name()),
        })?;
        if ordering == keep {
            best = item;
        }
    }
    Ok(best)
}
