//! Method implementations for the str, sequence, set, and dict types.

use xun_core::Value;

use crate::error::LangError;
use crate::interp::builtins::{iter_items, sort_values};
use crate::interp::operators::py_eq;

fn type_error(expected: &str, got: &Value) -> LangError {
    LangError::Type {
        expected: expected.to_string(),
        got: got.type_name().to_string(),
    }
}

fn arity_error(method: &str, expected: &str) -> LangError {
    LangError::runtime(format!("{}() takes {} argument(s)", method, expected))
}

/// True if `method` mutates its receiver in place. Mutating methods are
/// dispatched through [`call_mut_method`] with a mutable binding.
pub fn is_mutating(method: &str) -> bool {
    matches!(
        method,
        "append"
            | "extend"
            | "insert"
            | "pop"
            | "remove"
            | "clear"
            | "sort"
            | "reverse"
            | "add"
            | "discard"
            | "update"
    )
}

/// Calls a non-mutating method on a value.
pub fn call_method(
    value: &Value,
    method: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, LangError> {
    if !kwargs.is_empty() {
        return Err(LangError::runtime(format!(
            "{}() takes no keyword arguments",
            method
        )));
    }
    match value {
        Value::Str(s) => call_str_method(s, method, args),
        Value::List(items) | Value::Tuple(items) => call_seq_method(items, method, args),
        Value::Map(pairs) => call_dict_method(pairs, method, args),
        Value::Set(items) => call_seq_method(items, method, args),
        other => Err(LangError::runtime(format!(
            "'{}' object has no method '{}'",
            other.type_name(),
            method
        ))),
    }
}

fn call_str_method(s: &str, method: &str, args: Vec<Value>) -> Result<Value, LangError> {
    match method {
        "upper" => Ok(Value::Str(s.to_uppercase())),
        "lower" => Ok(Value::Str(s.to_lowercase())),
        "strip" => Ok(Value::Str(s.trim().to_string())),
        "lstrip" => Ok(Value::Str(s.trim_start().to_string())),
        "rstrip" => Ok(Value::Str(s.trim_end().to_string())),
        "split" => {
            let parts: Vec<Value> = match args.first() {
                Some(Value::Str(sep)) => s
                    .split(sep.as_str())
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
                Some(other) => return Err(type_error("str", other)),
                None => s
                    .split_whitespace()
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
            };
            Ok(Value::List(parts))
        }
        "join" => {
            let [seq] = args.as_slice() else {
                return Err(arity_error("join", "exactly 1"));
            };
            let mut parts = Vec::new();
            for item in iter_items(seq)? {
                match item {
                    Value::Str(part) => parts.push(part),
                    other => return Err(type_error("str", &other)),
                }
            }
            Ok(Value::Str(parts.join(s)))
        }
        "replace" => match args.as_slice() {
            [Value::Str(from), Value::Str(to)] => Ok(Value::Str(s.replace(from.as_str(), to))),
            _ => Err(arity_error("replace", "exactly 2 str")),
        },
        "startswith" => match args.as_slice() {
            [Value::Str(prefix)] => Ok(Value::Bool(s.starts_with(prefix.as_str()))),
            _ => Err(arity_error("startswith", "exactly 1 str")),
        },
        "endswith" => match args.as_slice() {
            [Value::Str(suffix)] => Ok(Value::Bool(s.ends_with(suffix.as_str()))),
            _ => Err(arity_error("endswith", "exactly 1 str")),
        },
        other => Err(LangError::runtime(format!(
            "'str' object has no method '{}'",
            other
        ))),
    }
}

fn call_seq_method(items: &[Value], method: &str, args: Vec<Value>) -> Result<Value, LangError> {
    match method {
        "count" => {
            let [needle] = args.as_slice() else {
                return Err(arity_error("count", "exactly 1"));
            };
            Ok(Value::Int(
                items.iter().filter(|item| py_eq(item, needle)).count() as i64,
            ))
        }
        "index" => {
            let [needle] = args.as_slice() else {
                return Err(arity_error("index", "exactly 1"));
            };
            items
                .iter()
                .position(|item| py_eq(item, needle))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| LangError::runtime(format!("{} is not in sequence", needle)))
        }
        "copy" => Ok(Value::List(items.to_vec())),
        other => Err(LangError::runtime(format!(
            "sequence has no method '{}'",
            other
        ))),
    }
}

fn call_dict_method(
    pairs: &[(Value, Value)],
    method: &str,
    args: Vec<Value>,
) -> Result<Value, LangError> {
    match method {
        "get" => {
            let (key, default) = match args.as_slice() {
                [key] => (key, Value::None),
                [key, default] => (key, default.clone()),
                _ => return Err(arity_error("get", "1 or 2")),
            };
            Ok(pairs
                .iter()
                .find(|(k, _)| py_eq(k, key))
                .map(|(_, v)| v.clone())
                .unwrap_or(default))
        }
        "keys" => Ok(Value::List(pairs.iter().map(|(k, _)| k.clone()).collect())),
        "values" => Ok(Value::List(pairs.iter().map(|(_, v)| v.clone()).collect())),
        "items" => Ok(Value::List(
            pairs
                .iter()
                .map(|(k, v)| Value::Tuple(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        other => Err(LangError::runtime(format!(
            "'dict' object has no method '{}'",
            other
        ))),
    }
}

/// Calls a mutating method on a bound value, returning the method's
/// result (usually `None`, but `pop` returns the removed element).
pub fn call_mut_method(
    value: &mut Value,
    method: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, LangError> {
    if !kwargs.is_empty() && method != "sort" {
        return Err(LangError::runtime(format!(
            "{}() takes no keyword arguments",
            method
        )));
    }
    match value {
        Value::List(items) => match method {
            "append" => {
                let [item] = take_args::<1>(args, "append")?;
                items.push(item);
                Ok(Value::None)
            }
            "extend" => {
                let [seq] = take_args::<1>(args, "extend")?;
                items.extend(iter_items(&seq)?);
                Ok(Value::None)
            }
            "insert" => {
                let [index, item] = take_args::<2>(args, "insert")?;
                let Value::Int(i) = index else {
                    return Err(type_error("int", &index));
                };
                let idx = (i.max(0) as usize).min(items.len());
                items.insert(idx, item);
                Ok(Value::None)
            }
            "pop" => {
                if items.is_empty() {
                    return Err(LangError::runtime("pop from empty list"));
                }
                match args.as_slice() {
                    [] => Ok(items.pop().expect("list is non-empty")),
                    [Value::Int(i)] => {
                        let len = items.len();
                        let idx = if *i < 0 { *i + len as i64 } else { *i };
                        if idx < 0 || idx as usize >= len {
                            return Err(LangError::runtime("pop index out of range"));
                        }
                        Ok(items.remove(idx as usize))
                    }
                    _ => Err(arity_error("pop", "at most 1 int")),
                }
            }
            "remove" => {
                let [needle] = take_args::<1>(args, "remove")?;
                match items.iter().position(|item| py_eq(item, &needle)) {
                    Some(i) => {
                        items.remove(i);
                        Ok(Value::None)
                    }
                    None => Err(LangError::runtime(format!("{} not in list", needle))),
                }
            }
            "clear" => {
                items.clear();
                Ok(Value::None)
            }
            "sort" => {
                let mut reverse = false;
                for (name, kw_value) in &kwargs {
                    if name == "reverse" {
                        reverse = kw_value.is_truthy();
                    } else {
                        return Err(LangError::runtime(format!(
                            "sort() does not support the '{}' argument",
                            name
                        )));
                    }
                }
                *items = sort_values(std::mem::take(items), reverse)?;
                Ok(Value::None)
            }
            "reverse" => {
                items.reverse();
                Ok(Value::None)
            }
            other => Err(LangError::runtime(format!(
                "'list' object has no method '{}'",
                other
            ))),
        },
        Value::Set(_) => match method {
            "add" => {
                let [item] = take_args::<1>(args, "add")?;
                let Value::Set(items) = std::mem::replace(value, Value::None) else {
                    unreachable!("receiver is a set");
                };
                let mut items = items;
                items.push(item);
                *value = Value::set_of(items);
                Ok(Value::None)
            }
            "discard" => {
                let [needle] = take_args::<1>(args, "discard")?;
                let Value::Set(items) = value else {
                    unreachable!("receiver is a set");
                };
                items.retain(|item| !py_eq(item, &needle));
                Ok(Value::None)
            }
            other => Err(LangError::runtime(format!(
                "'set' object has no method '{}'",
                other
            ))),
        },
        Value::Map(pairs) => match method {
            "update" => {
                let [other] = take_args::<1>(args, "update")?;
                let Value::Map(new_pairs) = other else {
                    return Err(type_error("dict", &other));
                };
                let mut merged = pairs.clone();
                merged.extend(new_pairs);
                match Value::map_of(merged) {
                    Value::Map(m) => *pairs = m,
                    _ => unreachable!("map_of returns a map"),
                }
                Ok(Value::None)
            }
            "pop" => {
                let [key] = take_args::<1>(args, "pop")?;
                match pairs.iter().position(|(k, _)| py_eq(k, &key)) {
                    Some(i) => Ok(pairs.remove(i).1),
                    None => Err(LangError::runtime(format!("KeyError: {}", key))),
                }
            }
            other => Err(LangError::runtime(format!(
                "'dict' object has no method '{}'",
                other
            ))),
        },
        other => Err(LangError::runtime(format!(
            "'{}' object has no mutating method '{}'",
            other.type_name(),
            method
        ))),
    }
}

fn take_args<const N: usize>(args: Vec<Value>, method: &str) -> Result<[Value; N], LangError> {
    args.try_into()
        .map_err(|_| arity_error(method, &format!("exactly {}", N)))
}
