//! Binary, unary, and comparison operators over the value domain.
//!
//! Python semantics: ints and floats mix (bools count as ints), `/` always
//! yields a float, `//` and `%` floor toward negative infinity, sequences
//! concatenate with `+` and repeat with `*`.

use std::cmp::Ordering;

use xun_core::Value;

use crate::ast::{BinOp, CmpOp};
use crate::error::LangError;

fn type_error(expected: &str, got: &Value) -> LangError {
    LangError::Type {
        expected: expected.to_string(),
        got: got.type_name().to_string(),
    }
}

/// A numeric view of a value; bools are ints.
enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn floor_div_i64(a: i64, b: i64) -> Result<i64, LangError> {
    if b == 0 {
        return Err(LangError::runtime("integer division by zero"));
    }
    let q = a / b;
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn floor_mod_i64(a: i64, b: i64) -> Result<i64, LangError> {
    if b == 0 {
        return Err(LangError::runtime("integer modulo by zero"));
    }
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

pub fn apply_binop(op: BinOp, left: &Value, right: &Value) -> Result<Value, LangError> {
    // Sequence and string forms of + and *.
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            return Ok(Value::Str(format!("{}{}", a, b)))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            return Ok(Value::List(out));
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            return Ok(Value::Tuple(out));
        }
        (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) => {
            return Ok(Value::Str(s.repeat((*n).max(0) as usize)))
        }
        (BinOp::Mul, Value::List(items), Value::Int(n))
        | (BinOp::Mul, Value::Int(n), Value::List(items)) => {
            return Ok(Value::List(repeat_items(items, *n)))
        }
        (BinOp::Mul, Value::Tuple(items), Value::Int(n))
        | (BinOp::Mul, Value::Int(n), Value::Tuple(items)) => {
            return Ok(Value::Tuple(repeat_items(items, *n)))
        }
        _ => {}
    }

    let (a, b) = match (as_num(left), as_num(right)) {
        (Some(a), Some(b)) => (a, b),
        (None, _) => return Err(type_error("number", left)),
        (_, None) => return Err(type_error("number", right)),
    };

    match (a, b) {
        (Num::Int(a), Num::Int(b)) => apply_int(op, a, b),
        (Num::Int(a), Num::Float(b)) => apply_float(op, a as f64, b),
        (Num::Float(a), Num::Int(b)) => apply_float(op, a, b as f64),
        (Num::Float(a), Num::Float(b)) => apply_float(op, a, b),
    }
}

fn repeat_items(items: &[Value], n: i64) -> Vec<Value> {
    let mut out = Vec::new();
    for _ in 0..n.max(0) {
        out.extend(items.iter().cloned());
    }
    out
}

fn apply_int(op: BinOp, a: i64, b: i64) -> Result<Value, LangError> {
    Ok(match op {
        BinOp::Add => Value::Int(
            a.checked_add(b)
                .ok_or_else(|| LangError::runtime("integer overflow"))?,
        ),
        BinOp::Sub => Value::Int(
            a.checked_sub(b)
                .ok_or_else(|| LangError::runtime("integer overflow"))?,
        ),
        BinOp::Mul => Value::Int(
            a.checked_mul(b)
                .ok_or_else(|| LangError::runtime("integer overflow"))?,
        ),
        BinOp::Div => {
            if b == 0 {
                return Err(LangError::runtime("division by zero"));
            }
            Value::Float(a as f64 / b as f64)
        }
        BinOp::FloorDiv => Value::Int(floor_div_i64(a, b)?),
        BinOp::Mod => Value::Int(floor_mod_i64(a, b)?),
        BinOp::Pow => {
            if b < 0 {
                Value::Float((a as f64).powi(b as i32))
            } else {
                let exp = u32::try_from(b)
                    .map_err(|_| LangError::runtime("exponent too large"))?;
                Value::Int(
                    a.checked_pow(exp)
                        .ok_or_else(|| LangError::runtime("integer overflow"))?,
                )
            }
        }
    })
}

fn apply_float(op: BinOp, a: f64, b: f64) -> Result<Value, LangError> {
    Ok(match op {
        BinOp::Add => Value::Float(a + b),
        BinOp::Sub => Value::Float(a - b),
        BinOp::Mul => Value::Float(a * b),
        BinOp::Div => {
            if b == 0.0 {
                return Err(LangError::runtime("division by zero"));
            }
            Value::Float(a / b)
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(LangError::runtime("division by zero"));
            }
            Value::Float((a / b).floor())
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(LangError::runtime("modulo by zero"));
            }
            Value::Float(a - b * (a / b).floor())
        }
        BinOp::Pow => Value::Float(a.powf(b)),
    })
}

/// Python equality: numbers compare across int/float/bool, containers
/// compare structurally.
pub fn py_eq(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_num(left), as_num(right)) {
        return match (a, b) {
            (Num::Int(a), Num::Int(b)) => a == b,
            (Num::Int(a), Num::Float(b)) | (Num::Float(b), Num::Int(a)) => a as f64 == b,
            (Num::Float(a), Num::Float(b)) => a == b,
        };
    }
    match (left, right) {
        (Value::Tuple(a), Value::Tuple(b))
        | (Value::List(a), Value::List(b))
        | (Value::Set(a), Value::Set(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| py_eq(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|((ka, va), (kb, vb))| py_eq(ka, kb) && py_eq(va, vb))
        }
        _ => left == right,
    }
}

/// Python ordering, where defined.
pub fn py_cmp(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (as_num(left), as_num(right)) {
        return match (a, b) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (Num::Int(a), Num::Float(b)) => (a as f64).partial_cmp(&b),
            (Num::Float(a), Num::Int(b)) => a.partial_cmp(&(b as f64)),
            (Num::Float(a), Num::Float(b)) => a.partial_cmp(&b),
        };
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Tuple(a), Value::Tuple(b)) | (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                match py_cmp(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => None,
    }
}

pub fn apply_cmpop(op: CmpOp, left: &Value, right: &Value) -> Result<bool, LangError> {
    let ordering = || {
        py_cmp(left, right).ok_or_else(|| LangError::Type {
            expected: format!("values comparable with {:?}", op),
            got: format!("{} and {}", left.type_name(), right.type_name()),
        })
    };
    Ok(match op {
        CmpOp::Eq => py_eq(left, right),
        CmpOp::NotEq => !py_eq(left, right),
        CmpOp::Lt => ordering()? == Ordering::Less,
        CmpOp::LtE => ordering()? != Ordering::Greater,
        CmpOp::Gt => ordering()? == Ordering::Greater,
        CmpOp::GtE => ordering()? != Ordering::Less,
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        // Identity approximated by equality; the value domain has no
        // object identity.
        CmpOp::Is => py_eq(left, right),
        CmpOp::IsNot => !py_eq(left, right),
    })
}

fn contains(container: &Value, needle: &Value) -> Result<bool, LangError> {
    match container {
        Value::Tuple(items) | Value::List(items) | Value::Set(items) => {
            Ok(items.iter().any(|item| py_eq(item, needle)))
        }
        Value::Map(pairs) => Ok(pairs.iter().any(|(k, _)| py_eq(k, needle))),
        Value::Str(s) => match needle {
            Value::Str(sub) => Ok(s.contains(sub.as_str())),
            other => Err(type_error("str", other)),
        },
        other => Err(type_error("container", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_rounds_toward_negative_infinity() {
        assert_eq!(
            apply_binop(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(),
            Value::Int(-4)
        );
        assert_eq!(
            apply_binop(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(-2)).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn modulo_follows_the_divisor_sign() {
        assert_eq!(
            apply_binop(BinOp::Mod, &Value::Int(-7), &Value::Int(3)).unwrap(),
            Value::Int(2)
        );
    }

    #[test]
    fn true_division_yields_float() {
        assert_eq!(
            apply_binop(BinOp::Div, &Value::Int(3), &Value::Int(2)).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn sequence_concatenation() {
        let a = Value::Tuple(vec![Value::Int(1)]);
        let b = Value::Tuple(vec![Value::Int(2)]);
        assert_eq!(
            apply_binop(BinOp::Add, &a, &b).unwrap(),
            Value::Tuple(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn comparisons_mix_ints_and_floats() {
        assert!(apply_cmpop(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(apply_cmpop(CmpOp::Eq, &Value::Bool(true), &Value::Int(1)).unwrap());
    }

    #[test]
    fn membership_in_list_and_str() {
        let items = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert!(apply_cmpop(CmpOp::In, &Value::Int(2), &items).unwrap());
        assert!(apply_cmpop(
            CmpOp::In,
            &Value::Str("el".into()),
            &Value::Str("hello".into())
        )
        .unwrap());
    }

    #[test]
    fn arithmetic_on_symbolic_values_is_a_type_error() {
        let node = xun_core::CallNode::new(
            "f",
            xun_core::FunctionHash::from("h"),
            vec![],
            vec![],
        );
        let err = apply_binop(BinOp::Add, &Value::Node(node), &Value::Int(1)).unwrap_err();
        assert!(matches!(err, LangError::Type { .. }));
    }
}
