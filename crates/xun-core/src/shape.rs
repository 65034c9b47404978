//! Shape tuples: recursive descriptors for destructuring assignments.
//!
//! A shape describes how a tuple target like `a, (b, c), *rest, d` consumes
//! a value: an integer counts scalar elements, a nested shape recurses, and
//! a star element consumes the remaining interior.
//!
//! Shapes are applied two ways. Against a symbolic [`CallNode`], whose value
//! is not known yet, unpacking yields subscripted nodes selecting into the
//! future result. Against a concrete sequence, unpacking destructures it,
//! with the star element absorbing whatever the fixed elements leave over.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::node::{CallNode, SubscriptKey};
use crate::value::Value;

/// One element of a shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeItem {
    /// `n` consecutive scalar targets.
    Count(usize),
    /// A nested tuple target.
    Nested(Shape),
    /// A starred target consuming the remaining interior.
    Star,
}

/// A recursive destructuring descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub items: Vec<ShapeItem>,
}

impl Shape {
    pub fn new(items: Vec<ShapeItem>) -> Shape {
        Shape { items }
    }

    /// The number of assignment slots this shape produces at its own level.
    pub fn slots(&self) -> usize {
        self.items
            .iter()
            .map(|item| match item {
                ShapeItem::Count(n) => *n,
                ShapeItem::Nested(_) | ShapeItem::Star => 1,
            })
            .sum()
    }

    fn star_position(&self) -> Option<usize> {
        self.items.iter().position(|i| matches!(i, ShapeItem::Star))
    }
}

/// Unpacks a symbolic node into a tuple tree of subscripted nodes.
pub fn unpack_node(node: &CallNode, shape: &Shape, prefix: &[SubscriptKey]) -> Value {
    let mut output = Vec::new();
    let mut idx: i64 = 0;
    for item in &shape.items {
        match item {
            ShapeItem::Count(n) => {
                for _ in 0..*n {
                    output.push(Value::Node(subscripted(node, prefix, idx)));
                    idx += 1;
                }
            }
            ShapeItem::Nested(inner) => {
                let mut sub = prefix.to_vec();
                sub.push(SubscriptKey::Int(idx));
                idx += 1;
                output.push(unpack_node(node, inner, &sub));
            }
            ShapeItem::Star => {
                output.push(Value::Node(subscripted(node, prefix, idx)));
                idx += 1;
            }
        }
    }
    Value::Tuple(output)
}

fn subscripted(node: &CallNode, prefix: &[SubscriptKey], idx: i64) -> CallNode {
    let mut out = node.base();
    out.subscript = prefix.to_vec();
    out.subscript.push(SubscriptKey::Int(idx));
    out
}

/// Destructures a concrete sequence according to `shape`, yielding one
/// value per assignment slot. A star element absorbs the interior as a
/// list; without one the sequence length must match exactly.
pub fn unpack_value(shape: &Shape, value: &Value) -> Result<Vec<Value>, CoreError> {
    let items: &[Value] = match value {
        Value::Tuple(items) | Value::List(items) | Value::Set(items) => items,
        other => {
            return Err(CoreError::Unpack {
                type_name: other.type_name(),
                len: 0,
                expected: shape.slots(),
            })
        }
    };

    let mismatch = || CoreError::Unpack {
        type_name: value.type_name(),
        len: items.len(),
        expected: shape.slots(),
    };

    let star = shape.star_position();
    let fixed: usize = shape
        .items
        .iter()
        .filter(|i| !matches!(i, ShapeItem::Star))
        .map(|i| match i {
            ShapeItem::Count(n) => *n,
            _ => 1,
        })
        .sum();

    match star {
        None if items.len() != fixed => return Err(mismatch()),
        Some(_) if items.len() < fixed => return Err(mismatch()),
        _ => {}
    }

    let mut output = Vec::new();
    let mut cursor = 0usize;
    let star_take = items.len() - fixed;
    for item in &shape.items {
        match item {
            ShapeItem::Count(n) => {
                for _ in 0..*n {
                    output.push(items[cursor].clone());
                    cursor += 1;
                }
            }
            ShapeItem::Nested(inner) => {
                let element = &items[cursor];
                cursor += 1;
                output.push(Value::Tuple(unpack_value(inner, element)?));
            }
            ShapeItem::Star => {
                output.push(Value::List(items[cursor..cursor + star_take].to_vec()));
                cursor += star_take;
            }
        }
    }
    Ok(output)
}
