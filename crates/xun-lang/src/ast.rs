//! The restricted internal AST procedures are lowered into.
//!
//! Decoration parses a procedure once and keeps this IR in the function
//! image; no source reflection happens after that. The IR is serializable
//! so images can cross process boundaries. Everything the sub-language
//! rejects simply has no representation here.

use serde::{Deserialize, Serialize};
use xun_core::shape::{Shape, ShapeItem};

/// A literal constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    /// The runtime value of this literal.
    pub fn value(&self) -> xun_core::Value {
        match self {
            Literal::None => xun_core::Value::None,
            Literal::Bool(b) => xun_core::Value::Bool(*b),
            Literal::Int(i) => xun_core::Value::Int(*i),
            Literal::Float(f) => xun_core::Value::Float(*f),
            Literal::Str(s) => xun_core::Value::Str(s.clone()),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

/// Boolean operators (short-circuiting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

/// The kind of a comprehension display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompKind {
    List,
    Set,
    /// Generator expressions are materialized eagerly.
    Generator,
}

/// One `for target in iter if cond...` clause of a comprehension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    pub target: Target,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

/// An assignment target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Target {
    Name(String),
    Tuple(Vec<Target>),
    Starred(Box<Target>),
}

impl Target {
    /// All names bound by this target, in source order.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Target::Name(name) => vec![name.as_str()],
            Target::Tuple(items) => items.iter().flat_map(Target::names).collect(),
            Target::Starred(inner) => inner.names(),
        }
    }

    /// The shape tuple this target destructures a value into. `None` for a
    /// plain name (no destructuring happens).
    pub fn shape(&self) -> Option<Shape> {
        match self {
            Target::Name(_) => None,
            Target::Tuple(items) => Some(shape_of(items)),
            Target::Starred(_) => None,
        }
    }
}

/// The shape tuple of a sequence of targets.
pub fn shape_of(items: &[Target]) -> Shape {
    let mut out: Vec<ShapeItem> = Vec::new();
    for item in items {
        match item {
            Target::Name(_) => match out.last_mut() {
                Some(ShapeItem::Count(n)) => *n += 1,
                _ => out.push(ShapeItem::Count(1)),
            },
            Target::Tuple(inner) => out.push(ShapeItem::Nested(shape_of(inner))),
            Target::Starred(_) => out.push(ShapeItem::Star),
        }
    }
    Shape::new(out)
}

/// An expression of the sub-language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Call {
        func: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    MethodCall {
        target: Box<Expr>,
        method: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    IfElse {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        value: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Comprehension {
        kind: CompKind,
        element: Box<Expr>,
        generators: Vec<Generator>,
    },
}

/// A statement of the sub-language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Assign { target: Target, value: Expr },
    AugAssign { target: String, op: BinOp, value: Expr },
    Expr(Expr),
    Return(Option<Expr>),
    If { test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt> },
    For { target: Target, iter: Expr, body: Vec<Stmt> },
    While { test: Expr, body: Vec<Stmt> },
    Pass,
}

/// One procedure parameter with an optional literal default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub default: Option<Literal>,
}
