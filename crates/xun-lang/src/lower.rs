//! Lowering from the `rustpython-parser` AST into the internal AST.
//!
//! Lowering is where the sub-language boundary is enforced: any construct
//! without an internal representation is rejected with `InvalidProcedure`
//! naming the construct, at decoration time rather than mid-run.

use rustpython_parser::ast as py;

use crate::ast::{
    BinOp, BoolOp, CmpOp, CompKind, Expr, Generator, Literal, Stmt, Target, UnaryOp,
};
use crate::error::LangError;

fn invalid(function: &str, reason: impl Into<String>) -> LangError {
    LangError::InvalidProcedure {
        function: function.to_string(),
        reason: reason.into(),
    }
}

/// True for the constant-binding block: a `with` statement whose single
/// context item is a bare ellipsis and binds no name.
pub fn is_constant_block(stmt: &py::Stmt) -> bool {
    let py::Stmt::With(with) = stmt else {
        return false;
    };
    if with.items.len() != 1 {
        return false;
    }
    let item = &with.items[0];
    if item.optional_vars.is_some() {
        return false;
    }
    matches!(
        &item.context_expr,
        py::Expr::Constant(c) if matches!(c.value, py::Constant::Ellipsis)
    )
}

/// Lowers a statement of a procedure body or constant block.
pub fn lower_stmt(stmt: &py::Stmt, function: &str) -> Result<Stmt, LangError> {
    match stmt {
        py::Stmt::Assign(assign) => {
            if assign.targets.len() != 1 {
                return Err(invalid(function, "chained assignment is not supported"));
            }
            Ok(Stmt::Assign {
                target: lower_target(&assign.targets[0], function)?,
                value: lower_expr(&assign.value, function)?,
            })
        }
        py::Stmt::AugAssign(aug) => {
            let py::Expr::Name(name) = aug.target.as_ref() else {
                return Err(invalid(
                    function,
                    "augmented assignment target must be a name",
                ));
            };
            Ok(Stmt::AugAssign {
                target: name.id.to_string(),
                op: lower_binop(&aug.op, function)?,
                value: lower_expr(&aug.value, function)?,
            })
        }
        py::Stmt::Expr(expr) => Ok(Stmt::Expr(lower_expr(&expr.value, function)?)),
        py::Stmt::Return(ret) => Ok(Stmt::Return(match &ret.value {
            Some(value) => Some(lower_expr(value, function)?),
            None => None,
        })),
        py::Stmt::If(if_stmt) => Ok(Stmt::If {
            test: lower_expr(&if_stmt.test, function)?,
            body: lower_body(&if_stmt.body, function)?,
            orelse: lower_body(&if_stmt.orelse, function)?,
        }),
        py::Stmt::For(for_stmt) => {
            if !for_stmt.orelse.is_empty() {
                return Err(invalid(function, "for-else is not supported"));
            }
            Ok(Stmt::For {
                target: lower_target(&for_stmt.target, function)?,
                iter: lower_expr(&for_stmt.iter, function)?,
                body: lower_body(&for_stmt.body, function)?,
            })
        }
        py::Stmt::While(while_stmt) => {
            if !while_stmt.orelse.is_empty() {
                return Err(invalid(function, "while-else is not supported"));
            }
            Ok(Stmt::While {
                test: lower_expr(&while_stmt.test, function)?,
                body: lower_body(&while_stmt.body, function)?,
            })
        }
        py::Stmt::Pass(_) => Ok(Stmt::Pass),
        other => Err(invalid(
            function,
            format!("unsupported statement: {:?}", std::mem::discriminant(other)),
        )),
    }
}

pub fn lower_body(body: &[py::Stmt], function: &str) -> Result<Vec<Stmt>, LangError> {
    body.iter().map(|s| lower_stmt(s, function)).collect()
}

pub fn lower_body_refs(body: &[&py::Stmt], function: &str) -> Result<Vec<Stmt>, LangError> {
    body.iter().map(|s| lower_stmt(s, function)).collect()
}

/// Lowers an assignment target.
pub fn lower_target(expr: &py::Expr, function: &str) -> Result<Target, LangError> {
    match expr {
        py::Expr::Name(name) => Ok(Target::Name(name.id.to_string())),
        py::Expr::Tuple(tuple) => Ok(Target::Tuple(
            tuple
                .elts
                .iter()
                .map(|e| lower_target(e, function))
                .collect::<Result<_, _>>()?,
        )),
        py::Expr::List(list) => Ok(Target::Tuple(
            list.elts
                .iter()
                .map(|e| lower_target(e, function))
                .collect::<Result<_, _>>()?,
        )),
        py::Expr::Starred(starred) => Ok(Target::Starred(Box::new(lower_target(
            &starred.value,
            function,
        )?))),
        _ => Err(invalid(function, "unsupported assignment target")),
    }
}

/// Lowers an expression.
pub fn lower_expr(expr: &py::Expr, function: &str) -> Result<Expr, LangError> {
    match expr {
        py::Expr::Constant(constant) => lower_constant(&constant.value, function),
        py::Expr::Name(name) => Ok(Expr::Name(name.id.to_string())),
        py::Expr::Tuple(tuple) => Ok(Expr::Tuple(lower_all(&tuple.elts, function)?)),
        py::Expr::List(list) => Ok(Expr::List(lower_all(&list.elts, function)?)),
        py::Expr::Set(set) => Ok(Expr::Set(lower_all(&set.elts, function)?)),
        py::Expr::Dict(dict) => {
            let mut pairs = Vec::with_capacity(dict.keys.len());
            for (key, value) in dict.keys.iter().zip(dict.values.iter()) {
                let Some(key) = key else {
                    return Err(invalid(function, "dict unpacking is not supported"));
                };
                pairs.push((lower_expr(key, function)?, lower_expr(value, function)?));
            }
            Ok(Expr::Dict(pairs))
        }
        py::Expr::Call(call) => lower_call(call, function),
        py::Expr::BinOp(binop) => Ok(Expr::BinOp {
            op: lower_binop(&binop.op, function)?,
            left: Box::new(lower_expr(&binop.left, function)?),
            right: Box::new(lower_expr(&binop.right, function)?),
        }),
        py::Expr::UnaryOp(unary) => Ok(Expr::UnaryOp {
            op: match unary.op {
                py::UnaryOp::USub => UnaryOp::Neg,
                py::UnaryOp::UAdd => UnaryOp::Pos,
                py::UnaryOp::Not => UnaryOp::Not,
                py::UnaryOp::Invert => {
                    return Err(invalid(function, "bitwise invert is not supported"))
                }
            },
            operand: Box::new(lower_expr(&unary.operand, function)?),
        }),
        py::Expr::BoolOp(boolop) => Ok(Expr::BoolOp {
            op: match boolop.op {
                py::BoolOp::And => BoolOp::And,
                py::BoolOp::Or => BoolOp::Or,
            },
            values: lower_all(&boolop.values, function)?,
        }),
        py::Expr::Compare(cmp) => Ok(Expr::Compare {
            left: Box::new(lower_expr(&cmp.left, function)?),
            ops: cmp
                .ops
                .iter()
                .map(|op| lower_cmpop(op, function))
                .collect::<Result<_, _>>()?,
            comparators: lower_all(&cmp.comparators, function)?,
        }),
        py::Expr::IfExp(ifexp) => Ok(Expr::IfElse {
            test: Box::new(lower_expr(&ifexp.test, function)?),
            body: Box::new(lower_expr(&ifexp.body, function)?),
            orelse: Box::new(lower_expr(&ifexp.orelse, function)?),
        }),
        py::Expr::Subscript(sub) => {
            let value = Box::new(lower_expr(&sub.value, function)?);
            if let py::Expr::Slice(slice) = sub.slice.as_ref() {
                Ok(Expr::Slice {
                    value,
                    lower: lower_opt(&slice.lower, function)?,
                    upper: lower_opt(&slice.upper, function)?,
                    step: lower_opt(&slice.step, function)?,
                })
            } else {
                Ok(Expr::Subscript {
                    value,
                    index: Box::new(lower_expr(&sub.slice, function)?),
                })
            }
        }
        py::Expr::ListComp(comp) => lower_comprehension(
            CompKind::List,
            &comp.elt,
            &comp.generators,
            function,
        ),
        py::Expr::SetComp(comp) => lower_comprehension(
            CompKind::Set,
            &comp.elt,
            &comp.generators,
            function,
        ),
        py::Expr::GeneratorExp(comp) => lower_comprehension(
            CompKind::Generator,
            &comp.elt,
            &comp.generators,
            function,
        ),
        other => Err(invalid(
            function,
            format!(
                "unsupported expression: {:?}",
                std::mem::discriminant(other)
            ),
        )),
    }
}

fn lower_call(call: &py::ExprCall, function: &str) -> Result<Expr, LangError> {
    let args = lower_all(&call.args, function)?;
    let mut kwargs = Vec::with_capacity(call.keywords.len());
    for keyword in &call.keywords {
        let Some(arg) = &keyword.arg else {
            return Err(invalid(function, "** argument expansion is not supported"));
        };
        kwargs.push((arg.to_string(), lower_expr(&keyword.value, function)?));
    }
    match call.func.as_ref() {
        py::Expr::Name(name) => Ok(Expr::Call {
            func: name.id.to_string(),
            args,
            kwargs,
        }),
        py::Expr::Attribute(attr) => Ok(Expr::MethodCall {
            target: Box::new(lower_expr(&attr.value, function)?),
            method: attr.attr.to_string(),
            args,
            kwargs,
        }),
        _ => Err(invalid(function, "only named function calls are supported")),
    }
}

fn lower_comprehension(
    kind: CompKind,
    elt: &py::Expr,
    generators: &[py::Comprehension],
    function: &str,
) -> Result<Expr, LangError> {
    let mut lowered = Vec::with_capacity(generators.len());
    for generator in generators {
        if generator.is_async {
            return Err(invalid(function, "async comprehensions are not supported"));
        }
        lowered.push(Generator {
            target: lower_target(&generator.target, function)?,
            iter: lower_expr(&generator.iter, function)?,
            ifs: lower_all(&generator.ifs, function)?,
        });
    }
    Ok(Expr::Comprehension {
        kind,
        element: Box::new(lower_expr(elt, function)?),
        generators: lowered,
    })
}

fn lower_opt(
    expr: &Option<Box<py::Expr>>,
    function: &str,
) -> Result<Option<Box<Expr>>, LangError> {
    match expr {
        Some(e) => Ok(Some(Box::new(lower_expr(e, function)?))),
        None => Ok(None),
    }
}

fn lower_all(exprs: &[py::Expr], function: &str) -> Result<Vec<Expr>, LangError> {
    exprs.iter().map(|e| lower_expr(e, function)).collect()
}

fn lower_constant(constant: &py::Constant, function: &str) -> Result<Expr, LangError> {
    let literal = match constant {
        py::Constant::None => Literal::None,
        py::Constant::Bool(b) => Literal::Bool(*b),
        py::Constant::Int(i) => {
            let value: i64 = i
                .try_into()
                .map_err(|_| invalid(function, "integer literal out of range"))?;
            Literal::Int(value)
        }
        py::Constant::Float(f) => Literal::Float(*f),
        py::Constant::Str(s) => Literal::Str(s.clone()),
        py::Constant::Tuple(items) => {
            let lowered = items
                .iter()
                .map(|c| lower_constant(c, function))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Expr::Tuple(lowered));
        }
        py::Constant::Bytes(_) => {
            return Err(invalid(function, "bytes literals are not supported"))
        }
        py::Constant::Complex { .. } => {
            return Err(invalid(function, "complex literals are not supported"))
        }
        py::Constant::Ellipsis => {
            return Err(invalid(function, "ellipsis outside a constant block"))
        }
    };
    Ok(Expr::Literal(literal))
}

fn lower_binop(op: &py::Operator, function: &str) -> Result<BinOp, LangError> {
    Ok(match op {
        py::Operator::Add => BinOp::Add,
        py::Operator::Sub => BinOp::Sub,
        py::Operator::Mult => BinOp::Mul,
        py::Operator::Div => BinOp::Div,
        py::Operator::FloorDiv => BinOp::FloorDiv,
        py::Operator::Mod => BinOp::Mod,
        py::Operator::Pow => BinOp::Pow,
        _ => return Err(invalid(function, "unsupported binary operator")),
    })
}

fn lower_cmpop(op: &py::CmpOp, function: &str) -> Result<CmpOp, LangError> {
    Ok(match op {
        py::CmpOp::Eq => CmpOp::Eq,
        py::CmpOp::NotEq => CmpOp::NotEq,
        py::CmpOp::Lt => CmpOp::Lt,
        py::CmpOp::LtE => CmpOp::LtE,
        py::CmpOp::Gt => CmpOp::Gt,
        py::CmpOp::GtE => CmpOp::GtE,
        py::CmpOp::In => CmpOp::In,
        py::CmpOp::NotIn => CmpOp::NotIn,
        py::CmpOp::Is => CmpOp::Is,
        py::CmpOp::IsNot => CmpOp::IsNot,
    })
}
