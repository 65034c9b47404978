//! Procedure parsing: separating the constant-binding block from the body
//! and putting the block's statements into a runnable order.
//!
//! The constant block lets users write bindings in any order; to make the
//! block executable a statement dependency graph is built (an edge from A
//! to B iff B references a name A assigns) and topologically sorted. The
//! graph must be acyclic.

use std::collections::{HashMap, HashSet};

use rustpython_parser::ast as py;

use crate::ast::{Expr, Generator, Param, Stmt};
use crate::error::LangError;
use crate::lower;

/// A parsed, validated procedure. `constants` is already topologically
/// sorted; `body` keeps its source order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Procedure {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub constants: Vec<Stmt>,
}

/// Parses one decorated function definition into a [`Procedure`].
pub fn parse_procedure(def: &py::StmtFunctionDef) -> Result<Procedure, LangError> {
    let name = def.name.to_string();
    let invalid = |reason: &str| LangError::InvalidProcedure {
        function: name.clone(),
        reason: reason.to_string(),
    };

    let params = parse_params(&def.args, &name)?;

    // Separate the body from the constant block, keeping body order.
    let mut body_stmts: Vec<&py::Stmt> = Vec::new();
    let mut blocks: Vec<&py::StmtWith> = Vec::new();
    for stmt in &def.body {
        if lower::is_constant_block(stmt) {
            let py::Stmt::With(with) = stmt else {
                unreachable!("constant blocks are with statements");
            };
            blocks.push(with);
        } else {
            body_stmts.push(stmt);
        }
    }

    if blocks.len() > 1 {
        return Err(invalid(
            "procedures must have at most one with constants statement",
        ));
    }

    let mut constants = Vec::new();
    if let Some(block) = blocks.first() {
        for stmt in &block.body {
            if !matches!(stmt, py::Stmt::Assign(_) | py::Stmt::Expr(_)) {
                return Err(invalid(
                    "with constants statements can only contain assignments and expressions",
                ));
            }
            constants.push(lower::lower_stmt(stmt, &name)?);
        }
        check_no_reassignments(&constants, &name)?;
    }

    let body = lower::lower_body_refs(&body_stmts, &name)?;
    let constants = sort_constants(constants, &name)?;

    Ok(Procedure {
        name,
        params,
        body,
        constants,
    })
}

pub(crate) fn parse_params(args: &py::Arguments, function: &str) -> Result<Vec<Param>, LangError> {
    let invalid = |reason: &str| LangError::InvalidProcedure {
        function: function.to_string(),
        reason: reason.to_string(),
    };

    if args.vararg.is_some() || args.kwarg.is_some() {
        return Err(invalid("*args and **kwargs parameters are not supported"));
    }
    if !args.kwonlyargs.is_empty() {
        return Err(invalid("keyword-only parameters are not supported"));
    }

    let mut params = Vec::new();
    for arg in args.posonlyargs.iter().chain(args.args.iter()) {
        let default = match &arg.default {
            None => None,
            Some(expr) => match lower::lower_expr(expr, function)? {
                Expr::Literal(lit) => Some(lit),
                _ => return Err(invalid("parameter defaults must be literals")),
            },
        };
        params.push(Param {
            name: arg.def.arg.to_string(),
            default,
        });
    }
    Ok(params)
}

fn check_no_reassignments(constants: &[Stmt], function: &str) -> Result<(), LangError> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for stmt in constants {
        for name in stmt_targets(stmt) {
            *counts.entry(name).or_insert(0) += 1;
        }
    }
    if counts.values().any(|&count| count > 1) {
        return Err(LangError::InvalidProcedure {
            function: function.to_string(),
            reason: "reassignments are not allowed in with constants statements".to_string(),
        });
    }
    Ok(())
}

/// Topologically sorts constant statements by their name dependencies.
/// Among statements with no ordering constraint, source order is kept.
pub fn sort_constants(constants: Vec<Stmt>, function: &str) -> Result<Vec<Stmt>, LangError> {
    // Map each assigned name to the statement that assigns it.
    let mut assigned_by: HashMap<&str, usize> = HashMap::new();
    for (i, stmt) in constants.iter().enumerate() {
        for name in stmt_targets(stmt) {
            assigned_by.insert(name, i);
        }
    }

    // Edges a -> b iff statement b references a name statement a assigns.
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); constants.len()];
    let mut indegree: Vec<usize> = vec![0; constants.len()];
    for (b, stmt) in constants.iter().enumerate() {
        let mut seen: HashSet<usize> = HashSet::new();
        for name in stmt_external_names(stmt) {
            if let Some(&a) = assigned_by.get(name.as_str()) {
                if a != b && seen.insert(a) {
                    successors[a].push(b);
                    indegree[b] += 1;
                }
            }
        }
    }

    let mut ready: std::collections::BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, &deg)| deg == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(constants.len());
    while let Some(&next) = ready.iter().next() {
        ready.remove(&next);
        order.push(next);
        for &succ in &successors[next] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }

    if order.len() != constants.len() {
        return Err(LangError::NotDag {
            function: function.to_string(),
        });
    }

    let mut slots: Vec<Option<Stmt>> = constants.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .map(|i| slots[i].take().expect("each statement is scheduled once"))
        .collect())
}

/// Names assigned by a statement.
pub fn stmt_targets(stmt: &Stmt) -> Vec<&str> {
    match stmt {
        Stmt::Assign { target, .. } => target.names(),
        Stmt::AugAssign { target, .. } => vec![target.as_str()],
        _ => Vec::new(),
    }
}

/// Names a statement references that it does not bind itself.
/// Comprehension-local targets are scoped out.
pub fn stmt_external_names(stmt: &Stmt) -> Vec<String> {
    let mut out = Vec::new();
    let scope = HashSet::new();
    match stmt {
        Stmt::Assign { value, .. } => expr_names(value, &scope, &mut out),
        Stmt::AugAssign { target, value, .. } => {
            out.push(target.clone());
            expr_names(value, &scope, &mut out);
        }
        Stmt::Expr(expr) => expr_names(expr, &scope, &mut out),
        Stmt::Return(Some(expr)) => expr_names(expr, &scope, &mut out),
        Stmt::Return(None) | Stmt::Pass => {}
        Stmt::If { test, body, orelse } => {
            expr_names(test, &scope, &mut out);
            for stmt in body.iter().chain(orelse) {
                out.extend(stmt_external_names(stmt));
            }
        }
        Stmt::For { iter, body, .. } => {
            expr_names(iter, &scope, &mut out);
            for stmt in body {
                out.extend(stmt_external_names(stmt));
            }
        }
        Stmt::While { test, body } => {
            expr_names(test, &scope, &mut out);
            for stmt in body {
                out.extend(stmt_external_names(stmt));
            }
        }
    }
    out
}

fn expr_names(expr: &Expr, scope: &HashSet<String>, out: &mut Vec<String>) {
    match expr {
        Expr::Name(name) => {
            if !scope.contains(name) {
                out.push(name.clone());
            }
        }
        Expr::Literal(_) => {}
        Expr::Tuple(items) | Expr::List(items) | Expr::Set(items) => {
            for item in items {
                expr_names(item, scope, out);
            }
        }
        Expr::Dict(pairs) => {
            for (k, v) in pairs {
                expr_names(k, scope, out);
                expr_names(v, scope, out);
            }
        }
        Expr::Call { args, kwargs, .. } => {
            for arg in args {
                expr_names(arg, scope, out);
            }
            for (_, value) in kwargs {
                expr_names(value, scope, out);
            }
        }
        Expr::MethodCall {
            target,
            args,
            kwargs,
            ..
        } => {
            expr_names(target, scope, out);
            for arg in args {
                expr_names(arg, scope, out);
            }
            for (_, value) in kwargs {
                expr_names(value, scope, out);
            }
        }
        Expr::BinOp { left, right, .. } => {
            expr_names(left, scope, out);
            expr_names(right, scope, out);
        }
        Expr::UnaryOp { operand, .. } => expr_names(operand, scope, out),
        Expr::BoolOp { values, .. } => {
            for value in values {
                expr_names(value, scope, out);
            }
        }
        Expr::Compare {
            left, comparators, ..
        } => {
            expr_names(left, scope, out);
            for comparator in comparators {
                expr_names(comparator, scope, out);
            }
        }
        Expr::IfElse { test, body, orelse } => {
            expr_names(test, scope, out);
            expr_names(body, scope, out);
            expr_names(orelse, scope, out);
        }
        Expr::Subscript { value, index } => {
            expr_names(value, scope, out);
            expr_names(index, scope, out);
        }
        Expr::Slice {
            value,
            lower,
            upper,
            step,
        } => {
            expr_names(value, scope, out);
            for bound in [lower, upper, step].into_iter().flatten() {
                expr_names(bound, scope, out);
            }
        }
        Expr::Comprehension {
            element,
            generators,
            ..
        } => {
            let mut inner = scope.clone();
            for generator in generators {
                for name in generator.target.names() {
                    inner.insert(name.to_string());
                }
            }
            for Generator { iter, ifs, .. } in generators {
                expr_names(iter, &inner, out);
                for cond in ifs {
                    expr_names(cond, &inner, out);
                }
            }
            expr_names(element, &inner, out);
        }
    }
}

/// All callee names appearing anywhere in the given statements. Used to
/// discover which xun functions a procedure's constant block references.
pub fn called_names(stmts: &[Stmt]) -> Vec<String> {
    fn walk_expr(expr: &Expr, out: &mut Vec<String>) {
        match expr {
            Expr::Call { func, args, kwargs } => {
                out.push(func.clone());
                for arg in args {
                    walk_expr(arg, out);
                }
                for (_, value) in kwargs {
                    walk_expr(value, out);
                }
            }
            Expr::MethodCall {
                target,
                args,
                kwargs,
                ..
            } => {
                walk_expr(target, out);
                for arg in args {
                    walk_expr(arg, out);
                }
                for (_, value) in kwargs {
                    walk_expr(value, out);
                }
            }
            Expr::Tuple(items) | Expr::List(items) | Expr::Set(items) => {
                for item in items {
                    walk_expr(item, out);
                }
            }
            Expr::Dict(pairs) => {
                for (k, v) in pairs {
                    walk_expr(k, out);
                    walk_expr(v, out);
                }
            }
            Expr::BinOp { left, right, .. } => {
                walk_expr(left, out);
                walk_expr(right, out);
            }
            Expr::UnaryOp { operand, .. } => walk_expr(operand, out),
            Expr::BoolOp { values, .. } => {
                for value in values {
                    walk_expr(value, out);
                }
            }
            Expr::Compare {
                left, comparators, ..
            } => {
                walk_expr(left, out);
                for comparator in comparators {
                    walk_expr(comparator, out);
                }
            }
            Expr::IfElse { test, body, orelse } => {
                walk_expr(test, out);
                walk_expr(body, out);
                walk_expr(orelse, out);
            }
            Expr::Subscript { value, index } => {
                walk_expr(value, out);
                walk_expr(index, out);
            }
            Expr::Slice {
                value,
                lower,
                upper,
                step,
            } => {
                walk_expr(value, out);
                for bound in [lower, upper, step].into_iter().flatten() {
                    walk_expr(bound, out);
                }
            }
            Expr::Comprehension {
                element,
                generators,
                ..
            } => {
                walk_expr(element, out);
                for generator in generators {
                    walk_expr(&generator.iter, out);
                    for cond in &generator.ifs {
                        walk_expr(cond, out);
                    }
                }
            }
            Expr::Literal(_) | Expr::Name(_) => {}
        }
    }

    fn walk_stmt(stmt: &Stmt, out: &mut Vec<String>) {
        match stmt {
            Stmt::Assign { value, .. } => walk_expr(value, out),
            Stmt::AugAssign { value, .. } => walk_expr(value, out),
            Stmt::Expr(expr) => walk_expr(expr, out),
            Stmt::Return(Some(expr)) => walk_expr(expr, out),
            Stmt::Return(None) | Stmt::Pass => {}
            Stmt::If { test, body, orelse } => {
                walk_expr(test, out);
                for stmt in body.iter().chain(orelse) {
                    walk_stmt(stmt, out);
                }
            }
            Stmt::For { iter, body, .. } => {
                walk_expr(iter, out);
                for stmt in body {
                    walk_stmt(stmt, out);
                }
            }
            Stmt::While { test, body } => {
                walk_expr(test, out);
                for stmt in body {
                    walk_stmt(stmt, out);
                }
            }
        }
    }

    let mut out = Vec::new();
    for stmt in stmts {
        walk_stmt(stmt, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Literal, Target};

    fn assign(name: &str, value: Expr) -> Stmt {
        Stmt::Assign {
            target: Target::Name(name.to_string()),
            value,
        }
    }

    fn name(n: &str) -> Expr {
        Expr::Name(n.to_string())
    }

    #[test]
    fn sort_orders_by_name_dependencies() {
        // b = a + 1 listed before a = 2; the sort must run a first.
        let stmts = vec![
            assign(
                "b",
                Expr::BinOp {
                    op: BinOp::Add,
                    left: Box::new(name("a")),
                    right: Box::new(Expr::Literal(Literal::Int(1))),
                },
            ),
            assign("a", Expr::Literal(Literal::Int(2))),
        ];
        let sorted = sort_constants(stmts, "f").unwrap();
        assert_eq!(stmt_targets(&sorted[0]), vec!["a"]);
        assert_eq!(stmt_targets(&sorted[1]), vec!["b"]);
    }

    #[test]
    fn cyclic_constants_are_rejected() {
        let stmts = vec![assign("a", name("b")), assign("b", name("a"))];
        let err = sort_constants(stmts, "f").unwrap_err();
        assert!(matches!(err, LangError::NotDag { .. }));
    }

    #[test]
    fn independent_statements_keep_source_order() {
        let stmts = vec![
            assign("x", Expr::Literal(Literal::Int(1))),
            assign("y", Expr::Literal(Literal::Int(2))),
        ];
        let sorted = sort_constants(stmts, "f").unwrap();
        assert_eq!(stmt_targets(&sorted[0]), vec!["x"]);
        assert_eq!(stmt_targets(&sorted[1]), vec!["y"]);
    }

    #[test]
    fn comprehension_targets_are_not_external() {
        let comp = Expr::Comprehension {
            kind: crate::ast::CompKind::List,
            element: Box::new(name("i")),
            generators: vec![Generator {
                target: Target::Name("i".to_string()),
                iter: name("source"),
                ifs: vec![],
            }],
        };
        let names = stmt_external_names(&assign("out", comp));
        assert!(names.contains(&"source".to_string()));
        assert!(!names.contains(&"i".to_string()));
    }

    #[test]
    fn called_names_sees_nested_calls() {
        let stmt = assign(
            "r",
            Expr::Call {
                func: "f".to_string(),
                args: vec![Expr::Call {
                    func: "g".to_string(),
                    args: vec![],
                    kwargs: vec![],
                }],
                kwargs: vec![],
            },
        );
        assert_eq!(called_names(&[stmt]), vec!["f", "g"]);
    }
}
