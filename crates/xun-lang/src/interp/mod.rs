//! The tree-walking evaluator for the procedure sub-language.
//!
//! One interpreter runs both derived forms of a procedure; the difference
//! between them is entirely in the [`XunCalls`] handler supplied by the
//! caller (register a call node vs. load its stored result).
//!
//! Inside a constant block the interpreter enforces pass-by-value: every
//! argument to a non-xun call is deep-copied and the result is deep-copied
//! and normalized. Copying a symbolic value fails, which is what keeps
//! user code from smuggling a not-yet-computed result into plain Python.

pub mod builtins;
pub mod methods;
pub mod operators;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use xun_core::node::{CallNode, FunctionHash, SubscriptKey};
use xun_core::shape::unpack_value;
use xun_core::{CoreError, Value};

use crate::ast::{shape_of, CompKind, Expr, Generator, Param, Stmt, Target, UnaryOp};
use crate::error::LangError;
use crate::interp::builtins::{call_builtin, is_builtin, iter_items, BuiltinResult};

/// A plain (undecorated) module-level function, callable from procedures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperFn {
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

/// The module-level environment a procedure evaluates against: literal
/// constants and helper functions. Xun functions are deliberately absent;
/// they are dispatched through [`XunCalls`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleEnv {
    pub constants: HashMap<String, Value>,
    pub helpers: HashMap<String, HelperFn>,
}

/// How calls to xun functions are handled. The graph program registers
/// them; the task program loads their stored results.
pub trait XunCalls {
    /// The function hash if `name` is a xun function in scope.
    fn lookup(&self, name: &str) -> Option<FunctionHash>;

    /// Performs the xun call for the node.
    fn call(&mut self, node: CallNode) -> Result<Value, LangError>;
}

/// Handler for contexts where no xun functions are in scope.
pub struct NoXunCalls;

impl XunCalls for NoXunCalls {
    fn lookup(&self, _name: &str) -> Option<FunctionHash> {
        None
    }

    fn call(&mut self, node: CallNode) -> Result<Value, LangError> {
        Err(LangError::runtime(format!(
            "no xun functions in scope for {}",
            node
        )))
    }
}

/// Statement outcome: fall through or return from the procedure.
enum Flow {
    Continue,
    Return(Value),
}

/// Binds call arguments to procedure parameters, applying defaults.
pub fn bind_params(
    params: &[Param],
    args: &[Value],
    kwargs: &[(String, Value)],
    function: &str,
) -> Result<HashMap<String, Value>, LangError> {
    if args.len() > params.len() {
        return Err(LangError::runtime(format!(
            "{}() takes {} positional argument(s) but {} were given",
            function,
            params.len(),
            args.len()
        )));
    }

    let mut frame = HashMap::new();
    for (param, value) in params.iter().zip(args.iter()) {
        frame.insert(param.name.clone(), value.clone());
    }
    for (name, value) in kwargs {
        if !params.iter().any(|p| &p.name == name) {
            return Err(LangError::runtime(format!(
                "{}() got an unexpected keyword argument '{}'",
                function, name
            )));
        }
        if frame.insert(name.clone(), value.clone()).is_some() {
            return Err(LangError::runtime(format!(
                "{}() got multiple values for argument '{}'",
                function, name
            )));
        }
    }
    for param in params {
        if !frame.contains_key(&param.name) {
            match &param.default {
                Some(literal) => {
                    frame.insert(param.name.clone(), literal.value());
                }
                None => {
                    return Err(LangError::runtime(format!(
                        "{}() missing required argument '{}'",
                        function, param.name
                    )))
                }
            }
        }
    }
    Ok(frame)
}

/// The evaluator. Borrows the module environment and a xun-call handler.
pub struct Interp<'a> {
    module: &'a ModuleEnv,
    xun: &'a mut dyn XunCalls,
    scopes: Vec<HashMap<String, Value>>,
    pass_by_value: bool,
    in_helper: bool,
}

impl<'a> Interp<'a> {
    pub fn new(module: &'a ModuleEnv, xun: &'a mut dyn XunCalls) -> Interp<'a> {
        Interp {
            module,
            xun,
            scopes: vec![HashMap::new()],
            pass_by_value: false,
            in_helper: false,
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.scopes
            .last_mut()
            .expect("at least one scope is always present")
            .insert(name.into(), value);
    }

    fn lookup_name(&self, name: &str) -> Result<Value, LangError> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = self.module.constants.get(name) {
            return Ok(value.clone());
        }
        Err(LangError::Name {
            name: name.to_string(),
        })
    }

    /// Runs topologically sorted constant statements under the
    /// pass-by-value discipline.
    pub fn run_constants(&mut self, constants: &[Stmt]) -> Result<(), LangError> {
        let saved = self.pass_by_value;
        self.pass_by_value = true;
        let result = (|| {
            for stmt in constants {
                match self.eval_stmt(stmt)? {
                    Flow::Continue => {}
                    Flow::Return(_) => {
                        return Err(LangError::runtime(
                            "return inside a with constants statement",
                        ))
                    }
                }
            }
            Ok(())
        })();
        self.pass_by_value = saved;
        result
    }

    /// Runs body statements; the value of the first `return` is the
    /// procedure's result.
    pub fn run_body(&mut self, body: &[Stmt]) -> Result<Value, LangError> {
        match self.eval_block(body)? {
            Flow::Return(value) => Ok(value),
            Flow::Continue => Ok(Value::None),
        }
    }

    fn eval_block(&mut self, stmts: &[Stmt]) -> Result<Flow, LangError> {
        for stmt in stmts {
            match self.eval_stmt(stmt)? {
                Flow::Continue => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Continue)
    }

    fn eval_stmt(&mut self, stmt: &Stmt) -> Result<Flow, LangError> {
        match stmt {
            Stmt::Assign { target, value } => {
                let value = self.eval_expr(value)?;
                self.assign_target(target, value)?;
                Ok(Flow::Continue)
            }
            Stmt::AugAssign { target, op, value } => {
                let current = self.lookup_name(target)?;
                let right = self.eval_expr(value)?;
                let result = operators::apply_binop(*op, &current, &right)?;
                self.rebind(target, result)?;
                Ok(Flow::Continue)
            }
            Stmt::Expr(expr) => {
                self.eval_expr(expr)?;
                Ok(Flow::Continue)
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If { test, body, orelse } => {
                if self.eval_expr(test)?.is_truthy() {
                    self.eval_block(body)
                } else {
                    self.eval_block(orelse)
                }
            }
            Stmt::For { target, iter, body } => {
                let items = iter_items(&self.eval_expr(iter)?)?;
                for item in items {
                    self.assign_target(target, item)?;
                    match self.eval_block(body)? {
                        Flow::Continue => {}
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Continue)
            }
            Stmt::While { test, body } => {
                while self.eval_expr(test)?.is_truthy() {
                    match self.eval_block(body)? {
                        Flow::Continue => {}
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Continue)
            }
            Stmt::Pass => Ok(Flow::Continue),
        }
    }

    fn rebind(&mut self, name: &str, value: Value) -> Result<(), LangError> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return Ok(());
            }
        }
        self.bind(name, value);
        Ok(())
    }

    fn assign_target(&mut self, target: &Target, value: Value) -> Result<(), LangError> {
        match target {
            Target::Name(name) => {
                self.bind(name.clone(), value);
                Ok(())
            }
            Target::Starred(inner) => self.assign_target(inner, value),
            Target::Tuple(items) => {
                let shape = shape_of(items);
                let parts = match value {
                    Value::Node(node) => match node.unpack(&shape) {
                        Value::Tuple(parts) => parts,
                        _ => unreachable!("unpack yields a tuple"),
                    },
                    concrete => unpack_value(&shape, &concrete)?,
                };
                let mut cursor = parts.into_iter();
                for item in items {
                    let part = cursor
                        .next()
                        .expect("unpack yields one value per target slot");
                    self.assign_target(item, part)?;
                }
                Ok(())
            }
        }
    }

    pub fn eval_expr(&mut self, expr: &Expr) -> Result<Value, LangError> {
        match expr {
            Expr::Literal(literal) => Ok(literal.value()),
            Expr::Name(name) => self.lookup_name(name),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items)?)),
            Expr::List(items) => Ok(Value::List(self.eval_all(items)?)),
            Expr::Set(items) => Ok(Value::set_of(self.eval_all(items)?)),
            Expr::Dict(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    out.push((self.eval_expr(k)?, self.eval_expr(v)?));
                }
                Ok(Value::map_of(out))
            }
            Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs),
            Expr::MethodCall {
                target,
                method,
                args,
                kwargs,
            } => self.eval_method_call(target, method, args, kwargs),
            Expr::BinOp { op, left, right } => {
                let left = self.eval_expr(left)?;
                let right = self.eval_expr(right)?;
                operators::apply_binop(*op, &left, &right)
            }
            Expr::UnaryOp { op, operand } => {
                let value = self.eval_expr(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        Value::Int(i) => Ok(Value::Int(-i)),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(LangError::Type {
                            expected: "number".to_string(),
                            got: other.type_name().to_string(),
                        }),
                    },
                    UnaryOp::Pos => match value {
                        Value::Int(_) | Value::Float(_) => Ok(value),
                        other => Err(LangError::Type {
                            expected: "number".to_string(),
                            got: other.type_name().to_string(),
                        }),
                    },
                }
            }
            Expr::BoolOp { op, values } => {
                let mut last = Value::None;
                for (i, value) in values.iter().enumerate() {
                    last = self.eval_expr(value)?;
                    let stop = match op {
                        crate::ast::BoolOp::And => !last.is_truthy(),
                        crate::ast::BoolOp::Or => last.is_truthy(),
                    };
                    if stop && i + 1 < values.len() {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            Expr::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut left = self.eval_expr(left)?;
                for (op, right_expr) in ops.iter().zip(comparators.iter()) {
                    let right = self.eval_expr(right_expr)?;
                    if !operators::apply_cmpop(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval_expr(test)?.is_truthy() {
                    self.eval_expr(body)
                } else {
                    self.eval_expr(orelse)
                }
            }
            Expr::Subscript { value, index } => {
                let value = self.eval_expr(value)?;
                let index = self.eval_expr(index)?;
                let key = match index {
                    Value::Int(i) => SubscriptKey::Int(i),
                    Value::Str(s) => SubscriptKey::Str(s),
                    other => {
                        return Err(LangError::Type {
                            expected: "int or str index".to_string(),
                            got: other.type_name().to_string(),
                        })
                    }
                };
                match value {
                    Value::Node(node) => Ok(Value::Node(node.index(key))),
                    concrete => Ok(concrete.index(&key)?),
                }
            }
            Expr::Slice {
                value,
                lower,
                upper,
                step,
            } => {
                let value = self.eval_expr(value)?;
                let lower = self.eval_slice_bound(lower)?;
                let upper = self.eval_slice_bound(upper)?;
                let step = self.eval_slice_bound(step)?.unwrap_or(1);
                self.eval_slice(&value, lower, upper, step)
            }
            Expr::Comprehension {
                kind,
                element,
                generators,
            } => self.eval_comprehension(*kind, element, generators),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, LangError> {
        exprs.iter().map(|e| self.eval_expr(e)).collect()
    }

    fn eval_slice_bound(
        &mut self,
        bound: &Option<Box<Expr>>,
    ) -> Result<Option<i64>, LangError> {
        match bound {
            None => Ok(None),
            Some(expr) => match self.eval_expr(expr)? {
                Value::Int(i) => Ok(Some(i)),
                other => Err(LangError::Type {
                    expected: "int".to_string(),
                    got: other.type_name().to_string(),
                }),
            },
        }
    }

    fn eval_slice(
        &self,
        value: &Value,
        lower: Option<i64>,
        upper: Option<i64>,
        step: i64,
    ) -> Result<Value, LangError> {
        if step == 0 {
            return Err(LangError::runtime("slice step cannot be zero"));
        }
        match value {
            Value::List(items) => Ok(Value::List(slice_items(items, lower, upper, step))),
            Value::Tuple(items) => Ok(Value::Tuple(slice_items(items, lower, upper, step))),
            Value::Str(s) => {
                let chars: Vec<Value> = s
                    .chars()
                    .map(|c| Value::Str(c.to_string()))
                    .collect();
                let sliced = slice_items(&chars, lower, upper, step);
                let mut out = String::new();
                for part in sliced {
                    if let Value::Str(piece) = part {
                        out.push_str(&piece);
                    }
                }
                Ok(Value::Str(out))
            }
            Value::Node(node) => Err(LangError::runtime(format!(
                "cannot slice symbolic value {}",
                node
            ))),
            other => Err(LangError::Type {
                expected: "sequence".to_string(),
                got: other.type_name().to_string(),
            }),
        }
    }

    fn eval_comprehension(
        &mut self,
        kind: CompKind,
        element: &Expr,
        generators: &[Generator],
    ) -> Result<Value, LangError> {
        let mut results = Vec::new();
        self.scopes.push(HashMap::new());
        let outcome = self.eval_generators(element, generators, 0, &mut results);
        self.scopes.pop();
        outcome?;
        Ok(match kind {
            CompKind::List | CompKind::Generator => Value::List(results),
            CompKind::Set => Value::set_of(results),
        })
    }

    fn eval_generators(
        &mut self,
        element: &Expr,
        generators: &[Generator],
        depth: usize,
        results: &mut Vec<Value>,
    ) -> Result<(), LangError> {
        let Some(generator) = generators.get(depth) else {
            results.push(self.eval_expr(element)?);
            return Ok(());
        };
        let items = iter_items(&self.eval_expr(&generator.iter)?)?;
        'items: for item in items {
            self.assign_target(&generator.target, item)?;
            for cond in &generator.ifs {
                if !self.eval_expr(cond)?.is_truthy() {
                    continue 'items;
                }
            }
            self.eval_generators(element, generators, depth + 1, results)?;
        }
        Ok(())
    }

    fn eval_call(
        &mut self,
        func: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value, LangError> {
        let mut arg_values = self.eval_all(args)?;
        let mut kwarg_values = Vec::with_capacity(kwargs.len());
        for (name, expr) in kwargs {
            kwarg_values.push((name.clone(), self.eval_expr(expr)?));
        }

        // Xun functions first. Call node construction is immutable, so the
        // arguments are not copied even under pass-by-value.
        if !self.in_helper {
            if let Some(hash) = self.xun.lookup(func) {
                let node = CallNode::new(func, hash, arg_values, kwarg_values);
                return self.xun.call(node);
            }
        }

        if self.pass_by_value {
            arg_values = copy_arguments(func, arg_values)?;
            kwarg_values = copy_kwargs(func, kwarg_values)?;
        }

        if is_builtin(func) {
            let result = match call_builtin(func, arg_values, kwarg_values) {
                BuiltinResult::Handled(result) => result?,
                BuiltinResult::NotBuiltin => {
                    unreachable!("is_builtin gates the dispatch")
                }
            };
            return Ok(self.outgoing(result));
        }

        let module = self.module;
        if let Some(helper) = module.helpers.get(func) {
            let result = self.call_helper(func, helper, arg_values, kwarg_values)?;
            return Ok(self.outgoing(result));
        }

        Err(LangError::Name {
            name: func.to_string(),
        })
    }

    /// Normalizes results leaving a pass-by-value call site.
    fn outgoing(&self, result: Value) -> Value {
        if self.pass_by_value {
            result.normalized()
        } else {
            result
        }
    }

    fn call_helper(
        &mut self,
        name: &str,
        helper: &HelperFn,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, LangError> {
        let frame = bind_params(&helper.params, &args, &kwargs, name)?;

        let saved_scopes = std::mem::replace(&mut self.scopes, vec![frame]);
        let saved_pass = std::mem::replace(&mut self.pass_by_value, false);
        let saved_helper = std::mem::replace(&mut self.in_helper, true);

        let result = self.run_body(&helper.body);

        self.scopes = saved_scopes;
        self.pass_by_value = saved_pass;
        self.in_helper = saved_helper;
        result
    }

    fn eval_method_call(
        &mut self,
        target: &Expr,
        method: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value, LangError> {
        let mut arg_values = self.eval_all(args)?;
        let mut kwarg_values = Vec::with_capacity(kwargs.len());
        for (name, expr) in kwargs {
            kwarg_values.push((name.clone(), self.eval_expr(expr)?));
        }
        if self.pass_by_value {
            arg_values = copy_arguments(method, arg_values)?;
            kwarg_values = copy_kwargs(method, kwarg_values)?;
        }

        if methods::is_mutating(method) {
            let Expr::Name(name) = target else {
                return Err(LangError::unsupported(format!(
                    "mutating method '{}' on an unnamed value",
                    method
                )));
            };
            let slot = self
                .scopes
                .iter_mut()
                .rev()
                .find_map(|scope| scope.get_mut(name.as_str()));
            let Some(slot) = slot else {
                if self.module.constants.contains_key(name.as_str()) {
                    return Err(LangError::runtime(format!(
                        "cannot mutate module constant '{}'",
                        name
                    )));
                }
                return Err(LangError::Name { name: name.clone() });
            };
            let result = methods::call_mut_method(slot, method, arg_values, kwarg_values)?;
            return Ok(self.outgoing(result));
        }

        let value = self.eval_expr(target)?;
        let result = methods::call_method(&value, method, arg_values, kwarg_values)?;
        Ok(self.outgoing(result))
    }
}

fn copy_arguments(function: &str, args: Vec<Value>) -> Result<Vec<Value>, LangError> {
    args.into_iter()
        .map(|arg| copy_value(function, arg))
        .collect()
}

fn copy_kwargs(
    function: &str,
    kwargs: Vec<(String, Value)>,
) -> Result<Vec<(String, Value)>, LangError> {
    kwargs
        .into_iter()
        .map(|(name, value)| Ok((name, copy_value(function, value)?)))
        .collect()
}

fn copy_value(function: &str, value: Value) -> Result<Value, LangError> {
    match value.deep_copy() {
        Ok(copy) => Ok(copy),
        Err(CoreError::Copy { .. }) => {
            let node = first_node(&value).expect("copy only fails on symbolic values");
            Err(LangError::PassedSymbolicValue {
                function: function.to_string(),
                value: node.to_string(),
            })
        }
        Err(other) => Err(other.into()),
    }
}

fn first_node(value: &Value) -> Option<&CallNode> {
    let mut found = None;
    value.visit_nodes(&mut |node| {
        if found.is_none() {
            found = Some(node);
        }
    });
    found
}

/// Python slice semantics including negative bounds and steps.
fn slice_items(items: &[Value], lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<Value> {
    let len = items.len() as i64;
    let norm = |bound: i64, low: i64, high: i64| {
        let v = if bound < 0 { bound + len } else { bound };
        v.clamp(low, high)
    };

    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map(|l| norm(l, 0, len)).unwrap_or(0);
        let stop = upper.map(|u| norm(u, 0, len)).unwrap_or(len);
        let mut i = start;
        while i < stop {
            out.push(items[i as usize].clone());
            i += step;
        }
    } else {
        let start = lower.map(|l| norm(l, -1, len - 1)).unwrap_or(len - 1);
        let stop = upper.map(|u| norm(u, -1, len - 1)).unwrap_or(-1);
        let mut i = start;
        while i > stop {
            out.push(items[i as usize].clone());
            i += step;
        }
    }
    out
}
