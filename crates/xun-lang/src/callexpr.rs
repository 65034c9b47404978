//! Parsing of command-line call expressions.
//!
//! `xun exec module.py 'f(1, 2, k=3)'` takes a single named-function call
//! whose arguments and keyword arguments are literal expressions.

use rustpython_parser::ast as py;
use rustpython_parser::{parse, Mode};
use xun_core::Value;

use crate::error::LangError;
use crate::module::literal_value;

/// An entry call parsed from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    pub function_name: String,
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

/// Parses a call expression such as `fibonacci_sequence(10)`.
pub fn parse_call(text: &str) -> Result<ParsedCall, LangError> {
    let syntax_error = |message: &str| LangError::Parse {
        message: message.to_string(),
    };

    let parsed = parse(text, Mode::Expression, "<call>").map_err(|e| LangError::Parse {
        message: e.to_string(),
    })?;
    let py::Mod::Expression(expr) = parsed else {
        return Err(syntax_error("call string must be a single expression"));
    };
    let py::Expr::Call(call) = expr.body.as_ref() else {
        return Err(syntax_error("call string is not a call"));
    };
    let py::Expr::Name(name) = call.func.as_ref() else {
        return Err(syntax_error("call must be to a named function"));
    };

    let args = call
        .args
        .iter()
        .map(literal_value)
        .collect::<Result<Vec<_>, _>>()?;
    let mut kwargs = Vec::with_capacity(call.keywords.len());
    for keyword in &call.keywords {
        let Some(arg) = &keyword.arg else {
            return Err(syntax_error("** expansion is not allowed in call strings"));
        };
        kwargs.push((arg.to_string(), literal_value(&keyword.value)?));
    }

    Ok(ParsedCall {
        function_name: name.id.to_string(),
        args,
        kwargs,
    })
}
