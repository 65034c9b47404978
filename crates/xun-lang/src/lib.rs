//! The procedure frontend: parsing, validation, and evaluation of user
//! scripts.
//!
//! User workflows are ordinary Python-syntax scripts. A script declares a
//! context binding a driver and a store, and decorates functions with
//! `@<ctx>.function()` to turn them into xun functions. Each decorated
//! procedure may carry one `with ...:` block, the constant-binding
//! sub-language whose statements name sub-results computed by other xun
//! functions.
//!
//! This crate parses scripts with `rustpython-parser`, lowers procedures
//! into a restricted internal AST, validates the sub-language, and derives
//! the two executable forms of every procedure: the graph program used to
//! extract call graphs and the task program used to compute results.

pub mod ast;
pub mod callexpr;
pub mod error;
pub mod image;
pub mod interp;
pub mod lower;
pub mod module;
pub mod procedure;
pub mod program;

pub use error::LangError;
pub use image::{FunctionImage, Images};
pub use module::{load_module, load_source, parse_store_spec, ContextSpec, ScriptModule};
pub use program::{build_graph, run_task, ResultResolver};
