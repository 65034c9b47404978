//! User module loading.
//!
//! A module is a Python-syntax script declaring a context (driver + store
//! bindings), xun functions decorated with `@<ctx>.function()`, plain
//! helper functions, and literal module constants. Loading parses the
//! script once and freezes every decorated function into a
//! [`FunctionImage`] with its fingerprint.

use std::path::{Path, PathBuf};

use rustpython_parser::ast as py;
use rustpython_parser::ast::Ranged;
use rustpython_parser::{parse, Mode};
use xun_core::config::{DriverSpec, StoreSpec};
use xun_core::fingerprint::source_hash;
use xun_core::node::FunctionHash;
use xun_core::Value;

use crate::error::LangError;
use crate::image::{FunctionImage, Images};
use crate::interp::{HelperFn, Interp, ModuleEnv, NoXunCalls};
use crate::lower;
use crate::procedure::{called_names, parse_params, parse_procedure};

/// A context binds a driver and (usually) a store.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSpec {
    pub driver: DriverSpec,
    pub store: Option<StoreSpec>,
}

/// A loaded user module.
#[derive(Debug, Clone)]
pub struct ScriptModule {
    pub path: PathBuf,
    pub contexts: Vec<(String, ContextSpec)>,
    pub functions: Images,
}

impl ScriptModule {
    /// The module's single context. Zero or several contexts is an error.
    pub fn single_context(&self) -> Result<&ContextSpec, LangError> {
        match self.contexts.as_slice() {
            [(_, context)] => Ok(context),
            [] => Err(LangError::Context {
                reason: "no context found".to_string(),
            }),
            _ => Err(LangError::Context {
                reason: "multiple contexts found".to_string(),
            }),
        }
    }
}

/// Loads a module from a filesystem path.
pub fn load_module(path: &Path) -> Result<ScriptModule, LangError> {
    let source = std::fs::read_to_string(path).map_err(|e| LangError::Context {
        reason: format!("cannot read module {}: {}", path.display(), e),
    })?;
    load_source(&source, path)
}

/// Loads a module from source text.
pub fn load_source(source: &str, path: &Path) -> Result<ScriptModule, LangError> {
    let parsed = parse(source, Mode::Module, &path.to_string_lossy()).map_err(|e| {
        LangError::Parse {
            message: e.to_string(),
        }
    })?;
    let py::Mod::Module(module) = parsed else {
        return Err(LangError::Parse {
            message: "expected a module".to_string(),
        });
    };

    let mut contexts: Vec<(String, ContextSpec)> = Vec::new();
    let mut env = ModuleEnv::default();
    let mut functions = Images::new();

    for stmt in &module.body {
        match stmt {
            py::Stmt::Import(_) | py::Stmt::ImportFrom(_) => {}
            // Script-run guards (`if __name__ == ...`) and docstrings are
            // not part of the workflow definition.
            py::Stmt::If(_) => {}
            py::Stmt::Expr(expr)
                if matches!(
                    expr.value.as_ref(),
                    py::Expr::Constant(c) if matches!(c.value, py::Constant::Str(_))
                ) => {}
            py::Stmt::Assign(assign) => {
                handle_module_assign(assign, &mut contexts, &mut env)?;
            }
            py::Stmt::FunctionDef(def) => {
                if def.decorator_list.is_empty() {
                    let helper = HelperFn {
                        params: parse_params(&def.args, def.name.as_str())?,
                        body: lower::lower_body(&def.body, def.name.as_str())?,
                    };
                    env.helpers.insert(def.name.to_string(), helper);
                } else {
                    let image =
                        decorate_function(def, source, path, &contexts, &env, &functions)?;
                    functions.insert(image.name.clone(), image);
                }
            }
            other => {
                return Err(LangError::Context {
                    reason: format!(
                        "unsupported module-level statement: {:?}",
                        std::mem::discriminant(other)
                    ),
                })
            }
        }
    }

    Ok(ScriptModule {
        path: path.to_path_buf(),
        contexts,
        functions,
    })
}

fn handle_module_assign(
    assign: &py::StmtAssign,
    contexts: &mut Vec<(String, ContextSpec)>,
    env: &mut ModuleEnv,
) -> Result<(), LangError> {
    let [target] = assign.targets.as_slice() else {
        return Err(LangError::Context {
            reason: "module-level assignments must bind a single name".to_string(),
        });
    };
    let py::Expr::Name(name) = target else {
        return Err(LangError::Context {
            reason: "module-level assignments must bind a single name".to_string(),
        });
    };

    if let py::Expr::Call(call) = assign.value.as_ref() {
        if callee_name(&call.func).as_deref() == Some("context") {
            let context = parse_context(call)?;
            contexts.push((name.id.to_string(), context));
            return Ok(());
        }
    }

    // Anything else must evaluate to a plain value with no free names.
    let constant_error = |e: LangError| LangError::Context {
        reason: format!("module constant '{}': {}", name.id, e),
    };
    let expr = lower::lower_expr(&assign.value, "<module>").map_err(constant_error)?;
    let mut none = NoXunCalls;
    let value = Interp::new(&ModuleEnv::default(), &mut none)
        .eval_expr(&expr)
        .map_err(constant_error)?;
    env.constants.insert(name.id.to_string(), value);
    Ok(())
}

fn decorate_function(
    def: &py::StmtFunctionDef,
    source: &str,
    path: &Path,
    contexts: &[(String, ContextSpec)],
    env: &ModuleEnv,
    functions: &Images,
) -> Result<FunctionImage, LangError> {
    let name = def.name.to_string();
    let resources = parse_decorator(def, contexts)?;
    let procedure = parse_procedure(def)?;

    // The set of xun names a constant block can call is what the module
    // has decorated so far, plus the function itself for recursion.
    let mut dependencies: Vec<String> = Vec::new();
    for called in called_names(&procedure.constants) {
        let is_xun = functions.contains_key(&called) || called == name;
        if is_xun && !dependencies.contains(&called) {
            dependencies.push(called);
        }
    }

    let text = function_source(def, source);
    let dep_hashes: Vec<&FunctionHash> = dependencies
        .iter()
        .filter(|dep| **dep != name)
        .filter_map(|dep| functions.get(dep).map(|f| &f.hash))
        .collect();
    let hash = source_hash(text, dep_hashes);
    tracing::debug!(function = %name, hash = %hash, "decorated xun function");

    Ok(FunctionImage {
        name,
        module: module_identifier(path),
        source: text.to_string(),
        hash,
        resources,
        dependencies,
        procedure,
        module_env: env.clone(),
    })
}

/// The identifier a module is known by: its file stem.
fn module_identifier(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// The decorated source text of a function definition, from its first
/// decorator to the end of its body.
fn function_source<'a>(def: &py::StmtFunctionDef, source: &'a str) -> &'a str {
    let start = def
        .decorator_list
        .iter()
        .map(|d| d.range().start())
        .min()
        .unwrap_or_else(|| def.range().start());
    let end = def.range().end();
    &source[start.to_usize()..end.to_usize()]
}

fn parse_decorator(
    def: &py::StmtFunctionDef,
    contexts: &[(String, ContextSpec)],
) -> Result<std::collections::BTreeMap<String, u64>, LangError> {
    let [decorator] = def.decorator_list.as_slice() else {
        return Err(LangError::Context {
            reason: format!(
                "function '{}' must have exactly one decorator",
                def.name
            ),
        });
    };

    let (callee, keywords): (&py::Expr, &[py::Keyword]) = match decorator {
        py::Expr::Call(call) => (call.func.as_ref(), &call.keywords),
        other => (other, &[]),
    };

    let py::Expr::Attribute(attr) = callee else {
        return Err(LangError::Context {
            reason: format!("unsupported decorator on '{}'", def.name),
        });
    };
    let py::Expr::Name(ctx_name) = attr.value.as_ref() else {
        return Err(LangError::Context {
            reason: format!("unsupported decorator on '{}'", def.name),
        });
    };
    if attr.attr.as_str() != "function" {
        return Err(LangError::Context {
            reason: format!("unsupported decorator on '{}'", def.name),
        });
    }
    if !contexts.iter().any(|(name, _)| name == ctx_name.id.as_str()) {
        return Err(LangError::Context {
            reason: format!(
                "decorator on '{}' references unknown context '{}'",
                def.name, ctx_name.id
            ),
        });
    }

    let mut resources = std::collections::BTreeMap::new();
    for keyword in keywords {
        match keyword.arg.as_deref() {
            Some("resources") => {
                let value = literal_value(&keyword.value)?;
                let Value::Map(pairs) = value else {
                    return Err(LangError::Context {
                        reason: "resources must be a dict of name to amount".to_string(),
                    });
                };
                for (key, amount) in pairs {
                    let Value::Str(key) = key else {
                        return Err(LangError::Context {
                            reason: "resource names must be strings".to_string(),
                        });
                    };
                    let amount = match amount {
                        Value::Int(i) if i >= 0 => i as u64,
                        Value::Float(f) if f >= 0.0 => f as u64,
                        _ => {
                            return Err(LangError::Context {
                                reason: format!(
                                    "resource '{}' must be a non-negative amount",
                                    key
                                ),
                            })
                        }
                    };
                    resources.insert(key, amount);
                }
            }
            Some(other) => {
                return Err(LangError::Context {
                    reason: format!("unknown decorator argument '{}'", other),
                })
            }
            None => {
                return Err(LangError::Context {
                    reason: "decorator arguments must be keywords".to_string(),
                })
            }
        }
    }
    Ok(resources)
}

/// The final name segment of a callee: `xun.functions.store.Disk` -> Disk.
fn callee_name(expr: &py::Expr) -> Option<String> {
    match expr {
        py::Expr::Name(name) => Some(name.id.to_string()),
        py::Expr::Attribute(attr) => Some(attr.attr.to_string()),
        _ => None,
    }
}

/// Evaluates a literal expression (no free names, builtins allowed).
pub(crate) fn literal_value(expr: &py::Expr) -> Result<Value, LangError> {
    let lowered = lower::lower_expr(expr, "<literal>")?;
    let mut none = NoXunCalls;
    Interp::new(&ModuleEnv::default(), &mut none).eval_expr(&lowered)
}

fn parse_context(call: &py::ExprCall) -> Result<ContextSpec, LangError> {
    if !call.args.is_empty() {
        return Err(LangError::Context {
            reason: "context() takes keyword arguments only".to_string(),
        });
    }
    let mut driver = None;
    let mut store = None;
    for keyword in &call.keywords {
        match keyword.arg.as_deref() {
            Some("driver") => driver = Some(parse_driver_expr(&keyword.value)?),
            Some("store") => store = Some(parse_store_expr(&keyword.value)?),
            Some(other) => {
                return Err(LangError::Context {
                    reason: format!("unknown context argument '{}'", other),
                })
            }
            None => {
                return Err(LangError::Context {
                    reason: "context() takes keyword arguments only".to_string(),
                })
            }
        }
    }
    Ok(ContextSpec {
        driver: driver.unwrap_or(DriverSpec::Sequential),
        store,
    })
}

fn parse_driver_expr(expr: &py::Expr) -> Result<DriverSpec, LangError> {
    let py::Expr::Call(call) = expr else {
        return Err(LangError::Context {
            reason: "driver must be a constructor call".to_string(),
        });
    };
    let name = callee_name(&call.func).ok_or_else(|| LangError::Context {
        reason: "driver must be a named constructor".to_string(),
    })?;
    match name.as_str() {
        "Sequential" | "Local" => Ok(DriverSpec::Sequential),
        "Parallel" => {
            let mut workers = 4;
            let mut resources = std::collections::BTreeMap::new();
            let mut timeout_secs = None;
            for keyword in &call.keywords {
                match keyword.arg.as_deref() {
                    Some("workers") => match literal_value(&keyword.value)? {
                        Value::Int(i) if i > 0 => workers = i as usize,
                        _ => {
                            return Err(LangError::Context {
                                reason: "workers must be a positive int".to_string(),
                            })
                        }
                    },
                    Some("resources") => match literal_value(&keyword.value)? {
                        Value::Map(pairs) => {
                            for (key, amount) in pairs {
                                let (Value::Str(key), amount) = (key, amount) else {
                                    return Err(LangError::Context {
                                        reason: "resource names must be strings"
                                            .to_string(),
                                    });
                                };
                                let amount = match amount {
                                    Value::Int(i) if i >= 0 => i as u64,
                                    Value::Float(f) if f >= 0.0 => f as u64,
                                    _ => {
                                        return Err(LangError::Context {
                                            reason: "resource amounts must be numbers"
                                                .to_string(),
                                        })
                                    }
                                };
                                resources.insert(key, amount);
                            }
                        }
                        _ => {
                            return Err(LangError::Context {
                                reason: "resources must be a dict".to_string(),
                            })
                        }
                    },
                    Some("timeout") => match literal_value(&keyword.value)? {
                        Value::Int(i) if i >= 0 => timeout_secs = Some(i as f64),
                        Value::Float(f) if f >= 0.0 => timeout_secs = Some(f),
                        _ => {
                            return Err(LangError::Context {
                                reason: "timeout must be a number of seconds".to_string(),
                            })
                        }
                    },
                    Some(other) => {
                        return Err(LangError::Context {
                            reason: format!("unknown Parallel argument '{}'", other),
                        })
                    }
                    None => {
                        return Err(LangError::Context {
                            reason: "Parallel() takes keyword arguments only".to_string(),
                        })
                    }
                }
            }
            Ok(DriverSpec::Parallel {
                workers,
                resources,
                timeout_secs,
            })
        }
        other => Err(LangError::Context {
            reason: format!("unknown driver '{}'", other),
        }),
    }
}

fn parse_store_expr(expr: &py::Expr) -> Result<StoreSpec, LangError> {
    let py::Expr::Call(call) = expr else {
        return Err(LangError::Context {
            reason: "store must be a constructor call".to_string(),
        });
    };
    let name = callee_name(&call.func).ok_or_else(|| LangError::Context {
        reason: "store must be a named constructor".to_string(),
    })?;
    let path_arg = |what: &str| -> Result<PathBuf, LangError> {
        match call.args.as_slice() {
            [expr] => match literal_value(expr)? {
                Value::Str(path) => Ok(PathBuf::from(path)),
                _ => Err(LangError::Context {
                    reason: format!("{} takes a path string", what),
                }),
            },
            _ => Err(LangError::Context {
                reason: format!("{} takes exactly one path argument", what),
            }),
        }
    };
    match name.as_str() {
        "Memory" => Ok(StoreSpec::Memory),
        "Disk" | "DiskCache" => Ok(StoreSpec::Disk {
            root: path_arg("Disk")?,
        }),
        "Sqlite" | "SQLite" => Ok(StoreSpec::Sqlite {
            path: path_arg("Sqlite")?,
        }),
        "Layered" => {
            if call.args.is_empty() {
                return Err(LangError::Context {
                    reason: "Layered() needs at least one layer".to_string(),
                });
            }
            let layers = call
                .args
                .iter()
                .map(parse_store_expr)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(StoreSpec::Layered { layers })
        }
        other => Err(LangError::Context {
            reason: format!("unknown store '{}'", other),
        }),
    }
}

/// Parses a store-spec expression such as `xun.Disk('/data/store')`. Used
/// for the CLI store argument and the `XUN_STORE` environment variable.
pub fn parse_store_spec(text: &str) -> Result<StoreSpec, LangError> {
    let parsed =
        parse(text, Mode::Expression, "<store-spec>").map_err(|e| LangError::Parse {
            message: e.to_string(),
        })?;
    let py::Mod::Expression(expr) = parsed else {
        return Err(LangError::Parse {
            message: "expected an expression".to_string(),
        });
    };
    parse_store_expr(&expr.body)
}
