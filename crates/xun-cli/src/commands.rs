//! Subcommand implementations.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use xun_core::config::{DriverSpec, StoreSpec};
use xun_core::Value;
use xun_exec::{driver_from_spec, Blueprint, Driver, Parallel};
use xun_lang::callexpr::parse_call;
use xun_lang::{load_module, parse_store_spec, ScriptModule};
use xun_server::HttpCoordinator;
use xun_store::{from_spec, Hierarchy, Query, Store, StoreKey};

/// One error type for the CLI surface; everything user-visible funnels
/// into a message and exit code 1.
#[derive(Debug)]
pub struct CliError(String);

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<E: std::error::Error> From<E> for CliError {
    fn from(error: E) -> Self {
        CliError(error.to_string())
    }
}

/// Resolves the store for a module: the context's binding, else the
/// `XUN_STORE` environment variable.
fn module_store(module: &ScriptModule) -> Result<Arc<dyn Store>, CliError> {
    let context = module.single_context()?;
    let spec = match &context.store {
        Some(spec) => spec.clone(),
        None => match std::env::var("XUN_STORE") {
            Ok(text) => parse_store_spec(&text)?,
            Err(_) => {
                return Err(CliError(
                    "the context binds no store and XUN_STORE is not set".to_string(),
                ))
            }
        },
    };
    Ok(from_spec(&spec)?)
}

fn plan(module: &ScriptModule, call_text: &str) -> Result<Blueprint, CliError> {
    let call = parse_call(call_text)?;
    Ok(Blueprint::new(
        &module.functions,
        &call.function_name,
        call.args,
        call.kwargs,
    )?)
}

pub fn exec(
    module_path: &Path,
    call_text: &str,
    coordinator: Option<&str>,
) -> Result<(), CliError> {
    let module = load_module(module_path)?;
    let blueprint = plan(&module, call_text)?;
    let store = module_store(&module)?;

    let driver: Box<dyn Driver> = match coordinator {
        None => driver_from_spec(&module.single_context()?.driver),
        Some(base) => {
            // Multi-process runs share the assignment record through the
            // coordination server; the driver itself stays parallel.
            let DriverSpec::Parallel {
                workers,
                resources,
                timeout_secs,
            } = module.single_context()?.driver.clone()
            else {
                return Err(CliError(
                    "--coordinator requires a Parallel driver in the context".to_string(),
                ));
            };
            let mut driver = Parallel::new(workers).with_resources(resources);
            if let Some(seconds) = timeout_secs {
                driver =
                    driver.with_timeout(std::time::Duration::from_secs_f64(seconds));
            }
            Box::new(driver.with_coordinator(Arc::new(HttpCoordinator::new(base)?)))
        }
    };

    blueprint.run(driver.as_ref(), store)?;
    Ok(())
}

pub fn graph(module_path: &Path, call_text: &str) -> Result<(), CliError> {
    let module = load_module(module_path)?;
    let blueprint = plan(&module, call_text)?;
    println!("{}", blueprint.graph.dot());
    Ok(())
}

pub fn mount(store_spec: &str, query_text: &str, mountpoint: &Path) -> Result<(), CliError> {
    let spec: StoreSpec = parse_store_spec(store_spec)?;
    let store = from_spec(&spec)?;
    let query = Query::parse(query_text)?;

    let keys = store.query(&query.conditions)?;
    fs::create_dir_all(mountpoint)?;
    materialize(store.as_ref(), &keys, &query.hierarchy, mountpoint)?;
    Ok(())
}

/// A materialized store entry as written into the view.
#[derive(Serialize)]
struct MountEntry<'a> {
    key: &'a StoreKey,
    value: Value,
}

/// Writes the hierarchy under `dir`: non-leaf names group the keys by a
/// tag's distinct values, the `...` leaf writes one JSON file per entry.
fn materialize(
    store: &dyn Store,
    keys: &[StoreKey],
    hierarchy: &Hierarchy,
    dir: &Path,
) -> Result<(), CliError> {
    match hierarchy {
        Hierarchy::Leaf => {
            for key in keys {
                let value = store.load(key)?;
                let path = dir.join(format!("{}.json", key.content_hash()));
                let body = serde_json::to_vec_pretty(&MountEntry { key, value })?;
                fs::write(&path, body)?;
                set_read_only(&path)?;
            }
        }
        Hierarchy::Levels(levels) => {
            for (tag_name, child) in levels {
                let level_dir = dir.join(tag_name);
                fs::create_dir_all(&level_dir)?;
                for value in distinct_tag_values(store, keys, tag_name)? {
                    let subset: Vec<StoreKey> = filter_by_tag(store, keys, tag_name, &value)?;
                    let value_dir = level_dir.join(sanitize(&value));
                    fs::create_dir_all(&value_dir)?;
                    materialize(store, &subset, child, &value_dir)?;
                }
            }
        }
    }
    Ok(())
}

fn distinct_tag_values(
    store: &dyn Store,
    keys: &[StoreKey],
    tag_name: &str,
) -> Result<Vec<String>, CliError> {
    let mut values = std::collections::BTreeSet::new();
    for key in keys {
        if let Some(value) = store.tags(key)?.get(tag_name) {
            values.insert(value.clone());
        }
    }
    Ok(values.into_iter().collect())
}

fn filter_by_tag(
    store: &dyn Store,
    keys: &[StoreKey],
    tag_name: &str,
    tag_value: &str,
) -> Result<Vec<StoreKey>, CliError> {
    let mut subset = Vec::new();
    for key in keys {
        if store.tags(key)?.get(tag_name).map(String::as_str) == Some(tag_value) {
            subset.push(key.clone());
        }
    }
    Ok(subset)
}

/// Tag values become directory names; path separators must not survive.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect()
}

#[cfg(unix)]
fn set_read_only(path: &Path) -> Result<(), CliError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o444))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_read_only(path: &Path) -> Result<(), CliError> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use xun_core::node::{CallNode, FunctionHash};
    use xun_store::{MemoryStore, Tags};

    fn seeded_store() -> Arc<dyn Store> {
        let store = MemoryStore::new();
        for (name, arg) in [("fib", 1), ("fib", 2), ("other", 1)] {
            let call = CallNode::new(
                name,
                FunctionHash::from("h"),
                vec![Value::Int(arg)],
                vec![],
            );
            let mut tags = Tags::new();
            tags.insert("function_name".to_string(), name.to_string());
            store
                .store(&StoreKey::result(&call), &Value::Int(arg * 10), &tags)
                .unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn mount_materializes_leaves_per_tag_value() {
        let store = seeded_store();
        let dir = tempfile::tempdir().unwrap();
        let query = Query::parse("(function_name) => function_name { ... }").unwrap();

        let keys = store.query(&query.conditions).unwrap();
        assert_eq!(keys.len(), 3);
        materialize(store.as_ref(), &keys, &query.hierarchy, dir.path()).unwrap();

        let fib_dir = dir.path().join("function_name").join("fib");
        let entries: Vec<_> = fs::read_dir(&fib_dir).unwrap().collect();
        assert_eq!(entries.len(), 2);

        let other_dir = dir.path().join("function_name").join("other");
        assert_eq!(fs::read_dir(&other_dir).unwrap().count(), 1);
    }

    #[test]
    fn mounted_files_hold_key_and_value() {
        let store = seeded_store();
        let dir = tempfile::tempdir().unwrap();
        let query = Query::parse("(function_name='other') => ...").unwrap();

        let keys = store.query(&query.conditions).unwrap();
        assert_eq!(keys.len(), 1);
        materialize(store.as_ref(), &keys, &query.hierarchy, dir.path()).unwrap();

        let file = dir
            .path()
            .join(format!("{}.json", keys[0].content_hash()));
        let body: serde_json::Value =
            serde_json::from_slice(&fs::read(&file).unwrap()).unwrap();
        assert!(body.get("key").is_some());
        assert_eq!(body["value"], serde_json::json!({"Int": 10}));
    }

    #[test]
    fn sanitize_strips_path_separators() {
        assert_eq!(sanitize("a/b\\c"), "a_b_c");
    }
}
