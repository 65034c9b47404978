//! The call runtime: argument resolution and task invocation.
//!
//! Executing a call node means resolving every symbolic argument into the
//! value it stands for (a deep walk, so a node embedded inside nested
//! containers is still substituted), invoking the task program, and
//! committing the normalized result.

use xun_core::node::CallNode;
use xun_core::Value;
use xun_lang::program::{run_task, ResultResolver};
use xun_lang::{Images, LangError};
use xun_store::{StoreAccessor, StoreError};

use crate::error::ExecError;

/// Resolver handing task-program loads to the store accessor.
pub struct AccessorResolver<'a>(pub &'a StoreAccessor);

impl ResultResolver for AccessorResolver<'_> {
    fn load_result(&self, node: &CallNode) -> Result<Value, LangError> {
        self.0
            .load_result(node)
            .map_err(|e| LangError::runtime(format!("loading {}: {}", node, e)))
    }
}

/// Deeply replaces every symbolic node in `value` by its stored result,
/// applying subscript chains.
pub fn resolve_value(accessor: &StoreAccessor, value: &Value) -> Result<Value, StoreError> {
    match value {
        Value::Node(node) => accessor.load_result(node),
        Value::Tuple(items) => Ok(Value::Tuple(resolve_all(accessor, items)?)),
        Value::List(items) => Ok(Value::List(resolve_all(accessor, items)?)),
        Value::Set(items) => Ok(Value::set_of(resolve_all(accessor, items)?)),
        Value::Map(pairs) => {
            let mut out = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                out.push((resolve_value(accessor, k)?, resolve_value(accessor, v)?));
            }
            Ok(Value::map_of(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_all(accessor: &StoreAccessor, items: &[Value]) -> Result<Vec<Value>, StoreError> {
    items
        .iter()
        .map(|item| resolve_value(accessor, item))
        .collect()
}

/// Executes one call: resolve arguments, run the task program, store the
/// result. Returns the committed value.
pub fn execute_call(
    call: &CallNode,
    images: &Images,
    accessor: &StoreAccessor,
) -> Result<Value, ExecError> {
    let image = images
        .get(&call.function_name)
        .ok_or_else(|| ExecError::UnknownFunction {
            name: call.function_name.clone(),
        })?;

    let args: Vec<Value> = call
        .args
        .iter()
        .map(|arg| resolve_value(accessor, arg))
        .collect::<Result<_, _>>()?;
    let kwargs: Vec<(String, Value)> = call
        .kwargs
        .iter()
        .map(|(name, value)| Ok((name.clone(), resolve_value(accessor, value)?)))
        .collect::<Result<_, StoreError>>()?;

    tracing::debug!(call = %call, "executing");
    let result = run_task(image, images, &args, &kwargs, &AccessorResolver(accessor))
        .map_err(|source| ExecError::Execution {
            call: call.to_string(),
            source,
        })?;

    accessor.store_result(call, &result)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use xun_core::node::{FunctionHash, SubscriptKey};
    use xun_store::MemoryStore;

    #[test]
    fn resolution_reaches_nested_containers() {
        let accessor = StoreAccessor::new(Arc::new(MemoryStore::new()));
        let node = CallNode::new("f", FunctionHash::from("h"), vec![], vec![]);
        accessor
            .store_result(&node, &Value::Tuple(vec![Value::Int(1), Value::Int(2)]))
            .unwrap();

        // A subscripted node buried three levels deep.
        let buried = Value::List(vec![Value::Map(vec![(
            Value::Str("k".into()),
            Value::Tuple(vec![Value::Node(node.index(SubscriptKey::Int(1)))]),
        )])]);
        let resolved = resolve_value(&accessor, &buried).unwrap();
        assert_eq!(
            resolved,
            Value::List(vec![Value::Map(vec![(
                Value::Str("k".into()),
                Value::Tuple(vec![Value::Int(2)]),
            )])])
        );
    }
}
