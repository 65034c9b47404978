//! End-to-end scenarios: whole modules planned and executed against real
//! stores and both canonical drivers.

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use xun_core::config::StoreSpec;
use xun_core::{CoreError, Value};
use xun_exec::{Blueprint, Driver, ExecError, Parallel, Sequential};
use xun_lang::{load_source, LangError, ScriptModule};
use xun_store::{
    MemoryStore, Store, StoreAccessor, StoreError, StoreKey, TagCondition, Tags,
};

fn load(source: &str) -> ScriptModule {
    load_source(source, Path::new("<scenario>")).unwrap()
}

fn ints(values: &[i64]) -> Value {
    Value::Tuple(values.iter().map(|i| Value::Int(*i)).collect())
}

const FIBONACCI: &str = "\
import xun

context = xun.context(
    driver=xun.Sequential(),
    store=xun.Memory(),
)

@context.function()
def fibonacci_number(n):
    return f_n_1 + f_n_2
    with ...:
        f_n_1 = (
            0 if n == 0 else
            1 if n == 1 else
            fibonacci_number(n - 1)
        )
        f_n_2 = fibonacci_number(n - 2) if n > 1 else 0

@context.function()
def fibonacci_sequence(n):
    return sequence
    with ...:
        sequence = [fibonacci_number(i) for i in range(n)]

@context.function()
def descending_fibonacci(n):
    return sorted(seq, reverse=True)
    with ...:
        seq = fibonacci_sequence(n)
";

#[test]
fn fibonacci_sequence_sequential_in_memory() {
    let module = load(FIBONACCI);
    let blueprint = Blueprint::new(
        &module.functions,
        "fibonacci_sequence",
        vec![Value::Int(10)],
        vec![],
    )
    .unwrap();
    let result = blueprint
        .run(&Sequential, Arc::new(MemoryStore::new()))
        .unwrap();
    assert_eq!(result, ints(&[0, 1, 1, 2, 3, 5, 8, 13, 21, 34]));
}

#[test]
fn descending_fibonacci_with_any_driver() {
    let module = load(FIBONACCI);
    let blueprint = Blueprint::new(
        &module.functions,
        "descending_fibonacci",
        vec![Value::Int(6)],
        vec![],
    )
    .unwrap();

    let sequential = blueprint
        .run(&Sequential, Arc::new(MemoryStore::new()))
        .unwrap();
    assert_eq!(sequential, ints(&[5, 3, 2, 1, 1, 0]));

    let parallel = blueprint
        .run(&Parallel::new(4), Arc::new(MemoryStore::new()))
        .unwrap();
    assert_eq!(parallel, ints(&[5, 3, 2, 1, 1, 0]));
}

// ---------------------------------------------------------------------
// Instrumented store wrapper
// ---------------------------------------------------------------------

/// Rendezvous point that panics instead of hanging when the expected
/// parties never arrive.
struct Gate {
    arrived: Mutex<usize>,
    all_in: Condvar,
    parties: usize,
}

impl Gate {
    fn new(parties: usize) -> Gate {
        Gate {
            arrived: Mutex::new(0),
            all_in: Condvar::new(),
            parties,
        }
    }

    fn arrive(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut arrived = self.arrived.lock().unwrap();
        *arrived += 1;
        self.all_in.notify_all();
        while *arrived < self.parties {
            let timeout = deadline
                .checked_duration_since(Instant::now())
                .expect("rendezvous partner never arrived");
            let (guard, _) = self.all_in.wait_timeout(arrived, timeout).unwrap();
            arrived = guard;
        }
    }
}

/// Store wrapper that records commits and loads and can delay or gate
/// them per function name.
struct Instrumented {
    inner: Arc<dyn Store>,
    events: Mutex<Vec<String>>,
    /// Sleep this long inside every load of the named function's result.
    load_delay: Option<(String, Duration)>,
    /// Functions whose commits must rendezvous before completing.
    gate: Option<(Vec<String>, Arc<Gate>)>,
}

impl Instrumented {
    fn new(inner: Arc<dyn Store>) -> Instrumented {
        Instrumented {
            inner,
            events: Mutex::new(Vec::new()),
            load_delay: None,
            gate: None,
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl Store for Instrumented {
    fn contains(&self, key: &StoreKey) -> Result<bool, StoreError> {
        self.inner.contains(key)
    }

    fn store(&self, key: &StoreKey, value: &Value, tags: &Tags) -> Result<(), StoreError> {
        if let StoreKey::Result { .. } = key {
            let name = key.function_name().to_string();
            if let Some((gated, gate)) = &self.gate {
                if gated.contains(&name) {
                    self.record(format!("enter-commit {}", name));
                    gate.arrive();
                }
            }
            self.record(format!("commit {}", name));
        }
        self.inner.store(key, value, tags)
    }

    fn load(&self, key: &StoreKey) -> Result<Value, StoreError> {
        if let StoreKey::Result { .. } = key {
            let name = key.function_name().to_string();
            if let Some((delayed, delay)) = &self.load_delay {
                if *delayed == name {
                    self.record(format!("load {}", name));
                    std::thread::sleep(*delay);
                }
            }
        }
        self.inner.load(key)
    }

    fn remove(&self, key: &StoreKey) -> Result<(), StoreError> {
        self.inner.remove(key)
    }

    fn tags(&self, key: &StoreKey) -> Result<Tags, StoreError> {
        self.inner.tags(key)
    }

    fn query(&self, conditions: &[TagCondition]) -> Result<Vec<StoreKey>, StoreError> {
        self.inner.query(conditions)
    }

    fn spec(&self) -> Option<StoreSpec> {
        None
    }
}

const DIAMOND: &str = "\
import xun
ctx = xun.context(driver=xun.Parallel(workers=2), store=xun.Memory())

@ctx.function()
def a():
    return 1

@ctx.function()
def b():
    return x + 1
    with ...:
        x = a()

@ctx.function()
def c():
    return x + 2
    with ...:
        x = a()

@ctx.function()
def d():
    return y + z
    with ...:
        y = b()
        z = c()
";

#[test]
fn diamond_runs_both_branches_concurrently() {
    let module = load(DIAMOND);
    let blueprint = Blueprint::new(&module.functions, "d", vec![], vec![]).unwrap();

    let mut store = Instrumented::new(Arc::new(MemoryStore::new()));
    store.gate = Some((
        vec!["b".to_string(), "c".to_string()],
        Arc::new(Gate::new(2)),
    ));
    let store = Arc::new(store);

    let result = blueprint.run(&Parallel::new(2), store.clone()).unwrap();
    assert_eq!(result, Value::Int(5));

    let events = store.events();
    // Both branches entered their commit before either finished: the
    // gate forces the interleaving, so reaching this point proves the
    // driver had b and c in flight at the same time. d runs last.
    let position = |event: &str| events.iter().position(|e| e == event).unwrap();
    assert!(position("enter-commit b") < position("commit c"));
    assert!(position("enter-commit c") < position("commit b"));
    assert!(position("commit d") > position("commit b"));
    assert!(position("commit d") > position("commit c"));
}

const GPU_BOUND: &str = "\
import xun
ctx = xun.context(
    driver=xun.Parallel(workers=2, resources={'GPU': 2}),
    store=xun.Memory(),
)

@ctx.function()
def seed():
    return 1

@ctx.function(resources={'GPU': 2})
def g1():
    return s + 1
    with ...:
        s = seed()

@ctx.function(resources={'GPU': 2})
def g2():
    return s + 2
    with ...:
        s = seed()

@ctx.function()
def both():
    return (x, y)
    with ...:
        x = g1()
        y = g2()
";

#[test]
fn full_pool_calls_run_serially_despite_two_workers() {
    let module = load(GPU_BOUND);
    let blueprint = Blueprint::new(&module.functions, "both", vec![], vec![]).unwrap();

    let mut store = Instrumented::new(Arc::new(MemoryStore::new()));
    // Each of g1/g2 loads the seed result while holding its GPU tokens;
    // the delay widens the window so overlap would be visible.
    store.load_delay = Some(("seed".to_string(), Duration::from_millis(80)));
    let store = Arc::new(store);

    let driver = Parallel::new(2).with_resources([("GPU".to_string(), 2)].into());
    let result = blueprint.run(&driver, store.clone()).unwrap();
    assert_eq!(result, Value::Tuple(vec![Value::Int(2), Value::Int(3)]));

    // With both calls declaring GPU=2 against capacity 2, the second
    // load must come after the first commit: load, commit, load, commit.
    let events: Vec<String> = store
        .events()
        .into_iter()
        .filter(|e| e.starts_with("load seed") || e == "commit g1" || e == "commit g2")
        .collect();
    assert_eq!(events.len(), 4);
    assert!(events[0].starts_with("load"));
    assert!(events[1].starts_with("commit"));
    assert!(events[2].starts_with("load"));
    assert!(events[3].starts_with("commit"));
}

#[test]
fn resources_beyond_capacity_are_exhausted() {
    let module = load(GPU_BOUND);
    let blueprint = Blueprint::new(&module.functions, "g1", vec![], vec![]).unwrap();
    // Pool only has GPU=1 but the call declares GPU=2.
    let driver = Parallel::new(2).with_resources([("GPU".to_string(), 1)].into());
    let err = blueprint
        .run(&driver, Arc::new(MemoryStore::new()))
        .unwrap_err();
    assert!(matches!(err, ExecError::ResourceExhausted { .. }));
}

// ---------------------------------------------------------------------
// Memoization
// ---------------------------------------------------------------------

const SINGLE: &str = "\
import xun
ctx = xun.context(driver=xun.Sequential(), store=xun.Memory())

@ctx.function()
def f(n):
    return n * 2
";

#[test]
fn second_run_hits_the_cache_and_does_not_invoke() {
    let module = load(SINGLE);
    let blueprint =
        Blueprint::new(&module.functions, "f", vec![Value::Int(1)], vec![]).unwrap();

    let store = Arc::new(Instrumented::new(Arc::new(MemoryStore::new())));
    let first = blueprint.run(&Sequential, store.clone()).unwrap();
    let second = blueprint.run(&Sequential, store.clone()).unwrap();
    assert_eq!(first, second);

    let commits = store
        .events()
        .iter()
        .filter(|e| *e == "commit f")
        .count();
    assert_eq!(commits, 1);
}

#[test]
fn code_change_invalidates_but_retains_the_old_entry() {
    let v1 = SINGLE;
    let v2 = SINGLE.replace("n * 2", "n * 3");

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let old = load(v1);
    let old_blueprint =
        Blueprint::new(&old.functions, "f", vec![Value::Int(1)], vec![]).unwrap();
    assert_eq!(
        old_blueprint.run(&Sequential, store.clone()).unwrap(),
        Value::Int(2)
    );

    let new = load(&v2);
    let new_blueprint =
        Blueprint::new(&new.functions, "f", vec![Value::Int(1)], vec![]).unwrap();
    assert_eq!(
        new_blueprint.run(&Sequential, store.clone()).unwrap(),
        Value::Int(3)
    );

    let accessor = StoreAccessor::new(store);
    let old_call = &old_blueprint.call;
    let new_call = &new_blueprint.call;
    assert_ne!(old_call.function_hash, new_call.function_hash);

    // The old entry is retained; the latest pointer targets the new hash.
    assert_eq!(accessor.load_result(old_call).unwrap(), Value::Int(2));
    assert_eq!(accessor.load_result(new_call).unwrap(), Value::Int(3));
    assert_eq!(
        accessor.latest_hash(new_call).unwrap(),
        Some(new_call.function_hash.clone())
    );
}

// ---------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------

const FAILING_CHAIN: &str = "\
import xun
ctx = xun.context(driver=xun.Sequential(), store=xun.Memory())

@ctx.function()
def solid(n):
    return n + 1

@ctx.function()
def brittle(n):
    return s / 0
    with ...:
        s = solid(n)
";

#[test]
fn a_failed_run_retains_committed_partial_results() {
    let module = load(FAILING_CHAIN);
    let blueprint = Blueprint::new(
        &module.functions,
        "brittle",
        vec![Value::Int(1)],
        vec![],
    )
    .unwrap();

    let store = Arc::new(Instrumented::new(Arc::new(MemoryStore::new())));
    let err = blueprint.run(&Sequential, store.clone()).unwrap_err();
    assert!(matches!(err, ExecError::Execution { .. }));
    assert!(err.to_string().contains("brittle"));

    // solid(1) committed before the failure and is reused on re-run.
    let fixed_source = FAILING_CHAIN.replace("s / 0", "s * 10");
    let fixed = load(&fixed_source);
    let fixed_blueprint = Blueprint::new(
        &fixed.functions,
        "brittle",
        vec![Value::Int(1)],
        vec![],
    )
    .unwrap();
    assert_eq!(
        fixed_blueprint.run(&Sequential, store.clone()).unwrap(),
        Value::Int(20)
    );
    let solid_commits = store
        .events()
        .iter()
        .filter(|e| *e == "commit solid")
        .count();
    assert_eq!(solid_commits, 1);
}

#[test]
fn parallel_run_times_out_like_a_first_error() {
    let module = load(FIBONACCI);
    let blueprint = Blueprint::new(
        &module.functions,
        "fibonacci_sequence",
        vec![Value::Int(10)],
        vec![],
    )
    .unwrap();
    let driver = Parallel::new(4).with_timeout(Duration::from_secs(0));
    let err = blueprint
        .run(&driver, Arc::new(MemoryStore::new()))
        .unwrap_err();
    assert!(matches!(err, ExecError::Timeout { .. }));
}

// ---------------------------------------------------------------------
// Sub-language guard rails
// ---------------------------------------------------------------------

#[test]
fn cyclic_constants_fail_at_parse_time() {
    let source = "\
import xun
ctx = xun.context(driver=xun.Sequential(), store=xun.Memory())

@ctx.function()
def broken():
    return a
    with ...:
        a = b
        b = a
";
    let err = load_source(source, Path::new("<scenario>")).unwrap_err();
    assert!(matches!(err, LangError::NotDag { .. }));
}

#[test]
fn copy_guard_surfaces_the_symbolic_value() {
    let source = "\
import xun
ctx = xun.context(driver=xun.Sequential(), store=xun.Memory())

@ctx.function()
def f():
    return (1, 2, 3)

@ctx.function()
def g():
    return n
    with ...:
        n = len(f())
";
    let module = load(source);
    let err = Blueprint::new(&module.functions, "g", vec![], vec![]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("len"));
    assert!(message.contains("f()"));
}

#[test]
fn memory_stores_cannot_cross_a_driver_boundary() {
    struct Remote;
    impl Driver for Remote {
        fn exec(
            &self,
            _graph: &xun_core::CallGraph,
            _root: &xun_core::CallNode,
            _images: &xun_lang::Images,
            _accessor: &StoreAccessor,
        ) -> Result<Value, ExecError> {
            unreachable!("the transport check fails first")
        }
        fn requires_transport(&self) -> bool {
            true
        }
    }

    let module = load(SINGLE);
    let blueprint =
        Blueprint::new(&module.functions, "f", vec![Value::Int(1)], vec![]).unwrap();
    let err = blueprint
        .run(&Remote, Arc::new(MemoryStore::new()))
        .unwrap_err();
    assert!(matches!(err, ExecError::Core(CoreError::Copy { .. })));
}

// ---------------------------------------------------------------------
// Persistent backends end to end
// ---------------------------------------------------------------------

#[test]
fn disk_store_survives_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let module = load(FIBONACCI);
    let blueprint = Blueprint::new(
        &module.functions,
        "fibonacci_number",
        vec![Value::Int(8)],
        vec![],
    )
    .unwrap();

    let store = xun_store::from_spec(&StoreSpec::Disk {
        root: dir.path().to_path_buf(),
    })
    .unwrap();
    assert_eq!(
        blueprint.run(&Sequential, store).unwrap(),
        Value::Int(21)
    );

    // A fresh store instance over the same directory serves the cache.
    let reopened = xun_store::from_spec(&StoreSpec::Disk {
        root: dir.path().to_path_buf(),
    })
    .unwrap();
    let accessor = StoreAccessor::new(reopened);
    assert!(accessor.completed(&blueprint.call).unwrap());
    assert_eq!(
        accessor.load_result(&blueprint.call).unwrap(),
        Value::Int(21)
    );
}

#[test]
fn sqlite_store_runs_the_parallel_driver() {
    let dir = tempfile::tempdir().unwrap();
    let module = load(FIBONACCI);
    let blueprint = Blueprint::new(
        &module.functions,
        "fibonacci_sequence",
        vec![Value::Int(7)],
        vec![],
    )
    .unwrap();

    let store = xun_store::from_spec(&StoreSpec::Sqlite {
        path: dir.path().join("results.sqlite"),
    })
    .unwrap();
    assert_eq!(
        blueprint.run(&Parallel::new(3), store).unwrap(),
        ints(&[0, 1, 1, 2, 3, 5, 8])
    );
}

#[test]
fn quicksort_composes_slices_and_recursion() {
    let source = "\
import xun

ctx = xun.context(driver=xun.Sequential(), store=xun.Memory())

@ctx.function()
def quicksort(iterable):
    result = []

    result.extend(lt_sorted)

    if len(pivot) == 1:
        result.append(pivot[0])

    result.extend(gt_sorted)

    return tuple(result)
    with ...:
        lt_sorted = quicksort(lt) if len(lt) > 0 else tuple()
        gt_sorted = quicksort(gt) if len(gt) > 0 else tuple()

        lt = tuple([item for item in L[1:] if item <= pivot[0]])
        gt = tuple([item for item in L[1:] if item  > pivot[0]])

        pivot = L[:1]
        L = list(iterable)
";
    let module = load(source);
    let input = ints(&[8, 4, 7, 5, 6, 0, 9, 2, 3, 1]);
    let blueprint =
        Blueprint::new(&module.functions, "quicksort", vec![input], vec![]).unwrap();
    let result = blueprint
        .run(&Sequential, Arc::new(MemoryStore::new()))
        .unwrap();
    assert_eq!(result, ints(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]));
}
