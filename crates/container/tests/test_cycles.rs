//! Обнаружение и разрыв циклов

mod common;

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use common::{fixture, node_name};
use container::{
    ClosureArgument, CompilerConfig, ContainerBuilder, ContainerError, ContainerResult,
    DependencyGraph, Reference, RuntimeValue, Value,
};

fn node(builder: &mut ContainerBuilder, id: &str, deps: &[&str]) -> ContainerResult<()> {
    let mut arguments = vec![Value::from(id)];
    arguments.extend(deps.iter().map(|d| Value::reference(*d)));
    builder.singleton(id)?.class("Node").arguments(arguments);
    Ok(())
}

fn compile_err(builder: &mut ContainerBuilder) -> ContainerError {
    match builder.compile() {
        Err(err) => err,
        Ok(()) => panic!("compile must fail"),
    }
}

#[test]
fn test_three_node_cycle_reports_full_path() -> ContainerResult<()> {
    let mut builder = ContainerBuilder::with_config(CompilerConfig::test());
    node(&mut builder, "A", &["B"])?;
    node(&mut builder, "B", &["C"])?;
    node(&mut builder, "C", &["A"])?;

    let err = compile_err(&mut builder);
    let path: Vec<&str> = err
        .cycle_path()
        .map(|p| p.iter().map(String::as_str).collect())
        .unwrap_or_default();
    assert_eq!(path, vec!["A", "B", "C"]);
    assert!(err.to_string().contains("A -> B -> C -> A"));
    assert_eq!(err.category(), "circular_dependency");
    Ok(())
}

#[test]
fn test_self_reference_is_single_element_cycle() -> ContainerResult<()> {
    let mut builder = ContainerBuilder::with_config(CompilerConfig::test());
    node(&mut builder, "A", &["A"])?;

    let err = compile_err(&mut builder);
    assert_eq!(err.cycle_path(), Some(&[String::from("A")][..]));
    Ok(())
}

#[test]
fn test_failed_compile_leaves_graph_untouched() -> ContainerResult<()> {
    let mut builder = ContainerBuilder::with_config(CompilerConfig::development());
    builder.set_parameter("name", "A")?;
    builder
        .singleton("A")?
        .class("Node")
        .arguments(vec![Value::from("%name%"), Value::reference("B")]);
    node(&mut builder, "B", &["A"])?;
    builder.set_private_alias("b", "B")?;

    let before: Vec<_> = builder.definitions().cloned().collect();
    let _ = compile_err(&mut builder);
    let after: Vec<_> = builder.definitions().cloned().collect();

    assert_eq!(before, after);
    assert!(builder.aliases().contains_key("b"));
    assert!(!builder.is_compiled());
    Ok(())
}

#[test]
fn test_closure_edges_do_not_form_cycles() -> ContainerResult<()> {
    let fx = fixture();
    let mut builder = ContainerBuilder::with_config(CompilerConfig::test());
    builder.singleton("A")?.class("Node").arguments(vec![
        Value::from("A"),
        Value::Closure(ClosureArgument::new(Reference::new("B"))),
    ]);
    node(&mut builder, "B", &["A"])?;
    builder.compile()?;

    let container = builder.build(fx.registry.clone())?;
    let b = container.get_service("B")?;
    assert_eq!(node_name(&b)?, "B");
    Ok(())
}

#[test]
fn test_closure_resolves_on_call() -> ContainerResult<()> {
    let mut fx = fixture();
    fx.registry.register_class("Holder", |args| match args.get(0) {
        Some(RuntimeValue::Closure(closure)) => Ok(RuntimeValue::Closure(closure.clone())),
        _ => Err(anyhow::anyhow!("expected a closure")),
    });

    let mut builder = ContainerBuilder::with_config(CompilerConfig::test());
    builder
        .singleton("holder")?
        .class("Holder")
        .argument(Value::Closure(ClosureArgument::new(Reference::new("target"))));
    node(&mut builder, "target", &[])?;
    builder.compile()?;

    let container = builder.build(fx.registry.clone())?;
    let RuntimeValue::Closure(closure) = container.get("holder")? else {
        panic!("holder must resolve to the closure");
    };
    assert_eq!(fx.count("target"), 0);

    let first = closure.call()?;
    let second = closure.call()?;
    assert!(first.same_instance(&second));
    assert_eq!(fx.count("target"), 1);
    Ok(())
}

#[test]
fn test_runtime_reentry_fails_instead_of_deadlocking() -> ContainerResult<()> {
    let fx = fixture();
    let mut config = CompilerConfig::test();
    config.validation.check_cycles = false;

    let mut builder = ContainerBuilder::with_config(config);
    node(&mut builder, "A", &["B"])?;
    node(&mut builder, "B", &["A"])?;
    builder.compile()?;

    let container = builder.build(fx.registry.clone())?;
    let err = match container.get("A") {
        Err(err) => err,
        Ok(_) => panic!("re-entrant construction must fail"),
    };
    assert_eq!(
        err.cycle_path().map(|p| p.to_vec()),
        Some(vec![String::from("A"), String::from("B")])
    );
    assert!(!container.initialized("A"));
    Ok(())
}

#[test]
fn test_lazy_definition_breaks_constructor_cycle() -> ContainerResult<()> {
    let fx = fixture();
    let mut builder = ContainerBuilder::with_config(CompilerConfig::test());
    node(&mut builder, "A", &["B"])?;
    builder
        .singleton("B")?
        .class("Node")
        .arguments(vec![Value::from("B"), Value::reference("A")])
        .lazy();
    builder.compile()?;

    let container = builder.build(fx.registry.clone())?;
    let a = container.get_typed::<common::Node>("A")?;
    assert!(a.deps[0].as_proxy().is_some());
    assert_eq!(fx.count("B"), 0);

    assert_eq!(node_name(&a.deps[0])?, "B");
    assert_eq!(fx.count("B"), 1);
    Ok(())
}

// === Свойство: после compile жёсткие рёбра ацикличны ===

#[derive(Debug, Clone)]
struct RandomGraph {
    size: usize,
    /// (from, to, через method call)
    edges: Vec<(usize, usize, bool)>,
}

fn random_graph() -> impl Strategy<Value = RandomGraph> {
    (2usize..7).prop_flat_map(|size| {
        prop::collection::vec((0..size, 0..size, any::<bool>()), 0..12)
            .prop_map(move |edges| RandomGraph { size, edges })
    })
}

fn id(index: usize) -> String {
    format!("n{}", index)
}

fn register(graph: &RandomGraph) -> ContainerResult<ContainerBuilder> {
    let mut builder = ContainerBuilder::with_config(CompilerConfig::test());
    for index in 0..graph.size {
        let mut arguments = vec![Value::from(id(index))];
        let mut calls = Vec::new();
        for (from, to, via_call) in &graph.edges {
            if *from != index {
                continue;
            }
            if *via_call {
                calls.push(Value::reference(id(*to)));
            } else {
                arguments.push(Value::reference(id(*to)));
            }
        }

        let definition = builder.singleton(id(index))?.class("Node").arguments(arguments);
        calls
            .into_iter()
            .fold(definition, |d, target| d.method_call("setPeer", vec![target]));
    }
    Ok(builder)
}

/// Kahn: есть ли цикл в графе смежности
fn has_cycle(adjacency: &BTreeMap<String, BTreeSet<String>>) -> bool {
    let mut in_degree: BTreeMap<&str, usize> =
        adjacency.keys().map(|k| (k.as_str(), 0)).collect();
    for targets in adjacency.values() {
        for target in targets {
            *in_degree.entry(target.as_str()).or_default() += 1;
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut visited = 0;
    while let Some(node) = ready.pop() {
        visited += 1;
        for target in adjacency.get(node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(target.as_str()) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(target.as_str());
                }
            }
        }
    }
    visited != in_degree.len()
}

fn constructor_adjacency(graph: &RandomGraph) -> BTreeMap<String, BTreeSet<String>> {
    let mut adjacency: BTreeMap<String, BTreeSet<String>> =
        (0..graph.size).map(|i| (id(i), BTreeSet::new())).collect();
    for (from, to, via_call) in &graph.edges {
        if !via_call {
            adjacency.entry(id(*from)).or_default().insert(id(*to));
        }
    }
    adjacency
}

fn hard_adjacency(graph: &DependencyGraph) -> BTreeMap<String, BTreeSet<String>> {
    graph
        .nodes()
        .map(|node| {
            let targets = graph
                .edges(node)
                .iter()
                .filter(|e| e.is_hard())
                .map(|e| e.to.clone())
                .collect();
            (node.to_string(), targets)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_compiled_graph_has_no_hard_cycle(graph in random_graph()) {
        let mut builder = register(&graph).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let expect_failure = has_cycle(&constructor_adjacency(&graph));

        match builder.compile() {
            Ok(()) => {
                prop_assert!(!expect_failure, "constructor-only cycle compiled: {:?}", graph);
                prop_assert!(!has_cycle(&hard_adjacency(&builder.dependency_graph())));
            }
            Err(err) => {
                prop_assert!(expect_failure, "unexpected failure {} for {:?}", err, graph);
                prop_assert!(err.cycle_path().is_some());
            }
        }
    }

    #[test]
    fn prop_compiled_graph_builds(graph in random_graph()) {
        let mut builder = register(&graph).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assume!(builder.compile().is_ok());

        let fx = fixture();
        let container = builder
            .build(fx.registry.clone())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        for index in 0..graph.size {
            let built = container.get_service(&id(index));
            prop_assert!(built.is_ok(), "{:?}", built.err());
            prop_assert_eq!(fx.count(&id(index)), 1);
        }
    }
}
