//! Разрыв циклов через lazy proxy
//!
//! Цикл, в котором есть хотя бы одно ребро из method call'а, можно собрать:
//! ссылка в этом method call'е помечается как lazy и во время выполнения
//! получает proxy вместо готового экземпляра. Циклы только из аргументов
//! конструктора не трогаются, их сообщает детектор циклов.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::builder::ContainerBuilder;
use crate::errors::ContainerResult;
use crate::graph::{definition_edges, Edge, EdgeKind};
use crate::pipeline::{CompileContext, Pass};
use crate::value::Value;

pub struct ProxyCyclicReferencesPass;

impl Pass for ProxyCyclicReferencesPass {
    fn name(&self) -> &str {
        "proxy_cyclic_references"
    }

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        let mut marked: BTreeSet<(String, usize, String)> = BTreeSet::new();

        loop {
            let adjacency = considered_edges(builder, &marked);
            let Some(edge) = find_breakable_cycle(&adjacency) else {
                break;
            };
            let Some(call) = edge.call else {
                break;
            };

            ctx.enter(&edge.from);
            if let Some(definition) = builder.definitions.get_mut(&edge.from) {
                if let Some(method_call) = definition.method_calls_mut().get_mut(call) {
                    for argument in method_call.arguments.iter_mut() {
                        argument.walk_mut(&mut |value: &mut Value| {
                            if let Value::Reference(r) = value {
                                if r.id() == edge.to {
                                    r.set_lazy(true);
                                }
                            }
                        });
                    }
                    info!(
                        "🔄 Цикл разорван: {}::{}() получит proxy для {}",
                        edge.from, method_call.method, edge.to
                    );
                }
            }
            marked.insert((edge.from.clone(), call, edge.to.clone()));
        }
        ctx.leave();

        if !marked.is_empty() {
            debug!(proxied = marked.len(), "Cyclic method-call references proxied");
        }
        Ok(())
    }
}

/// Рёбра, которые могут замкнуть цикл при конструировании
fn considered_edges(
    builder: &ContainerBuilder,
    marked: &BTreeSet<(String, usize, String)>,
) -> BTreeMap<String, Vec<Edge>> {
    let mut adjacency = BTreeMap::new();
    for definition in builder.definitions.values() {
        if definition.is_lazy() {
            continue;
        }
        let edges: Vec<Edge> = definition_edges(definition)
            .into_iter()
            .filter(|e| e.is_hard())
            .filter(|e| {
                builder
                    .definitions
                    .get(&e.to)
                    .map(|target| !target.is_lazy())
                    .unwrap_or(false)
            })
            .filter(|e| match e.call {
                Some(call) => !marked.contains(&(e.from.clone(), call, e.to.clone())),
                None => true,
            })
            .collect();
        adjacency.insert(definition.id().to_string(), edges);
    }
    adjacency
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    OnStack,
    Done,
}

/// Последнее method-call ребро первого найденного разрываемого цикла
fn find_breakable_cycle(adjacency: &BTreeMap<String, Vec<Edge>>) -> Option<Edge> {
    let mut state: BTreeMap<&str, VisitState> = BTreeMap::new();
    let mut path: Vec<&Edge> = Vec::new();

    for node in adjacency.keys() {
        if state.contains_key(node.as_str()) {
            continue;
        }
        if let Some(edge) = visit(node, adjacency, &mut state, &mut path) {
            return Some(edge);
        }
    }
    None
}

fn visit<'a>(
    node: &'a str,
    adjacency: &'a BTreeMap<String, Vec<Edge>>,
    state: &mut BTreeMap<&'a str, VisitState>,
    path: &mut Vec<&'a Edge>,
) -> Option<Edge> {
    state.insert(node, VisitState::OnStack);

    for edge in adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]) {
        match state.get(edge.to.as_str()) {
            Some(VisitState::OnStack) => {
                let start = path
                    .iter()
                    .position(|e| e.from == edge.to)
                    .unwrap_or(path.len());
                let breakable = path[start..]
                    .iter()
                    .copied()
                    .chain(std::iter::once(edge))
                    .filter(|e| e.kind == EdgeKind::MethodCall)
                    .last();
                if let Some(found) = breakable {
                    return Some(found.clone());
                }
            }
            Some(VisitState::Done) => {}
            None => {
                path.push(edge);
                if let Some(found) = visit(&edge.to, adjacency, state, path) {
                    return Some(found);
                }
                path.pop();
            }
        }
    }

    state.insert(node, VisitState::Done);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;

    fn run(builder: &mut ContainerBuilder) -> ContainerResult<()> {
        let mut ctx = CompileContext::new(CompilerConfig::test());
        ProxyCyclicReferencesPass.process(builder, &mut ctx)
    }

    fn call_reference_is_lazy(builder: &ContainerBuilder, id: &str) -> bool {
        builder
            .find_definition(id)
            .map(|d| {
                d.method_calls()
                    .iter()
                    .flat_map(|c| c.arguments.iter())
                    .filter_map(Value::as_reference)
                    .all(|r| r.is_lazy())
            })
            .unwrap_or(false)
    }

    #[test]
    fn test_method_call_cycle_is_proxied() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("a")?.argument(Value::reference("b"));
        builder
            .singleton("b")?
            .method_call("setA", vec![Value::reference("a")]);

        run(&mut builder)?;

        assert!(call_reference_is_lazy(&builder, "b"));
        // ребро конструктора не тронуто
        let a = builder.find_definition("a")?;
        assert!(!a.arguments()[0].as_reference().map(|r| r.is_lazy()).unwrap_or(true));
        Ok(())
    }

    #[test]
    fn test_constructor_cycle_left_alone() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("a")?.argument(Value::reference("b"));
        builder.singleton("b")?.argument(Value::reference("a"));

        run(&mut builder)?;

        for id in ["a", "b"] {
            let def = builder.find_definition(id)?;
            assert!(def.arguments().iter().filter_map(Value::as_reference).all(|r| !r.is_lazy()));
        }
        Ok(())
    }

    #[test]
    fn test_two_independent_cycles() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder
            .singleton("x")?
            .method_call("setY", vec![Value::reference("y")]);
        builder
            .singleton("y")?
            .method_call("setX", vec![Value::reference("x")]);
        builder
            .singleton("p")?
            .method_call("setQ", vec![Value::reference("q")]);
        builder.singleton("q")?.argument(Value::reference("p"));

        run(&mut builder)?;

        let lazy_calls: usize = builder
            .definitions()
            .flat_map(|d| d.method_calls().iter())
            .flat_map(|c| c.arguments.iter())
            .filter_map(Value::as_reference)
            .filter(|r| r.is_lazy())
            .count();
        assert_eq!(lazy_calls, 2);
        assert!(call_reference_is_lazy(&builder, "p"));
        Ok(())
    }
}
