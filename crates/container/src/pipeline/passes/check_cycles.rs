//! Детектор циклических зависимостей
//!
//! Проверяет только "жёсткие" рёбра: аргументы конструктора и method call'ы,
//! не помеченные как lazy. Closure и iterator разрешаются при использовании и
//! цикла не создают. Lazy определения собираются через proxy, поэтому рёбра в
//! них и из них тоже пропускаются.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error};

use crate::builder::ContainerBuilder;
use crate::errors::{ContainerError, ContainerResult};
use crate::graph::definition_edges;
use crate::pipeline::{CompileContext, Pass};

pub struct CheckCircularReferencesPass;

impl Pass for CheckCircularReferencesPass {
    fn name(&self) -> &str {
        "check_circular_references"
    }

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        debug!("🔍 Проверка циклических зависимостей");

        let adjacency = hard_adjacency(builder);
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut on_stack: Vec<&str> = Vec::new();

        for node in adjacency.keys() {
            if visited.contains(node.as_str()) {
                continue;
            }
            if let Some(path) = dfs(node, &adjacency, &mut visited, &mut on_stack) {
                error!("❌ Обнаружена циклическая зависимость: {}", path.join(" -> "));
                if let Some(first) = path.first() {
                    ctx.enter(first);
                }
                return Err(ContainerError::circular(path));
            }
        }

        debug!("✅ Циклических зависимостей не обнаружено");
        Ok(())
    }
}

/// Смежность по жёстким рёбрам между не-lazy определениями
fn hard_adjacency(builder: &ContainerBuilder) -> BTreeMap<String, Vec<String>> {
    let eager = |id: &str| {
        builder
            .definitions
            .get(id)
            .map(|d| !d.is_lazy())
            .unwrap_or(false)
    };

    builder
        .definitions
        .values()
        .filter(|d| !d.is_lazy())
        .map(|d| {
            let mut targets: Vec<String> = definition_edges(d)
                .into_iter()
                .filter(|e| e.is_hard() && eager(&e.to))
                .map(|e| e.to)
                .collect();
            targets.dedup();
            (d.id().to_string(), targets)
        })
        .collect()
}

fn dfs<'a>(
    node: &'a str,
    adjacency: &'a BTreeMap<String, Vec<String>>,
    visited: &mut BTreeSet<&'a str>,
    on_stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    on_stack.push(node);

    for next in adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]) {
        if let Some(pos) = on_stack.iter().position(|n| *n == next.as_str()) {
            return Some(on_stack[pos..].iter().map(|s| s.to_string()).collect());
        }
        if !visited.contains(next.as_str()) {
            if let Some(cycle) = dfs(next, adjacency, visited, on_stack) {
                return Some(cycle);
            }
        }
    }

    on_stack.pop();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::ClosureArgument;
    use crate::config::CompilerConfig;
    use crate::reference::Reference;
    use crate::value::Value;

    fn run(builder: &mut ContainerBuilder) -> ContainerResult<()> {
        let mut ctx = CompileContext::new(CompilerConfig::test());
        CheckCircularReferencesPass.process(builder, &mut ctx)
    }

    #[test]
    fn test_constructor_cycle_detected_with_path() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("a")?.argument(Value::reference("b"));
        builder.singleton("b")?.argument(Value::reference("c"));
        builder.singleton("c")?.argument(Value::reference("a"));

        let err = run(&mut builder).unwrap_err();
        assert_eq!(
            err.cycle_path(),
            Some(&["a".to_string(), "b".to_string(), "c".to_string()][..])
        );
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> c -> a");
        Ok(())
    }

    #[test]
    fn test_self_reference_detected() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("loop")?.argument(Value::reference("loop"));
        let err = run(&mut builder).unwrap_err();
        assert_eq!(err.cycle_path(), Some(&["loop".to_string()][..]));
        Ok(())
    }

    #[test]
    fn test_soft_edges_ignored() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("a")?.argument(Value::reference("b"));
        builder
            .singleton("b")?
            .argument(Value::Closure(ClosureArgument::new(Reference::new("a"))));
        builder.singleton("c")?.argument(Value::reference("d"));
        builder.singleton("d")?.argument(Reference::lazy("c"));
        builder.singleton("e")?.argument(Value::reference("f"));
        builder.singleton("f")?.argument(Value::reference("e")).lazy();

        run(&mut builder)
    }
}
