//! Встраивание private определений с единственным потребителем

use std::collections::BTreeSet;
use tracing::debug;

use crate::builder::ContainerBuilder;
use crate::errors::ContainerResult;
use crate::graph::DependencyGraph;
use crate::pipeline::{CompileContext, Pass};
use crate::value::Value;

/// Встраивает private определение, на которое указывает ровно одна жёсткая ссылка.
///
/// Кандидат также не lazy, не abstract, не лежит на цикле и не виден через
/// aliases и привязанные значения. Shared определение не встраивается в
/// non-shared потребителя, иначе экземпляров станет больше одного.
pub struct InlineServicesPass;

impl Pass for InlineServicesPass {
    fn name(&self) -> &str {
        "inline_services"
    }

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        let mut inlined = 0usize;

        while let Some((candidate, consumer)) = next_candidate(builder) {
            ctx.enter(&consumer);
            let Some(definition) = builder.definitions.remove(&candidate) else {
                break;
            };

            let mut pending = Some(definition);
            if let Some(owner) = builder.definitions.get_mut(&consumer) {
                owner.walk_values_mut(&mut |value: &mut Value| {
                    let matches = matches!(
                        value,
                        Value::Reference(r) if r.id() == candidate && !r.is_lazy()
                    );
                    if matches {
                        if let Some(def) = pending.take() {
                            *value = Value::Inline(Box::new(def));
                        }
                    }
                });
            }

            if let Some(definition) = pending {
                // ссылка не найдена на месте: определение остаётся как есть
                builder.definitions.insert(candidate, definition);
                break;
            }

            debug!(service = %candidate, into = %consumer, "Private definition inlined");
            builder.registration.remove(&candidate);
            inlined += 1;
        }
        ctx.leave();

        if inlined > 0 {
            debug!(inlined, "Inlining finished");
        }
        Ok(())
    }
}

/// Первая пара `(candidate, consumer)` по порядку id
fn next_candidate(builder: &ContainerBuilder) -> Option<(String, String)> {
    let graph = DependencyGraph::from_definitions(builder.definitions.values());

    let mut pinned: BTreeSet<&str> = builder.aliases.values().map(|a| a.target()).collect();
    for value in builder.bindings.values() {
        for reference in value.references() {
            pinned.insert(reference.id());
        }
    }

    for definition in builder.definitions.values() {
        let id = definition.id();
        if definition.is_public()
            || definition.is_lazy()
            || definition.is_abstract()
            || definition.decorates().is_some()
            || pinned.contains(id)
        {
            continue;
        }

        let dependents = graph.dependents(id);
        if dependents.len() != 1 {
            continue;
        }
        let consumer_id = &dependents[0];
        if consumer_id == id {
            continue;
        }

        let Some(edge) = graph.edges(consumer_id).iter().find(|e| e.to == id) else {
            continue;
        };
        if !edge.is_hard() || graph.is_on_cycle(id) {
            continue;
        }

        let Some(consumer) = builder.definitions.get(consumer_id) else {
            continue;
        };
        if definition.is_shared() && !consumer.is_shared() {
            continue;
        }

        return Some((id.to_string(), consumer_id.clone()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::IteratorArgument;
    use crate::config::CompilerConfig;

    fn run(builder: &mut ContainerBuilder) -> ContainerResult<()> {
        let mut ctx = CompileContext::new(CompilerConfig::development());
        InlineServicesPass.process(builder, &mut ctx)
    }

    #[test]
    fn test_single_use_private_is_inlined() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("transport")?.class("Smtp").private();
        builder
            .singleton("mailer")?
            .argument(Value::reference("transport"));

        run(&mut builder)?;

        assert!(!builder.has_definition("transport"));
        let mailer = builder.find_definition("mailer")?;
        match &mailer.arguments()[0] {
            Value::Inline(def) => assert_eq!(def.id(), "transport"),
            other => panic!("expected inline definition, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_nested_inlining() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("config")?.private();
        builder
            .singleton("transport")?
            .argument(Value::reference("config"))
            .private();
        builder
            .singleton("mailer")?
            .argument(Value::reference("transport"));

        run(&mut builder)?;

        assert_eq!(builder.definition_ids(), vec!["mailer".to_string()]);
        Ok(())
    }

    #[test]
    fn test_not_inlined() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("shared_dep")?.private();
        builder.singleton("a")?.argument(Value::reference("shared_dep"));
        builder.singleton("b")?.argument(Value::reference("shared_dep"));

        builder.singleton("lazy_dep")?.private().lazy();
        builder.singleton("c")?.argument(Value::reference("lazy_dep"));

        builder.singleton("iterated")?.private();
        builder.singleton("d")?.argument(Value::Iterator(IteratorArgument::new(vec![
            Value::reference("iterated"),
        ])));

        builder.singleton("aliased")?.private();
        builder.set_alias("public_name", "aliased")?;
        builder.singleton("e")?.argument(Value::reference("aliased"));

        builder.singleton("single")?.private();
        builder.factory("proto")?.argument(Value::reference("single"));

        run(&mut builder)?;

        for id in ["shared_dep", "lazy_dep", "iterated", "aliased", "single"] {
            assert!(builder.has_definition(id), "{} should stay", id);
        }
        Ok(())
    }
}
