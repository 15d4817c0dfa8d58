use std::collections::BTreeMap;
use tracing::debug;

use crate::builder::ContainerBuilder;
use crate::definition::Definition;
use crate::errors::{ContainerError, ContainerResult};
use crate::pipeline::{CompileContext, Pass};

/// Разворачивает цепочки `extends` в самостоятельные определения.
///
/// Родитель даёт фабрику (если у потомка её нет) и аргументы, которые потомок
/// перекрывает по позициям. Method calls: сначала предки от самого корневого,
/// потом собственные. Теги объединяются.
pub struct ExtendDefinitionsPass;

impl Pass for ExtendDefinitionsPass {
    fn name(&self) -> &str {
        "extend_definitions"
    }

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        let children: Vec<String> = builder
            .definitions
            .values()
            .filter(|d| d.extends().is_some())
            .map(|d| d.id().to_string())
            .collect();

        let mut flattened = BTreeMap::new();
        for id in &children {
            ctx.enter(id);
            flatten(builder, id, &mut Vec::new(), &mut flattened)?;
        }
        ctx.leave();

        for (id, definition) in flattened {
            if let Some(slot) = builder.definitions.get_mut(&id) {
                debug!(service = %id, "Definition merged with its parent chain");
                *slot = definition;
            }
        }
        Ok(())
    }
}

fn flatten(
    builder: &ContainerBuilder,
    id: &str,
    stack: &mut Vec<String>,
    done: &mut BTreeMap<String, Definition>,
) -> ContainerResult<Definition> {
    if let Some(pos) = stack.iter().position(|s| s == id) {
        return Err(ContainerError::circular(stack[pos..].to_vec()));
    }
    if let Some(definition) = done.get(id) {
        return Ok(definition.clone());
    }

    let definition = builder
        .definitions
        .get(id)
        .ok_or_else(|| ContainerError::service_not_found(id))?;
    let Some(parent_id) = definition.extends() else {
        return Ok(definition.clone());
    };

    stack.push(id.to_string());
    let parent_id = builder.resolve_id(parent_id)?;
    let parent = flatten(builder, &parent_id, stack, done)?;
    stack.pop();

    let merged = merge(&parent, definition);
    done.insert(id.to_string(), merged.clone());
    Ok(merged)
}

fn merge(parent: &Definition, child: &Definition) -> Definition {
    let mut out = child.clone();

    if out.factory().is_none() {
        if let Some(factory) = parent.factory() {
            out.set_factory(factory.clone());
        }
    }

    let mut arguments = parent.arguments().to_vec();
    for (index, argument) in child.arguments().iter().enumerate() {
        match arguments.get_mut(index) {
            Some(slot) => *slot = argument.clone(),
            None => arguments.push(argument.clone()),
        }
    }
    out.set_arguments(arguments);

    let mut calls = parent.method_calls().to_vec();
    calls.extend(child.method_calls().iter().cloned());
    *out.method_calls_mut() = calls;

    for (name, attributes) in parent.tags() {
        let entry = out.tags_mut().entry(name.clone()).or_default();
        for attrs in attributes {
            if !entry.contains(attrs) {
                entry.push(attrs.clone());
            }
        }
    }

    out.set_extends(None);
    out
}
