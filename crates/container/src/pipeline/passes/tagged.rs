use std::collections::BTreeMap;
use tracing::debug;

use crate::argument::IteratorArgument;
use crate::builder::ContainerBuilder;
use crate::definition::{Definition, TagAttributes};
use crate::errors::ContainerResult;
use crate::pipeline::{CompileContext, Pass};
use crate::value::Value;

/// Заменяет `Value::Tagged(name)` на iterator ссылок на все определения с тегом.
///
/// Порядок: сначала наибольший атрибут `priority`, затем по id. При нескольких
/// вхождениях тега берётся наибольший priority.
pub struct TaggedIteratorPass;

impl Pass for TaggedIteratorPass {
    fn name(&self) -> &str {
        "tagged_iterators"
    }

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        _ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        let index = build_index(builder.definitions.values());

        let mut replaced = 0usize;
        let mut expand = |value: &mut Value| {
            if let Value::Tagged(tag) = value {
                let references = index
                    .get(tag.as_str())
                    .map(|ids| ids.iter().map(Value::reference).collect())
                    .unwrap_or_default();
                *value = Value::Iterator(IteratorArgument::new(references));
                replaced += 1;
            }
        };

        for definition in builder.definitions.values_mut() {
            definition.walk_values_mut(&mut expand);
        }
        for value in builder.bindings.values_mut() {
            value.walk_mut(&mut expand);
        }

        if replaced > 0 {
            debug!(tags = index.len(), replaced, "Tagged iterators expanded");
        }
        Ok(())
    }
}

fn tag_priority(occurrences: &[TagAttributes]) -> i64 {
    occurrences
        .iter()
        .filter_map(|attrs| attrs.get("priority").and_then(Value::as_int))
        .max()
        .unwrap_or(0)
}

/// Имя тега -> упорядоченные id определений
fn build_index<'a>(definitions: impl Iterator<Item = &'a Definition>) -> BTreeMap<String, Vec<String>> {
    let mut buckets: BTreeMap<String, Vec<(i64, String)>> = BTreeMap::new();
    for definition in definitions.filter(|d| !d.is_abstract()) {
        for (tag, occurrences) in definition.tags() {
            buckets
                .entry(tag.clone())
                .or_default()
                .push((tag_priority(occurrences), definition.id().to_string()));
        }
    }

    buckets
        .into_iter()
        .map(|(tag, mut entries)| {
            entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
            (tag, entries.into_iter().map(|(_, id)| id).collect())
        })
        .collect()
}
