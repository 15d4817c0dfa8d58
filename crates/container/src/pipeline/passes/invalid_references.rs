//! Политики ссылок на отсутствующие определения

use std::collections::BTreeSet;
use tracing::debug;

use crate::builder::ContainerBuilder;
use crate::definition::{Definition, Factory, MethodCall};
use crate::errors::{ContainerError, ContainerResult};
use crate::pipeline::{CompileContext, Pass};
use crate::reference::{InvalidBehavior, Reference};
use crate::value::Value;

/// Применение политик к ссылкам на неизвестные id:
///
/// - `ThrowOnMissing`: compile падает с `UnsupportedReferencePolicy`
/// - `NullOnMissing`: литерал null
/// - `IgnoreOnMissing`: удаляет method call целиком, в остальных местах null,
///   в iterator'е элемент выбрасывается
///
/// Abstract определения считаются отсутствующими: их нельзя построить.
pub struct InvalidReferencesPass;

impl Pass for InvalidReferencesPass {
    fn name(&self) -> &str {
        "resolve_invalid_references"
    }

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        let available = available_ids(builder);
        let mut fixer = Fixer {
            available: &available,
            replaced: 0,
        };

        for (id, definition) in builder.definitions.iter_mut() {
            ctx.enter(id);
            fixer.definition(id, definition)?;
        }
        for (id, value) in builder.bindings.iter_mut() {
            ctx.enter(id);
            fixer.value(id, value)?;
        }
        ctx.leave();

        if fixer.replaced > 0 {
            debug!(replaced = fixer.replaced, "Invalid references resolved by policy");
        }
        Ok(())
    }
}

fn available_ids(builder: &ContainerBuilder) -> BTreeSet<String> {
    let mut available: BTreeSet<String> = builder
        .definitions
        .values()
        .filter(|d| !d.is_abstract())
        .map(|d| d.id().to_string())
        .collect();
    available.extend(builder.bindings.keys().cloned());

    let aliased: Vec<String> = builder
        .aliases
        .keys()
        .filter(|id| {
            builder
                .resolve_id(id)
                .map(|target| available.contains(&target))
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    available.extend(aliased);
    available
}

struct Fixer<'a> {
    available: &'a BTreeSet<String>,
    replaced: usize,
}

impl Fixer<'_> {
    fn definition(&mut self, service: &str, definition: &mut Definition) -> ContainerResult<()> {
        if let Some(Factory::Value { value }) = definition.factory().cloned() {
            let mut value = value;
            self.value(service, &mut value)?;
            definition.set_factory(Factory::Value { value });
        }

        for argument in definition.arguments_mut().iter_mut() {
            self.value(service, argument)?;
        }

        let calls = std::mem::take(definition.method_calls_mut());
        let mut kept: Vec<MethodCall> = Vec::with_capacity(calls.len());
        for mut call in calls {
            let mut ignore = false;
            for argument in call.arguments.iter_mut() {
                ignore |= self.value(service, argument)?;
            }
            if ignore {
                debug!(service = %service, method = %call.method, "Method call dropped: ignored reference");
            } else {
                kept.push(call);
            }
        }
        *definition.method_calls_mut() = kept;
        Ok(())
    }

    /// `true`, если встретилась ignore-on-missing ссылка
    fn value(&mut self, service: &str, value: &mut Value) -> ContainerResult<bool> {
        match value {
            Value::Reference(reference) => {
                if self.available.contains(reference.id()) {
                    return Ok(false);
                }
                let ignore = self.missing(service, reference)?;
                *value = Value::Null;
                Ok(ignore)
            }
            Value::Closure(closure) => {
                if self.available.contains(closure.reference().id()) {
                    return Ok(false);
                }
                let ignore = self.missing(service, closure.reference())?;
                *value = Value::Null;
                Ok(ignore)
            }
            Value::Iterator(items) => {
                let values = std::mem::take(items.values_mut());
                let mut kept = Vec::with_capacity(values.len());
                for mut item in values {
                    if let Value::Reference(reference) = &item {
                        if !self.available.contains(reference.id()) {
                            self.missing(service, reference)?;
                            continue;
                        }
                    }
                    self.value(service, &mut item)?;
                    kept.push(item);
                }
                *items.values_mut() = kept;
                Ok(false)
            }
            Value::Array(items) => {
                let mut ignore = false;
                for item in items.values_mut().iter_mut() {
                    ignore |= self.value(service, item)?;
                }
                Ok(ignore)
            }
            Value::Map(map) => {
                let mut ignore = false;
                for item in map.values_mut() {
                    ignore |= self.value(service, item)?;
                }
                Ok(ignore)
            }
            Value::Parameter(parameter) => self.value(service, parameter.default_mut()),
            Value::Condition(condition) => {
                // значения остаются ссылками, мягкие политики применяет runtime
                for reference in condition.values().iter().filter_map(Value::as_reference) {
                    if reference.behavior() == InvalidBehavior::ThrowOnMissing
                        && !self.available.contains(reference.id())
                    {
                        self.missing(service, reference)?;
                    }
                }
                Ok(false)
            }
            Value::Inline(inner) => {
                let inner_id = inner.id().to_string();
                self.definition(&inner_id, inner)?;
                Ok(false)
            }
            Value::Null
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::String(_)
            | Value::Tagged(_) => Ok(false),
        }
    }

    fn missing(&mut self, service: &str, reference: &Reference) -> ContainerResult<bool> {
        match reference.behavior() {
            InvalidBehavior::ThrowOnMissing => Err(ContainerError::UnsupportedReferencePolicy {
                service: service.to_string(),
                reference: reference.id().to_string(),
            }),
            InvalidBehavior::NullOnMissing => {
                self.replaced += 1;
                Ok(false)
            }
            InvalidBehavior::IgnoreOnMissing => {
                self.replaced += 1;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::IteratorArgument;
    use crate::config::CompilerConfig;

    fn run(builder: &mut ContainerBuilder) -> ContainerResult<()> {
        let mut ctx = CompileContext::new(CompilerConfig::test());
        InvalidReferencesPass.process(builder, &mut ctx)
    }

    #[test]
    fn test_null_and_ignore_policies() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("logger")?;
        builder
            .singleton("mailer")?
            .argument(Reference::null_on_missing("profiler"))
            .argument(Reference::ignore_on_missing("tracer"))
            .method_call("setLogger", vec![Value::reference("logger")])
            .method_call("setTracer", vec![Reference::ignore_on_missing("tracer").into()])
            .method_call("setProfiler", vec![Reference::null_on_missing("profiler").into()])
            .argument(Value::Iterator(IteratorArgument::new(vec![
                Value::reference("logger"),
                Reference::null_on_missing("ghost").into(),
            ])));

        run(&mut builder)?;

        let mailer = builder.find_definition("mailer")?;
        assert_eq!(mailer.arguments()[0], Value::Null);
        assert_eq!(mailer.arguments()[1], Value::Null);
        assert_eq!(
            mailer.arguments()[2],
            Value::Iterator(IteratorArgument::new(vec![Value::reference("logger")]))
        );
        let methods: Vec<&str> = mailer
            .method_calls()
            .iter()
            .map(|c| c.method.as_str())
            .collect();
        assert_eq!(methods, vec!["setLogger", "setProfiler"]);
        assert_eq!(mailer.method_calls()[1].arguments, vec![Value::Null]);
        Ok(())
    }

    #[test]
    fn test_throw_on_missing_is_unsupported() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("mailer")?.argument(Value::reference("transport"));

        match run(&mut builder) {
            Err(ContainerError::UnsupportedReferencePolicy { service, reference }) => {
                assert_eq!(service, "mailer");
                assert_eq!(reference, "transport");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_reference_to_abstract_counts_as_missing() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("base")?.abstract_definition();
        builder
            .singleton("user")?
            .argument(Reference::null_on_missing("base"));

        run(&mut builder)?;
        assert_eq!(builder.find_definition("user")?.arguments(), &[Value::Null]);
        Ok(())
    }
}
