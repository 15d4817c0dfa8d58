use tracing::debug;

use crate::builder::ContainerBuilder;
use crate::errors::{ContainerError, ContainerResult};
use crate::pipeline::{CompileContext, Pass};
use crate::reference::InvalidBehavior;
use crate::value::Value;

/// Финальная проверка целостности: каждое определение можно построить, у
/// каждой throw-ссылки есть цель.
pub struct CheckReferencesIntegrityPass;

impl Pass for CheckReferencesIntegrityPass {
    fn name(&self) -> &str {
        "check_references_integrity"
    }

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        let exists = |id: &str| {
            builder.definitions.contains_key(id)
                || builder.bindings.contains_key(id)
                || builder.aliases.contains_key(id)
        };

        for definition in builder.definitions.values() {
            ctx.enter(definition.id());
            if definition.factory().is_none() {
                return Err(ContainerError::MissingFactory {
                    service: definition.id().to_string(),
                });
            }

            let mut problem: Option<ContainerError> = None;
            definition.walk_values(&mut |value: &Value| {
                if problem.is_some() {
                    return;
                }
                match value {
                    Value::Tagged(tag) => {
                        problem = Some(ContainerError::invalid_argument(format!(
                            "unexpanded tagged iterator '{}'",
                            tag
                        )));
                    }
                    Value::Inline(inner) if inner.factory().is_none() => {
                        problem = Some(ContainerError::MissingFactory {
                            service: inner.id().to_string(),
                        });
                    }
                    Value::Reference(reference) => {
                        if reference.behavior() == InvalidBehavior::ThrowOnMissing
                            && !exists(reference.id())
                        {
                            problem = Some(ContainerError::service_not_found(reference.id()));
                        }
                    }
                    Value::Closure(closure) => {
                        if !exists(closure.reference().id()) {
                            problem =
                                Some(ContainerError::service_not_found(closure.reference().id()));
                        }
                    }
                    _ => {}
                }
            });
            if let Some(err) = problem {
                return Err(err);
            }
        }

        for (id, alias) in &builder.aliases {
            ctx.enter(id);
            if !exists(alias.target()) {
                return Err(ContainerError::service_not_found(alias.target()));
            }
        }
        ctx.leave();

        debug!(
            definitions = builder.definitions.len(),
            aliases = builder.aliases.len(),
            "Reference integrity verified"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;

    fn run(builder: &mut ContainerBuilder) -> ContainerResult<()> {
        let mut ctx = CompileContext::new(CompilerConfig::test());
        CheckReferencesIntegrityPass.process(builder, &mut ctx)
    }

    #[test]
    fn test_valid_graph_passes() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("a")?.class("A").argument(Value::reference("b"));
        builder.singleton("b")?.class("B");
        builder.set_alias("alias_b", "b")?;
        run(&mut builder)
    }

    #[test]
    fn test_missing_factory() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("a")?;
        assert!(matches!(
            run(&mut builder),
            Err(ContainerError::MissingFactory { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_dangling_reference() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("a")?.class("A").argument(Value::reference("gone"));
        assert!(matches!(
            run(&mut builder),
            Err(ContainerError::NotFound { .. })
        ));
        Ok(())
    }
}
