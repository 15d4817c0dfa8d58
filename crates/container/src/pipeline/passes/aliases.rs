use std::collections::BTreeMap;
use tracing::debug;

use crate::builder::ContainerBuilder;
use crate::errors::{ContainerError, ContainerResult};
use crate::pipeline::{CompileContext, Pass};
use crate::value::Value;

/// Схлопывает цепочки aliases и перенаправляет ссылки через alias на конечное
/// определение.
pub struct ResolveAliasesPass;

impl Pass for ResolveAliasesPass {
    fn name(&self) -> &str {
        "resolve_aliases"
    }

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        let mut targets = BTreeMap::new();
        for id in builder.aliases.keys() {
            ctx.enter(id);
            let target = builder.resolve_id(id)?;
            if !builder.definitions.contains_key(&target) && !builder.bindings.contains_key(&target) {
                return Err(ContainerError::service_not_found(target));
            }
            targets.insert(id.clone(), target);
        }
        ctx.leave();

        for (id, alias) in builder.aliases.iter_mut() {
            if let Some(target) = targets.get(id) {
                alias.retarget(target.clone());
            }
        }

        let mut rewritten = 0usize;
        let mut rewrite = |value: &mut Value| {
            let reference = match value {
                Value::Reference(r) => r,
                Value::Closure(c) => c.reference_mut(),
                _ => return,
            };
            if let Some(target) = targets.get(reference.id()) {
                reference.retarget(target.clone());
                rewritten += 1;
            }
        };

        for definition in builder.definitions.values_mut() {
            definition.walk_values_mut(&mut rewrite);
        }
        for value in builder.bindings.values_mut() {
            value.walk_mut(&mut rewrite);
        }

        debug!(
            aliases = targets.len(),
            references = rewritten,
            "Alias references rewritten"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::ClosureArgument;
    use crate::config::CompilerConfig;
    use crate::reference::Reference;

    fn run(builder: &mut ContainerBuilder) -> ContainerResult<()> {
        let mut ctx = CompileContext::new(CompilerConfig::test());
        ResolveAliasesPass.process(builder, &mut ctx)
    }

    #[test]
    fn test_chain_collapsed_and_references_rewritten() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("logger.file")?;
        builder.set_alias("logger", "logger.default")?;
        builder.set_private_alias("logger.default", "logger.file")?;
        builder
            .singleton("app")?
            .argument(Value::reference("logger"))
            .method_call(
                "setFactory",
                vec![Value::Closure(ClosureArgument::new(Reference::new(
                    "logger.default",
                )))],
            );

        run(&mut builder)?;

        assert_eq!(builder.aliases()["logger"].target(), "logger.file");
        let app = builder.find_definition("app")?;
        assert_eq!(app.arguments(), &[Value::reference("logger.file")]);
        let refs: Vec<&str> = app
            .method_calls()[0]
            .arguments
            .iter()
            .flat_map(|v| v.references())
            .map(|r| r.id())
            .collect();
        assert_eq!(refs, vec!["logger.file"]);
        Ok(())
    }

    #[test]
    fn test_dangling_alias_fails() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.set_alias("a", "missing")?;
        assert!(matches!(
            run(&mut builder),
            Err(ContainerError::NotFound { .. })
        ));
        Ok(())
    }
}
