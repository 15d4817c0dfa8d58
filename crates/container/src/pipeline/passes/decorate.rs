use std::collections::BTreeMap;
use tracing::debug;

use crate::builder::{Alias, ContainerBuilder};
use crate::definition::{Decoration, Visibility};
use crate::errors::{ContainerError, ContainerResult};
use crate::pipeline::{CompileContext, Pass};

/// Переносит декораторы на декорируемый идентификатор.
///
/// Декораторы идут по убыванию priority, при равенстве по порядку регистрации.
/// Текущее определение цели становится `<decorator>.inner` (private),
/// декоратор занимает id цели, его собственный id становится alias. Декоратор
/// с наибольшим priority оказывается самым внутренним.
pub struct DecoratorPass;

impl Pass for DecoratorPass {
    fn name(&self) -> &str {
        "decorate_services"
    }

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        let mut chains: BTreeMap<String, Vec<(String, Decoration, u64)>> = BTreeMap::new();
        for definition in builder.definitions.values() {
            if let Some(decoration) = definition.decorates() {
                let seq = builder
                    .registration
                    .get(definition.id())
                    .copied()
                    .unwrap_or(u64::MAX);
                chains.entry(decoration.target.clone()).or_default().push((
                    definition.id().to_string(),
                    decoration.clone(),
                    seq,
                ));
            }
        }

        for (target, mut chain) in chains {
            chain.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then(a.2.cmp(&b.2)));

            for (decorator_id, _, _) in chain {
                ctx.enter(&decorator_id);
                apply(builder, &target, &decorator_id)?;
            }
        }
        ctx.leave();
        Ok(())
    }
}

fn apply(builder: &mut ContainerBuilder, target: &str, decorator_id: &str) -> ContainerResult<()> {
    let target_id = builder.resolve_id(target)?;
    if target_id == decorator_id {
        return Err(ContainerError::invalid_argument(format!(
            "service '{}' cannot decorate itself",
            decorator_id
        )));
    }

    let original = builder
        .definitions
        .remove(&target_id)
        .ok_or_else(|| ContainerError::service_not_found(target))?;
    let Some(mut decorator) = builder.definitions.remove(decorator_id) else {
        builder.definitions.insert(target_id, original);
        return Err(ContainerError::service_not_found(decorator_id));
    };

    let inner_id = format!("{}.inner", decorator_id);
    let mut inner = original.renamed(inner_id.as_str());
    inner.set_visibility(Visibility::Private);

    let decorator_public = decorator.is_public();
    decorator.set_decorates(None);
    let mut moved = decorator.renamed(target_id.as_str());
    if original.is_public() {
        moved.set_visibility(Visibility::Public);
    }

    debug!(
        "🔄 {} decorates {} (original moved to {})",
        decorator_id, target_id, inner_id
    );

    builder.insert_definition(inner);
    builder.insert_definition(moved);
    builder
        .aliases
        .insert(decorator_id.to_string(), Alias::new(target_id, decorator_public));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::value::Value;

    fn run(builder: &mut ContainerBuilder) -> ContainerResult<()> {
        let mut ctx = CompileContext::new(CompilerConfig::test());
        DecoratorPass.process(builder, &mut ctx)
    }

    #[test]
    fn test_single_decorator() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("mailer")?.class("SmtpMailer");
        builder
            .singleton("mailer.logging")?
            .class("LoggingMailer")
            .argument(Value::reference("mailer.logging.inner"))
            .decorate("mailer", 0);

        run(&mut builder)?;

        let outer = builder.find_definition("mailer")?;
        assert_eq!(outer.factory().map(|f| f.key()), Some("LoggingMailer".into()));
        let inner = builder.find_definition("mailer.logging.inner")?;
        assert_eq!(inner.factory().map(|f| f.key()), Some("SmtpMailer".into()));
        assert!(!inner.is_public());

        // id декоратора по-прежнему разрешается
        assert_eq!(builder.resolve_id("mailer.logging")?, "mailer");
        Ok(())
    }

    #[test]
    fn test_priority_chain_highest_innermost() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("svc")?.class("Base");
        builder
            .singleton("low")?
            .class("Low")
            .argument(Value::reference("low.inner"))
            .decorate("svc", 1);
        builder
            .singleton("high")?
            .class("High")
            .argument(Value::reference("high.inner"))
            .decorate("svc", 10);
        builder
            .singleton("low_twin")?
            .class("LowTwin")
            .argument(Value::reference("low_twin.inner"))
            .decorate("svc", 1);

        run(&mut builder)?;

        // svc -> low_twin -> low -> high -> Base
        let key = |id: &str| {
            builder
                .find_definition(id)
                .ok()
                .and_then(|d| d.factory().map(|f| f.key()))
        };
        assert_eq!(key("svc"), Some("LowTwin".into()));
        assert_eq!(key("low_twin.inner"), Some("Low".into()));
        assert_eq!(key("low.inner"), Some("High".into()));
        assert_eq!(key("high.inner"), Some("Base".into()));
        Ok(())
    }

    #[test]
    fn test_missing_target() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("d")?.decorate("ghost", 0);
        assert!(run(&mut builder).is_err());
        Ok(())
    }
}
