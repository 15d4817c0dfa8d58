use std::collections::BTreeSet;
use tracing::debug;

use crate::builder::ContainerBuilder;
use crate::errors::ContainerResult;
use crate::graph::DependencyGraph;
use crate::pipeline::{CompileContext, Pass};

/// Удаляет abstract определения, а при `optimization.remove_unused` и все
/// определения, недостижимые из публичных точек входа.
///
/// Точки входа: публичные определения, цели публичных aliases и ссылки из
/// привязанных значений. Aliases без цели тоже удаляются.
pub struct RemoveUnusedDefinitionsPass;

impl Pass for RemoveUnusedDefinitionsPass {
    fn name(&self) -> &str {
        "remove_unused_definitions"
    }

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        let before = builder.definitions.len();
        builder.definitions.retain(|_, d| !d.is_abstract());

        if ctx.config().optimization.remove_unused {
            let graph = DependencyGraph::from_definitions(builder.definitions.values());

            let mut roots: BTreeSet<String> = builder
                .definitions
                .values()
                .filter(|d| d.is_public())
                .map(|d| d.id().to_string())
                .collect();
            for alias in builder.aliases.values().filter(|a| a.is_public()) {
                roots.insert(alias.target().to_string());
            }
            for value in builder.bindings.values() {
                for reference in value.references() {
                    roots.insert(reference.id().to_string());
                }
            }

            let reachable = graph.reachable_from(roots.iter().map(String::as_str));
            builder.definitions.retain(|id, _| {
                let keep = reachable.contains(id);
                if !keep {
                    debug!(service = %id, "Unused private definition removed");
                }
                keep
            });
        }

        let definitions = &builder.definitions;
        let bindings = &builder.bindings;
        builder
            .aliases
            .retain(|_, alias| definitions.contains_key(alias.target()) || bindings.contains_key(alias.target()));

        let definitions = &builder.definitions;
        builder.registration.retain(|id, _| definitions.contains_key(id));

        debug!(
            removed = before - builder.definitions.len(),
            remaining = builder.definitions.len(),
            "Unused definitions removed"
        );
        Ok(())
    }
}

/// Private aliases нужны только ссылкам, которые уже перенаправлены
pub struct RemovePrivateAliasesPass;

impl Pass for RemovePrivateAliasesPass {
    fn name(&self) -> &str {
        "remove_private_aliases"
    }

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        _ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        let before = builder.aliases.len();
        builder.aliases.retain(|_, alias| alias.is_public());
        debug!(removed = before - builder.aliases.len(), "Private aliases removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::value::Value;

    #[test]
    fn test_unreachable_private_removed() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("app")?.argument(Value::reference("used"));
        builder.singleton("used")?.private();
        builder.singleton("orphan")?.private();
        builder.singleton("via_alias")?.private();
        builder.set_alias("entry", "via_alias")?;
        builder.singleton("base")?.abstract_definition();
        builder.set_private_alias("hidden", "orphan")?;

        let mut ctx = CompileContext::new(CompilerConfig::development());
        RemoveUnusedDefinitionsPass.process(&mut builder, &mut ctx)?;

        assert_eq!(
            builder.definition_ids(),
            vec!["app".to_string(), "used".into(), "via_alias".into()]
        );
        assert!(!builder.aliases().contains_key("hidden"));
        assert!(builder.aliases().contains_key("entry"));
        Ok(())
    }

    #[test]
    fn test_remove_unused_disabled_keeps_private() -> ContainerResult<()> {
        let mut config = CompilerConfig::development();
        config.optimization.remove_unused = false;

        let mut builder = ContainerBuilder::new();
        builder.singleton("orphan")?.private();
        builder.singleton("base")?.abstract_definition();

        let mut ctx = CompileContext::new(config);
        RemoveUnusedDefinitionsPass.process(&mut builder, &mut ctx)?;
        assert_eq!(builder.definition_ids(), vec!["orphan".to_string()]);
        Ok(())
    }

    #[test]
    fn test_private_aliases_removed() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("a")?;
        builder.set_alias("public_a", "a")?;
        builder.set_private_alias("private_a", "a")?;

        let mut ctx = CompileContext::new(CompilerConfig::test());
        RemovePrivateAliasesPass.process(&mut builder, &mut ctx)?;
        assert_eq!(builder.aliases().keys().collect::<Vec<_>>(), vec!["public_a"]);
        Ok(())
    }
}
