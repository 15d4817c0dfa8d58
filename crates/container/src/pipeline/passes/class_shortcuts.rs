use tracing::debug;

use crate::builder::ContainerBuilder;
use crate::definition::Factory;
use crate::errors::ContainerResult;
use crate::pipeline::{CompileContext, Pass};

/// Определение без фабрики строится классом с именем, равным его id
pub struct ResolveClassShortcutsPass;

impl Pass for ResolveClassShortcutsPass {
    fn name(&self) -> &str {
        "resolve_class_shortcuts"
    }

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        _ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        for definition in builder.definitions.values_mut() {
            if definition.factory().is_none() && !definition.is_abstract() {
                let class = definition.id().to_string();
                debug!(service = %class, "Class shortcut resolved");
                definition.set_factory(Factory::Class { class });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;

    #[test]
    fn test_shortcut_uses_id() -> ContainerResult<()> {
        let mut builder = ContainerBuilder::new();
        builder.singleton("App\\Mailer")?;
        builder.singleton("explicit")?.class("Other");
        builder.singleton("base")?.abstract_definition();

        let mut ctx = CompileContext::new(CompilerConfig::test());
        ResolveClassShortcutsPass.process(&mut builder, &mut ctx)?;

        assert_eq!(
            builder.find_definition("App\\Mailer")?.factory(),
            Some(&Factory::class("App\\Mailer"))
        );
        assert_eq!(
            builder.find_definition("explicit")?.factory(),
            Some(&Factory::class("Other"))
        );
        assert!(builder.find_definition("base")?.factory().is_none());
        Ok(())
    }
}
