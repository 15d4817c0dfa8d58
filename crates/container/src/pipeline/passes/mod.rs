//! Встроенные проходы компилятора

mod aliases;
mod check_cycles;
mod check_references;
mod class_shortcuts;
mod decorate;
mod extend;
mod inline;
mod invalid_references;
mod parameters;
mod proxy_cycles;
mod remove_unused;
mod tagged;

pub use aliases::ResolveAliasesPass;
pub use check_cycles::CheckCircularReferencesPass;
pub use check_references::CheckReferencesIntegrityPass;
pub use class_shortcuts::ResolveClassShortcutsPass;
pub use decorate::DecoratorPass;
pub use extend::ExtendDefinitionsPass;
pub use inline::InlineServicesPass;
pub use invalid_references::InvalidReferencesPass;
pub use parameters::ResolveParameterPlaceholdersPass;
pub use proxy_cycles::ProxyCyclicReferencesPass;
pub use remove_unused::{RemovePrivateAliasesPass, RemoveUnusedDefinitionsPass};
pub use tagged::TaggedIteratorPass;

use super::{PassRegistration, Phase};
use crate::config::CompilerConfig;

/// Встроенные проходы с фазой и приоритетом
pub fn default_passes(config: &CompilerConfig) -> Vec<PassRegistration> {
    let mut passes = vec![
        PassRegistration::new(Phase::BeforeOptimization, 0, ExtendDefinitionsPass),
        PassRegistration::new(Phase::BeforeOptimization, 10, DecoratorPass),
        PassRegistration::new(Phase::BeforeOptimization, 20, ResolveClassShortcutsPass),
        PassRegistration::new(Phase::Optimization, 0, ResolveParameterPlaceholdersPass),
        PassRegistration::new(Phase::Optimization, 10, ResolveAliasesPass),
        PassRegistration::new(Phase::Optimization, 20, TaggedIteratorPass),
    ];

    if config.optimization.inline_private {
        passes.push(PassRegistration::new(
            Phase::Optimization,
            100,
            InlineServicesPass,
        ));
    }

    passes.push(PassRegistration::new(
        Phase::BeforeRemoving,
        -20,
        InvalidReferencesPass,
    ));
    passes.push(PassRegistration::new(
        Phase::BeforeRemoving,
        -10,
        ProxyCyclicReferencesPass,
    ));
    if config.validation.check_cycles {
        passes.push(PassRegistration::new(
            Phase::BeforeRemoving,
            0,
            CheckCircularReferencesPass,
        ));
    }

    passes.push(PassRegistration::new(
        Phase::Removing,
        0,
        RemoveUnusedDefinitionsPass,
    ));
    passes.push(PassRegistration::new(
        Phase::Removing,
        10,
        RemovePrivateAliasesPass,
    ));

    if config.validation.check_references {
        passes.push(PassRegistration::new(
            Phase::AfterRemoving,
            0,
            CheckReferencesIntegrityPass,
        ));
    }

    passes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_respects_config() {
        let full = default_passes(&CompilerConfig::development());
        assert_eq!(full.len(), 13);

        let mut config = CompilerConfig::development();
        config.validation.check_cycles = false;
        config.optimization.inline_private = false;
        let names: Vec<String> = default_passes(&config)
            .iter()
            .map(|r| r.pass.name().to_string())
            .collect();
        assert!(!names.contains(&"check_circular_references".to_string()));
        assert!(!names.contains(&"inline_services".to_string()));
    }
}
