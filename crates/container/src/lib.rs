//! DI контейнер с шагом компиляции.
//!
//! Провайдеры регистрируют определения в [`ContainerBuilder`], `compile()`
//! прогоняет конвейер проходов и замораживает граф. Результат сразу
//! превращается в runtime [`Container`] или сохраняется на диск и грузится
//! обратно через [`CompiledContainer`].

mod argument;
mod builder;
mod compiled;
pub mod config;
mod config_loader;
mod definition;
pub mod dump;
mod errors;
pub mod graph;
pub mod pipeline;
pub mod provider;
mod reference;
pub mod runtime;
mod value;

// Граф определений
pub use argument::{
    ArrayArgument, ClosureArgument, ConditionArgument, IteratorArgument, ParameterArgument,
};
pub use definition::{Decoration, Definition, Factory, MethodCall, TagAttributes, Visibility};
pub use reference::{InvalidBehavior, Reference};
pub use value::Value;

// Сборка и компиляция
pub use builder::{Alias, ContainerBuilder, DefinitionBuilder};
pub use compiled::{CompiledGraph, GraphSource, Manifest, ServiceEntry};
pub use graph::{DependencyGraph, Edge, EdgeKind, GraphStats};
pub use pipeline::{CompileContext, Pass, PassRegistration, Phase};
pub use provider::{Extension, FileProvider, ServiceProvider};

// Конфигурация
pub use config::{
    CompilerConfig, DumpConfig, DumpLayout, Environment, OptimizationConfig, ProxyConfig,
    ValidationConfig,
};
pub use config_loader::ConfigurationLoader;

// Runtime
pub use dump::{CompiledContainer, Dumper};
pub use runtime::{
    downcast_service, Arguments, Container, FactoryRegistry, LazyProxy, RuntimeValue, Service,
    ServiceClosure, ServiceIterator, ServiceRef,
};

pub use errors::{ContainerContextExt, ContainerError, ContainerResult};
