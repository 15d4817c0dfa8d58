//! Именованные конструкторы: явная замена reflection

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::service::{Arguments, RuntimeValue, Service};
use super::Container;
use crate::definition::Factory;
use crate::errors::{ContainerError, ContainerResult};

pub type ConstructorFn = Arc<dyn Fn(Arguments) -> anyhow::Result<RuntimeValue> + Send + Sync>;

/// Выбирает индекс значения `ConditionArgument`
pub type ConditionFn = Arc<dyn Fn(&Container) -> anyhow::Result<usize> + Send + Sync>;

/// Конструкторы по имени класса, статические фабрики по `Class::method` и
/// предикаты условий по имени
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    classes: HashMap<String, ConstructorFn>,
    statics: HashMap<String, ConstructorFn>,
    conditions: HashMap<String, ConditionFn>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_class<F>(&mut self, class: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(Arguments) -> anyhow::Result<RuntimeValue> + Send + Sync + 'static,
    {
        let class = class.into();
        if self.classes.insert(class.clone(), Arc::new(constructor)).is_some() {
            debug!(class = %class, "Class constructor replaced");
        }
        self
    }

    /// Конструктор, возвращающий конкретный тип сервиса
    pub fn register_service<T, F>(&mut self, class: impl Into<String>, constructor: F) -> &mut Self
    where
        T: Service,
        F: Fn(Arguments) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register_class(class, move |args| constructor(args).map(RuntimeValue::service))
    }

    pub fn register_static<F>(
        &mut self,
        class: impl Into<String>,
        method: impl Into<String>,
        factory: F,
    ) -> &mut Self
    where
        F: Fn(Arguments) -> anyhow::Result<RuntimeValue> + Send + Sync + 'static,
    {
        let key = Factory::static_call(class, method).key();
        self.statics.insert(key, Arc::new(factory));
        self
    }

    pub fn register_condition<F>(&mut self, name: impl Into<String>, predicate: F) -> &mut Self
    where
        F: Fn(&Container) -> anyhow::Result<usize> + Send + Sync + 'static,
    {
        self.conditions.insert(name.into(), Arc::new(predicate));
        self
    }

    pub fn has_factory(&self, factory: &Factory) -> bool {
        match factory {
            Factory::Class { class } => self.classes.contains_key(class),
            Factory::Static { .. } => self.statics.contains_key(&factory.key()),
            Factory::Value { .. } => true,
        }
    }

    pub fn condition(&self, name: &str) -> ContainerResult<ConditionFn> {
        self.conditions
            .get(name)
            .cloned()
            .ok_or_else(|| ContainerError::NotFound {
                kind: "Condition",
                id: name.to_string(),
            })
    }

    /// Единая точка создания. Ошибки фабрик проходят без изменений.
    pub fn instantiate(&self, factory: &Factory, args: Arguments) -> ContainerResult<RuntimeValue> {
        let constructor = match factory {
            Factory::Class { class } => self.classes.get(class),
            Factory::Static { .. } => self.statics.get(&factory.key()),
            Factory::Value { value } => {
                return RuntimeValue::from_literal(value).ok_or_else(|| {
                    ContainerError::invalid_argument(format!(
                        "value factory holds a {} that needs the container",
                        value.kind()
                    ))
                });
            }
        };

        let constructor = constructor.ok_or_else(|| ContainerError::UnknownFactory {
            factory: factory.key(),
        })?;
        constructor(args).map_err(ContainerError::Factory)
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut classes: Vec<&String> = self.classes.keys().collect();
        classes.sort();
        let mut statics: Vec<&String> = self.statics.keys().collect();
        statics.sort();
        f.debug_struct("FactoryRegistry")
            .field("classes", &classes)
            .field("statics", &statics)
            .field("conditions", &self.conditions.len())
            .finish()
    }
}
