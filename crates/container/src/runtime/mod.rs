//! Runtime контейнер поверх скомпилированного графа
//!
//! `Container` дёшево клонируется. Shared сервисы строятся не более одного
//! раза (`OnceCell` на id), non-shared при каждом разрешении. Lazy определения
//! и lazy ссылки разрешаются в [`LazyProxy`].

mod lifetime;
mod proxy;
mod registry;
mod service;

pub use proxy::LazyProxy;
pub use registry::{ConditionFn, ConstructorFn, FactoryRegistry};
pub use service::{
    downcast_service, Arguments, AsAny, RuntimeValue, Service, ServiceClosure, ServiceIterator,
    ServiceRef,
};

use anyhow::anyhow;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::compiled::{CompiledGraph, GraphSource, Manifest, MemorySource};
use crate::definition::{Definition, Factory};
use crate::errors::{ContainerError, ContainerResult};
use crate::reference::{InvalidBehavior, Reference};
use crate::value::Value;
use lifetime::{ResolutionGuard, SharedInstances};

struct ContainerInner {
    source: Box<dyn GraphSource>,
    registry: FactoryRegistry,
    shared: SharedInstances,
    proxies: Mutex<HashMap<String, Arc<LazyProxy>>>,
    retry_failed_init: bool,
}

#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

/// Невладеющий handle для closures, iterators и proxy
#[derive(Clone)]
pub struct WeakContainer {
    inner: Weak<ContainerInner>,
}

impl WeakContainer {
    pub fn upgrade(&self) -> ContainerResult<Container> {
        self.inner
            .upgrade()
            .map(|inner| Container { inner })
            .ok_or_else(|| ContainerError::Factory(anyhow!("container has been dropped")))
    }
}

impl Container {
    /// Настройки proxy берутся из самого графа (`CompiledGraph::proxy`)
    pub fn from_graph(graph: CompiledGraph, registry: FactoryRegistry) -> Self {
        Self::from_source(Box::new(MemorySource::new(graph)), registry)
    }

    pub(crate) fn from_source(source: Box<dyn GraphSource>, registry: FactoryRegistry) -> Self {
        let manifest = source.manifest();
        let retry_failed_init = manifest.proxy.retry_failed_init;
        info!(
            services = manifest.services.len(),
            aliases = manifest.aliases.len(),
            parameters = manifest.parameters.len(),
            "Runtime container ready"
        );
        Self {
            inner: Arc::new(ContainerInner {
                source,
                registry,
                shared: SharedInstances::default(),
                proxies: Mutex::new(HashMap::new()),
                retry_failed_init,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn manifest(&self) -> &Manifest {
        self.inner.source.manifest()
    }

    fn owner_key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn canonical_id<'a>(&'a self, id: &'a str) -> &'a str {
        self.manifest()
            .aliases
            .get(id)
            .map(String::as_str)
            .unwrap_or(id)
    }

    // === ПУБЛИЧНОЕ API ===

    /// Публичный сервис, привязанное значение или публичный alias
    pub fn has(&self, id: &str) -> bool {
        let manifest = self.manifest();
        let id = self.canonical_id(id);
        manifest.bindings.contains_key(id)
            || manifest
                .services
                .get(id)
                .map(|entry| entry.public)
                .unwrap_or(false)
    }

    /// Получить публичный сервис. Private и неизвестные id дают `NotFound`.
    pub fn get(&self, id: &str) -> ContainerResult<RuntimeValue> {
        let manifest = self.manifest();
        let canonical = self.canonical_id(id);

        if let Some(value) = manifest.bindings.get(canonical) {
            return self.resolve_value(value);
        }
        match manifest.services.get(canonical) {
            Some(entry) if entry.public => self.resolve_service(canonical),
            _ => Err(ContainerError::service_not_found(id)),
        }
    }

    pub fn get_service(&self, id: &str) -> ContainerResult<ServiceRef> {
        let value = self.get(id)?;
        let kind = value.kind();
        value.into_service().ok_or_else(|| {
            ContainerError::invalid_argument(format!("'{}' resolves to a {}, not a service", id, kind))
        })
    }

    /// Типизированный доступ, lazy proxy инициализируется
    pub fn get_typed<T: Any + Send + Sync>(&self, id: &str) -> ContainerResult<Arc<T>> {
        let service = self.get_service(id)?;
        Ok(downcast_service::<T>(&service)?)
    }

    pub fn parameter(&self, name: &str) -> ContainerResult<Value> {
        self.manifest()
            .parameters
            .get(name)
            .cloned()
            .ok_or_else(|| ContainerError::parameter_not_found(name))
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.manifest().parameters
    }

    /// Создан ли уже shared экземпляр `id`
    pub fn initialized(&self, id: &str) -> bool {
        self.inner.shared.is_initialized(self.canonical_id(id))
    }

    /// Публичные id сервисов по порядку
    pub fn service_ids(&self) -> Vec<String> {
        self.manifest()
            .services
            .iter()
            .filter(|(_, entry)| entry.public)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn initialized_count(&self) -> usize {
        self.inner.shared.initialized_count()
    }

    // === РАЗРЕШЕНИЕ ===

    fn definition(&self, id: &str) -> ContainerResult<Arc<Definition>> {
        self.inner.source.definition(id)
    }

    /// Любая видимость, lazy определения отдают proxy
    fn resolve_service(&self, id: &str) -> ContainerResult<RuntimeValue> {
        let definition = self.definition(id)?;
        if definition.is_lazy() {
            return Ok(self.proxy_for(id, definition.is_shared()));
        }
        self.build_target(id)
    }

    /// Реальный экземпляр `id` без учёта laziness
    pub(crate) fn build_target(&self, id: &str) -> ContainerResult<RuntimeValue> {
        let definition = self.definition(id)?;

        if !definition.is_shared() {
            let _guard = ResolutionGuard::enter(self.owner_key(), id)?;
            return self.construct(&definition);
        }

        if let Some(existing) = self.inner.shared.get(id) {
            return Ok(existing);
        }
        let _guard = ResolutionGuard::enter(self.owner_key(), id)?;
        self.inner
            .shared
            .get_or_try_init(id, || self.construct(&definition))
    }

    fn proxy_for(&self, id: &str, shared: bool) -> RuntimeValue {
        let retry = self.inner.retry_failed_init;
        if !shared {
            let proxy: ServiceRef = Arc::new(LazyProxy::new(self.downgrade(), id, retry));
            return RuntimeValue::Service(proxy);
        }

        let mut proxies = self.inner.proxies.lock();
        let proxy = proxies
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(service = %id, "Lazy proxy created");
                Arc::new(LazyProxy::new(self.downgrade(), id, retry))
            })
            .clone();
        RuntimeValue::Service(proxy)
    }

    fn construct(&self, definition: &Definition) -> ContainerResult<RuntimeValue> {
        let factory = definition
            .factory()
            .ok_or_else(|| ContainerError::MissingFactory {
                service: definition.id().to_string(),
            })?;

        let instance = match factory {
            Factory::Value { value } => self.resolve_value(value)?,
            _ => {
                let args = self.resolve_arguments(definition.arguments())?;
                self.inner.registry.instantiate(factory, args)?
            }
        };

        if !definition.method_calls().is_empty() {
            let service = instance.as_service().ok_or_else(|| {
                ContainerError::invalid_argument(format!(
                    "'{}' built a {}, method calls need a service object",
                    definition.id(),
                    instance.kind()
                ))
            })?;
            for call in definition.method_calls() {
                let args = self.resolve_arguments(&call.arguments)?;
                service.invoke(&call.method, args)?;
            }
        }

        debug!(service = %definition.id(), "Service constructed");
        Ok(instance)
    }

    fn resolve_arguments(&self, values: &[Value]) -> ContainerResult<Arguments> {
        values
            .iter()
            .map(|v| self.resolve_value(v))
            .collect::<ContainerResult<Vec<_>>>()
            .map(Arguments::new)
    }

    pub(crate) fn resolve_reference(&self, reference: &Reference) -> ContainerResult<RuntimeValue> {
        let manifest = self.manifest();
        let id = self.canonical_id(reference.id());

        if let Some(value) = manifest.bindings.get(id) {
            return self.resolve_value(value);
        }
        if let Some(entry) = manifest.services.get(id) {
            if reference.is_lazy() {
                return Ok(self.proxy_for(id, entry.shared));
            }
            return self.resolve_service(id);
        }

        match reference.behavior() {
            InvalidBehavior::ThrowOnMissing => Err(ContainerError::service_not_found(reference.id())),
            InvalidBehavior::NullOnMissing | InvalidBehavior::IgnoreOnMissing => Ok(RuntimeValue::Null),
        }
    }

    pub(crate) fn resolve_value(&self, value: &Value) -> ContainerResult<RuntimeValue> {
        match value {
            Value::Null => Ok(RuntimeValue::Null),
            Value::Bool(b) => Ok(RuntimeValue::Bool(*b)),
            Value::Int(i) => Ok(RuntimeValue::Int(*i)),
            Value::Float(f) => Ok(RuntimeValue::Float(*f)),
            Value::String(s) => Ok(RuntimeValue::String(s.clone())),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.resolve_value(v)?)))
                .collect::<ContainerResult<BTreeMap<_, _>>>()
                .map(RuntimeValue::Map),
            Value::Array(items) => items
                .values()
                .iter()
                .map(|v| self.resolve_value(v))
                .collect::<ContainerResult<Vec<_>>>()
                .map(RuntimeValue::List),
            Value::Reference(reference) => self.resolve_reference(reference),
            Value::Iterator(items) => Ok(RuntimeValue::Iterator(ServiceIterator::new(
                self.downgrade(),
                items.values().to_vec(),
            ))),
            Value::Closure(closure) => Ok(RuntimeValue::Closure(ServiceClosure::new(
                self.downgrade(),
                closure.reference().clone(),
            ))),
            Value::Parameter(parameter) => match self.manifest().parameters.get(parameter.name()) {
                Some(bound) => self.resolve_value(bound),
                None => self.resolve_value(parameter.default_value()),
            },
            Value::Condition(condition) => {
                let predicate = self.inner.registry.condition(condition.predicate())?;
                let index = predicate(self)?;
                match condition.values().get(index) {
                    Some(selected) => self.resolve_value(selected),
                    None => Err(ContainerError::invalid_argument(format!(
                        "condition '{}' selected value #{} out of {}",
                        condition.predicate(),
                        index,
                        condition.values().len()
                    ))),
                }
            }
            Value::Tagged(tag) => Err(ContainerError::invalid_argument(format!(
                "tagged iterator '{}' was not expanded; compile the container first",
                tag
            ))),
            Value::Inline(definition) => {
                let _guard = ResolutionGuard::enter(self.owner_key(), definition.id())?;
                self.construct(definition)
            }
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("services", &self.manifest().services.len())
            .field("initialized", &self.inner.shared.initialized_count())
            .finish()
    }
}
