//! Runtime значения для фабрик и результаты контейнера

use anyhow::anyhow;
use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::proxy::LazyProxy;
use super::WeakContainer;
use crate::errors::ContainerResult;
use crate::reference::Reference;
use crate::value::Value;

/// Стирание типа для типизированного доступа
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Объект, созданный контейнером
///
/// Method calls определения приходят через [`Service::invoke`]. Изменяемое
/// состояние хранится за interior mutability: экземпляры разделяются через `Arc`.
pub trait Service: AsAny {
    fn invoke(&self, method: &str, _args: Arguments) -> anyhow::Result<RuntimeValue> {
        Err(anyhow!(
            "method '{}' is not supported by {}",
            method,
            type_name::<Self>()
        ))
    }

    /// `Some`, если объект это lazy proxy вместо реального сервиса
    fn as_proxy(&self) -> Option<&LazyProxy> {
        None
    }
}

pub type ServiceRef = Arc<dyn Service>;

/// Downcast сервиса, lazy proxy при необходимости инициализируется
pub fn downcast_service<T: Any + Send + Sync>(service: &ServiceRef) -> anyhow::Result<Arc<T>> {
    if let Some(proxy) = service.as_proxy() {
        let real = proxy.instance()?;
        return downcast_service(&real);
    }
    service
        .clone()
        .into_any_arc()
        .downcast::<T>()
        .map_err(|_| anyhow!("service is not a {}", type_name::<T>()))
}

/// Разрешённое значение аргумента
#[derive(Clone)]
pub enum RuntimeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<RuntimeValue>),
    Map(BTreeMap<String, RuntimeValue>),
    Service(ServiceRef),
    Closure(ServiceClosure),
    Iterator(ServiceIterator),
}

impl RuntimeValue {
    pub fn service<T: Service>(service: T) -> Self {
        RuntimeValue::Service(Arc::new(service))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeValue::Null => "null",
            RuntimeValue::Bool(_) => "bool",
            RuntimeValue::Int(_) => "int",
            RuntimeValue::Float(_) => "float",
            RuntimeValue::String(_) => "string",
            RuntimeValue::List(_) => "list",
            RuntimeValue::Map(_) => "map",
            RuntimeValue::Service(_) => "service",
            RuntimeValue::Closure(_) => "closure",
            RuntimeValue::Iterator(_) => "iterator",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RuntimeValue::Null)
    }

    pub fn as_service(&self) -> Option<&ServiceRef> {
        match self {
            RuntimeValue::Service(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_service(self) -> Option<ServiceRef> {
        match self {
            RuntimeValue::Service(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RuntimeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            RuntimeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RuntimeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Литеральная часть значения, `None` если нужен контейнер
    pub fn from_literal(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(RuntimeValue::Null),
            Value::Bool(b) => Some(RuntimeValue::Bool(*b)),
            Value::Int(i) => Some(RuntimeValue::Int(*i)),
            Value::Float(f) => Some(RuntimeValue::Float(*f)),
            Value::String(s) => Some(RuntimeValue::String(s.clone())),
            Value::Array(a) => a
                .values()
                .iter()
                .map(RuntimeValue::from_literal)
                .collect::<Option<Vec<_>>>()
                .map(RuntimeValue::List),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| RuntimeValue::from_literal(v).map(|v| (k.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(RuntimeValue::Map),
            _ => None,
        }
    }

    /// Оба значения это один и тот же объект сервиса
    pub fn same_instance(&self, other: &RuntimeValue) -> bool {
        match (self, other) {
            (RuntimeValue::Service(a), RuntimeValue::Service(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeValue::Null => f.write_str("Null"),
            RuntimeValue::Bool(b) => write!(f, "Bool({})", b),
            RuntimeValue::Int(i) => write!(f, "Int({})", i),
            RuntimeValue::Float(x) => write!(f, "Float({})", x),
            RuntimeValue::String(s) => write!(f, "String({:?})", s),
            RuntimeValue::List(items) => f.debug_list().entries(items).finish(),
            RuntimeValue::Map(map) => f.debug_map().entries(map).finish(),
            RuntimeValue::Service(s) => match s.as_proxy() {
                Some(proxy) => write!(f, "Service(proxy of '{}')", proxy.id()),
                None => write!(f, "Service({:p})", Arc::as_ptr(s) as *const ()),
            },
            RuntimeValue::Closure(c) => write!(f, "Closure({})", c.reference()),
            RuntimeValue::Iterator(i) => write!(f, "Iterator({} item(s))", i.len()),
        }
    }
}

impl From<&str> for RuntimeValue {
    fn from(s: &str) -> Self {
        RuntimeValue::String(s.to_string())
    }
}

impl From<String> for RuntimeValue {
    fn from(s: String) -> Self {
        RuntimeValue::String(s)
    }
}

impl From<i64> for RuntimeValue {
    fn from(i: i64) -> Self {
        RuntimeValue::Int(i)
    }
}

impl From<bool> for RuntimeValue {
    fn from(b: bool) -> Self {
        RuntimeValue::Bool(b)
    }
}

impl From<ServiceRef> for RuntimeValue {
    fn from(s: ServiceRef) -> Self {
        RuntimeValue::Service(s)
    }
}

/// Позиционные аргументы конструкторов и method calls
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: Vec<RuntimeValue>,
}

impl Arguments {
    pub fn new(values: Vec<RuntimeValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RuntimeValue> {
        self.values.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuntimeValue> {
        self.values.iter()
    }

    pub fn into_vec(self) -> Vec<RuntimeValue> {
        self.values
    }

    fn required(&self, index: usize) -> anyhow::Result<&RuntimeValue> {
        self.values
            .get(index)
            .ok_or_else(|| anyhow!("missing argument #{} ({} given)", index, self.values.len()))
    }

    /// Типизированный сервис по `index`, proxy инициализируется
    pub fn service<T: Any + Send + Sync>(&self, index: usize) -> anyhow::Result<Arc<T>> {
        match self.required(index)? {
            RuntimeValue::Service(s) => downcast_service(s),
            other => Err(anyhow!("argument #{} is {}, expected a service", index, other.kind())),
        }
    }

    pub fn service_ref(&self, index: usize) -> anyhow::Result<ServiceRef> {
        match self.required(index)? {
            RuntimeValue::Service(s) => Ok(s.clone()),
            other => Err(anyhow!("argument #{} is {}, expected a service", index, other.kind())),
        }
    }

    pub fn string(&self, index: usize) -> anyhow::Result<String> {
        self.required(index)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("argument #{} is not a string", index))
    }

    pub fn int(&self, index: usize) -> anyhow::Result<i64> {
        self.required(index)?
            .as_int()
            .ok_or_else(|| anyhow!("argument #{} is not an integer", index))
    }

    pub fn bool(&self, index: usize) -> anyhow::Result<bool> {
        self.required(index)?
            .as_bool()
            .ok_or_else(|| anyhow!("argument #{} is not a boolean", index))
    }
}

/// Callable без аргументов, разрешает ссылку при каждом вызове
#[derive(Clone)]
pub struct ServiceClosure {
    container: WeakContainer,
    reference: Reference,
}

impl ServiceClosure {
    pub(crate) fn new(container: WeakContainer, reference: Reference) -> Self {
        Self {
            container,
            reference,
        }
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn call(&self) -> ContainerResult<RuntimeValue> {
        self.container.upgrade()?.resolve_reference(&self.reference)
    }
}

/// Перезапускаемая конечная последовательность, элементы разрешаются по одному
#[derive(Clone)]
pub struct ServiceIterator {
    container: WeakContainer,
    values: Arc<Vec<Value>>,
}

impl ServiceIterator {
    pub(crate) fn new(container: WeakContainer, values: Vec<Value>) -> Self {
        Self {
            container,
            values: Arc::new(values),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Новый проход по последовательности, ничего не разрешается заранее
    pub fn iter(&self) -> impl Iterator<Item = ContainerResult<RuntimeValue>> + '_ {
        self.values.iter().map(move |value| {
            let container = self.container.upgrade()?;
            container.resolve_value(value)
        })
    }

    pub fn collect_all(&self) -> ContainerResult<Vec<RuntimeValue>> {
        self.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Counter {
        value: Mutex<i64>,
    }

    impl Service for Counter {
        fn invoke(&self, method: &str, args: Arguments) -> anyhow::Result<RuntimeValue> {
            match method {
                "add" => {
                    *self.value.lock() += args.int(0)?;
                    Ok(RuntimeValue::Null)
                }
                _ => Err(anyhow!("unknown method {}", method)),
            }
        }
    }

    struct Silent;
    impl Service for Silent {}

    #[test]
    fn test_downcast_and_invoke() -> anyhow::Result<()> {
        let service: ServiceRef = Arc::new(Counter::default());
        service.invoke("add", Arguments::new(vec![RuntimeValue::Int(5)]))?;

        let typed = downcast_service::<Counter>(&service)?;
        assert_eq!(*typed.value.lock(), 5);
        assert!(downcast_service::<Silent>(&service).is_err());

        let silent: ServiceRef = Arc::new(Silent);
        assert!(silent.invoke("anything", Arguments::default()).is_err());
        Ok(())
    }

    #[test]
    fn test_same_instance() {
        let a = RuntimeValue::service(Silent);
        let b = a.clone();
        let c = RuntimeValue::service(Silent);
        assert!(a.same_instance(&b));
        assert!(!a.same_instance(&c));
        assert!(!RuntimeValue::Int(1).same_instance(&RuntimeValue::Int(1)));
    }

    #[test]
    fn test_from_literal() {
        let value = Value::array(vec![Value::Int(1), Value::from("x")]);
        assert!(matches!(
            RuntimeValue::from_literal(&value),
            Some(RuntimeValue::List(items)) if items.len() == 2
        ));
        assert!(RuntimeValue::from_literal(&Value::reference("a")).is_none());
    }

    #[test]
    fn test_arguments_errors() {
        let args = Arguments::new(vec![RuntimeValue::from("text")]);
        assert_eq!(args.string(0).unwrap(), "text");
        assert!(args.int(0).is_err());
        assert!(args.string(3).is_err());
        assert!(args.service::<Counter>(0).is_err());
    }
}
