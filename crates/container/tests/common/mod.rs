//! Общие фикстуры для интеграционных тестов контейнера
//!
//! Небольшие сервисы и `FactoryRegistry`, в котором они уже зарегистрированы.
//! Счётчики конструирования позволяют проверять singleton/prototype семантику.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use container::{Arguments, FactoryRegistry, RuntimeValue, Service, ServiceRef};

/// Сервис без зависимостей
#[derive(Debug)]
pub struct Bar {
    pub serial: usize,
}

impl Service for Bar {}

/// Сервис с одной зависимостью через конструктор
#[derive(Debug)]
pub struct Foo {
    pub bar: Arc<Bar>,
}

impl Service for Foo {}

/// Универсальный узел графа: имя, зависимости конструктора и `setPeer`
pub struct Node {
    pub name: String,
    pub deps: Vec<ServiceRef>,
    pub peer: Mutex<Option<ServiceRef>>,
}

impl Node {
    pub fn peer(&self) -> Option<ServiceRef> {
        self.peer.lock().clone()
    }
}

impl Service for Node {
    fn invoke(&self, method: &str, args: Arguments) -> Result<RuntimeValue> {
        match method {
            "setPeer" => {
                *self.peer.lock() = args.get(0).and_then(|v| v.as_service().cloned());
                Ok(RuntimeValue::Null)
            }
            "name" => Ok(RuntimeValue::from(self.name.as_str())),
            other => Err(anyhow!("Node has no method '{}'", other)),
        }
    }
}

/// Сервис, записывающий все вызовы методов
pub struct Mailer {
    pub transport: String,
    pub calls: Mutex<Vec<String>>,
}

impl Service for Mailer {
    fn invoke(&self, method: &str, args: Arguments) -> Result<RuntimeValue> {
        let rendered: Vec<String> = args
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.kind().to_string()))
            .collect();
        self.calls
            .lock()
            .push(format!("{}({})", method, rendered.join(", ")));
        Ok(RuntimeValue::Null)
    }
}

/// Обёртка для декораторов: хранит внутренний сервис
pub struct Wrapper {
    pub label: String,
    pub inner: ServiceRef,
}

impl Service for Wrapper {
    fn invoke(&self, method: &str, args: Arguments) -> Result<RuntimeValue> {
        match method {
            "describe" => {
                let inner = match self.inner.invoke("describe", Arguments::default()) {
                    Ok(RuntimeValue::String(s)) => s,
                    _ => String::from("core"),
                };
                Ok(RuntimeValue::String(format!("{}({})", self.label, inner)))
            }
            other => self.inner.invoke(other, args),
        }
    }
}

/// Коллекция сервисов, полученных через iterator
pub struct Registry {
    pub members: Vec<ServiceRef>,
}

impl Service for Registry {}

pub struct Fixture {
    pub registry: FactoryRegistry,
    /// Число конструирований по имени класса
    pub constructed: Arc<Mutex<BTreeMap<String, usize>>>,
    /// Сколько раз вызывался конструктор `Flaky`
    pub flaky_attempts: Arc<AtomicUsize>,
}

impl Fixture {
    pub fn count(&self, class: &str) -> usize {
        self.constructed.lock().get(class).copied().unwrap_or(0)
    }
}

fn bump(counter: &Arc<Mutex<BTreeMap<String, usize>>>, class: &str) -> usize {
    let mut counts = counter.lock();
    let slot = counts.entry(class.to_string()).or_insert(0);
    *slot += 1;
    *slot
}

pub fn fixture() -> Fixture {
    let constructed = Arc::new(Mutex::new(BTreeMap::new()));
    let flaky_attempts = Arc::new(AtomicUsize::new(0));
    let mut registry = FactoryRegistry::new();

    let c = constructed.clone();
    registry.register_service("Bar", move |_args| {
        Ok(Bar {
            serial: bump(&c, "Bar"),
        })
    });

    let c = constructed.clone();
    registry.register_service("Foo", move |args| {
        bump(&c, "Foo");
        Ok(Foo {
            bar: args.service::<Bar>(0)?,
        })
    });

    let c = constructed.clone();
    registry.register_service("Node", move |args| {
        let name = args.string(0)?;
        bump(&c, &name);
        let deps = args
            .iter()
            .skip(1)
            .filter_map(|v| v.as_service().cloned())
            .collect();
        Ok(Node {
            name,
            deps,
            peer: Mutex::new(None),
        })
    });

    let c = constructed.clone();
    registry.register_service("Mailer", move |args| {
        bump(&c, "Mailer");
        Ok(Mailer {
            transport: args.string(0)?,
            calls: Mutex::new(Vec::new()),
        })
    });

    let c = constructed.clone();
    registry.register_service("Wrapper", move |args| {
        let label = args.string(0)?;
        bump(&c, &label);
        Ok(Wrapper {
            label,
            inner: args.service_ref(1)?,
        })
    });

    registry.register_service("Registry", |args| {
        let members = match args.get(0) {
            Some(RuntimeValue::Iterator(items)) => items
                .collect_all()?
                .into_iter()
                .filter_map(RuntimeValue::into_service)
                .collect(),
            Some(other) => return Err(anyhow!("expected an iterator, got {}", other.kind())),
            None => Vec::new(),
        };
        Ok(Registry { members })
    });

    let attempts = flaky_attempts.clone();
    registry.register_service("Flaky", move |_args| {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(anyhow!("backend not ready"));
        }
        Ok(Bar { serial: 0 })
    });

    registry.register_static("Transport", "fromDsn", |args| {
        let dsn = args.string(0)?;
        let scheme = dsn.split("://").next().unwrap_or_default().to_string();
        Ok(RuntimeValue::String(scheme))
    });

    Fixture {
        registry,
        constructed,
        flaky_attempts,
    }
}

/// Имя узла за `ServiceRef`, с форсированием прокси
pub fn node_name(service: &ServiceRef) -> Result<String> {
    let node = container::downcast_service::<Node>(service)?;
    Ok(node.name.clone())
}
