//! Замороженный граф после успешного compile

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::builder::ContainerBuilder;
use crate::config::ProxyConfig;
use crate::definition::Definition;
use crate::errors::{ContainerError, ContainerResult};
use crate::value::Value;

/// Всё, что нужно runtime. Упорядоченные maps дают стабильную сериализацию.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledGraph {
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub bindings: BTreeMap<String, Value>,
    /// Публичные aliases, уже указывающие на конечную цель
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub definitions: BTreeMap<String, Definition>,
    /// Поведение lazy proxy, зафиксированное при compile
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl CompiledGraph {
    pub(crate) fn from_builder(builder: &ContainerBuilder) -> Self {
        Self {
            parameters: builder.parameters().clone(),
            bindings: builder.bindings().clone(),
            aliases: builder
                .aliases()
                .iter()
                .filter(|(_, alias)| alias.is_public())
                .map(|(id, alias)| (id.clone(), alias.target().to_string()))
                .collect(),
            definitions: builder
                .definitions()
                .map(|d| (d.id().to_string(), d.clone()))
                .collect(),
            proxy: builder.config().proxy.clone(),
        }
    }

    pub fn manifest(&self) -> Manifest {
        Manifest {
            parameters: self.parameters.clone(),
            bindings: self.bindings.clone(),
            aliases: self.aliases.clone(),
            services: self
                .definitions
                .values()
                .map(|d| (d.id().to_string(), ServiceEntry::of(d)))
                .collect(),
            proxy: self.proxy.clone(),
        }
    }
}

/// Сведения о сервисе, доступные без загрузки определения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub public: bool,
    #[serde(default = "default_shared")]
    pub shared: bool,
}

fn default_shared() -> bool {
    true
}

impl ServiceEntry {
    pub fn of(definition: &Definition) -> Self {
        Self {
            public: definition.is_public(),
            shared: definition.is_shared(),
        }
    }
}

/// Индекс графа без самих определений
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub bindings: BTreeMap<String, Value>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceEntry>,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Откуда runtime берёт определения: из памяти или лениво с диска
pub trait GraphSource: Send + Sync {
    fn manifest(&self) -> &Manifest;

    fn definition(&self, id: &str) -> ContainerResult<Arc<Definition>>;
}

pub(crate) struct MemorySource {
    manifest: Manifest,
    definitions: BTreeMap<String, Arc<Definition>>,
}

impl MemorySource {
    pub fn new(graph: CompiledGraph) -> Self {
        let manifest = graph.manifest();
        Self {
            manifest,
            definitions: graph
                .definitions
                .into_iter()
                .map(|(id, d)| (id, Arc::new(d)))
                .collect(),
        }
    }
}

impl GraphSource for MemorySource {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn definition(&self, id: &str) -> ContainerResult<Arc<Definition>> {
        self.definitions
            .get(id)
            .cloned()
            .ok_or_else(|| ContainerError::service_not_found(id))
    }
}
