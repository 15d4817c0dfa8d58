//! Container builder: изменяемый граф определений
//!
//! Провайдеры наполняют builder, `compile()` прогоняет pipeline и фиксирует
//! результат только при успехе. После успешного compile любой изменяющий
//! вызов завершается ошибкой `Frozen`.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use common::OperationTimer;

use crate::compiled::CompiledGraph;
use crate::config::CompilerConfig;
use crate::definition::{Decoration, Definition, Factory, TagAttributes, Visibility};
use crate::dump::Dumper;
use crate::errors::{ContainerError, ContainerResult};
use crate::graph::{DependencyGraph, GraphStats};
use crate::pipeline::{CompileContext, Pass, PassRegistration, Phase, Pipeline};
use crate::provider::{Extension, ServiceProvider};
use crate::runtime::{Container, FactoryRegistry};
use crate::value::Value;

/// Перенаправление идентификатора
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    target: String,
    #[serde(default = "default_public")]
    public: bool,
}

fn default_public() -> bool {
    true
}

impl Alias {
    pub fn new(target: impl Into<String>, public: bool) -> Self {
        Self {
            target: target.into(),
            public,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub(crate) fn retarget(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }
}

/// Состояние графа для отката при неудачном compile
struct GraphSnapshot {
    definitions: BTreeMap<String, Definition>,
    aliases: BTreeMap<String, Alias>,
    parameters: BTreeMap<String, Value>,
    bindings: BTreeMap<String, Value>,
    registration: BTreeMap<String, u64>,
}

pub struct ContainerBuilder {
    pub(crate) definitions: BTreeMap<String, Definition>,
    pub(crate) aliases: BTreeMap<String, Alias>,
    pub(crate) parameters: BTreeMap<String, Value>,
    pub(crate) bindings: BTreeMap<String, Value>,
    /// Порядковый номер регистрации для каждого id
    pub(crate) registration: BTreeMap<String, u64>,
    next_registration: u64,
    extensions: Vec<(String, Extension)>,
    pipeline: Pipeline,
    config: CompilerConfig,
    compiled: bool,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::with_config(CompilerConfig::default())
    }

    pub fn with_config(config: CompilerConfig) -> Self {
        Self {
            definitions: BTreeMap::new(),
            aliases: BTreeMap::new(),
            parameters: BTreeMap::new(),
            bindings: BTreeMap::new(),
            registration: BTreeMap::new(),
            next_registration: 0,
            extensions: Vec::new(),
            pipeline: Pipeline::with_defaults(&config),
            config,
            compiled: false,
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    fn ensure_mutable(&self, operation: &str) -> ContainerResult<()> {
        if self.compiled {
            warn!(operation, "Mutation attempted on a compiled container");
            return Err(ContainerError::frozen(operation));
        }
        Ok(())
    }

    // === РЕГИСТРАЦИЯ ===

    /// Запустить провайдер: `build`, затем его aliases. Extensions и проходы
    /// ставятся в очередь и применяются в `compile()`.
    pub fn register(&mut self, provider: &dyn ServiceProvider) -> ContainerResult<&mut Self> {
        self.ensure_mutable("register a provider")?;

        provider.build(self)?;
        for (id, target) in provider.aliases() {
            self.set_alias(id, target)?;
        }
        self.extensions.extend(provider.extensions());
        for registration in provider.pipelines() {
            self.pipeline.add_registration(registration);
        }

        debug!(
            definitions = self.definitions.len(),
            aliases = self.aliases.len(),
            "Provider registered"
        );
        Ok(self)
    }

    /// Зарегистрировать singleton, класс которого совпадает с id
    pub fn singleton(&mut self, id: impl Into<String>) -> ContainerResult<DefinitionBuilder<'_>> {
        let id = id.into();
        self.ensure_mutable(&format!("register '{}'", id))?;
        let definition = Definition::new(id);
        Ok(DefinitionBuilder {
            definition: self.insert_definition(definition),
        })
    }

    /// Зарегистрировать singleton, создаваемый классом `class`
    pub fn singleton_with_class(
        &mut self,
        id: impl Into<String>,
        class: impl Into<String>,
    ) -> ContainerResult<DefinitionBuilder<'_>> {
        Ok(self.singleton(id)?.class(class))
    }

    /// Зарегистрировать factory: каждое разрешение создаёт новый экземпляр
    pub fn factory(&mut self, id: impl Into<String>) -> ContainerResult<DefinitionBuilder<'_>> {
        Ok(self.singleton(id)?.shared(false))
    }

    /// Редактор уже зарегистрированного определения (aliases учитываются)
    pub fn extend(&mut self, id: &str) -> ContainerResult<DefinitionBuilder<'_>> {
        self.ensure_mutable(&format!("extend '{}'", id))?;
        let resolved = self.resolve_id(id)?;
        match self.definitions.get_mut(&resolved) {
            Some(definition) => Ok(DefinitionBuilder { definition }),
            None => Err(ContainerError::service_not_found(id)),
        }
    }

    /// Вставить готовое определение, заменив предыдущее с тем же id
    pub fn set_definition(&mut self, definition: Definition) -> ContainerResult<()> {
        self.ensure_mutable(&format!("set definition '{}'", definition.id()))?;
        self.insert_definition(definition);
        Ok(())
    }

    pub(crate) fn insert_definition(&mut self, definition: Definition) -> &mut Definition {
        let id = definition.id().to_string();
        if self.aliases.remove(&id).is_some() {
            warn!(id = %id, "Definition replaces an alias with the same id");
        }
        if self.bindings.remove(&id).is_some() {
            warn!(id = %id, "Definition replaces a bound value with the same id");
        }
        if self.definitions.contains_key(&id) {
            debug!(id = %id, "Definition replaced");
        }
        if !self.registration.contains_key(&id) {
            self.registration.insert(id.clone(), self.next_registration);
            self.next_registration += 1;
        }

        match self.definitions.entry(id) {
            Entry::Occupied(mut slot) => {
                slot.insert(definition);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(definition),
        }
    }

    /// Привязать готовое значение (литерал или структуру ссылок) к `id`
    pub fn bind(&mut self, id: impl Into<String>, value: impl Into<Value>) -> ContainerResult<()> {
        let id = id.into();
        self.ensure_mutable(&format!("bind '{}'", id))?;
        if self.definitions.remove(&id).is_some() {
            warn!(id = %id, "Bound value replaces a definition");
        }
        self.aliases.remove(&id);
        self.bindings.insert(id, value.into());
        Ok(())
    }

    // === ЗАПРОСЫ ===

    /// Пройти цепочку aliases до конечного id. Петля даёт `CircularDependency`.
    pub fn resolve_id(&self, id: &str) -> ContainerResult<String> {
        let mut current = id.to_string();
        let mut path: Vec<String> = Vec::new();

        while let Some(alias) = self.aliases.get(&current) {
            if let Some(start) = path.iter().position(|p| *p == current) {
                return Err(ContainerError::circular(path[start..].to_vec()));
            }
            path.push(current.clone());
            current = alias.target().to_string();
        }

        Ok(current)
    }

    pub fn find_definition(&self, id: &str) -> ContainerResult<&Definition> {
        let resolved = self.resolve_id(id)?;
        self.definitions
            .get(&resolved)
            .ok_or_else(|| ContainerError::service_not_found(id))
    }

    pub fn find_definition_mut(&mut self, id: &str) -> ContainerResult<&mut Definition> {
        self.ensure_mutable(&format!("modify '{}'", id))?;
        let resolved = self.resolve_id(id)?;
        self.definitions
            .get_mut(&resolved)
            .ok_or_else(|| ContainerError::service_not_found(id))
    }

    pub fn has_definition(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    /// Определение, alias или привязанное значение
    pub fn has(&self, id: &str) -> bool {
        match self.resolve_id(id) {
            Ok(resolved) => {
                self.definitions.contains_key(&resolved) || self.bindings.contains_key(&resolved)
            }
            Err(_) => false,
        }
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.values()
    }

    pub fn definition_ids(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }

    pub fn remove_definition(&mut self, id: &str) -> ContainerResult<Option<Definition>> {
        self.ensure_mutable(&format!("remove '{}'", id))?;
        Ok(self.definitions.remove(id))
    }

    /// Id определений с тегом `tag` и атрибуты каждого вхождения
    pub fn find_tagged(&self, tag: &str) -> Vec<(&str, &[TagAttributes])> {
        self.definitions
            .values()
            .filter_map(|d| d.tags().get(tag).map(|attrs| (d.id(), attrs.as_slice())))
            .collect()
    }

    pub fn bindings(&self) -> &BTreeMap<String, Value> {
        &self.bindings
    }

    // === ALIASES ===

    pub fn set_alias(
        &mut self,
        id: impl Into<String>,
        target: impl Into<String>,
    ) -> ContainerResult<()> {
        self.insert_alias(id.into(), Alias::new(target, true))
    }

    /// Alias только для ссылок внутри графа, удаляется в фазе removing
    pub fn set_private_alias(
        &mut self,
        id: impl Into<String>,
        target: impl Into<String>,
    ) -> ContainerResult<()> {
        self.insert_alias(id.into(), Alias::new(target, false))
    }

    fn insert_alias(&mut self, id: String, alias: Alias) -> ContainerResult<()> {
        self.ensure_mutable(&format!("alias '{}'", id))?;
        if id == alias.target() {
            return Err(ContainerError::invalid_argument(format!(
                "an alias cannot reference itself: '{}'",
                id
            )));
        }
        if self.definitions.remove(&id).is_some() {
            warn!(id = %id, "Alias replaces a definition with the same id");
        }
        self.aliases.insert(id, alias);
        Ok(())
    }

    pub fn aliases(&self) -> &BTreeMap<String, Alias> {
        &self.aliases
    }

    pub fn remove_alias(&mut self, id: &str) -> ContainerResult<Option<Alias>> {
        self.ensure_mutable(&format!("remove alias '{}'", id))?;
        Ok(self.aliases.remove(id))
    }

    // === ПАРАМЕТРЫ ===

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub fn get_parameter(&self, name: &str) -> ContainerResult<&Value> {
        self.parameters
            .get(name)
            .ok_or_else(|| ContainerError::parameter_not_found(name))
    }

    pub fn set_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> ContainerResult<()> {
        let name = name.into();
        self.ensure_mutable(&format!("set parameter '{}'", name))?;
        self.parameters.insert(name, value.into());
        Ok(())
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }

    // === КОНВЕЙЕР ===

    pub fn add_pass(
        &mut self,
        phase: Phase,
        priority: i32,
        pass: impl Pass + 'static,
    ) -> ContainerResult<()> {
        self.ensure_mutable("add a compiler pass")?;
        self.pipeline
            .add_registration(PassRegistration::new(phase, priority, pass));
        Ok(())
    }

    /// План выполнения зарегистрированных проходов
    pub fn pipeline_plan(&self) -> Vec<(Phase, i32, String)> {
        self.pipeline.plan()
    }

    /// Отложенная модификация `id`, применяется в начале `compile()`
    pub fn add_extension(&mut self, id: impl Into<String>, extension: Extension) -> ContainerResult<()> {
        self.ensure_mutable("add an extension")?;
        self.extensions.push((id.into(), extension));
        Ok(())
    }

    // === КОМПИЛЯЦИЯ ===

    /// Применить extensions и прогнать pipeline. При ошибке граф остаётся
    /// ровно таким, каким был до вызова.
    pub fn compile(&mut self) -> ContainerResult<()> {
        if self.compiled {
            return Err(ContainerError::frozen("compile twice"));
        }

        let mut timer = OperationTimer::new("container_compile");
        timer.add_field("definitions", self.definitions.len());
        timer.add_field("passes", self.pipeline.len());

        let result = self.run_compile();
        if result.is_ok() {
            timer.add_field("definitions_after", self.definitions.len());
        }
        timer.finish_with_result(&result);
        result
    }

    fn run_compile(&mut self) -> ContainerResult<()> {
        let snapshot = self.snapshot();
        let extensions = std::mem::take(&mut self.extensions);
        let mut pipeline = std::mem::take(&mut self.pipeline);
        let mut ctx = CompileContext::new(self.config.clone());

        let outcome = self
            .apply_extensions(&extensions)
            .and_then(|_| pipeline.run(self, &mut ctx));

        self.pipeline = pipeline;
        match outcome {
            Ok(()) => {
                for definition in self.definitions.values_mut() {
                    definition.mark_resolved();
                }
                self.compiled = true;
                info!(
                    definitions = self.definitions.len(),
                    aliases = self.aliases.len(),
                    parameters = self.parameters.len(),
                    "Container compiled"
                );
                Ok(())
            }
            Err(e) => {
                self.restore(snapshot);
                self.extensions = extensions;
                Err(e)
            }
        }
    }

    fn apply_extensions(&mut self, extensions: &[(String, Extension)]) -> ContainerResult<()> {
        for (id, extension) in extensions {
            let resolved = self.resolve_id(id)?;
            let definition = self
                .definitions
                .get_mut(&resolved)
                .ok_or_else(|| ContainerError::service_not_found(id.clone()))?;

            extension(definition).map_err(|e| ContainerError::Extension {
                service: id.clone(),
                message: format!("{:#}", e),
            })?;
            debug!(service = %id, "Extension applied");
        }
        Ok(())
    }

    fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            definitions: self.definitions.clone(),
            aliases: self.aliases.clone(),
            parameters: self.parameters.clone(),
            bindings: self.bindings.clone(),
            registration: self.registration.clone(),
        }
    }

    fn restore(&mut self, snapshot: GraphSnapshot) {
        self.definitions = snapshot.definitions;
        self.aliases = snapshot.aliases;
        self.parameters = snapshot.parameters;
        self.bindings = snapshot.bindings;
        self.registration = snapshot.registration;
    }

    /// Замороженный граф для runtime или dumper'а
    pub fn compiled_graph(&self) -> ContainerResult<CompiledGraph> {
        if !self.compiled {
            return Err(ContainerError::NotCompiled {
                operation: String::from("exporting the compiled graph"),
            });
        }
        Ok(CompiledGraph::from_builder(self))
    }

    /// Runtime контейнер поверх скомпилированного графа
    pub fn build(&self, registry: FactoryRegistry) -> ContainerResult<Container> {
        let graph = self.compiled_graph()?;
        Ok(Container::from_graph(graph, registry))
    }

    /// Compile и запись артефакта при `dump.enabled`. Возвращает записанные файлы.
    pub fn compile_and_dump(&mut self) -> ContainerResult<Vec<PathBuf>> {
        self.config.validate()?;
        self.compile()?;

        if !self.config.dump.enabled {
            debug!("Dump disabled, skipping emitter");
            return Ok(Vec::new());
        }

        let graph = self.compiled_graph()?;
        Dumper::new(&self.config.dump).write(&graph, &self.config.dump.directory)
    }

    /// Размер графа и fan-in/fan-out
    pub fn graph_stats(&self) -> GraphStats {
        DependencyGraph::from_definitions(self.definitions.values()).get_stats()
    }

    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::from_definitions(self.definitions.values())
    }
}

/// Fluent редактор одного определения
pub struct DefinitionBuilder<'a> {
    definition: &'a mut Definition,
}

impl<'a> DefinitionBuilder<'a> {
    pub fn id(&self) -> &str {
        self.definition.id()
    }

    pub fn definition(&self) -> &Definition {
        self.definition
    }

    pub fn class(self, class: impl Into<String>) -> Self {
        self.definition.set_factory(Factory::class(class));
        self
    }

    pub fn factory_method(self, class: impl Into<String>, method: impl Into<String>) -> Self {
        self.definition
            .set_factory(Factory::static_call(class, method));
        self
    }

    /// Готовое значение вместо конструктора
    pub fn value(self, value: impl Into<Value>) -> Self {
        self.definition.set_factory(Factory::Value {
            value: value.into(),
        });
        self
    }

    pub fn argument(self, value: impl Into<Value>) -> Self {
        self.definition.arguments_mut().push(value.into());
        self
    }

    /// Заменить все аргументы конструктора
    pub fn arguments(self, values: Vec<Value>) -> Self {
        self.definition.set_arguments(values);
        self
    }

    pub fn replace_argument(self, index: usize, value: impl Into<Value>) -> ContainerResult<Self> {
        self.definition.replace_argument(index, value.into())?;
        Ok(self)
    }

    pub fn method_call(self, method: impl Into<String>, arguments: Vec<Value>) -> Self {
        self.definition.add_method_call(method, arguments);
        self
    }

    pub fn tag(self, name: impl Into<String>) -> Self {
        self.definition.add_tag(name, TagAttributes::new());
        self
    }

    pub fn tag_with(self, name: impl Into<String>, attributes: TagAttributes) -> Self {
        self.definition.add_tag(name, attributes);
        self
    }

    /// Тег с целочисленным атрибутом `priority`
    pub fn tag_priority(self, name: impl Into<String>, priority: i64) -> Self {
        let mut attributes = TagAttributes::new();
        attributes.insert(String::from("priority"), Value::Int(priority));
        self.tag_with(name, attributes)
    }

    pub fn private(self) -> Self {
        self.definition.set_visibility(Visibility::Private);
        self
    }

    pub fn public(self) -> Self {
        self.definition.set_visibility(Visibility::Public);
        self
    }

    pub fn shared(self, shared: bool) -> Self {
        self.definition.set_shared(shared);
        self
    }

    pub fn lazy(self) -> Self {
        self.definition.set_lazy(true);
        self
    }

    pub fn abstract_definition(self) -> Self {
        self.definition.set_abstract(true);
        self
    }

    pub fn extends(self, parent: impl Into<String>) -> Self {
        self.definition.set_extends(Some(parent.into()));
        self
    }

    /// Занять место `target`. Оригинал доступен как `<this id>.inner`.
    pub fn decorate(self, target: impl Into<String>, priority: i32) -> Self {
        self.definition.set_decorates(Some(Decoration {
            target: target.into(),
            priority,
        }));
        self
    }
}
