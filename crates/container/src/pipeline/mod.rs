//! Pipeline engine: упорядоченные проходы компилятора в пяти фазах

pub mod passes;

use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use tracing::{debug, error};

use crate::builder::ContainerBuilder;
use crate::config::CompilerConfig;
use crate::errors::{ContainerError, ContainerResult};

/// Фазы компиляции, выполняются строго в порядке объявления
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    BeforeOptimization,
    Optimization,
    BeforeRemoving,
    Removing,
    AfterRemoving,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::BeforeOptimization,
        Phase::Optimization,
        Phase::BeforeRemoving,
        Phase::Removing,
        Phase::AfterRemoving,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::BeforeOptimization => "before_optimization",
            Phase::Optimization => "optimization",
            Phase::BeforeRemoving => "before_removing",
            Phase::Removing => "removing",
            Phase::AfterRemoving => "after_removing",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Один шаг преобразования или проверки графа
pub trait Pass: Send + Sync {
    /// Стабильное имя для логов и контекста ошибок
    fn name(&self) -> &str;

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        ctx: &mut CompileContext,
    ) -> ContainerResult<()>;
}

/// Проход вместе с местом запуска, как его отдают провайдеры
pub struct PassRegistration {
    pub phase: Phase,
    pub priority: i32,
    pub pass: Box<dyn Pass>,
}

impl PassRegistration {
    pub fn new(phase: Phase, priority: i32, pass: impl Pass + 'static) -> Self {
        Self {
            phase,
            priority,
            pass: Box::new(pass),
        }
    }
}

struct PipelineEntry {
    phase: Phase,
    priority: i32,
    seq: u64,
    pass: Box<dyn Pass>,
}

/// Реестр проходов. Внутри фазы по возрастанию priority, при равенстве в
/// порядке регистрации.
#[derive(Default)]
pub struct Pipeline {
    entries: Vec<PipelineEntry>,
    next_seq: u64,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline со встроенными проходами, выбранными по `config`
    pub fn with_defaults(config: &CompilerConfig) -> Self {
        let mut pipeline = Self::new();
        for registration in passes::default_passes(config) {
            pipeline.add_registration(registration);
        }
        pipeline
    }

    pub fn add(&mut self, phase: Phase, priority: i32, pass: Box<dyn Pass>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(PipelineEntry {
            phase,
            priority,
            seq,
            pass,
        });
    }

    pub fn add_registration(&mut self, registration: PassRegistration) {
        self.add(registration.phase, registration.priority, registration.pass);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// План выполнения: `(phase, priority, pass name)`
    pub fn plan(&self) -> Vec<(Phase, i32, String)> {
        self.ordered_indices()
            .into_iter()
            .map(|i| {
                let e = &self.entries[i];
                (e.phase, e.priority, e.pass.name().to_string())
            })
            .collect()
    }

    fn ordered_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.entries.len()).collect();
        indices.sort_by_key(|&i| {
            let e = &self.entries[i];
            (e.phase, e.priority, e.seq)
        });
        indices
    }

    /// Выполнить проходы по порядку, первая ошибка прерывает запуск
    pub(crate) fn run(
        &mut self,
        builder: &mut ContainerBuilder,
        ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        for index in self.ordered_indices() {
            let entry = &mut self.entries[index];
            let name = entry.pass.name().to_string();
            debug!(
                pass = %name,
                phase = %entry.phase,
                priority = entry.priority,
                "Running compiler pass"
            );

            ctx.current_definition = None;
            if let Err(source) = entry.pass.process(builder, ctx) {
                let definition = ctx.current_definition.take();
                error!(
                    pass = %name,
                    definition = definition.as_deref().unwrap_or("-"),
                    category = source.category(),
                    "Compiler pass failed: {}",
                    source
                );
                return Err(ContainerError::Pass {
                    pass: name,
                    definition,
                    source: Box::new(source),
                });
            }
        }
        ctx.current_definition = None;
        Ok(())
    }
}

/// Общее состояние проходов одного вызова `compile()`
///
/// Конфигурация компилятора, текущее определение (для контекста ошибок) и
/// типизированный кэш, который живёт ровно один запуск compile.
pub struct CompileContext {
    config: CompilerConfig,
    current_definition: Option<String>,
    cache: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl CompileContext {
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            config,
            current_definition: None,
            cache: HashMap::new(),
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Запомнить определение, с которым работает проход
    pub fn enter(&mut self, id: &str) {
        self.current_definition = Some(id.to_string());
    }

    pub fn leave(&mut self) {
        self.current_definition = None;
    }

    pub fn current_definition(&self) -> Option<&str> {
        self.current_definition.as_deref()
    }

    /// Слот кэша типа `T` на время compile, создаётся при первом обращении.
    /// Возвращает результат `f`.
    pub fn with_cache<T, R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Any + Send + Sync + Default,
    {
        let key = TypeId::of::<T>();
        let mut value: Box<T> = self
            .cache
            .remove(&key)
            .and_then(|slot| slot.downcast::<T>().ok())
            .unwrap_or_default();
        let result = f(&mut value);
        self.cache.insert(key, value);
        result
    }

    pub fn cached<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.cache
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast_ref::<T>())
    }
}
