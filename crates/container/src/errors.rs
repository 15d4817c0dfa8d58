//! 🚫 CONTAINER ERROR HANDLING
//!
//! Единая система ошибок для builder, pipeline, runtime и compiled output.
//!
//! # АРХИТЕКТУРА ОШИБОК
//!
//! - **ContainerError**: основной enum для всех операций контейнера
//! - **ContainerError::Pass**: обёртка с контекстом (какой pass, какое определение)
//! - **ContainerError::Factory**: ошибки пользовательских фабрик, без изменений
//!
//! # ОБРАБОТКА ОШИБОК
//!
//! ```rust,ignore
//! // ✅ Для прикладного кода: anyhow с контекстом
//! builder.compile().container_context("Failed to compile application container")?;
//!
//! // ✅ Для тестов и диагностики: снять обёртки pipeline
//! match err.root() {
//!     ContainerError::CircularDependency { path } => println!("{}", path.join(" -> ")),
//!     other => println!("{}", other),
//! }
//! ```

use anyhow::Context;
use thiserror::Error;

/// Основной error type для всех операций контейнера
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Идентификатор не найден (сервис, alias, параметр)
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Некорректные аргументы при построении Argument/Definition
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Жёсткий цикл зависимостей. `path` хранит цикл без повторного замыкающего узла
    #[error("Circular dependency detected: {}", format_cycle(.path))]
    CircularDependency { path: Vec<String> },

    /// Мутация после успешного compile()
    #[error("Container is compiled; cannot {operation}")]
    Frozen { operation: String },

    /// Политика invalid-reference не может быть выполнена
    #[error("Service '{service}' has a dependency on a non-existent service '{reference}'")]
    UnsupportedReferencePolicy { service: String, reference: String },

    /// У определения нет фабрики после нормализации
    #[error("Service '{service}' has no factory")]
    MissingFactory { service: String },

    /// Фабрика не зарегистрирована в FactoryRegistry
    #[error("No factory registered for '{factory}'")]
    UnknownFactory { factory: String },

    /// Контекст pipeline: какой pass и на каком определении упал
    #[error("Compiler pass '{pass}' failed{}: {source}", definition_suffix(.definition))]
    Pass {
        pass: String,
        definition: Option<String>,
        #[source]
        source: Box<ContainerError>,
    },

    /// Extension callback провайдера вернул ошибку
    #[error("Extension for '{service}' failed: {message}")]
    Extension { service: String, message: String },

    /// Неудачная ленивая инициализация, закэшированная прокси
    #[error("Lazy service '{id}' failed to initialize earlier: {message}")]
    ProxyPoisoned { id: String, message: String },

    /// Операция требует скомпилированного графа
    #[error("Container is not compiled; call compile() before {operation}")]
    NotCompiled { operation: String },

    /// Ошибки конфигурации
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Ошибки ввода-вывода (dump/load)
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Ошибки сериализации и целостности артефактов
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Ошибка пользовательской фабрики, метода или условия
    #[error(transparent)]
    Factory(#[from] anyhow::Error),
}

fn format_cycle(path: &[String]) -> String {
    match path.first() {
        Some(first) => {
            let mut rendered = path.join(" -> ");
            rendered.push_str(" -> ");
            rendered.push_str(first);
            rendered
        }
        None => String::from("<empty>"),
    }
}

fn definition_suffix(definition: &Option<String>) -> String {
    match definition {
        Some(id) => format!(" on '{}'", id),
        None => String::new(),
    }
}

/// Результат операций контейнера
pub type ContainerResult<T> = Result<T, ContainerError>;

impl ContainerError {
    /// Ошибка not found для id сервиса
    pub fn service_not_found(id: impl Into<String>) -> Self {
        ContainerError::NotFound {
            kind: "Service",
            id: id.into(),
        }
    }

    /// Ошибка not found для имени параметра
    pub fn parameter_not_found(name: impl Into<String>) -> Self {
        ContainerError::NotFound {
            kind: "Parameter",
            id: name.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ContainerError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn circular(path: Vec<String>) -> Self {
        ContainerError::CircularDependency { path }
    }

    pub fn frozen(operation: impl Into<String>) -> Self {
        ContainerError::Frozen {
            operation: operation.into(),
        }
    }

    pub fn configuration(message: impl Into<String>, field: Option<impl Into<String>>) -> Self {
        ContainerError::Configuration {
            message: message.into(),
            field: field.map(|f| f.into()),
        }
    }

    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        ContainerError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn serialization(message: impl std::fmt::Display) -> Self {
        ContainerError::Serialization {
            message: message.to_string(),
        }
    }

    /// Снять все `Pass` обёртки и вернуть исходную ошибку
    pub fn root(&self) -> &ContainerError {
        let mut current = self;
        while let ContainerError::Pass { source, .. } = current {
            current = source;
        }
        current
    }

    /// Путь цикла, если корневая ошибка - CircularDependency
    pub fn cycle_path(&self) -> Option<&[String]> {
        match self.root() {
            ContainerError::CircularDependency { path } => Some(path),
            _ => None,
        }
    }

    /// Можно ли восстановиться после ошибки
    pub fn is_recoverable(&self) -> bool {
        match self {
            ContainerError::NotFound { .. } => false, // Registration needs to change
            ContainerError::InvalidArgument { .. } => false,
            ContainerError::CircularDependency { .. } => false, // Graph is deterministic
            ContainerError::Frozen { .. } => false,
            ContainerError::UnsupportedReferencePolicy { .. } => false,
            ContainerError::MissingFactory { .. } => false,
            ContainerError::UnknownFactory { .. } => false,
            ContainerError::Pass { source, .. } => source.is_recoverable(),
            ContainerError::Extension { .. } => false,
            ContainerError::ProxyPoisoned { .. } => false,
            ContainerError::NotCompiled { .. } => true, // compile() and retry
            ContainerError::Configuration { .. } => false,
            ContainerError::Io { .. } => true, // Storage may come back
            ContainerError::Serialization { .. } => false,
            ContainerError::Factory(_) => true, // Lazy proxies retry by default
        }
    }

    /// Категория ошибки для полей логов
    pub fn category(&self) -> &'static str {
        match self {
            ContainerError::NotFound { .. } => "not_found",
            ContainerError::InvalidArgument { .. } => "invalid_argument",
            ContainerError::CircularDependency { .. } => "circular_dependency",
            ContainerError::Frozen { .. } => "frozen",
            ContainerError::UnsupportedReferencePolicy { .. } => "reference_policy",
            ContainerError::MissingFactory { .. } | ContainerError::UnknownFactory { .. } => {
                "factory_registration"
            }
            ContainerError::Pass { source, .. } => source.category(),
            ContainerError::Extension { .. } => "extension",
            ContainerError::ProxyPoisoned { .. } => "proxy",
            ContainerError::NotCompiled { .. } => "lifecycle",
            ContainerError::Configuration { .. } => "configuration",
            ContainerError::Io { .. } => "io",
            ContainerError::Serialization { .. } => "serialization",
            ContainerError::Factory(_) => "factory",
        }
    }
}

impl From<serde_json::Error> for ContainerError {
    fn from(err: serde_json::Error) -> Self {
        ContainerError::serialization(err)
    }
}

/// Extension trait для добавления контекста к ContainerError
pub trait ContainerContextExt<T> {
    fn container_context(self, message: &str) -> anyhow::Result<T>;
    fn container_with_context<F>(self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ContainerContextExt<T> for Result<T, ContainerError> {
    fn container_context(self, message: &str) -> anyhow::Result<T> {
        self.map_err(anyhow::Error::from)
            .with_context(|| message.to_string())
    }

    fn container_with_context<F>(self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(anyhow::Error::from).with_context(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_full_path() {
        let err = ContainerError::circular(vec!["A".into(), "B".into(), "C".into()]);
        assert_eq!(
            err.to_string(),
            "Circular dependency detected: A -> B -> C -> A"
        );
    }

    #[test]
    fn test_self_cycle_message() {
        let err = ContainerError::circular(vec!["A".into()]);
        assert_eq!(err.to_string(), "Circular dependency detected: A -> A");
    }

    #[test]
    fn test_root_strips_pass_wrappers() {
        let err = ContainerError::Pass {
            pass: "check_circular_references".into(),
            definition: Some("A".into()),
            source: Box::new(ContainerError::circular(vec!["A".into(), "B".into()])),
        };

        assert!(err.to_string().contains("on 'A'"));
        assert!(matches!(
            err.root(),
            ContainerError::CircularDependency { .. }
        ));
        assert_eq!(err.cycle_path().map(|p| p.len()), Some(2));
        assert_eq!(err.category(), "circular_dependency");
    }

    #[test]
    fn test_factory_error_is_transparent() {
        let err = ContainerError::from(anyhow::anyhow!("database unreachable"));
        assert_eq!(err.to_string(), "database unreachable");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_context_ext() {
        let result: ContainerResult<()> = Err(ContainerError::service_not_found("mailer"));
        let err = result.container_context("boot").unwrap_err();
        assert_eq!(err.to_string(), "boot");
        assert!(format!("{:#}", err).contains("Service 'mailer' not found"));
    }
}
