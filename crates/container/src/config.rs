//! Конфигурация компилятора
//!
//! Переключатели встроенных проходов, layout скомпилированного вывода и
//! поведение lazy proxy при ошибке. Presets соответствуют обычным окружениям.
//! Структура сериализуется через serde и грузится из TOML, JSON или YAML
//! (см. `config_loader`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{ContainerError, ContainerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl std::str::FromStr for Environment {
    type Err = ContainerError;

    fn from_str(s: &str) -> ContainerResult<Self> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(ContainerError::configuration(
                format!("unknown environment '{}'", other),
                Some("environment"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Повторно проверить цели ссылок после фазы removing
    pub check_references: bool,
    /// Запускать детектор циклов
    pub check_cycles: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_references: true,
            check_cycles: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Встраивать private определения с одним потребителем
    pub inline_private: bool,
    /// Удалять недостижимые private определения
    pub remove_unused: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            inline_private: true,
            remove_unused: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpLayout {
    /// Всё в одном файле
    #[default]
    Single,
    /// `index.json` и по unit'у на сервис, загрузка по требованию
    PerService,
}

impl std::str::FromStr for DumpLayout {
    type Err = ContainerError;

    fn from_str(s: &str) -> ContainerResult<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "single" => Ok(DumpLayout::Single),
            "per_service" => Ok(DumpLayout::PerService),
            other => Err(ContainerError::configuration(
                format!("unknown dump layout '{}'", other),
                Some("dump.layout"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub layout: DumpLayout,
    /// Имя файла single артефакта
    pub file_name: String,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("var/container"),
            layout: DumpLayout::Single,
            file_name: String::from("container.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Неудачную lazy инициализацию можно повторить при следующем обращении
    pub retry_failed_init: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            retry_failed_init: true,
        }
    }
}

/// Полная конфигурация компилятора
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub environment: Environment,
    pub validation: ValidationConfig,
    pub optimization: OptimizationConfig,
    pub dump: DumpConfig,
    pub proxy: ProxyConfig,
}

impl CompilerConfig {
    /// Development: все проверки включены, без dump
    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            ..Default::default()
        }
    }

    /// Production: per-service артефакт
    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            dump: DumpConfig {
                enabled: true,
                layout: DumpLayout::PerService,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Test: без dump и без inlining, граф остаётся удобным для проверок
    pub fn test() -> Self {
        Self {
            environment: Environment::Test,
            optimization: OptimizationConfig {
                inline_private: false,
                remove_unused: true,
            },
            ..Default::default()
        }
    }

    pub fn from_preset_name(name: &str) -> ContainerResult<Self> {
        match name.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::development()),
            "production" | "prod" => Ok(Self::production()),
            "test" => Ok(Self::test()),
            other => Err(ContainerError::configuration(
                format!("unknown preset '{}'", other),
                None::<String>,
            )),
        }
    }

    /// Отклонить несогласованные настройки
    pub fn validate(&self) -> ContainerResult<()> {
        if self.dump.file_name.trim().is_empty() {
            return Err(ContainerError::configuration(
                "dump file name must not be empty",
                Some("dump.file_name"),
            ));
        }
        if self.dump.file_name.contains(['/', '\\']) {
            return Err(ContainerError::configuration(
                "dump file name must not contain path separators",
                Some("dump.file_name"),
            ));
        }
        if self.dump.enabled && self.dump.directory.as_os_str().is_empty() {
            return Err(ContainerError::configuration(
                "dump is enabled but no directory is configured",
                Some("dump.directory"),
            ));
        }
        if self.dump.layout == DumpLayout::PerService && self.dump.file_name == "index.json" {
            return Err(ContainerError::configuration(
                "'index.json' is reserved for the per-service index",
                Some("dump.file_name"),
            ));
        }
        Ok(())
    }
}
