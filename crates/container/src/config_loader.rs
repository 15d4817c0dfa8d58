//! Загрузчик конфигурации
//!
//! Источники, от низшего приоритета к высшему:
//! - preset (`development`, если не указан другой)
//! - файл конфигурации (TOML, JSON или YAML из путей поиска или заданный
//!   явно), накладывается на preset по ключам
//! - переменные окружения с префиксом `CONTAINER_`
//!
//! Результат валидируется перед возвратом.

use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::config::CompilerConfig;
use crate::errors::{ContainerError, ContainerResult};

const FILE_NAMES: [&str; 5] = [
    "container.toml",
    "container.json",
    "container.yaml",
    "container.yml",
    ".container.toml",
];

/// Загрузчик конфигурации с поддержкой нескольких источников
pub struct ConfigurationLoader {
    search_paths: Vec<PathBuf>,
    env_prefix: String,
    validate_on_load: bool,
}

impl Default for ConfigurationLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationLoader {
    /// Стандартные пути поиска: текущая директория, затем config dir пользователя
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from(".")];
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("container"));
        }

        Self {
            search_paths,
            env_prefix: String::from("CONTAINER"),
            validate_on_load: true,
        }
    }

    /// Поиск только в указанных путях
    pub fn with_search_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths: paths,
            ..Self::new()
        }
    }

    pub fn add_search_path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Установить префикс переменных окружения (по умолчанию "CONTAINER")
    pub fn env_prefix<S: Into<String>>(&mut self, prefix: S) -> &mut Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn validate(&mut self, enabled: bool) -> &mut Self {
        self.validate_on_load = enabled;
        self
    }

    /// Preset, затем первый найденный файл, затем окружение
    pub fn load(&self, preset: Option<&str>) -> ContainerResult<CompilerConfig> {
        let base = match preset {
            Some(name) => CompilerConfig::from_preset_name(name)?,
            None => CompilerConfig::development(),
        };

        let mut config = match self.find_configuration_file() {
            Some(path) => {
                info!(path = %path.display(), "Container configuration file found");
                self.merge_file(base, &path)?
            }
            None => base,
        };

        self.apply_environment_variables(&mut config)?;
        self.finish(config)
    }

    /// Полная конфигурация из одного файла, отсутствующие ключи по умолчанию
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> ContainerResult<CompilerConfig> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ContainerError::io(path, e))?;

        let config = match extension(path).as_deref() {
            Some("toml") => self.load_from_toml(&content)?,
            Some("json") => self.load_from_json(&content)?,
            Some("yaml") | Some("yml") => self.load_from_yaml(&content)?,
            other => return Err(unsupported_format(other)),
        };
        self.finish(config)
    }

    pub fn load_from_toml(&self, content: &str) -> ContainerResult<CompilerConfig> {
        toml::from_str(content).map_err(ContainerError::serialization)
    }

    pub fn load_from_json(&self, content: &str) -> ContainerResult<CompilerConfig> {
        serde_json::from_str(content).map_err(ContainerError::serialization)
    }

    pub fn load_from_yaml(&self, content: &str) -> ContainerResult<CompilerConfig> {
        serde_yaml::from_str(content).map_err(ContainerError::serialization)
    }

    /// Сохранить конфигурацию в файл, формат по расширению
    pub fn save_to_file<P: AsRef<Path>>(
        &self,
        config: &CompilerConfig,
        path: P,
    ) -> ContainerResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ContainerError::io(parent, e))?;
            }
        }

        let content = match extension(path).as_deref() {
            Some("toml") => toml::to_string_pretty(config).map_err(ContainerError::serialization)?,
            Some("json") => serde_json::to_string_pretty(config)?,
            Some("yaml") | Some("yml") => {
                serde_yaml::to_string(config).map_err(ContainerError::serialization)?
            }
            other => return Err(unsupported_format(other)),
        };

        fs::write(path, content).map_err(|e| ContainerError::io(path, e))?;
        debug!(path = %path.display(), "Container configuration saved");
        Ok(())
    }

    /// Первый известный файл в первом пути поиска, где он есть
    pub fn find_configuration_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find_map(|dir| {
            FILE_NAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|path| path.is_file())
        })
    }

    fn merge_file(&self, base: CompilerConfig, path: &Path) -> ContainerResult<CompilerConfig> {
        let content = fs::read_to_string(path).map_err(|e| ContainerError::io(path, e))?;
        let overlay: serde_json::Value = match extension(path).as_deref() {
            Some("toml") => toml::from_str(&content).map_err(ContainerError::serialization)?,
            Some("json") => serde_json::from_str(&content)?,
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(ContainerError::serialization)?
            }
            other => return Err(unsupported_format(other)),
        };

        let mut merged = serde_json::to_value(&base)?;
        merge_json(&mut merged, overlay);
        Ok(serde_json::from_value(merged)?)
    }

    fn finish(&self, config: CompilerConfig) -> ContainerResult<CompilerConfig> {
        if self.validate_on_load {
            config.validate()?;
        }
        Ok(config)
    }

    /// Применить переменные окружения к конфигурации
    fn apply_environment_variables(&self, config: &mut CompilerConfig) -> ContainerResult<()> {
        let prefix = format!("{}_", self.env_prefix);

        for (key, value) in env::vars() {
            if let Some(config_key) = key.strip_prefix(&prefix) {
                self.apply_env_var(config, config_key, &value)?;
            }
        }
        Ok(())
    }

    fn apply_env_var(&self, config: &mut CompilerConfig, key: &str, value: &str) -> ContainerResult<()> {
        match key.to_uppercase().as_str() {
            "ENVIRONMENT" => config.environment = value.parse()?,
            "DUMP_ENABLED" => config.dump.enabled = parse_bool(key, value)?,
            "DUMP_DIRECTORY" => config.dump.directory = PathBuf::from(value),
            "DUMP_LAYOUT" => config.dump.layout = value.parse()?,
            "DUMP_FILE_NAME" => config.dump.file_name = value.to_string(),
            "CHECK_CYCLES" => config.validation.check_cycles = parse_bool(key, value)?,
            "CHECK_REFERENCES" => config.validation.check_references = parse_bool(key, value)?,
            "INLINE_PRIVATE" => config.optimization.inline_private = parse_bool(key, value)?,
            "REMOVE_UNUSED" => config.optimization.remove_unused = parse_bool(key, value)?,
            "PROXY_RETRY_FAILED_INIT" => config.proxy.retry_failed_init = parse_bool(key, value)?,
            _ => {
                debug!(key = %key, "Unknown container environment variable ignored");
                return Ok(());
            }
        }
        debug!(key = %key, "Configuration overridden from environment");
        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(str::to_lowercase)
}

fn unsupported_format(extension: Option<&str>) -> ContainerError {
    ContainerError::configuration(
        format!("unsupported configuration file format: {:?}", extension),
        None::<String>,
    )
}

fn parse_bool(key: &str, value: &str) -> ContainerResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ContainerError::configuration(
            format!("expected a boolean, got '{}'", other),
            Some(key.to_lowercase()),
        )),
    }
}

/// Объекты накладываются по ключам, остальное заменяется
fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DumpLayout, Environment};
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        for (key, _) in env::vars() {
            if key.starts_with("CONTAINER_") {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_partial_file_merges_over_preset() -> ContainerResult<()> {
        clear_env();
        let dir = TempDir::new().map_err(|e| ContainerError::io("tempdir", e))?;
        fs::write(
            dir.path().join("container.toml"),
            "[dump]\nenabled = true\ndirectory = \"build/di\"\n",
        )
        .map_err(|e| ContainerError::io("container.toml", e))?;

        let loader = ConfigurationLoader::with_search_paths(vec![dir.path().to_path_buf()]);
        let config = loader.load(Some("production"))?;

        assert_eq!(config.environment, Environment::Production);
        assert!(config.dump.enabled);
        assert_eq!(config.dump.directory, PathBuf::from("build/di"));
        // значение preset сохраняется, где файл молчит
        assert_eq!(config.dump.layout, DumpLayout::PerService);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_environment_overrides() -> ContainerResult<()> {
        clear_env();
        let dir = TempDir::new().map_err(|e| ContainerError::io("tempdir", e))?;
        env::set_var("CONTAINER_DUMP_LAYOUT", "per-service");
        env::set_var("CONTAINER_CHECK_CYCLES", "off");
        env::set_var("CONTAINER_ENVIRONMENT", "test");

        let loader = ConfigurationLoader::with_search_paths(vec![dir.path().to_path_buf()]);
        let result = loader.load(None);
        clear_env();
        let config = result?;

        assert_eq!(config.dump.layout, DumpLayout::PerService);
        assert!(!config.validation.check_cycles);
        assert_eq!(config.environment, Environment::Test);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_invalid_environment_value() -> ContainerResult<()> {
        clear_env();
        let dir = TempDir::new().map_err(|e| ContainerError::io("tempdir", e))?;
        env::set_var("CONTAINER_INLINE_PRIVATE", "maybe");

        let loader = ConfigurationLoader::with_search_paths(vec![dir.path().to_path_buf()]);
        let result = loader.load(None);
        clear_env();

        assert!(matches!(result, Err(ContainerError::Configuration { .. })));
        Ok(())
    }

    #[test]
    fn test_save_and_load_each_format() -> ContainerResult<()> {
        let dir = TempDir::new().map_err(|e| ContainerError::io("tempdir", e))?;
        let loader = ConfigurationLoader::new();
        let config = CompilerConfig::production();

        for name in ["c.toml", "c.json", "c.yaml"] {
            let path = dir.path().join(name);
            loader.save_to_file(&config, &path)?;
            assert_eq!(loader.load_from_file(&path)?, config);
        }

        assert!(loader.save_to_file(&config, dir.path().join("c.ini")).is_err());
        Ok(())
    }

    #[test]
    fn test_validation_on_load() -> ContainerResult<()> {
        let loader = ConfigurationLoader::new();
        let broken = loader.load_from_json(r#"{"dump": {"file_name": ""}}"#)?;
        assert!(broken.validate().is_err());

        let dir = TempDir::new().map_err(|e| ContainerError::io("tempdir", e))?;
        let path = dir.path().join("broken.json");
        fs::write(&path, r#"{"dump": {"file_name": "a/b.json"}}"#)
            .map_err(|e| ContainerError::io(&path, e))?;
        assert!(loader.load_from_file(&path).is_err());
        Ok(())
    }
}
