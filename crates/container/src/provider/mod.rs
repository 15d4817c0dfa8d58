//! Провайдеры сервисов: единицы регистрации

mod file;

pub use file::{definition_files, FileFormat, FileProvider};

use std::collections::BTreeMap;

use crate::builder::ContainerBuilder;
use crate::definition::Definition;
use crate::errors::ContainerResult;
use crate::pipeline::PassRegistration;

/// Отложенная модификация уже зарегистрированного определения
pub type Extension = Box<dyn Fn(&mut Definition) -> anyhow::Result<()> + Send + Sync>;

/// Единица регистрации.
///
/// `ContainerBuilder::register` сразу вызывает `build` и `aliases`. Extensions
/// выполняются в начале `compile()`, когда все провайдеры отработали, а
/// проходы попадают в свои фазы.
pub trait ServiceProvider {
    fn build(&self, builder: &mut ContainerBuilder) -> ContainerResult<()>;

    fn aliases(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn extensions(&self) -> Vec<(String, Extension)> {
        Vec::new()
    }

    fn pipelines(&self) -> Vec<PassRegistration> {
        Vec::new()
    }
}
