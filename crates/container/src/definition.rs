//! Модель определения: как построить один сервис

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{ContainerError, ContainerResult};
use crate::value::Value;

/// Способ получения экземпляра
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Factory {
    /// Конструктор, зарегистрированный под `class`
    Class { class: String },
    /// Статическая фабрика `class::method`
    Static { class: String, method: String },
    /// Готовое литеральное значение
    Value { value: Value },
}

impl Factory {
    pub fn class(class: impl Into<String>) -> Self {
        Factory::Class {
            class: class.into(),
        }
    }

    pub fn static_call(class: impl Into<String>, method: impl Into<String>) -> Self {
        Factory::Static {
            class: class.into(),
            method: method.into(),
        }
    }

    /// Разобрать `"Class::method"`, без `::` это конструктор класса
    pub fn parse(raw: &str) -> ContainerResult<Self> {
        match raw.split_once("::") {
            Some((class, method)) if !class.is_empty() && !method.is_empty() => {
                Ok(Factory::static_call(class, method))
            }
            Some(_) => Err(ContainerError::invalid_argument(format!(
                "malformed static factory '{}', expected Class::method",
                raw
            ))),
            None if raw.is_empty() => Err(ContainerError::invalid_argument(
                "factory class name must not be empty",
            )),
            None => Ok(Factory::class(raw)),
        }
    }

    /// Ключ реестра для поиска конструктора
    pub fn key(&self) -> String {
        match self {
            Factory::Class { class } => class.clone(),
            Factory::Static { class, method } => format!("{}::{}", class, method),
            Factory::Value { .. } => String::from("<value>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Value>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoration {
    pub target: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Атрибуты одного вхождения тега, например `{"priority": 10}`
pub type TagAttributes = BTreeMap<String, Value>;

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Один создаваемый сервис
///
/// Идентификатор фиксируется при создании. Переименование (декорирование)
/// создаёт новое определение через [`Definition::renamed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    factory: Option<Factory>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    arguments: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    method_calls: Vec<MethodCall>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<String, Vec<TagAttributes>>,
    #[serde(default)]
    visibility: Visibility,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    shared: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    lazy: bool,
    #[serde(default, rename = "abstract", skip_serializing_if = "is_false")]
    is_abstract: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extends: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    decorates: Option<Decoration>,
    #[serde(skip)]
    resolved: bool,
}

impl Definition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            factory: None,
            arguments: Vec::new(),
            method_calls: Vec::new(),
            tags: BTreeMap::new(),
            visibility: Visibility::Public,
            shared: true,
            lazy: false,
            is_abstract: false,
            extends: None,
            decorates: None,
            resolved: false,
        }
    }

    /// Копия определения под другим идентификатором
    pub fn renamed(&self, id: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.id = id.into();
        copy.resolved = false;
        copy
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn factory(&self) -> Option<&Factory> {
        self.factory.as_ref()
    }

    pub fn set_factory(&mut self, factory: Factory) {
        self.factory = Some(factory);
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn arguments_mut(&mut self) -> &mut Vec<Value> {
        &mut self.arguments
    }

    pub fn set_arguments(&mut self, arguments: Vec<Value>) {
        self.arguments = arguments;
    }

    /// Заменить аргумент по `index`, `index == len` добавляет в конец
    pub fn replace_argument(&mut self, index: usize, value: Value) -> ContainerResult<()> {
        match index.cmp(&self.arguments.len()) {
            std::cmp::Ordering::Less => {
                self.arguments[index] = value;
                Ok(())
            }
            std::cmp::Ordering::Equal => {
                self.arguments.push(value);
                Ok(())
            }
            std::cmp::Ordering::Greater => Err(ContainerError::invalid_argument(format!(
                "argument index {} is out of bounds for '{}' ({} argument(s))",
                index,
                self.id,
                self.arguments.len()
            ))),
        }
    }

    pub fn method_calls(&self) -> &[MethodCall] {
        &self.method_calls
    }

    pub fn method_calls_mut(&mut self) -> &mut Vec<MethodCall> {
        &mut self.method_calls
    }

    pub fn add_method_call(&mut self, method: impl Into<String>, arguments: Vec<Value>) {
        self.method_calls.push(MethodCall::new(method, arguments));
    }

    pub fn tags(&self) -> &BTreeMap<String, Vec<TagAttributes>> {
        &self.tags
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    pub fn add_tag(&mut self, name: impl Into<String>, attributes: TagAttributes) {
        self.tags.entry(name.into()).or_default().push(attributes);
    }

    pub fn clear_tag(&mut self, name: &str) {
        self.tags.remove(name);
    }

    pub(crate) fn tags_mut(&mut self) -> &mut BTreeMap<String, Vec<TagAttributes>> {
        &mut self.tags
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility = visibility;
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn set_shared(&mut self, shared: bool) {
        self.shared = shared;
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn set_lazy(&mut self, lazy: bool) {
        self.lazy = lazy;
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn set_abstract(&mut self, is_abstract: bool) {
        self.is_abstract = is_abstract;
    }

    pub fn extends(&self) -> Option<&str> {
        self.extends.as_deref()
    }

    pub fn set_extends(&mut self, parent: Option<String>) {
        self.extends = parent;
    }

    pub fn decorates(&self) -> Option<&Decoration> {
        self.decorates.as_ref()
    }

    pub fn set_decorates(&mut self, decoration: Option<Decoration>) {
        self.decorates = decoration;
    }

    /// Выставляется после успешного compile
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub(crate) fn mark_resolved(&mut self) {
        self.resolved = true;
    }

    /// Значение фабрики, аргументы конструктора, затем аргументы method calls
    pub fn all_values(&self) -> impl Iterator<Item = &Value> {
        let factory_value = match &self.factory {
            Some(Factory::Value { value }) => Some(value),
            _ => None,
        };
        factory_value
            .into_iter()
            .chain(self.arguments.iter())
            .chain(self.method_calls.iter().flat_map(|c| c.arguments.iter()))
    }

    pub fn walk_values<F: FnMut(&Value)>(&self, f: &mut F) {
        for value in self.all_values() {
            value.walk(f);
        }
    }

    /// Изменяемый вариант [`Definition::all_values`]
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        let factory_value = match &mut self.factory {
            Some(Factory::Value { value }) => Some(value),
            _ => None,
        };
        factory_value
            .into_iter()
            .chain(self.arguments.iter_mut())
            .chain(
                self.method_calls
                    .iter_mut()
                    .flat_map(|c| c.arguments.iter_mut()),
            )
    }

    pub fn walk_values_mut<F: FnMut(&mut Value)>(&mut self, f: &mut F) {
        for value in self.values_mut() {
            value.walk_mut(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let def = Definition::new("mailer");
        assert!(def.is_shared());
        assert!(def.is_public());
        assert!(!def.is_lazy());
        assert!(def.factory().is_none());
        assert!(!def.is_resolved());
    }

    #[test]
    fn test_factory_parse() {
        assert_eq!(
            Factory::parse("Mailer").unwrap(),
            Factory::Class {
                class: "Mailer".into()
            }
        );
        assert_eq!(
            Factory::parse("MailerFactory::create").unwrap(),
            Factory::static_call("MailerFactory", "create")
        );
        assert!(Factory::parse("::create").is_err());
        assert!(Factory::parse("").is_err());
    }

    #[test]
    fn test_replace_argument_bounds() {
        let mut def = Definition::new("a");
        def.replace_argument(0, Value::Int(1)).unwrap();
        def.replace_argument(0, Value::Int(2)).unwrap();
        assert_eq!(def.arguments(), &[Value::Int(2)]);
        assert!(def.replace_argument(5, Value::Null).is_err());
    }

    #[test]
    fn test_renamed_keeps_content() {
        let mut def = Definition::new("a");
        def.add_method_call("setLogger", vec![Value::reference("logger")]);
        let inner = def.renamed("a.inner");
        assert_eq!(inner.id(), "a.inner");
        assert_eq!(inner.method_calls().len(), 1);
    }

    #[test]
    fn test_serialization_skips_defaults() {
        let json = serde_json::to_string(&Definition::new("x")).unwrap();
        assert_eq!(json, r#"{"id":"x","visibility":"public"}"#);

        let parsed: Definition = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_shared());
    }
}
