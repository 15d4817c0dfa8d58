//! Структурные аргументы с отложенным разрешением

use serde::{Deserialize, Serialize};

use crate::errors::{ContainerError, ContainerResult};
use crate::reference::Reference;
use crate::value::Value;

/// Упорядоченный набор литералов и ссылок, сразу разрешается в список
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArrayArgument {
    values: Vec<Value>,
}

impl ArrayArgument {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Vec<Value> {
        &mut self.values
    }
}

/// Как [`ArrayArgument`], но потребитель получает перезапускаемую lazy
/// последовательность, элементы разрешаются только при обходе.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IteratorArgument {
    values: Vec<Value>,
}

impl IteratorArgument {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Vec<Value> {
        &mut self.values
    }
}

/// Ровно одна ссылка, разрешается при вызове closure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureArgument {
    reference: Reference,
}

impl ClosureArgument {
    pub fn new(reference: Reference) -> Self {
        Self { reference }
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn reference_mut(&mut self) -> &mut Reference {
        &mut self.reference
    }
}

/// Пара `(name, default)`, ищется среди параметров при разрешении
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawParameterArgument")]
pub struct ParameterArgument {
    name: String,
    default: Box<Value>,
}

#[derive(Deserialize)]
struct RawParameterArgument {
    name: String,
    default: Box<Value>,
}

impl TryFrom<RawParameterArgument> for ParameterArgument {
    type Error = ContainerError;

    fn try_from(raw: RawParameterArgument) -> ContainerResult<Self> {
        Self::new(raw.name, *raw.default)
    }
}

impl ParameterArgument {
    pub fn new(name: impl Into<String>, default: Value) -> ContainerResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ContainerError::invalid_argument(
                "parameter argument requires a non-empty name",
            ));
        }

        Ok(Self {
            name,
            default: Box::new(default),
        })
    }

    /// Построить из пары `[name, default]`
    pub fn from_tuple(values: Vec<Value>) -> ContainerResult<Self> {
        let arity = values.len();
        let mut iter = values.into_iter();
        match (iter.next(), iter.next(), iter.next()) {
            (Some(Value::String(name)), Some(default), None) => Self::new(name, default),
            (Some(other), Some(_), None) => Err(ContainerError::invalid_argument(format!(
                "parameter argument name must be a string, got {}",
                other.kind()
            ))),
            _ => Err(ContainerError::invalid_argument(format!(
                "parameter argument expects [name, default], got {} element(s)",
                arity
            ))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub(crate) fn default_mut(&mut self) -> &mut Value {
        &mut self.default
    }

    /// Неразрешённая пара `(name, default)`
    pub fn get_value(&self) -> (&str, &Value) {
        (&self.name, &self.default)
    }
}

/// Набор кандидатов, именованный предикат выбирает ровно один при разрешении
///
/// Предикат ищется по имени в runtime `FactoryRegistry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawConditionArgument")]
pub struct ConditionArgument {
    values: Vec<Value>,
    predicate: String,
}

#[derive(Deserialize)]
struct RawConditionArgument {
    values: Vec<Value>,
    predicate: String,
}

impl TryFrom<RawConditionArgument> for ConditionArgument {
    type Error = ContainerError;

    fn try_from(raw: RawConditionArgument) -> ContainerResult<Self> {
        Self::new(raw.values, raw.predicate)
    }
}

impl ConditionArgument {
    pub fn new(values: Vec<Value>, predicate: impl Into<String>) -> ContainerResult<Self> {
        if let Some(bad) = values
            .iter()
            .find(|v| !matches!(v, Value::String(_) | Value::Reference(_)))
        {
            return Err(ContainerError::invalid_argument(format!(
                "condition values must be strings or references, got {}",
                bad.kind()
            )));
        }

        let predicate = predicate.into();
        if predicate.is_empty() {
            return Err(ContainerError::invalid_argument(
                "condition argument requires a predicate name",
            ));
        }

        Ok(Self { values, predicate })
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut Vec<Value> {
        &mut self.values
    }

    pub fn predicate(&self) -> &str {
        &self.predicate
    }
}
