use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::argument::{
    ArrayArgument, ClosureArgument, ConditionArgument, IteratorArgument, ParameterArgument,
};
use crate::definition::Definition;
use crate::reference::Reference;

/// Один аргумент определения: литерал, ссылка или структурный аргумент
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Map(BTreeMap<String, Value>),
    Reference(Reference),
    Array(ArrayArgument),
    Iterator(IteratorArgument),
    Closure(ClosureArgument),
    Parameter(ParameterArgument),
    Condition(ConditionArgument),
    /// Заменяется iterator'ом по всем определениям с тегом
    Tagged(String),
    /// Private определение, встроенное в единственного потребителя
    Inline(Box<Definition>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Map(_) => "map",
            Value::Reference(_) => "reference",
            Value::Array(_) => "array",
            Value::Iterator(_) => "iterator",
            Value::Closure(_) => "closure",
            Value::Parameter(_) => "parameter",
            Value::Condition(_) => "condition",
            Value::Tagged(_) => "tagged",
            Value::Inline(_) => "inline",
        }
    }

    pub fn reference(id: impl Into<String>) -> Self {
        Value::Reference(Reference::new(id))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(ArrayArgument::new(values))
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Строковое представление скаляра для подстановки в строку
    pub(crate) fn scalar_string(&self) -> Option<String> {
        match self {
            Value::Null => Some(String::new()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Обойти значение и все вложенные, в глубину
    pub fn walk<F: FnMut(&Value)>(&self, f: &mut F) {
        f(self);
        match self {
            Value::Map(map) => map.values().for_each(|v| v.walk(f)),
            Value::Array(a) => a.values().iter().for_each(|v| v.walk(f)),
            Value::Iterator(a) => a.values().iter().for_each(|v| v.walk(f)),
            Value::Parameter(p) => p.default_value().walk(f),
            Value::Condition(c) => c.values().iter().for_each(|v| v.walk(f)),
            Value::Inline(def) => def.walk_values(f),
            _ => {}
        }
    }

    /// Изменяемый вариант [`Value::walk`], callback вызывается до обхода детей
    pub fn walk_mut<F: FnMut(&mut Value)>(&mut self, f: &mut F) {
        f(self);
        match self {
            Value::Map(map) => map.values_mut().for_each(|v| v.walk_mut(f)),
            Value::Array(a) => a.values_mut().iter_mut().for_each(|v| v.walk_mut(f)),
            Value::Iterator(a) => a.values_mut().iter_mut().for_each(|v| v.walk_mut(f)),
            Value::Parameter(p) => p.default_mut().walk_mut(f),
            Value::Condition(c) => c.values_mut().iter_mut().for_each(|v| v.walk_mut(f)),
            Value::Inline(def) => def.walk_values_mut(f),
            _ => {}
        }
    }

    /// Все ссылки внутри значения, включая цели closures
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        collect_references(self, &mut out);
        out
    }
}

fn collect_references<'a>(value: &'a Value, out: &mut Vec<&'a Reference>) {
    match value {
        Value::Reference(r) => out.push(r),
        Value::Closure(c) => out.push(c.reference()),
        Value::Map(map) => map.values().for_each(|v| collect_references(v, out)),
        Value::Array(a) => a.values().iter().for_each(|v| collect_references(v, out)),
        Value::Iterator(a) => a.values().iter().for_each(|v| collect_references(v, out)),
        Value::Parameter(p) => collect_references(p.default_value(), out),
        Value::Condition(c) => c.values().iter().for_each(|v| collect_references(v, out)),
        Value::Inline(def) => {
            for v in def.all_values() {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Value::Reference(r)
    }
}

impl From<ArrayArgument> for Value {
    fn from(a: ArrayArgument) -> Self {
        Value::Array(a)
    }
}

impl From<IteratorArgument> for Value {
    fn from(a: IteratorArgument) -> Self {
        Value::Iterator(a)
    }
}

impl From<ClosureArgument> for Value {
    fn from(a: ClosureArgument) -> Self {
        Value::Closure(a)
    }
}

impl From<ParameterArgument> for Value {
    fn from(a: ParameterArgument) -> Self {
        Value::Parameter(a)
    }
}

impl From<ConditionArgument> for Value {
    fn from(a: ConditionArgument) -> Self {
        Value::Condition(a)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_include_nested_and_closures() {
        let value = Value::array(vec![
            Value::reference("a"),
            Value::Closure(ClosureArgument::new(Reference::new("b"))),
            Value::Iterator(IteratorArgument::new(vec![Value::reference("c")])),
            Value::from("literal"),
        ]);

        let ids: Vec<&str> = value.references().iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_walk_mut_rewrites_strings() {
        let mut value = Value::array(vec![Value::from("x"), Value::Int(1)]);
        value.walk_mut(&mut |v| {
            if let Value::String(s) = v {
                s.push('!');
            }
        });
        assert_eq!(value, Value::array(vec![Value::from("x!"), Value::Int(1)]));
    }
}
