//! Символьные ссылки между определениями

use serde::{Deserialize, Serialize};

/// Что делать, если цели ссылки нет после оптимизации графа
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidBehavior {
    /// Compile падает с `UnsupportedReferencePolicy`
    #[default]
    ThrowOnMissing,
    /// Ссылка заменяется на null
    NullOnMissing,
    /// В method call вызов удаляется целиком, в остальных местах как null
    IgnoreOnMissing,
}

/// Указатель на другое определение по идентификатору.
///
/// Ссылка никогда не хранит экземпляр. До заморозки графа проходы могут
/// перенаправить её (aliases) или пометить lazy (разрыв циклов).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    id: String,
    #[serde(default, skip_serializing_if = "is_default_behavior")]
    behavior: InvalidBehavior,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    lazy: bool,
}

fn is_default_behavior(behavior: &InvalidBehavior) -> bool {
    *behavior == InvalidBehavior::ThrowOnMissing
}

impl Reference {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_behavior(id, InvalidBehavior::ThrowOnMissing)
    }

    pub fn with_behavior(id: impl Into<String>, behavior: InvalidBehavior) -> Self {
        Self {
            id: id.into(),
            behavior,
            lazy: false,
        }
    }

    pub fn null_on_missing(id: impl Into<String>) -> Self {
        Self::with_behavior(id, InvalidBehavior::NullOnMissing)
    }

    pub fn ignore_on_missing(id: impl Into<String>) -> Self {
        Self::with_behavior(id, InvalidBehavior::IgnoreOnMissing)
    }

    /// Ссылка, разрешаемая через lazy proxy в runtime
    pub fn lazy(id: impl Into<String>) -> Self {
        let mut reference = Self::new(id);
        reference.lazy = true;
        reference
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn behavior(&self) -> InvalidBehavior {
        self.behavior
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub(crate) fn retarget(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub(crate) fn set_lazy(&mut self, lazy: bool) {
        self.lazy = lazy;
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.behavior {
            InvalidBehavior::ThrowOnMissing => "@",
            InvalidBehavior::NullOnMissing => "@?",
            InvalidBehavior::IgnoreOnMissing => "@!",
        };
        write!(f, "{}{}", prefix, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_behavior_is_throw() {
        let reference = Reference::new("mailer");
        assert_eq!(reference.behavior(), InvalidBehavior::ThrowOnMissing);
        assert!(!reference.is_lazy());
        assert_eq!(reference.to_string(), "@mailer");
    }

    #[test]
    fn test_compact_serialization() {
        let json = serde_json::to_string(&Reference::new("a")).unwrap();
        assert_eq!(json, r#"{"id":"a"}"#);

        let json = serde_json::to_string(&Reference::null_on_missing("a")).unwrap();
        assert_eq!(json, r#"{"id":"a","behavior":"null_on_missing"}"#);

        let parsed: Reference = serde_json::from_str(r#"{"id":"b","lazy":true}"#).unwrap();
        assert!(parsed.is_lazy());
        assert_eq!(parsed.id(), "b");
    }
}
