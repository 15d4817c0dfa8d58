//! Жизненный цикл shared экземпляров
//!
//! Каждый shared идентификатор получает собственную ячейку `OnceCell`: при
//! одновременных запросах из разных потоков конструктор выполняется не более
//! одного раза, остальные потоки ждут результат. Ошибка конструктора ячейку
//! не заполняет, следующий запрос пробует снова.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::service::RuntimeValue;
use crate::errors::{ContainerError, ContainerResult};

#[derive(Default)]
pub(crate) struct SharedInstances {
    cells: Mutex<HashMap<String, Arc<OnceCell<RuntimeValue>>>>,
}

impl SharedInstances {
    fn cell(&self, id: &str) -> Arc<OnceCell<RuntimeValue>> {
        // Блокировка держится только на время поиска ячейки, не на время конструирования
        let mut cells = self.cells.lock();
        cells
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<RuntimeValue> {
        self.cells.lock().get(id).and_then(|cell| cell.get().cloned())
    }

    pub fn is_initialized(&self, id: &str) -> bool {
        self.cells
            .lock()
            .get(id)
            .map(|cell| cell.get().is_some())
            .unwrap_or(false)
    }

    pub fn get_or_try_init<F>(&self, id: &str, init: F) -> ContainerResult<RuntimeValue>
    where
        F: FnOnce() -> ContainerResult<RuntimeValue>,
    {
        let cell = self.cell(id);
        let value = cell.get_or_try_init(|| {
            debug!("🔧 Создание shared экземпляра: {}", id);
            init()
        })?;
        Ok(value.clone())
    }

    pub fn initialized_count(&self) -> usize {
        self.cells
            .lock()
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }
}

thread_local! {
    /// Стек разрешения текущего потока: (контейнер, идентификатор)
    static RESOLVING: RefCell<Vec<(usize, String)>> = const { RefCell::new(Vec::new()) };
}

/// Отметка "идентификатор сейчас конструируется в этом потоке"
///
/// Повторный вход в тот же идентификатор того же контейнера означает цикл,
/// который пропустила компиляция (например, через пользовательскую фабрику).
/// Вместо deadlock'а на `OnceCell` возвращается `CircularDependency`.
pub(crate) struct ResolutionGuard {
    _private: (),
}

impl ResolutionGuard {
    pub fn enter(owner: usize, id: &str) -> ContainerResult<Self> {
        RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().position(|(o, s)| *o == owner && s == id) {
                let path: Vec<String> = stack[pos..]
                    .iter()
                    .filter(|(o, _)| *o == owner)
                    .map(|(_, s)| s.clone())
                    .collect();
                return Err(ContainerError::circular(path));
            }
            stack.push((owner, id.to_string()));
            Ok(ResolutionGuard { _private: () })
        })
    }
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        RESOLVING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_failed_init_is_retried() {
        let shared = SharedInstances::default();
        let attempts = AtomicUsize::new(0);

        let first = shared.get_or_try_init("svc", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ContainerError::invalid_argument("boom"))
        });
        assert!(first.is_err());
        assert!(!shared.is_initialized("svc"));

        let second = shared.get_or_try_init("svc", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(RuntimeValue::Int(1))
        });
        assert_eq!(second.ok().and_then(|v| v.as_int()), Some(1));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(shared.initialized_count(), 1);
    }

    #[test]
    fn test_reentry_is_circular() {
        let _outer = ResolutionGuard::enter(1, "a").unwrap();
        let _inner = ResolutionGuard::enter(1, "b").unwrap();
        // другой контейнер, тот же id: не цикл
        let other = ResolutionGuard::enter(2, "a");
        assert!(other.is_ok());
        drop(other);

        let err = ResolutionGuard::enter(1, "a").err().unwrap();
        assert_eq!(err.cycle_path(), Some(&["a".to_string(), "b".to_string()][..]));
    }
}
