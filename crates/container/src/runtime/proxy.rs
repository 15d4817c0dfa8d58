use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::service::{Arguments, RuntimeValue, Service, ServiceRef};
use super::WeakContainer;
use crate::errors::{ContainerError, ContainerResult};

/// Заместитель сервиса, создание которого отложено до первого использования.
///
/// Реальный экземпляр строится один раз, дальше все вызовы идут к нему.
/// Неудачное создание повторяется при следующем обращении, если граф не
/// собран с `proxy.retry_failed_init = false`. Тогда первая ошибка
/// запоминается и возвращается как `ProxyPoisoned`.
pub struct LazyProxy {
    container: WeakContainer,
    id: String,
    instance: OnceCell<ServiceRef>,
    retry_failed_init: bool,
    failure: Mutex<Option<String>>,
}

impl LazyProxy {
    pub(crate) fn new(container: WeakContainer, id: impl Into<String>, retry_failed_init: bool) -> Self {
        Self {
            container,
            id: id.into(),
            instance: OnceCell::new(),
            retry_failed_init,
            failure: Mutex::new(None),
        }
    }

    /// Идентификатор сервиса за proxy
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_initialized(&self) -> bool {
        self.instance.get().is_some()
    }

    /// Реальный сервис, создаётся при первом вызове
    pub fn instance(&self) -> ContainerResult<ServiceRef> {
        if let Some(instance) = self.instance.get() {
            return Ok(instance.clone());
        }

        if !self.retry_failed_init {
            if let Some(message) = self.failure.lock().clone() {
                return Err(ContainerError::ProxyPoisoned {
                    id: self.id.clone(),
                    message,
                });
            }
        }

        match self.instance.get_or_try_init(|| self.build_real()) {
            Ok(instance) => {
                debug!(service = %self.id, "Lazy proxy initialized");
                Ok(instance.clone())
            }
            Err(e) => {
                warn!(service = %self.id, error = %e, "Lazy proxy initialization failed");
                if !self.retry_failed_init {
                    *self.failure.lock() = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    fn build_real(&self) -> ContainerResult<ServiceRef> {
        let container = self.container.upgrade()?;
        let value = container.build_target(&self.id)?;
        let kind = value.kind();
        value.into_service().ok_or_else(|| {
            ContainerError::invalid_argument(format!(
                "lazy service '{}' must build a service object, got {}",
                self.id, kind
            ))
        })
    }
}

impl Service for LazyProxy {
    fn invoke(&self, method: &str, args: Arguments) -> anyhow::Result<RuntimeValue> {
        let real = self.instance()?;
        real.invoke(method, args)
    }

    fn as_proxy(&self) -> Option<&LazyProxy> {
        Some(self)
    }
}

impl std::fmt::Debug for LazyProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyProxy")
            .field("id", &self.id)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
