//! Shared per-model call budget.
//!
//! Several debate sessions may run at once against the same upstream model.
//! The budget caps how many calls per model are in flight across all of
//! them. A permit is held for exactly the duration of one provider call and
//! is released when the guard drops, whichever way the call ends.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ProviderError, ProviderErrorKind};

/// Per-model concurrency budget shared across sessions.
pub struct RateLimitBudget {
    permits_per_model: usize,
    semaphores: RwLock<HashMap<String, Arc<Semaphore>>>,
}

/// RAII guard for one in-flight call.
#[derive(Debug)]
pub struct BudgetPermit {
    model_key: String,
    _permit: OwnedSemaphorePermit,
}

impl BudgetPermit {
    pub fn model_key(&self) -> &str {
        &self.model_key
    }
}

impl RateLimitBudget {
    /// Creates a budget allowing `permits_per_model` concurrent calls per model.
    pub fn new(permits_per_model: usize) -> Self {
        Self {
            permits_per_model: permits_per_model.max(1),
            semaphores: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a budget wrapped for sharing between sessions.
    pub fn shared(permits_per_model: usize) -> Arc<Self> {
        Arc::new(Self::new(permits_per_model))
    }

    pub fn permits_per_model(&self) -> usize {
        self.permits_per_model
    }

    /// Waits for a permit for `model_key`.
    pub async fn acquire(&self, model_key: &str) -> Result<BudgetPermit, ProviderError> {
        let semaphore = self.semaphore_for(model_key);
        let permit = semaphore.acquire_owned().await.map_err(|_| {
            ProviderError::new(
                ProviderErrorKind::RateLimited,
                format!("call budget for '{}' is closed", model_key),
            )
        })?;

        Ok(BudgetPermit {
            model_key: model_key.to_string(),
            _permit: permit,
        })
    }

    /// Permits currently free for `model_key`. Unused models report the full budget.
    pub fn available(&self, model_key: &str) -> usize {
        let semaphores = self
            .semaphores
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        semaphores
            .get(model_key)
            .map(|s| s.available_permits())
            .unwrap_or(self.permits_per_model)
    }

    fn semaphore_for(&self, model_key: &str) -> Arc<Semaphore> {
        {
            let semaphores = self
                .semaphores
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(existing) = semaphores.get(model_key) {
                return Arc::clone(existing);
            }
        }

        let mut semaphores = self
            .semaphores
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            semaphores
                .entry(model_key.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.permits_per_model))),
        )
    }
}
