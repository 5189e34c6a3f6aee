//! Tokio runtime management for synchronous operations

use crate::{BackendError, Result};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Runtime;

/// Blocking runtime owned by one backend client
///
/// Filled by an explicit, idempotent [`register`](RuntimeSlot::register)
/// call; clones of a client share the slot.
#[derive(Debug, Default)]
pub(crate) struct RuntimeSlot {
    runtime: OnceLock<Arc<Runtime>>,
}

impl RuntimeSlot {
    /// Build the runtime on first call, return the existing one afterwards
    pub fn register(&self) -> Result<Arc<Runtime>> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime.clone());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("keystream-cloud-worker")
            .build()
            .map_err(|e| BackendError::Runtime(format!("Failed to create Tokio runtime: {}", e)))?;

        // A concurrent registration may have won; either runtime is fine.
        let _ = self.runtime.set(Arc::new(runtime));
        self.get()
    }

    pub fn is_registered(&self) -> bool {
        self.runtime.get().is_some()
    }

    /// The registered runtime
    pub fn get(&self) -> Result<Arc<Runtime>> {
        self.runtime.get().cloned().ok_or_else(|| {
            BackendError::Runtime("backend client is not registered".to_string())
        })
    }
}
