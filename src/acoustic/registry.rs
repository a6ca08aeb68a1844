use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::ScoringError;
use crate::pipeline::traits::AcousticBackend;

/// Loaded acoustic backends keyed by runtime, device and weights path.
///
/// Each key is loaded at most once; afterwards the backend is shared
/// read-only between extractors and threads.
#[derive(Default)]
pub struct ModelRegistry {
    backends: Mutex<HashMap<String, Arc<dyn AcousticBackend>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached backend for `key`, running `load` on first use.
    ///
    /// The lock is held while loading so concurrent callers never load the
    /// same weights twice. A failed load caches nothing.
    pub fn get_or_load<F>(&self, key: &str, load: F) -> Result<Arc<dyn AcousticBackend>, ScoringError>
    where
        F: FnOnce() -> Result<Arc<dyn AcousticBackend>, ScoringError>,
    {
        let mut backends = self
            .backends
            .lock()
            .map_err(|_| ScoringError::runtime("model registry", "registry mutex poisoned"))?;
        if let Some(backend) = backends.get(key) {
            tracing::debug!(key, "acoustic model cache hit");
            return Ok(Arc::clone(backend));
        }
        let backend = load()?;
        tracing::info!(key, device = %backend.device_label(), "acoustic model registered");
        backends.insert(key.to_string(), Arc::clone(&backend));
        Ok(backend)
    }

    pub fn len(&self) -> usize {
        self.backends.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("loaded", &self.len())
            .finish()
    }
}
