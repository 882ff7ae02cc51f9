//! Process-wide cache of the fill weights.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use candle_core::Device;

use super::{load_safetensors, FillWeights};
use crate::config::bundled_weights_path;

static GLOBAL_CACHE: OnceLock<Arc<FillWeightCache>> = OnceLock::new();

/// Loads the fill weights on first access and hands out the same `Arc` after.
///
/// The slot is refilled only while it is empty, so a failed or empty load is
/// retried by the next caller. Loaded weights are never invalidated.
pub struct FillWeightCache {
    /// Safetensors file the weights come from
    path: PathBuf,
    /// Loaded weights, if any
    weights: Mutex<Option<Arc<FillWeights>>>,
}

impl FillWeightCache {
    /// Create an empty cache backed by `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            weights: Mutex::new(None),
        }
    }

    /// Create a cache that already holds `weights`
    pub fn with_weights(weights: FillWeights) -> Self {
        Self {
            path: PathBuf::new(),
            weights: Mutex::new(Some(Arc::new(weights))),
        }
    }

    /// The process-wide cache, bound to the bundled fill weights
    pub fn global() -> Arc<FillWeightCache> {
        GLOBAL_CACHE
            .get_or_init(|| Arc::new(FillWeightCache::new(bundled_weights_path())))
            .clone()
    }

    /// Get the fill weights, loading them from disk if not yet loaded
    pub fn get_or_load(&self) -> crate::Result<Arc<FillWeights>> {
        let mut slot = self.weights.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(weights) = slot.as_ref() {
            if !weights.is_empty() {
                return Ok(weights.clone());
            }
        }

        let weights = Arc::new(load_safetensors(&self.path, &Device::Cpu)?);
        tracing::debug!("Loaded {} fill tensors from {:?}", weights.len(), self.path);

        *slot = Some(weights.clone());
        Ok(weights)
    }

    /// Whether non-empty weights are cached
    pub fn is_loaded(&self) -> bool {
        self.weights
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|w| !w.is_empty())
    }

    /// Source file of the weights
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FillWeightCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FillWeightCache")
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Tensor;
    use std::collections::HashMap;

    fn write_fill_file(path: &Path, value: f32) {
        let mut tensors = HashMap::new();
        tensors.insert(
            "img_in.weight".to_string(),
            Tensor::new(&[value, value], &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&tensors, path).unwrap();
    }

    #[test]
    fn test_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fill_state.safetensors");
        write_fill_file(&path, 1.0);

        let cache = FillWeightCache::new(&path);
        assert!(!cache.is_loaded());

        let first = cache.get_or_load().unwrap();
        assert!(cache.is_loaded());

        // Later reads are served from memory even if the file changes or disappears
        std::fs::remove_file(&path).unwrap();
        let second = cache.get_or_load().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_missing_file_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fill_state.safetensors");

        let cache = FillWeightCache::new(&path);
        assert!(cache.get_or_load().is_err());
        assert!(!cache.is_loaded());

        write_fill_file(&path, 2.0);
        let weights = cache.get_or_load().unwrap();
        assert_eq!(
            weights["img_in.weight"].to_vec1::<f32>().unwrap(),
            vec![2.0, 2.0]
        );
    }

    #[test]
    fn test_preloaded() {
        let mut weights = HashMap::new();
        weights.insert(
            "txt_in.weight".to_string(),
            Tensor::new(&[0.5f32], &Device::Cpu).unwrap(),
        );

        let cache = FillWeightCache::with_weights(weights);
        assert!(cache.is_loaded());
        assert_eq!(cache.get_or_load().unwrap().len(), 1);
    }

    #[test]
    fn test_global_is_shared() {
        let a = FillWeightCache::global();
        let b = FillWeightCache::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.path().ends_with(crate::config::FILL_WEIGHTS_FILE));
    }
}
