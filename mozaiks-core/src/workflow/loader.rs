//! Bundle resolution and caching.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use super::bundle::WorkflowBundle;
use super::BundleError;

/// Bundle file name inside each workflow directory.
const BUNDLE_FILE: &str = "workflow.json";

struct CachedBundle {
    bundle: Arc<WorkflowBundle>,
    mtime: SystemTime,
}

/// Resolves workflow bundles by convention under a workflows root and
/// caches them per `(app_id, workflow_name)`.
///
/// The cache is copy-on-write: loads hand out `Arc` snapshots, and a
/// reload replaces the slot atomically under the invalidation lock.
pub struct BundleLoader {
    workflows_root: PathBuf,
    cache: RwLock<HashMap<(String, String), CachedBundle>>,
}

impl BundleLoader {
    pub fn new(workflows_root: impl Into<PathBuf>) -> Self {
        Self {
            workflows_root: workflows_root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Load a bundle, reusing the cached copy while its mtime is
    /// unchanged.
    pub fn load(
        &self,
        app_id: &str,
        workflow_name: &str,
    ) -> Result<Arc<WorkflowBundle>, BundleError> {
        let path = self.bundle_path(workflow_name)?;
        let mtime = file_mtime(&path)?;

        let key = (app_id.to_string(), workflow_name.to_string());
        if let Some(cached) = self.cache.read().get(&key) {
            if cached.mtime == mtime {
                return Ok(cached.bundle.clone());
            }
        }

        let bundle = Arc::new(self.parse(&path, workflow_name)?);
        self.cache.write().insert(
            key,
            CachedBundle {
                bundle: bundle.clone(),
                mtime,
            },
        );
        Ok(bundle)
    }

    pub fn invalidate(&self, app_id: &str, workflow_name: &str) {
        self.cache
            .write()
            .remove(&(app_id.to_string(), workflow_name.to_string()));
    }

    /// Workflow directories containing a bundle file.
    pub fn available(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.workflows_root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().join(BUNDLE_FILE).is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }

    pub fn exists(&self, workflow_name: &str) -> bool {
        self.bundle_path(workflow_name)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    fn bundle_path(&self, workflow_name: &str) -> Result<PathBuf, BundleError> {
        if workflow_name.is_empty()
            || workflow_name.contains('/')
            || workflow_name.contains('\\')
            || workflow_name.contains("..")
        {
            return Err(BundleError::NotFound(workflow_name.to_string()));
        }
        Ok(self.workflows_root.join(workflow_name).join(BUNDLE_FILE))
    }

    fn parse(&self, path: &Path, workflow_name: &str) -> Result<WorkflowBundle, BundleError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|_| BundleError::NotFound(workflow_name.to_string()))?;
        let bundle: WorkflowBundle = serde_json::from_str(&raw)
            .map_err(|e| BundleError::Invalid(format!("{}: {}", workflow_name, e)))?;
        bundle.validate()?;
        Ok(bundle)
    }
}

fn file_mtime(path: &Path) -> Result<SystemTime, BundleError> {
    let metadata = std::fs::metadata(path)
        .map_err(|_| BundleError::NotFound(path.display().to_string()))?;
    metadata
        .modified()
        .map_err(|e| BundleError::Invalid(e.to_string()))
}
