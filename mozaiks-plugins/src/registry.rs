//! Plugin discovery and the name index.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::descriptor::PluginDescriptor;
use crate::{Executable, PluginError};

/// A discovered plugin: descriptor plus its resolved entry operation.
#[derive(Clone)]
pub struct LoadedPlugin {
    pub descriptor: PluginDescriptor,
    pub executable: Arc<dyn Executable>,
}

/// Row returned by `GET /api/plugins`.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub enabled: bool,
}

/// Indexes plugin units by name.
///
/// Entry operations are registered in code at startup; discovery walks
/// the plugins root for descriptors and binds each to its registered
/// executable. The index is immutable between reloads.
pub struct PluginRegistry {
    plugins_root: PathBuf,
    executables: RwLock<HashMap<String, Arc<dyn Executable>>>,
    index: RwLock<HashMap<String, LoadedPlugin>>,
}

impl PluginRegistry {
    pub fn new(plugins_root: impl Into<PathBuf>) -> Self {
        Self {
            plugins_root: plugins_root.into(),
            executables: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Register an entry operation under its entry-point name.
    pub fn register_executable(&self, name: impl Into<String>, executable: Arc<dyn Executable>) {
        self.executables.write().insert(name.into(), executable);
    }

    /// Enumerate descriptor directories and rebuild the index.
    ///
    /// A descriptor whose entry point has no registered executable is a
    /// discovery error; duplicate plugin names are too.
    pub fn discover(&self) -> Result<usize, PluginError> {
        let entries = std::fs::read_dir(&self.plugins_root)
            .map_err(|e| PluginError::Discovery(format!("{}: {}", self.plugins_root.display(), e)))?;

        let executables = self.executables.read();
        let mut index = HashMap::new();

        for entry in entries.filter_map(|e| e.ok()) {
            let descriptor_path = entry.path().join("plugin.json");
            if !descriptor_path.is_file() {
                continue;
            }

            let raw = std::fs::read_to_string(&descriptor_path)
                .map_err(|e| PluginError::Discovery(e.to_string()))?;
            let descriptor: PluginDescriptor = serde_json::from_str(&raw).map_err(|e| {
                PluginError::Discovery(format!("{}: {}", descriptor_path.display(), e))
            })?;

            let executable = executables.get(&descriptor.entry_point).ok_or_else(|| {
                PluginError::Discovery(format!(
                    "plugin '{}' references unregistered entry point '{}'",
                    descriptor.name, descriptor.entry_point
                ))
            })?;

            if index
                .insert(
                    descriptor.name.clone(),
                    LoadedPlugin {
                        descriptor,
                        executable: executable.clone(),
                    },
                )
                .is_some()
            {
                return Err(PluginError::Discovery(
                    "duplicate plugin name in plugins root".to_string(),
                ));
            }
        }

        let count = index.len();
        *self.index.write() = index;
        tracing::info!(count, root = %self.plugins_root.display(), "plugins discovered");
        Ok(count)
    }

    /// Rebuild the index (explicit reload).
    pub fn reload(&self) -> Result<usize, PluginError> {
        self.discover()
    }

    pub fn get(&self, name: &str) -> Option<LoadedPlugin> {
        self.index.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        let mut plugins: Vec<PluginInfo> = self
            .index
            .read()
            .values()
            .map(|p| PluginInfo {
                name: p.descriptor.name.clone(),
                display_name: p.descriptor.display_name().to_string(),
                version: p.descriptor.version.clone(),
                enabled: p.descriptor.enabled,
            })
            .collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        plugins
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PluginContext;
    use futures::future::BoxFuture;
    use serde_json::Value;

    struct Echo;

    impl Executable for Echo {
        fn execute(
            &self,
            request: Value,
            _context: PluginContext,
        ) -> BoxFuture<'static, Result<Value, String>> {
            Box::pin(async move { Ok(request) })
        }
    }

    fn write_descriptor(root: &std::path::Path, dir: &str, body: &Value) {
        let plugin_dir = root.join(dir);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("plugin.json"), body.to_string()).unwrap();
    }

    #[test]
    fn test_discovery_builds_index() {
        let root = tempfile::tempdir().unwrap();
        write_descriptor(
            root.path(),
            "notes",
            &serde_json::json!({ "name": "notes", "entry_point": "echo" }),
        );
        write_descriptor(
            root.path(),
            "todo",
            &serde_json::json!({ "name": "todo", "entry_point": "echo", "version": "2.0.0" }),
        );
        // Directories without descriptors are skipped.
        std::fs::create_dir_all(root.path().join("not-a-plugin")).unwrap();

        let registry = PluginRegistry::new(root.path());
        registry.register_executable("echo", Arc::new(Echo));
        assert_eq!(registry.discover().unwrap(), 2);

        assert!(registry.get("notes").is_some());
        let list = registry.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].version, "2.0.0");
    }

    #[test]
    fn test_unregistered_entry_point_fails_discovery() {
        let root = tempfile::tempdir().unwrap();
        write_descriptor(
            root.path(),
            "ghost",
            &serde_json::json!({ "name": "ghost", "entry_point": "missing" }),
        );

        let registry = PluginRegistry::new(root.path());
        assert!(matches!(
            registry.discover(),
            Err(PluginError::Discovery(_))
        ));
    }

    #[test]
    fn test_reload_picks_up_new_plugins() {
        let root = tempfile::tempdir().unwrap();
        let registry = PluginRegistry::new(root.path());
        registry.register_executable("echo", Arc::new(Echo));
        assert_eq!(registry.discover().unwrap(), 0);

        write_descriptor(
            root.path(),
            "notes",
            &serde_json::json!({ "name": "notes", "entry_point": "echo" }),
        );
        assert_eq!(registry.reload().unwrap(), 1);
    }
}
