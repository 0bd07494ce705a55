//! Shared in-memory state of the supervisor: the cached module list, the
//! service bindings, and the per-module operation locks.
//!
//! Both the command channel and the status monitor read and write this state
//! concurrently, so everything lives behind async RwLocks. Lifecycle
//! operations for one module are additionally serialized through
//! [`ServiceRegistry::module_lock`] so a restart racing a delete can never
//! interleave.

use crate::model::{Module, ModuleStatus, ServiceBinding, ServiceStatus};
use crate::unit_file;
use glob::glob;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, RwLock};

pub struct ServiceRegistry {
    modules: RwLock<Vec<Module>>,
    bindings: RwLock<HashMap<String, ServiceBinding>>,
    op_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(Vec::new()),
            bindings: RwLock::new(HashMap::new()),
            op_locks: StdMutex::new(HashMap::new()),
        }
    }

    // ── module cache ───────────────────────────────────────────

    pub async fn replace_modules(&self, modules: Vec<Module>) {
        let mut cache = self.modules.write().await;
        *cache = modules;
    }

    pub async fn modules(&self) -> Vec<Module> {
        self.modules.read().await.clone()
    }

    pub async fn module_by_guid(&self, guid: &str) -> Option<Module> {
        self.modules.read().await.iter().find(|m| m.guid == guid).cloned()
    }

    /// Mirror a successfully pushed remote status into the cache so the
    /// monitor does not re-push an unchanged value every tick.
    pub async fn set_cached_module_status(&self, guid: &str, status: ModuleStatus) {
        let mut cache = self.modules.write().await;
        if let Some(module) = cache.iter_mut().find(|m| m.guid == guid) {
            module.status = status;
        }
    }

    // ── bindings ───────────────────────────────────────────────

    pub async fn get(&self, guid: &str) -> Option<ServiceBinding> {
        self.bindings.read().await.get(guid).cloned()
    }

    pub async fn put(&self, binding: ServiceBinding) {
        self.bindings.write().await.insert(binding.guid.clone(), binding);
    }

    pub async fn remove(&self, guid: &str) -> Option<ServiceBinding> {
        self.bindings.write().await.remove(guid)
    }

    pub async fn values(&self) -> Vec<ServiceBinding> {
        self.bindings.read().await.values().cloned().collect()
    }

    /// Returns false when no binding exists for the module.
    pub async fn set_binding_status(&self, guid: &str, status: ServiceStatus) -> bool {
        let mut bindings = self.bindings.write().await;
        match bindings.get_mut(guid) {
            Some(binding) => {
                binding.status = status;
                true
            }
            None => false,
        }
    }

    /// Per-module serialization lock. Every lifecycle operation holds this
    /// for its whole duration.
    pub fn module_lock(&self, guid: &str) -> Arc<Mutex<()>> {
        // The table only ever inserts, so a poisoned guard is still usable.
        let mut locks = match self.op_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(guid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ── startup reconciliation ─────────────────────────────────

    /// Rebuild bindings by matching existing unit files against the cached
    /// module list. Each match is parsed for its working directory and
    /// executable and registered with status `unknown`; the first monitor
    /// tick resolves the real status. Unit files that match no module are
    /// left alone.
    pub async fn load_existing_services(&self, unit_dir: &Path) {
        let modules = self.modules().await;
        if modules.is_empty() {
            tracing::warn!("Module list is empty, nothing to reconcile against existing units");
            return;
        }

        let pattern = unit_dir.join("*.service");
        let mut existing = Vec::new();
        match glob(&pattern.to_string_lossy()) {
            Ok(paths) => {
                for entry in paths {
                    match entry {
                        Ok(path) => existing.push(path),
                        Err(e) => tracing::warn!("Skipping unreadable unit path: {}", e),
                    }
                }
            }
            Err(e) => {
                tracing::error!("Failed to scan unit directory {}: {}", unit_dir.display(), e);
                return;
            }
        }

        let mut found: Vec<String> = Vec::new();
        for module in &modules {
            let unit = unit_file::unit_name(&module.name);
            let path = unit_dir.join(&unit);
            if !existing.contains(&path) {
                continue;
            }

            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::error!("Failed to read unit file {}: {}", path.display(), e);
                    continue;
                }
            };

            match unit_file::parse_unit_paths(&content) {
                Some((working_dir, exec_path)) => {
                    self.put(ServiceBinding {
                        guid: module.guid.clone(),
                        module_name: module.name.clone(),
                        working_dir,
                        exec_path,
                        unit_name: unit.clone(),
                        status: ServiceStatus::Unknown,
                    })
                    .await;
                    found.push(unit);
                }
                None => {
                    tracing::warn!("Could not extract paths from unit file {}", path.display());
                }
            }
        }

        if found.is_empty() {
            tracing::info!("No existing services found for known modules");
        } else {
            tracing::info!("Rediscovered {} existing services: {}", found.len(), found.join(", "));
        }
    }
}
