//! Periodic reconciliation loop: observe live service status for every
//! known module, detect transitions, alert on new failures, and keep the
//! remote registry in sync.
//!
//! The loop is fatal-free. A single module's query failure folds into
//! `failed` for that module only; the pass itself always completes, and the
//! next tick starts a fixed interval after the previous one finishes.

use crate::alert::Alerter;
use crate::host::HostControl;
use crate::model::{ModuleStatus, ServiceStatus};
use crate::registry::ServiceRegistry;
use crate::remote::{self, RegistryApi};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Fold a raw `systemctl is-active` answer into the module status
/// vocabulary. Anything unrecognized counts as failed.
pub fn map_raw_status(raw: &str) -> ModuleStatus {
    match raw {
        "active" => ModuleStatus::Active,
        "inactive" => ModuleStatus::Inactive,
        _ => ModuleStatus::Failed,
    }
}

fn service_status(observed: ModuleStatus) -> ServiceStatus {
    match observed {
        ModuleStatus::Active => ServiceStatus::Running,
        ModuleStatus::Inactive => ServiceStatus::Stopped,
        ModuleStatus::Failed => ServiceStatus::Failed,
        ModuleStatus::Unknown => ServiceStatus::Unknown,
    }
}

pub struct StatusMonitor {
    registry: Arc<ServiceRegistry>,
    host: Arc<dyn HostControl>,
    remote: Arc<dyn RegistryApi>,
    alerter: Arc<dyn Alerter>,
    interval: Duration,
    alerts_enabled: bool,
    /// Mapped statuses from the previous tick, used only for transition
    /// logging. Never persisted.
    previous: HashMap<String, ModuleStatus>,
}

impl StatusMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        host: Arc<dyn HostControl>,
        remote: Arc<dyn RegistryApi>,
        alerter: Arc<dyn Alerter>,
        interval: Duration,
        alerts_enabled: bool,
    ) -> Self {
        Self {
            registry,
            host,
            remote,
            alerter,
            interval,
            alerts_enabled,
            previous: HashMap::new(),
        }
    }

    /// Run forever. The tick runs to completion before the interval sleep,
    /// so slow host calls stretch the cadence instead of overlapping passes.
    pub async fn run(mut self) {
        tracing::info!("Status monitor started (interval {:?})", self.interval);
        loop {
            self.tick().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One full reconciliation pass over every known module.
    pub async fn tick(&mut self) {
        let modules = self.registry.modules().await;
        let mut current: HashMap<String, ModuleStatus> = HashMap::new();

        for module in &modules {
            let binding = self.registry.get(&module.guid).await;

            let mut observed = match &binding {
                Some(binding) => match self.host.is_active(&binding.unit_name).await {
                    Ok(raw) => map_raw_status(&raw),
                    Err(e) => {
                        tracing::warn!(
                            "Failed to query status of {}: {}",
                            binding.unit_name,
                            e
                        );
                        ModuleStatus::Failed
                    }
                },
                None => ModuleStatus::Inactive,
            };

            // The binding snapshot predates the query. A delete landing in
            // between leaves a stale unit name behind; the module is cleanly
            // inactive then, not failed.
            let binding = self.registry.get(&module.guid).await;
            if observed == ModuleStatus::Failed && binding.is_none() {
                observed = ModuleStatus::Inactive;
            }

            if observed == ModuleStatus::Failed {
                if let Some(binding) = &binding {
                    if binding.status != ServiceStatus::Failed {
                        tracing::warn!(
                            "Newly observed failure of service {} (module '{}')",
                            binding.unit_name,
                            module.name
                        );
                        if self.alerts_enabled {
                            self.alerter.notify(&module.name, &binding.unit_name).await;
                        }
                    }
                }
            }

            self.registry
                .set_binding_status(&module.guid, service_status(observed))
                .await;

            let previous = self.previous.get(&module.guid).copied();
            if previous != Some(observed) {
                tracing::info!(
                    "Status of module '{}' changed from {} to {}",
                    module.name,
                    previous.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()),
                    observed
                );
            }

            // Remote registry holds the last reported status; push only on
            // divergence, best-effort.
            if module.status != observed {
                remote::report_status(
                    self.remote.as_ref(),
                    &self.registry,
                    &module.guid,
                    &module.name,
                    observed,
                )
                .await;
            }

            current.insert(module.guid.clone(), observed);
        }

        tracing::debug!("Monitor pass over {} modules: {:?}", modules.len(), current);
        self.previous = current;
    }
}
