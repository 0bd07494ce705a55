//! Lifecycle operations against the host supervision facility for a single
//! module: provision, deprovision, start, stop, restart.
//!
//! Every operation takes the module's serialization lock first, so commands
//! racing each other (or the startup reconciliation) for the same module
//! apply in arrival order and never interleave. Nothing here retries; a
//! failure is logged, surfaced, and leaves state at the last completed step.

use crate::alert::Alerter;
use crate::config::HostConfig;
use crate::error::{ManagerError, Result};
use crate::host::HostControl;
use crate::model::{ModuleStatus, ServiceBinding, ServiceStatus};
use crate::registry::ServiceRegistry;
use crate::remote::{self, RegistryApi};
use crate::unit_file;
use std::path::Path;
use std::sync::Arc;

/// Placeholder executable installed when a module's service type has no real
/// code deployed yet. Keeps the unit startable.
const PLACEHOLDER_SCRIPT: &str = "#!/bin/sh\nwhile true; do\n    sleep 60\ndone\n";

pub struct ServiceController {
    registry: Arc<ServiceRegistry>,
    host: Arc<dyn HostControl>,
    remote: Arc<dyn RegistryApi>,
    alerter: Arc<dyn Alerter>,
    host_cfg: HostConfig,
    alerts_enabled: bool,
}

impl ServiceController {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        host: Arc<dyn HostControl>,
        remote: Arc<dyn RegistryApi>,
        alerter: Arc<dyn Alerter>,
        host_cfg: HostConfig,
        alerts_enabled: bool,
    ) -> Self {
        Self {
            registry,
            host,
            remote,
            alerter,
            host_cfg,
            alerts_enabled,
        }
    }

    /// Provision a service for a module: placeholder executable if needed,
    /// unit file install, daemon reload, binding registration, remote status
    /// push. Idempotent: an already-bound module returns its existing
    /// binding without reinstalling anything.
    pub async fn create(&self, guid: &str) -> Result<ServiceBinding> {
        let lock = self.registry.module_lock(guid);
        let _guard = lock.lock().await;

        if let Some(existing) = self.registry.get(guid).await {
            tracing::info!(
                "Service {} already provisioned for module '{}', skipping create",
                existing.unit_name,
                existing.module_name
            );
            return Ok(existing);
        }

        let module = self
            .registry
            .module_by_guid(guid)
            .await
            .ok_or_else(|| ManagerError::NotFound(guid.to_string()))?;

        let working_dir = self.host_cfg.modules_dir.join(&module.service_type);
        let exec_path = working_dir.join("run.sh");
        provision_placeholder(&working_dir, &exec_path)?;

        let service_name = unit_file::sanitize_service_name(&module.name);
        let unit = format!("{service_name}.service");
        let text = unit_file::render_unit(
            &service_name,
            &module.name,
            &self.host_cfg.service_user,
            &working_dir,
            &exec_path,
        );

        self.host.install_unit(&unit, &text).await?;
        self.host.daemon_reload().await?;

        let binding = ServiceBinding {
            guid: module.guid.clone(),
            module_name: module.name.clone(),
            working_dir,
            exec_path,
            unit_name: unit.clone(),
            status: ServiceStatus::Stopped,
        };
        self.registry.put(binding.clone()).await;

        tracing::info!("Created service {} for module '{}'", unit, module.name);
        self.report(&module.guid, &module.name, ModuleStatus::Inactive).await;
        Ok(binding)
    }

    /// Deprovision a module's service. Stopping and disabling are
    /// best-effort; unit removal and reload are not. A module with no
    /// binding is a no-op success.
    pub async fn delete(&self, guid: &str) -> Result<()> {
        let lock = self.registry.module_lock(guid);
        let _guard = lock.lock().await;

        let Some(binding) = self.registry.get(guid).await else {
            tracing::info!("No service bound to module {}, nothing to delete", guid);
            return Ok(());
        };

        if let Err(e) = self.host.stop_unit(&binding.unit_name).await {
            tracing::warn!("Failed to stop {} before removal: {}", binding.unit_name, e);
        }
        if let Err(e) = self.host.disable_unit(&binding.unit_name).await {
            tracing::warn!("Failed to disable {}: {}", binding.unit_name, e);
        }

        self.host.remove_unit(&binding.unit_name).await?;
        self.host.daemon_reload().await?;

        self.registry.remove(guid).await;
        tracing::info!(
            "Deleted service {} for module '{}'",
            binding.unit_name,
            binding.module_name
        );
        self.report(guid, &binding.module_name, ModuleStatus::Inactive).await;
        Ok(())
    }

    /// Start the module's service. Already-active services are left alone:
    /// no redundant host call, but cached and remote status are refreshed.
    pub async fn start(&self, guid: &str) -> Result<()> {
        let lock = self.registry.module_lock(guid);
        let _guard = lock.lock().await;

        let binding = self
            .registry
            .get(guid)
            .await
            .ok_or_else(|| ManagerError::NotFound(guid.to_string()))?;

        if self.live_status(&binding.unit_name).await.as_deref() == Some("active") {
            tracing::info!("Service {} is already running", binding.unit_name);
            self.registry.set_binding_status(guid, ServiceStatus::Running).await;
            self.report(guid, &binding.module_name, ModuleStatus::Active).await;
            return Ok(());
        }

        self.host.start_unit(&binding.unit_name).await?;
        self.registry.set_binding_status(guid, ServiceStatus::Running).await;
        tracing::info!(
            "Started service {} for module '{}'",
            binding.unit_name,
            binding.module_name
        );
        self.report(guid, &binding.module_name, ModuleStatus::Active).await;
        Ok(())
    }

    /// Stop the module's service; mirror image of [`Self::start`].
    pub async fn stop(&self, guid: &str) -> Result<()> {
        let lock = self.registry.module_lock(guid);
        let _guard = lock.lock().await;

        let binding = self
            .registry
            .get(guid)
            .await
            .ok_or_else(|| ManagerError::NotFound(guid.to_string()))?;

        // Short-circuit only on a successful probe that says not active; a
        // failed probe falls through to the stop verb, same as start.
        if matches!(self.live_status(&binding.unit_name).await.as_deref(), Some(raw) if raw != "active")
        {
            tracing::info!("Service {} is not running", binding.unit_name);
            self.registry.set_binding_status(guid, ServiceStatus::Stopped).await;
            self.report(guid, &binding.module_name, ModuleStatus::Inactive).await;
            return Ok(());
        }

        self.host.stop_unit(&binding.unit_name).await?;
        self.registry.set_binding_status(guid, ServiceStatus::Stopped).await;
        tracing::info!(
            "Stopped service {} for module '{}'",
            binding.unit_name,
            binding.module_name
        );
        self.report(guid, &binding.module_name, ModuleStatus::Inactive).await;
        Ok(())
    }

    /// Restart unconditionally. On failure the module is promoted to
    /// `failed` locally and remotely, and an alert goes out when enabled.
    pub async fn restart(&self, guid: &str) -> Result<()> {
        let lock = self.registry.module_lock(guid);
        let _guard = lock.lock().await;

        let binding = self
            .registry
            .get(guid)
            .await
            .ok_or_else(|| ManagerError::NotFound(guid.to_string()))?;

        match self.host.restart_unit(&binding.unit_name).await {
            Ok(()) => {
                self.registry.set_binding_status(guid, ServiceStatus::Running).await;
                tracing::info!(
                    "Restarted service {} for module '{}'",
                    binding.unit_name,
                    binding.module_name
                );
                self.report(guid, &binding.module_name, ModuleStatus::Active).await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    "Failed to restart service {} for module '{}': {}",
                    binding.unit_name,
                    binding.module_name,
                    e
                );
                self.registry.set_binding_status(guid, ServiceStatus::Failed).await;
                self.report(guid, &binding.module_name, ModuleStatus::Failed).await;
                if self.alerts_enabled {
                    self.alerter.notify(&binding.module_name, &binding.unit_name).await;
                }
                Err(e)
            }
        }
    }

    /// Restart every module that has a service bound. Per-module failures
    /// are logged and the loop continues.
    pub async fn restart_all(&self) {
        tracing::info!("Restarting all bound services");
        for module in self.registry.modules().await {
            if self.registry.get(&module.guid).await.is_none() {
                continue;
            }
            if let Err(e) = self.restart(&module.guid).await {
                tracing::error!("Failed to restart module '{}': {}", module.name, e);
            }
        }
        tracing::info!("Restart of all bound services finished");
    }

    /// Live status probe used by the start/stop short-circuits. A probe
    /// failure is only worth a warning: the actual verb call decides.
    async fn live_status(&self, unit: &str) -> Option<String> {
        match self.host.is_active(unit).await {
            Ok(raw) => Some(raw),
            Err(e) => {
                tracing::warn!("Failed to query status of {}: {}", unit, e);
                None
            }
        }
    }

    async fn report(&self, guid: &str, module_name: &str, status: ModuleStatus) {
        remote::report_status(self.remote.as_ref(), &self.registry, guid, module_name, status).await;
    }
}

fn provision_placeholder(working_dir: &Path, exec_path: &Path) -> Result<()> {
    std::fs::create_dir_all(working_dir).map_err(|e| ManagerError::fs(working_dir, e))?;

    if !exec_path.exists() {
        std::fs::write(exec_path, PLACEHOLDER_SCRIPT).map_err(|e| ManagerError::fs(exec_path, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(exec_path, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| ManagerError::fs(exec_path, e))?;
        }
        tracing::info!("Created placeholder executable {}", exec_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::mock::MockAlerter;
    use crate::host::mock::MockHost;
    use crate::model::Module;
    use crate::remote::mock::MockRegistryApi;
    use std::sync::atomic::Ordering;

    struct Fixture {
        registry: Arc<ServiceRegistry>,
        host: Arc<MockHost>,
        remote: Arc<MockRegistryApi>,
        alerter: Arc<MockAlerter>,
        controller: ServiceController,
        _tmp: tempfile::TempDir,
    }

    async fn fixture(alerts_enabled: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Arc::new(ServiceRegistry::new());
        registry
            .replace_modules(vec![Module {
                guid: "m1".into(),
                name: "Sensor Hub".into(),
                description: String::new(),
                status: ModuleStatus::Inactive,
                service_type: "dummy_service".into(),
            }])
            .await;

        let host = Arc::new(MockHost::new());
        let remote = Arc::new(MockRegistryApi::new());
        let alerter = Arc::new(MockAlerter::new());
        let host_cfg = HostConfig {
            unit_dir: tmp.path().join("units"),
            modules_dir: tmp.path().join("modules"),
            service_user: "operator".into(),
            timeout_secs: 5,
        };
        let controller = ServiceController::new(
            registry.clone(),
            host.clone(),
            remote.clone(),
            alerter.clone(),
            host_cfg,
            alerts_enabled,
        );
        Fixture {
            registry,
            host,
            remote,
            alerter,
            controller,
            _tmp: tmp,
        }
    }

    #[tokio::test]
    async fn test_create_provisions_unit_and_reports_inactive() {
        let f = fixture(false).await;

        let binding = f.controller.create("m1").await.unwrap();
        assert_eq!(binding.unit_name, "Sensor_Hub.service");
        assert_eq!(binding.status, ServiceStatus::Stopped);
        assert!(binding.exec_path.ends_with("dummy_service/run.sh"));
        assert!(binding.exec_path.exists(), "placeholder executable installed");

        let calls = f.host.calls();
        assert!(calls.contains(&"install Sensor_Hub.service".to_string()));
        assert!(calls.contains(&"daemon-reload".to_string()));

        assert_eq!(f.remote.pushed(), vec![("m1".to_string(), ModuleStatus::Inactive)]);
        assert_eq!(f.registry.get("m1").await.unwrap().status, ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let f = fixture(false).await;

        let first = f.controller.create("m1").await.unwrap();
        let second = f.controller.create("m1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.host.count_calls("install"), 1);
    }

    #[tokio::test]
    async fn test_create_unknown_module_is_not_found() {
        let f = fixture(false).await;
        let result = f.controller.create("ghost").await;
        assert!(matches!(result, Err(ManagerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let f = fixture(false).await;
        f.controller.create("m1").await.unwrap();

        f.controller.start("m1").await.unwrap();
        f.controller.start("m1").await.unwrap();

        // Second invocation short-circuits on the live status probe
        assert_eq!(f.host.count_calls("start "), 1);
        assert_eq!(f.registry.get("m1").await.unwrap().status, ServiceStatus::Running);
        // Both invocations still refresh the remote status
        assert_eq!(
            f.remote.pushed().last().unwrap(),
            &("m1".to_string(), ModuleStatus::Active)
        );
    }

    #[tokio::test]
    async fn test_stop_on_stopped_service_issues_no_host_call() {
        let f = fixture(false).await;
        f.controller.create("m1").await.unwrap();

        f.controller.stop("m1").await.unwrap();

        assert_eq!(f.host.count_calls("stop "), 0);
        assert_eq!(f.registry.get("m1").await.unwrap().status, ServiceStatus::Stopped);
        assert_eq!(
            f.remote.pushed().last().unwrap(),
            &("m1".to_string(), ModuleStatus::Inactive)
        );
    }

    #[tokio::test]
    async fn test_stop_proceeds_when_status_query_fails() {
        let f = fixture(false).await;
        f.controller.create("m1").await.unwrap();
        f.controller.start("m1").await.unwrap();
        f.host.fail_is_active.store(true, Ordering::SeqCst);

        f.controller.stop("m1").await.unwrap();

        // An unanswerable status query must not pass for "already stopped";
        // the stop verb decides.
        assert_eq!(f.host.count_calls("stop "), 1);
        assert_eq!(f.registry.get("m1").await.unwrap().status, ServiceStatus::Stopped);
        assert_eq!(
            f.remote.pushed().last().unwrap(),
            &("m1".to_string(), ModuleStatus::Inactive)
        );
    }

    #[tokio::test]
    async fn test_start_failure_surfaces_host_error() {
        let f = fixture(false).await;
        f.controller.create("m1").await.unwrap();
        f.host.fail_start.store(true, Ordering::SeqCst);

        let result = f.controller.start("m1").await;
        assert!(matches!(result, Err(ManagerError::HostControl { .. })));
        // Start failure is not promoted to failed; the monitor's next pass
        // decides what the service actually is
        assert_eq!(f.registry.get("m1").await.unwrap().status, ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_delete_without_binding_is_noop_success() {
        let f = fixture(false).await;
        f.controller.delete("m1").await.unwrap();
        assert!(f.host.calls().is_empty());
        assert!(f.remote.pushed().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_unit_and_binding() {
        let f = fixture(false).await;
        f.controller.create("m1").await.unwrap();
        f.controller.start("m1").await.unwrap();

        f.controller.delete("m1").await.unwrap();

        assert!(f.registry.get("m1").await.is_none());
        let calls = f.host.calls();
        assert!(calls.contains(&"stop Sensor_Hub.service".to_string()));
        assert!(calls.contains(&"disable Sensor_Hub.service".to_string()));
        assert!(calls.contains(&"remove Sensor_Hub.service".to_string()));
        assert_eq!(
            f.remote.pushed().last().unwrap(),
            &("m1".to_string(), ModuleStatus::Inactive)
        );
    }

    #[tokio::test]
    async fn test_restart_failure_promotes_failed_and_alerts_once() {
        let f = fixture(true).await;
        f.controller.create("m1").await.unwrap();
        f.host.fail_restart.store(true, Ordering::SeqCst);

        let result = f.controller.restart("m1").await;
        assert!(matches!(result, Err(ManagerError::HostControl { .. })));

        assert_eq!(f.registry.get("m1").await.unwrap().status, ServiceStatus::Failed);
        assert_eq!(
            f.remote.pushed().last().unwrap(),
            &("m1".to_string(), ModuleStatus::Failed)
        );
        assert_eq!(
            f.alerter.sent(),
            vec![("Sensor Hub".to_string(), "Sensor_Hub.service".to_string())]
        );
    }

    #[tokio::test]
    async fn test_restart_failure_with_alerting_disabled_sends_nothing() {
        let f = fixture(false).await;
        f.controller.create("m1").await.unwrap();
        f.host.fail_restart.store(true, Ordering::SeqCst);

        let _ = f.controller.restart("m1").await;
        assert!(f.alerter.sent().is_empty());
    }

    #[tokio::test]
    async fn test_restart_on_unbound_module_is_not_found() {
        let f = fixture(false).await;
        let result = f.controller.restart("m1").await;
        assert!(matches!(result, Err(ManagerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_restart_all_skips_unbound_modules() {
        let f = fixture(false).await;
        f.registry
            .replace_modules(vec![
                Module {
                    guid: "m1".into(),
                    name: "Sensor Hub".into(),
                    description: String::new(),
                    status: ModuleStatus::Inactive,
                    service_type: "dummy_service".into(),
                },
                Module {
                    guid: "m2".into(),
                    name: "Unbound".into(),
                    description: String::new(),
                    status: ModuleStatus::Inactive,
                    service_type: "dummy_service".into(),
                },
            ])
            .await;
        f.controller.create("m1").await.unwrap();

        f.controller.restart_all().await;

        assert_eq!(f.host.count_calls("restart "), 1);
    }

    #[tokio::test]
    async fn test_concurrent_start_and_delete_leave_consistent_state() {
        let f = fixture(false).await;
        f.controller.create("m1").await.unwrap();

        let controller = Arc::new(f.controller);
        let c1 = controller.clone();
        let c2 = controller.clone();
        let start = tokio::spawn(async move { c1.start("m1").await });
        let delete = tokio::spawn(async move { c2.delete("m1").await });

        let start_result = start.await.unwrap();
        let delete_result = delete.await.unwrap();

        // Whichever order the per-module lock imposed, delete always ends
        // with the binding gone and start either ran first or saw NotFound.
        assert!(delete_result.is_ok());
        assert!(f.registry.get("m1").await.is_none());
        if let Err(e) = start_result {
            assert!(matches!(e, ManagerError::NotFound(_)));
        }
    }
}
