//! Client for the module registry API, the durable source of truth for
//! module identity and last-reported status.

use crate::config::RegistryConfig;
use crate::error::{ManagerError, Result};
use crate::model::{Module, ModuleStatus};
use crate::registry::ServiceRegistry;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn list_modules(&self) -> Result<Vec<Module>>;
    async fn set_module_status(&self, guid: &str, status: ModuleStatus) -> Result<()>;
}

pub struct HttpRegistryApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRegistryApi {
    pub fn new(cfg: &RegistryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| ManagerError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl RegistryApi for HttpRegistryApi {
    async fn list_modules(&self) -> Result<Vec<Module>> {
        let url = format!("{}/api/modules", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ManagerError::RemoteRegistry(format!("GET {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(ManagerError::RemoteRegistry(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }

        response
            .json::<Vec<Module>>()
            .await
            .map_err(|e| ManagerError::RemoteRegistry(format!("GET {url}: invalid body: {e}")))
    }

    async fn set_module_status(&self, guid: &str, status: ModuleStatus) -> Result<()> {
        let url = format!("{}/api/modules/{}/status", self.base_url, guid);
        let response = self
            .client
            .put(&url)
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .map_err(|e| ManagerError::RemoteRegistry(format!("PUT {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(ManagerError::RemoteRegistry(format!(
                "PUT {url} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Push a module status to the remote registry, best-effort. Local state is
/// already updated by the time this runs; a push failure is logged and the
/// cached module status is left as-is so the monitor retries the push on a
/// later change.
pub async fn report_status(
    remote: &dyn RegistryApi,
    registry: &ServiceRegistry,
    guid: &str,
    module_name: &str,
    status: ModuleStatus,
) {
    match remote.set_module_status(guid, status).await {
        Ok(()) => {
            registry.set_cached_module_status(guid, status).await;
            tracing::debug!("Reported status {} for module '{}' ({})", status, module_name, guid);
        }
        Err(e) => {
            tracing::error!(
                "Failed to report status {} for module '{}' ({}): {}",
                status,
                module_name,
                guid,
                e
            );
        }
    }
}
