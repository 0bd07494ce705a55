use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Declared module status as tracked by the remote registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Inactive,
    Active,
    Failed,
    Unknown,
}

impl Default for ModuleStatus {
    fn default() -> Self {
        ModuleStatus::Inactive
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleStatus::Inactive => "inactive",
            ModuleStatus::Active => "active",
            ModuleStatus::Failed => "failed",
            ModuleStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Last observed runtime status of the host-managed service behind a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
    Failed,
    Unknown,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A module record owned by the remote registry. The supervisor holds a
/// read-mostly cached copy, refreshed on the `update_modules_list` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub guid: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ModuleStatus,
    /// Selects which installable code a newly created service runs.
    pub service_type: String,
}

/// Links a module to the concrete systemd unit that runs it.
///
/// At most one binding exists per module guid. The binding does not outlive
/// the unit file it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBinding {
    pub guid: String,
    pub module_name: String,
    pub working_dir: PathBuf,
    pub exec_path: PathBuf,
    /// Full unit name, e.g. `Sensor_Hub.service`.
    pub unit_name: String,
    pub status: ServiceStatus,
}
