//! Access to the host process-supervision facility (systemd).
//!
//! Every call shells out to `systemctl` synchronously from the caller's point
//! of view and is wrapped in a bounded timeout; a timeout surfaces as a host
//! control failure rather than stalling the monitor loop.

use crate::config::HostConfig;
use crate::error::{ManagerError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

#[async_trait]
pub trait HostControl: Send + Sync {
    /// Raw `systemctl is-active` output for a unit, trimmed. Non-zero exit
    /// is not an error here: systemctl exits non-zero for inactive units and
    /// still prints the state.
    async fn is_active(&self, unit: &str) -> Result<String>;

    async fn start_unit(&self, unit: &str) -> Result<()>;
    async fn stop_unit(&self, unit: &str) -> Result<()>;
    async fn restart_unit(&self, unit: &str) -> Result<()>;
    async fn disable_unit(&self, unit: &str) -> Result<()>;

    /// Install a unit definition into the protected unit directory and make
    /// it world-readable.
    async fn install_unit(&self, unit: &str, content: &str) -> Result<()>;

    /// Remove the unit definition file if present. Absence is not an error.
    async fn remove_unit(&self, unit: &str) -> Result<()>;

    async fn daemon_reload(&self) -> Result<()>;

    /// Recent status/log text for a unit, for alert mail bodies.
    async fn status_log(&self, unit: &str) -> Result<String>;
}

/// Production implementation backed by `systemctl` and `sudo` for the
/// privileged steps.
pub struct SystemctlHost {
    unit_dir: PathBuf,
    timeout: Duration,
}

impl SystemctlHost {
    pub fn new(cfg: &HostConfig) -> Self {
        Self {
            unit_dir: cfg.unit_dir.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }

    async fn run(&self, op: &'static str, unit: &str, cmd: &mut Command) -> Result<Output> {
        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => Err(ManagerError::host(unit, op, "command timed out")),
            Ok(Err(e)) => Err(ManagerError::host(unit, op, e.to_string())),
            Ok(Ok(output)) => Ok(output),
        }
    }

    /// Run a command and require a zero exit status.
    async fn run_checked(&self, op: &'static str, unit: &str, cmd: &mut Command) -> Result<()> {
        let output = self.run(op, unit, cmd).await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ManagerError::host(unit, op, stderr.trim().to_string()))
        }
    }

    async fn sudo_systemctl(&self, op: &'static str, unit: &str) -> Result<()> {
        let mut cmd = Command::new("sudo");
        cmd.args(["systemctl", op, unit]);
        self.run_checked(op, unit, &mut cmd).await
    }
}

#[async_trait]
impl HostControl for SystemctlHost {
    async fn is_active(&self, unit: &str) -> Result<String> {
        let mut cmd = Command::new("systemctl");
        cmd.args(["is-active", unit]);
        let output = self.run("is-active", unit, &mut cmd).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn start_unit(&self, unit: &str) -> Result<()> {
        self.sudo_systemctl("start", unit).await
    }

    async fn stop_unit(&self, unit: &str) -> Result<()> {
        self.sudo_systemctl("stop", unit).await
    }

    async fn restart_unit(&self, unit: &str) -> Result<()> {
        self.sudo_systemctl("restart", unit).await
    }

    async fn disable_unit(&self, unit: &str) -> Result<()> {
        self.sudo_systemctl("disable", unit).await
    }

    async fn install_unit(&self, unit: &str, content: &str) -> Result<()> {
        // Stage in a temp file, then move into place with elevated
        // privilege: the unit directory itself is not writable by us.
        let staged = tokio::task::spawn_blocking({
            let content = content.to_string();
            move || -> std::io::Result<tempfile::TempPath> {
                use std::io::Write;
                let mut file = tempfile::NamedTempFile::new()?;
                file.write_all(content.as_bytes())?;
                Ok(file.into_temp_path())
            }
        })
        .await
        .map_err(|e| ManagerError::host(unit, "install", e.to_string()))?
        .map_err(|e| ManagerError::fs(std::env::temp_dir(), e))?;

        let target = self.unit_dir.join(unit);

        let mut mv = Command::new("sudo");
        mv.arg("mv").arg(staged.as_os_str()).arg(&target);
        self.run_checked("install", unit, &mut mv).await?;
        // The staged file was consumed by mv; keep() stops TempPath from
        // trying to delete it again.
        let _ = staged.keep();

        let mut chmod = Command::new("sudo");
        chmod.arg("chmod").arg("644").arg(&target);
        self.run_checked("install", unit, &mut chmod).await
    }

    async fn remove_unit(&self, unit: &str) -> Result<()> {
        let target = self.unit_dir.join(unit);
        if !target.exists() {
            tracing::debug!("Unit file {} already absent", target.display());
            return Ok(());
        }
        let mut rm = Command::new("sudo");
        rm.arg("rm").arg(&target);
        self.run_checked("remove", unit, &mut rm).await
    }

    async fn daemon_reload(&self) -> Result<()> {
        let mut cmd = Command::new("sudo");
        cmd.args(["systemctl", "daemon-reload"]);
        self.run_checked("daemon-reload", "-", &mut cmd).await
    }

    async fn status_log(&self, unit: &str) -> Result<String> {
        let mut cmd = Command::new("systemctl");
        cmd.args(["status", unit, "-o", "short-iso", "--no-pager"]);
        let output = self.run("status", unit, &mut cmd).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records every call and simulates live unit state in-memory.
    pub struct MockHost {
        active: Mutex<HashMap<String, String>>,
        calls: Mutex<Vec<String>>,
        pub fail_restart: AtomicBool,
        pub fail_start: AtomicBool,
        pub fail_is_active: AtomicBool,
    }

    impl MockHost {
        pub fn new() -> Self {
            Self {
                active: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                fail_restart: AtomicBool::new(false),
                fail_start: AtomicBool::new(false),
                fail_is_active: AtomicBool::new(false),
            }
        }

        pub fn set_active(&self, unit: &str, raw: &str) {
            self.active.lock().unwrap().insert(unit.to_string(), raw.to_string());
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count_calls(&self, prefix: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl HostControl for MockHost {
        async fn is_active(&self, unit: &str) -> Result<String> {
            self.record(format!("is-active {unit}"));
            if self.fail_is_active.load(Ordering::SeqCst) {
                return Err(ManagerError::host(unit, "is-active", "mock query failure"));
            }
            Ok(self
                .active
                .lock()
                .unwrap()
                .get(unit)
                .cloned()
                .unwrap_or_else(|| "inactive".to_string()))
        }

        async fn start_unit(&self, unit: &str) -> Result<()> {
            self.record(format!("start {unit}"));
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(ManagerError::host(unit, "start", "mock start failure"));
            }
            self.set_active(unit, "active");
            Ok(())
        }

        async fn stop_unit(&self, unit: &str) -> Result<()> {
            self.record(format!("stop {unit}"));
            self.set_active(unit, "inactive");
            Ok(())
        }

        async fn restart_unit(&self, unit: &str) -> Result<()> {
            self.record(format!("restart {unit}"));
            if self.fail_restart.load(Ordering::SeqCst) {
                return Err(ManagerError::host(unit, "restart", "mock restart failure"));
            }
            self.set_active(unit, "active");
            Ok(())
        }

        async fn disable_unit(&self, unit: &str) -> Result<()> {
            self.record(format!("disable {unit}"));
            Ok(())
        }

        async fn install_unit(&self, unit: &str, _content: &str) -> Result<()> {
            self.record(format!("install {unit}"));
            Ok(())
        }

        async fn remove_unit(&self, unit: &str) -> Result<()> {
            self.record(format!("remove {unit}"));
            self.active.lock().unwrap().remove(unit);
            Ok(())
        }

        async fn daemon_reload(&self) -> Result<()> {
            self.record("daemon-reload".to_string());
            Ok(())
        }

        async fn status_log(&self, unit: &str) -> Result<String> {
            self.record(format!("status {unit}"));
            Ok(format!("-- mock journal for {unit} --"))
        }
    }
}
