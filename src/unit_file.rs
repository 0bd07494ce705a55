//! Renders systemd unit definitions for module services and derives the
//! deterministic service name a module maps to.

use std::path::{Path, PathBuf};

/// Replace every character outside `[A-Za-z0-9_]` with an underscore.
///
/// Deterministic by construction: the same module name always yields the same
/// service name. Two names differing only in punctuation can collide; that is
/// an accepted risk, not resolved here.
pub fn sanitize_service_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Full unit file name for a module, e.g. `"Sensor Hub"` -> `"Sensor_Hub.service"`.
pub fn unit_name(module_name: &str) -> String {
    format!("{}.service", sanitize_service_name(module_name))
}

/// Render the unit definition text for a module service.
///
/// Pure and deterministic. `Restart=no` is deliberate: restarts are decided
/// by the supervisor, never by systemd itself. Empty paths are the caller's
/// responsibility to avoid.
pub fn render_unit(
    service_name: &str,
    module_name: &str,
    user: &str,
    working_dir: &Path,
    exec_path: &Path,
) -> String {
    format!(
        "[Unit]\n\
         Description=Module Service for {module_name}\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         User={user}\n\
         WorkingDirectory={working_dir}\n\
         ExecStart={exec_path}\n\
         Restart=no\n\
         StandardOutput=journal\n\
         StandardError=journal\n\
         SyslogIdentifier={service_name}\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        working_dir = working_dir.display(),
        exec_path = exec_path.display(),
    )
}

/// Extract `WorkingDirectory=` and the executable from `ExecStart=` out of
/// unit definition text. Used at startup to rebuild bindings from units that
/// already exist on the host. The exec path is the last whitespace-separated
/// token of ExecStart, so units invoking an interpreter still resolve to the
/// script path.
pub fn parse_unit_paths(content: &str) -> Option<(PathBuf, PathBuf)> {
    let mut working_dir: Option<PathBuf> = None;
    let mut exec_path: Option<PathBuf> = None;

    for line in content.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("WorkingDirectory=") {
            working_dir = Some(PathBuf::from(value));
        } else if let Some(value) = line.strip_prefix("ExecStart=") {
            exec_path = value.split_whitespace().last().map(PathBuf::from);
        }
    }

    match (working_dir, exec_path) {
        (Some(dir), Some(exec)) => Some((dir, exec)),
        _ => None,
    }
}
