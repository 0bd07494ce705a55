//! Integration test for the startup path: fetch the module list from the
//! registry API, then rebuild service bindings from unit files already
//! present on the host.

use httpmock::prelude::*;
use modkeeper::config::RegistryConfig;
use modkeeper::model::ServiceStatus;
use modkeeper::registry::ServiceRegistry;
use modkeeper::remote::{HttpRegistryApi, RegistryApi};
use modkeeper::unit_file;
use std::path::Path;

#[tokio::test]
async fn test_startup_rebuilds_bindings_from_host_units() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/modules");
        then.status(200).json_body(serde_json::json!([
            {
                "guid": "9c2f", "name": "Sensor Hub", "description": "edge sensor fanout",
                "status": "active", "service_type": "dummy_service"
            },
            {
                "guid": "77ab", "name": "Pump Driver", "description": "",
                "status": "inactive", "service_type": "pump_driver"
            }
        ]));
    });

    let unit_dir = tempfile::tempdir().unwrap();

    // An installed unit for "Sensor Hub", rendered the way the controller
    // would have rendered it in a previous run.
    let text = unit_file::render_unit(
        "Sensor_Hub",
        "Sensor Hub",
        "operator",
        Path::new("/opt/modules/dummy_service"),
        Path::new("/opt/modules/dummy_service/run.sh"),
    );
    std::fs::write(unit_dir.path().join("Sensor_Hub.service"), text).unwrap();

    // A unit belonging to something else entirely; must be left alone.
    std::fs::write(
        unit_dir.path().join("nginx.service"),
        "[Service]\nWorkingDirectory=/etc/nginx\nExecStart=/usr/sbin/nginx\n",
    )
    .unwrap();

    let api = HttpRegistryApi::new(&RegistryConfig {
        base_url: server.base_url(),
        timeout_secs: 5,
    })
    .unwrap();

    let registry = ServiceRegistry::new();
    registry.replace_modules(api.list_modules().await.unwrap()).await;
    registry.load_existing_services(unit_dir.path()).await;

    // Sensor Hub was rediscovered with status unknown; the first monitor
    // tick is responsible for resolving the real status.
    let binding = registry.get("9c2f").await.unwrap();
    assert_eq!(binding.unit_name, "Sensor_Hub.service");
    assert_eq!(binding.status, ServiceStatus::Unknown);
    assert_eq!(binding.working_dir, Path::new("/opt/modules/dummy_service"));

    // Pump Driver has no unit on disk, so no binding; the foreign nginx
    // unit was not adopted.
    assert!(registry.get("77ab").await.is_none());
    assert_eq!(registry.values().await.len(), 1);
}
